// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Storage backends for State documents, lock markers and snapshots.
//!
//! This module defines the backend abstraction and its implementations:
//!
//! - [`LocalBackend`]: a directory tree on durable local storage
//! - [`RemoteBackend`]: an HTTP object store (feature `remote`)
//! - [`CompositeBackend`]: dual-write to a primary and a secondary, fallback reads
//! - [`MemoryBackend`]: in-process map with fault injection

pub mod composite;
pub mod local;
pub mod memory;
#[cfg(feature = "remote")]
pub mod remote;

pub use self::composite::CompositeBackend;
pub use self::local::LocalBackend;
pub use self::memory::MemoryBackend;
#[cfg(feature = "remote")]
pub use self::remote::RemoteBackend;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::BackendConfig;
use crate::error::{Result, ScopeError};
use crate::retry::RetryPolicy;

/// Key/value storage over backend-relative paths such as `myapp/prod/state.json`.
///
/// "Not found" is never an error: `read` returns `Ok(None)` and `delete` of a
/// missing key succeeds. Errors are either transient
/// ([`ScopeError::BackendUnavailable`]) or permanent
/// ([`ScopeError::BackendRejected`]).
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read the bytes stored at `key`, `None` if nothing is stored there.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Atomically replace the bytes at `key`.
    ///
    /// A reader observes either the previous or the new content, never a mix.
    async fn write(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Create `key` only if nothing is stored there yet.
    ///
    /// Returns `false` when the key already exists.
    async fn write_if_absent(&self, key: &str, data: &[u8]) -> Result<bool>;

    /// Delete `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Short backend name for logs and CLI output.
    fn backend_type(&self) -> &'static str;
}

/// Build the backend described by `config`.
///
/// `retry` applies to network backends; local storage is not retried.
pub fn from_config(config: &BackendConfig, retry: &RetryPolicy) -> Result<Arc<dyn Backend>> {
    match config {
        BackendConfig::Local { root } => Ok(Arc::new(LocalBackend::new(root.clone()))),
        #[cfg(feature = "remote")]
        BackendConfig::Remote(remote) => {
            Ok(Arc::new(RemoteBackend::new(remote.clone(), retry.clone())?))
        }
        #[cfg(not(feature = "remote"))]
        BackendConfig::Remote(remote) => Err(ScopeError::BackendRejected {
            operation: "connect".to_string(),
            path: remote.endpoint.clone(),
            details: "built without the 'remote' feature".to_string(),
        }),
        BackendConfig::Composite { primary, secondary } => {
            let primary = from_config(primary, retry)?;
            let secondary = from_config(secondary, retry)?;
            Ok(Arc::new(CompositeBackend::new(primary, secondary)))
        }
    }
}

/// Reject keys that could escape the backend root.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|s| s.is_empty() || s == "." || s == "..");
    if bad {
        return Err(ScopeError::InvalidPath {
            path: key.to_string(),
            reason: "not a normalized relative key".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("myapp/prod/state.json").is_ok());
        assert!(validate_key("myapp/prod/.backups/1.json").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("myapp/../../etc").is_err());
        assert!(validate_key("myapp//prod").is_err());
    }

    #[test]
    fn test_from_config_local() {
        let dir = tempfile::tempdir().unwrap();
        let backend = from_config(
            &BackendConfig::Local {
                root: dir.path().to_path_buf(),
            },
            &RetryPolicy::none(),
        )
        .unwrap();
        assert_eq!(backend.backend_type(), "local");
    }

    #[test]
    fn test_from_config_composite() {
        let primary = tempfile::tempdir().unwrap();
        let secondary = tempfile::tempdir().unwrap();
        let backend = from_config(
            &BackendConfig::Composite {
                primary: Box::new(BackendConfig::Local {
                    root: primary.path().to_path_buf(),
                }),
                secondary: Box::new(BackendConfig::Local {
                    root: secondary.path().to_path_buf(),
                }),
            },
            &RetryPolicy::none(),
        )
        .unwrap();
        assert_eq!(backend.backend_type(), "composite");
    }
}
