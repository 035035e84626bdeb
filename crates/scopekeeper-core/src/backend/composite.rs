// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dual-write backend with fallback reads.
//!
//! Writes go to both backends and succeed when the primary succeeds; a
//! secondary failure is logged and ignored. Reads try the primary and fall
//! back to the secondary when the primary fails.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::Backend;
use crate::error::Result;

/// Primary + secondary backend pair.
pub struct CompositeBackend {
    primary: Arc<dyn Backend>,
    secondary: Arc<dyn Backend>,
}

impl CompositeBackend {
    pub fn new(primary: Arc<dyn Backend>, secondary: Arc<dyn Backend>) -> Self {
        Self { primary, secondary }
    }

    pub fn primary(&self) -> &Arc<dyn Backend> {
        &self.primary
    }

    pub fn secondary(&self) -> &Arc<dyn Backend> {
        &self.secondary
    }
}

#[async_trait]
impl Backend for CompositeBackend {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.primary.read(key).await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(
                    key = %key,
                    primary = self.primary.backend_type(),
                    error = %e,
                    "Primary backend read failed, falling back to secondary"
                );
                self.secondary.read(key).await
            }
        }
    }

    async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        let (primary, secondary) =
            tokio::join!(self.primary.write(key, data), self.secondary.write(key, data));
        if let Err(e) = secondary {
            warn!(
                key = %key,
                secondary = self.secondary.backend_type(),
                error = %e,
                "Secondary backend write failed"
            );
        }
        primary
    }

    async fn write_if_absent(&self, key: &str, data: &[u8]) -> Result<bool> {
        // The primary decides; the secondary only mirrors the outcome.
        let created = self.primary.write_if_absent(key, data).await?;
        if created {
            if let Err(e) = self.secondary.write(key, data).await {
                warn!(
                    key = %key,
                    secondary = self.secondary.backend_type(),
                    error = %e,
                    "Secondary backend mirror of conditional write failed"
                );
            }
        }
        Ok(created)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let (primary, secondary) = tokio::join!(self.primary.delete(key), self.secondary.delete(key));
        if let Err(e) = secondary {
            warn!(
                key = %key,
                secondary = self.secondary.backend_type(),
                error = %e,
                "Secondary backend delete failed"
            );
        }
        primary
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        match self.primary.list(prefix).await {
            Ok(keys) => Ok(keys),
            Err(e) => {
                warn!(
                    prefix = %prefix,
                    error = %e,
                    "Primary backend list failed, falling back to secondary"
                );
                self.secondary.list(prefix).await
            }
        }
    }

    fn backend_type(&self) -> &'static str {
        "composite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn pair() -> (MemoryBackend, MemoryBackend, CompositeBackend) {
        let primary = MemoryBackend::new();
        let secondary = MemoryBackend::new();
        let composite = CompositeBackend::new(
            Arc::new(primary.clone()),
            Arc::new(secondary.clone()),
        );
        (primary, secondary, composite)
    }

    #[tokio::test]
    async fn test_write_goes_to_both() {
        let (primary, secondary, composite) = pair();
        composite.write("a/b/state.json", b"1").await.unwrap();

        assert_eq!(primary.read("a/b/state.json").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(secondary.read("a/b/state.json").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_secondary_write_failure_is_not_fatal() {
        let (primary, secondary, composite) = pair();
        secondary.set_unavailable(true);

        composite.write("a/b/state.json", b"1").await.unwrap();
        assert!(primary.read("a/b/state.json").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_primary_write_failure_is_fatal() {
        let (primary, _secondary, composite) = pair();
        primary.set_unavailable(true);

        let err = composite.write("a/b/state.json", b"1").await.unwrap_err();
        assert_eq!(err.error_code(), "BACKEND_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_read_falls_back_to_secondary() {
        let (primary, _secondary, composite) = pair();
        composite.write("a/b/state.json", b"1").await.unwrap();
        primary.set_unavailable(true);

        assert_eq!(
            composite.read("a/b/state.json").await.unwrap(),
            Some(b"1".to_vec())
        );
    }

    #[tokio::test]
    async fn test_conditional_write_decided_by_primary() {
        let (primary, secondary, composite) = pair();
        // Stale marker only in the secondary must not block acquisition.
        secondary.write("a/b/.lock", b"old").await.unwrap();

        assert!(composite.write_if_absent("a/b/.lock", b"new").await.unwrap());
        assert_eq!(primary.read("a/b/.lock").await.unwrap(), Some(b"new".to_vec()));
        assert_eq!(secondary.read("a/b/.lock").await.unwrap(), Some(b"new".to_vec()));

        assert!(!composite.write_if_absent("a/b/.lock", b"again").await.unwrap());
    }
}
