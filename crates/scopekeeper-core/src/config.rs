// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine configuration.
//!
//! Everything the engine needs is passed explicitly through [`EngineConfig`].
//! [`EngineConfig::from_env`] exists for binaries; the library itself never
//! reads the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Default lease time-to-live.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(15 * 60);
/// Default number of snapshots retained per scope.
pub const DEFAULT_MAX_BACKUP_VERSIONS: usize = 10;
/// Default bound on parallel destroy calls.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
/// Default state directory for the local backend.
pub const DEFAULT_STATE_DIR: &str = ".scopekeeper";

/// Where State documents, locks and snapshots are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// Directory tree on local durable storage.
    Local { root: PathBuf },
    /// HTTP object store.
    Remote(RemoteBackendConfig),
    /// Dual-write to `primary` and `secondary`, fallback reads.
    Composite {
        primary: Box<BackendConfig>,
        secondary: Box<BackendConfig>,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Local {
            root: PathBuf::from(DEFAULT_STATE_DIR),
        }
    }
}

/// HTTP object store connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBackendConfig {
    /// Base URL; keys are appended as `{endpoint}/{key}`.
    pub endpoint: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    pub request_timeout: Duration,
}

impl RemoteBackendConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Lease settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    /// How long a lease stays valid without being released.
    pub ttl: Duration,
    /// Holder identity written to lock markers. Generated when `None`.
    pub holder_id: Option<String>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_LOCK_TTL,
            holder_id: None,
        }
    }
}

/// Snapshot retention settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersioningConfig {
    pub enabled: bool,
    /// Oldest snapshots beyond this count are evicted.
    pub max_backup_versions: usize,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_backup_versions: DEFAULT_MAX_BACKUP_VERSIONS,
        }
    }
}

/// How orphans are destroyed under aggressive finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestroyStrategy {
    #[default]
    Sequential,
    /// Bounded by [`EngineConfig::max_concurrency`].
    Parallel,
}

impl FromStr for DestroyStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            _ => Err(ConfigError::Invalid(
                "SCOPEKEEPER_DESTROY_STRATEGY",
                "must be 'sequential' or 'parallel'",
            )),
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub backend: BackendConfig,
    pub lock: LockConfig,
    pub versioning: VersioningConfig,
    pub destroy_strategy: DestroyStrategy,
    /// Retries for each orphan's destroy call.
    pub destroy_retry: RetryPolicy,
    /// Retries for transient network backend failures.
    pub backend_retry: RetryPolicy,
    /// Maximum concurrent destroy calls under the parallel strategy.
    pub max_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            lock: LockConfig::default(),
            versioning: VersioningConfig::default(),
            destroy_strategy: DestroyStrategy::Sequential,
            destroy_retry: RetryPolicy::new(2, 500, 10_000),
            backend_retry: RetryPolicy::new(3, 200, 5_000),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl EngineConfig {
    /// Default configuration over a local state directory.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendConfig::Local { root: root.into() },
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `SCOPEKEEPER_BACKEND`: `local`, `remote` or `composite` (default: local)
    /// - `SCOPEKEEPER_STATE_DIR`: local state directory (default: `.scopekeeper`)
    /// - `SCOPEKEEPER_REMOTE_ENDPOINT`: object store URL (required for remote/composite)
    /// - `SCOPEKEEPER_REMOTE_TOKEN`: bearer token for the object store
    /// - `SCOPEKEEPER_REMOTE_TIMEOUT_SECS`: per-request timeout (default: 30)
    /// - `SCOPEKEEPER_LOCK_TTL_SECS`: lease TTL (default: 900)
    /// - `SCOPEKEEPER_HOLDER_ID`: lock holder identity (default: generated)
    /// - `SCOPEKEEPER_VERSIONING`: `true`/`false` (default: true)
    /// - `SCOPEKEEPER_MAX_BACKUP_VERSIONS`: snapshots kept per scope (default: 10)
    /// - `SCOPEKEEPER_DESTROY_STRATEGY`: `sequential` or `parallel` (default: sequential)
    /// - `SCOPEKEEPER_MAX_CONCURRENCY`: parallel destroy bound (default: 4)
    ///
    /// A composite backend writes to the remote store first and mirrors to
    /// the local state directory.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let local_root = PathBuf::from(
            std::env::var("SCOPEKEEPER_STATE_DIR").unwrap_or_else(|_| DEFAULT_STATE_DIR.to_string()),
        );

        let backend_kind =
            std::env::var("SCOPEKEEPER_BACKEND").unwrap_or_else(|_| "local".to_string());
        let backend = match backend_kind.to_ascii_lowercase().as_str() {
            "local" => BackendConfig::Local { root: local_root },
            "remote" => BackendConfig::Remote(remote_from_env()?),
            "composite" => BackendConfig::Composite {
                primary: Box::new(BackendConfig::Remote(remote_from_env()?)),
                secondary: Box::new(BackendConfig::Local { root: local_root }),
            },
            _ => {
                return Err(ConfigError::Invalid(
                    "SCOPEKEEPER_BACKEND",
                    "must be 'local', 'remote' or 'composite'",
                ));
            }
        };

        let ttl_secs: u64 = parse_var(
            "SCOPEKEEPER_LOCK_TTL_SECS",
            DEFAULT_LOCK_TTL.as_secs(),
            "must be a number of seconds",
        )?;
        if ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "SCOPEKEEPER_LOCK_TTL_SECS",
                "must be greater than zero",
            ));
        }

        let versioning_enabled: bool =
            parse_var("SCOPEKEEPER_VERSIONING", true, "must be 'true' or 'false'")?;
        let max_backup_versions: usize = parse_var(
            "SCOPEKEEPER_MAX_BACKUP_VERSIONS",
            DEFAULT_MAX_BACKUP_VERSIONS,
            "must be a non-negative integer",
        )?;

        let destroy_strategy = match std::env::var("SCOPEKEEPER_DESTROY_STRATEGY") {
            Ok(value) => value.parse()?,
            Err(_) => DestroyStrategy::Sequential,
        };

        let max_concurrency: usize = parse_var(
            "SCOPEKEEPER_MAX_CONCURRENCY",
            DEFAULT_MAX_CONCURRENCY,
            "must be a positive integer",
        )?;
        if max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "SCOPEKEEPER_MAX_CONCURRENCY",
                "must be a positive integer",
            ));
        }

        Ok(Self {
            backend,
            lock: LockConfig {
                ttl: Duration::from_secs(ttl_secs),
                holder_id: std::env::var("SCOPEKEEPER_HOLDER_ID").ok(),
            },
            versioning: VersioningConfig {
                enabled: versioning_enabled,
                max_backup_versions,
            },
            destroy_strategy,
            max_concurrency,
            ..defaults
        })
    }
}

fn remote_from_env() -> Result<RemoteBackendConfig, ConfigError> {
    let endpoint = std::env::var("SCOPEKEEPER_REMOTE_ENDPOINT")
        .map_err(|_| ConfigError::Missing("SCOPEKEEPER_REMOTE_ENDPOINT"))?;
    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        return Err(ConfigError::Invalid(
            "SCOPEKEEPER_REMOTE_ENDPOINT",
            "must be an http:// or https:// URL",
        ));
    }
    let timeout_secs: u64 = parse_var(
        "SCOPEKEEPER_REMOTE_TIMEOUT_SECS",
        30,
        "must be a number of seconds",
    )?;
    Ok(RemoteBackendConfig {
        endpoint,
        token: std::env::var("SCOPEKEEPER_REMOTE_TOKEN").ok(),
        request_timeout: Duration::from_secs(timeout_secs),
    })
}

fn parse_var<T: FromStr>(
    name: &'static str,
    default: T,
    message: &'static str,
) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, message)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
