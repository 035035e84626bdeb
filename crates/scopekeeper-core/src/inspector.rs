// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read-only inventory and health monitoring.
//!
//! The [`Inspector`] walks every persisted scope under the backend root. It
//! never takes a lease and never writes. The [`Monitor`] runs its health
//! checks periodically and forwards alerts to external [`AlertSink`]s:
//!
//! - **Stale lock**: a lock marker whose lease has expired (the holder
//!   crashed without releasing) or that cannot be parsed.
//! - **Stale state**: a State document not updated within the threshold.
//! - **Corrupted state**: a State document that cannot be parsed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::{Result, ScopeError};
use crate::lock::LockMarker;
use crate::path::{LOCK_FILE, ScopePath};
use crate::state::{ScopeState, StateStore};

/// Lock marker details as shown by the inspector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub expired: bool,
}

/// Summary of one persisted scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSummary {
    pub path: String,
    pub resources: usize,
    pub nested_scopes: Vec<String>,
    pub by_type: BTreeMap<String, usize>,
    pub updated_at: Option<DateTime<Utc>>,
    pub lock: Option<LockInfo>,
    /// True when a lock marker exists but cannot be parsed.
    pub lock_unreadable: bool,
    /// Parse failure of the State document, if corrupted.
    pub corrupted: Option<String>,
    pub snapshots: usize,
}

/// Aggregate counts over every persisted scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryStats {
    pub scopes: usize,
    pub resources: usize,
    /// Parent → child relations recorded in State documents.
    pub nested_relations: usize,
    pub active_locks: usize,
    pub stale_locks: usize,
    pub corrupted_scopes: usize,
    pub by_type: BTreeMap<String, usize>,
}

/// Thresholds for [`Inspector::check_health`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthThresholds {
    /// A State not updated for longer than this raises a stale-state alert.
    pub stale_state_after: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            stale_state_after: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertKind {
    StaleLock,
    StaleState,
    CorruptedState,
}

/// One health finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub scope_path: String,
    pub message: String,
    pub observed_at: DateTime<Utc>,
}

/// Delivers alerts to an external notification channel.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()>;
}

/// Alert sink that writes alerts to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        match alert.severity {
            AlertSeverity::Critical => error!(
                kind = ?alert.kind,
                scope_path = %alert.scope_path,
                "{}", alert.message
            ),
            AlertSeverity::Warning => warn!(
                kind = ?alert.kind,
                scope_path = %alert.scope_path,
                "{}", alert.message
            ),
            AlertSeverity::Info => info!(
                kind = ?alert.kind,
                scope_path = %alert.scope_path,
                "{}", alert.message
            ),
        }
        Ok(())
    }
}

/// Every State document and lock marker found in one backend listing.
struct Listing {
    states: Vec<ScopePath>,
    locks: Vec<ScopePath>,
}

/// Read-only traversal of persisted scopes.
#[derive(Clone)]
pub struct Inspector {
    store: StateStore,
}

impl Inspector {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    async fn listing(&self, prefix: &str) -> Result<Listing> {
        let mut listing = Listing {
            states: Vec::new(),
            locks: Vec::new(),
        };
        for key in self.store.backend().list(prefix).await? {
            if let Some(path) = ScopePath::from_state_key(&key) {
                listing.states.push(path);
            } else if let Some(scope) = key.strip_suffix(LOCK_FILE).and_then(|k| k.strip_suffix('/')) {
                if let Ok(path) = ScopePath::parse(scope) {
                    listing.locks.push(path);
                }
            }
        }
        Ok(listing)
    }

    /// Paths of all scopes with a State document under `prefix`, sorted.
    ///
    /// `prefix` matches whole path segments: `myapp` lists `myapp/...` but
    /// not `myapp2/...`.
    pub async fn list_scopes(&self, prefix: &str) -> Result<Vec<ScopePath>> {
        let parent = prefix.trim_end_matches('/');
        let mut scopes: Vec<ScopePath> = self
            .listing(prefix)
            .await?
            .states
            .into_iter()
            .filter(|path| {
                let path = path.to_string();
                parent.is_empty()
                    || path == parent
                    || path
                        .strip_prefix(parent)
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .collect();
        scopes.sort();
        Ok(scopes)
    }

    /// Summarise the scope at `path`.
    pub async fn inspect(&self, path: &ScopePath) -> Result<ScopeSummary> {
        let (state, corrupted) = match self.store.load(path).await {
            Ok(state) => (state, None),
            Err(ScopeError::Corrupted { reason, .. }) => (None, Some(reason)),
            Err(e) => return Err(e),
        };
        let marker = self.store.locks().current(path).await?;
        if state.is_none() && corrupted.is_none() && marker.is_none() {
            return Err(ScopeError::NotFound {
                path: path.state_key(),
            });
        }

        let (lock, lock_unreadable) = match marker {
            Some(LockMarker::Held(lease)) => (
                Some(LockInfo {
                    holder_id: lease.holder_id.clone(),
                    acquired_at: lease.acquired_at,
                    expires_at: lease.expires_at(),
                    expired: lease.is_expired(),
                }),
                false,
            ),
            Some(LockMarker::Unreadable) => (None, true),
            None => (None, false),
        };
        let snapshots = self.store.list_snapshots(path).await?.len();
        let state = state.unwrap_or_default();

        Ok(ScopeSummary {
            path: path.to_string(),
            resources: state.resources.len(),
            nested_scopes: state.nested_scopes.iter().cloned().collect(),
            by_type: count_by_type(&state),
            updated_at: (state.updated_at.timestamp_millis() > 0).then_some(state.updated_at),
            lock,
            lock_unreadable,
            corrupted,
            snapshots,
        })
    }

    /// The State document at `path` exactly as stored.
    pub async fn raw_state(&self, path: &ScopePath) -> Result<Vec<u8>> {
        self.store
            .load_raw(path)
            .await?
            .ok_or_else(|| ScopeError::NotFound {
                path: path.state_key(),
            })
    }

    /// Aggregate counts over every scope under the backend root.
    pub async fn stats(&self) -> Result<InventoryStats> {
        let listing = self.listing("").await?;
        let mut stats = InventoryStats::default();

        for path in &listing.states {
            stats.scopes += 1;
            match self.store.load(path).await {
                Ok(Some(state)) => {
                    stats.resources += state.resources.len();
                    stats.nested_relations += state.nested_scopes.len();
                    for (resource_type, count) in count_by_type(&state) {
                        *stats.by_type.entry(resource_type).or_insert(0) += count;
                    }
                }
                Ok(None) => {}
                Err(ScopeError::Corrupted { .. }) => stats.corrupted_scopes += 1,
                Err(e) => return Err(e),
            }
        }

        for path in &listing.locks {
            match self.store.locks().current(path).await? {
                Some(LockMarker::Held(lease)) if !lease.is_expired() => stats.active_locks += 1,
                Some(_) => stats.stale_locks += 1,
                None => {}
            }
        }
        Ok(stats)
    }

    /// Run every health check and return the findings.
    pub async fn check_health(&self, thresholds: &HealthThresholds) -> Result<Vec<Alert>> {
        let listing = self.listing("").await?;
        let now = Utc::now();
        let stale_after = chrono::Duration::from_std(thresholds.stale_state_after)
            .unwrap_or(chrono::Duration::MAX);
        let mut alerts = Vec::new();

        for path in &listing.locks {
            match self.store.locks().current(path).await? {
                Some(LockMarker::Held(lease)) if lease.is_expired_at(now) => {
                    alerts.push(Alert {
                        kind: AlertKind::StaleLock,
                        severity: AlertSeverity::Warning,
                        scope_path: path.to_string(),
                        message: format!(
                            "lock held by '{}' expired at {} but was never released",
                            lease.holder_id,
                            lease.expires_at()
                        ),
                        observed_at: now,
                    });
                }
                Some(LockMarker::Unreadable) => alerts.push(Alert {
                    kind: AlertKind::StaleLock,
                    severity: AlertSeverity::Warning,
                    scope_path: path.to_string(),
                    message: "lock marker cannot be parsed".to_string(),
                    observed_at: now,
                }),
                _ => {}
            }
        }

        for path in &listing.states {
            match self.store.load(path).await {
                Ok(Some(state)) => {
                    let age = now.signed_duration_since(state.updated_at);
                    if age > stale_after {
                        alerts.push(Alert {
                            kind: AlertKind::StaleState,
                            severity: AlertSeverity::Info,
                            scope_path: path.to_string(),
                            message: format!(
                                "state not updated for {} hours ({} resources recorded)",
                                age.num_hours(),
                                state.resources.len()
                            ),
                            observed_at: now,
                        });
                    }
                }
                Ok(None) => {}
                Err(ScopeError::Corrupted { reason, .. }) => alerts.push(Alert {
                    kind: AlertKind::CorruptedState,
                    severity: AlertSeverity::Critical,
                    scope_path: path.to_string(),
                    message: format!("state document cannot be parsed: {}", reason),
                    observed_at: now,
                }),
                Err(e) => return Err(e),
            }
        }

        alerts.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.scope_path.cmp(&b.scope_path))
        });
        Ok(alerts)
    }
}

fn count_by_type(state: &ScopeState) -> BTreeMap<String, usize> {
    let mut by_type = BTreeMap::new();
    for record in state.resources.values() {
        *by_type.entry(record.resource_type.clone()).or_insert(0) += 1;
    }
    by_type
}

/// Configuration for the health monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How often to run the health checks.
    pub poll_interval: Duration,
    pub thresholds: HealthThresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
            thresholds: HealthThresholds::default(),
        }
    }
}

/// Background worker that periodically checks scope health.
pub struct Monitor {
    inspector: Inspector,
    sinks: Vec<Arc<dyn AlertSink>>,
    config: MonitorConfig,
    shutdown: Arc<Notify>,
}

impl Monitor {
    pub fn new(inspector: Inspector, config: MonitorConfig) -> Self {
        Self {
            inspector,
            sinks: Vec::new(),
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn AlertSink>) -> &mut Self {
        self.sinks.push(sink);
        self
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the monitor loop until the shutdown signal is received.
    ///
    /// Checks once immediately, then every `poll_interval`.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            stale_state_after_secs = self.config.thresholds.stale_state_after.as_secs(),
            "Scope monitor started"
        );

        if let Err(e) = self.check_once().await {
            error!(error = %e, "Failed to check scope health");
        }

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Scope monitor received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.check_once().await {
                        error!(error = %e, "Failed to check scope health");
                    }
                }
            }
        }

        info!("Scope monitor stopped");
    }

    /// Run the health checks once and deliver alerts to every sink.
    ///
    /// Returns the alerts found. Sink failures are logged, not propagated.
    pub async fn check_once(&self) -> Result<Vec<Alert>> {
        let alerts = self.inspector.check_health(&self.config.thresholds).await?;
        if alerts.is_empty() {
            debug!("No scope health alerts");
            return Ok(alerts);
        }

        for alert in &alerts {
            for sink in &self.sinks {
                if let Err(e) = sink.send(alert).await {
                    error!(
                        scope_path = %alert.scope_path,
                        error = %e,
                        "Failed to deliver alert"
                    );
                }
            }
        }
        Ok(alerts)
    }
}
