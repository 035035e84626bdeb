// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scope leases.
//!
//! A lease is a lock marker at `<scope>/.lock` created with a conditional
//! write. A marker whose TTL has elapsed counts as absent and is reclaimed by
//! the next acquirer. Mutual exclusion is best-effort: two processes racing
//! on an expired marker can both delete it, but only one conditional create
//! wins.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::error::{Result, ScopeError};
use crate::path::ScopePath;
use crate::state::now_millis;

/// Time-bounded mutual-exclusion marker over a scope path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub scope_path: ScopePath,
    pub holder_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub acquired_at: DateTime<Utc>,
    pub ttl_ms: u64,
}

impl Lease {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.acquired_at + chrono::Duration::milliseconds(self.ttl_ms.min(i64::MAX as u64) as i64)
    }

    /// A lease is expired once `now > acquired_at + ttl`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// What is found at a scope's lock marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockMarker {
    Held(Lease),
    /// A marker exists but cannot be parsed.
    Unreadable,
}

/// Acquires and releases leases through a [`Backend`].
#[derive(Clone)]
pub struct LockManager {
    backend: Arc<dyn Backend>,
    holder_id: String,
}

impl LockManager {
    /// Create a lock manager. A holder id is generated when none is given.
    pub fn new(backend: Arc<dyn Backend>, holder_id: Option<String>) -> Self {
        Self {
            backend,
            holder_id: holder_id.unwrap_or_else(default_holder_id),
        }
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Acquire the lease on `path` for `ttl`.
    ///
    /// Fails with [`ScopeError::Busy`] when another unexpired lease exists.
    /// An expired or unreadable marker is reclaimed.
    pub async fn acquire(&self, path: &ScopePath, ttl: Duration) -> Result<Lease> {
        let key = path.lock_key();
        let lease = Lease {
            scope_path: path.clone(),
            holder_id: self.holder_id.clone(),
            acquired_at: now_millis(),
            ttl_ms: ttl.as_millis().min(u64::MAX as u128) as u64,
        };
        let body = serde_json::to_vec(&lease)?;

        if self.backend.write_if_absent(&key, &body).await? {
            debug!(scope_path = %path, holder_id = %lease.holder_id, "Lease acquired");
            return Ok(lease);
        }

        let stale = match self.current(path).await? {
            Some(LockMarker::Held(existing)) if !existing.is_expired() => {
                return Err(ScopeError::Busy {
                    scope_path: path.to_string(),
                    holder_id: existing.holder_id.clone(),
                    expires_at: existing.expires_at(),
                });
            }
            Some(LockMarker::Held(existing)) => {
                info!(
                    scope_path = %path,
                    previous_holder = %existing.holder_id,
                    expired_at = %existing.expires_at(),
                    "Reclaiming expired lease"
                );
                true
            }
            Some(LockMarker::Unreadable) => {
                info!(scope_path = %path, "Reclaiming unreadable lock marker");
                true
            }
            // Released between our attempt and the read.
            None => false,
        };

        if stale {
            self.backend.delete(&key).await?;
        }
        if self.backend.write_if_absent(&key, &body).await? {
            debug!(scope_path = %path, holder_id = %lease.holder_id, "Lease acquired");
            return Ok(lease);
        }

        // Lost the race for the reclaimed marker.
        match self.current(path).await? {
            Some(LockMarker::Held(winner)) => Err(ScopeError::Busy {
                scope_path: path.to_string(),
                holder_id: winner.holder_id.clone(),
                expires_at: winner.expires_at(),
            }),
            _ => Err(ScopeError::Busy {
                scope_path: path.to_string(),
                holder_id: "unknown".to_string(),
                expires_at: Utc::now(),
            }),
        }
    }

    /// Release a lease held by this process.
    ///
    /// The marker is only deleted when it still names this lease's holder;
    /// otherwise [`ScopeError::LeaseMismatch`] is returned and the marker is
    /// left in place. Releasing an already-absent marker succeeds.
    pub async fn release(&self, lease: &Lease) -> Result<()> {
        let path = &lease.scope_path;
        match self.current(path).await? {
            None => {
                warn!(scope_path = %path, holder_id = %lease.holder_id, "Lease marker already gone on release");
                Ok(())
            }
            Some(LockMarker::Held(current)) if current.holder_id == lease.holder_id => {
                self.backend.delete(&path.lock_key()).await?;
                debug!(scope_path = %path, holder_id = %lease.holder_id, "Lease released");
                Ok(())
            }
            Some(LockMarker::Held(current)) => Err(ScopeError::LeaseMismatch {
                scope_path: path.to_string(),
                holder_id: lease.holder_id.clone(),
                actual_holder: current.holder_id,
            }),
            Some(LockMarker::Unreadable) => Err(ScopeError::LeaseMismatch {
                scope_path: path.to_string(),
                holder_id: lease.holder_id.clone(),
                actual_holder: "unreadable marker".to_string(),
            }),
        }
    }

    /// Remove the lock marker regardless of holder.
    ///
    /// Operator escape hatch for a holder that crashed without releasing.
    /// Always logged. Returns the lease that was removed, if one was readable.
    pub async fn force_release(&self, path: &ScopePath) -> Result<Option<Lease>> {
        let previous = self.current(path).await?;
        self.backend.delete(&path.lock_key()).await?;

        let previous = match previous {
            Some(LockMarker::Held(lease)) => {
                warn!(
                    scope_path = %path,
                    previous_holder = %lease.holder_id,
                    expired = lease.is_expired(),
                    released_by = %self.holder_id,
                    "Lease force-released"
                );
                Some(lease)
            }
            Some(LockMarker::Unreadable) => {
                warn!(
                    scope_path = %path,
                    released_by = %self.holder_id,
                    "Unreadable lock marker force-released"
                );
                None
            }
            None => {
                warn!(
                    scope_path = %path,
                    released_by = %self.holder_id,
                    "Force-release requested but no lease was held"
                );
                None
            }
        };
        Ok(previous)
    }

    /// Read the lock marker at `path`, if any.
    pub async fn current(&self, path: &ScopePath) -> Result<Option<LockMarker>> {
        let Some(bytes) = self.backend.read(&path.lock_key()).await? else {
            return Ok(None);
        };
        Ok(Some(match serde_json::from_slice::<Lease>(&bytes) {
            Ok(lease) => LockMarker::Held(lease),
            Err(_) => LockMarker::Unreadable,
        }))
    }

    /// Check that `lease` is valid for `path` and still the active marker.
    pub async fn verify(&self, path: &ScopePath, lease: &Lease) -> Result<()> {
        let not_held = |reason: &str| ScopeError::LeaseNotHeld {
            scope_path: path.to_string(),
            reason: reason.to_string(),
        };

        if &lease.scope_path != path {
            return Err(not_held(&format!("lease is for '{}'", lease.scope_path)));
        }
        if lease.is_expired() {
            return Err(not_held("lease has expired"));
        }
        match self.current(path).await? {
            Some(LockMarker::Held(current)) if current.holder_id == lease.holder_id => Ok(()),
            Some(LockMarker::Held(current)) => Err(not_held(&format!(
                "marker is held by '{}'",
                current.holder_id
            ))),
            Some(LockMarker::Unreadable) => Err(not_held("marker is unreadable")),
            None => Err(not_held("marker is missing")),
        }
    }
}

fn default_holder_id() -> String {
    format!("pid-{}-{}", std::process::id(), uuid::Uuid::new_v4())
}
