// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence of State documents and their snapshots.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::ScopeState;
use crate::backend::Backend;
use crate::config::VersioningConfig;
use crate::error::{Result, ScopeError};
use crate::lock::{Lease, LockManager};
use crate::path::ScopePath;

/// A stored snapshot of a State document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    /// Snapshot id: the snapshotted state's `updatedAt` in epoch millis.
    pub id: String,
    /// Backend key of the snapshot document.
    pub key: String,
    pub taken_at: Option<DateTime<Utc>>,
}

/// Loads and saves State documents through a backend.
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn Backend>,
    locks: LockManager,
    versioning: VersioningConfig,
}

impl StateStore {
    pub fn new(backend: Arc<dyn Backend>, locks: LockManager, versioning: VersioningConfig) -> Self {
        Self {
            backend,
            locks,
            versioning,
        }
    }

    /// Load the State at `path`.
    ///
    /// `Ok(None)` means no scope exists there yet. An unparsable document is
    /// [`ScopeError::Corrupted`], never treated as empty.
    pub async fn load(&self, path: &ScopePath) -> Result<Option<ScopeState>> {
        let key = path.state_key();
        match self.backend.read(&key).await? {
            Some(bytes) => ScopeState::from_slice(&key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Raw bytes of the State document, without parsing.
    pub async fn load_raw(&self, path: &ScopePath) -> Result<Option<Vec<u8>>> {
        self.backend.read(&path.state_key()).await
    }

    /// Persist `state` at `path`.
    ///
    /// Requires `lease` to be the active lease for `path`. Advances
    /// `state.updated_at`, writes a snapshot of the new state when versioning
    /// is enabled, then replaces the current document.
    pub async fn save(&self, path: &ScopePath, state: &mut ScopeState, lease: &Lease) -> Result<()> {
        self.locks.verify(path, lease).await?;

        state.touch();
        if self.versioning.enabled && self.versioning.max_backup_versions > 0 {
            self.snapshot(path, state).await?;
        }

        self.backend.write(&path.state_key(), &state.to_vec()?).await?;
        debug!(
            scope_path = %path,
            resources = state.resources.len(),
            nested_scopes = state.nested_scopes.len(),
            updated_at = state.updated_at.timestamp_millis(),
            "State saved"
        );
        Ok(())
    }

    /// Write a snapshot of `state` and prune beyond the retention limit.
    ///
    /// The snapshot id is `state.updated_at` in epoch millis, so snapshotting
    /// the same state twice overwrites one document.
    pub async fn snapshot(&self, path: &ScopePath, state: &ScopeState) -> Result<SnapshotInfo> {
        let id = state.updated_at.timestamp_millis().to_string();
        let key = path.backup_key(&id);
        self.backend.write(&key, &state.to_vec()?).await?;
        self.prune_snapshots(path).await?;
        Ok(SnapshotInfo {
            id,
            key,
            taken_at: Some(state.updated_at),
        })
    }

    /// Delete the oldest snapshots beyond `max_backup_versions`.
    async fn prune_snapshots(&self, path: &ScopePath) -> Result<()> {
        let snapshots = self.list_snapshots(path).await?;
        let excess = snapshots
            .len()
            .saturating_sub(self.versioning.max_backup_versions);
        for snapshot in snapshots.into_iter().take(excess) {
            self.backend.delete(&snapshot.key).await?;
            debug!(scope_path = %path, snapshot_id = %snapshot.id, "Evicted snapshot");
        }
        Ok(())
    }

    /// Snapshots of `path`, oldest first.
    pub async fn list_snapshots(&self, path: &ScopePath) -> Result<Vec<SnapshotInfo>> {
        let prefix = path.backups_prefix();
        let mut snapshots: Vec<(i64, SnapshotInfo)> = self
            .backend
            .list(&prefix)
            .await?
            .into_iter()
            .filter_map(|key| {
                let id = key.strip_prefix(&prefix)?.strip_suffix(".json")?.to_string();
                if id.contains('/') {
                    return None;
                }
                let Ok(millis) = id.parse::<i64>() else {
                    warn!(scope_path = %path, key = %key, "Ignoring snapshot with unexpected name");
                    return None;
                };
                Some((
                    millis,
                    SnapshotInfo {
                        id,
                        key,
                        taken_at: DateTime::from_timestamp_millis(millis),
                    },
                ))
            })
            .collect();
        snapshots.sort_by_key(|(millis, _)| *millis);
        Ok(snapshots.into_iter().map(|(_, info)| info).collect())
    }

    pub async fn latest_snapshot(&self, path: &ScopePath) -> Result<Option<SnapshotInfo>> {
        Ok(self.list_snapshots(path).await?.pop())
    }

    /// Read one snapshot without touching the current State.
    pub async fn load_snapshot(&self, path: &ScopePath, snapshot_id: &str) -> Result<ScopeState> {
        let key = path.backup_key(snapshot_id);
        match self.backend.read(&key).await? {
            Some(bytes) => ScopeState::from_slice(&key, &bytes),
            None => Err(ScopeError::NotFound { path: key }),
        }
    }

    /// Replace the current State at `path` with snapshot `snapshot_id`.
    ///
    /// The restored document is written through [`save`](Self::save), so its
    /// `updated_at` moves past both the snapshot and any corrupted document.
    pub async fn restore(
        &self,
        path: &ScopePath,
        snapshot_id: &str,
        lease: &Lease,
    ) -> Result<ScopeState> {
        let mut state = self.load_snapshot(path, snapshot_id).await?;
        self.save(path, &mut state, lease).await?;
        info!(
            scope_path = %path,
            snapshot_id = %snapshot_id,
            resources = state.resources.len(),
            "State restored from snapshot"
        );
        Ok(state)
    }

    /// Delete the State document at `path`. Snapshots are kept for recovery.
    pub async fn delete(&self, path: &ScopePath, lease: &Lease) -> Result<()> {
        self.locks.verify(path, lease).await?;
        self.backend.delete(&path.state_key()).await?;
        info!(scope_path = %path, "State document deleted");
        Ok(())
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }
}
