// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scope handles.
//!
//! A [`Scope`] is the in-memory handle one deployment run uses for one scope
//! path. Lifecycle:
//!
//! ```text
//! Uninitialized ──initialize()──▶ Initializing ──▶ Ready ──finalize()──▶ Finalizing ──▶ Released
//!                                                    ▲                        │
//!                                                    └──── keep_lock ─────────┘
//! ```
//!
//! Only `initialize`, `save`, `recover` and `finalize` touch the backend.
//! Resource declarations are batched in memory and written at those
//! boundaries. A parent never holds child scope objects; it records child
//! names and builds a fresh handle on demand.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::DestroyStrategy;
use crate::engine::Engine;
use crate::error::{Result, ScopeError};
use crate::finalizer::{
    DestroyOutcome, FailureReason, FinalizationReport, FinalizeFailure, FinalizeOptions, Finalizer,
};
use crate::lock::Lease;
use crate::path::ScopePath;
use crate::state::{ResourceRecord, ScopeState, now_millis};

/// Lifecycle state of a [`Scope`] handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeStatus {
    Uninitialized,
    Initializing,
    Ready,
    Finalizing,
    Released,
}

impl fmt::Display for ScopeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Finalizing => "finalizing",
            Self::Released => "released",
        };
        write!(f, "{}", s)
    }
}

/// In-memory statistics of a ready scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeStats {
    /// Records currently in the in-memory State.
    pub resources: usize,
    pub nested_scopes: usize,
    /// Keys declared during this run.
    pub declared: usize,
    /// Recorded keys not (yet) declared this run.
    pub pending_orphans: usize,
    pub by_type: BTreeMap<String, usize>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

/// Handle bound to one scope path for the duration of a run.
#[derive(Debug)]
pub struct Scope {
    engine: Engine,
    path: ScopePath,
    destroy_strategy: DestroyStrategy,
    status: ScopeStatus,
    lease: Option<Lease>,
    state: ScopeState,
    /// Resources recorded when the scope was initialized.
    recorded: BTreeMap<String, ResourceRecord>,
    recorded_nested: BTreeSet<String>,
    declared: BTreeSet<String>,
    declared_nested: BTreeSet<String>,
}

impl Scope {
    pub(crate) fn new(engine: Engine, path: ScopePath) -> Self {
        let destroy_strategy = engine.config().destroy_strategy;
        Self {
            engine,
            path,
            destroy_strategy,
            status: ScopeStatus::Uninitialized,
            lease: None,
            state: ScopeState::empty(),
            recorded: BTreeMap::new(),
            recorded_nested: BTreeSet::new(),
            declared: BTreeSet::new(),
            declared_nested: BTreeSet::new(),
        }
    }

    /// Override the engine's default destroy strategy for this scope.
    pub fn with_destroy_strategy(mut self, strategy: DestroyStrategy) -> Self {
        self.destroy_strategy = strategy;
        self
    }

    pub fn path(&self) -> &ScopePath {
        &self.path
    }

    /// Application identifier.
    pub fn name(&self) -> &str {
        self.path.application()
    }

    /// Environment identifier, e.g. `prod` or `pr-123`.
    pub fn stage(&self) -> &str {
        self.path.stage()
    }

    pub fn status(&self) -> ScopeStatus {
        self.status
    }

    pub fn destroy_strategy(&self) -> DestroyStrategy {
        self.destroy_strategy
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    /// Acquire the lease and load the State, creating it on first use.
    ///
    /// Calling it on a ready scope is a no-op. A corrupted State is returned
    /// as [`ScopeError::Corrupted`] and the lease is released again; use
    /// [`recover`](Self::recover) to restore a snapshot.
    #[instrument(skip(self), fields(scope_path = %self.path))]
    pub async fn initialize(&mut self) -> Result<()> {
        match self.status {
            ScopeStatus::Ready => return Ok(()),
            ScopeStatus::Uninitialized | ScopeStatus::Released => {}
            _ => return Err(self.invalid_state("uninitialized")),
        }

        self.status = ScopeStatus::Initializing;
        let ttl = self.engine.config().lock.ttl;
        let lease = match self.engine.locks().acquire(&self.path, ttl).await {
            Ok(lease) => lease,
            Err(e) => {
                self.status = ScopeStatus::Uninitialized;
                return Err(e);
            }
        };

        let state = match self.engine.store().load(&self.path).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                let mut state = ScopeState::empty();
                if let Err(e) = self.engine.store().save(&self.path, &mut state, &lease).await {
                    self.abort_initialize(&lease).await;
                    return Err(e);
                }
                info!("Created scope state");
                state
            }
            Err(e) => {
                self.abort_initialize(&lease).await;
                return Err(e);
            }
        };

        self.enter_ready(Some(lease), state);
        Ok(())
    }

    /// Open the scope read-only: load the State without taking the lease.
    ///
    /// Only dry-run finalization is possible on a detached scope.
    pub(crate) async fn open_detached(&mut self) -> Result<()> {
        let state = self.engine.store().load(&self.path).await?.unwrap_or_default();
        self.enter_ready(None, state);
        Ok(())
    }

    /// Restore snapshot `snapshot_id` as the current State and become ready.
    ///
    /// Operator recovery for a scope whose State is corrupted.
    #[instrument(skip(self), fields(scope_path = %self.path))]
    pub async fn recover(&mut self, snapshot_id: &str) -> Result<()> {
        match self.status {
            ScopeStatus::Uninitialized | ScopeStatus::Released => {}
            _ => return Err(self.invalid_state("uninitialized")),
        }

        self.status = ScopeStatus::Initializing;
        let ttl = self.engine.config().lock.ttl;
        let lease = match self.engine.locks().acquire(&self.path, ttl).await {
            Ok(lease) => lease,
            Err(e) => {
                self.status = ScopeStatus::Uninitialized;
                return Err(e);
            }
        };

        warn!(snapshot_id = %snapshot_id, "Recovering scope from snapshot");
        match self
            .engine
            .store()
            .restore(&self.path, snapshot_id, &lease)
            .await
        {
            Ok(state) => {
                self.enter_ready(Some(lease), state);
                Ok(())
            }
            Err(e) => {
                self.abort_initialize(&lease).await;
                Err(e)
            }
        }
    }

    /// Declare `record` under `key` for this run (upsert).
    ///
    /// Nothing is persisted until [`save`](Self::save) or
    /// [`finalize`](Self::finalize).
    pub fn add_resource(&mut self, key: impl Into<String>, mut record: ResourceRecord) -> Result<()> {
        self.require_ready()?;
        let key = key.into();
        if key.is_empty() {
            return Err(ScopeError::InvalidPath {
                path: key,
                reason: "resource key is empty".to_string(),
            });
        }

        if let Some(existing_key) = self.state.key_for_id(&record.id) {
            if existing_key != key {
                return Err(ScopeError::DuplicateResourceId {
                    key,
                    id: record.id,
                    existing_key: existing_key.to_string(),
                });
            }
        }

        if let Some(existing) = self.state.resources.get(&key) {
            if existing.id == record.id {
                record.created_at = existing.created_at;
            }
            record.updated_at = now_millis();
        }

        debug!(scope_path = %self.path, key = %key, id = %record.id, "Resource declared");
        self.state.resources.insert(key.clone(), record);
        self.declared.insert(key);
        Ok(())
    }

    /// Un-declare `key` for this run.
    ///
    /// A key recorded by a previous run stays recorded and becomes an orphan.
    /// Returns the record declared in this run, if any.
    pub fn remove_resource(&mut self, key: &str) -> Result<Option<ResourceRecord>> {
        self.require_ready()?;
        if !self.declared.remove(key) {
            return Ok(None);
        }
        let declared = match self.recorded.get(key) {
            Some(previous) => self.state.resources.insert(key.to_string(), previous.clone()),
            None => self.state.resources.remove(key),
        };
        Ok(declared)
    }

    pub fn get_resources(&self) -> Result<&BTreeMap<String, ResourceRecord>> {
        self.require_ready()?;
        Ok(&self.state.resources)
    }

    pub fn get_resource(&self, key: &str) -> Result<Option<&ResourceRecord>> {
        self.require_ready()?;
        Ok(self.state.resources.get(key))
    }

    pub fn nested_scopes(&self) -> Result<&BTreeSet<String>> {
        self.require_ready()?;
        Ok(&self.state.nested_scopes)
    }

    pub fn get_stats(&self) -> Result<ScopeStats> {
        self.require_ready()?;
        let mut by_type = BTreeMap::new();
        for record in self.state.resources.values() {
            *by_type.entry(record.resource_type.clone()).or_insert(0) += 1;
        }
        Ok(ScopeStats {
            resources: self.state.resources.len(),
            nested_scopes: self.state.nested_scopes.len(),
            declared: self.declared.len(),
            pending_orphans: self
                .recorded
                .keys()
                .filter(|key| !self.declared.contains(*key))
                .count(),
            by_type,
            updated_at: self.state.updated_at,
        })
    }

    /// Record nested scope `name` (set semantics) and return its path.
    pub fn register_nested_scope(&mut self, name: &str) -> Result<ScopePath> {
        self.require_ready()?;
        let child = self.path.child(name)?;
        self.state.nested_scopes.insert(name.to_string());
        self.declared_nested.insert(name.to_string());
        Ok(child)
    }

    /// Fresh, uninitialized handle for nested scope `name`.
    pub fn nested_scope(&self, name: &str) -> Result<Scope> {
        Ok(self
            .engine
            .scope_at(self.path.child(name)?)
            .with_destroy_strategy(self.destroy_strategy))
    }

    /// Persist the in-memory State now. The finalize baseline is unchanged.
    #[instrument(skip(self), fields(scope_path = %self.path))]
    pub async fn save(&mut self) -> Result<()> {
        self.require_ready()?;
        let lease = self.held_lease()?;
        self.engine
            .store()
            .save(&self.path, &mut self.state, &lease)
            .await
    }

    /// Abandon the run without finalizing and release the lease.
    pub async fn release(&mut self) -> Result<()> {
        match self.status {
            ScopeStatus::Released => return Ok(()),
            ScopeStatus::Ready => {}
            _ => return Err(self.invalid_state("ready")),
        }
        if let Some(lease) = self.lease.take() {
            self.engine.locks().release(&lease).await?;
        }
        self.status = ScopeStatus::Released;
        Ok(())
    }

    /// Reconcile: destroy recorded resources this run did not declare.
    ///
    /// Orphan nested scopes are torn down first, depth-first. The resulting
    /// State is persisted (unless `dry_run`) and the lease released (unless
    /// `keep_lock`). A conservative run halted by a destroy failure persists
    /// its progress, then returns [`ScopeError::DestroyFailed`] carrying the
    /// partial report.
    #[instrument(
        skip(self, options),
        fields(scope_path = %self.path, dry_run = options.dry_run, mode = ?options.mode)
    )]
    pub async fn finalize(&mut self, options: FinalizeOptions) -> Result<FinalizationReport> {
        self.require_ready()?;
        let lease = if options.dry_run {
            None
        } else {
            Some(self.held_lease()?)
        };

        self.status = ScopeStatus::Finalizing;
        self.verify_lease(lease.as_ref()).await?;
        let started = Instant::now();
        let mut report = FinalizationReport::new(options.dry_run);

        let orphan_nested: Vec<String> = self
            .recorded_nested
            .difference(&self.declared_nested)
            .cloned()
            .collect();
        let mut nested_failed = false;
        for name in orphan_nested {
            if self.teardown_nested(&name, &options, &mut report).await {
                if !options.dry_run {
                    self.state.nested_scopes.remove(&name);
                }
            } else {
                nested_failed = true;
            }
        }

        let outcome = if nested_failed && options.nested_failures_block_parent {
            warn!("Nested scope teardown failed, leaving this scope's orphans in place");
            DestroyOutcome::default()
        } else {
            self.verify_lease(lease.as_ref()).await?;
            let orphans = Finalizer::orphans(&self.recorded, &self.declared);
            self.engine
                .finalizer()
                .destroy_orphans(
                    &self.path,
                    orphans,
                    self.destroy_strategy,
                    &options,
                    &mut report,
                )
                .await
        };

        if let Some(lease) = &lease {
            for key in &outcome.destroyed {
                self.state.resources.remove(key);
            }
            if let Err(e) = self
                .engine
                .store()
                .save(&self.path, &mut self.state, lease)
                .await
            {
                self.status = ScopeStatus::Ready;
                return Err(e);
            }
            self.recorded = self.state.resources.clone();
            self.recorded_nested = self.state.nested_scopes.clone();
        }

        report.duration = started.elapsed();
        info!(
            resources_deleted = report.resources_deleted,
            nested_scopes_processed = report.nested_scopes_processed,
            errors = report.errors.len(),
            duration_ms = report.duration.as_millis() as u64,
            "Finalize complete"
        );

        if options.keep_lock {
            self.status = ScopeStatus::Ready;
        } else {
            self.release_quietly().await;
            self.status = ScopeStatus::Released;
        }

        match outcome.halted {
            Some(failure) => Err(ScopeError::DestroyFailed {
                scope_path: failure.scope_path,
                key: failure.key,
                cause: failure.message,
                report: Some(Box::new(report)),
            }),
            None => Ok(report),
        }
    }

    /// Fail before any destroy when the lease was lost mid-run.
    async fn verify_lease(&mut self, lease: Option<&Lease>) -> Result<()> {
        let Some(lease) = lease else {
            return Ok(());
        };
        if let Err(e) = self.engine.locks().verify(&self.path, lease).await {
            warn!(error = %e, "Lease lost before finalize could destroy anything");
            self.status = ScopeStatus::Ready;
            return Err(e);
        }
        Ok(())
    }

    // Named boxed future breaks the finalize -> teardown_nested type cycle.
    fn finalize_boxed(
        &mut self,
        options: FinalizeOptions,
    ) -> BoxFuture<'_, Result<FinalizationReport>> {
        Box::pin(self.finalize(options))
    }

    /// Tear down orphan nested scope `name` and everything below it.
    ///
    /// Returns `true` when it is gone (or, in a dry run, would be gone).
    async fn teardown_nested(
        &self,
        name: &str,
        options: &FinalizeOptions,
        report: &mut FinalizationReport,
    ) -> bool {
        let mut child = match self.nested_scope(name) {
            Ok(child) => child,
            Err(e) => {
                report
                    .errors
                    .push(nested_failure(&self.path.to_string(), name, &e));
                return false;
            }
        };
        let child_path = child.path().to_string();

        let opened = if options.dry_run {
            child.open_detached().await
        } else {
            child.initialize().await
        };
        if let Err(e) = opened {
            warn!(nested_scope = %child_path, error = %e, "Cannot open orphan nested scope");
            report.errors.push(nested_failure(&child_path, "", &e));
            return false;
        }

        let child_options = FinalizeOptions {
            keep_lock: true,
            ..options.clone()
        };
        let complete = match child.finalize_boxed(child_options).await {
            Ok(child_report) => {
                let complete = child_report.is_success();
                report.absorb(child_report);
                complete
            }
            Err(e) => {
                match e.report() {
                    Some(partial) if !partial.errors.is_empty() => {
                        report.absorb(partial.clone());
                    }
                    Some(partial) => {
                        report.absorb(partial.clone());
                        report.errors.push(nested_failure(&child_path, "", &e));
                    }
                    None => report.errors.push(nested_failure(&child_path, "", &e)),
                }
                false
            }
        };

        if complete && !options.dry_run {
            if let Err(e) = child.discard().await {
                report.errors.push(nested_failure(&child_path, "", &e));
                child.release_quietly().await;
                return false;
            }
        }
        child.release_quietly().await;

        if complete {
            report.nested_scopes_processed += 1;
            info!(nested_scope = %child_path, dry_run = options.dry_run, "Orphan nested scope torn down");
        }
        complete
    }

    /// Delete this scope's (now empty) State document.
    async fn discard(&mut self) -> Result<()> {
        let lease = self.held_lease()?;
        if !self.state.is_empty() {
            return Err(self.invalid_state("empty"));
        }
        self.engine.store().delete(&self.path, &lease).await
    }

    fn enter_ready(&mut self, lease: Option<Lease>, state: ScopeState) {
        self.recorded = state.resources.clone();
        self.recorded_nested = state.nested_scopes.clone();
        self.declared.clear();
        self.declared_nested.clear();
        self.state = state;
        self.lease = lease;
        self.status = ScopeStatus::Ready;
        debug!(
            scope_path = %self.path,
            resources = self.recorded.len(),
            nested_scopes = self.recorded_nested.len(),
            "Scope ready"
        );
    }

    async fn abort_initialize(&mut self, lease: &Lease) {
        if let Err(e) = self.engine.locks().release(lease).await {
            warn!(scope_path = %self.path, error = %e, "Failed to release lease after failed initialize");
        }
        self.lease = None;
        self.status = ScopeStatus::Uninitialized;
    }

    /// Release the lease if held; failures are logged; the TTL reclaims it.
    async fn release_quietly(&mut self) {
        if let Some(lease) = self.lease.take() {
            if let Err(e) = self.engine.locks().release(&lease).await {
                warn!(scope_path = %self.path, error = %e, "Failed to release lease");
            }
        }
    }

    fn held_lease(&self) -> Result<Lease> {
        self.lease.clone().ok_or_else(|| ScopeError::LeaseNotHeld {
            scope_path: self.path.to_string(),
            reason: "scope was opened without a lease".to_string(),
        })
    }

    fn require_ready(&self) -> Result<()> {
        if self.status == ScopeStatus::Ready {
            Ok(())
        } else {
            Err(self.invalid_state("ready"))
        }
    }

    fn invalid_state(&self, expected: &str) -> ScopeError {
        ScopeError::InvalidState {
            scope_path: self.path.to_string(),
            expected: expected.to_string(),
            actual: self.status.to_string(),
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if let Some(lease) = &self.lease {
            warn!(
                scope_path = %self.path,
                holder_id = %lease.holder_id,
                expires_at = %lease.expires_at(),
                "Scope dropped while holding its lease"
            );
        }
    }
}

fn nested_failure(scope_path: &str, key: &str, error: &ScopeError) -> FinalizeFailure {
    FinalizeFailure {
        scope_path: scope_path.to_string(),
        key: key.to_string(),
        reason: FailureReason::NestedScope,
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, MemoryBackend};
    use crate::config::EngineConfig;
    use crate::destroy::{DestroyerRegistry, MockDestroyer};
    use crate::retry::RetryPolicy;
    use std::sync::Arc;

    fn engine() -> (MemoryBackend, Arc<MockDestroyer>, Engine) {
        let backend = MemoryBackend::new();
        let mock = Arc::new(MockDestroyer::new());
        let mut destroyers = DestroyerRegistry::new();
        destroyers.register("bucket", mock.clone());
        let config = EngineConfig {
            destroy_retry: RetryPolicy::none(),
            ..EngineConfig::default()
        };
        let engine = Engine::with_backend(config, Arc::new(backend.clone()), destroyers);
        (backend, mock, engine)
    }

    fn bucket(id: &str) -> ResourceRecord {
        ResourceRecord::new(id, "bucket", id)
    }

    #[tokio::test]
    async fn test_operations_require_ready() {
        let (_backend, _mock, engine) = engine();
        let mut scope = engine.scope("myapp", "prod").unwrap();

        let err = scope.add_resource("a", bucket("a-1")).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STATE");
        assert!(scope.get_resources().is_err());
        assert!(scope.get_stats().is_err());
        assert!(scope.register_nested_scope("api").is_err());
        assert!(scope.finalize(FinalizeOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_initialize_creates_state_and_is_idempotent() {
        let (backend, _mock, engine) = engine();
        let mut scope = engine.scope("myapp", "prod").unwrap();

        scope.initialize().await.unwrap();
        assert_eq!(scope.status(), ScopeStatus::Ready);
        assert!(backend.read("myapp/prod/state.json").await.unwrap().is_some());

        scope.add_resource("a", bucket("a-1")).unwrap();
        scope.initialize().await.unwrap();
        assert_eq!(scope.get_resources().unwrap().len(), 1);

        scope.release().await.unwrap();
        assert_eq!(scope.status(), ScopeStatus::Released);
    }

    #[tokio::test]
    async fn test_add_resource_upserts_and_rejects_duplicate_ids() {
        let (_backend, _mock, engine) = engine();
        let mut scope = engine.scope("myapp", "prod").unwrap();
        scope.initialize().await.unwrap();

        scope.add_resource("a", bucket("a-1")).unwrap();
        let created = scope.get_resource("a").unwrap().unwrap().created_at;
        scope.add_resource("a", bucket("a-1")).unwrap();
        assert_eq!(scope.get_resource("a").unwrap().unwrap().created_at, created);

        let err = scope.add_resource("b", bucket("a-1")).unwrap_err();
        match err {
            ScopeError::DuplicateResourceId { existing_key, .. } => assert_eq!(existing_key, "a"),
            other => panic!("expected DuplicateResourceId, got {:?}", other),
        }
        scope.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_register_nested_scope_has_set_semantics() {
        let (_backend, _mock, engine) = engine();
        let mut scope = engine.scope("myapp", "pr-7").unwrap();
        scope.initialize().await.unwrap();

        let child = scope.register_nested_scope("workers").unwrap();
        scope.register_nested_scope("workers").unwrap();

        assert_eq!(child.to_string(), "myapp/pr-7/workers");
        assert_eq!(scope.nested_scopes().unwrap().len(), 1);
        assert!(scope.register_nested_scope("../x").is_err());
        scope.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_resource_turns_recorded_key_into_orphan() {
        let (_backend, mock, engine) = engine();

        let mut first = engine.scope("myapp", "prod").unwrap();
        first.initialize().await.unwrap();
        first.add_resource("a", bucket("a-1")).unwrap();
        first.finalize(FinalizeOptions::default()).await.unwrap();

        let mut second = engine.scope("myapp", "prod").unwrap();
        second.initialize().await.unwrap();
        second.add_resource("a", bucket("a-1")).unwrap();
        assert_eq!(second.get_stats().unwrap().pending_orphans, 0);

        let removed = second.remove_resource("a").unwrap();
        assert!(removed.is_some());
        assert_eq!(second.get_stats().unwrap().pending_orphans, 1);
        // Still recorded until finalize destroys it.
        assert!(second.get_resource("a").unwrap().is_some());

        let report = second.finalize(FinalizeOptions::default()).await.unwrap();
        assert_eq!(report.resources_deleted, 1);
        assert_eq!(mock.calls().await, vec!["a"]);
    }

    #[tokio::test]
    async fn test_finalize_keep_lock_stays_ready() {
        let (backend, _mock, engine) = engine();
        let mut scope = engine.scope("myapp", "prod").unwrap();
        scope.initialize().await.unwrap();
        scope.add_resource("a", bucket("a-1")).unwrap();

        let options = FinalizeOptions {
            keep_lock: true,
            ..FinalizeOptions::default()
        };
        scope.finalize(options).await.unwrap();

        assert_eq!(scope.status(), ScopeStatus::Ready);
        assert!(backend.read("myapp/prod/.lock").await.unwrap().is_some());

        scope.finalize(FinalizeOptions::default()).await.unwrap();
        assert_eq!(scope.status(), ScopeStatus::Released);
        assert!(backend.read("myapp/prod/.lock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats_by_type() {
        let (_backend, _mock, engine) = engine();
        let mut scope = engine.scope("myapp", "prod").unwrap();
        scope.initialize().await.unwrap();
        scope.add_resource("a", bucket("a-1")).unwrap();
        scope.add_resource("b", bucket("b-1")).unwrap();
        scope
            .add_resource("q", ResourceRecord::new("q-1", "queue", "jobs"))
            .unwrap();

        let stats = scope.get_stats().unwrap();
        assert_eq!(stats.resources, 3);
        assert_eq!(stats.declared, 3);
        assert_eq!(stats.by_type.get("bucket"), Some(&2));
        assert_eq!(stats.by_type.get("queue"), Some(&1));
        scope.release().await.unwrap();
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ScopeStatus::Uninitialized.to_string(), "uninitialized");
        assert_eq!(ScopeStatus::Finalizing.to_string(), "finalizing");
    }
}
