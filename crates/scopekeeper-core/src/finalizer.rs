// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Orphan reconciliation.
//!
//! Orphans are the recorded resources a run did not re-declare. The
//! finalizer destroys them through their type's [`Destroyable`] under one of
//! two modes:
//!
//! - **Conservative** (default): one at a time, stop at the first failure.
//!   Orphans not yet attempted stay recorded for the next run.
//! - **Aggressive**: attempt every orphan, sequentially or with bounded
//!   parallelism per [`DestroyStrategy`], and collect all failures.
//!
//! Persisting the resulting state and recursing into nested scopes is done by
//! [`Scope::finalize`](crate::scope::Scope::finalize).
//!
//! [`Destroyable`]: crate::destroy::Destroyable

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use futures::StreamExt;
use serde::{Serialize, Serializer};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::DestroyStrategy;
use crate::destroy::DestroyerRegistry;
use crate::path::ScopePath;
use crate::retry::RetryPolicy;
use crate::state::ResourceRecord;

/// How orphan destroy failures are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalizeMode {
    /// Sequential, halt at the first failure.
    #[default]
    Conservative,
    /// Attempt everything, collect failures.
    Aggressive,
}

impl std::str::FromStr for FinalizeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "conservative" => Ok(Self::Conservative),
            "aggressive" => Ok(Self::Aggressive),
            other => Err(format!(
                "unknown strategy '{}' (expected 'conservative' or 'aggressive')",
                other
            )),
        }
    }
}

/// Options for one finalize call.
#[derive(Debug, Clone, Default)]
pub struct FinalizeOptions {
    /// Compute the report without destroying or persisting anything.
    pub dry_run: bool,
    pub mode: FinalizeMode,
    /// Keep the lease afterwards and leave the scope `Ready`.
    pub keep_lock: bool,
    /// Skip this scope's own orphans when a nested scope teardown failed.
    pub nested_failures_block_parent: bool,
    /// Abandons remaining destroys when cancelled.
    pub cancel: Option<CancellationToken>,
}

impl FinalizeOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }

    pub fn aggressive() -> Self {
        Self {
            mode: FinalizeMode::Aggressive,
            ..Self::default()
        }
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Why an orphan (or nested scope) was not cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureReason {
    DestroyFailed,
    Cancelled,
    /// A nested scope could not be torn down.
    NestedScope,
}

/// One entry of [`FinalizationReport::errors`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeFailure {
    pub scope_path: String,
    /// Resource key; empty for a nested scope failure.
    pub key: String,
    pub reason: FailureReason,
    pub message: String,
}

/// A resource destroyed (or, in a dry run, that would be destroyed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedResource {
    pub scope_path: String,
    pub key: String,
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
}

/// Result of one finalize call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizationReport {
    pub dry_run: bool,
    pub resources_deleted: usize,
    pub nested_scopes_processed: usize,
    pub deleted: Vec<DeletedResource>,
    pub errors: Vec<FinalizeFailure>,
    #[serde(rename = "durationMs", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl FinalizationReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fold a nested scope's report into this one.
    pub fn absorb(&mut self, nested: FinalizationReport) {
        self.resources_deleted += nested.resources_deleted;
        self.nested_scopes_processed += nested.nested_scopes_processed;
        self.deleted.extend(nested.deleted);
        self.errors.extend(nested.errors);
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
}

/// Outcome of destroying one scope's orphans.
#[derive(Debug, Default)]
pub(crate) struct DestroyOutcome {
    /// Keys whose resources are gone and can be dropped from the State.
    pub destroyed: Vec<String>,
    /// Conservative halt: the failure that stopped the pass.
    pub halted: Option<FinalizeFailure>,
}

enum DestroyError {
    Failed(String),
    Cancelled,
}

/// Destroys orphans through the registered capabilities.
#[derive(Clone)]
pub struct Finalizer {
    destroyers: DestroyerRegistry,
    retry: RetryPolicy,
    max_concurrency: usize,
}

impl Finalizer {
    pub fn new(destroyers: DestroyerRegistry, retry: RetryPolicy, max_concurrency: usize) -> Self {
        Self {
            destroyers,
            retry,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn destroyers(&self) -> &DestroyerRegistry {
        &self.destroyers
    }

    /// Recorded entries whose keys are not declared, in key order.
    pub fn orphans(
        recorded: &BTreeMap<String, ResourceRecord>,
        declared: &BTreeSet<String>,
    ) -> Vec<(String, ResourceRecord)> {
        recorded
            .iter()
            .filter(|(key, _)| !declared.contains(*key))
            .map(|(key, record)| (key.clone(), record.clone()))
            .collect()
    }

    /// Destroy `orphans` of `scope_path`, appending to `report`.
    pub(crate) async fn destroy_orphans(
        &self,
        scope_path: &ScopePath,
        orphans: Vec<(String, ResourceRecord)>,
        strategy: DestroyStrategy,
        options: &FinalizeOptions,
        report: &mut FinalizationReport,
    ) -> DestroyOutcome {
        let mut outcome = DestroyOutcome::default();
        if orphans.is_empty() {
            return outcome;
        }

        if options.dry_run {
            for (key, record) in orphans {
                info!(scope_path = %scope_path, key = %key, id = %record.id, "Would destroy orphan resource");
                record_deleted(scope_path, &key, &record, report);
                outcome.destroyed.push(key);
            }
            return outcome;
        }

        let cancel = options.cancel.as_ref();
        let halt_on_failure = options.mode == FinalizeMode::Conservative;
        let parallel =
            options.mode == FinalizeMode::Aggressive && strategy == DestroyStrategy::Parallel;

        if parallel {
            let mut results: Vec<(String, ResourceRecord, Result<(), DestroyError>)> =
                futures::stream::iter(orphans)
                    .map(|(key, record)| async move {
                        let result = self.destroy_one(scope_path, &key, &record, cancel).await;
                        (key, record, result)
                    })
                    .buffer_unordered(self.max_concurrency)
                    .collect()
                    .await;
            results.sort_by(|a, b| a.0.cmp(&b.0));

            for (key, record, result) in results {
                match result {
                    Ok(()) => {
                        record_deleted(scope_path, &key, &record, report);
                        outcome.destroyed.push(key);
                    }
                    Err(e) => report.errors.push(failure(scope_path, &key, e)),
                }
            }
            return outcome;
        }

        let mut pending = orphans.into_iter();
        while let Some((key, record)) = pending.next() {
            match self.destroy_one(scope_path, &key, &record, cancel).await {
                Ok(()) => {
                    record_deleted(scope_path, &key, &record, report);
                    outcome.destroyed.push(key);
                }
                Err(DestroyError::Cancelled) => {
                    report
                        .errors
                        .push(failure(scope_path, &key, DestroyError::Cancelled));
                    for (key, _) in pending.by_ref() {
                        report
                            .errors
                            .push(failure(scope_path, &key, DestroyError::Cancelled));
                    }
                    break;
                }
                Err(e) => {
                    let failed = failure(scope_path, &key, e);
                    report.errors.push(failed.clone());
                    if halt_on_failure {
                        outcome.halted = Some(failed);
                        break;
                    }
                }
            }
        }
        outcome
    }

    /// Destroy one orphan with retries, honouring cancellation.
    async fn destroy_one(
        &self,
        scope_path: &ScopePath,
        key: &str,
        record: &ResourceRecord,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), DestroyError> {
        if cancel.is_some_and(|token| token.is_cancelled()) {
            return Err(DestroyError::Cancelled);
        }

        let Some(destroyer) = self.destroyers.get(&record.resource_type) else {
            let message = format!(
                "no destroy capability registered for resource type '{}'",
                record.resource_type
            );
            error!(scope_path = %scope_path, key = %key, error = %message, "Cannot destroy orphan resource");
            return Err(DestroyError::Failed(message));
        };

        let destroyer = &destroyer;
        let attempts = self
            .retry
            .run("destroy", move || destroyer.destroy(key, record), |_| true);

        let result = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(DestroyError::Cancelled),
                result = attempts => result,
            },
            None => attempts.await,
        };

        match result {
            Ok(()) => {
                info!(
                    scope_path = %scope_path,
                    key = %key,
                    id = %record.id,
                    resource_type = %record.resource_type,
                    "Destroyed orphan resource"
                );
                Ok(())
            }
            Err(failure) => {
                error!(
                    scope_path = %scope_path,
                    key = %key,
                    id = %record.id,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "Failed to destroy orphan resource"
                );
                Err(DestroyError::Failed(format!("{:#}", failure.error)))
            }
        }
    }
}

fn record_deleted(
    scope_path: &ScopePath,
    key: &str,
    record: &ResourceRecord,
    report: &mut FinalizationReport,
) {
    report.resources_deleted += 1;
    report.deleted.push(DeletedResource {
        scope_path: scope_path.to_string(),
        key: key.to_string(),
        id: record.id.clone(),
        resource_type: record.resource_type.clone(),
    });
}

fn failure(scope_path: &ScopePath, key: &str, error: DestroyError) -> FinalizeFailure {
    let (reason, message) = match error {
        DestroyError::Failed(message) => (FailureReason::DestroyFailed, message),
        DestroyError::Cancelled => (
            FailureReason::Cancelled,
            "finalize cancelled before the resource was destroyed".to_string(),
        ),
    };
    FinalizeFailure {
        scope_path: scope_path.to_string(),
        key: key.to_string(),
        reason,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destroy::MockDestroyer;
    use std::sync::Arc;

    fn recorded(keys: &[&str]) -> BTreeMap<String, ResourceRecord> {
        keys.iter()
            .map(|k| {
                (
                    k.to_string(),
                    ResourceRecord::new(format!("{}-id", k), "bucket", *k),
                )
            })
            .collect()
    }

    fn declared(keys: &[&str]) -> BTreeSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    fn finalizer(mock: &Arc<MockDestroyer>, retry: RetryPolicy) -> Finalizer {
        let mut registry = DestroyerRegistry::new();
        registry.register("bucket", mock.clone());
        Finalizer::new(registry, retry, 4)
    }

    fn path() -> ScopePath {
        ScopePath::new("myapp", "prod").unwrap()
    }

    #[test]
    fn test_orphans_are_recorded_minus_declared() {
        let orphans = Finalizer::orphans(&recorded(&["a", "b", "c"]), &declared(&["b", "c", "d"]));
        let keys: Vec<&str> = orphans.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a"]);
    }

    #[tokio::test]
    async fn test_conservative_halts_on_first_failure() {
        let mock = Arc::new(MockDestroyer::new());
        mock.fail_key("b").await;
        let finalizer = finalizer(&mock, RetryPolicy::none());
        let mut report = FinalizationReport::new(false);

        let outcome = finalizer
            .destroy_orphans(
                &path(),
                Finalizer::orphans(&recorded(&["a", "b", "c"]), &BTreeSet::new()),
                DestroyStrategy::Sequential,
                &FinalizeOptions::default(),
                &mut report,
            )
            .await;

        assert_eq!(outcome.destroyed, vec!["a"]);
        assert_eq!(outcome.halted.unwrap().key, "b");
        assert_eq!(report.resources_deleted, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(mock.calls().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_aggressive_parallel_attempts_everything() {
        let mock = Arc::new(MockDestroyer::new());
        mock.fail_key("b").await;
        let finalizer = finalizer(&mock, RetryPolicy::none());
        let mut report = FinalizationReport::new(false);

        let outcome = finalizer
            .destroy_orphans(
                &path(),
                Finalizer::orphans(&recorded(&["a", "b", "c"]), &BTreeSet::new()),
                DestroyStrategy::Parallel,
                &FinalizeOptions::aggressive(),
                &mut report,
            )
            .await;

        assert_eq!(outcome.destroyed, vec!["a", "c"]);
        assert!(outcome.halted.is_none());
        assert_eq!(report.resources_deleted, 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].reason, FailureReason::DestroyFailed);
        assert_eq!(mock.calls().await.len(), 3);
    }

    #[tokio::test]
    async fn test_retries_before_counting_failure() {
        let mock = Arc::new(MockDestroyer::new());
        mock.fail_key_times("a", 2).await;
        let finalizer = finalizer(&mock, RetryPolicy::immediate(2));
        let mut report = FinalizationReport::new(false);

        let outcome = finalizer
            .destroy_orphans(
                &path(),
                Finalizer::orphans(&recorded(&["a"]), &BTreeSet::new()),
                DestroyStrategy::Sequential,
                &FinalizeOptions::default(),
                &mut report,
            )
            .await;

        assert_eq!(outcome.destroyed, vec!["a"]);
        assert!(report.is_success());
        assert_eq!(mock.calls().await.len(), 3);
    }

    #[tokio::test]
    async fn test_unregistered_type_fails_without_retry() {
        let mock = Arc::new(MockDestroyer::new());
        let finalizer = finalizer(&mock, RetryPolicy::immediate(3));
        let mut report = FinalizationReport::new(false);
        let mut orphans = recorded(&["q"]);
        orphans.get_mut("q").unwrap().resource_type = "queue".to_string();

        let outcome = finalizer
            .destroy_orphans(
                &path(),
                Finalizer::orphans(&orphans, &BTreeSet::new()),
                DestroyStrategy::Sequential,
                &FinalizeOptions::aggressive(),
                &mut report,
            )
            .await;

        assert!(outcome.destroyed.is_empty());
        assert!(report.errors[0].message.contains("queue"));
        assert!(mock.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_destroys_nothing() {
        let mock = Arc::new(MockDestroyer::new());
        let finalizer = finalizer(&mock, RetryPolicy::none());
        let mut report = FinalizationReport::new(true);

        let outcome = finalizer
            .destroy_orphans(
                &path(),
                Finalizer::orphans(&recorded(&["a", "b"]), &declared(&["b"])),
                DestroyStrategy::Sequential,
                &FinalizeOptions::dry_run(),
                &mut report,
            )
            .await;

        assert_eq!(outcome.destroyed, vec!["a"]);
        assert_eq!(report.resources_deleted, 1);
        assert!(mock.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_marks_all_cancelled() {
        let mock = Arc::new(MockDestroyer::new());
        let finalizer = finalizer(&mock, RetryPolicy::none());
        let token = CancellationToken::new();
        token.cancel();
        let mut report = FinalizationReport::new(false);

        let outcome = finalizer
            .destroy_orphans(
                &path(),
                Finalizer::orphans(&recorded(&["a", "b", "c"]), &BTreeSet::new()),
                DestroyStrategy::Parallel,
                &FinalizeOptions::aggressive().with_cancel(token),
                &mut report,
            )
            .await;

        assert!(outcome.destroyed.is_empty());
        assert_eq!(report.errors.len(), 3);
        assert!(
            report
                .errors
                .iter()
                .all(|e| e.reason == FailureReason::Cancelled)
        );
        assert!(mock.calls().await.is_empty());
    }

    #[test]
    fn test_report_json_shape() {
        let mut report = FinalizationReport::new(true);
        report.duration = Duration::from_millis(42);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["dryRun"], true);
        assert_eq!(value["resourcesDeleted"], 0);
        assert_eq!(value["nestedScopesProcessed"], 0);
        assert_eq!(value["durationMs"], 42);
    }

    #[test]
    fn test_finalize_mode_parse() {
        assert_eq!(
            "Aggressive".parse::<FinalizeMode>().unwrap(),
            FinalizeMode::Aggressive
        );
        assert!("yolo".parse::<FinalizeMode>().is_err());
    }
}
