// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Inventory and health checks across several scopes.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use common::{TestContext, bucket};
use scopekeeper_core::inspector::{
    AlertKind, AlertSeverity, HealthThresholds, Monitor, MonitorConfig,
};
use scopekeeper_core::{Alert, AlertSink, FinalizeOptions, Lease, ResourceRecord, ScopePath};
use tokio::sync::Mutex;

/// myapp/prod {a, b} + nested api {handler}, myapp/staging {c}, other/dev {}.
async fn populate(ctx: &TestContext) {
    let mut prod = ctx.ready_scope("myapp", "prod").await;
    prod.add_resource("a", bucket("a")).unwrap();
    prod.add_resource("b", bucket("b")).unwrap();
    prod.register_nested_scope("api").unwrap();
    let mut api = prod.nested_scope("api").unwrap();
    api.initialize().await.unwrap();
    api.add_resource("handler", ResourceRecord::new("fn-1", "function", "handler"))
        .unwrap();
    api.finalize(FinalizeOptions::default()).await.unwrap();
    prod.finalize(FinalizeOptions::default()).await.unwrap();

    ctx.deploy("myapp", "staging", &["c"]).await;
    ctx.deploy("other", "dev", &[]).await;
}

#[tokio::test]
async fn test_list_scopes() {
    let ctx = TestContext::new();
    populate(&ctx).await;
    let inspector = ctx.engine.inspector();

    let all: Vec<String> = inspector
        .list_scopes("")
        .await
        .unwrap()
        .iter()
        .map(|p| p.to_string())
        .collect();
    assert_eq!(all, vec!["myapp/prod", "myapp/prod/api", "myapp/staging", "other/dev"]);

    let myapp = inspector.list_scopes("myapp/").await.unwrap();
    assert_eq!(myapp.len(), 3);
}

#[tokio::test]
async fn test_list_scopes_prefix_matches_whole_segments() {
    let ctx = TestContext::new();
    populate(&ctx).await;
    ctx.deploy("myapp2", "prod", &["z"]).await;
    let inspector = ctx.engine.inspector();

    let names = |scopes: Vec<ScopePath>| -> Vec<String> {
        scopes.iter().map(|p| p.to_string()).collect()
    };
    assert_eq!(
        names(inspector.list_scopes("myapp").await.unwrap()),
        vec!["myapp/prod", "myapp/prod/api", "myapp/staging"]
    );
    assert_eq!(
        names(inspector.list_scopes("myapp/prod").await.unwrap()),
        vec!["myapp/prod", "myapp/prod/api"]
    );
    assert!(inspector.list_scopes("myapp/pr").await.unwrap().is_empty());
    assert_eq!(
        names(inspector.list_scopes("myapp2").await.unwrap()),
        vec!["myapp2/prod"]
    );
}

#[tokio::test]
async fn test_inventory_stats() {
    let ctx = TestContext::new();
    populate(&ctx).await;
    let _held = ctx.ready_scope("myapp", "staging").await;

    let stats = ctx.engine.inspector().stats().await.unwrap();
    assert_eq!(stats.scopes, 4);
    assert_eq!(stats.resources, 4);
    assert_eq!(stats.nested_relations, 1);
    assert_eq!(stats.active_locks, 1);
    assert_eq!(stats.stale_locks, 0);
    assert_eq!(stats.corrupted_scopes, 0);
    assert_eq!(stats.by_type.get("bucket"), Some(&3));
    assert_eq!(stats.by_type.get("function"), Some(&1));
}

#[tokio::test]
async fn test_inspect_locked_scope() {
    let ctx = TestContext::new();
    populate(&ctx).await;
    let _held = ctx.ready_scope("myapp", "prod").await;

    let summary = ctx
        .engine
        .inspector()
        .inspect(&ScopePath::new("myapp", "prod").unwrap())
        .await
        .unwrap();
    assert_eq!(summary.path, "myapp/prod");
    assert_eq!(summary.resources, 2);
    assert_eq!(summary.nested_scopes, vec!["api"]);
    assert!(summary.updated_at.is_some());
    assert!(summary.corrupted.is_none());
    assert!(summary.snapshots > 0);
    let lock = summary.lock.expect("lock info");
    assert_eq!(lock.holder_id, "test-holder");
    assert!(!lock.expired);
}

#[tokio::test]
async fn test_raw_state_is_stored_bytes() {
    let ctx = TestContext::new();
    ctx.deploy("myapp", "prod", &["a"]).await;
    let path = ScopePath::new("myapp", "prod").unwrap();

    let raw = ctx.engine.inspector().raw_state(&path).await.unwrap();
    let stored = ctx.engine.backend().read(&path.state_key()).await.unwrap();
    assert_eq!(Some(raw), stored);

    let missing = ScopePath::new("myapp", "dev").unwrap();
    let err = ctx.engine.inspector().raw_state(&missing).await.unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");
}

async fn plant_problems(ctx: &TestContext) {
    // Crashed holder on myapp/staging
    let path = ScopePath::new("myapp", "staging").unwrap();
    let crashed = Lease {
        scope_path: path.clone(),
        holder_id: "crashed-process".to_string(),
        acquired_at: Utc::now() - ChronoDuration::hours(3),
        ttl_ms: 60_000,
    };
    ctx.engine
        .backend()
        .write(&path.lock_key(), &serde_json::to_vec(&crashed).unwrap())
        .await
        .unwrap();

    // State untouched for years
    let old = serde_json::json!({
        "schemaVersion": 1,
        "resources": {},
        "nestedScopes": [],
        "updatedAt": 1_600_000_000_000i64,
    });
    ctx.engine
        .backend()
        .write("legacy/prod/state.json", &serde_json::to_vec(&old).unwrap())
        .await
        .unwrap();

    ctx.engine
        .backend()
        .write("broken/prod/state.json", b"\x00\x01")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_health_check_finds_every_problem() {
    let ctx = TestContext::new();
    populate(&ctx).await;
    plant_problems(&ctx).await;

    let alerts = ctx
        .engine
        .inspector()
        .check_health(&HealthThresholds::default())
        .await
        .unwrap();

    let found: Vec<(AlertKind, String)> = alerts
        .iter()
        .map(|a| (a.kind, a.scope_path.clone()))
        .collect();
    assert_eq!(
        found,
        vec![
            (AlertKind::CorruptedState, "broken/prod".to_string()),
            (AlertKind::StaleLock, "myapp/staging".to_string()),
            (AlertKind::StaleState, "legacy/prod".to_string()),
        ]
    );
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    assert!(alerts[1].message.contains("crashed-process"));

    let stats = ctx.engine.inspector().stats().await.unwrap();
    assert_eq!(stats.stale_locks, 1);
    assert_eq!(stats.corrupted_scopes, 1);
}

#[tokio::test]
async fn test_healthy_inventory_has_no_alerts() {
    let ctx = TestContext::new();
    populate(&ctx).await;
    let alerts = ctx
        .engine
        .inspector()
        .check_health(&HealthThresholds::default())
        .await
        .unwrap();
    assert!(alerts.is_empty());
}

#[derive(Default)]
struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        self.alerts.lock().await.push(alert.clone());
        Ok(())
    }
}

struct FailingSink;

#[async_trait]
impl AlertSink for FailingSink {
    async fn send(&self, _alert: &Alert) -> anyhow::Result<()> {
        anyhow::bail!("webhook unreachable")
    }
}

#[tokio::test]
async fn test_monitor_run_delivers_alerts_until_shutdown() {
    let ctx = TestContext::new();
    plant_problems(&ctx).await;

    let sink = Arc::new(RecordingSink::default());
    let mut monitor = Monitor::new(
        ctx.engine.inspector(),
        MonitorConfig {
            poll_interval: Duration::from_secs(3600),
            thresholds: HealthThresholds::default(),
        },
    );
    monitor.add_sink(Arc::new(FailingSink)).add_sink(sink.clone());
    let shutdown = monitor.shutdown_handle();

    let handle = tokio::spawn(async move { monitor.run().await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.notify_one();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("monitor should stop")
        .unwrap();

    // The startup check ran once; a failing sink does not stop delivery
    assert_eq!(sink.alerts.lock().await.len(), 3);
}
