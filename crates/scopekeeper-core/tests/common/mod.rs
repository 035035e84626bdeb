// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for scopekeeper-core integration tests.
//!
//! Provides TestContext: an engine over an in-memory or temp-dir backend with
//! a MockDestroyer registered for every resource type the tests use.

#![allow(dead_code)]

use std::sync::Arc;

use scopekeeper_core::backend::{Backend, LocalBackend, MemoryBackend};
use scopekeeper_core::config::EngineConfig;
use scopekeeper_core::retry::RetryPolicy;
use scopekeeper_core::{DestroyerRegistry, Engine, MockDestroyer, ResourceRecord, Scope};

pub const RESOURCE_TYPES: &[&str] = &["bucket", "queue", "function"];

/// Engine, backend handle and destroyer shared by one test.
pub struct TestContext {
    pub engine: Engine,
    pub memory: MemoryBackend,
    pub destroyer: MockDestroyer,
    _temp_dir: Option<tempfile::TempDir>,
}

/// Config with immediate retries so failure tests stay fast.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.destroy_retry = RetryPolicy::immediate(1);
    config.lock.holder_id = Some("test-holder".to_string());
    config
}

pub fn registry(destroyer: &MockDestroyer) -> DestroyerRegistry {
    let mut registry = DestroyerRegistry::new();
    for resource_type in RESOURCE_TYPES {
        registry.register(*resource_type, Arc::new(destroyer.clone()));
    }
    registry
}

impl TestContext {
    /// Context over an in-memory backend.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let memory = MemoryBackend::new();
        let destroyer = MockDestroyer::new();
        let backend: Arc<dyn Backend> = Arc::new(memory.clone());
        let engine = Engine::with_backend(config, backend, registry(&destroyer));
        Self {
            engine,
            memory,
            destroyer,
            _temp_dir: None,
        }
    }

    /// Context over a local directory backend in a fresh temp dir.
    pub fn local() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let destroyer = MockDestroyer::new();
        let backend: Arc<dyn Backend> = Arc::new(LocalBackend::new(temp_dir.path()));
        let engine = Engine::with_backend(test_config(), backend, registry(&destroyer));
        Self {
            engine,
            memory: MemoryBackend::new(),
            destroyer,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Another engine (another "process") sharing this context's backend.
    pub fn second_engine(&self, holder_id: &str) -> Engine {
        let mut config = test_config();
        config.lock.holder_id = Some(holder_id.to_string());
        Engine::with_backend(
            config,
            self.engine.backend().clone(),
            registry(&self.destroyer),
        )
    }

    /// Initialized scope `app/stage`.
    pub async fn ready_scope(&self, app: &str, stage: &str) -> Scope {
        let mut scope = self.engine.scope(app, stage).expect("valid scope path");
        scope.initialize().await.expect("initialize");
        scope
    }

    /// Run one deployment of `app/stage` declaring `keys` and finalize it.
    pub async fn deploy(&self, app: &str, stage: &str, keys: &[&str]) {
        let mut scope = self.ready_scope(app, stage).await;
        for key in keys {
            scope
                .add_resource(*key, bucket(key))
                .expect("declare resource");
        }
        scope
            .finalize(Default::default())
            .await
            .expect("finalize deployment");
    }
}

/// Bucket record whose id is derived from the key.
pub fn bucket(key: &str) -> ResourceRecord {
    ResourceRecord::new(format!("bkt-{}", key), "bucket", key)
}
