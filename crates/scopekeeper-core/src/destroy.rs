// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Destroy capabilities.
//!
//! The engine never talks to a cloud provider. The deployment program
//! registers one [`Destroyable`] per resource type, and the finalizer hands
//! each orphan's record to the capability registered for its type.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::state::ResourceRecord;

/// Performs the deletion side effect for one resource type.
#[async_trait]
pub trait Destroyable: Send + Sync {
    /// Delete the resource described by `record`.
    ///
    /// Called again on retry, so deleting an already-deleted resource should
    /// succeed.
    async fn destroy(&self, key: &str, record: &ResourceRecord) -> anyhow::Result<()>;
}

/// Destroy capabilities keyed by resource type.
#[derive(Clone, Default)]
pub struct DestroyerRegistry {
    destroyers: HashMap<String, Arc<dyn Destroyable>>,
    fallback: Option<Arc<dyn Destroyable>>,
}

impl DestroyerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the capability for `resource_type`, replacing any previous one.
    pub fn register(
        &mut self,
        resource_type: impl Into<String>,
        destroyer: Arc<dyn Destroyable>,
    ) -> &mut Self {
        self.destroyers.insert(resource_type.into(), destroyer);
        self
    }

    /// Capability used for types with no specific registration.
    pub fn set_fallback(&mut self, destroyer: Arc<dyn Destroyable>) -> &mut Self {
        self.fallback = Some(destroyer);
        self
    }

    pub fn get(&self, resource_type: &str) -> Option<Arc<dyn Destroyable>> {
        self.destroyers
            .get(resource_type)
            .or(self.fallback.as_ref())
            .cloned()
    }

    pub fn resource_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.destroyers.keys().cloned().collect();
        types.sort();
        types
    }
}

/// Destroyer that only forgets records.
///
/// Used by operator tooling to drop records of resources that were already
/// removed out of band.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordOnlyDestroyer;

#[async_trait]
impl Destroyable for RecordOnlyDestroyer {
    async fn destroy(&self, _key: &str, _record: &ResourceRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Mock destroyer for testing.
///
/// Records every call, fails for configured keys, and can simulate latency.
#[derive(Debug, Clone, Default)]
pub struct MockDestroyer {
    calls: Arc<Mutex<Vec<String>>>,
    failing_keys: Arc<Mutex<HashSet<String>>>,
    /// Keys that fail only this many times before succeeding.
    flaky_keys: Arc<Mutex<HashMap<String, u32>>>,
    /// Optional delay per call to simulate provider latency
    pub delay: Duration,
}

impl MockDestroyer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock destroyer that sleeps `delay` in every call.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Make every destroy of `key` fail.
    pub async fn fail_key(&self, key: &str) {
        self.failing_keys.lock().await.insert(key.to_string());
    }

    /// Make the next `times` destroys of `key` fail.
    pub async fn fail_key_times(&self, key: &str, times: u32) {
        self.flaky_keys.lock().await.insert(key.to_string(), times);
    }

    /// Keys destroyed (or attempted), in call order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl Destroyable for MockDestroyer {
    async fn destroy(&self, key: &str, record: &ResourceRecord) -> anyhow::Result<()> {
        self.calls.lock().await.push(key.to_string());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.failing_keys.lock().await.contains(key) {
            anyhow::bail!("mock failure destroying {} '{}'", record.resource_type, record.id);
        }

        let mut flaky = self.flaky_keys.lock().await;
        if let Some(remaining) = flaky.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                anyhow::bail!("transient mock failure destroying '{}'", record.id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_lookup() {
        let mock = Arc::new(MockDestroyer::new());
        let mut registry = DestroyerRegistry::new();
        registry.register("bucket", mock.clone());

        assert!(registry.get("bucket").is_some());
        assert!(registry.get("queue").is_none());
        assert_eq!(registry.resource_types(), vec!["bucket"]);

        registry.set_fallback(Arc::new(RecordOnlyDestroyer));
        assert!(registry.get("queue").is_some());
    }

    #[tokio::test]
    async fn test_mock_destroyer_failures() {
        let mock = MockDestroyer::new();
        mock.fail_key("bad").await;
        mock.fail_key_times("flaky", 1).await;
        let record = ResourceRecord::new("id-1", "bucket", "b");

        assert!(mock.destroy("good", &record).await.is_ok());
        assert!(mock.destroy("bad", &record).await.is_err());
        assert!(mock.destroy("flaky", &record).await.is_err());
        assert!(mock.destroy("flaky", &record).await.is_ok());
        assert_eq!(mock.calls().await, vec!["good", "bad", "flaky", "flaky"]);
    }
}
