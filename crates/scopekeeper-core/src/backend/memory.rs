// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory backend for testing and embedding.
//!
//! Supports fault injection so that retry, fallback and recovery paths can
//! be exercised without a network.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Backend, validate_key};
use crate::error::{Result, ScopeError};

/// In-memory backend.
///
/// Clones share the same underlying map and fault switches.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    /// When set, every operation fails with `BackendUnavailable`.
    unavailable: Arc<AtomicBool>,
    /// Number of upcoming operations that fail with `BackendUnavailable`.
    transient_failures: Arc<AtomicU32>,
    /// Number of operations attempted, including failed ones.
    operations: Arc<AtomicU32>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `count` operations with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Number of operations attempted so far.
    pub fn operation_count(&self) -> u32 {
        self.operations.load(Ordering::SeqCst)
    }

    /// Snapshot of all stored keys.
    pub async fn keys(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }

    fn check_fault(&self, operation: &str, key: &str) -> Result<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected || self.unavailable.load(Ordering::SeqCst) {
            return Err(ScopeError::BackendUnavailable {
                operation: operation.to_string(),
                path: key.to_string(),
                attempts: 1,
                details: "memory backend unavailable (injected)".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        self.check_fault("read", key)?;
        Ok(self.objects.lock().await.get(key).cloned())
    }

    async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.check_fault("write", key)?;
        self.objects
            .lock()
            .await
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn write_if_absent(&self, key: &str, data: &[u8]) -> Result<bool> {
        validate_key(key)?;
        self.check_fault("write_if_absent", key)?;
        let mut objects = self.objects.lock().await;
        if objects.contains_key(key) {
            return Ok(false);
        }
        objects.insert(key.to_string(), data.to_vec());
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.check_fault("delete", key)?;
        self.objects.lock().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.check_fault("list", prefix)?;
        Ok(self
            .objects
            .lock()
            .await
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_operations() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.read("a/b/state.json").await.unwrap(), None);

        backend.write("a/b/state.json", b"1").await.unwrap();
        backend.write("a/c/state.json", b"2").await.unwrap();
        backend.write("b/c/state.json", b"3").await.unwrap();

        assert_eq!(
            backend.list("a/").await.unwrap(),
            vec!["a/b/state.json", "a/c/state.json"]
        );

        backend.delete("a/b/state.json").await.unwrap();
        backend.delete("a/b/state.json").await.unwrap();
        assert_eq!(backend.keys().await, vec!["a/c/state.json", "b/c/state.json"]);
    }

    #[tokio::test]
    async fn test_write_if_absent() {
        let backend = MemoryBackend::new();
        assert!(backend.write_if_absent("a/b/.lock", b"x").await.unwrap());
        assert!(!backend.write_if_absent("a/b/.lock", b"y").await.unwrap());
        assert_eq!(backend.read("a/b/.lock").await.unwrap(), Some(b"x".to_vec()));
    }

    #[tokio::test]
    async fn test_fail_next_is_consumed() {
        let backend = MemoryBackend::new();
        backend.fail_next(2);

        assert!(backend.read("a/b/state.json").await.is_err());
        assert!(backend.read("a/b/state.json").await.is_err());
        assert!(backend.read("a/b/state.json").await.is_ok());
        assert_eq!(backend.operation_count(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_switch() {
        let backend = MemoryBackend::new();
        backend.set_unavailable(true);
        let err = backend.write("a/b/state.json", b"1").await.unwrap_err();
        assert_eq!(err.error_code(), "BACKEND_UNAVAILABLE");

        backend.set_unavailable(false);
        backend.write("a/b/state.json", b"1").await.unwrap();
    }

    #[tokio::test]
    async fn test_clones_share_storage() {
        let backend = MemoryBackend::new();
        let clone = backend.clone();
        clone.write("a/b/state.json", b"1").await.unwrap();
        assert!(backend.read("a/b/state.json").await.unwrap().is_some());
    }
}
