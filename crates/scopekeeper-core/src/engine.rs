// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine: the shared services behind every scope handle.

use std::sync::Arc;

use crate::backend::{self, Backend};
use crate::config::EngineConfig;
use crate::destroy::DestroyerRegistry;
use crate::error::Result;
use crate::finalizer::Finalizer;
use crate::inspector::Inspector;
use crate::lock::LockManager;
use crate::path::ScopePath;
use crate::scope::Scope;
use crate::state::StateStore;

/// Backend, lock manager, state store and finalizer for one configuration.
///
/// Cheap to clone. Engines with different configurations can coexist in one
/// process.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    backend: Arc<dyn Backend>,
    locks: LockManager,
    store: StateStore,
    finalizer: Finalizer,
}

impl Engine {
    /// Build an engine, constructing the backend from `config.backend`.
    pub fn new(config: EngineConfig, destroyers: DestroyerRegistry) -> Result<Self> {
        let backend = backend::from_config(&config.backend, &config.backend_retry)?;
        Ok(Self::with_backend(config, backend, destroyers))
    }

    /// Build an engine over an existing backend; `config.backend` is ignored.
    pub fn with_backend(
        config: EngineConfig,
        backend: Arc<dyn Backend>,
        destroyers: DestroyerRegistry,
    ) -> Self {
        let locks = LockManager::new(backend.clone(), config.lock.holder_id.clone());
        let store = StateStore::new(backend.clone(), locks.clone(), config.versioning.clone());
        let finalizer = Finalizer::new(
            destroyers,
            config.destroy_retry.clone(),
            config.max_concurrency,
        );
        Self {
            inner: Arc::new(EngineInner {
                config,
                backend,
                locks,
                store,
                finalizer,
            }),
        }
    }

    /// Handle for the top-level scope `application/stage`.
    pub fn scope(&self, application: &str, stage: &str) -> Result<Scope> {
        Ok(self.scope_at(ScopePath::new(application, stage)?))
    }

    /// Handle for the scope at `path`.
    pub fn scope_at(&self, path: ScopePath) -> Scope {
        Scope::new(self.clone(), path)
    }

    pub fn inspector(&self) -> Inspector {
        Inspector::new(self.inner.store.clone())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub fn locks(&self) -> &LockManager {
        &self.inner.locks
    }

    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    pub fn finalizer(&self) -> &Finalizer {
        &self.inner.finalizer
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}
