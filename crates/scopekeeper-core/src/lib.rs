// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scopekeeper Core - Scope & Resource Lifecycle Engine
//!
//! This crate tracks which cloud resources a deployment program created, per
//! named scope, and reconciles them on the next run: resources recorded in a
//! previous run but not declared in the current one are orphans, and the
//! finalizer destroys them through capabilities registered by the caller.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Deployment program                               │
//! │           (declares resources, registers Destroyable per type)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌───────────────────────┐    ┌───────────────────────┐    ┌──────────────┐
//! │        Scope          │───►│      Finalizer        │───►│ Destroyable  │
//! │  declare / record     │    │  orphans, retry,      │    │  per type    │
//! │  nested scopes        │    │  sequential/parallel  │    └──────────────┘
//! └───────────────────────┘    └───────────────────────┘
//!           │
//!           ▼
//! ┌───────────────────────┐    ┌───────────────────────┐
//! │      StateStore       │───►│     LockManager       │
//! │  state.json, .backups │    │  .lock leases w/ TTL  │
//! └───────────────────────┘    └───────────────────────┘
//!           │
//!           ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │             Backend: Local | Remote (HTTP) | Composite | Memory          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Storage layout
//!
//! | Key | Content |
//! |-----|---------|
//! | `<app>/<stage>/state.json` | State document of the top-level scope |
//! | `<app>/<stage>/<nested>/state.json` | State document of a nested scope |
//! | `<scope>/.lock` | Lease marker while a process owns the scope |
//! | `<scope>/.backups/<millis>.json` | Snapshot of a committed state |
//!
//! # Lifecycle
//!
//! 1. [`Engine::scope`] returns an uninitialized [`Scope`] handle
//! 2. [`Scope::initialize`] acquires the lease and loads the previous state
//! 3. The program declares resources with [`Scope::add_resource`]
//! 4. [`Scope::finalize`] destroys orphans, saves, and releases the lease
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use scopekeeper_core::{
//!     DestroyerRegistry, Engine, EngineConfig, FinalizeOptions, MockDestroyer, ResourceRecord,
//! };
//!
//! # async fn run() -> scopekeeper_core::Result<()> {
//! let mut destroyers = DestroyerRegistry::new();
//! destroyers.register("bucket", Arc::new(MockDestroyer::new()));
//!
//! let engine = Engine::new(EngineConfig::local("/var/lib/deploy"), destroyers)?;
//! let mut scope = engine.scope("myapp", "prod")?;
//! scope.initialize().await?;
//! scope.add_resource("assets", ResourceRecord::new("bkt-1", "bucket", "assets"))?;
//! let report = scope.finalize(FinalizeOptions::default()).await?;
//! println!("deleted {} orphans", report.resources_deleted);
//! # Ok(())
//! # }
//! ```

/// Storage backends: local directory, HTTP object store, composite, memory.
pub mod backend;

/// Engine configuration loaded from code or environment variables.
pub mod config;

/// Destroy capabilities registered per resource type.
pub mod destroy;

/// Shared services behind every scope handle.
pub mod engine;

/// Error types with stable error codes.
pub mod error;

/// Orphan detection and destruction.
pub mod finalizer;

/// Read-only inventory, health checks and the alerting monitor.
pub mod inspector;

/// Scope leases with expiry.
pub mod lock;

/// Scope paths and backend key layout.
pub mod path;

/// Retry policy shared by backends and destroyers.
pub mod retry;

/// Scope handle and lifecycle state machine.
pub mod scope;

/// State documents, resource records and snapshots.
pub mod state;

pub use backend::Backend;
pub use config::{BackendConfig, DestroyStrategy, EngineConfig};
pub use destroy::{DestroyerRegistry, Destroyable, MockDestroyer, RecordOnlyDestroyer};
pub use engine::Engine;
pub use error::{Result, ScopeError};
pub use finalizer::{FinalizationReport, FinalizeMode, FinalizeOptions};
pub use inspector::{Alert, AlertSink, Inspector, Monitor, MonitorConfig};
pub use lock::Lease;
pub use path::ScopePath;
pub use retry::RetryPolicy;
pub use scope::{Scope, ScopeStatus};
pub use state::{ResourceRecord, ScopeState};
