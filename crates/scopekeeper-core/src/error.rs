// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for scopekeeper-core.
//!
//! Provides a unified error type with stable error codes for CLI and
//! monitoring output.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::finalizer::FinalizationReport;

/// Result type using ScopeError
pub type Result<T> = std::result::Result<T, ScopeError>;

/// Errors that can occur while operating on scopes and their state.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScopeError {
    /// Nothing is stored at the requested path.
    ///
    /// `load` reports an absent State as `Ok(None)`; this variant is only
    /// returned where absence is a failure (e.g. restoring a missing snapshot).
    #[error("Nothing found at '{path}'")]
    NotFound {
        /// Backend-relative path that was looked up.
        path: String,
    },

    /// A document exists but cannot be parsed.
    #[error("Document at '{path}' is corrupted: {reason}")]
    Corrupted {
        /// Backend-relative path of the document.
        path: String,
        /// Parse failure details.
        reason: String,
    },

    /// The scope's lock is held by another holder.
    #[error("Scope '{scope_path}' is locked by '{holder_id}' until {expires_at}")]
    Busy {
        /// Scope path the lock protects.
        scope_path: String,
        /// Identity of the current holder.
        holder_id: String,
        /// When the current lease expires.
        expires_at: DateTime<Utc>,
    },

    /// Operation called on a scope that is not in the required lifecycle state.
    #[error("Scope '{scope_path}' is in invalid state: expected '{expected}', got '{actual}'")]
    InvalidState {
        /// Scope path.
        scope_path: String,
        /// The state(s) the operation requires.
        expected: String,
        /// The state the scope is actually in.
        actual: String,
    },

    /// An orphan's destroy capability failed.
    #[error("Failed to destroy resource '{key}' in scope '{scope_path}': {cause}")]
    DestroyFailed {
        /// Scope the resource is recorded in.
        scope_path: String,
        /// Logical key of the resource.
        key: String,
        /// Underlying cause reported by the destroy capability.
        cause: String,
        /// Partial report of a finalize run halted by this failure.
        report: Option<Box<FinalizationReport>>,
    },

    /// Transient backend failure that persisted after all retries.
    #[error("Backend unavailable during '{operation}' on '{path}' after {attempts} attempt(s): {details}")]
    BackendUnavailable {
        /// Backend operation (read, write, list, ...).
        operation: String,
        /// Backend-relative path or prefix.
        path: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last error details.
        details: String,
    },

    /// Backend refused the request permanently (not retried).
    #[error("Backend rejected '{operation}' on '{path}': {details}")]
    BackendRejected {
        /// Backend operation.
        operation: String,
        /// Backend-relative path or prefix.
        path: String,
        /// Rejection details (e.g. HTTP status).
        details: String,
    },

    /// A scope path or path segment is malformed.
    #[error("Invalid scope path '{path}': {reason}")]
    InvalidPath {
        /// Offending path or segment.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Two different keys in one scope declare the same resource id.
    #[error("Resource id '{id}' for key '{key}' is already used by key '{existing_key}'")]
    DuplicateResourceId {
        /// Key being added.
        key: String,
        /// Conflicting resource id.
        id: String,
        /// Key already holding the id.
        existing_key: String,
    },

    /// A mutating operation was attempted without a valid lease.
    #[error("Lease for scope '{scope_path}' is not held: {reason}")]
    LeaseNotHeld {
        /// Scope path.
        scope_path: String,
        /// Why the lease is not valid.
        reason: String,
    },

    /// Release attempted by a process that does not hold the lease.
    #[error("Lease for scope '{scope_path}' is held by '{actual_holder}', not '{holder_id}'")]
    LeaseMismatch {
        /// Scope path.
        scope_path: String,
        /// Holder that attempted the release.
        holder_id: String,
        /// Holder recorded in the lock marker.
        actual_holder: String,
    },

    /// JSON serialization of a document failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScopeError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Corrupted { .. } => "CORRUPTED",
            Self::Busy { .. } => "BUSY",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::DestroyFailed { .. } => "DESTROY_FAILED",
            Self::BackendUnavailable { .. } => "BACKEND_UNAVAILABLE",
            Self::BackendRejected { .. } => "BACKEND_REJECTED",
            Self::InvalidPath { .. } => "INVALID_PATH",
            Self::DuplicateResourceId { .. } => "DUPLICATE_RESOURCE_ID",
            Self::LeaseNotHeld { .. } => "LEASE_NOT_HELD",
            Self::LeaseMismatch { .. } => "LEASE_MISMATCH",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. } | Self::Busy { .. })
    }

    /// Partial finalization report attached to a halted finalize, if any.
    pub fn report(&self) -> Option<&FinalizationReport> {
        match self {
            Self::DestroyFailed { report, .. } => report.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn backend_io(operation: &str, path: &str, err: &std::io::Error) -> Self {
        Self::BackendUnavailable {
            operation: operation.to_string(),
            path: path.to_string(),
            attempts: 1,
            details: err.to_string(),
        }
    }
}
