// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scope path addressing.
//!
//! A scope path is `application/stage[/nested...]`. Every persisted object of
//! a scope lives under that prefix:
//!
//! | Object | Key |
//! |--------|-----|
//! | State document | `<path>/state.json` |
//! | Lock marker | `<path>/.lock` |
//! | Snapshots | `<path>/.backups/<updated-at-millis>.json` |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScopeError};

/// File name of the State document inside a scope prefix.
pub const STATE_FILE: &str = "state.json";
/// File name of the lock marker inside a scope prefix.
pub const LOCK_FILE: &str = ".lock";
/// Directory holding snapshots inside a scope prefix.
pub const BACKUPS_DIR: &str = ".backups";

const MAX_SEGMENT_LEN: usize = 128;

/// Ordered, validated sequence of path segments addressing one scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScopePath {
    segments: Vec<String>,
}

impl ScopePath {
    /// Top-level scope for an application stage.
    pub fn new(application: &str, stage: &str) -> Result<Self> {
        validate_segment(application)?;
        validate_segment(stage)?;
        Ok(Self {
            segments: vec![application.to_string(), stage.to_string()],
        })
    }

    /// Parse `app/stage[/nested...]`.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim_matches('/');
        let segments: Vec<String> = trimmed.split('/').map(str::to_string).collect();
        if segments.len() < 2 {
            return Err(ScopeError::InvalidPath {
                path: raw.to_string(),
                reason: "expected at least 'application/stage'".to_string(),
            });
        }
        for segment in &segments {
            validate_segment(segment).map_err(|_| ScopeError::InvalidPath {
                path: raw.to_string(),
                reason: format!("invalid segment '{}'", segment),
            })?;
        }
        Ok(Self { segments })
    }

    /// Path of a nested scope directly below this one.
    pub fn child(&self, name: &str) -> Result<Self> {
        validate_segment(name)?;
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(Self { segments })
    }

    /// Parent scope path, `None` for a top-level scope.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() <= 2 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn application(&self) -> &str {
        &self.segments[0]
    }

    pub fn stage(&self) -> &str {
        &self.segments[1]
    }

    /// Last segment (the stage for a top-level scope).
    pub fn name(&self) -> &str {
        &self.segments[self.segments.len() - 1]
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Nesting depth; a top-level scope is 0.
    pub fn depth(&self) -> usize {
        self.segments.len() - 2
    }

    pub fn state_key(&self) -> String {
        format!("{}/{}", self, STATE_FILE)
    }

    pub fn lock_key(&self) -> String {
        format!("{}/{}", self, LOCK_FILE)
    }

    pub fn backups_prefix(&self) -> String {
        format!("{}/{}/", self, BACKUPS_DIR)
    }

    pub fn backup_key(&self, snapshot_id: &str) -> String {
        format!("{}{}.json", self.backups_prefix(), snapshot_id)
    }

    /// Recover a scope path from a State document key (`.../state.json`).
    pub fn from_state_key(key: &str) -> Option<Self> {
        let prefix = key.strip_suffix(STATE_FILE)?.strip_suffix('/')?;
        if prefix.split('/').any(|s| s == BACKUPS_DIR) {
            return None;
        }
        Self::parse(prefix).ok()
    }
}

impl fmt::Display for ScopePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl FromStr for ScopePath {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ScopePath {
    type Error = ScopeError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ScopePath> for String {
    fn from(value: ScopePath) -> Self {
        value.to_string()
    }
}

/// Check that a single segment is safe as a file name and an object key.
///
/// Allowed: ASCII alphanumerics, `-`, `_`, `.`; must not start with `.`
/// (reserved for `.lock` / `.backups`) and must not be `state.json`.
pub fn validate_segment(segment: &str) -> Result<()> {
    let reason = if segment.is_empty() {
        Some("segment is empty")
    } else if segment.len() > MAX_SEGMENT_LEN {
        Some("segment is longer than 128 characters")
    } else if segment.starts_with('.') {
        Some("segment must not start with '.'")
    } else if segment == STATE_FILE {
        Some("segment is reserved")
    } else if !segment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        Some("only ASCII letters, digits, '-', '_' and '.' are allowed")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ScopeError::InvalidPath {
            path: segment.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
