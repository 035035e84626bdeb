// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Local directory backend.
//!
//! Keys map to files below `root`. Writes go to a hidden temp file in the
//! target directory, are flushed with `sync_all`, then renamed over the
//! target, so a crash mid-write leaves the previous document intact.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{Backend, validate_key};
use crate::error::{Result, ScopeError};

const TEMP_SUFFIX: &str = ".tmp";

/// Backend storing every key as a file under a root directory.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Write `data` to a fresh temp file next to `target` and flush it.
    async fn write_temp(
        &self,
        operation: &str,
        key: &str,
        target: &Path,
        data: &[u8],
    ) -> Result<PathBuf> {
        let dir = target.parent().unwrap_or(self.root.as_path());
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| io_error(operation, key, &e))?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = dir.join(format!(".{}.{}{}", file_name, Uuid::new_v4(), TEMP_SUFFIX));

        let result = async {
            let mut file = tokio::fs::File::create(&temp).await?;
            file.write_all(data).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(io_error(operation, key, &e));
        }
        Ok(temp)
    }

    /// Remove now-empty directories between `path` and the root.
    async fn prune_empty_dirs(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            // remove_dir fails on non-empty directories, which ends the walk
            if tokio::fs::remove_dir(dir).await.is_err() {
                break;
            }
            trace!(dir = %dir.display(), "Removed empty directory");
            current = dir.parent();
        }
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("read", key, &e)),
        }
    }

    async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        let target = self.path_for(key)?;
        let temp = self.write_temp("write", key, &target, data).await?;
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(io_error("write", key, &e));
        }
        debug!(key = %key, bytes = data.len(), "Wrote local object");
        Ok(())
    }

    async fn write_if_absent(&self, key: &str, data: &[u8]) -> Result<bool> {
        let target = self.path_for(key)?;
        let temp = self.write_temp("write_if_absent", key, &target, data).await?;

        // hard_link fails if the target exists and publishes complete content
        let linked = tokio::fs::hard_link(&temp, &target).await;
        let _ = tokio::fs::remove_file(&temp).await;

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(io_error("write_if_absent", key, &e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.prune_empty_dirs(&path).await;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("delete", key, &e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // Start the walk at the deepest directory named by the prefix.
        let base = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let start = if base.is_empty() {
            self.root.clone()
        } else {
            self.path_for(base)?
        };

        let mut keys = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error("list", prefix, &e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| io_error("list", prefix, &e))?
            {
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| io_error("list", prefix, &e))?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if is_temp_file(&path) {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(TEMP_SUFFIX))
}

fn io_error(operation: &str, key: &str, err: &std::io::Error) -> ScopeError {
    if err.kind() == ErrorKind::PermissionDenied {
        return ScopeError::BackendRejected {
            operation: operation.to_string(),
            path: key.to_string(),
            details: err.to_string(),
        };
    }
    ScopeError::backend_io(operation, key, err)
}
