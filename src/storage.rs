// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Storage primitives used to stage model artifacts.
//!
//! A [Filesystem] implements the handful of operations staging needs for the URI schemes it
//! supports. The [StorageRegistry] routes each URI to a [Filesystem] by scheme prefix. Entries
//! are kept in an explicit order: higher priority first, then longer prefix first.
//!
//! Implementations translate their native "not found" condition into [StorageError::NotFound]
//! so callers only ever deal with one vocabulary.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod local;

pub use local::LocalFilesystem;

/// Priority given to filesystems registered without an explicit one.
pub const DEFAULT_PRIORITY: i32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("path not found: {path}")]
    NotFound { path: String },

    #[error("no filesystem registered for uri: {uri}")]
    UnsupportedScheme { uri: String },

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    /// Translate an [std::io::Error] raised while operating on `path`.
    pub fn from_io(path: impl Into<String>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound { path },
            _ => StorageError::Io { path, source },
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// The storage operations needed to stage a served model layout.
#[async_trait]
pub trait Filesystem: Send + Sync + std::fmt::Debug {
    /// URI prefixes handled by this filesystem, e.g. `file://`. The empty prefix matches
    /// bare paths.
    fn supported_schemes(&self) -> Vec<String>;

    async fn exists(&self, uri: &str) -> StorageResult<bool>;

    async fn is_dir(&self, uri: &str) -> StorageResult<bool>;

    /// Create a directory and all of its parents.
    async fn makedirs(&self, uri: &str) -> StorageResult<()>;

    /// Copy a single file, replacing `dst` if it exists.
    async fn copy_file(&self, src: &str, dst: &str) -> StorageResult<()>;

    /// Recursively copy the contents of `src` into `dst`, creating `dst` if needed.
    async fn copy_dir(&self, src: &str, dst: &str) -> StorageResult<()>;
}

/// Join a child path onto a storage uri with a single separator.
pub fn join(base: &str, child: &str) -> String {
    let base = base.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    if base.is_empty() {
        return format!("/{}", child);
    }
    format!("{}/{}", base, child)
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FilesystemKind {
    Local,
}

/// A filesystem to register on startup.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct FilesystemConfig {
    pub kind: FilesystemKind,

    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            kind: FilesystemKind::Local,
            priority: DEFAULT_PRIORITY,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    prefix: String,
    priority: i32,
    filesystem: Arc<dyn Filesystem>,
}

#[derive(Debug, Clone, Default)]
pub struct StorageRegistry {
    entries: Vec<Entry>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with only the [LocalFilesystem] at [DEFAULT_PRIORITY].
    pub fn local() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LocalFilesystem::new()), DEFAULT_PRIORITY);
        registry
    }

    pub fn from_config(filesystems: &[FilesystemConfig]) -> Self {
        let mut registry = Self::new();
        for config in filesystems {
            let filesystem: Arc<dyn Filesystem> = match config.kind {
                FilesystemKind::Local => Arc::new(LocalFilesystem::new()),
            };
            registry.register(filesystem, config.priority);
        }
        registry
    }

    /// Register `filesystem` for every scheme it supports.
    pub fn register(&mut self, filesystem: Arc<dyn Filesystem>, priority: i32) {
        for prefix in filesystem.supported_schemes() {
            self.entries.push(Entry {
                prefix,
                priority,
                filesystem: filesystem.clone(),
            });
        }
        self.entries.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.prefix.len().cmp(&a.prefix.len()))
        });
    }

    /// The filesystem registered for the scheme of `uri`. Bare paths only match the empty
    /// prefix; a uri with an unregistered scheme is [StorageError::UnsupportedScheme].
    pub fn resolve(&self, uri: &str) -> StorageResult<Arc<dyn Filesystem>> {
        let has_scheme = uri.contains("://");
        self.entries
            .iter()
            .filter(|entry| !(entry.prefix.is_empty() && has_scheme))
            .find(|entry| uri.starts_with(&entry.prefix))
            .map(|entry| entry.filesystem.clone())
            .ok_or_else(|| StorageError::UnsupportedScheme {
                uri: uri.to_string(),
            })
    }

    pub async fn exists(&self, uri: &str) -> StorageResult<bool> {
        self.resolve(uri)?.exists(uri).await
    }

    pub async fn is_dir(&self, uri: &str) -> StorageResult<bool> {
        self.resolve(uri)?.is_dir(uri).await
    }

    pub async fn makedirs(&self, uri: &str) -> StorageResult<()> {
        self.resolve(uri)?.makedirs(uri).await
    }

    pub async fn copy_file(&self, src: &str, dst: &str) -> StorageResult<()> {
        self.same_filesystem(src, dst)?.copy_file(src, dst).await
    }

    pub async fn copy_dir(&self, src: &str, dst: &str) -> StorageResult<()> {
        self.same_filesystem(src, dst)?.copy_dir(src, dst).await
    }

    // cross-filesystem copies are not supported yet
    fn same_filesystem(&self, src: &str, dst: &str) -> StorageResult<Arc<dyn Filesystem>> {
        let source = self.resolve(src)?;
        let target = self.resolve(dst)?;
        if !Arc::ptr_eq(&source, &target) {
            return Err(StorageError::UnsupportedScheme {
                uri: dst.to_string(),
            });
        }
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NamedFilesystem {
        schemes: Vec<String>,
        name: &'static str,
    }

    #[async_trait]
    impl Filesystem for NamedFilesystem {
        fn supported_schemes(&self) -> Vec<String> {
            self.schemes.clone()
        }

        async fn exists(&self, _uri: &str) -> StorageResult<bool> {
            Ok(self.name == "exists")
        }

        async fn is_dir(&self, _uri: &str) -> StorageResult<bool> {
            Ok(false)
        }

        async fn makedirs(&self, _uri: &str) -> StorageResult<()> {
            Ok(())
        }

        async fn copy_file(&self, _src: &str, _dst: &str) -> StorageResult<()> {
            Ok(())
        }

        async fn copy_dir(&self, _src: &str, _dst: &str) -> StorageResult<()> {
            Ok(())
        }
    }

    fn named(name: &'static str, schemes: &[&str]) -> Arc<dyn Filesystem> {
        Arc::new(NamedFilesystem {
            schemes: schemes.iter().map(|s| s.to_string()).collect(),
            name,
        })
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/served/", "/1"), "/served/1");
        assert_eq!(join("s3://bucket/root", "model.joblib"), "s3://bucket/root/model.joblib");
        assert_eq!(join("", "model"), "/model");
    }

    #[test]
    fn test_not_found_translation() {
        let err = StorageError::from_io(
            "/missing",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, StorageError::NotFound { ref path } if path == "/missing"));

        let err = StorageError::from_io(
            "/denied",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        );
        assert!(matches!(err, StorageError::Io { .. }));
    }

    #[tokio::test]
    async fn test_priority_wins_over_registration_order() {
        let mut registry = StorageRegistry::new();
        registry.register(named("low", &["s3://"]), 1);
        registry.register(named("exists", &["s3://"]), 10);

        assert!(registry.exists("s3://bucket/model").await.unwrap());
    }

    #[tokio::test]
    async fn test_longest_prefix_wins_on_equal_priority() {
        let mut registry = StorageRegistry::new();
        registry.register(named("bare", &[""]), DEFAULT_PRIORITY);
        registry.register(named("exists", &["gs://"]), DEFAULT_PRIORITY);

        assert!(registry.exists("gs://bucket/model").await.unwrap());
        assert!(!registry.exists("/local/model").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_scheme() {
        let registry = StorageRegistry::new();
        let err = registry.exists("s3://bucket").await.unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedScheme { .. }));

        let registry = StorageRegistry::local();
        let err = registry.exists("s3://bucket").await.unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedScheme { .. }));
    }

    #[tokio::test]
    async fn test_cross_filesystem_copy_rejected() {
        let mut registry = StorageRegistry::new();
        registry.register(named("a", &["s3://"]), DEFAULT_PRIORITY);
        registry.register(named("b", &["gs://"]), DEFAULT_PRIORITY);

        let err = registry
            .copy_file("s3://bucket/model", "gs://bucket/model")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedScheme { .. }));
    }
}
