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

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing as log;

use super::{Filesystem, StorageError, StorageResult};

const FILE_SCHEME: &str = "file://";

/// [Filesystem] for local paths, either bare or `file://` prefixed.
#[derive(Debug, Clone, Default)]
pub struct LocalFilesystem {}

impl LocalFilesystem {
    pub fn new() -> Self {
        Self {}
    }
}

fn to_path(uri: &str) -> PathBuf {
    PathBuf::from(uri.strip_prefix(FILE_SCHEME).unwrap_or(uri))
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

async fn metadata(path: &Path) -> StorageResult<Option<std::fs::Metadata>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta)),
        Err(e) => match StorageError::from_io(display(path), e) {
            StorageError::NotFound { .. } => Ok(None),
            other => Err(other),
        },
    }
}

// Iterative walk; async recursion would need boxing
async fn copy_tree(src: &Path, dst: &Path) -> StorageResult<()> {
    let mut pending = vec![(src.to_path_buf(), dst.to_path_buf())];

    while let Some((from, to)) = pending.pop() {
        tokio::fs::create_dir_all(&to)
            .await
            .map_err(|e| StorageError::from_io(display(&to), e))?;

        let mut entries = tokio::fs::read_dir(&from)
            .await
            .map_err(|e| StorageError::from_io(display(&from), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::from_io(display(&from), e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| StorageError::from_io(display(&entry.path()), e))?;
            let target = to.join(entry.file_name());

            if file_type.is_dir() {
                pending.push((entry.path(), target));
            } else {
                tokio::fs::copy(entry.path(), &target)
                    .await
                    .map_err(|e| StorageError::from_io(display(&entry.path()), e))?;
            }
        }
    }

    Ok(())
}

#[async_trait]
impl Filesystem for LocalFilesystem {
    fn supported_schemes(&self) -> Vec<String> {
        vec![FILE_SCHEME.to_string(), String::new()]
    }

    async fn exists(&self, uri: &str) -> StorageResult<bool> {
        Ok(metadata(&to_path(uri)).await?.is_some())
    }

    async fn is_dir(&self, uri: &str) -> StorageResult<bool> {
        Ok(metadata(&to_path(uri))
            .await?
            .map(|meta| meta.is_dir())
            .unwrap_or(false))
    }

    async fn makedirs(&self, uri: &str) -> StorageResult<()> {
        let path = to_path(uri);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| StorageError::from_io(display(&path), e))
    }

    async fn copy_file(&self, src: &str, dst: &str) -> StorageResult<()> {
        let (src, dst) = (to_path(src), to_path(dst));
        log::trace!("copy {} -> {}", src.display(), dst.display());
        tokio::fs::copy(&src, &dst)
            .await
            .map(|_| ())
            .map_err(|e| StorageError::from_io(display(&src), e))
    }

    async fn copy_dir(&self, src: &str, dst: &str) -> StorageResult<()> {
        let (src, dst) = (to_path(src), to_path(dst));
        log::trace!("copy tree {} -> {}", src.display(), dst.display());
        copy_tree(&src, &dst).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_dir_preserves_nesting() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("variables")).unwrap();
        std::fs::write(src.join("saved_model.pb"), b"pb").unwrap();
        std::fs::write(src.join("variables").join("data"), b"vars").unwrap();

        let fs = LocalFilesystem::new();
        let dst = tmp.path().join("dst");
        fs.copy_dir(&display(&src), &display(&dst)).await.unwrap();

        assert_eq!(std::fs::read(dst.join("saved_model.pb")).unwrap(), b"pb");
        assert_eq!(
            std::fs::read(dst.join("variables").join("data")).unwrap(),
            b"vars"
        );
        // source is left in place
        assert!(src.join("saved_model.pb").exists());
    }

    #[tokio::test]
    async fn test_file_scheme_is_stripped() {
        let tmp = tempfile::tempdir().unwrap();
        let uri = format!("file://{}", tmp.path().display());

        let fs = LocalFilesystem::new();
        assert!(fs.exists(&uri).await.unwrap());
        assert!(fs.is_dir(&uri).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_source_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new();

        let missing = display(&tmp.path().join("missing"));
        assert!(!fs.exists(&missing).await.unwrap());

        let err = fs
            .copy_file(&missing, &display(&tmp.path().join("out")))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }
}
