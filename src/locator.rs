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

//! The [ArtifactLocator] turns a stored model artifact into the layout a serving runtime
//! expects.
//!
//! | predictor kind | staging                                                      |
//! |----------------|--------------------------------------------------------------|
//! | `tensorflow`   | copy the artifact directory into `<served_root>/1/`          |
//! | `sklearn`      | copy `<artifact>/model` to `<served_root>/model.joblib`       |
//! | anything else  | serve the artifact uri as is                                 |
//!
//! Additional kinds can be registered with a [StagingPolicy].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing as log;

use crate::protocols::{PredictorKind, ServedLayout};
use crate::storage::{self, StorageError, StorageRegistry, StorageResult};

/// TensorFlow serving expects numbered version directories.
pub const TENSORFLOW_VERSION_SLOT: &str = "1";

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StagingPolicy {
    /// Copy the whole artifact directory into `<served_root>/<version>`.
    VersionedDirectory { version: String },

    /// Copy `<artifact>/<source>` to `<served_root>/<target>`.
    SingleFile { source: String, target: String },

    /// Serve the artifact where it is stored.
    Passthrough,
}

#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    storage: StorageRegistry,
    policies: HashMap<PredictorKind, StagingPolicy>,
}

impl ArtifactLocator {
    /// A locator with the built-in `tensorflow` and `sklearn` policies.
    pub fn new(storage: StorageRegistry) -> Self {
        let mut policies = HashMap::new();
        policies.insert(
            PredictorKind::tensorflow(),
            StagingPolicy::VersionedDirectory {
                version: TENSORFLOW_VERSION_SLOT.to_string(),
            },
        );
        policies.insert(
            PredictorKind::sklearn(),
            StagingPolicy::SingleFile {
                source: "model".to_string(),
                target: "model.joblib".to_string(),
            },
        );
        Self { storage, policies }
    }

    /// Register or override the policy for a predictor kind.
    pub fn with_policy(mut self, kind: impl Into<PredictorKind>, policy: StagingPolicy) -> Self {
        self.policies.insert(kind.into(), policy);
        self
    }

    pub fn policy(&self, kind: &PredictorKind) -> &StagingPolicy {
        self.policies
            .get(kind)
            .unwrap_or(&StagingPolicy::Passthrough)
    }

    /// Stage `model_artifact_uri` under `served_root` for `predictor_kind`.
    ///
    /// The expected source is checked before anything is written, so a missing artifact
    /// leaves no partial layout behind. The source is never modified.
    pub async fn locate(
        &self,
        model_artifact_uri: &str,
        predictor_kind: &PredictorKind,
        served_root: &str,
    ) -> StorageResult<ServedLayout> {
        let served_uri = match self.policy(predictor_kind) {
            StagingPolicy::VersionedDirectory { version } => {
                if !self.storage.is_dir(model_artifact_uri).await? {
                    return Err(StorageError::NotFound {
                        path: model_artifact_uri.to_string(),
                    });
                }
                let target = storage::join(served_root, version);
                self.storage.makedirs(&target).await?;
                self.storage.copy_dir(model_artifact_uri, &target).await?;
                served_root.to_string()
            }
            StagingPolicy::SingleFile { source, target } => {
                let source = storage::join(model_artifact_uri, source);
                if !self.storage.exists(&source).await? {
                    return Err(StorageError::NotFound { path: source });
                }
                self.storage.makedirs(served_root).await?;
                self.storage
                    .copy_file(&source, &storage::join(served_root, target))
                    .await?;
                served_root.to_string()
            }
            StagingPolicy::Passthrough => model_artifact_uri.to_string(),
        };

        log::debug!(
            predictor = %predictor_kind,
            artifact = model_artifact_uri,
            served = %served_uri,
            "located served layout"
        );

        Ok(ServedLayout::new(served_uri, predictor_kind.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_kind_is_passthrough() {
        let locator = ArtifactLocator::new(StorageRegistry::local());
        assert_eq!(
            locator.policy(&PredictorKind::new("xgboost")),
            &StagingPolicy::Passthrough
        );
    }

    #[test]
    fn test_policy_override() {
        let locator = ArtifactLocator::new(StorageRegistry::local()).with_policy(
            "pytorch",
            StagingPolicy::SingleFile {
                source: "model".to_string(),
                target: "model.pt".to_string(),
            },
        );
        assert!(matches!(
            locator.policy(&PredictorKind::new("PyTorch")),
            StagingPolicy::SingleFile { target, .. } if target == "model.pt"
        ));
    }

    #[test]
    fn test_policy_deserialization() {
        let policy: StagingPolicy =
            serde_json::from_str(r#"{"type": "versioned_directory", "version": "3"}"#).unwrap();
        assert_eq!(
            policy,
            StagingPolicy::VersionedDirectory {
                version: "3".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_passthrough_touches_nothing() {
        // storage with no filesystems would fail any access
        let locator = ArtifactLocator::new(StorageRegistry::new());
        let layout = locator
            .locate("s3://bucket/model", &PredictorKind::new("triton"), "/unused")
            .await
            .unwrap();
        assert_eq!(layout.served_uri(), "s3://bucket/model");
        assert_eq!(layout.predictor_kind().as_str(), "triton");
    }
}
