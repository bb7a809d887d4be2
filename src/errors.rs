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

//! Error taxonomy of the deployment lifecycle.
//!
//! Every failure surfaced by the [crate::DeploymentOrchestrator] is a [DeployError] carrying
//! the [ServiceIdentity] and the [ActionKind] that was attempted. Collaborator errors
//! ([crate::storage::StorageError], [crate::BackendError]) are translated into a
//! [DeployErrorKind] once, at the boundary.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    backend::BackendError,
    protocols::ServiceIdentity,
    storage::StorageError,
};

pub type DeployResult<T> = std::result::Result<T, DeployError>;

/// The operation being attempted when an error occurred.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Reuse,
    Deploy,
    Replace,
    Start,
    Stop,
    Delete,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Reuse => "reuse",
            ActionKind::Deploy => "deploy",
            ActionKind::Replace => "replace",
            ActionKind::Start => "start",
            ActionKind::Stop => "stop",
            ActionKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeployErrorKind {
    /// A predictor specific artifact path does not exist. Not retryable.
    #[error("model artifact not found at {path}")]
    ArtifactMissing { path: String },

    /// Directory creation or copy failed while staging the served layout.
    #[error("staging failed: {0}")]
    StagingIo(#[source] StorageError),

    /// The serving backend is unreachable or refused the request.
    #[error("serving backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend accepted the request but the service did not reach the running state in
    /// time. The service may still come up later; re-query rather than assume failure.
    #[error("service did not reach the running state within {timeout:?}")]
    StartTimeout { timeout: Duration },

    #[error("no deployment service found")]
    ServiceNotFound,

    #[error("invalid deployment request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, thiserror::Error)]
#[error("{action} failed for {identity}: {kind}")]
pub struct DeployError {
    identity: ServiceIdentity,
    action: ActionKind,
    #[source]
    kind: DeployErrorKind,
}

impl DeployError {
    pub fn new(identity: ServiceIdentity, action: ActionKind, kind: DeployErrorKind) -> Self {
        Self {
            identity,
            action,
            kind,
        }
    }

    /// Translate a storage failure. A missing source becomes [DeployErrorKind::ArtifactMissing],
    /// anything else is a staging fault.
    pub fn from_storage(identity: ServiceIdentity, action: ActionKind, err: StorageError) -> Self {
        let kind = match err {
            StorageError::NotFound { path } => DeployErrorKind::ArtifactMissing { path },
            other => DeployErrorKind::StagingIo(other),
        };
        Self::new(identity, action, kind)
    }

    pub fn from_backend(
        identity: ServiceIdentity,
        action: ActionKind,
        err: BackendError,
        timeout: Duration,
    ) -> Self {
        let kind = match err {
            BackendError::StartTimeout { .. } => DeployErrorKind::StartTimeout { timeout },
            BackendError::Unavailable(msg) => DeployErrorKind::BackendUnavailable(msg),
            BackendError::Rejected(msg) => DeployErrorKind::BackendUnavailable(msg),
        };
        Self::new(identity, action, kind)
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn action(&self) -> ActionKind {
        self.action
    }

    pub fn kind(&self) -> &DeployErrorKind {
        &self.kind
    }

    /// Label used for metrics
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            DeployErrorKind::ArtifactMissing { .. } => "artifact_missing",
            DeployErrorKind::StagingIo(_) => "staging_io",
            DeployErrorKind::BackendUnavailable(_) => "backend_unavailable",
            DeployErrorKind::StartTimeout { .. } => "start_timeout",
            DeployErrorKind::ServiceNotFound => "service_not_found",
            DeployErrorKind::InvalidRequest(_) => "invalid_request",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn identity() -> ServiceIdentity {
        ServiceIdentity::new("p1", "s1", "m1")
    }

    #[test]
    fn test_not_found_maps_to_artifact_missing() {
        let err = DeployError::from_storage(
            identity(),
            ActionKind::Deploy,
            StorageError::NotFound {
                path: "/a/model".to_string(),
            },
        );
        assert_matches!(err.kind(), DeployErrorKind::ArtifactMissing { path } if path == "/a/model");
        assert_eq!(err.kind_label(), "artifact_missing");
    }

    #[test]
    fn test_backend_timeout_carries_bound() {
        let err = DeployError::from_backend(
            identity(),
            ActionKind::Start,
            BackendError::StartTimeout { service: None },
            Duration::from_secs(5),
        );
        assert_matches!(err.kind(), DeployErrorKind::StartTimeout { timeout } if *timeout == Duration::from_secs(5));
        assert_eq!(
            err.to_string(),
            "start failed for p1/s1/m1: service did not reach the running state within 5s"
        );
    }

    #[test]
    fn test_rejected_maps_to_unavailable() {
        let err = DeployError::from_backend(
            identity(),
            ActionKind::Replace,
            BackendError::Rejected("quota exceeded".into()),
            Duration::from_secs(5),
        );
        assert_matches!(err.kind(), DeployErrorKind::BackendUnavailable(_));
        assert_eq!(err.action(), ActionKind::Replace);
        assert_eq!(err.identity(), &identity());
    }
}
