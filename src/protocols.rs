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

use std::time::Duration;

use chrono::{DateTime, Utc};
use derive_builder::Builder;
use derive_getters::{Dissolve, Getters};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Default time to wait for a serving backend to report a service as running.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(300);

static SEGMENT_REGEX: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"^[^/\s]+$").expect("static regex"));

// Identity segments end up in staging paths, so slashes and whitespace are rejected
fn validate_segment(input: &str) -> Result<(), ValidationError> {
    if SEGMENT_REGEX.is_match(input) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_segment"))
    }
}

/// The logical serving slot for a model: the service that serves `model_name` for
/// `step_name` of `pipeline_name`. Independent of the pipeline run id, which changes on
/// every execution.
#[derive(
    Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash, Getters, Dissolve, Validate,
)]
pub struct ServiceIdentity {
    #[validate(custom(function = "validate_segment"))]
    pipeline_name: String,

    #[validate(custom(function = "validate_segment"))]
    step_name: String,

    #[validate(custom(function = "validate_segment"))]
    model_name: String,
}

impl ServiceIdentity {
    pub fn new(
        pipeline_name: impl Into<String>,
        step_name: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            step_name: step_name.into(),
            model_name: model_name.into(),
        }
    }
}

impl std::fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.pipeline_name, self.step_name, self.model_name
        )
    }
}

/// Serving runtime a model is packaged for, e.g. `tensorflow` or `sklearn`.
///
/// Kinds are compared case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[serde(from = "String", into = "String")]
pub struct PredictorKind(String);

impl PredictorKind {
    pub const TENSORFLOW: &'static str = "tensorflow";
    pub const SKLEARN: &'static str = "sklearn";

    pub fn new(kind: impl AsRef<str>) -> Self {
        Self(kind.as_ref().trim().to_lowercase())
    }

    pub fn tensorflow() -> Self {
        Self::new(Self::TENSORFLOW)
    }

    pub fn sklearn() -> Self {
        Self::new(Self::SKLEARN)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PredictorKind {
    fn from(kind: String) -> Self {
        Self::new(kind)
    }
}

impl From<&str> for PredictorKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

impl From<PredictorKind> for String {
    fn from(kind: PredictorKind) -> Self {
        kind.0
    }
}

impl std::fmt::Display for PredictorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single request to deploy (or keep serving) a model, constructed once per
/// orchestration call.
#[derive(Debug, Clone, Builder, Getters, Validate)]
#[builder(pattern = "owned", build_fn(validate = "Self::validate_fields"))]
pub struct DeploymentRequest {
    #[validate(nested)]
    identity: ServiceIdentity,

    #[builder(setter(into))]
    #[validate(length(min = 1))]
    pipeline_run_id: String,

    #[builder(setter(into))]
    #[validate(length(min = 1))]
    model_artifact_uri: String,

    #[builder(setter(into))]
    predictor_kind: PredictorKind,

    /// Outcome of the upstream quality gate
    deploy_decision: bool,

    #[builder(default = "DEFAULT_START_TIMEOUT")]
    start_timeout: Duration,

    /// Where staged copies of the model are written. Derived from the deployer settings
    /// when not provided.
    #[builder(default, setter(into, strip_option))]
    served_root: Option<String>,
}

impl DeploymentRequest {
    pub fn builder() -> DeploymentRequestBuilder {
        DeploymentRequestBuilder::default()
    }
}

impl DeploymentRequestBuilder {
    fn validate_fields(&self) -> Result<(), String> {
        if let Some(timeout) = self.start_timeout {
            if timeout.is_zero() {
                return Err("start_timeout must be greater than zero".to_string());
            }
        }
        Ok(())
    }
}

/// The artifact location actually handed to the serving backend.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Getters, Dissolve)]
pub struct ServedLayout {
    served_uri: String,
    predictor_kind: PredictorKind,
}

impl ServedLayout {
    pub fn new(served_uri: impl Into<String>, predictor_kind: PredictorKind) -> Self {
        Self {
            served_uri: served_uri.into(),
            predictor_kind,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Absent,
    Starting,
    Running,
    Stopped,
    Failed,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceState::Absent => "absent",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopped => "stopped",
            ServiceState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A model serving service as reported by the [crate::ServingBackend].
///
/// The backend owns the service; the [crate::ServiceRegistry] keeps a read-only mirror.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DeploymentService {
    pub uuid: Uuid,
    pub identity: ServiceIdentity,
    pub pipeline_run_id: String,
    pub served_uri: String,
    pub predictor_kind: PredictorKind,
    pub prediction_url: Option<String>,
    pub state: ServiceState,
    pub created_at: DateTime<Utc>,
}

impl DeploymentService {
    /// A fresh service record for `layout`, not yet started.
    pub fn new(
        identity: ServiceIdentity,
        pipeline_run_id: impl Into<String>,
        layout: ServedLayout,
    ) -> Self {
        let (served_uri, predictor_kind) = layout.dissolve();
        Self {
            uuid: Uuid::new_v4(),
            identity,
            pipeline_run_id: pipeline_run_id.into(),
            served_uri,
            predictor_kind,
            prediction_url: None,
            state: ServiceState::Absent,
            created_at: Utc::now(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == ServiceState::Running
    }

    pub fn with_state(mut self, state: ServiceState) -> Self {
        self.state = state;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn identity() -> ServiceIdentity {
        ServiceIdentity::new("p1", "s1", "m1")
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(identity().to_string(), "p1/s1/m1");
    }

    #[rstest]
    #[case("", "s1", "m1")]
    #[case("p1", "s/1", "m1")]
    #[case("p1", "s1", "m 1")]
    fn test_invalid_identity(#[case] p: &str, #[case] s: &str, #[case] m: &str) {
        assert!(ServiceIdentity::new(p, s, m).validate().is_err());
    }

    #[test]
    fn test_predictor_kind_is_case_insensitive() {
        assert_eq!(PredictorKind::new("SKLearn"), PredictorKind::sklearn());
        assert_eq!(PredictorKind::from(" TensorFlow "), PredictorKind::tensorflow());

        let kind: PredictorKind = serde_json::from_str("\"PyTorch\"").unwrap();
        assert_eq!(kind.as_str(), "pytorch");
    }

    #[test]
    fn test_request_builder_defaults() {
        let request = DeploymentRequest::builder()
            .identity(identity())
            .pipeline_run_id("run-1")
            .model_artifact_uri("/artifacts/model")
            .predictor_kind("sklearn")
            .deploy_decision(true)
            .build()
            .unwrap();

        assert_eq!(*request.start_timeout(), DEFAULT_START_TIMEOUT);
        assert!(request.served_root().is_none());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_request_builder_rejects_zero_timeout() {
        let result = DeploymentRequest::builder()
            .identity(identity())
            .pipeline_run_id("run-1")
            .model_artifact_uri("/artifacts/model")
            .predictor_kind("sklearn")
            .deploy_decision(true)
            .start_timeout(Duration::ZERO)
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn test_request_builder_requires_identity() {
        let result = DeploymentRequest::builder()
            .pipeline_run_id("run-1")
            .model_artifact_uri("/artifacts/model")
            .predictor_kind("sklearn")
            .deploy_decision(true)
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn test_service_state_serialization() {
        let s = serde_json::to_string(&ServiceState::Running).unwrap();
        assert_eq!(s, "\"running\"");
    }

    #[test]
    fn test_new_service_is_absent() {
        let layout = ServedLayout::new("/served/model.joblib", PredictorKind::sklearn());
        let service = DeploymentService::new(identity(), "run-1", layout);
        assert_eq!(service.state, ServiceState::Absent);
        assert!(!service.is_running());
        assert_eq!(service.served_uri, "/served/model.joblib");
        assert!(service.with_state(ServiceState::Running).is_running());
    }
}
