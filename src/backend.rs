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

//! The [ServingBackend] is the capability that actually runs model servers.
//!
//! The wire protocol of a concrete backend is not modelled here. Implementations report
//! failures as [BackendError], which the orchestrator translates into its own taxonomy.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::protocols::{DeploymentService, ServedLayout, ServiceIdentity, ServiceState};

pub mod mock;

pub use mock::MockServingBackend;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend rejected the request: {0}")]
    Rejected(String),

    /// The request was accepted but the service is not running yet. `service` holds the
    /// descriptor of the instance that is still starting, when the backend knows it.
    #[error("service did not start in time")]
    StartTimeout { service: Option<DeploymentService> },
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

#[async_trait]
pub trait ServingBackend: Send + Sync {
    /// Create a new service serving `layout` and wait up to `timeout` for it to run.
    ///
    /// With `replace`, an existing service for `identity` is torn down only once the new one
    /// is running; on failure the old one keeps serving.
    async fn deploy(
        &self,
        layout: &ServedLayout,
        identity: &ServiceIdentity,
        pipeline_run_id: &str,
        replace: bool,
        timeout: Duration,
    ) -> BackendResult<DeploymentService>;

    /// Start a stopped service and wait up to `timeout` for it to run.
    async fn start(
        &self,
        service: &DeploymentService,
        timeout: Duration,
    ) -> BackendResult<DeploymentService>;

    async fn stop(&self, service: &DeploymentService) -> BackendResult<()>;

    async fn status(&self, service: &DeploymentService) -> BackendResult<ServiceState>;
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// In-process backend, services "run" as soon as they are started
    #[default]
    Mock,
}

/// Build the backend named in the settings.
pub fn create_backend(kind: &BackendKind) -> Arc<dyn ServingBackend> {
    match kind {
        BackendKind::Mock => Arc::new(MockServingBackend::new()),
    }
}
