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

//! Model deployment service lifecycle manager.
//!
//! The [DeploymentOrchestrator] is the entry point. Given a [DeploymentRequest] it:
//! - looks up the services previously deployed for the request's [ServiceIdentity] in a
//!   [ServiceRegistry]
//! - asks the [decision] engine whether to reuse, deploy or replace
//! - stages the model artifact into the layout the serving runtime expects via the
//!   [ArtifactLocator]
//! - drives a [ServingBackend] and records the resulting [DeploymentService]
//!
//! Mutations are serialized per [ServiceIdentity]; unrelated identities proceed concurrently.

pub use anyhow::{anyhow as error, bail as raise, Context as ErrorContext, Error, Ok as OK, Result};

pub mod backend;
pub mod config;
pub mod decision;
pub mod errors;
pub mod locator;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod protocols;
pub mod registry;
pub mod storage;

pub use backend::{BackendError, ServingBackend};
pub use config::DeployerSettings;
pub use decision::{Action, DeploymentDecisionEngine};
pub use errors::{ActionKind, DeployError, DeployErrorKind, DeployResult};
pub use locator::{ArtifactLocator, StagingPolicy};
pub use orchestrator::DeploymentOrchestrator;
pub use protocols::{
    DeploymentRequest, DeploymentRequestBuilder, DeploymentService, PredictorKind, ServedLayout,
    ServiceIdentity, ServiceState,
};
pub use registry::{InMemoryServiceRegistry, ServiceRegistry};
