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

//! The [DeploymentOrchestrator] reconciles a [DeploymentRequest] against the services already
//! deployed for its [ServiceIdentity].
//!
//! Every mutating operation runs in a per-identity critical section:
//! 1. query the [ServiceRegistry]
//! 2. pick an [Action] with the [DeploymentDecisionEngine]
//! 3. on reuse, make sure the existing service is running
//! 4. on deploy/replace, stage the artifact with the [ArtifactLocator] and call the
//!    [ServingBackend]
//! 5. record the outcome in the registry
//!
//! The critical section runs on its own task. If the caller stops waiting, the operation
//! still completes and whatever state the backend reports is recorded.
//!
//! The orchestrator never retries. Callers can safely retry a failed call as a whole.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use derive_builder::Builder;
use educe::Educe;
use tracing as log;
use validator::Validate;

use crate::{
    backend::{create_backend, BackendError, BackendResult, ServingBackend},
    config::DeployerSettings,
    decision::{Action, DeploymentDecisionEngine},
    errors::{ActionKind, DeployError, DeployErrorKind, DeployResult},
    locator::ArtifactLocator,
    metrics::DeployerMetrics,
    protocols::{DeploymentRequest, DeploymentService, PredictorKind, ServiceIdentity, ServiceState},
    registry::{InMemoryServiceRegistry, ServiceRegistry},
    storage::StorageRegistry,
    Result,
};

type IdentityLock = Arc<tokio::sync::Mutex<()>>;

#[derive(Educe, Builder)]
#[educe(Debug)]
#[builder(
    public,
    name = "DeploymentOrchestratorBuilder",
    pattern = "owned",
    build_fn(private, name = "build_state", error = "anyhow::Error")
)]
struct State {
    #[educe(Debug(ignore))]
    backend: Arc<dyn ServingBackend>,

    #[educe(Debug(ignore))]
    #[builder(default = "Arc::new(InMemoryServiceRegistry::new())")]
    registry: Arc<dyn ServiceRegistry>,

    #[builder(default = "ArtifactLocator::new(StorageRegistry::local())")]
    locator: ArtifactLocator,

    #[builder(default)]
    settings: DeployerSettings,

    #[builder(default)]
    engine: DeploymentDecisionEngine,

    #[builder(default, setter(strip_option))]
    metrics: Option<DeployerMetrics>,

    #[educe(Debug(ignore))]
    #[builder(setter(skip))]
    locks: Mutex<HashMap<ServiceIdentity, IdentityLock>>,
}

impl DeploymentOrchestratorBuilder {
    pub fn build(self) -> Result<DeploymentOrchestrator> {
        Ok(DeploymentOrchestrator {
            state: Arc::new(self.build_state()?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct DeploymentOrchestrator {
    state: Arc<State>,
}

impl DeploymentOrchestrator {
    pub fn builder() -> DeploymentOrchestratorBuilder {
        DeploymentOrchestratorBuilder::default()
    }

    /// Wire an orchestrator from settings: configured filesystems and staging policies, the
    /// configured backend, an in-memory registry and metrics.
    pub fn from_settings(settings: DeployerSettings) -> Result<Self> {
        let storage = StorageRegistry::from_config(&settings.storage);
        let locator = settings
            .locator
            .policies
            .iter()
            .fold(ArtifactLocator::new(storage), |locator, (kind, policy)| {
                locator.with_policy(PredictorKind::new(kind), policy.clone())
            });

        Self::builder()
            .backend(create_backend(&settings.backend))
            .locator(locator)
            .metrics(DeployerMetrics::new()?)
            .settings(settings)
            .build()
    }

    pub fn settings(&self) -> &DeployerSettings {
        &self.state.settings
    }

    pub fn metrics(&self) -> Option<&DeployerMetrics> {
        self.state.metrics.as_ref()
    }

    /// Deploy the requested model, or keep serving the previous one, according to the
    /// request's deploy decision. Returns the service serving the identity afterwards.
    pub async fn deploy(&self, request: DeploymentRequest) -> DeployResult<DeploymentService> {
        let identity = request.identity().clone();
        request.validate().map_err(|e| {
            DeployError::new(
                identity.clone(),
                ActionKind::Deploy,
                DeployErrorKind::InvalidRequest(e.to_string()),
            )
        })?;

        self.detached(identity, ActionKind::Deploy, move |state| async move {
            state.deploy(request).await
        })
        .await
    }

    /// Services recorded for `identity`, most recent first.
    pub async fn find(&self, identity: &ServiceIdentity) -> Vec<DeploymentService> {
        self.state.registry.find(identity).await
    }

    /// Start the most recent service for `identity` if it is not running. Without a timeout the
    /// configured default start timeout applies.
    pub async fn start(
        &self,
        identity: &ServiceIdentity,
        timeout: Option<Duration>,
    ) -> DeployResult<DeploymentService> {
        let target = identity.clone();
        let timeout = timeout.unwrap_or(self.state.settings.default_start_timeout);
        self.detached(identity.clone(), ActionKind::Start, move |state| async move {
            state.start(target, timeout).await
        })
        .await
    }

    /// Stop every service recorded for `identity`.
    pub async fn stop(&self, identity: &ServiceIdentity) -> DeployResult<Vec<DeploymentService>> {
        let target = identity.clone();
        self.detached(identity.clone(), ActionKind::Stop, move |state| async move {
            state.stop(target).await
        })
        .await
    }

    /// Stop every service recorded for `identity` and forget them. Deleting an identity with
    /// no services is a no-op.
    pub async fn delete(&self, identity: &ServiceIdentity) -> DeployResult<()> {
        let target = identity.clone();
        self.detached(identity.clone(), ActionKind::Delete, move |state| async move {
            state.delete(target).await
        })
        .await
    }

    /// Re-read the state of every service recorded for `identity` from the backend.
    pub async fn refresh(&self, identity: &ServiceIdentity) -> DeployResult<Vec<DeploymentService>> {
        let target = identity.clone();
        self.detached(identity.clone(), ActionKind::Reuse, move |state| async move {
            state.refresh(target).await
        })
        .await
    }

    // Runs `f` on its own task so that dropping the caller's future does not abandon a
    // half-finished operation.
    async fn detached<T, F, Fut>(
        &self,
        identity: ServiceIdentity,
        action: ActionKind,
        f: F,
    ) -> DeployResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<State>) -> Fut,
        Fut: Future<Output = DeployResult<T>> + Send + 'static,
    {
        let handle = tokio::spawn(f(self.state.clone()));
        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(DeployError::new(
                identity,
                action,
                DeployErrorKind::BackendUnavailable(format!("deployment task cancelled: {e}")),
            )),
        }
    }
}

impl State {
    fn identity_lock(&self, identity: &ServiceIdentity) -> IdentityLock {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(identity.clone()).or_default().clone()
    }

    // Drop lock entries nobody is holding or waiting on
    fn prune_locks(&self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    async fn locked<T, Fut>(
        &self,
        identity: &ServiceIdentity,
        action: ActionKind,
        fut: Fut,
    ) -> DeployResult<T>
    where
        Fut: Future<Output = DeployResult<T>>,
    {
        let lock = self.identity_lock(identity);
        let result = {
            let _guard = lock.lock().await;
            let started = Instant::now();
            let result = fut.await;
            self.observe(identity, action, &result, started);
            result
        };
        drop(lock);
        self.prune_locks();
        result
    }

    fn observe<T>(
        &self,
        identity: &ServiceIdentity,
        action: ActionKind,
        result: &DeployResult<T>,
        started: Instant,
    ) {
        let elapsed = started.elapsed().as_secs_f64();
        match result {
            Ok(_) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_success(action, elapsed);
                }
            }
            Err(e) => {
                log::warn!(%identity, %action, error = %e, "deployment action failed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure(e.action(), e.kind_label(), elapsed);
                }
            }
        }
    }

    async fn deploy(&self, request: DeploymentRequest) -> DeployResult<DeploymentService> {
        let identity = request.identity().clone();

        let lock = self.identity_lock(&identity);
        let guard = lock.lock().await;
        let started = Instant::now();

        let candidates = self.registry.find(&identity).await;
        let action = self.engine.decide(&request, &candidates);
        let kind = action.kind();

        log::info!(
            %identity,
            run_id = request.pipeline_run_id().as_str(),
            action = %kind,
            candidates = candidates.len(),
            "deployment decision"
        );

        let result = match action {
            Action::ReuseAndEnsureRunning(service) => {
                if !*request.deploy_decision() {
                    log::info!(
                        %identity,
                        "deploy decision is negative, reusing the last deployed model server"
                    );
                }
                self.ensure_running(service, *request.start_timeout(), ActionKind::Reuse)
                    .await
            }
            Action::DeployNew => self.deploy_new(&request, false).await,
            Action::ReplaceExisting(_) => self.deploy_new(&request, true).await,
        };

        self.observe(&identity, kind, &result, started);
        drop(guard);
        drop(lock);
        self.prune_locks();
        result
    }

    async fn deploy_new(
        &self,
        request: &DeploymentRequest,
        replace: bool,
    ) -> DeployResult<DeploymentService> {
        let identity = request.identity();
        let action = if replace {
            ActionKind::Replace
        } else {
            ActionKind::Deploy
        };

        let served_root = request
            .served_root()
            .clone()
            .unwrap_or_else(|| self.settings.served_root(identity, request.pipeline_run_id()));

        let layout = self
            .locator
            .locate(
                request.model_artifact_uri(),
                request.predictor_kind(),
                &served_root,
            )
            .await
            .map_err(|e| DeployError::from_storage(identity.clone(), action, e))?;

        let timeout = *request.start_timeout();
        let result = self
            .with_deadline(
                timeout,
                self.backend.deploy(
                    &layout,
                    identity,
                    request.pipeline_run_id(),
                    replace,
                    timeout,
                ),
            )
            .await;

        match result {
            Ok(service) => {
                if replace {
                    self.registry.supersede(service.clone()).await;
                } else {
                    self.registry.record(service.clone()).await;
                }
                log::info!(
                    %identity,
                    uuid = %service.uuid,
                    prediction_url = service.prediction_url.as_deref().unwrap_or("<none>"),
                    "deployment service started"
                );
                Ok(service)
            }
            Err(e) => Err(self.backend_failure(identity, action, e, timeout).await),
        }
    }

    async fn ensure_running(
        &self,
        service: DeploymentService,
        timeout: Duration,
        action: ActionKind,
    ) -> DeployResult<DeploymentService> {
        if service.is_running() {
            return self.retire_superseded(service, action).await;
        }

        log::info!(
            identity = %service.identity,
            uuid = %service.uuid,
            state = %service.state,
            "starting existing deployment service"
        );

        let result = self
            .with_deadline(timeout, self.backend.start(&service, timeout))
            .await;

        match result {
            Ok(started) => {
                self.registry.record(started.clone()).await;
                self.retire_superseded(started, action).await
            }
            Err(e) => Err(self.backend_failure(&service.identity, action, e, timeout).await),
        }
    }

    // Completes a replace that was interrupted before the backend tore the old instances down:
    // once `current` is running, every other instance for its identity is stopped and dropped
    // from the registry.
    async fn retire_superseded(
        &self,
        current: DeploymentService,
        action: ActionKind,
    ) -> DeployResult<DeploymentService> {
        let identity = current.identity.clone();
        let others: Vec<_> = self
            .registry
            .find(&identity)
            .await
            .into_iter()
            .filter(|s| s.uuid != current.uuid)
            .collect();
        if others.is_empty() {
            return Ok(current);
        }

        log::info!(
            %identity,
            uuid = %current.uuid,
            superseded = others.len(),
            "retiring services left behind by an interrupted replace"
        );
        self.stop_all(&identity, others, action).await?;
        self.registry.supersede(current.clone()).await;
        Ok(current)
    }

    async fn start(
        &self,
        identity: ServiceIdentity,
        timeout: Duration,
    ) -> DeployResult<DeploymentService> {
        self.locked(&identity, ActionKind::Start, async {
            let newest = self
                .registry
                .find(&identity)
                .await
                .into_iter()
                .next()
                .ok_or_else(|| not_found(&identity, ActionKind::Start))?;
            self.ensure_running(newest, timeout, ActionKind::Start).await
        })
        .await
    }

    async fn stop(&self, identity: ServiceIdentity) -> DeployResult<Vec<DeploymentService>> {
        self.locked(&identity, ActionKind::Stop, async {
            let services = self.registry.find(&identity).await;
            if services.is_empty() {
                return Err(not_found(&identity, ActionKind::Stop));
            }
            self.stop_all(&identity, services, ActionKind::Stop).await
        })
        .await
    }

    async fn delete(&self, identity: ServiceIdentity) -> DeployResult<()> {
        self.locked(&identity, ActionKind::Delete, async {
            let services = self.registry.find(&identity).await;
            self.stop_all(&identity, services, ActionKind::Delete).await?;
            self.registry.forget(&identity).await;
            log::info!(%identity, "deployment services deleted");
            Ok(())
        })
        .await
    }

    async fn refresh(&self, identity: ServiceIdentity) -> DeployResult<Vec<DeploymentService>> {
        self.locked(&identity, ActionKind::Reuse, async {
            let mut refreshed = Vec::new();
            for service in self.registry.find(&identity).await {
                let state = self.backend.status(&service).await.map_err(|e| {
                    DeployError::from_backend(identity.clone(), ActionKind::Reuse, e, Duration::ZERO)
                })?;
                let service = service.with_state(state);
                self.registry.record(service.clone()).await;
                refreshed.push(service);
            }
            Ok(refreshed)
        })
        .await
    }

    async fn stop_all(
        &self,
        identity: &ServiceIdentity,
        services: Vec<DeploymentService>,
        action: ActionKind,
    ) -> DeployResult<Vec<DeploymentService>> {
        let mut stopped = Vec::with_capacity(services.len());
        for service in services {
            if matches!(service.state, ServiceState::Stopped | ServiceState::Failed) {
                stopped.push(service);
                continue;
            }
            self.backend.stop(&service).await.map_err(|e| {
                DeployError::from_backend(identity.clone(), action, e, Duration::ZERO)
            })?;
            let service = service.with_state(ServiceState::Stopped);
            self.registry.record(service.clone()).await;
            log::info!(%identity, uuid = %service.uuid, "deployment service stopped");
            stopped.push(service);
        }
        Ok(stopped)
    }

    // Bounds a backend call that waits for a service to start. The backend is trusted to honour
    // `timeout`, the grace period only covers backends that do not.
    async fn with_deadline<Fut>(&self, timeout: Duration, fut: Fut) -> BackendResult<DeploymentService>
    where
        Fut: Future<Output = BackendResult<DeploymentService>>,
    {
        match tokio::time::timeout(timeout + self.settings.backend_grace, fut).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!(?timeout, "serving backend did not answer within the start timeout");
                Err(BackendError::StartTimeout { service: None })
            }
        }
    }

    // Records any service descriptor the backend reported with the failure before translating
    // the error.
    async fn backend_failure(
        &self,
        identity: &ServiceIdentity,
        action: ActionKind,
        err: BackendError,
        timeout: Duration,
    ) -> DeployError {
        let err = match err {
            BackendError::StartTimeout {
                service: Some(service),
            } => {
                log::warn!(
                    %identity,
                    uuid = %service.uuid,
                    state = %service.state,
                    "recording service that has not reached the running state"
                );
                self.registry.record(service).await;
                BackendError::StartTimeout { service: None }
            }
            other => other,
        };
        DeployError::from_backend(identity.clone(), action, err, timeout)
    }
}

fn not_found(identity: &ServiceIdentity, action: ActionKind) -> DeployError {
    DeployError::new(identity.clone(), action, DeployErrorKind::ServiceNotFound)
}
