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

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tracing as log;
use uuid::Uuid;

use super::{BackendError, BackendResult, ServingBackend};
use crate::protocols::{DeploymentService, ServedLayout, ServiceIdentity, ServiceState};

/// A call observed by the [MockServingBackend].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Deploy {
        identity: ServiceIdentity,
        served_uri: String,
        replace: bool,
    },
    Start(Uuid),
    Stop(Uuid),
    Status(Uuid),
}

/// In-process [ServingBackend].
///
/// Services become running after `start_delay`. If that exceeds the caller's timeout the
/// call returns [BackendError::StartTimeout] and the service stays in
/// [ServiceState::Starting].
#[derive(Debug, Default)]
pub struct MockServingBackend {
    services: Mutex<HashMap<Uuid, DeploymentService>>,
    calls: Mutex<Vec<BackendCall>>,
    start_delay: Mutex<Duration>,
    unavailable: AtomicBool,
    unresponsive: AtomicBool,
}

impl MockServingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// Every call fails with [BackendError::Unavailable].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Calls that wait for a service never return.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.unresponsive.store(unresponsive, Ordering::SeqCst);
    }

    /// Mark a service as stopped behind the caller's back.
    pub fn crash(&self, uuid: &Uuid) {
        if let Some(service) = self.lock_services().get_mut(uuid) {
            service.state = ServiceState::Stopped;
        }
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn deploy_calls(&self) -> Vec<BackendCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, BackendCall::Deploy { .. }))
            .collect()
    }

    pub fn start_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::Start(_)))
            .count()
    }

    /// Services currently known to the backend for `identity`.
    pub fn services_for(&self, identity: &ServiceIdentity) -> Vec<DeploymentService> {
        self.lock_services()
            .values()
            .filter(|s| &s.identity == identity)
            .cloned()
            .collect()
    }

    fn lock_services(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, DeploymentService>> {
        self.services.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push_call(&self, call: BackendCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }

    fn check_available(&self) -> BackendResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("mock backend is offline".into()));
        }
        Ok(())
    }

    fn put(&self, service: DeploymentService) {
        self.lock_services().insert(service.uuid, service);
    }

    // Moves the service to starting and waits for it to come up within `timeout`.
    async fn run(
        &self,
        mut service: DeploymentService,
        timeout: Duration,
    ) -> BackendResult<DeploymentService> {
        service.state = ServiceState::Starting;
        self.put(service.clone());

        if self.unresponsive.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }

        let delay = *self.start_delay.lock().unwrap_or_else(|e| e.into_inner());
        if delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(BackendError::StartTimeout {
                service: Some(service),
            });
        }
        tokio::time::sleep(delay).await;

        service.state = ServiceState::Running;
        self.put(service.clone());
        Ok(service)
    }
}

#[async_trait]
impl ServingBackend for MockServingBackend {
    async fn deploy(
        &self,
        layout: &ServedLayout,
        identity: &ServiceIdentity,
        pipeline_run_id: &str,
        replace: bool,
        timeout: Duration,
    ) -> BackendResult<DeploymentService> {
        self.push_call(BackendCall::Deploy {
            identity: identity.clone(),
            served_uri: layout.served_uri().clone(),
            replace,
        });
        self.check_available()?;

        let previous: Vec<Uuid> = if replace {
            self.services_for(identity).iter().map(|s| s.uuid).collect()
        } else {
            Vec::new()
        };

        let mut service = DeploymentService::new(identity.clone(), pipeline_run_id, layout.clone());
        service.prediction_url = Some(format!(
            "http://{}.{}.mock.local/v1/models/{}:predict",
            identity.pipeline_name(),
            identity.step_name(),
            identity.model_name()
        ));

        let service = self.run(service, timeout).await?;

        // old instances go away only once the new one is serving
        let mut services = self.lock_services();
        for uuid in previous {
            log::debug!(%uuid, "mock backend tearing down replaced service");
            services.remove(&uuid);
        }

        Ok(service)
    }

    async fn start(
        &self,
        service: &DeploymentService,
        timeout: Duration,
    ) -> BackendResult<DeploymentService> {
        self.push_call(BackendCall::Start(service.uuid));
        self.check_available()?;

        let current = self
            .lock_services()
            .get(&service.uuid)
            .cloned()
            .ok_or_else(|| BackendError::Rejected(format!("unknown service {}", service.uuid)))?;

        if current.is_running() {
            return Ok(current);
        }
        self.run(current, timeout).await
    }

    async fn stop(&self, service: &DeploymentService) -> BackendResult<()> {
        self.push_call(BackendCall::Stop(service.uuid));
        self.check_available()?;

        if let Some(current) = self.lock_services().get_mut(&service.uuid) {
            current.state = ServiceState::Stopped;
        }
        Ok(())
    }

    async fn status(&self, service: &DeploymentService) -> BackendResult<ServiceState> {
        self.push_call(BackendCall::Status(service.uuid));
        self.check_available()?;

        Ok(self
            .lock_services()
            .get(&service.uuid)
            .map(|s| s.state)
            .unwrap_or(ServiceState::Absent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::PredictorKind;
    use assert_matches::assert_matches;

    fn layout() -> ServedLayout {
        ServedLayout::new("/served", PredictorKind::sklearn())
    }

    #[tokio::test]
    async fn test_deploy_runs_service() {
        let backend = MockServingBackend::new();
        let identity = ServiceIdentity::new("p", "s", "m");

        let service = backend
            .deploy(&layout(), &identity, "run-1", false, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(service.is_running());
        assert!(service.prediction_url.is_some());
        assert_eq!(
            backend.status(&service).await.unwrap(),
            ServiceState::Running
        );
    }

    #[tokio::test]
    async fn test_replace_tears_down_previous() {
        let backend = MockServingBackend::new();
        let identity = ServiceIdentity::new("p", "s", "m");
        let timeout = Duration::from_secs(1);

        let first = backend
            .deploy(&layout(), &identity, "run-1", false, timeout)
            .await
            .unwrap();
        let second = backend
            .deploy(&layout(), &identity, "run-2", true, timeout)
            .await
            .unwrap();

        let services = backend.services_for(&identity);
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].uuid, second.uuid);
        assert_eq!(
            backend.status(&first).await.unwrap(),
            ServiceState::Absent
        );
    }

    #[tokio::test]
    async fn test_failed_replace_keeps_previous() {
        let backend = MockServingBackend::new();
        let identity = ServiceIdentity::new("p", "s", "m");

        let first = backend
            .deploy(&layout(), &identity, "run-1", false, Duration::from_secs(1))
            .await
            .unwrap();

        backend.set_start_delay(Duration::from_secs(10));
        let result = backend
            .deploy(&layout(), &identity, "run-2", true, Duration::from_millis(10))
            .await;
        assert_matches!(result, Err(BackendError::StartTimeout { service: Some(_) }));

        assert_eq!(
            backend.status(&first).await.unwrap(),
            ServiceState::Running
        );
    }

    #[tokio::test]
    async fn test_stop_then_start() {
        let backend = MockServingBackend::new();
        let identity = ServiceIdentity::new("p", "s", "m");
        let timeout = Duration::from_secs(1);

        let service = backend
            .deploy(&layout(), &identity, "run-1", false, timeout)
            .await
            .unwrap();
        backend.stop(&service).await.unwrap();
        assert_eq!(
            backend.status(&service).await.unwrap(),
            ServiceState::Stopped
        );

        let restarted = backend.start(&service, timeout).await.unwrap();
        assert_eq!(restarted.uuid, service.uuid);
        assert!(restarted.is_running());
        assert_eq!(backend.start_calls(), 1);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let backend = MockServingBackend::new();
        backend.set_unavailable(true);
        let result = backend
            .deploy(
                &layout(),
                &ServiceIdentity::new("p", "s", "m"),
                "run-1",
                false,
                Duration::from_secs(1),
            )
            .await;
        assert_matches!(result, Err(BackendError::Unavailable(_)));
    }
}
