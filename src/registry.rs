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

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::protocols::{DeploymentService, ServiceIdentity};

/// Read-only mirror of the deployment services created by a [crate::ServingBackend].
///
/// The registry is a source of candidates; it does not enforce that at most one service is
/// running per identity.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Services recorded for `identity`, most recently created first. Empty if there are none.
    async fn find(&self, identity: &ServiceIdentity) -> Vec<DeploymentService>;

    /// Record a service. A service with the same uuid is updated in place.
    async fn record(&self, service: DeploymentService);

    /// Replace every service recorded for `new.identity` with `new` in a single step.
    async fn supersede(&self, new: DeploymentService);

    /// Drop every service recorded for `identity`.
    async fn forget(&self, identity: &ServiceIdentity);

    async fn list(&self) -> Vec<DeploymentService>;
}

#[derive(Debug, Default)]
pub struct InMemoryServiceRegistry {
    services: RwLock<HashMap<ServiceIdentity, Vec<DeploymentService>>>,
}

impl InMemoryServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

fn insert(entries: &mut Vec<DeploymentService>, service: DeploymentService) {
    match entries.iter_mut().find(|s| s.uuid == service.uuid) {
        Some(existing) => *existing = service,
        None => entries.push(service),
    }
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[async_trait]
impl ServiceRegistry for InMemoryServiceRegistry {
    async fn find(&self, identity: &ServiceIdentity) -> Vec<DeploymentService> {
        self.services
            .read()
            .await
            .get(identity)
            .cloned()
            .unwrap_or_default()
    }

    async fn record(&self, service: DeploymentService) {
        let mut services = self.services.write().await;
        let entries = services.entry(service.identity.clone()).or_default();
        insert(entries, service);
    }

    async fn supersede(&self, new: DeploymentService) {
        self.services
            .write()
            .await
            .insert(new.identity.clone(), vec![new]);
    }

    async fn forget(&self, identity: &ServiceIdentity) {
        self.services.write().await.remove(identity);
    }

    async fn list(&self) -> Vec<DeploymentService> {
        let services = self.services.read().await;
        let mut all: Vec<_> = services.values().flatten().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::{PredictorKind, ServedLayout, ServiceState};
    use chrono::{Duration, Utc};

    fn service(identity: &ServiceIdentity, age_secs: i64) -> DeploymentService {
        let mut service = DeploymentService::new(
            identity.clone(),
            "run",
            ServedLayout::new("/served", PredictorKind::sklearn()),
        );
        service.created_at = Utc::now() - Duration::seconds(age_secs);
        service
    }

    #[tokio::test]
    async fn test_find_unknown_identity_is_empty() {
        let registry = InMemoryServiceRegistry::new();
        let found = registry.find(&ServiceIdentity::new("p", "s", "m")).await;
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_find_orders_newest_first() {
        let registry = InMemoryServiceRegistry::new();
        let identity = ServiceIdentity::new("p", "s", "m");

        let older = service(&identity, 60);
        let newer = service(&identity, 1);
        registry.record(newer.clone()).await;
        registry.record(older.clone()).await;

        let found = registry.find(&identity).await;
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].uuid, newer.uuid);
        assert_eq!(found[1].uuid, older.uuid);
    }

    #[tokio::test]
    async fn test_record_updates_in_place() {
        let registry = InMemoryServiceRegistry::new();
        let identity = ServiceIdentity::new("p", "s", "m");

        let svc = service(&identity, 0);
        registry.record(svc.clone()).await;
        registry
            .record(svc.clone().with_state(ServiceState::Running))
            .await;

        let found = registry.find(&identity).await;
        assert_eq!(found.len(), 1);
        assert!(found[0].is_running());
    }

    #[tokio::test]
    async fn test_supersede_leaves_only_new() {
        let registry = InMemoryServiceRegistry::new();
        let identity = ServiceIdentity::new("p", "s", "m");

        registry.record(service(&identity, 20)).await;
        registry.record(service(&identity, 10)).await;

        let new = service(&identity, 0);
        registry.supersede(new.clone()).await;

        let found = registry.find(&identity).await;
        assert_eq!(found, vec![new]);
    }

    #[tokio::test]
    async fn test_forget_is_scoped_to_identity() {
        let registry = InMemoryServiceRegistry::new();
        let a = ServiceIdentity::new("p", "s", "a");
        let b = ServiceIdentity::new("p", "s", "b");
        registry.record(service(&a, 0)).await;
        registry.record(service(&b, 0)).await;

        registry.forget(&a).await;

        assert!(registry.find(&a).await.is_empty());
        assert_eq!(registry.find(&b).await.len(), 1);
        assert_eq!(registry.list().await.len(), 1);
    }
}
