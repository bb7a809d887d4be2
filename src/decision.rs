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

//! Always-on deployment policy.
//!
//! | deploy decision | existing service | action                            |
//! |-----------------|------------------|-----------------------------------|
//! | false           | none             | [Action::DeployNew]               |
//! | false           | some             | [Action::ReuseAndEnsureRunning]   |
//! | true            | none             | [Action::DeployNew]               |
//! | true            | some             | [Action::ReplaceExisting]         |
//!
//! A negative decision never tears down a service that is serving, and a positive decision
//! always supersedes whatever is deployed under the identity.
//!
//! Note that a negative decision still deploys when nothing is serving yet: an empty
//! serving slot is considered worse than one serving a model that failed the quality gate.
//! Callers that want no service at all after a rejected first model should not call
//! deploy.

use crate::errors::ActionKind;
use crate::protocols::{DeploymentRequest, DeploymentService};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Keep serving the previous model, starting it if it is not running.
    ReuseAndEnsureRunning(DeploymentService),
    DeployNew,
    ReplaceExisting(DeploymentService),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::ReuseAndEnsureRunning(_) => ActionKind::Reuse,
            Action::DeployNew => ActionKind::Deploy,
            Action::ReplaceExisting(_) => ActionKind::Replace,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeploymentDecisionEngine;

impl DeploymentDecisionEngine {
    /// `candidates` must be ordered most recent first, as returned by
    /// [crate::ServiceRegistry::find].
    pub fn decide(&self, request: &DeploymentRequest, candidates: &[DeploymentService]) -> Action {
        match (*request.deploy_decision(), candidates.first()) {
            (false, None) => Action::DeployNew,
            (false, Some(existing)) => Action::ReuseAndEnsureRunning(existing.clone()),
            (true, None) => Action::DeployNew,
            (true, Some(existing)) => Action::ReplaceExisting(existing.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::{PredictorKind, ServedLayout, ServiceIdentity};
    use rstest::rstest;

    fn request(deploy_decision: bool) -> DeploymentRequest {
        DeploymentRequest::builder()
            .identity(ServiceIdentity::new("p1", "s1", "m1"))
            .pipeline_run_id("run")
            .model_artifact_uri("/artifacts/model")
            .predictor_kind("sklearn")
            .deploy_decision(deploy_decision)
            .build()
            .unwrap()
    }

    fn service() -> DeploymentService {
        DeploymentService::new(
            ServiceIdentity::new("p1", "s1", "m1"),
            "run-0",
            ServedLayout::new("/served", PredictorKind::sklearn()),
        )
    }

    #[rstest]
    #[case(false, ActionKind::Deploy)]
    #[case(true, ActionKind::Deploy)]
    fn test_no_candidates_always_deploys(#[case] decision: bool, #[case] expected: ActionKind) {
        let action = DeploymentDecisionEngine.decide(&request(decision), &[]);
        assert_eq!(action, Action::DeployNew);
        assert_eq!(action.kind(), expected);
    }

    #[test]
    fn test_negative_decision_reuses_newest() {
        let newest = service();
        let older = service();
        let action =
            DeploymentDecisionEngine.decide(&request(false), &[newest.clone(), older]);
        assert_eq!(action, Action::ReuseAndEnsureRunning(newest));
    }

    #[test]
    fn test_positive_decision_replaces_newest() {
        let newest = service();
        let action = DeploymentDecisionEngine.decide(&request(true), &[newest.clone()]);
        assert_eq!(action, Action::ReplaceExisting(newest));
        assert_eq!(action.kind(), ActionKind::Replace);
    }
}
