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

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

use crate::{errors::ActionKind, Result};

/// Prometheus metrics collection for deployment orchestration
#[derive(Clone)]
pub struct DeployerMetrics {
    registry: Registry,
    actions: IntCounterVec,
    failures: IntCounterVec,
    duration: HistogramVec,
}

impl std::fmt::Debug for DeployerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployerMetrics").finish_non_exhaustive()
    }
}

impl DeployerMetrics {
    /// Initialize all metrics on a private [Registry]
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let actions = IntCounterVec::new(
            Opts::new(
                "deployer_actions_total",
                "Deployment actions completed, by action",
            ),
            &["action"],
        )?;
        let failures = IntCounterVec::new(
            Opts::new(
                "deployer_failures_total",
                "Deployment actions that failed, by action and error kind",
            ),
            &["action", "kind"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "deployer_action_duration_seconds",
                "Time spent per deployment action",
            )
            .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
            &["action"],
        )?;

        registry.register(Box::new(actions.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry,
            actions,
            failures,
            duration,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Identities are left out of the labels; they are unbounded and belong in the logs.
    pub fn record_success(&self, action: ActionKind, elapsed_secs: f64) {
        self.actions.with_label_values(&[action.as_str()]).inc();
        self.duration
            .with_label_values(&[action.as_str()])
            .observe(elapsed_secs);
    }

    pub fn record_failure(&self, action: ActionKind, kind: &str, elapsed_secs: f64) {
        self.failures
            .with_label_values(&[action.as_str(), kind])
            .inc();
        self.duration
            .with_label_values(&[action.as_str()])
            .observe(elapsed_secs);
    }

    pub fn actions_total(&self, action: ActionKind) -> u64 {
        self.actions.with_label_values(&[action.as_str()]).get()
    }

    pub fn failures_total(&self, action: ActionKind, kind: &str) -> u64 {
        self.failures
            .with_label_values(&[action.as_str(), kind])
            .get()
    }

    /// Text exposition of every metric
    pub fn encode(&self) -> Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
