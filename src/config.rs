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

//! Deployer settings.
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. built-in defaults
//! 2. a TOML file, `deployer.toml` or the path in `TRD_DEPLOYER_CONFIG`
//! 3. environment variables prefixed with `TRD_DEPLOYER_`; nested keys are separated by `__`,
//!    e.g. `TRD_DEPLOYER_LOCATOR__STAGING_ROOT=/mnt/served`
//!
//! Durations are human readable strings such as `"90s"` or `"5m"`.

use std::{collections::HashMap, time::Duration};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::{
    backend::BackendKind,
    locator::StagingPolicy,
    logging::LogFormat,
    protocols::{ServiceIdentity, DEFAULT_START_TIMEOUT},
    storage::{self, FilesystemConfig},
    ErrorContext, Result,
};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TRD_DEPLOYER_";

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "TRD_DEPLOYER_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "deployer.toml";

const DEFAULT_BACKEND_GRACE: Duration = Duration::from_secs(5);

mod human_duration {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(D::Error::custom)
    }
}

fn validate_nonzero(value: &Duration) -> std::result::Result<(), ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::new("zero_duration"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeployerSettings {
    /// Start timeout used by requests that do not set one
    #[serde(with = "human_duration")]
    #[validate(custom(function = "validate_nonzero"))]
    pub default_start_timeout: Duration,

    /// Extra time granted to the backend past a start timeout before the orchestrator gives
    /// up on the call
    #[serde(with = "human_duration")]
    pub backend_grace: Duration,

    pub backend: BackendKind,

    pub log_format: LogFormat,

    /// Filesystems registered with the storage registry
    #[validate(length(min = 1))]
    pub storage: Vec<FilesystemConfig>,

    #[validate(nested)]
    pub locator: LocatorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LocatorSettings {
    /// Root under which staged layouts are written
    #[validate(length(min = 1))]
    pub staging_root: String,

    /// Extra staging policies keyed by predictor kind
    #[serde(default)]
    pub policies: HashMap<String, StagingPolicy>,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            staging_root: std::env::temp_dir()
                .join("triton-model-deployer")
                .display()
                .to_string(),
            policies: HashMap::new(),
        }
    }
}

impl Default for DeployerSettings {
    fn default() -> Self {
        Self {
            default_start_timeout: DEFAULT_START_TIMEOUT,
            backend_grace: DEFAULT_BACKEND_GRACE,
            backend: BackendKind::default(),
            log_format: LogFormat::default(),
            storage: vec![FilesystemConfig::default()],
            locator: LocatorSettings::default(),
        }
    }
}

impl DeployerSettings {
    /// Load settings from defaults, the configuration file and the environment.
    pub fn from_settings() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_figment(Self::figment(&path))
    }

    /// The layered [Figment] used by [DeployerSettings::from_settings].
    pub fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]).split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let settings: Self = figment
            .extract()
            .context("failed to load deployer settings")?;
        settings
            .validate()
            .context("invalid deployer settings")?;
        Ok(settings)
    }

    /// Staging location for a run: `<staging_root>/<pipeline>/<step>/<model>/<run>`.
    pub fn served_root(&self, identity: &ServiceIdentity, pipeline_run_id: &str) -> String {
        let root = storage::join(&self.locator.staging_root, identity.pipeline_name());
        let root = storage::join(&root, identity.step_name());
        let root = storage::join(&root, identity.model_name());
        storage::join(&root, pipeline_run_id)
    }
}
