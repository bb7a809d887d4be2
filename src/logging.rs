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

use std::sync::Once;

use serde::{Deserialize, Serialize};
use tracing_subscriber::prelude::*;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Once instance to ensure the logger is only initialized once
static INIT: Once = Once::new();

/// ENV used to set the log level
const FILTER_ENV: &str = "RUST_LOG";

/// Default log filter, anything RUST_LOG can take
const DEFAULT_DIRECTIVE: &str = "info";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Setup logging. You won't see any output unless you run this.
pub fn init() {
    init_with_format(LogFormat::default());
}

/// Setup logging with an explicit output format. Only the first call has any effect.
pub fn init_with_format(format: LogFormat) {
    INIT.call_once(|| {
        let filter_layer = EnvFilter::builder()
            .with_default_directive(
                DEFAULT_DIRECTIVE
                    .parse()
                    .unwrap_or_else(|_| LevelFilter::INFO.into()),
            )
            .with_env_var(FILTER_ENV)
            .from_env_lossy();

        match format {
            LogFormat::Compact => {
                let l = tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .event_format(tracing_subscriber::fmt::format().compact())
                    .with_writer(std::io::stderr)
                    .with_filter(filter_layer);
                let _ = tracing_subscriber::registry().with(l).try_init();
            }
            LogFormat::Json => {
                let l = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr)
                    .with_filter(filter_layer);
                let _ = tracing_subscriber::registry().with(l).try_init();
            }
        }
    });
}
