// Copyright 2025 the Corax Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use logforth::append;
use logforth::filter::env_filter::EnvFilterBuilder;
use logforth::filter::EnvFilter;
use logforth::layout;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<StderrAppenderConfig>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            stderr: Some(StderrAppenderConfig {
                filter: "INFO".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StderrAppenderConfig {
    pub filter: String,
}

/// Installs the process-wide logger. `RUST_LOG` overrides the configured
/// filter; a second call keeps the first installation.
pub fn init(config: &TelemetryConfig) {
    let Some(ref stderr) = config.log.stderr else {
        return;
    };
    let builder = logforth::builder().dispatch(|d| {
        d.filter(env_filter(&stderr.filter))
            .append(append::Stderr::default().with_layout(layout::TextLayout::default()))
    });
    let _ = builder.try_apply();
}

fn env_filter(default_spec: &str) -> EnvFilter {
    let spec = std::env::var("RUST_LOG").unwrap_or_else(|_| default_spec.to_string());
    let builder = EnvFilterBuilder::new()
        .try_parse(&spec)
        .unwrap_or_else(|_| panic!("failed to parse log filter: {spec}"));
    EnvFilter::new(builder)
}
