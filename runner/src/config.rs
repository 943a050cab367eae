//! Configuration of the test runner binary.

use crate::{models::ImageLists, orchestrator::OrchestratorConfig, trace::TraceConfiguration};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Configuration of a test run.
///
/// # Examples
///
/// ```
/// use dap_interop_runner::config::RunnerConfig;
///
/// let yaml_config = r#"
/// ---
/// images:
///   client: [janus_interop_client]
///   leader: [janus_interop_aggregator]
///   helper: [janus_interop_aggregator, daphne_interop]
///   collector: [janus_interop_collector]
/// "#;
///
/// let _decoded: RunnerConfig = serde_yaml::from_str(yaml_config).unwrap();
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Images to test. May be replaced entirely by command line arguments.
    #[serde(default)]
    pub images: ImageLists,

    /// Logging configuration.
    #[serde(default)]
    pub logging_config: TraceConfiguration,

    #[serde(flatten)]
    pub orchestrator: OrchestratorConfig,
}

/// Reads and parses the configuration file at `path`.
pub fn read_config(path: &Path) -> Result<RunnerConfig> {
    let config_content = fs::read_to_string(path)
        .with_context(|| format!("couldn't read config file {path:?}"))?;
    serde_yaml::from_str(&config_content)
        .with_context(|| format!("couldn't parse config file {path:?}"))
}
