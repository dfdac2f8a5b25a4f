// Layered configuration: defaults, global file, project file, CLI overrides

pub mod merger;

pub use merger::{
    ConfigMerger, PartialBridgeSettings, PartialConfig, PartialGenerationSettings,
    PartialLoggingConfig,
};

use crate::bridge::boundary::DEFAULT_BOUNDARY_CAPACITY;
use crate::controller::DEFAULT_INITIAL_PROGRESS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// env_logger filter level (`error`, `warn`, `info`, `debug`, `trace`)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BridgeSettings {
    /// Events buffered on the process boundary per consumer
    pub boundary_capacity: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            boundary_capacity: DEFAULT_BOUNDARY_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettings {
    /// Progress of the synthetic status emitted on start/refresh (1-99)
    pub initial_progress: u8,
    pub competitor_analysis_default: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            initial_progress: DEFAULT_INITIAL_PROGRESS,
            competitor_analysis_default: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenflowConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub generation: GenerationSettings,
}

/// Global config file: `<config dir>/genflow/config.yaml`
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("genflow").join("config.yaml"))
}

/// Read one config layer. A missing file is an empty layer.
pub fn load_partial(path: &Path) -> Result<Option<PartialConfig>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("[Config] No config at {:?}", path);
            return Ok(None);
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    // An empty file parses as YAML null
    if content.trim().is_empty() {
        return Ok(Some(PartialConfig::default()));
    }

    let partial = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    log::debug!("[Config] Loaded {:?}", path);
    Ok(Some(partial))
}

/// Load global and project layers and merge them over the defaults,
/// with `cli` on top
pub fn load_config(
    project_path: Option<&str>,
    cli: Option<PartialConfig>,
) -> Result<GenflowConfig, ConfigError> {
    let global = match global_config_path() {
        Some(path) => load_partial(&path)?,
        None => None,
    };
    let project = match project_path {
        Some(project_path) => load_partial(&crate::utils::config_path(project_path))?,
        None => None,
    };

    Ok(ConfigMerger::new()
        .with_global(global)
        .with_project(project)
        .with_cli(cli)
        .merge())
}
