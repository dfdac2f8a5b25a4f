// Configuration merging with priority

use crate::config::{BridgeSettings, GenerationSettings, GenflowConfig, LoggingConfig};
use serde::{Deserialize, Serialize};

/// Partial configuration for merging
/// Uses Option<T> for all fields to support partial overrides
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartialConfig {
    #[serde(default)]
    pub logging: Option<PartialLoggingConfig>,
    #[serde(default)]
    pub bridge: Option<PartialBridgeSettings>,
    #[serde(default)]
    pub generation: Option<PartialGenerationSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartialLoggingConfig {
    pub level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartialBridgeSettings {
    pub boundary_capacity: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartialGenerationSettings {
    pub initial_progress: Option<u8>,
    pub competitor_analysis_default: Option<bool>,
}

/// Configuration merger
/// Priority order: CLI -> Project -> Global -> Defaults
pub struct ConfigMerger {
    defaults: GenflowConfig,
    global: Option<PartialConfig>,
    project: Option<PartialConfig>,
    cli: Option<PartialConfig>,
}

impl ConfigMerger {
    /// Create a new config merger with defaults
    pub fn new() -> Self {
        Self {
            defaults: GenflowConfig::default(),
            global: None,
            project: None,
            cli: None,
        }
    }

    pub fn with_global(mut self, config: Option<PartialConfig>) -> Self {
        self.global = config;
        self
    }

    pub fn with_project(mut self, config: Option<PartialConfig>) -> Self {
        self.project = config;
        self
    }

    pub fn with_cli(mut self, config: Option<PartialConfig>) -> Self {
        self.cli = config;
        self
    }

    /// Merge all layers with priority
    pub fn merge(&self) -> GenflowConfig {
        let mut result = self.defaults.clone();

        for layer in [&self.global, &self.project, &self.cli]
            .into_iter()
            .flatten()
        {
            result = Self::merge_partial(&result, layer);
        }

        // The synthetic start status must show movement but never look finished
        result.generation.initial_progress = result.generation.initial_progress.clamp(1, 99);
        result.bridge.boundary_capacity = result.bridge.boundary_capacity.max(1);
        result
    }

    fn merge_partial(base: &GenflowConfig, partial: &PartialConfig) -> GenflowConfig {
        GenflowConfig {
            logging: match &partial.logging {
                Some(p) => Self::merge_logging(&base.logging, p),
                None => base.logging.clone(),
            },
            bridge: match &partial.bridge {
                Some(p) => Self::merge_bridge(&base.bridge, p),
                None => base.bridge.clone(),
            },
            generation: match &partial.generation {
                Some(p) => Self::merge_generation(&base.generation, p),
                None => base.generation.clone(),
            },
        }
    }

    fn merge_logging(base: &LoggingConfig, partial: &PartialLoggingConfig) -> LoggingConfig {
        LoggingConfig {
            level: partial.level.clone().unwrap_or_else(|| base.level.clone()),
        }
    }

    fn merge_bridge(base: &BridgeSettings, partial: &PartialBridgeSettings) -> BridgeSettings {
        BridgeSettings {
            boundary_capacity: partial.boundary_capacity.unwrap_or(base.boundary_capacity),
        }
    }

    fn merge_generation(
        base: &GenerationSettings,
        partial: &PartialGenerationSettings,
    ) -> GenerationSettings {
        GenerationSettings {
            initial_progress: partial.initial_progress.unwrap_or(base.initial_progress),
            competitor_analysis_default: partial
                .competitor_analysis_default
                .unwrap_or(base.competitor_analysis_default),
        }
    }
}

impl Default for ConfigMerger {
    fn default() -> Self {
        Self::new()
    }
}
