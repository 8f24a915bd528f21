//! Engine configuration loaded from YAML.

use std::fs;
use std::path::Path;

use aid_heatmap::HeatmapConfig;
use aid_index::IndexConfig;
use aid_match::MatcherConfig;
use aid_scoring::ScoringWeights;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::EngineError;

/// All tunables of the engine. Every section falls back to its defaults.
///
/// Example:
/// ```yaml
/// scoring:
///   coverage: 0.4
///   proximity: 0.15
/// matcher:
///   default_top_k: 5
/// heatmap:
///   coverage_weight: 0.3
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub index: IndexConfig,
    pub scoring: ScoringWeights,
    pub matcher: MatcherConfig,
    pub heatmap: HeatmapConfig,
}

impl EngineConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(s: &str) -> Result<Self, EngineError> {
        let cfg: EngineConfig =
            serde_yaml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("reading {}: {e}", path.display())))?;
        let cfg = Self::from_yaml_str(&raw)?;
        info!(path = %path.display(), "engine config loaded");
        Ok(cfg)
    }

    pub fn to_yaml_string(&self) -> Result<String, EngineError> {
        serde_yaml::to_string(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.index.validate().map_err(EngineError::Config)?;
        self.scoring.validate()?;
        self.matcher.validate().map_err(EngineError::Config)?;
        self.heatmap.validate().map_err(EngineError::Config)?;
        Ok(())
    }
}
