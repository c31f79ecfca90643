//! Configuration management (TOML)

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::intake::DEFAULT_IMAGE_EXTENSIONS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    pub training: TrainingConfig,
    pub analysis: AnalysisConfig,
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub notifications: bool,
    pub default_model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    /// Fixed RNG seed; runs draw from OS entropy when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub tick_interval_ms: u64,
    pub max_increment: f64,
    pub accuracy_min: f64,
    pub accuracy_max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub benign_min: f64,
    pub benign_max: f64,
    pub malignant_min: f64,
    pub malignant_max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeConfig {
    pub extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            general: GeneralConfig {
                notifications: true,
                default_model_name: "CancerDetect v1.0".to_string(),
                database_path: None,
                seed: None,
            },
            training: TrainingConfig::default(),
            analysis: AnalysisConfig { tick_interval_ms: 1500 },
            scoring: ScoringConfig::default(),
            intake: IntakeConfig::default(),
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            tick_interval_ms: 500,
            max_increment: 15.0,
            accuracy_min: 85.0,
            accuracy_max: 95.0,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            benign_min: 0.2,
            benign_max: 0.8,
            malignant_min: 0.0,
            malignant_max: 0.4,
        }
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        IntakeConfig {
            extensions: DEFAULT_IMAGE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl TrainingConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl AnalysisConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Rejects ranges the samplers cannot draw from.
    pub fn validate(&self) -> anyhow::Result<()> {
        let s = &self.scoring;
        ensure_span("scoring.benign", s.benign_min, s.benign_max)?;
        anyhow::ensure!(s.benign_min < s.benign_max, "scoring.benign_min must be below benign_max");
        ensure_span("scoring.malignant", s.malignant_min, s.malignant_max)?;
        anyhow::ensure!(
            s.malignant_min < s.malignant_max,
            "scoring.malignant_min must be below malignant_max"
        );
        let t = &self.training;
        anyhow::ensure!(
            t.max_increment.is_finite() && t.max_increment > 0.0,
            "training.max_increment must be positive and finite"
        );
        ensure_span("training.accuracy", t.accuracy_min, t.accuracy_max)?;
        anyhow::ensure!(
            t.accuracy_min <= t.accuracy_max,
            "training.accuracy_min must not exceed accuracy_max"
        );
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "cancerdetect")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    pub fn database_path(&self) -> PathBuf {
        if let Some(path) = &self.general.database_path {
            return path.clone();
        }
        directories::ProjectDirs::from("", "", "cancerdetect")
            .map(|dirs| dirs.data_dir().join("cancerdetect.db"))
            .unwrap_or_else(|| PathBuf::from("cancerdetect.db"))
    }
}

/// Both bounds and the width between them must be finite.
fn ensure_span(name: &str, min: f64, max: f64) -> anyhow::Result<()> {
    anyhow::ensure!(
        min.is_finite() && max.is_finite() && (max - min).is_finite(),
        "{}_min and {}_max must be finite",
        name,
        name
    );
    Ok(())
}
