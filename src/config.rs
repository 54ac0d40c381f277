//! Detector Configuration

use crate::{DlhaError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable naming the JSON config file
pub const CONFIG_PATH_ENV: &str = "DLHA_CONFIG";
/// Environment override for the bundle location
pub const BUNDLE_PATH_ENV: &str = "DLHA_BUNDLE_PATH";
/// Environment override for the server listen address
pub const LISTEN_ADDR_ENV: &str = "DLHA_LISTEN_ADDR";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Preprocessing and arbitration settings
    pub pipeline: PipelineConfig,
    /// Layer-2 SVM training settings
    pub svm: SvmConfig,
    /// Inference server settings
    pub server: ServerConfig,
}

impl DetectorConfig {
    /// Load from file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| DlhaError::Config(format!("{}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save to file
    pub fn save(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from `DLHA_CONFIG` when set, then apply environment overrides.
    ///
    /// A missing or unreadable file falls back to defaults with a warning;
    /// a file that parses but fails validation is an error.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => match Self::load(&path) {
                Ok(config) => config,
                Err(DlhaError::Io(e)) => {
                    tracing::warn!("Config {} not readable ({}), using defaults", path, e);
                    Self::default()
                }
                Err(e) => return Err(e),
            },
            Err(_) => Self::default(),
        };

        if let Ok(path) = std::env::var(BUNDLE_PATH_ENV) {
            config.server.bundle_path = PathBuf::from(path);
        }
        if let Ok(addr) = std::env::var(LISTEN_ADDR_ENV) {
            config.server.listen_addr = addr;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if !(p.variance_target > 0.0 && p.variance_target <= 1.0) {
            return Err(DlhaError::Config(format!(
                "variance_target must be in (0, 1], got {}",
                p.variance_target
            )));
        }
        if !(0.0..=1.0).contains(&p.arbitration_threshold) {
            return Err(DlhaError::Config(format!(
                "arbitration_threshold must be in [0, 1], got {}",
                p.arbitration_threshold
            )));
        }

        let s = &self.svm;
        if !(s.c > 0.0) {
            return Err(DlhaError::Config(format!("svm.c must be positive, got {}", s.c)));
        }
        if let Some(gamma) = s.gamma {
            if !(gamma > 0.0) {
                return Err(DlhaError::Config(format!("svm.gamma must be positive, got {}", gamma)));
            }
        }
        if !(s.tolerance > 0.0) || s.max_iterations == 0 {
            return Err(DlhaError::Config("svm.tolerance and svm.max_iterations must be positive".into()));
        }
        Ok(())
    }
}

/// How the reported confidence relates to the chosen label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceMode {
    /// `max(layer-1 max, layer-2 max)`, regardless of which layer decided
    #[default]
    RawMaximum,
    /// Probability of the class that was actually chosen
    ChosenClass,
}

/// Preprocessing and arbitration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Cumulative explained variance the reducer must exceed
    pub variance_target: f64,
    /// Layer-1 max probability above which Layer-1 decides
    pub arbitration_threshold: f64,
    /// Confidence semantics
    pub confidence_mode: ConfidenceMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            variance_target: 0.95,
            arbitration_threshold: 0.8,
            confidence_mode: ConfidenceMode::RawMaximum,
        }
    }
}

/// Layer-2 SVM training settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmConfig {
    /// Soft-margin penalty
    pub c: f64,
    /// RBF kernel width; `None` derives `1 / (n_features * var(X))`
    pub gamma: Option<f64>,
    /// KKT violation tolerance for the SMO solver
    pub tolerance: f64,
    /// SMO iteration cap per binary machine
    pub max_iterations: usize,
}

impl Default for SvmConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            gamma: None,
            tolerance: 1e-3,
            max_iterations: 100_000,
        }
    }
}

/// Inference server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: String,
    /// Model bundle location
    pub bundle_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            bundle_path: PathBuf::from("model/dlha_bundle.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DetectorConfig::default();
        assert_eq!(config.pipeline.variance_target, 0.95);
        assert_eq!(config.pipeline.arbitration_threshold, 0.8);
        assert_eq!(config.pipeline.confidence_mode, ConfidenceMode::RawMaximum);
        assert_eq!(config.svm.c, 1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config: DetectorConfig = serde_json::from_str(
            r#"{"pipeline": {"confidence_mode": "chosen_class"}, "svm": {"gamma": 0.5}}"#,
        )
        .unwrap();
        assert_eq!(config.pipeline.confidence_mode, ConfidenceMode::ChosenClass);
        assert_eq!(config.pipeline.arbitration_threshold, 0.8);
        assert_eq!(config.svm.gamma, Some(0.5));
        assert_eq!(config.svm.max_iterations, 100_000);
    }

    #[test]
    fn test_validation() {
        let mut config = DetectorConfig::default();
        config.pipeline.variance_target = 1.5;
        assert!(matches!(config.validate(), Err(DlhaError::Config(_))));

        let mut config = DetectorConfig::default();
        config.svm.c = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlha.json");
        let path = path.to_str().unwrap();

        let mut config = DetectorConfig::default();
        config.server.listen_addr = "127.0.0.1:9000".into();
        config.save(path).unwrap();

        assert_eq!(DetectorConfig::load(path).unwrap(), config);
    }
}
