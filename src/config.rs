//! Screening configuration
//!
//! Tasks, baseline profiles, the risk scale and capture timing can all be
//! supplied from a TOML or JSON file. Sections that are left out keep their
//! built-in defaults.
//!
//! ```toml
//! [capture]
//! poll_interval_ms = 50
//!
//! [[risk_scale.bands]]
//! min_score = 0.0
//! level = "low"
//! ```

use crate::baseline::{BaselineLibrary, BaselineTable};
use crate::error::ScreeningError;
use crate::registry::{default_tasks, TaskRegistry};
use crate::scoring::{RiskScale, RiskScoringEngine};
use crate::types::TaskDescriptor;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreeningConfig {
    /// Ordered capture tasks
    pub tasks: Vec<TaskDescriptor>,
    /// Reference profiles, addressed by the tasks' baseline keys
    pub baselines: BaselineLibrary,
    /// Score to risk level mapping
    pub risk_scale: RiskScale,
    pub capture: CaptureSettings,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            tasks: default_tasks(),
            baselines: BaselineLibrary::default(),
            risk_scale: RiskScale::default(),
            capture: CaptureSettings::default(),
        }
    }
}

/// Capture loop timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Delay between camera polls
    pub poll_interval_ms: u64,
    /// Upper bound on every task's capture window, for dry runs
    pub duration_cap_ms: Option<u64>,
    /// Mouth ratio above which a held breath counts as released
    pub breath_release_mouth_ratio: f64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 33,
            duration_cap_ms: None,
            breath_release_mouth_ratio: 0.2,
        }
    }
}

impl CaptureSettings {
    fn validate(&self) -> Result<(), ScreeningError> {
        if self.poll_interval_ms == 0 {
            return Err(ScreeningError::InvalidConfig(
                "capture.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.duration_cap_ms == Some(0) {
            return Err(ScreeningError::InvalidConfig(
                "capture.duration_cap_ms must be positive when set".to_string(),
            ));
        }
        let ratio = self.breath_release_mouth_ratio;
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(ScreeningError::InvalidConfig(format!(
                "capture.breath_release_mouth_ratio must be positive, got {ratio}"
            )));
        }
        Ok(())
    }
}

impl ScreeningConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ScreeningError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ScreeningError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.json` files are read as JSON, anything else as TOML
    pub fn load(path: &Path) -> Result<Self, ScreeningError> {
        info!("Loading screening config: {}", path.display());
        let text = std::fs::read_to_string(path)?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let config = if is_json {
            Self::from_json_str(&text)?
        } else {
            Self::from_toml_str(&text)?
        };

        debug!(
            tasks = config.tasks.len(),
            baselines = config.baselines.len(),
            bands = config.risk_scale.bands().len(),
            "config loaded"
        );
        Ok(config)
    }

    /// Check every section and that each task resolves to a baseline
    pub fn validate(&self) -> Result<(), ScreeningError> {
        let registry = self.registry()?;
        self.baselines.validate()?;
        self.baselines.resolve(&registry)?;
        self.risk_scale.validate()?;
        self.capture.validate()
    }

    pub fn registry(&self) -> Result<TaskRegistry, ScreeningError> {
        TaskRegistry::new(self.tasks.clone())
    }

    /// Baseline profiles keyed by task index
    pub fn baseline_table(&self) -> Result<BaselineTable, ScreeningError> {
        self.baselines.resolve(&self.registry()?)
    }

    pub fn engine(&self) -> RiskScoringEngine {
        RiskScoringEngine::new(self.risk_scale.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RiskLevel;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_is_valid() {
        let config = ScreeningConfig::default();
        config.validate().unwrap();
        assert_eq!(config.baseline_table().unwrap().len(), 3);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ScreeningConfig::from_toml_str(
            r#"
            [capture]
            poll_interval_ms = 50

            [[risk_scale.bands]]
            min_score = 0.0
            level = "very_low"

            [[risk_scale.bands]]
            min_score = 5.0
            level = "very_high"
            "#,
        )
        .unwrap();

        assert_eq!(config.capture.poll_interval_ms, 50);
        assert_eq!(config.capture.breath_release_mouth_ratio, 0.2);
        assert_eq!(config.tasks, default_tasks());
        assert_eq!(config.risk_scale.classify(6.0), RiskLevel::VeryHigh);
    }

    #[test]
    fn test_custom_tasks_and_baselines() {
        let config = ScreeningConfig::from_toml_str(
            r#"
            [[tasks]]
            name = "sustained_a"
            modality = "voice"
            duration_seconds = 5
            instructions = "Say aaah"
            baseline_key = "vowel"

            [[baselines]]
            key = "vowel"

            [[baselines.rules]]
            metric = "jitter"
            reference = 0.02
            rule = ">="
            weight = 3.0
            "#,
        )
        .unwrap();

        let table = config.baseline_table().unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0).unwrap().max_score(), 3.0);
    }

    #[test]
    fn test_rejects_duplicate_baseline_keys() {
        let result = ScreeningConfig::from_toml_str(
            r#"
            [[baselines]]
            key = "reading"

            [[baselines.rules]]
            metric = "jitter"
            reference = 0.025
            rule = ">="
            weight = 2.0

            [[baselines]]
            key = "reading"

            [[baselines.rules]]
            metric = "hnr"
            reference = 8.5
            rule = "<="
            weight = 1.0
            "#,
        );

        let err = result.unwrap_err();
        assert!(matches!(err, ScreeningError::TomlError(_)));
        assert!(err.to_string().contains("duplicate baseline key 'reading'"));
    }

    #[test]
    fn test_rejects_unknown_baseline_key() {
        let result = ScreeningConfig::from_json_str(
            r#"{"tasks": [{"name": "x", "modality": "voice", "duration_seconds": 3,
                          "instructions": "", "baseline_key": "nope"}]}"#,
        );
        assert!(matches!(result, Err(ScreeningError::UnknownBaseline(_))));
    }

    #[test]
    fn test_rejects_bad_capture_settings() {
        let result = ScreeningConfig::from_toml_str("[capture]\npoll_interval_ms = 0\n");
        assert!(matches!(result, Err(ScreeningError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let result = ScreeningConfig::from_toml_str("tasks = 3");
        assert!(matches!(result, Err(ScreeningError::TomlError(_))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir()
            .join(format!("bioflux-config-{}.json", uuid::Uuid::new_v4()));
        let json = serde_json::to_string(&ScreeningConfig::default()).unwrap();
        std::fs::write(&path, json).unwrap();

        let loaded = ScreeningConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded, ScreeningConfig::default());
    }
}
