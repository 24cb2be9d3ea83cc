//! Baseline profiles
//!
//! A baseline profile lists, for one task type, the reference value of each
//! scored metric together with the directional rule that decides whether a
//! measurement counts as a risk indicator and the weight it contributes.

use crate::error::ScreeningError;
use crate::registry::TaskRegistry;
use crate::types::Metric;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Directional comparison between a measurement and its reference.
///
/// Serialized in the compact rule notation: `">="`, `"<="` or
/// `"abs-diff>THRESHOLD"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Direction {
    /// Fires when value >= reference
    AtLeast,
    /// Fires when value <= reference
    AtMost,
    /// Fires when |value - reference| > threshold
    AbsDiffAbove(f64),
}

impl Direction {
    /// Evaluate the rule
    pub fn fires(&self, value: f64, reference: f64) -> bool {
        match *self {
            Direction::AtLeast => value >= reference,
            Direction::AtMost => value <= reference,
            Direction::AbsDiffAbove(threshold) => (value - reference).abs() > threshold,
        }
    }

    /// Comparison symbol used in indicators
    pub fn symbol(&self) -> String {
        match self {
            Direction::AtLeast => ">=".to_string(),
            Direction::AtMost => "<=".to_string(),
            Direction::AbsDiffAbove(threshold) => format!("abs-diff>{threshold}"),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol())
    }
}

impl TryFrom<String> for Direction {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        match trimmed {
            ">=" => Ok(Direction::AtLeast),
            "<=" => Ok(Direction::AtMost),
            _ => {
                let threshold = trimmed
                    .strip_prefix("abs-diff>")
                    .ok_or_else(|| format!("unrecognized rule '{trimmed}'"))?;
                let threshold: f64 = threshold
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid abs-diff threshold in '{trimmed}'"))?;
                if !threshold.is_finite() || threshold < 0.0 {
                    return Err(format!("abs-diff threshold must be >= 0 in '{trimmed}'"));
                }
                Ok(Direction::AbsDiffAbove(threshold))
            }
        }
    }
}

impl From<Direction> for String {
    fn from(value: Direction) -> Self {
        value.symbol()
    }
}

/// One reference value with its rule and weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRule {
    pub metric: Metric,
    pub reference: f64,
    pub rule: Direction,
    pub weight: f64,
}

impl MetricRule {
    pub fn new(metric: Metric, reference: f64, rule: Direction, weight: f64) -> Self {
        Self {
            metric,
            reference,
            rule,
            weight,
        }
    }

    pub fn fires(&self, value: f64) -> bool {
        self.rule.fires(value, self.reference)
    }
}

/// Reference profile for one task type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineProfile {
    /// Baseline key referenced by task descriptors
    pub key: String,
    pub rules: Vec<MetricRule>,
}

impl BaselineProfile {
    pub fn new(key: impl Into<String>, rules: Vec<MetricRule>) -> Self {
        Self {
            key: key.into(),
            rules,
        }
    }

    /// Score reached when every rule fires
    pub fn max_score(&self) -> f64 {
        self.rules.iter().map(|r| r.weight).sum()
    }

    fn validate(&self) -> Result<(), ScreeningError> {
        for rule in &self.rules {
            if !rule.reference.is_finite() {
                return Err(ScreeningError::InvalidConfig(format!(
                    "baseline '{}' has a non-finite reference for {}",
                    self.key, rule.metric
                )));
            }
            if !rule.weight.is_finite() || rule.weight < 0.0 {
                return Err(ScreeningError::InvalidConfig(format!(
                    "baseline '{}' has a negative or non-finite weight for {}",
                    self.key, rule.metric
                )));
            }
        }
        Ok(())
    }
}

/// Baseline profiles addressed by baseline key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<BaselineProfile>", into = "Vec<BaselineProfile>")]
pub struct BaselineLibrary {
    profiles: BTreeMap<String, BaselineProfile>,
}

impl Default for BaselineLibrary {
    fn default() -> Self {
        let mut library = Self::empty();
        for profile in default_profiles() {
            library.insert(profile);
        }
        library
    }
}

/// Each key may appear once
impl TryFrom<Vec<BaselineProfile>> for BaselineLibrary {
    type Error = ScreeningError;

    fn try_from(profiles: Vec<BaselineProfile>) -> Result<Self, Self::Error> {
        let mut library = Self::empty();
        for profile in profiles {
            if library.profiles.contains_key(&profile.key) {
                return Err(ScreeningError::InvalidConfig(format!(
                    "duplicate baseline key '{}'",
                    profile.key
                )));
            }
            library.insert(profile);
        }
        Ok(library)
    }
}

impl From<BaselineLibrary> for Vec<BaselineProfile> {
    fn from(library: BaselineLibrary) -> Self {
        library.profiles.into_values().collect()
    }
}

impl BaselineLibrary {
    pub fn empty() -> Self {
        Self {
            profiles: BTreeMap::new(),
        }
    }

    /// Add or replace a profile
    pub fn insert(&mut self, profile: BaselineProfile) {
        self.profiles.insert(profile.key.clone(), profile);
    }

    pub fn get(&self, key: &str) -> Option<&BaselineProfile> {
        self.profiles.get(key)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn validate(&self) -> Result<(), ScreeningError> {
        self.profiles.values().try_for_each(BaselineProfile::validate)
    }

    /// Map each task of the registry to its profile
    pub fn resolve(&self, registry: &TaskRegistry) -> Result<BaselineTable, ScreeningError> {
        let mut table = BaselineTable::new();
        for (index, task) in registry.iter().enumerate() {
            let profile = self
                .get(&task.baseline_key)
                .ok_or_else(|| ScreeningError::UnknownBaseline(task.baseline_key.clone()))?;
            table.insert(index, profile.clone());
        }
        Ok(table)
    }
}

/// Baseline profiles addressed by task index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BaselineTable {
    profiles: BTreeMap<usize, BaselineProfile>,
}

impl BaselineTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task_index: usize, profile: BaselineProfile) {
        self.profiles.insert(task_index, profile);
    }

    pub fn get(&self, task_index: usize) -> Option<&BaselineProfile> {
        self.profiles.get(&task_index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&usize, &BaselineProfile)> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Load baseline table from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize baseline table to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Illustrative reference profiles for the built-in tasks.
///
/// These are threshold heuristics, not validated clinical cut-offs.
pub fn default_profiles() -> Vec<BaselineProfile> {
    use Direction::{AbsDiffAbove, AtLeast, AtMost};

    vec![
        BaselineProfile::new(
            "reading",
            vec![
                MetricRule::new(Metric::PitchMean, 145.0, AbsDiffAbove(40.0), 1.0),
                MetricRule::new(Metric::Jitter, 0.025, AtLeast, 2.0),
                MetricRule::new(Metric::Shimmer, 0.18, AtLeast, 2.0),
                MetricRule::new(Metric::Hnr, 8.5, AtMost, 1.0),
                MetricRule::new(Metric::AvgEar, 0.22, AtMost, 1.0),
            ],
        ),
        BaselineProfile::new(
            "vowel_with_motion",
            vec![
                MetricRule::new(Metric::Jitter, 0.02, AtLeast, 2.0),
                MetricRule::new(Metric::Shimmer, 0.15, AtLeast, 2.0),
                MetricRule::new(Metric::Hnr, 10.0, AtMost, 1.0),
                MetricRule::new(Metric::PitchStd, 25.0, AtLeast, 1.0),
                MetricRule::new(Metric::MouthRatio, 0.3, AtMost, 1.0),
                MetricRule::new(Metric::JawVariability, 8.0, AtLeast, 1.0),
            ],
        ),
        BaselineProfile::new(
            "breath_hold",
            vec![
                MetricRule::new(Metric::BreathDuration, 10.0, AtMost, 2.0),
                MetricRule::new(Metric::EarVariability, 0.05, AtLeast, 1.0),
                MetricRule::new(Metric::MouthRatio, 0.2, AtLeast, 1.0),
            ],
        ),
    ]
}
