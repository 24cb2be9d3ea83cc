//! Risk scoring
//!
//! Compares each task's aggregated features against its baseline profile,
//! accumulates the weights of the rules that fire and maps the total onto an
//! ordinal risk level through a configurable step function.

use crate::baseline::BaselineTable;
use crate::error::ScreeningError;
use crate::features::aggregate_sample;
use crate::types::{
    CapturedSample, MetricOutcome, RiskLevel, ScoringFlag, ScoringResult, TaskBreakdown,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Lower bound (inclusive) of a risk level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskBand {
    pub min_score: f64,
    pub level: RiskLevel,
}

impl RiskBand {
    pub fn new(min_score: f64, level: RiskLevel) -> Self {
        Self { min_score, level }
    }
}

/// Monotonic step function from total score to risk level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScale {
    bands: Vec<RiskBand>,
}

impl Default for RiskScale {
    fn default() -> Self {
        Self::three_tier()
    }
}

impl RiskScale {
    /// Build a scale from ascending bands
    pub fn new(bands: Vec<RiskBand>) -> Result<Self, ScreeningError> {
        let scale = Self { bands };
        scale.validate()?;
        Ok(scale)
    }

    /// Low / Moderate / High
    pub fn three_tier() -> Self {
        Self {
            bands: vec![
                RiskBand::new(0.0, RiskLevel::Low),
                RiskBand::new(3.0, RiskLevel::Moderate),
                RiskBand::new(6.0, RiskLevel::High),
            ],
        }
    }

    /// Very Low / Low / Moderate / High / Very High
    pub fn five_tier() -> Self {
        Self {
            bands: vec![
                RiskBand::new(0.0, RiskLevel::VeryLow),
                RiskBand::new(2.0, RiskLevel::Low),
                RiskBand::new(4.0, RiskLevel::Moderate),
                RiskBand::new(7.0, RiskLevel::High),
                RiskBand::new(10.0, RiskLevel::VeryHigh),
            ],
        }
    }

    pub fn bands(&self) -> &[RiskBand] {
        &self.bands
    }

    /// Check that bounds and levels both strictly increase
    pub fn validate(&self) -> Result<(), ScreeningError> {
        if self.bands.is_empty() {
            return Err(ScreeningError::InvalidConfig(
                "risk scale needs at least one band".to_string(),
            ));
        }

        for band in &self.bands {
            if !band.min_score.is_finite() {
                return Err(ScreeningError::InvalidConfig(
                    "risk band bounds must be finite".to_string(),
                ));
            }
            if band.level == RiskLevel::Unknown {
                return Err(ScreeningError::InvalidConfig(
                    "'unknown' is reserved for sessions without data".to_string(),
                ));
            }
        }

        for pair in self.bands.windows(2) {
            if pair[1].min_score <= pair[0].min_score || pair[1].level <= pair[0].level {
                return Err(ScreeningError::InvalidConfig(format!(
                    "risk bands must ascend: {} at {} follows {} at {}",
                    pair[1].level, pair[1].min_score, pair[0].level, pair[0].min_score
                )));
            }
        }

        Ok(())
    }

    /// Level of the highest band whose bound the score reaches
    pub fn classify(&self, total_score: f64) -> RiskLevel {
        let mut level = match self.bands.first() {
            Some(band) => band.level,
            None => return RiskLevel::Unknown,
        };
        for band in &self.bands {
            if total_score >= band.min_score {
                level = band.level;
            }
        }
        level
    }
}

/// Baseline comparison engine
#[derive(Debug, Clone, Default)]
pub struct RiskScoringEngine {
    scale: RiskScale,
}

impl RiskScoringEngine {
    pub fn new(scale: RiskScale) -> Self {
        Self { scale }
    }

    pub fn scale(&self) -> &RiskScale {
        &self.scale
    }

    /// Score completed samples against their baselines.
    ///
    /// Samples are scored in the order given and are expected to carry
    /// distinct task indices. A result with an `Unknown` level is returned
    /// when no rule could be evaluated.
    pub fn score(&self, samples: &[CapturedSample], baselines: &BaselineTable) -> ScoringResult {
        if samples.is_empty() {
            return with_recommendations(ScoringResult::unknown());
        }

        let mut total_score = 0.0;
        let mut max_possible_score = 0.0;
        let mut indicators = Vec::new();
        let mut breakdown = Vec::with_capacity(samples.len());
        let mut flags = Vec::new();
        let mut evaluated_rules = 0usize;
        let mut scored_tasks = BTreeSet::new();

        for sample in samples {
            scored_tasks.insert(sample.task_index);
            let features = aggregate_sample(sample);
            let mut task = TaskBreakdown {
                task_index: sample.task_index,
                task_name: sample.task_name.clone(),
                score: 0.0,
                max_score: 0.0,
                metrics: Vec::new(),
                missing: sample.notes.clone(),
            };

            let Some(profile) = baselines.get(sample.task_index) else {
                push_flag(&mut flags, ScoringFlag::MissingBaseline);
                task.missing
                    .push(format!("no baseline profile for task {}", sample.task_index));
                breakdown.push(task);
                continue;
            };

            task.max_score = profile.max_score();

            for rule in &profile.rules {
                let Some(value) = features.get(rule.metric) else {
                    push_flag(&mut flags, ScoringFlag::MissingMetrics);
                    task.missing.push(format!("{} unavailable", rule.metric));
                    continue;
                };

                evaluated_rules += 1;
                let fired = rule.fires(value);
                if fired {
                    task.score += rule.weight;
                    indicators.push(format!(
                        "{}: {} {:.4} {} baseline {:.4} (+{})",
                        sample.task_name,
                        rule.metric,
                        value,
                        rule.rule,
                        rule.reference,
                        rule.weight
                    ));
                }

                task.metrics.push(MetricOutcome {
                    metric: rule.metric,
                    value,
                    reference: rule.reference,
                    rule: rule.rule.symbol(),
                    weight: rule.weight,
                    fired,
                });
            }

            debug!(
                task = %sample.task_name,
                score = task.score,
                max = task.max_score,
                "scored task"
            );

            total_score += task.score;
            max_possible_score += task.max_score;
            breakdown.push(task);
        }

        if baselines.iter().any(|(index, _)| !scored_tasks.contains(index)) {
            push_flag(&mut flags, ScoringFlag::PartialSession);
        }

        let risk_level = if evaluated_rules == 0 {
            push_flag(&mut flags, ScoringFlag::InsufficientData);
            RiskLevel::Unknown
        } else {
            self.scale.classify(total_score)
        };

        with_recommendations(ScoringResult {
            total_score,
            max_possible_score,
            risk_level,
            indicators,
            recommendations: Vec::new(),
            breakdown,
            flags,
        })
    }
}

fn push_flag(flags: &mut Vec<ScoringFlag>, flag: ScoringFlag) {
    if !flags.contains(&flag) {
        flags.push(flag);
    }
}

fn with_recommendations(mut result: ScoringResult) -> ScoringResult {
    result.recommendations = recommendations_for(result.risk_level)
        .iter()
        .map(|s| s.to_string())
        .collect();
    if result.flags.contains(&ScoringFlag::PartialSession) {
        result
            .recommendations
            .push("Repeat the remaining capture tasks for a complete assessment.".to_string());
    }
    result
}

/// Guidance text for a risk level
pub fn recommendations_for(level: RiskLevel) -> &'static [&'static str] {
    match level {
        RiskLevel::Unknown => &["Complete the capture tasks to obtain a risk estimate."],
        RiskLevel::VeryLow | RiskLevel::Low => &[
            "Maintain current healthy habits.",
            "Repeat the screening periodically.",
        ],
        RiskLevel::Moderate => &[
            "Monitor symptoms and repeat the screening in a few weeks.",
            "Consider a routine check-up including a blood glucose test.",
        ],
        RiskLevel::High | RiskLevel::VeryHigh => &[
            "Consult a healthcare provider for a clinical evaluation.",
            "Ask about HbA1c and fasting blood glucose testing.",
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::{BaselineLibrary, BaselineProfile, Direction, MetricRule};
    use crate::registry::TaskRegistry;
    use crate::types::{AcousticFeatures, FrameMetrics, Metric, Modality};
    use pretty_assertions::assert_eq;

    fn voice_profile() -> BaselineProfile {
        BaselineProfile::new(
            "voice",
            vec![
                MetricRule::new(Metric::Jitter, 0.025, Direction::AtLeast, 2.0),
                MetricRule::new(Metric::Shimmer, 0.18, Direction::AtLeast, 2.0),
                MetricRule::new(Metric::Hnr, 8.5, Direction::AtMost, 1.0),
            ],
        )
    }

    fn voice_sample(task_index: usize, jitter: f64) -> CapturedSample {
        CapturedSample::new(task_index, "reading", Modality::Voice).with_acoustic(
            AcousticFeatures {
                pitch_mean: 146.0,
                jitter,
                shimmer: 0.20,
                hnr: 7.0,
                ..Default::default()
            },
        )
    }

    fn single_task_table() -> BaselineTable {
        let mut table = BaselineTable::new();
        table.insert(0, voice_profile());
        table
    }

    #[test]
    fn test_voice_scenario() {
        let engine = RiskScoringEngine::default();
        let result = engine.score(&[voice_sample(0, 0.030)], &single_task_table());

        assert_eq!(result.total_score, 5.0);
        assert_eq!(result.max_possible_score, 5.0);
        assert_eq!(result.indicators.len(), 3);
        assert!(result.indicators.iter().all(|i| i.starts_with("reading:")));
        assert!(result.indicators[0].contains("jitter"));
        assert!(result.indicators[1].contains("shimmer"));
        assert!(result.indicators[2].contains("hnr"));
        assert_eq!(result.risk_level, RiskLevel::Moderate);
        assert_eq!(result.breakdown[0].score, 5.0);
    }

    #[test]
    fn test_empty_input_is_unknown() {
        let engine = RiskScoringEngine::default();
        let result = engine.score(&[], &single_task_table());

        assert_eq!(result.total_score, 0.0);
        assert_eq!(result.risk_level, RiskLevel::Unknown);
        assert!(result.flags.contains(&ScoringFlag::InsufficientData));
        assert!(result.breakdown.is_empty());
        assert!(!result.recommendations.is_empty());
    }

    #[test]
    fn test_sample_without_data_is_unknown() {
        let engine = RiskScoringEngine::default();
        let mut sample = CapturedSample::new(0, "reading", Modality::Voice);
        sample.notes.push("audio: device error".to_string());

        let result = engine.score(&[sample], &single_task_table());

        assert_eq!(result.risk_level, RiskLevel::Unknown);
        assert_eq!(result.breakdown.len(), 1);
        assert!(result.breakdown[0]
            .missing
            .iter()
            .any(|m| m == "audio: device error"));
        assert!(result.breakdown[0]
            .missing
            .iter()
            .any(|m| m == "jitter unavailable"));
        assert!(result.flags.contains(&ScoringFlag::MissingMetrics));
    }

    #[test]
    fn test_deterministic() {
        let engine = RiskScoringEngine::new(RiskScale::five_tier());
        let table = BaselineLibrary::default()
            .resolve(&TaskRegistry::default())
            .unwrap();
        let samples = vec![
            voice_sample(0, 0.031),
            CapturedSample::new(2, "breath_hold", Modality::BreathHold)
                .with_frames(vec![FrameMetrics::default(); 4])
                .with_breath_duration(8.0),
        ];

        let first = engine.score(&samples, &table);
        let second = engine.score(&samples, &table);
        assert_eq!(first, second);
    }

    #[test]
    fn test_monotonic_in_deviation() {
        let engine = RiskScoringEngine::default();
        let table = single_task_table();

        let mut previous = 0.0;
        for step in 0..20 {
            let jitter = 0.010 + f64::from(step) * 0.002;
            let total = engine.score(&[voice_sample(0, jitter)], &table).total_score;
            assert!(total >= previous, "score dropped at jitter {jitter}");
            previous = total;
        }
    }

    #[test]
    fn test_monotonic_below_reference() {
        // hnr fires at or below 8.5, so a falling hnr never lowers the score
        let engine = RiskScoringEngine::default();
        let table = single_task_table();

        let mut previous = 0.0;
        for step in 0..20 {
            let hnr = 12.0 - f64::from(step) * 0.4;
            let mut sample = voice_sample(0, 0.010);
            if let Some(acoustic) = sample.acoustic.as_mut() {
                acoustic.hnr = hnr;
            }
            let total = engine.score(&[sample], &table).total_score;
            assert!(total >= previous, "score dropped at hnr {hnr}");
            previous = total;
        }
        assert_eq!(previous, 3.0);
    }

    #[test]
    fn test_monotonic_in_distance_from_reference() {
        let engine = RiskScoringEngine::default();
        let mut table = BaselineTable::new();
        table.insert(
            0,
            BaselineProfile::new(
                "pitch",
                vec![MetricRule::new(
                    Metric::PitchMean,
                    145.0,
                    Direction::AbsDiffAbove(15.0),
                    1.5,
                )],
            ),
        );

        for sign in [1.0, -1.0] {
            let mut previous = 0.0;
            for step in 0..20 {
                let pitch = 145.0 + sign * f64::from(step) * 2.0;
                let mut sample = voice_sample(0, 0.010);
                if let Some(acoustic) = sample.acoustic.as_mut() {
                    acoustic.pitch_mean = pitch;
                }
                let total = engine.score(&[sample], &table).total_score;
                assert!(total >= previous, "score dropped at pitch {pitch}");
                previous = total;
            }
            assert_eq!(previous, 1.5);
        }
    }

    #[test]
    fn test_order_of_samples_does_not_change_totals() {
        let engine = RiskScoringEngine::default();
        let table = BaselineLibrary::default()
            .resolve(&TaskRegistry::default())
            .unwrap();
        let breath = CapturedSample::new(2, "breath_hold", Modality::BreathHold)
            .with_frames(vec![FrameMetrics::default(); 4])
            .with_breath_duration(8.0);

        let forward = engine.score(&[voice_sample(0, 0.031), breath.clone()], &table);
        let reversed = engine.score(&[breath, voice_sample(0, 0.031)], &table);

        assert_eq!(forward.total_score, reversed.total_score);
        assert_eq!(forward.max_possible_score, reversed.max_possible_score);
        assert_eq!(forward.risk_level, reversed.risk_level);
        assert_eq!(forward.flags, reversed.flags);
        assert_eq!(reversed.breakdown[0].task_index, 2);
    }

    #[test]
    fn test_repeated_task_still_partial() {
        let engine = RiskScoringEngine::default();
        let table = BaselineLibrary::default()
            .resolve(&TaskRegistry::default())
            .unwrap();

        let samples = vec![
            voice_sample(0, 0.030),
            voice_sample(0, 0.030),
            voice_sample(0, 0.030),
        ];
        let result = engine.score(&samples, &table);

        assert!(result.flags.contains(&ScoringFlag::PartialSession));
    }

    #[test]
    fn test_partial_session_flag() {
        let engine = RiskScoringEngine::default();
        let table = BaselineLibrary::default()
            .resolve(&TaskRegistry::default())
            .unwrap();

        let result = engine.score(&[voice_sample(0, 0.030)], &table);

        assert!(result.flags.contains(&ScoringFlag::PartialSession));
        assert_eq!(result.breakdown.len(), 1);
        assert_eq!(result.breakdown[0].task_index, 0);
        // reading profile carries five rules, AvgEar is missing without frames
        assert_eq!(result.max_possible_score, 7.0);
        assert!(result.breakdown[0]
            .missing
            .contains(&"avg_ear unavailable".to_string()));
    }

    #[test]
    fn test_missing_baseline() {
        let engine = RiskScoringEngine::default();
        let result = engine.score(&[voice_sample(4, 0.030)], &single_task_table());

        assert!(result.flags.contains(&ScoringFlag::MissingBaseline));
        assert_eq!(result.risk_level, RiskLevel::Unknown);
    }

    #[test]
    fn test_scale_classification() {
        let three = RiskScale::three_tier();
        assert_eq!(three.classify(0.0), RiskLevel::Low);
        assert_eq!(three.classify(2.9), RiskLevel::Low);
        assert_eq!(three.classify(3.0), RiskLevel::Moderate);
        assert_eq!(three.classify(40.0), RiskLevel::High);

        let five = RiskScale::five_tier();
        assert_eq!(five.classify(1.0), RiskLevel::VeryLow);
        assert_eq!(five.classify(5.0), RiskLevel::Moderate);
        assert_eq!(five.classify(10.0), RiskLevel::VeryHigh);
    }

    #[test]
    fn test_scale_rejects_non_monotonic_bands() {
        let bands = vec![
            RiskBand::new(0.0, RiskLevel::High),
            RiskBand::new(3.0, RiskLevel::Low),
        ];
        assert!(RiskScale::new(bands).is_err());

        let bands = vec![
            RiskBand::new(3.0, RiskLevel::Low),
            RiskBand::new(3.0, RiskLevel::High),
        ];
        assert!(RiskScale::new(bands).is_err());

        assert!(RiskScale::new(Vec::new()).is_err());
    }
}
