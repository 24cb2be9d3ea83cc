//! Pipeline orchestration
//!
//! This module provides the public API for biomarker-flux: a stateless
//! JSON-in/JSON-out scoring entry point and a stateful service that owns the
//! capture devices, the session controller and the scoring configuration.

use crate::capture::{CaptureBackend, CaptureDriver, SessionOutcome};
use crate::config::ScreeningConfig;
use crate::error::ScreeningError;
use crate::features::FeatureExtractor;
use crate::report::ReportFormatter;
use crate::session::TaskSessionController;
use crate::types::{CapturedSample, ScoringResult, SessionStatus};
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Score a JSON array of captured samples.
///
/// # Arguments
/// * `samples_json` - JSON array of `CapturedSample`
/// * `config` - Tasks, baselines and risk scale; built-in defaults when `None`
///
/// # Returns
/// The `ScoringResult` as JSON
///
/// # Example
/// ```ignore
/// let result_json = score_samples_json(r#"[{"task_index": 0, ...}]"#, None)?;
/// ```
pub fn score_samples_json(
    samples_json: &str,
    config: Option<&ScreeningConfig>,
) -> Result<String, ScreeningError> {
    let samples = parse_samples(samples_json)?;
    let result = match config {
        Some(config) => score_samples(&samples, config)?,
        None => score_samples(&samples, &ScreeningConfig::default())?,
    };
    Ok(serde_json::to_string(&result)?)
}

/// Score already parsed samples under a configuration
pub fn score_samples(
    samples: &[CapturedSample],
    config: &ScreeningConfig,
) -> Result<ScoringResult, ScreeningError> {
    config.validate()?;
    ensure_distinct_tasks(samples)?;
    let table = config.baseline_table()?;
    let result = config.engine().score(samples, &table);
    debug!(
        samples = samples.len(),
        total = result.total_score,
        level = %result.risk_level,
        "scored samples"
    );
    Ok(result)
}

/// Reject inputs carrying more than one sample for the same task
fn ensure_distinct_tasks(samples: &[CapturedSample]) -> Result<(), ScreeningError> {
    let mut seen = BTreeSet::new();
    for sample in samples {
        if !seen.insert(sample.task_index) {
            return Err(ScreeningError::ParseError(format!(
                "duplicate sample for task {}",
                sample.task_index
            )));
        }
    }
    Ok(())
}

/// Parse a JSON array of captured samples
pub fn parse_samples(samples_json: &str) -> Result<Vec<CapturedSample>, ScreeningError> {
    serde_json::from_str(samples_json)
        .map_err(|e| ScreeningError::ParseError(format!("samples: {e}")))
}

/// Render a scoring result JSON as a text report
pub fn render_report_json(result_json: &str) -> Result<String, ScreeningError> {
    let result: ScoringResult = serde_json::from_str(result_json)
        .map_err(|e| ScreeningError::ParseError(format!("scoring result: {e}")))?;
    Ok(ReportFormatter::new().render(&result))
}

/// Stateful screening service.
///
/// Collaborators are injected at construction; nothing is touched until
/// [`ScreeningService::initialize`] is called.
pub struct ScreeningService<B, X> {
    config: ScreeningConfig,
    driver: CaptureDriver<B, X>,
    controller: Option<TaskSessionController>,
    formatter: ReportFormatter,
}

impl<B: CaptureBackend, X: FeatureExtractor> ScreeningService<B, X> {
    pub fn new(backend: B, extractor: X, config: ScreeningConfig) -> Self {
        let driver = CaptureDriver::new(backend, extractor, config.capture.clone());
        Self {
            config,
            driver,
            controller: None,
            formatter: ReportFormatter::new(),
        }
    }

    /// Use a specific report formatter
    pub fn with_formatter(mut self, formatter: ReportFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn config(&self) -> &ScreeningConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.controller.is_some()
    }

    /// Validate the configuration and build the session controller
    pub fn initialize(&mut self) -> Result<(), ScreeningError> {
        self.config.validate()?;
        let registry = self.config.registry()?;
        let baselines = self.config.baselines.resolve(&registry)?;
        let controller = TaskSessionController::new(registry, baselines, self.config.engine());

        info!(
            tasks = controller.registry().len(),
            total_seconds = controller.registry().total_duration_seconds(),
            "screening service initialized"
        );
        self.controller = Some(controller);
        Ok(())
    }

    /// Session controller, once initialized
    pub fn controller(&self) -> Option<&TaskSessionController> {
        self.controller.as_ref()
    }

    /// Capture and score a full session
    pub fn run_session(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, ScreeningError> {
        let controller = self.controller.as_mut().ok_or(ScreeningError::NotReady {
            status: SessionStatus::Idle,
        })?;
        self.driver.run_session(controller, cancel)
    }

    /// Score externally captured samples with this service's configuration
    pub fn score(&self, samples: &[CapturedSample]) -> Result<ScoringResult, ScreeningError> {
        let controller = self.controller.as_ref().ok_or(ScreeningError::NotReady {
            status: SessionStatus::Idle,
        })?;
        ensure_distinct_tasks(samples)?;
        Ok(self.config.engine().score(samples, controller.baselines()))
    }

    pub fn render_report(&self, result: &ScoringResult) -> String {
        self.formatter.render(result)
    }

    /// Abort any unfinished session and drop the session state
    pub fn shutdown(&mut self) {
        if let Some(mut controller) = self.controller.take() {
            let status = controller.status();
            if status != SessionStatus::Idle && !status.is_terminal() {
                let _ = controller.abort();
            }
            info!(
                session = %controller.session_id(),
                status = %controller.status(),
                "screening service shut down"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Camera, DeviceLease, Microphone};
    use crate::features::{AcousticAnalyzer, LandmarkFeatureExtractor};
    use crate::report::parse_summary;
    use chrono::{TimeZone, Utc};
    use crate::types::{
        AcousticFeatures, AudioClip, FrameMetrics, LandmarkFrame, Modality, RiskLevel, ScoringFlag,
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    struct SilentMicrophone;

    impl Microphone for SilentMicrophone {
        fn record(
            &mut self,
            _duration: Duration,
            _cancel: &CancellationToken,
        ) -> Result<AudioClip, ScreeningError> {
            Ok(AudioClip {
                sample_rate: 8_000,
                samples: vec![0.1; 80],
            })
        }

        fn release(&mut self) {}
    }

    struct NoFaceCamera;

    impl Camera for NoFaceCamera {
        fn next_frame(&mut self) -> Result<Option<LandmarkFrame>, ScreeningError> {
            Ok(None)
        }

        fn release(&mut self) {}
    }

    struct StubBackend;

    impl CaptureBackend for StubBackend {
        fn acquire(&self) -> Result<DeviceLease, ScreeningError> {
            Ok(DeviceLease::new(
                Box::new(SilentMicrophone),
                Box::new(NoFaceCamera),
            ))
        }
    }

    struct HoarseVoice;

    impl AcousticAnalyzer for HoarseVoice {
        fn analyze(&self, _clip: &AudioClip) -> Result<AcousticFeatures, ScreeningError> {
            Ok(AcousticFeatures {
                pitch_mean: 146.0,
                jitter: 0.030,
                shimmer: 0.20,
                hnr: 7.0,
                ..Default::default()
            })
        }
    }

    fn service() -> ScreeningService<StubBackend, LandmarkFeatureExtractor<HoarseVoice>> {
        let mut config = ScreeningConfig::default();
        config.capture.poll_interval_ms = 1;
        config.capture.duration_cap_ms = Some(10);
        ScreeningService::new(
            StubBackend,
            LandmarkFeatureExtractor::new(HoarseVoice),
            config,
        )
    }

    const SAMPLES: &str = r#"[
        {"task_index": 0, "task_name": "reading", "modality": "voice",
         "acoustic": {"pitch_mean": 146.0, "jitter": 0.030, "shimmer": 0.20, "hnr": 7.0}}
    ]"#;

    #[test]
    fn test_score_samples_json() {
        let json = score_samples_json(SAMPLES, None).unwrap();
        let result: ScoringResult = serde_json::from_str(&json).unwrap();

        assert_eq!(result.total_score, 5.0);
        assert_eq!(result.indicators.len(), 3);
        assert_eq!(result.breakdown.len(), 1);
    }

    #[test]
    fn test_score_samples_json_empty() {
        let json = score_samples_json("[]", None).unwrap();
        let result: ScoringResult = serde_json::from_str(&json).unwrap();

        assert_eq!(result.risk_level, RiskLevel::Unknown);
        assert_eq!(result.total_score, 0.0);
    }

    #[test]
    fn test_score_samples_json_invalid() {
        let err = score_samples_json("{not json", None).unwrap_err();
        assert!(matches!(err, ScreeningError::ParseError(_)));
    }

    #[test]
    fn test_score_samples_json_rejects_repeated_task() {
        let sample = r#"{"task_index": 0, "task_name": "reading", "modality": "voice",
            "acoustic": {"pitch_mean": 146.0, "jitter": 0.030, "shimmer": 0.20, "hnr": 7.0}}"#;
        let json = format!("[{sample}, {sample}, {sample}]");

        let err = score_samples_json(&json, None).unwrap_err();
        assert!(matches!(err, ScreeningError::ParseError(ref m) if m.contains("task 0")));
    }

    #[test]
    fn test_score_samples_out_of_order() {
        let mut samples = vec![CapturedSample::new(2, "breath_hold", Modality::BreathHold)
            .with_frames(vec![FrameMetrics::default(); 2])
            .with_breath_duration(6.0)];
        samples.extend(parse_samples(SAMPLES).unwrap());

        let result = score_samples(&samples, &ScreeningConfig::default()).unwrap();

        // reading fires 5, breath_duration <= 10 adds 2
        assert_eq!(result.total_score, 7.0);
        assert_eq!(result.max_possible_score, 11.0);
        assert_eq!(result.risk_level, RiskLevel::High);
        assert!(result.flags.contains(&ScoringFlag::PartialSession));
        assert_eq!(result.breakdown[0].task_index, 2);
        assert_eq!(result.breakdown[1].task_index, 0);
    }

    #[test]
    fn test_render_report_json() {
        let json = score_samples_json(SAMPLES, None).unwrap();
        let report = render_report_json(&json).unwrap();

        let summary = parse_summary(&report).unwrap();
        assert_eq!(summary.total_score, 5.0);
        assert_eq!(summary.risk_level, RiskLevel::Moderate);
    }

    #[test]
    fn test_service_requires_initialize() {
        let mut service = service();

        assert!(matches!(
            service.run_session(&CancellationToken::new()),
            Err(ScreeningError::NotReady { .. })
        ));
        assert!(service.score(&[]).is_err());
    }

    #[test]
    fn test_service_session() {
        let mut service = service();
        service.initialize().unwrap();

        let outcome = service.run_session(&CancellationToken::new()).unwrap();
        assert!(outcome.is_completed());

        let result = outcome.result();
        // both voice tasks see the same hoarse voice
        assert!(result.indicators.iter().any(|i| i.starts_with("reading:")));
        assert!(result
            .indicators
            .iter()
            .any(|i| i.starts_with("vowel_with_motion:")));

        let report = service.render_report(result);
        assert!(report.contains("Risk Level:"));

        service.shutdown();
        assert!(!service.is_initialized());
    }

    #[test]
    fn test_service_score_matches_stateless() {
        let mut service = service();
        service.initialize().unwrap();

        let samples = parse_samples(SAMPLES).unwrap();
        let from_service = service.score(&samples).unwrap();
        let stateless: ScoringResult =
            serde_json::from_str(&score_samples_json(SAMPLES, None).unwrap()).unwrap();

        assert_eq!(from_service, stateless);
    }

    #[test]
    fn test_service_rejects_repeated_task() {
        let mut service = service();
        service.initialize().unwrap();

        let mut samples = parse_samples(SAMPLES).unwrap();
        samples.push(samples[0].clone());

        assert!(matches!(
            service.score(&samples),
            Err(ScreeningError::ParseError(_))
        ));
    }

    #[test]
    fn test_service_uses_pinned_formatter() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut service =
            service().with_formatter(ReportFormatter::new().with_generated_at(at));
        service.initialize().unwrap();

        let result = service.score(&parse_samples(SAMPLES).unwrap()).unwrap();
        let report = service.render_report(&result);

        assert!(report.contains("Generated: 2024-03-01T12:00:00+00:00"));
        assert!(report.contains("Total Score: 5 / 7"));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = ScreeningConfig::default();
        config.tasks.clear();
        let mut service = ScreeningService::new(
            StubBackend,
            LandmarkFeatureExtractor::new(HoarseVoice),
            config,
        );

        assert!(matches!(
            service.initialize(),
            Err(ScreeningError::InvalidConfig(_))
        ));
    }
}
