//! Core types for the biomarker-flux pipeline
//!
//! This module defines the data structures that flow through each stage of a
//! screening session: task descriptors, raw capture inputs, per-task samples,
//! and the scoring result.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Capture modality of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Read a passage aloud while the face is tracked
    Voice,
    /// Sustained phonation while moving the head
    VoiceWithMotion,
    /// Hold the breath while the face is tracked
    BreathHold,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Voice => "voice",
            Modality::VoiceWithMotion => "voice_with_motion",
            Modality::BreathHold => "breath_hold",
        }
    }

    /// Whether the microphone is recorded during this modality
    pub fn records_audio(&self) -> bool {
        matches!(self, Modality::Voice | Modality::VoiceWithMotion)
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of one capture task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Short task name used in indicators and reports
    pub name: String,
    /// Capture modality
    pub modality: Modality,
    /// Capture duration in seconds (positive)
    pub duration_seconds: u32,
    /// Instructions shown to the participant
    pub instructions: String,
    /// Key into the baseline library
    pub baseline_key: String,
}

/// A 2D landmark position in normalized image coordinates (0-1)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// One frame of face-mesh landmarks as produced by the landmark detector
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LandmarkFrame {
    pub landmarks: Vec<Point>,
}

/// A mono audio recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioClip {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl AudioClip {
    /// Duration of the clip in seconds
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Facial metrics extracted from a single landmark frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameMetrics {
    pub left_ear: f64,
    pub right_ear: f64,
    pub avg_ear: f64,
    pub mouth_ratio: f64,
    pub face_ratio: f64,
    pub face_width: f64,
    pub face_length: f64,
    pub jaw_width: f64,
    pub lip_distance: f64,
}

/// Acoustic features of one recording
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AcousticFeatures {
    /// Mean fundamental frequency (Hz)
    pub pitch_mean: f64,
    /// Standard deviation of the fundamental frequency (Hz)
    #[serde(default)]
    pub pitch_std: f64,
    /// Local jitter (fraction)
    pub jitter: f64,
    /// Local shimmer (fraction)
    pub shimmer: f64,
    /// Harmonics-to-noise ratio (dB)
    pub hnr: f64,
    #[serde(default)]
    pub spectral_centroid: f64,
    #[serde(default)]
    pub spectral_rolloff: f64,
    #[serde(default)]
    pub spectral_bandwidth: f64,
    #[serde(default)]
    pub zero_crossing_rate: f64,
    #[serde(default)]
    pub mfcc_mean: Vec<f64>,
    #[serde(default)]
    pub mfcc_std: Vec<f64>,
}

/// The result of one completed task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedSample {
    /// Index of the task in the registry
    pub task_index: usize,
    /// Name of the task that produced this sample
    pub task_name: String,
    /// Modality the sample was captured with
    pub modality: Modality,
    /// Per-frame facial metrics, in capture order
    #[serde(default)]
    pub frames: Vec<FrameMetrics>,
    /// Acoustic features, when audio was recorded and analyzed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acoustic: Option<AcousticFeatures>,
    /// Measured breath hold (breath_hold tasks only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breath_duration_seconds: Option<f64>,
    /// Extraction failures and other capture notes
    #[serde(default)]
    pub notes: Vec<String>,
}

impl CapturedSample {
    /// Create an empty sample for a task
    pub fn new(task_index: usize, task_name: impl Into<String>, modality: Modality) -> Self {
        Self {
            task_index,
            task_name: task_name.into(),
            modality,
            frames: Vec::new(),
            acoustic: None,
            breath_duration_seconds: None,
            notes: Vec::new(),
        }
    }

    /// Create an empty sample for the given descriptor
    pub fn for_task(task_index: usize, task: &TaskDescriptor) -> Self {
        Self::new(task_index, task.name.clone(), task.modality)
    }

    pub fn with_frames(mut self, frames: Vec<FrameMetrics>) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_acoustic(mut self, acoustic: AcousticFeatures) -> Self {
        self.acoustic = Some(acoustic);
        self
    }

    pub fn with_breath_duration(mut self, seconds: f64) -> Self {
        self.breath_duration_seconds = Some(seconds);
        self
    }

    /// Whether the sample holds any measured data
    pub fn has_data(&self) -> bool {
        !self.frames.is_empty()
            || self.acoustic.is_some()
            || self.breath_duration_seconds.is_some()
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Capturing,
    AwaitingAdvance,
    Completed,
    Aborted,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Aborted)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Capturing => "capturing",
            SessionStatus::AwaitingAdvance => "awaiting_advance",
            SessionStatus::Completed => "completed",
            SessionStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Every metric a baseline rule can reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    // Facial, averaged over frames
    LeftEar,
    RightEar,
    AvgEar,
    MouthRatio,
    FaceRatio,
    FaceWidth,
    FaceLength,
    JawWidth,
    LipDistance,
    // Facial, variability over frames
    JawVariability,
    EarVariability,
    // Acoustic
    PitchMean,
    PitchStd,
    Jitter,
    Shimmer,
    Hnr,
    SpectralCentroid,
    SpectralRolloff,
    SpectralBandwidth,
    ZeroCrossingRate,
    // Breath
    BreathDuration,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::LeftEar => "left_ear",
            Metric::RightEar => "right_ear",
            Metric::AvgEar => "avg_ear",
            Metric::MouthRatio => "mouth_ratio",
            Metric::FaceRatio => "face_ratio",
            Metric::FaceWidth => "face_width",
            Metric::FaceLength => "face_length",
            Metric::JawWidth => "jaw_width",
            Metric::LipDistance => "lip_distance",
            Metric::JawVariability => "jaw_variability",
            Metric::EarVariability => "ear_variability",
            Metric::PitchMean => "pitch_mean",
            Metric::PitchStd => "pitch_std",
            Metric::Jitter => "jitter",
            Metric::Shimmer => "shimmer",
            Metric::Hnr => "hnr",
            Metric::SpectralCentroid => "spectral_centroid",
            Metric::SpectralRolloff => "spectral_rolloff",
            Metric::SpectralBandwidth => "spectral_bandwidth",
            Metric::ZeroCrossingRate => "zero_crossing_rate",
            Metric::BreathDuration => "breath_duration",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordinal risk classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// No completed task could be scored
    Unknown,
    VeryLow,
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Unknown => "Unknown",
            RiskLevel::VeryLow => "Very Low",
            RiskLevel::Low => "Low",
            RiskLevel::Moderate => "Moderate",
            RiskLevel::High => "High",
            RiskLevel::VeryHigh => "Very High",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "unknown" => Ok(RiskLevel::Unknown),
            "very low" => Ok(RiskLevel::VeryLow),
            "low" => Ok(RiskLevel::Low),
            "moderate" => Ok(RiskLevel::Moderate),
            "high" => Ok(RiskLevel::High),
            "very high" => Ok(RiskLevel::VeryHigh),
            _ => Err(format!("unrecognized risk level '{s}'")),
        }
    }
}

/// Quality flags attached to a scoring result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringFlag {
    /// No completed task was available
    InsufficientData,
    /// Fewer tasks were scored than the session defines
    PartialSession,
    /// A sample had no baseline profile
    MissingBaseline,
    /// At least one rule referenced a metric absent from its sample
    MissingMetrics,
}

/// Evaluation of one rule against one aggregated metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricOutcome {
    pub metric: Metric,
    /// Aggregated measured value
    pub value: f64,
    /// Baseline reference value
    pub reference: f64,
    /// Rule symbol (">=", "<=", "abs-diff>t")
    pub rule: String,
    /// Weight contributed when fired
    pub weight: f64,
    pub fired: bool,
}

/// Per-task scoring detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskBreakdown {
    pub task_index: usize,
    pub task_name: String,
    /// Sum of weights of fired rules
    pub score: f64,
    /// Sum of weights of all rules in the task's profile
    pub max_score: f64,
    pub metrics: Vec<MetricOutcome>,
    /// Data that was expected but not available
    #[serde(default)]
    pub missing: Vec<String>,
}

/// Output of the risk scoring engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringResult {
    pub total_score: f64,
    pub max_possible_score: f64,
    pub risk_level: RiskLevel,
    pub indicators: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub breakdown: Vec<TaskBreakdown>,
    #[serde(default)]
    pub flags: Vec<ScoringFlag>,
}

impl ScoringResult {
    /// Result returned when nothing could be scored
    pub fn unknown() -> Self {
        Self {
            total_score: 0.0,
            max_possible_score: 0.0,
            risk_level: RiskLevel::Unknown,
            indicators: Vec::new(),
            recommendations: Vec::new(),
            breakdown: Vec::new(),
            flags: vec![ScoringFlag::InsufficientData],
        }
    }
}
