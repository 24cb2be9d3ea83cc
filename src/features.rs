//! Feature extraction and aggregation
//!
//! This module is the boundary to the signal feature extractors:
//! - Facial metrics derived from face-mesh landmark geometry
//! - Acoustic features delegated to an external analyzer, with NaN coercion
//! - Aggregation of a task's frames and recordings into one value per metric

use crate::error::ScreeningError;
use crate::types::{
    AcousticFeatures, AudioClip, CapturedSample, FrameMetrics, LandmarkFrame, Metric, Modality,
    Point,
};
use std::collections::BTreeMap;

/// Frame width the normalized landmarks are scaled to
pub const FRAME_WIDTH: f64 = 640.0;
/// Frame height the normalized landmarks are scaled to
pub const FRAME_HEIGHT: f64 = 480.0;
/// Landmark count of a face mesh without iris refinement
pub const MIN_LANDMARKS: usize = 468;

/// Left eye contour: corner, upper, upper, corner, lower, lower
const LEFT_EYE: [usize; 6] = [33, 160, 158, 133, 153, 144];
/// Right eye contour, same ordering as the left eye
const RIGHT_EYE: [usize; 6] = [362, 385, 387, 263, 373, 380];
const MOUTH_LEFT: usize = 61;
const MOUTH_RIGHT: usize = 405;
const MOUTH_TOP: usize = 17;
const MOUTH_BOTTOM: usize = 307;
const NOSE_TIP: usize = 1;
const CHIN: usize = 18;
const LEFT_CHEEK: usize = 116;
const RIGHT_CHEEK: usize = 345;
const LEFT_JAW: usize = 172;
const RIGHT_JAW: usize = 397;
const UPPER_INNER_LIP: usize = 13;
const LOWER_INNER_LIP: usize = 14;

/// Eye aspect ratio over six eye points.
///
/// `(|p1 - p5| + |p2 - p4|) / (2 * |p0 - p3|)`; zero when the eye corners
/// coincide.
pub fn eye_aspect_ratio(points: &[Point; 6]) -> f64 {
    let vertical_a = points[1].distance(&points[5]);
    let vertical_b = points[2].distance(&points[4]);
    let horizontal = points[0].distance(&points[3]);

    if horizontal <= 0.0 {
        return 0.0;
    }
    (vertical_a + vertical_b) / (2.0 * horizontal)
}

/// Ratio that yields zero instead of dividing by zero
fn guarded_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Compute the facial metrics of one landmark frame
pub fn extract_facial_metrics(frame: &LandmarkFrame) -> Result<FrameMetrics, ScreeningError> {
    if frame.landmarks.len() < MIN_LANDMARKS {
        return Err(ScreeningError::FeatureExtractionFailed(format!(
            "frame has {} landmarks, need at least {MIN_LANDMARKS}",
            frame.landmarks.len()
        )));
    }

    let px = |index: usize| {
        let p = frame.landmarks[index];
        Point::new(p.x * FRAME_WIDTH, p.y * FRAME_HEIGHT)
    };
    let eye = |indices: &[usize; 6]| {
        let mut points = [Point::default(); 6];
        for (slot, &index) in points.iter_mut().zip(indices) {
            *slot = px(index);
        }
        points
    };

    let left_ear = eye_aspect_ratio(&eye(&LEFT_EYE));
    let right_ear = eye_aspect_ratio(&eye(&RIGHT_EYE));

    let mouth_width = px(MOUTH_LEFT).distance(&px(MOUTH_RIGHT));
    let mouth_height = px(MOUTH_TOP).distance(&px(MOUTH_BOTTOM));

    let face_length = px(NOSE_TIP).distance(&px(CHIN));
    let face_width = px(LEFT_CHEEK).distance(&px(RIGHT_CHEEK));

    Ok(FrameMetrics {
        left_ear,
        right_ear,
        avg_ear: (left_ear + right_ear) / 2.0,
        mouth_ratio: guarded_ratio(mouth_height, mouth_width),
        face_ratio: guarded_ratio(face_length, face_width),
        face_width,
        face_length,
        jaw_width: px(LEFT_JAW).distance(&px(RIGHT_JAW)),
        lip_distance: px(UPPER_INNER_LIP).distance(&px(LOWER_INNER_LIP)),
    })
}

impl AcousticFeatures {
    /// Replace NaN and infinite values with zero.
    ///
    /// Pitch analysis reports NaN for unvoiced recordings; those are stored as
    /// 0 rather than dropped.
    pub fn sanitized(mut self) -> Self {
        let fix = |v: &mut f64| {
            if !v.is_finite() {
                *v = 0.0;
            }
        };
        fix(&mut self.pitch_mean);
        fix(&mut self.pitch_std);
        fix(&mut self.jitter);
        fix(&mut self.shimmer);
        fix(&mut self.hnr);
        fix(&mut self.spectral_centroid);
        fix(&mut self.spectral_rolloff);
        fix(&mut self.spectral_bandwidth);
        fix(&mut self.zero_crossing_rate);
        self.mfcc_mean.iter_mut().for_each(fix);
        self.mfcc_std.iter_mut().for_each(fix);
        self
    }
}

/// Acoustic analysis backend (pitch tracker, perturbation and spectral analysis)
pub trait AcousticAnalyzer: Send + Sync {
    fn analyze(&self, clip: &AudioClip) -> Result<AcousticFeatures, ScreeningError>;
}

/// Capability used by the capture driver to turn raw captures into features
pub trait FeatureExtractor: Send + Sync {
    fn facial_metrics(&self, frame: &LandmarkFrame) -> Result<FrameMetrics, ScreeningError>;

    fn acoustic_features(&self, clip: &AudioClip) -> Result<AcousticFeatures, ScreeningError>;
}

/// Feature extractor using landmark geometry and an injected acoustic analyzer
pub struct LandmarkFeatureExtractor<A> {
    analyzer: A,
}

impl<A: AcousticAnalyzer> LandmarkFeatureExtractor<A> {
    pub fn new(analyzer: A) -> Self {
        Self { analyzer }
    }
}

impl<A: AcousticAnalyzer> FeatureExtractor for LandmarkFeatureExtractor<A> {
    fn facial_metrics(&self, frame: &LandmarkFrame) -> Result<FrameMetrics, ScreeningError> {
        extract_facial_metrics(frame)
    }

    fn acoustic_features(&self, clip: &AudioClip) -> Result<AcousticFeatures, ScreeningError> {
        if clip.samples.is_empty() {
            return Err(ScreeningError::FeatureExtractionFailed(
                "audio clip is empty".to_string(),
            ));
        }
        self.analyzer.analyze(clip).map(AcousticFeatures::sanitized)
    }
}

/// One value per metric for a single task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedFeatures {
    values: BTreeMap<Metric, f64>,
}

impl AggregatedFeatures {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.values.get(&metric).copied()
    }

    pub fn insert(&mut self, metric: Metric, value: f64) {
        self.values.insert(metric, value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Metric, &f64)> {
        self.values.iter()
    }
}

/// Arithmetic mean
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation
pub fn population_std(values: &[f64]) -> Option<f64> {
    let avg = mean(values)?;
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Reduce a captured sample to one value per metric.
///
/// Frame metrics are averaged across frames. With two or more frames, jaw
/// width variability is the population standard deviation across frames; for
/// breath-hold tasks the same is computed for the average eye aspect ratio.
/// Metrics with no data are left out.
pub fn aggregate_sample(sample: &CapturedSample) -> AggregatedFeatures {
    let mut features = AggregatedFeatures::default();

    if !sample.frames.is_empty() {
        let column = |f: fn(&FrameMetrics) -> f64| -> Vec<f64> {
            sample.frames.iter().map(f).collect()
        };

        let frame_metrics: [(Metric, fn(&FrameMetrics) -> f64); 9] = [
            (Metric::LeftEar, |f| f.left_ear),
            (Metric::RightEar, |f| f.right_ear),
            (Metric::AvgEar, |f| f.avg_ear),
            (Metric::MouthRatio, |f| f.mouth_ratio),
            (Metric::FaceRatio, |f| f.face_ratio),
            (Metric::FaceWidth, |f| f.face_width),
            (Metric::FaceLength, |f| f.face_length),
            (Metric::JawWidth, |f| f.jaw_width),
            (Metric::LipDistance, |f| f.lip_distance),
        ];

        for (metric, accessor) in frame_metrics {
            if let Some(value) = mean(&column(accessor)) {
                features.insert(metric, value);
            }
        }

        // A single frame carries no spread
        if sample.frames.len() >= 2 {
            if let Some(value) = population_std(&column(|f| f.jaw_width)) {
                features.insert(Metric::JawVariability, value);
            }

            if sample.modality == Modality::BreathHold {
                if let Some(value) = population_std(&column(|f| f.avg_ear)) {
                    features.insert(Metric::EarVariability, value);
                }
            }
        }
    }

    if let Some(acoustic) = &sample.acoustic {
        features.insert(Metric::PitchMean, acoustic.pitch_mean);
        features.insert(Metric::PitchStd, acoustic.pitch_std);
        features.insert(Metric::Jitter, acoustic.jitter);
        features.insert(Metric::Shimmer, acoustic.shimmer);
        features.insert(Metric::Hnr, acoustic.hnr);
        features.insert(Metric::SpectralCentroid, acoustic.spectral_centroid);
        features.insert(Metric::SpectralRolloff, acoustic.spectral_rolloff);
        features.insert(Metric::SpectralBandwidth, acoustic.spectral_bandwidth);
        features.insert(Metric::ZeroCrossingRate, acoustic.zero_crossing_rate);
    }

    if let Some(seconds) = sample.breath_duration_seconds {
        features.insert(Metric::BreathDuration, seconds);
    }

    features
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_eye() -> [Point; 6] {
        [
            Point::new(0.0, 0.0),
            Point::new(1.0, -1.0),
            Point::new(2.0, -1.0),
            Point::new(3.0, 0.0),
            Point::new(2.0, 1.0),
            Point::new(1.0, 1.0),
        ]
    }

    /// A mesh with every landmark at the centre, then selected points moved
    fn synthetic_mesh() -> LandmarkFrame {
        let mut landmarks = vec![Point::new(0.5, 0.5); MIN_LANDMARKS];
        // left eye: 30 px wide, 12 px tall
        landmarks[33] = Point::new(100.0 / FRAME_WIDTH, 200.0 / FRAME_HEIGHT);
        landmarks[133] = Point::new(130.0 / FRAME_WIDTH, 200.0 / FRAME_HEIGHT);
        landmarks[160] = Point::new(110.0 / FRAME_WIDTH, 194.0 / FRAME_HEIGHT);
        landmarks[144] = Point::new(110.0 / FRAME_WIDTH, 206.0 / FRAME_HEIGHT);
        landmarks[158] = Point::new(120.0 / FRAME_WIDTH, 194.0 / FRAME_HEIGHT);
        landmarks[153] = Point::new(120.0 / FRAME_WIDTH, 206.0 / FRAME_HEIGHT);
        // cheeks 200 px apart, nose to chin 100 px
        landmarks[116] = Point::new(100.0 / FRAME_WIDTH, 250.0 / FRAME_HEIGHT);
        landmarks[345] = Point::new(300.0 / FRAME_WIDTH, 250.0 / FRAME_HEIGHT);
        landmarks[1] = Point::new(200.0 / FRAME_WIDTH, 250.0 / FRAME_HEIGHT);
        landmarks[18] = Point::new(200.0 / FRAME_WIDTH, 350.0 / FRAME_HEIGHT);
        LandmarkFrame { landmarks }
    }

    #[test]
    fn test_eye_aspect_ratio() {
        // (2 + 2) / (2 * 3)
        assert!((eye_aspect_ratio(&open_eye()) - 4.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_eye_aspect_ratio_zero_width() {
        let mut eye = open_eye();
        eye[3] = eye[0];
        assert_eq!(eye_aspect_ratio(&eye), 0.0);
    }

    #[test]
    fn test_extract_facial_metrics() {
        let metrics = extract_facial_metrics(&synthetic_mesh()).unwrap();

        // (12 + 12) / (2 * 30)
        assert!((metrics.left_ear - 0.4).abs() < 1e-9);
        // right eye collapsed onto the centre point
        assert_eq!(metrics.right_ear, 0.0);
        assert!((metrics.avg_ear - 0.2).abs() < 1e-9);
        assert!((metrics.face_width - 200.0).abs() < 1e-9);
        assert!((metrics.face_length - 100.0).abs() < 1e-9);
        assert!((metrics.face_ratio - 0.5).abs() < 1e-9);
        // mouth corners coincide
        assert_eq!(metrics.mouth_ratio, 0.0);
    }

    #[test]
    fn test_extract_rejects_sparse_frame() {
        let frame = LandmarkFrame {
            landmarks: vec![Point::default(); 10],
        };
        assert!(matches!(
            extract_facial_metrics(&frame),
            Err(ScreeningError::FeatureExtractionFailed(_))
        ));
    }

    #[test]
    fn test_sanitized_coerces_nan() {
        let features = AcousticFeatures {
            pitch_mean: f64::NAN,
            jitter: 0.02,
            hnr: f64::INFINITY,
            mfcc_mean: vec![1.0, f64::NAN],
            ..Default::default()
        }
        .sanitized();

        assert_eq!(features.pitch_mean, 0.0);
        assert_eq!(features.jitter, 0.02);
        assert_eq!(features.hnr, 0.0);
        assert_eq!(features.mfcc_mean, vec![1.0, 0.0]);
    }

    #[test]
    fn test_extractor_sanitizes_analyzer_output() {
        struct NanAnalyzer;
        impl AcousticAnalyzer for NanAnalyzer {
            fn analyze(&self, _clip: &AudioClip) -> Result<AcousticFeatures, ScreeningError> {
                Ok(AcousticFeatures {
                    pitch_mean: f64::NAN,
                    ..Default::default()
                })
            }
        }

        let extractor = LandmarkFeatureExtractor::new(NanAnalyzer);
        let clip = AudioClip {
            sample_rate: 44_100,
            samples: vec![0.0; 16],
        };
        assert_eq!(extractor.acoustic_features(&clip).unwrap().pitch_mean, 0.0);

        let empty = AudioClip {
            sample_rate: 44_100,
            samples: Vec::new(),
        };
        assert!(extractor.acoustic_features(&empty).is_err());
    }

    #[test]
    fn test_aggregate_means_and_variability() {
        let frame = |ear: f64, jaw: f64| FrameMetrics {
            avg_ear: ear,
            jaw_width: jaw,
            ..Default::default()
        };
        let sample = CapturedSample::new(2, "breath_hold", Modality::BreathHold)
            .with_frames(vec![frame(0.2, 100.0), frame(0.4, 110.0)])
            .with_breath_duration(12.0);

        let features = aggregate_sample(&sample);

        assert!((features.get(Metric::AvgEar).unwrap() - 0.3).abs() < 1e-12);
        assert!((features.get(Metric::JawWidth).unwrap() - 105.0).abs() < 1e-12);
        assert!((features.get(Metric::JawVariability).unwrap() - 5.0).abs() < 1e-12);
        assert!((features.get(Metric::EarVariability).unwrap() - 0.1).abs() < 1e-12);
        assert_eq!(features.get(Metric::BreathDuration), Some(12.0));
        assert_eq!(features.get(Metric::Jitter), None);
    }

    #[test]
    fn test_ear_variability_only_for_breath_hold() {
        let sample = CapturedSample::new(0, "reading", Modality::Voice)
            .with_frames(vec![FrameMetrics::default(); 3]);

        let features = aggregate_sample(&sample);
        assert!(features.get(Metric::EarVariability).is_none());
        assert!(features.get(Metric::AvgEar).is_some());
    }

    #[test]
    fn test_aggregate_empty_sample() {
        let sample = CapturedSample::new(0, "reading", Modality::Voice);
        assert!(aggregate_sample(&sample).is_empty());
    }
}
