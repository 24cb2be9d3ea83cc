//! biomarker-flux - On-device engine for voice, face and breath risk screening
//!
//! A screening session walks a fixed sequence of capture tasks, collects one
//! feature sample per task and scores the samples against reference baselines:
//! task registry → session controller → capture driver → feature aggregation
//! → risk scoring → report.
//!
//! ## Entry points
//!
//! - **Stateless**: [`score_samples_json`] scores captured samples given as JSON
//! - **Service**: [`ScreeningService`] owns the capture devices and drives a
//!   whole session
//! - **FFI**: C bindings in [`ffi`]

pub mod baseline;
pub mod capture;
pub mod config;
pub mod error;
pub mod features;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod scoring;
pub mod session;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use baseline::{BaselineLibrary, BaselineProfile, BaselineTable, Direction, MetricRule};
pub use capture::{CaptureBackend, CaptureDriver, DeviceLease, SessionOutcome};
pub use config::{CaptureSettings, ScreeningConfig};
pub use error::ScreeningError;
pub use features::{AcousticAnalyzer, FeatureExtractor, LandmarkFeatureExtractor};
pub use pipeline::{score_samples_json, ScreeningService};
pub use registry::TaskRegistry;
pub use report::{parse_summary, ReportFormatter, ReportSummary};
pub use scoring::{RiskScale, RiskScoringEngine};
pub use session::TaskSessionController;
pub use types::{CapturedSample, Modality, RiskLevel, ScoringResult, SessionStatus, TaskDescriptor};

/// Library version
pub const BIOFLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "biomarker-flux";
