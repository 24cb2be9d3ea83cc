//! Capture driver
//!
//! Runs the capture side of a screening session: acquires the microphone and
//! camera, records each task with concurrent audio and frame producers, turns
//! the raw captures into a [`CapturedSample`] and feeds it to the session
//! controller.
//!
//! Devices are held by a [`DeviceLease`] that releases them on drop, so they
//! are returned on completion, abort and error paths alike. Cancellation is
//! cooperative: the session token is checked between tasks, and every task
//! runs under a child token that the timer cancels at the deadline.

use crate::config::CaptureSettings;
use crate::error::ScreeningError;
use crate::features::FeatureExtractor;
use crate::session::TaskSessionController;
use crate::types::{
    AcousticFeatures, AudioClip, CapturedSample, FrameMetrics, LandmarkFrame, Modality,
    ScoringResult, SessionStatus, TaskDescriptor,
};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Audio input device
pub trait Microphone: Send {
    /// Record for `duration`, returning early if `cancel` fires
    fn record(
        &mut self,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<AudioClip, ScreeningError>;

    fn release(&mut self);
}

/// Camera with an attached face-landmark detector
pub trait Camera: Send {
    /// Next landmark frame; `None` when no face was detected
    fn next_frame(&mut self) -> Result<Option<LandmarkFrame>, ScreeningError>;

    fn release(&mut self);
}

/// Source of capture devices
pub trait CaptureBackend: Send + Sync {
    /// Acquire both devices; fails with `CaptureDeviceUnavailable`
    fn acquire(&self) -> Result<DeviceLease, ScreeningError>;
}

/// Exclusive hold on a microphone and a camera, released on drop
pub struct DeviceLease {
    microphone: Box<dyn Microphone>,
    camera: Box<dyn Camera>,
}

impl DeviceLease {
    pub fn new(microphone: Box<dyn Microphone>, camera: Box<dyn Camera>) -> Self {
        Self { microphone, camera }
    }

    fn devices(&mut self) -> (&mut dyn Microphone, &mut dyn Camera) {
        (self.microphone.as_mut(), self.camera.as_mut())
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.microphone.release();
        self.camera.release();
        debug!("capture devices released");
    }
}

/// How a driven session ended
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// Every task was captured; carries the session score
    Completed(ScoringResult),
    /// Cancelled before the last task; carries the partial score
    Aborted(ScoringResult),
}

impl SessionOutcome {
    pub fn result(&self) -> &ScoringResult {
        match self {
            SessionOutcome::Completed(result) | SessionOutcome::Aborted(result) => result,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SessionOutcome::Completed(_))
    }
}

/// Shared sink for the producers of one task
#[derive(Default)]
struct TaskBuffer {
    frames: Vec<FrameMetrics>,
    acoustic: Option<AcousticFeatures>,
    failed_frames: usize,
    camera_failed: bool,
    breath_released_after: Option<Duration>,
    notes: Vec<String>,
}

fn lock(buffer: &Mutex<TaskBuffer>) -> std::sync::MutexGuard<'_, TaskBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives a [`TaskSessionController`] with real captures
pub struct CaptureDriver<B, X> {
    backend: B,
    extractor: X,
    settings: CaptureSettings,
}

impl<B: CaptureBackend, X: FeatureExtractor> CaptureDriver<B, X> {
    pub fn new(backend: B, extractor: X, settings: CaptureSettings) -> Self {
        Self {
            backend,
            extractor,
            settings,
        }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Run every task of the controller's registry.
    ///
    /// Cancelling `cancel` aborts the session after the running task stops;
    /// the outcome then carries the score of the tasks submitted so far.
    pub fn run_session(
        &self,
        controller: &mut TaskSessionController,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, ScreeningError> {
        let mut lease = self.backend.acquire()?;
        controller.start()?;

        let outcome = self.drive(controller, &mut lease, cancel);
        if outcome.is_err() && !controller.status().is_terminal() {
            let _ = controller.abort();
        }
        drop(lease);
        outcome
    }

    fn drive(
        &self,
        controller: &mut TaskSessionController,
        lease: &mut DeviceLease,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, ScreeningError> {
        loop {
            if cancel.is_cancelled() {
                return abort_with_partial(controller);
            }

            let index = controller.current_task_index();
            let task = controller
                .current_task()
                .cloned()
                .ok_or(ScreeningError::InvalidTaskIndex {
                    expected: controller.registry().len(),
                    actual: index,
                })?;

            info!(task = %task.name, index, "capturing task");
            let sample = self.capture_task(lease, index, &task, cancel);

            if cancel.is_cancelled() {
                return abort_with_partial(controller);
            }

            controller.submit_capture(sample)?;
            match controller.status() {
                SessionStatus::Completed => {
                    let result = controller
                        .result()
                        .cloned()
                        .unwrap_or_else(|| controller.partial_result());
                    return Ok(SessionOutcome::Completed(result));
                }
                _ => controller.advance()?,
            }
        }
    }

    /// Capture one task and build its sample.
    ///
    /// Device and extraction failures end up in the sample's notes.
    pub fn capture_task(
        &self,
        lease: &mut DeviceLease,
        index: usize,
        task: &TaskDescriptor,
        cancel: &CancellationToken,
    ) -> CapturedSample {
        let window = self.window(task);
        let poll = Duration::from_millis(self.settings.poll_interval_ms);
        let release_ratio = self.settings.breath_release_mouth_ratio;
        let task_token = cancel.child_token();
        let buffer = Mutex::new(TaskBuffer::default());
        let started = Instant::now();
        let (microphone, camera) = lease.devices();
        let extractor = &self.extractor;

        thread::scope(|scope| {
            let timer = scope.spawn(|| {
                let deadline = started + window;
                while !task_token.is_cancelled() {
                    let now = Instant::now();
                    if now >= deadline {
                        task_token.cancel();
                        break;
                    }
                    thread::sleep(poll.min(deadline - now));
                }
            });

            let audio = task.modality.records_audio().then(|| {
                scope.spawn(|| {
                    let outcome = microphone
                        .record(window, &task_token)
                        .and_then(|clip| {
                            debug!(
                                task = %task.name,
                                seconds = clip.duration_seconds(),
                                "audio recorded"
                            );
                            extractor.acoustic_features(&clip)
                        });
                    match outcome {
                        Ok(acoustic) => lock(&buffer).acoustic = Some(acoustic),
                        Err(e) => {
                            warn!(task = %task.name, error = %e, "audio capture failed");
                            lock(&buffer).notes.push(format!("audio: {e}"));
                        }
                    }
                })
            });

            let frames = scope.spawn(|| {
                let breath_hold = task.modality == Modality::BreathHold;
                while !task_token.is_cancelled() {
                    match camera.next_frame() {
                        Ok(Some(frame)) => match extractor.facial_metrics(&frame) {
                            Ok(metrics) => {
                                let mut guard = lock(&buffer);
                                guard.frames.push(metrics);
                                if breath_hold && metrics.mouth_ratio > release_ratio {
                                    guard.breath_released_after = Some(started.elapsed());
                                    drop(guard);
                                    debug!(task = %task.name, "breath released");
                                    task_token.cancel();
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!(task = %task.name, error = %e, "frame rejected");
                                lock(&buffer).failed_frames += 1;
                            }
                        },
                        Ok(None) => {}
                        Err(e) => {
                            warn!(task = %task.name, error = %e, "camera failed");
                            let mut guard = lock(&buffer);
                            guard.camera_failed = true;
                            guard.notes.push(format!("camera: {e}"));
                            break;
                        }
                    }
                    thread::sleep(poll);
                }
            });

            if frames.join().is_err() {
                warn!(task = %task.name, "frame producer panicked");
                lock(&buffer)
                    .notes
                    .push("frame producer stopped unexpectedly".to_string());
                task_token.cancel();
            }
            if let Some(audio) = audio {
                if audio.join().is_err() {
                    warn!(task = %task.name, "audio producer panicked");
                    lock(&buffer)
                        .notes
                        .push("audio producer stopped unexpectedly".to_string());
                }
            }
            // The timer only exits once the task token is cancelled
            task_token.cancel();
            let _ = timer.join();
        });

        let buffer = buffer.into_inner().unwrap_or_else(PoisonError::into_inner);
        let mut sample = CapturedSample::for_task(index, task).with_frames(buffer.frames);
        sample.acoustic = buffer.acoustic;
        sample.notes = buffer.notes;

        if buffer.failed_frames > 0 {
            sample.notes.push(format!(
                "{} frames failed landmark extraction",
                buffer.failed_frames
            ));
        }
        // A hold is only measured while the face stayed in view
        if task.modality == Modality::BreathHold {
            if buffer.camera_failed || sample.frames.is_empty() {
                warn!(task = %task.name, "breath hold not observed");
                sample.notes.push("breath duration unavailable".to_string());
            } else {
                let held = buffer.breath_released_after.unwrap_or(window).min(window);
                sample.breath_duration_seconds = Some(held.as_secs_f64());
            }
        }

        debug!(
            task = %task.name,
            frames = sample.frames.len(),
            notes = sample.notes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "task captured"
        );
        sample
    }

    /// Capture window of a task, bounded by the configured cap
    fn window(&self, task: &TaskDescriptor) -> Duration {
        let window = Duration::from_secs(u64::from(task.duration_seconds));
        match self.settings.duration_cap_ms {
            Some(cap) => window.min(Duration::from_millis(cap)),
            None => window,
        }
    }
}

fn abort_with_partial(
    controller: &mut TaskSessionController,
) -> Result<SessionOutcome, ScreeningError> {
    controller.abort()?;
    Ok(SessionOutcome::Aborted(controller.partial_result()))
}
