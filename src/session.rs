//! Task session controller
//!
//! State machine that walks the task registry in order, enforces that a
//! sample is submitted for the current task only, and scores the session
//! once every task has completed.
//!
//! ```text
//! Idle --start--> Capturing --submit--> AwaitingAdvance --advance--> Capturing
//!                     |                        |
//!                     +--submit (last task)--> Completed
//! Idle | Capturing | AwaitingAdvance --abort--> Aborted
//! ```

use crate::baseline::BaselineTable;
use crate::error::ScreeningError;
use crate::registry::TaskRegistry;
use crate::scoring::RiskScoringEngine;
use crate::types::{CapturedSample, ScoringResult, SessionStatus, TaskDescriptor};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Drives one screening session through the registered tasks
#[derive(Debug, Clone)]
pub struct TaskSessionController {
    session_id: String,
    registry: TaskRegistry,
    baselines: BaselineTable,
    engine: RiskScoringEngine,
    status: SessionStatus,
    current_task_index: usize,
    task_started_at: Option<DateTime<Utc>>,
    samples: Vec<CapturedSample>,
    result: Option<ScoringResult>,
}

impl TaskSessionController {
    pub fn new(
        registry: TaskRegistry,
        baselines: BaselineTable,
        engine: RiskScoringEngine,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            registry,
            baselines,
            engine,
            status: SessionStatus::Idle,
            current_task_index: 0,
            task_started_at: None,
            samples: Vec::new(),
            result: None,
        }
    }

    /// Unique identifier of the current session
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn baselines(&self) -> &BaselineTable {
        &self.baselines
    }

    pub fn current_task_index(&self) -> usize {
        self.current_task_index
    }

    /// Descriptor of the task at the current index (None once completed)
    pub fn current_task(&self) -> Option<&TaskDescriptor> {
        self.registry.get(self.current_task_index)
    }

    /// Samples submitted so far, in task order
    pub fn samples(&self) -> &[CapturedSample] {
        &self.samples
    }

    pub fn task_started_at(&self) -> Option<DateTime<Utc>> {
        self.task_started_at
    }

    /// Begin a new session on the first task
    pub fn start(&mut self) -> Result<(), ScreeningError> {
        self.start_at(Utc::now())
    }

    /// Begin a new session with an explicit start timestamp.
    ///
    /// Any previous session state is discarded.
    pub fn start_at(&mut self, now: DateTime<Utc>) -> Result<(), ScreeningError> {
        if self.status == SessionStatus::Capturing {
            return Err(ScreeningError::AlreadyRunning);
        }

        if self.status != SessionStatus::Idle {
            debug!(
                previous = %self.session_id,
                status = %self.status,
                "discarding previous session"
            );
        }

        self.session_id = Uuid::new_v4().to_string();
        self.samples.clear();
        self.result = None;
        self.current_task_index = 0;
        self.task_started_at = Some(now);
        self.status = SessionStatus::Capturing;

        info!(
            session = %self.session_id,
            tasks = self.registry.len(),
            "screening session started"
        );
        Ok(())
    }

    /// Record the sample of the current task
    pub fn submit_capture(&mut self, sample: CapturedSample) -> Result<(), ScreeningError> {
        if self.status != SessionStatus::Capturing {
            return Err(ScreeningError::NotReady {
                status: self.status,
            });
        }
        if sample.task_index != self.current_task_index {
            return Err(ScreeningError::InvalidTaskIndex {
                expected: self.current_task_index,
                actual: sample.task_index,
            });
        }

        debug!(
            session = %self.session_id,
            task = %sample.task_name,
            frames = sample.frames.len(),
            has_audio = sample.acoustic.is_some(),
            "sample submitted"
        );
        self.samples.push(sample);

        if self.current_task_index + 1 < self.registry.len() {
            self.status = SessionStatus::AwaitingAdvance;
        } else {
            self.current_task_index = self.registry.len();
            self.task_started_at = None;
            self.status = SessionStatus::Completed;

            let result = self.engine.score(&self.samples, &self.baselines);
            info!(
                session = %self.session_id,
                total = result.total_score,
                level = %result.risk_level,
                "screening session completed"
            );
            self.result = Some(result);
        }
        Ok(())
    }

    /// Move on to the next task
    pub fn advance(&mut self) -> Result<(), ScreeningError> {
        self.advance_at(Utc::now())
    }

    pub fn advance_at(&mut self, now: DateTime<Utc>) -> Result<(), ScreeningError> {
        if self.status != SessionStatus::AwaitingAdvance {
            return Err(ScreeningError::NotReady {
                status: self.status,
            });
        }

        self.current_task_index += 1;
        self.task_started_at = Some(now);
        self.status = SessionStatus::Capturing;
        debug!(session = %self.session_id, task = self.current_task_index, "advanced");
        Ok(())
    }

    /// Stop the session, keeping the samples submitted so far
    pub fn abort(&mut self) -> Result<(), ScreeningError> {
        if self.status.is_terminal() {
            return Err(ScreeningError::NotReady {
                status: self.status,
            });
        }

        warn!(
            session = %self.session_id,
            task = self.current_task_index,
            submitted = self.samples.len(),
            "screening session aborted"
        );
        self.status = SessionStatus::Aborted;
        Ok(())
    }

    /// Time spent on the capturing task, zero when no task is capturing
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> Duration {
        match (self.status, self.task_started_at) {
            (SessionStatus::Capturing, Some(started)) => (now - started).max(Duration::zero()),
            _ => Duration::zero(),
        }
    }

    /// Time left on the capturing task, saturating at zero
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        if self.status != SessionStatus::Capturing {
            return Duration::zero();
        }
        let Some(task) = self.current_task() else {
            return Duration::zero();
        };
        let total = Duration::seconds(i64::from(task.duration_seconds));
        (total - self.elapsed_at(now)).max(Duration::zero())
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed_at(Utc::now())
    }

    pub fn remaining(&self) -> Duration {
        self.remaining_at(Utc::now())
    }

    /// Score of a completed session
    pub fn result(&self) -> Option<&ScoringResult> {
        self.result.as_ref()
    }

    /// Score whatever has been submitted so far
    pub fn partial_result(&self) -> ScoringResult {
        match &self.result {
            Some(result) => result.clone(),
            None => self.engine.score(&self.samples, &self.baselines),
        }
    }
}
