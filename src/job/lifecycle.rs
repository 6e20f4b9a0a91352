//! Job lifecycle state

use std::fmt;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::progress::ProgressEvent;
use super::spec::JobSpec;
use crate::validation::ValidationResult;

/// `Pending -> Launching -> Running -> {Succeeded, Failed, Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Launching,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    /// Occupies the single active-job slot.
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Launching | JobState::Running)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Launching)
                | (Launching, Running)
                | (Launching, Failed)
                | (Launching, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Launching => "launching",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// How the worker finished
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitInfo {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub duration_sec: f64,
}

/// Mutable run state for one [`JobSpec`]
///
/// Owned by the supervisor; nothing else mutates it.
#[derive(Debug, Clone)]
pub struct Job {
    spec: JobSpec,
    state: JobState,
    pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    last_progress: Option<ProgressEvent>,
    exit_info: Option<ExitInfo>,
    failure: Option<String>,
    log: Vec<String>,
    validation: Option<ValidationResult>,
}

impl Job {
    pub fn new(spec: JobSpec) -> Self {
        Self {
            spec,
            state: JobState::Pending,
            pid: None,
            started_at: None,
            last_progress: None,
            exit_info: None,
            failure: None,
            log: Vec::new(),
            validation: None,
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.spec.id()
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn last_progress(&self) -> Option<&ProgressEvent> {
        self.last_progress.as_ref()
    }

    pub fn exit_info(&self) -> Option<ExitInfo> {
        self.exit_info
    }

    /// Why the job failed, when it did.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    pub fn validation(&self) -> Option<&ValidationResult> {
        self.validation.as_ref()
    }

    /// Move to `next` if the lifecycle allows it.
    pub(crate) fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                "Ignoring illegal transition {} -> {} for job {}",
                self.state,
                next,
                self.id()
            );
            return false;
        }
        info!("Job {}: {} -> {}", self.id(), self.state, next);
        if next == JobState::Running {
            self.started_at = Some(Utc::now());
        }
        self.state = next;
        true
    }

    pub(crate) fn set_pid(&mut self, pid: Option<u32>) {
        self.pid = pid;
    }

    pub(crate) fn record_progress(&mut self, event: ProgressEvent) {
        self.last_progress = Some(event);
    }

    pub(crate) fn record_exit(&mut self, exit: ExitInfo) {
        self.exit_info = Some(exit);
    }

    pub(crate) fn set_failure(&mut self, reason: impl Into<String>) {
        self.failure = Some(reason.into());
    }

    pub(crate) fn append_log(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }

    pub(crate) fn set_validation(&mut self, result: ValidationResult) {
        self.validation = Some(result);
    }
}
