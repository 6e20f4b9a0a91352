//! Notifications for the UI collaborator
//!
//! Observers are called synchronously from the supervisor's tick, in the
//! order the underlying lines were read.

use std::sync::mpsc::Sender;

use uuid::Uuid;

use super::lifecycle::JobState;
use super::progress::ProgressEvent;
use crate::validation::ValidationResult;

/// Receives job notifications. Every method defaults to doing nothing.
pub trait JobObserver: Send {
    fn on_progress(&mut self, _job_id: Uuid, _event: &ProgressEvent) {}

    fn on_state_change(&mut self, _job_id: Uuid, _state: JobState) {}

    fn on_validated(&mut self, _job_id: Uuid, _result: &ValidationResult) {}
}

/// Owned form of an observer notification
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Progress {
        job_id: Uuid,
        event: ProgressEvent,
    },
    StateChanged {
        job_id: Uuid,
        state: JobState,
    },
    Validated {
        job_id: Uuid,
        result: ValidationResult,
    },
}

/// Forwards every notification into a channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: Sender<JobEvent>,
}

impl ChannelObserver {
    pub fn new(tx: Sender<JobEvent>) -> Self {
        Self { tx }
    }
}

// A dropped receiver just means nobody is listening any more.
impl JobObserver for ChannelObserver {
    fn on_progress(&mut self, job_id: Uuid, event: &ProgressEvent) {
        let _ = self.tx.send(JobEvent::Progress {
            job_id,
            event: event.clone(),
        });
    }

    fn on_state_change(&mut self, job_id: Uuid, state: JobState) {
        let _ = self.tx.send(JobEvent::StateChanged { job_id, state });
    }

    fn on_validated(&mut self, job_id: Uuid, result: &ValidationResult) {
        let _ = self.tx.send(JobEvent::Validated {
            job_id,
            result: result.clone(),
        });
    }
}
