//! Process-wide run registry
//!
//! Holds the single "current job" slot and a bounded trail of finished runs.
//! Readers get copies; only the supervisor writes.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::{JobState, SeparationModel, StemKind};

pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// Identity and status of the job occupying the current slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentJob {
    pub job_id: Uuid,
    pub state: JobState,
}

/// What is remembered about a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub job_id: Uuid,
    pub spec_summary: String,
    pub model: SeparationModel,
    pub stems: Vec<StemKind>,
    pub final_state: JobState,
    pub finished_at: DateTime<Utc>,
    pub output_dir: PathBuf,
    /// Whether output validation passed; `None` when it never ran.
    pub validated_ok: Option<bool>,
}

#[derive(Debug)]
struct Inner {
    current: Option<CurrentJob>,
    recent: VecDeque<RunSummary>,
    capacity: usize,
}

/// Cheaply cloneable handle on the shared registry
#[derive(Debug, Clone)]
pub struct RunRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl RunRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                current: None,
                recent: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current(&self) -> Option<CurrentJob> {
        self.lock().current
    }

    /// Job whose window should be focused instead of starting a duplicate.
    pub fn focus_target(&self) -> Option<Uuid> {
        self.lock()
            .current
            .filter(|c| c.state.is_active())
            .map(|c| c.job_id)
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<RunSummary> {
        self.lock().recent.iter().rev().cloned().collect()
    }

    pub fn last_run(&self) -> Option<RunSummary> {
        self.lock().recent.back().cloned()
    }

    /// Session teardown.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.current = None;
        inner.recent.clear();
    }

    pub(crate) fn set_current(&self, job_id: Uuid, state: JobState) {
        self.lock().current = Some(CurrentJob { job_id, state });
    }

    pub(crate) fn update_state(&self, job_id: Uuid, state: JobState) {
        let mut inner = self.lock();
        if let Some(current) = inner.current.as_mut() {
            if current.job_id == job_id {
                current.state = state;
            }
        }
    }

    /// Record a finished run and release the current slot.
    pub(crate) fn finish(&self, summary: RunSummary) {
        let mut inner = self.lock();
        if inner.current.is_some_and(|c| c.job_id == summary.job_id) {
            inner.current = None;
        }
        if inner.recent.len() == inner.capacity {
            inner.recent.pop_front();
        }
        inner.recent.push_back(summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(state: JobState) -> RunSummary {
        RunSummary {
            job_id: Uuid::new_v4(),
            spec_summary: "htdemucs vocals".to_string(),
            model: SeparationModel::Htdemucs,
            stems: vec![StemKind::Vocals],
            final_state: state,
            finished_at: Utc::now(),
            output_dir: PathBuf::from("/tmp/run"),
            validated_ok: None,
        }
    }

    #[test]
    fn test_focus_target_only_while_active() {
        let registry = RunRegistry::default();
        let id = Uuid::new_v4();
        registry.set_current(id, JobState::Launching);
        assert_eq!(registry.focus_target(), Some(id));

        registry.update_state(id, JobState::Running);
        assert_eq!(registry.current().unwrap().state, JobState::Running);

        let mut done = summary(JobState::Succeeded);
        done.job_id = id;
        registry.finish(done);
        assert_eq!(registry.focus_target(), None);
        assert_eq!(registry.last_run().unwrap().job_id, id);
    }

    #[test]
    fn test_history_is_bounded() {
        let registry = RunRegistry::new(3);
        let runs: Vec<RunSummary> = (0..5).map(|_| summary(JobState::Failed)).collect();
        for run in &runs {
            registry.finish(run.clone());
        }
        let recent = registry.recent();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].job_id, runs[4].job_id);
        assert_eq!(recent[2].job_id, runs[2].job_id);
    }

    #[test]
    fn test_clones_share_state_and_clear() {
        let registry = RunRegistry::default();
        let handle = registry.clone();
        registry.finish(summary(JobState::Cancelled));
        assert_eq!(handle.recent().len(), 1);
        handle.clear();
        assert!(registry.last_run().is_none());
    }
}
