//! Separation jobs
//!
//! - [`JobSpec`]: validated, immutable request
//! - [`QuickPreset`]: one-click model and stem choices
//! - [`Job`] / [`JobState`]: run state owned by the supervisor
//! - [`ProgressParser`]: worker output to [`ProgressEvent`]s
//! - [`JobSupervisor`]: launch, poll, cancel, reap

pub mod events;
pub mod lifecycle;
pub mod preset;
pub mod progress;
pub mod spec;
pub mod supervisor;

pub use events::{ChannelObserver, JobEvent, JobObserver};
pub use lifecycle::{ExitInfo, Job, JobState};
pub use preset::QuickPreset;
pub use progress::{parse_eta, ProgressEvent, ProgressParser};
pub use spec::{JobSpec, JobSpecBuilder, SeparationModel, StemKind};
pub use supervisor::{JobSupervisor, SupervisorConfig, DEFAULT_CANCEL_GRACE, LOG_FILE_NAME};
