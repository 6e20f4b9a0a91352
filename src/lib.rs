//! STEMwerk - stem separation job orchestration
//!
//! STEMwerk runs an external machine-learning worker that splits a mixed
//! audio region into stems, while the host application stays responsive.
//!
//! # Architecture
//!
//! - `capability`: which compute devices and interpreters are usable
//! - `selection`: host selection to export regions
//! - `job`: job specs, the supervisor state machine, progress parsing
//! - `validation`: checks on the stems a run produced
//! - `state`: run registry and persisted settings
//!
//! The supervisor never blocks: the host calls
//! [`JobSupervisor::tick`](job::JobSupervisor::tick) from its own loop.

pub mod capability;
pub mod cli;
pub mod config;
pub mod error;
pub mod job;
pub mod process;
pub mod selection;
pub mod state;
pub mod validation;

pub use config::StemwerkConfig;
pub use error::{Result, StemwerkError};
