//! Session state
//!
//! The run registry (current job slot and recent runs) and persisted user
//! settings.

pub mod registry;
pub mod settings;

pub use registry::{CurrentJob, RunRegistry, RunSummary, DEFAULT_HISTORY_CAPACITY};
pub use settings::{JsonSettingsStore, Settings, SettingsStore, WindowGeometry};
