//! Output validation
//!
//! Runs strictly after the worker has exited and only reads the output
//! directory.

pub mod audio;
mod validator;

pub use audio::{analyze_wav, AudioStats};
pub use validator::{
    OutputValidator, ValidationConfig, ValidationIssue, ValidationResult,
    DEFAULT_DURATION_TOLERANCE_SEC, DEFAULT_SILENCE_FLOOR_DB,
};
