//! Error handling for STEMwerk
//!
//! Every precondition failure carries a recovery suggestion so the host UI
//! can tell the user what to fix before anything is launched.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::job::{SeparationModel, StemKind};

/// Result type alias for STEMwerk operations
pub type Result<T> = std::result::Result<T, StemwerkError>;

/// Main error type for STEMwerk operations
#[derive(Error, Debug)]
pub enum StemwerkError {
    // Precondition Errors (surfaced before launch, no job is created)
    #[error("No Python interpreter found (tried: {tried})")]
    NoInterpreterFound { tried: String },

    #[error("Selection is empty: {reason}")]
    EmptySelection { reason: String },

    #[error("Stem '{stem}' is not produced by model '{model}'")]
    InvalidStemForModel {
        stem: StemKind,
        model: SeparationModel,
    },

    #[error("No stems requested")]
    NoStemsRequested,

    #[error("Rendered input for track '{track_id}' is missing or empty: {path}")]
    EmptyRenderInput { track_id: String, path: PathBuf },

    #[error("Tracks '{first}' and '{second}' would both write to '{name}'")]
    DuplicateTrackName {
        first: String,
        second: String,
        name: String,
    },

    // Launch Errors
    #[error("A separation job is already running: {job_id}")]
    JobAlreadyRunning { job_id: Uuid },

    #[error("Failed to start worker process: {reason}")]
    SpawnFailure {
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Worker exited with {}", describe_exit(.code))]
    WorkerNonZeroExit { code: Option<i32> },

    #[error("Unknown job: {job_id}")]
    UnknownJob { job_id: Uuid },

    // Parsing Errors
    #[error("Unknown separation model: {name}")]
    UnknownModel { name: String },

    #[error("Unknown stem: {name}")]
    UnknownStem { name: String },

    #[error("Invalid device token: {token}")]
    InvalidDeviceToken { token: String },

    // File Errors
    #[error("Failed to read audio file: {path}: {reason}")]
    AudioRead { path: PathBuf, reason: String },

    #[error("Directory creation failed: {path}: {source}")]
    DirectoryCreateError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file: {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}: {source}")]
    FileWriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl StemwerkError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            StemwerkError::NoInterpreterFound { .. } => "NO_INTERPRETER_FOUND",
            StemwerkError::EmptySelection { .. } => "EMPTY_SELECTION",
            StemwerkError::InvalidStemForModel { .. } => "INVALID_STEM_FOR_MODEL",
            StemwerkError::NoStemsRequested => "NO_STEMS_REQUESTED",
            StemwerkError::EmptyRenderInput { .. } => "EMPTY_RENDER_INPUT",
            StemwerkError::DuplicateTrackName { .. } => "DUPLICATE_TRACK_NAME",
            StemwerkError::JobAlreadyRunning { .. } => "JOB_ALREADY_RUNNING",
            StemwerkError::SpawnFailure { .. } => "SPAWN_FAILURE",
            StemwerkError::WorkerNonZeroExit { .. } => "WORKER_NON_ZERO_EXIT",
            StemwerkError::UnknownJob { .. } => "UNKNOWN_JOB",
            StemwerkError::UnknownModel { .. } => "UNKNOWN_MODEL",
            StemwerkError::UnknownStem { .. } => "UNKNOWN_STEM",
            StemwerkError::InvalidDeviceToken { .. } => "INVALID_DEVICE_TOKEN",
            StemwerkError::AudioRead { .. } => "AUDIO_READ_ERROR",
            StemwerkError::DirectoryCreateError { .. } => "DIRECTORY_CREATE_ERROR",
            StemwerkError::FileReadError { .. } => "FILE_READ_ERROR",
            StemwerkError::FileWriteError { .. } => "FILE_WRITE_ERROR",
            StemwerkError::Io(_) => "IO_ERROR",
            StemwerkError::Json(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Returns true for failures detected before any worker is spawned.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            StemwerkError::NoInterpreterFound { .. }
                | StemwerkError::EmptySelection { .. }
                | StemwerkError::InvalidStemForModel { .. }
                | StemwerkError::NoStemsRequested
                | StemwerkError::EmptyRenderInput { .. }
                | StemwerkError::DuplicateTrackName { .. }
        )
    }

    /// Returns a user-facing hint describing how to fix the problem.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StemwerkError::NoInterpreterFound { .. } => Some(
                "No Python interpreter found. Configure one in settings or create a .venv in the project folder.",
            ),
            StemwerkError::EmptySelection { .. } => {
                Some("Select a media item or a time range that overlaps an item, then try again.")
            }
            StemwerkError::InvalidStemForModel { .. } => {
                Some("Guitar and piano stems require the htdemucs_6s model.")
            }
            StemwerkError::NoStemsRequested => Some("Choose at least one stem to extract."),
            StemwerkError::EmptyRenderInput { .. } => Some(
                "The exported audio for a track is empty. Check that the track is not muted and the selection contains audio.",
            ),
            StemwerkError::DuplicateTrackName { .. } => {
                Some("Rename one of the tracks so their names differ, then try again.")
            }
            StemwerkError::JobAlreadyRunning { .. } => {
                Some("Wait for the running separation to finish or cancel it first.")
            }
            StemwerkError::SpawnFailure { .. } => {
                Some("Check that the configured Python interpreter and worker script exist.")
            }
            StemwerkError::WorkerNonZeroExit { .. } => {
                Some("See separation_log.txt in the output folder for details.")
            }
            StemwerkError::InvalidDeviceToken { .. } => {
                Some("Use one of: auto, cpu, mps, cuda:N, directml[:N].")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = StemwerkError::EmptySelection {
            reason: "nothing selected".to_string(),
        };
        assert_eq!(err.error_code(), "EMPTY_SELECTION");
        assert!(err.is_precondition());
    }

    #[test]
    fn test_preconditions_have_suggestions() {
        let errors = [
            StemwerkError::NoInterpreterFound {
                tried: ".venv/bin/python3".to_string(),
            },
            StemwerkError::NoStemsRequested,
            StemwerkError::InvalidStemForModel {
                stem: StemKind::Guitar,
                model: SeparationModel::Htdemucs,
            },
            StemwerkError::EmptyRenderInput {
                track_id: "track-1".to_string(),
                path: PathBuf::from("/tmp/track-1.wav"),
            },
        ];
        for err in &errors {
            assert!(err.is_precondition(), "{} should be a precondition", err);
            assert!(err.recovery_suggestion().is_some());
        }
    }

    #[test]
    fn test_launch_errors_are_not_preconditions() {
        let err = StemwerkError::JobAlreadyRunning {
            job_id: Uuid::new_v4(),
        };
        assert!(!err.is_precondition());
        assert_eq!(err.error_code(), "JOB_ALREADY_RUNNING");
    }

    #[test]
    fn test_non_zero_exit_message() {
        let err = StemwerkError::WorkerNonZeroExit { code: Some(3) };
        assert_eq!(err.to_string(), "Worker exited with code 3");

        let err = StemwerkError::WorkerNonZeroExit { code: None };
        assert!(err.to_string().contains("signal"));
    }
}
