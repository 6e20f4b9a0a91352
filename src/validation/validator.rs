//! Post-run output checks
//!
//! Findings never change a job's terminal state; they flag the result shown
//! to the user.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;
use walkdir::WalkDir;

use super::audio::analyze_wav;
use crate::job::spec::check_render_input;
use crate::job::{JobSpec, StemKind};

pub const DEFAULT_DURATION_TOLERANCE_SEC: f64 = 0.2;
pub const DEFAULT_SILENCE_FLOOR_DB: f64 = -60.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationConfig {
    pub duration_tolerance_sec: f64,
    pub silence_floor_db: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            duration_tolerance_sec: DEFAULT_DURATION_TOLERANCE_SEC,
            silence_floor_db: DEFAULT_SILENCE_FLOOR_DB,
        }
    }
}

/// One non-fatal finding about a run's output
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    MissingStem {
        track: String,
        stem: StemKind,
    },
    DurationOutOfTolerance {
        track: String,
        stem: StemKind,
        expected_sec: f64,
        actual_sec: f64,
    },
    BelowSilenceFloor {
        track: String,
        stem: StemKind,
        rms_db: f64,
        floor_db: f64,
    },
    UnreadableStem {
        track: String,
        stem: StemKind,
        path: PathBuf,
        reason: String,
    },
    EmptyInput {
        track: String,
        path: PathBuf,
    },
}

impl ValidationIssue {
    pub fn stem(&self) -> Option<StemKind> {
        match self {
            ValidationIssue::MissingStem { stem, .. }
            | ValidationIssue::DurationOutOfTolerance { stem, .. }
            | ValidationIssue::BelowSilenceFloor { stem, .. }
            | ValidationIssue::UnreadableStem { stem, .. } => Some(*stem),
            ValidationIssue::EmptyInput { .. } => None,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingStem { track, stem } => {
                write!(f, "{}: missing {} stem", track, stem)
            }
            ValidationIssue::DurationOutOfTolerance {
                track,
                stem,
                expected_sec,
                actual_sec,
            } => write!(
                f,
                "{}: {} is {:.2}s, expected {:.2}s",
                track, stem, actual_sec, expected_sec
            ),
            ValidationIssue::BelowSilenceFloor {
                track,
                stem,
                rms_db,
                floor_db,
            } => write!(
                f,
                "{}: {} is silent ({:.1} dB RMS, floor {:.1} dB)",
                track, stem, rms_db, floor_db
            ),
            ValidationIssue::UnreadableStem {
                track,
                stem,
                path,
                reason,
            } => write!(
                f,
                "{}: cannot read {} ({}): {}",
                track,
                stem,
                path.display(),
                reason
            ),
            ValidationIssue::EmptyInput { track, path } => {
                write!(f, "{}: input {} was empty", track, path.display())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub ok: bool,
    pub produced_stems: BTreeSet<StemKind>,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn issue_messages(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.to_string()).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct OutputValidator {
    config: ValidationConfig,
}

impl OutputValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Check the stems a finished run left in `output_dir`.
    pub fn validate(&self, spec: &JobSpec, output_dir: &Path) -> ValidationResult {
        let expected_sec = spec.region_length_sec();
        let mut produced = BTreeSet::new();
        let mut issues = Vec::new();

        for track in spec.tracks() {
            if let Some(input) = spec.input_files().get(track) {
                if check_render_input(track, input).is_err() {
                    issues.push(ValidationIssue::EmptyInput {
                        track: track.to_string(),
                        path: input.clone(),
                    });
                }
            }

            let track_dir = spec.track_output_dir_in(output_dir, track);

            for &stem in spec.requested_stems() {
                let Some(path) = find_stem_file(&track_dir, stem) else {
                    issues.push(ValidationIssue::MissingStem {
                        track: track.to_string(),
                        stem,
                    });
                    continue;
                };
                produced.insert(stem);

                let stats = match analyze_wav(&path) {
                    Ok(stats) => stats,
                    Err(e) => {
                        issues.push(ValidationIssue::UnreadableStem {
                            track: track.to_string(),
                            stem,
                            path,
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };

                if (stats.duration_sec - expected_sec).abs() > self.config.duration_tolerance_sec {
                    issues.push(ValidationIssue::DurationOutOfTolerance {
                        track: track.to_string(),
                        stem,
                        expected_sec,
                        actual_sec: stats.duration_sec,
                    });
                }
                if stats.is_silent(self.config.silence_floor_db) {
                    issues.push(ValidationIssue::BelowSilenceFloor {
                        track: track.to_string(),
                        stem,
                        rms_db: stats.rms_db,
                        floor_db: self.config.silence_floor_db,
                    });
                }
            }
        }

        for issue in &issues {
            warn!("Validation issue for job {}: {}", spec.id(), issue);
        }
        let result = ValidationResult {
            ok: issues.is_empty(),
            produced_stems: produced,
            issues,
        };
        info!(
            "Validated job {}: {} stem(s), {} issue(s)",
            spec.id(),
            result.produced_stems.len(),
            result.issues.len()
        );
        result
    }
}

/// Prefer `<stem>.wav`, otherwise any WAV whose name carries a stem alias.
fn find_stem_file(dir: &Path, stem: StemKind) -> Option<PathBuf> {
    let canonical = dir.join(stem.file_name());
    if canonical.is_file() {
        return Some(canonical);
    }

    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("wav"))
        })
        .find(|path| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .and_then(StemKind::classify)
                == Some(stem)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_finds_aliased_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("mix_(No_Vocals)_htdemucs.WAV"), b"x").unwrap();
        fs::write(dir.path().join("mix_(Vocals)_htdemucs.wav"), b"x").unwrap();

        let other = find_stem_file(dir.path(), StemKind::Other).unwrap();
        assert!(other.to_string_lossy().contains("No_Vocals"));
        let vocals = find_stem_file(dir.path(), StemKind::Vocals).unwrap();
        assert!(vocals.to_string_lossy().contains("(Vocals)"));
        assert!(find_stem_file(dir.path(), StemKind::Drums).is_none());
    }

    #[test]
    fn test_canonical_name_wins() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("drums.wav"), b"x").unwrap();
        fs::write(dir.path().join("a_drum_take.wav"), b"x").unwrap();
        assert_eq!(
            find_stem_file(dir.path(), StemKind::Drums).unwrap(),
            dir.path().join("drums.wav")
        );
    }

    #[test]
    fn test_issue_display() {
        let issue = ValidationIssue::BelowSilenceFloor {
            track: "master".to_string(),
            stem: StemKind::Drums,
            rms_db: -70.0,
            floor_db: -60.0,
        };
        assert_eq!(issue.to_string(), "master: drums is silent (-70.0 dB RMS, floor -60.0 dB)");
        assert_eq!(issue.stem(), Some(StemKind::Drums));
    }
}
