//! Output validation over real WAV files

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use stemwerk::job::{JobSpec, StemKind};
use stemwerk::selection::track_file_name;
use stemwerk::validation::{OutputValidator, ValidationConfig, ValidationIssue};

struct Run {
    _dir: TempDir,
    spec: JobSpec,
    out: PathBuf,
}

/// A 4-second region on each of `tracks`, requesting `stems`.
fn run(tracks: &[&str], stems: &[StemKind]) -> Run {
    let dir = TempDir::new().unwrap();
    let mut builder = JobSpec::builder(dir.path().join("runs"))
        .regions(tracks.iter().map(|t| common::region(t, 2.0, 6.0)).collect())
        .stems(stems.iter().copied());
    for track in tracks {
        let input = dir.path().join("render").join(format!("{}.wav", track));
        common::write_tone(&input, 4.0, -20.0);
        builder = builder.input(*track, input);
    }
    let spec = builder.build().unwrap();
    let out = dir.path().join("out");
    fs::create_dir_all(&out).unwrap();
    Run {
        _dir: dir,
        spec,
        out,
    }
}

fn validate(run: &Run) -> stemwerk::validation::ValidationResult {
    OutputValidator::default().validate(&run.spec, &run.out)
}

fn stem_at(dir: &Path, name: &str, duration_sec: f64, rms_db: f64) {
    common::write_tone(&dir.join(name), duration_sec, rms_db);
}

#[test]
fn test_slightly_short_stem_is_within_tolerance() {
    let run = run(&["t1"], &[StemKind::Vocals]);
    stem_at(&run.out, "vocals.wav", 3.9, -20.0);

    let result = validate(&run);
    assert!(result.ok, "{:?}", result.issues);
    assert!(result.produced_stems.contains(&StemKind::Vocals));
}

#[test]
fn test_quiet_stem_is_flagged_silent() {
    let run = run(&["t1"], &[StemKind::Vocals, StemKind::Drums]);
    stem_at(&run.out, "vocals.wav", 4.0, -20.0);
    stem_at(&run.out, "drums.wav", 4.0, -70.0);

    let result = validate(&run);
    assert!(!result.ok);
    assert_eq!(result.produced_stems.len(), 2);
    assert_eq!(result.issues.len(), 1);
    match &result.issues[0] {
        ValidationIssue::BelowSilenceFloor {
            stem, rms_db, floor_db, ..
        } => {
            assert_eq!(*stem, StemKind::Drums);
            approx::assert_abs_diff_eq!(*rms_db, -70.0, epsilon = 0.5);
            assert_eq!(*floor_db, -60.0);
        }
        other => panic!("unexpected issue {:?}", other),
    }
    assert!(result.issue_messages()[0].contains("drums is silent"));
}

#[test]
fn test_lower_floor_accepts_quiet_stem() {
    let run = run(&["t1"], &[StemKind::Bass]);
    stem_at(&run.out, "bass.wav", 4.0, -70.0);

    let validator = OutputValidator::new(ValidationConfig {
        silence_floor_db: -80.0,
        ..ValidationConfig::default()
    });
    assert!(validator.validate(&run.spec, &run.out).ok);
}

#[test]
fn test_missing_stem_is_reported() {
    let run = run(&["t1"], &[StemKind::Vocals, StemKind::Bass]);
    stem_at(&run.out, "vocals.wav", 4.0, -20.0);

    let result = validate(&run);
    assert!(!result.ok);
    assert_eq!(
        result.issues,
        vec![ValidationIssue::MissingStem {
            track: "t1".to_string(),
            stem: StemKind::Bass,
        }]
    );
    assert_eq!(result.issues[0].stem(), Some(StemKind::Bass));
}

#[test]
fn test_duration_outside_tolerance_is_reported() {
    let run = run(&["t1"], &[StemKind::Other]);
    stem_at(&run.out, "other.wav", 3.5, -20.0);

    let result = validate(&run);
    assert!(matches!(
        result.issues.as_slice(),
        [ValidationIssue::DurationOutOfTolerance { expected_sec, .. }] if *expected_sec == 4.0
    ));
}

#[test]
fn test_worker_file_names_are_matched_by_alias() {
    let run = run(&["t1"], &[StemKind::Vocals, StemKind::Other]);
    stem_at(&run.out, "t1_(Vocals)_htdemucs.wav", 4.0, -20.0);
    stem_at(&run.out, "t1_no_vocals.wav", 4.0, -20.0);

    let result = validate(&run);
    assert!(result.ok, "{:?}", result.issues);
    assert_eq!(result.produced_stems.len(), 2);
}

#[test]
fn test_undecodable_stem_is_reported() {
    let run = run(&["t1"], &[StemKind::Bass]);
    fs::write(run.out.join("bass.wav"), b"not really a wav").unwrap();

    let result = validate(&run);
    assert!(matches!(
        result.issues.as_slice(),
        [ValidationIssue::UnreadableStem {
            stem: StemKind::Bass,
            ..
        }]
    ));
}

#[test]
fn test_multi_track_output_is_checked_per_track() {
    let run = run(&["drums bus", "keys"], &[StemKind::Drums]);
    stem_at(&run.out.join(track_file_name("drums bus")), "drums.wav", 4.0, -20.0);
    fs::create_dir_all(run.out.join("keys")).unwrap();

    let result = validate(&run);
    assert!(!result.ok);
    assert_eq!(
        result.issues,
        vec![ValidationIssue::MissingStem {
            track: "keys".to_string(),
            stem: StemKind::Drums,
        }]
    );
}

#[test]
fn test_similar_track_names_do_not_share_stems() {
    let run = run(&["Lead Vox", "Lead/Vox"], &[StemKind::Vocals]);
    let written = run.spec.track_output_dir_in(&run.out, "Lead Vox");
    stem_at(&written, "vocals.wav", 4.0, -20.0);
    assert_ne!(written, run.spec.track_output_dir_in(&run.out, "Lead/Vox"));

    let result = validate(&run);
    assert_eq!(
        result.issues,
        vec![ValidationIssue::MissingStem {
            track: "Lead/Vox".to_string(),
            stem: StemKind::Vocals,
        }]
    );
}
