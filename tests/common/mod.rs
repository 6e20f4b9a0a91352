//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::f64::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};

use stemwerk::selection::{RegionKind, SelectionRegion};

pub const SAMPLE_RATE: u32 = 8_000;

/// Write a mono float sine of `duration_sec` whose RMS is `rms_db`.
pub fn write_tone(path: &Path, duration_sec: f64, rms_db: f64) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let spec = WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let amplitude = 10f64.powf(rms_db / 20.0) * 2f64.sqrt();
    let frames = (duration_sec * SAMPLE_RATE as f64).round() as usize;
    let mut writer = WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        let t = i as f64 / SAMPLE_RATE as f64;
        writer
            .write_sample((amplitude * (2.0 * PI * 440.0 * t).sin()) as f32)
            .unwrap();
    }
    writer.finalize().unwrap();
}

/// Write an executable shell script.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn region(track: &str, start_sec: f64, end_sec: f64) -> SelectionRegion {
    SelectionRegion {
        kind: RegionKind::TimeRange,
        start_sec,
        end_sec,
        source_track_ids: vec![track.to_string()],
    }
}
