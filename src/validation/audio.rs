//! WAV measurements for produced stems
//!
//! Only what the validator needs: duration and level. Samples are streamed
//! so large stems are never held in memory.

use std::path::Path;

use hound::{SampleFormat, WavReader};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StemwerkError};

/// Convert linear amplitude to decibels
pub fn linear_to_db(linear: f64) -> f64 {
    if linear <= 0.0 {
        f64::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioStats {
    pub duration_sec: f64,
    /// `-inf` for digital silence.
    pub rms_db: f64,
    pub peak_db: f64,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioStats {
    pub fn is_silent(&self, floor_db: f64) -> bool {
        self.rms_db < floor_db
    }
}

#[derive(Default)]
struct Accumulator {
    sum_squares: f64,
    peak: f64,
    count: u64,
}

impl Accumulator {
    fn push(&mut self, sample: f64) {
        self.sum_squares += sample * sample;
        self.peak = self.peak.max(sample.abs());
        self.count += 1;
    }

    fn rms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum_squares / self.count as f64).sqrt()
        }
    }
}

/// Measure a WAV file.
///
/// Integer formats of 8, 16, 24 and 32 bits and 32-bit float are supported.
pub fn analyze_wav(path: &Path) -> Result<AudioStats> {
    let read_err = |reason: String| StemwerkError::AudioRead {
        path: path.to_path_buf(),
        reason,
    };

    let mut reader = WavReader::open(path).map_err(|e| read_err(e.to_string()))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 || spec.channels == 0 {
        return Err(read_err("invalid WAV header".to_string()));
    }

    let mut acc = Accumulator::default();
    match spec.sample_format {
        SampleFormat::Float => {
            for sample in reader.samples::<f32>() {
                acc.push(sample.map_err(|e| read_err(e.to_string()))? as f64);
            }
        }
        SampleFormat::Int => {
            let scale = match spec.bits_per_sample {
                8 => 128.0,
                16 => 32_768.0,
                24 => 8_388_608.0,
                32 => 2_147_483_648.0,
                other => return Err(read_err(format!("unsupported bit depth {}", other))),
            };
            for sample in reader.samples::<i32>() {
                acc.push(sample.map_err(|e| read_err(e.to_string()))? as f64 / scale);
            }
        }
    }

    let frames = reader.duration() as f64;
    Ok(AudioStats {
        duration_sec: frames / spec.sample_rate as f64,
        rms_db: linear_to_db(acc.rms()),
        peak_db: linear_to_db(acc.peak),
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}
