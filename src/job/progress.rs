//! Worker progress stream parsing
//!
//! Recognised line shapes:
//!
//! ```text
//! PROGRESS:45:Processing (0:12 | ETA 1:05) [AMD Radeon RX 9070]
//! Selected device: cuda:0 (AMD Radeon RX 9070)
//! ```
//!
//! Anything else is ignored. Percentages are passed through in the order
//! they arrive; the worker does not guarantee they only increase.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

static PROGRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*PROGRESS\s*:\s*(\d+(?:\.\d+)?)\s*%?\s*(?::(.*))?$")
        .expect("progress pattern is valid")
});

static ETA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ETA\s*(\d+)\s*:\s*(\d{1,2})").expect("ETA pattern is valid")
});

static DEVICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Selected device:\s*(.+?)\s*$").expect("device pattern is valid")
});

static BRACKET_DEVICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\[\]]+)\]\s*$").expect("bracket pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// 0 to 100.
    pub percent: f32,
    pub stage: String,
    pub eta_sec: Option<f64>,
    /// Empty until the worker has announced a device.
    pub selected_device_label: String,
    /// Set by the supervisor on multi-track jobs.
    pub track_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Incremental parser for one worker's output
///
/// The only state carried between lines is the last announced device.
#[derive(Debug, Clone, Default)]
pub struct ProgressParser {
    device_label: Option<String>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected_device_label(&self) -> Option<&str> {
        self.device_label.as_deref()
    }

    /// Parse one line. Returns an event for progress lines only.
    pub fn parse(&mut self, line: &str) -> Option<ProgressEvent> {
        if let Some(caps) = DEVICE_RE.captures(line) {
            self.device_label = Some(caps[1].to_string());
            return None;
        }

        let caps = PROGRESS_RE.captures(line)?;
        let percent: f32 = caps[1].parse().ok()?;
        if !percent.is_finite() {
            return None;
        }
        let stage = caps
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();

        let eta_sec = parse_eta(&stage);

        if self.device_label.is_none() {
            if let Some(bracket) = BRACKET_DEVICE_RE.captures(&stage) {
                self.device_label = Some(bracket[1].trim().to_string());
            }
        }

        Some(ProgressEvent {
            percent: percent.clamp(0.0, 100.0),
            stage,
            eta_sec,
            selected_device_label: self.device_label.clone().unwrap_or_default(),
            track_id: None,
            timestamp: Utc::now(),
        })
    }
}

/// `ETA m:ss` anywhere in the text, in seconds.
pub fn parse_eta(text: &str) -> Option<f64> {
    let caps = ETA_RE.captures(text)?;
    let minutes: f64 = caps[1].parse().ok()?;
    let seconds: f64 = caps[2].parse().ok()?;
    Some(minutes * 60.0 + seconds)
}
