//! Host selection state and the regions derived from it

use std::fmt;

use serde::{Deserialize, Serialize};

/// Track id used when a region has no source tracks (the master mix).
pub const MASTER_TRACK_ID: &str = "master";

/// A host time selection, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_sec: f64,
    pub end_sec: f64,
}

impl TimeRange {
    pub fn new(start_sec: f64, end_sec: f64) -> Self {
        Self { start_sec, end_sec }
    }

    /// A range is active only when it has a positive, finite length.
    pub fn is_active(&self) -> bool {
        self.start_sec.is_finite() && self.end_sec.is_finite() && self.end_sec > self.start_sec
    }
}

/// One selected media item on a track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedItem {
    pub item_id: String,
    pub track_id: String,
    pub start_sec: f64,
    pub end_sec: f64,
}

impl SelectedItem {
    pub fn new(
        item_id: impl Into<String>,
        track_id: impl Into<String>,
        start_sec: f64,
        end_sec: f64,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            track_id: track_id.into(),
            start_sec,
            end_sec,
        }
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.start_sec.is_finite() && self.end_sec.is_finite() && self.end_sec > self.start_sec
    }

    pub(crate) fn overlaps(&self, range: &TimeRange) -> bool {
        self.start_sec < range.end_sec && self.end_sec > range.start_sec
    }
}

/// Snapshot of what the user has selected in the host
///
/// Passed in by the host at job-creation time; the core never reads host
/// globals directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostSelectionState {
    pub time_range: Option<TimeRange>,
    pub items: Vec<SelectedItem>,
    /// Tracks selected without an item selection; used with a time range.
    pub selected_tracks: Vec<String>,
}

impl HostSelectionState {
    pub fn with_time_range(mut self, start_sec: f64, end_sec: f64) -> Self {
        self.time_range = Some(TimeRange::new(start_sec, end_sec));
        self
    }

    pub fn with_item(mut self, item: SelectedItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn with_track(mut self, track_id: impl Into<String>) -> Self {
        self.selected_tracks.push(track_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegionKind {
    FullItem,
    TimeRange,
    Intersection,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegionKind::FullItem => "full-item",
            RegionKind::TimeRange => "time-range",
            RegionKind::Intersection => "intersection",
        };
        write!(f, "{}", s)
    }
}

/// A concrete span to export and separate
///
/// Only [`SelectionResolver`](super::SelectionResolver) creates these, and
/// it guarantees `end_sec > start_sec`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRegion {
    pub kind: RegionKind,
    pub start_sec: f64,
    pub end_sec: f64,
    pub source_track_ids: Vec<String>,
}

impl SelectionRegion {
    pub fn length_sec(&self) -> f64 {
        self.end_sec - self.start_sec
    }

    /// Whether the bounds are finite and of positive length.
    pub fn is_valid(&self) -> bool {
        self.start_sec.is_finite() && self.end_sec.is_finite() && self.end_sec > self.start_sec
    }

    /// Key used for this region's input file and output directory.
    pub fn track_key(&self) -> &str {
        self.source_track_ids
            .first()
            .map(String::as_str)
            .unwrap_or(MASTER_TRACK_ID)
    }
}
