//! Turns a host selection into export regions

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::debug;

use super::region::{HostSelectionState, RegionKind, SelectedItem, SelectionRegion};
use crate::error::{Result, StemwerkError};

#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionResolver;

impl SelectionResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the selection into one region per source track.
    ///
    /// All returned regions share the same bounds. A selection with a time
    /// range but no tracks yields a single region with no source tracks.
    pub fn resolve(&self, state: &HostSelectionState) -> Result<Vec<SelectionRegion>> {
        let range = state.time_range.filter(|r| r.is_active());
        let items: Vec<&SelectedItem> = state.items.iter().filter(|i| i.is_valid()).collect();

        let (kind, start, end, tracks) = match (range, items.is_empty()) {
            (None, true) => return Err(empty("nothing is selected")),

            (Some(range), false) => {
                let overlapping: Vec<&SelectedItem> =
                    items.into_iter().filter(|i| i.overlaps(&range)).collect();
                if overlapping.is_empty() {
                    return Err(empty("the time range does not overlap any selected item"));
                }
                let (item_start, item_end) = span(&overlapping);
                (
                    RegionKind::Intersection,
                    range.start_sec.max(item_start),
                    range.end_sec.min(item_end),
                    unique_tracks(&overlapping),
                )
            }

            (Some(range), true) => (
                RegionKind::TimeRange,
                range.start_sec,
                range.end_sec,
                dedup(&state.selected_tracks),
            ),

            (None, false) => {
                let (start, end) = span(&items);
                (RegionKind::FullItem, start, end, unique_tracks(&items))
            }
        };

        if !(end > start) {
            return Err(empty("the selected region has no length"));
        }

        debug!(
            "Resolved {} region {:.3}-{:.3}s across {} track(s)",
            kind,
            start,
            end,
            tracks.len()
        );

        let region = |source_track_ids: Vec<String>| SelectionRegion {
            kind,
            start_sec: start,
            end_sec: end,
            source_track_ids,
        };

        if tracks.is_empty() {
            Ok(vec![region(Vec::new())])
        } else {
            Ok(tracks.into_iter().map(|t| region(vec![t])).collect())
        }
    }
}

/// Where the host should render each region's input audio.
pub fn plan_inputs(regions: &[SelectionRegion], render_dir: &Path) -> BTreeMap<String, PathBuf> {
    regions
        .iter()
        .map(|r| {
            let key = r.track_key().to_string();
            let path = render_dir.join(format!("{}.wav", track_file_name(&key)));
            (key, path)
        })
        .collect()
}

fn empty(reason: &str) -> StemwerkError {
    StemwerkError::EmptySelection {
        reason: reason.to_string(),
    }
}

fn span(items: &[&SelectedItem]) -> (f64, f64) {
    items.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), i| {
        (lo.min(i.start_sec), hi.max(i.end_sec))
    })
}

fn unique_tracks(items: &[&SelectedItem]) -> Vec<String> {
    let ids: Vec<String> = items.iter().map(|i| i.track_id.clone()).collect();
    dedup(&ids)
}

/// Remove duplicates, keeping first-seen order.
fn dedup(ids: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(id.clone());
        }
    }
    out
}

/// File and directory name for a track's rendered input and stems.
///
/// Ids that are already file-safe are used as-is. Any other id is
/// sanitized and suffixed with a hash of the raw id, so `Lead Vox` and
/// `Lead/Vox` never share a path.
pub fn track_file_name(track_id: &str) -> String {
    let safe: String = track_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe == track_id && !safe.is_empty() {
        safe
    } else {
        format!("{}_{:08x}", safe, fnv1a(track_id.as_bytes()))
    }
}

/// 32-bit FNV-1a; stable across builds so names survive a restart.
fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5_u32, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(0x0100_0193)
    })
}
