//! Selection resolution
//!
//! Converts the host's selection (items, time range, or both) into concrete
//! regions and the per-track files the host must render before a job starts.

mod region;
mod resolver;

pub use region::{
    HostSelectionState, RegionKind, SelectedItem, SelectionRegion, TimeRange, MASTER_TRACK_ID,
};
pub use resolver::{plan_inputs, track_file_name, SelectionResolver};
