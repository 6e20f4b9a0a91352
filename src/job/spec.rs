//! Immutable job descriptions
//!
//! A [`JobSpec`] is the single validation gate before any process is
//! spawned. Building one checks stems against the model and every rendered
//! input on disk; a new spec (with a fresh id and output directory) is built
//! for every run.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::preset::QuickPreset;
use crate::capability::Device;
use crate::error::{Result, StemwerkError};
use crate::selection::{track_file_name, SelectionRegion};

/// Separation model understood by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SeparationModel {
    #[default]
    Htdemucs,
    HtdemucsFt,
    Htdemucs6s,
}

impl SeparationModel {
    pub const ALL: [SeparationModel; 3] = [
        SeparationModel::Htdemucs,
        SeparationModel::HtdemucsFt,
        SeparationModel::Htdemucs6s,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SeparationModel::Htdemucs => "htdemucs",
            SeparationModel::HtdemucsFt => "htdemucs_ft",
            SeparationModel::Htdemucs6s => "htdemucs_6s",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "htdemucs" => Ok(SeparationModel::Htdemucs),
            "htdemucs_ft" => Ok(SeparationModel::HtdemucsFt),
            "htdemucs_6s" => Ok(SeparationModel::Htdemucs6s),
            _ => Err(StemwerkError::UnknownModel {
                name: name.to_string(),
            }),
        }
    }

    /// Every stem this model writes.
    pub fn stems(&self) -> &'static [StemKind] {
        match self {
            SeparationModel::Htdemucs | SeparationModel::HtdemucsFt => &StemKind::FOUR,
            SeparationModel::Htdemucs6s => &StemKind::ALL,
        }
    }

    pub fn supports(&self, stem: StemKind) -> bool {
        self.stems().contains(&stem)
    }
}

impl fmt::Display for SeparationModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One isolated audio component
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum StemKind {
    Vocals,
    Drums,
    Bass,
    Other,
    Guitar,
    Piano,
}

impl StemKind {
    pub const FOUR: [StemKind; 4] = [
        StemKind::Vocals,
        StemKind::Drums,
        StemKind::Bass,
        StemKind::Other,
    ];

    pub const ALL: [StemKind; 6] = [
        StemKind::Vocals,
        StemKind::Drums,
        StemKind::Bass,
        StemKind::Other,
        StemKind::Guitar,
        StemKind::Piano,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StemKind::Vocals => "vocals",
            StemKind::Drums => "drums",
            StemKind::Bass => "bass",
            StemKind::Other => "other",
            StemKind::Guitar => "guitar",
            StemKind::Piano => "piano",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "vocals" | "vocal" => Ok(StemKind::Vocals),
            "drums" | "drum" => Ok(StemKind::Drums),
            "bass" => Ok(StemKind::Bass),
            "other" | "instrumental" => Ok(StemKind::Other),
            "guitar" => Ok(StemKind::Guitar),
            "piano" | "keys" => Ok(StemKind::Piano),
            _ => Err(StemwerkError::UnknownStem {
                name: name.to_string(),
            }),
        }
    }

    /// Canonical output file name, e.g. `vocals.wav`.
    pub fn file_name(&self) -> String {
        format!("{}.wav", self.as_str())
    }

    /// Classify an output file stem (name without extension).
    ///
    /// The name is split into words at `_ ( ) -`, spaces and dots. A
    /// parenthesised stem such as `song_(Vocals)_htdemucs` wins; otherwise
    /// the last stem word does, since the worker appends the stem after the
    /// input name. `no_vocals` counts as the accompaniment.
    pub fn classify(file_stem: &str) -> Option<StemKind> {
        let lower = file_stem.to_lowercase();

        if let Some(kind) = lower
            .split('(')
            .skip(1)
            .filter_map(|rest| rest.split_once(')'))
            .find_map(|(inner, _)| StemKind::parse(inner).ok())
        {
            return Some(kind);
        }

        let words: Vec<&str> = lower
            .split(|c: char| matches!(c, '_' | '(' | ')' | '-' | ' ' | '.'))
            .filter(|w| !w.is_empty())
            .collect();
        words.iter().enumerate().rev().find_map(|(i, word)| {
            let kind = StemKind::parse(word).ok()?;
            if kind == StemKind::Vocals && i > 0 && words[i - 1] == "no" {
                Some(StemKind::Other)
            } else {
                Some(kind)
            }
        })
    }
}

impl fmt::Display for StemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Description of one separation request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSpec {
    id: Uuid,
    regions: Vec<SelectionRegion>,
    model: SeparationModel,
    requested_stems: BTreeSet<StemKind>,
    device: Device,
    input_files: BTreeMap<String, PathBuf>,
    output_dir: PathBuf,
    created_at: DateTime<Utc>,
}

impl JobSpec {
    pub fn builder(output_root: impl Into<PathBuf>) -> JobSpecBuilder {
        JobSpecBuilder::new(output_root)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn regions(&self) -> &[SelectionRegion] {
        &self.regions
    }

    pub fn model(&self) -> SeparationModel {
        self.model
    }

    pub fn requested_stems(&self) -> &BTreeSet<StemKind> {
        &self.requested_stems
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn input_files(&self) -> &BTreeMap<String, PathBuf> {
        &self.input_files
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Length of the region being separated, in seconds.
    pub fn region_length_sec(&self) -> f64 {
        self.regions.first().map(|r| r.length_sec()).unwrap_or(0.0)
    }

    /// Track keys in the order their worker passes run.
    pub fn tracks(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(self.regions.len());
        for region in &self.regions {
            let key = region.track_key();
            if !out.contains(&key) {
                out.push(key);
            }
        }
        out
    }

    pub fn is_multi_track(&self) -> bool {
        self.tracks().len() > 1
    }

    /// Where stems for `track` are written.
    ///
    /// Single-track jobs write directly into the run folder; multi-track
    /// jobs get one subfolder per track.
    pub fn track_output_dir(&self, track: &str) -> PathBuf {
        self.track_output_dir_in(&self.output_dir, track)
    }

    /// [`track_output_dir`](Self::track_output_dir) relative to another run folder.
    pub fn track_output_dir_in(&self, output_dir: &Path, track: &str) -> PathBuf {
        if self.is_multi_track() {
            output_dir.join(track_file_name(track))
        } else {
            output_dir.to_path_buf()
        }
    }

    /// Whether the worker must be told to restrict its output.
    pub fn restricts_stems(&self) -> bool {
        self.requested_stems.len() < self.model.stems().len()
    }

    /// Arguments following the interpreter for one worker pass.
    pub fn worker_args(&self, worker_script: &Path, track: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![worker_script.into()];
        if let Some(input) = self.input_files.get(track) {
            args.push(input.into());
        }
        args.push(self.track_output_dir(track).into());
        args.push("--model".into());
        args.push(self.model.as_str().into());
        args.push("--device".into());
        args.push(self.device.worker_token().into());
        if self.restricts_stems() {
            for stem in &self.requested_stems {
                args.push("--stem".into());
                args.push(stem.as_str().into());
            }
        }
        args
    }

    /// One-line summary for run history, e.g. `htdemucs vocals,drums on cuda:0 (4.00s)`.
    pub fn summary(&self) -> String {
        let stems: Vec<&str> = self.requested_stems.iter().map(|s| s.as_str()).collect();
        format!(
            "{} {} on {} ({:.2}s, {} track(s))",
            self.model,
            stems.join(","),
            self.device.id(),
            self.region_length_sec(),
            self.tracks().len()
        )
    }
}

/// Collects and validates everything a [`JobSpec`] needs
#[derive(Debug, Clone)]
pub struct JobSpecBuilder {
    output_root: PathBuf,
    regions: Vec<SelectionRegion>,
    model: SeparationModel,
    stems: BTreeSet<StemKind>,
    device: Device,
    input_files: BTreeMap<String, PathBuf>,
}

impl JobSpecBuilder {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            regions: Vec::new(),
            model: SeparationModel::default(),
            stems: BTreeSet::new(),
            device: Device::cpu(),
            input_files: BTreeMap::new(),
        }
    }

    pub fn regions(mut self, regions: Vec<SelectionRegion>) -> Self {
        self.regions = regions;
        self
    }

    pub fn model(mut self, model: SeparationModel) -> Self {
        self.model = model;
        self
    }

    pub fn stem(mut self, stem: StemKind) -> Self {
        self.stems.insert(stem);
        self
    }

    pub fn stems(mut self, stems: impl IntoIterator<Item = StemKind>) -> Self {
        self.stems = stems.into_iter().collect();
        self
    }

    /// Apply a toolbar preset's model and stems.
    pub fn preset(self, preset: QuickPreset) -> Self {
        self.model(preset.model()).stems(preset.stems().iter().copied())
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn input(mut self, track: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.input_files.insert(track.into(), path.into());
        self
    }

    /// Validate and assemble a spec. Callable repeatedly; each call gets a
    /// fresh id and output directory.
    pub fn build(&self) -> Result<JobSpec> {
        if self.stems.is_empty() {
            return Err(StemwerkError::NoStemsRequested);
        }
        if let Some(stem) = self.stems.iter().find(|s| !self.model.supports(**s)) {
            return Err(StemwerkError::InvalidStemForModel {
                stem: *stem,
                model: self.model,
            });
        }

        if self.regions.is_empty() {
            return Err(StemwerkError::EmptySelection {
                reason: "no region to separate".to_string(),
            });
        }
        if let Some(bad) = self.regions.iter().find(|r| !r.is_valid()) {
            return Err(StemwerkError::EmptySelection {
                reason: format!(
                    "region {:.3}-{:.3}s has no length",
                    bad.start_sec, bad.end_sec
                ),
            });
        }

        let mut names: BTreeMap<String, &str> = BTreeMap::new();
        for region in &self.regions {
            let track = region.track_key();
            let path = self.input_files.get(track).cloned().unwrap_or_default();
            check_render_input(track, &path)?;

            let name = track_file_name(track);
            match names.get(&name) {
                Some(first) if *first != track => {
                    return Err(StemwerkError::DuplicateTrackName {
                        first: first.to_string(),
                        second: track.to_string(),
                        name,
                    });
                }
                _ => {
                    names.insert(name, track);
                }
            }
        }

        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let simple = id.simple().to_string();
        let output_dir = self.output_root.join(format!(
            "stemwerk_{}_{}",
            created_at.format("%Y%m%d_%H%M%S"),
            &simple[..8]
        ));

        Ok(JobSpec {
            id,
            regions: self.regions.clone(),
            model: self.model,
            requested_stems: self.stems.clone(),
            device: self.device.clone(),
            input_files: self.input_files.clone(),
            output_dir,
            created_at,
        })
    }
}

/// A rendered input must exist and contain data.
pub(crate) fn check_render_input(track: &str, path: &Path) -> Result<()> {
    let empty = || StemwerkError::EmptyRenderInput {
        track_id: track.to_string(),
        path: path.to_path_buf(),
    };
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        _ => Err(empty()),
    }
}
