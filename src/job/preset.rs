//! Toolbar quick presets
//!
//! A preset fixes model and stems so a one-click action can build a job
//! without opening the dialog.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::spec::{SeparationModel, StemKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuickPreset {
    VocalsOnly,
    DrumsOnly,
    BassOnly,
    OtherOnly,
    /// Everything except vocals.
    Karaoke,
    AllStems,
    SixStems,
}

impl QuickPreset {
    pub const ALL: [QuickPreset; 7] = [
        QuickPreset::VocalsOnly,
        QuickPreset::DrumsOnly,
        QuickPreset::BassOnly,
        QuickPreset::OtherOnly,
        QuickPreset::Karaoke,
        QuickPreset::AllStems,
        QuickPreset::SixStems,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuickPreset::VocalsOnly => "vocals-only",
            QuickPreset::DrumsOnly => "drums-only",
            QuickPreset::BassOnly => "bass-only",
            QuickPreset::OtherOnly => "other-only",
            QuickPreset::Karaoke => "karaoke",
            QuickPreset::AllStems => "all-stems",
            QuickPreset::SixStems => "six-stems",
        }
    }

    pub fn model(&self) -> SeparationModel {
        match self {
            QuickPreset::SixStems => SeparationModel::Htdemucs6s,
            _ => SeparationModel::Htdemucs,
        }
    }

    pub fn stems(&self) -> &'static [StemKind] {
        match self {
            QuickPreset::VocalsOnly => &[StemKind::Vocals],
            QuickPreset::DrumsOnly => &[StemKind::Drums],
            QuickPreset::BassOnly => &[StemKind::Bass],
            QuickPreset::OtherOnly => &[StemKind::Other],
            QuickPreset::Karaoke => &[StemKind::Drums, StemKind::Bass, StemKind::Other],
            QuickPreset::AllStems => &StemKind::FOUR,
            QuickPreset::SixStems => &StemKind::ALL,
        }
    }
}

impl fmt::Display for QuickPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QuickPreset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        QuickPreset::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| format!("unknown preset '{}'", s))
    }
}
