//! Persisted user settings
//!
//! The core reads these when a job is created and writes back only the
//! model and device after a successful launch.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StemwerkError};
use crate::job::{SeparationModel, StemKind};

/// Last dialog window position and size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowGeometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Session-persistent key/value settings
pub trait SettingsStore: Send {
    fn python_path_override(&self) -> Option<PathBuf>;
    fn set_python_path_override(&mut self, path: Option<PathBuf>) -> Result<()>;

    fn last_model(&self) -> Option<SeparationModel>;
    fn set_last_model(&mut self, model: SeparationModel) -> Result<()>;

    fn last_device_token(&self) -> Option<String>;
    fn set_last_device_token(&mut self, token: String) -> Result<()>;

    fn window_geometry(&self) -> Option<WindowGeometry>;
    fn set_window_geometry(&mut self, geometry: WindowGeometry) -> Result<()>;

    fn last_stems(&self) -> BTreeSet<StemKind>;
    fn set_last_stems(&mut self, stems: BTreeSet<StemKind>) -> Result<()>;
}

/// In-memory settings; also the on-disk JSON shape
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub python_path: Option<PathBuf>,
    pub model: Option<SeparationModel>,
    pub device: Option<String>,
    pub window: Option<WindowGeometry>,
    pub stems: BTreeSet<StemKind>,
}

impl SettingsStore for Settings {
    fn python_path_override(&self) -> Option<PathBuf> {
        self.python_path.clone()
    }

    fn set_python_path_override(&mut self, path: Option<PathBuf>) -> Result<()> {
        self.python_path = path;
        Ok(())
    }

    fn last_model(&self) -> Option<SeparationModel> {
        self.model
    }

    fn set_last_model(&mut self, model: SeparationModel) -> Result<()> {
        self.model = Some(model);
        Ok(())
    }

    fn last_device_token(&self) -> Option<String> {
        self.device.clone()
    }

    fn set_last_device_token(&mut self, token: String) -> Result<()> {
        self.device = Some(token);
        Ok(())
    }

    fn window_geometry(&self) -> Option<WindowGeometry> {
        self.window
    }

    fn set_window_geometry(&mut self, geometry: WindowGeometry) -> Result<()> {
        self.window = Some(geometry);
        Ok(())
    }

    fn last_stems(&self) -> BTreeSet<StemKind> {
        self.stems.clone()
    }

    fn set_last_stems(&mut self, stems: BTreeSet<StemKind>) -> Result<()> {
        self.stems = stems;
        Ok(())
    }
}

/// Settings backed by a pretty-printed JSON file, rewritten on every set
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
    settings: Settings,
}

impl JsonSettingsStore {
    /// Load from `path`. A missing file yields defaults.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| StemwerkError::FileReadError {
                path: path.clone(),
                source: e,
            })?;
            serde_json::from_str(&content)?
        } else {
            debug!("No settings at {}, using defaults", path.display());
            Settings::default()
        };
        Ok(Self { path, settings })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| StemwerkError::DirectoryCreateError {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let content = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.path, content).map_err(|e| StemwerkError::FileWriteError {
            path: self.path.clone(),
            source: e,
        })?;

        Ok(())
    }
}

impl SettingsStore for JsonSettingsStore {
    fn python_path_override(&self) -> Option<PathBuf> {
        self.settings.python_path_override()
    }

    fn set_python_path_override(&mut self, path: Option<PathBuf>) -> Result<()> {
        self.settings.set_python_path_override(path)?;
        self.save()
    }

    fn last_model(&self) -> Option<SeparationModel> {
        self.settings.last_model()
    }

    fn set_last_model(&mut self, model: SeparationModel) -> Result<()> {
        self.settings.set_last_model(model)?;
        self.save()
    }

    fn last_device_token(&self) -> Option<String> {
        self.settings.last_device_token()
    }

    fn set_last_device_token(&mut self, token: String) -> Result<()> {
        self.settings.set_last_device_token(token)?;
        self.save()
    }

    fn window_geometry(&self) -> Option<WindowGeometry> {
        self.settings.window_geometry()
    }

    fn set_window_geometry(&mut self, geometry: WindowGeometry) -> Result<()> {
        self.settings.set_window_geometry(geometry)?;
        self.save()
    }

    fn last_stems(&self) -> BTreeSet<StemKind> {
        self.settings.last_stems()
    }

    fn set_last_stems(&mut self, stems: BTreeSet<StemKind>) -> Result<()> {
        self.settings.set_last_stems(stems)?;
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonSettingsStore::load(temp_dir.path().join("settings.json")).unwrap();
        assert_eq!(store.settings(), &Settings::default());
        assert!(store.last_model().is_none());
    }

    #[test]
    fn test_set_persists_across_loads() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("settings.json");

        let mut store = JsonSettingsStore::load(&path).unwrap();
        store.set_last_model(SeparationModel::Htdemucs6s).unwrap();
        store.set_last_device_token("cuda:1".to_string()).unwrap();
        store
            .set_last_stems([StemKind::Guitar, StemKind::Piano].into_iter().collect())
            .unwrap();
        store
            .set_window_geometry(WindowGeometry {
                x: 10,
                y: 20,
                width: 640,
                height: 480,
            })
            .unwrap();

        let reloaded = JsonSettingsStore::load(&path).unwrap();
        assert_eq!(reloaded.settings(), store.settings());
        assert_eq!(reloaded.last_device_token().as_deref(), Some("cuda:1"));
    }

    #[test]
    fn test_corrupt_file_is_json_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        let err = JsonSettingsStore::load(&path).unwrap_err();
        assert_eq!(err.error_code(), "SERIALIZATION_ERROR");
    }
}
