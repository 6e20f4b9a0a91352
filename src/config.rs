//! Runtime configuration
//!
//! Defaults can be overridden through `STEMWERK_*` environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use log::warn;

use crate::capability::probe::DEFAULT_PROBE_TIMEOUT;
use crate::capability::{InterpreterResolver, ProbeConfig};
use crate::job::{SupervisorConfig, DEFAULT_CANCEL_GRACE};
use crate::state::DEFAULT_HISTORY_CAPACITY;
use crate::validation::ValidationConfig;

pub const ENV_PROJECT_ROOT: &str = "STEMWERK_PROJECT_ROOT";
pub const ENV_WORKER_SCRIPT: &str = "STEMWERK_WORKER_SCRIPT";
pub const ENV_OUTPUT_ROOT: &str = "STEMWERK_OUTPUT_ROOT";
pub const ENV_PYTHON: &str = "STEMWERK_PYTHON";
pub const ENV_PROBE_TIMEOUT_MS: &str = "STEMWERK_PROBE_TIMEOUT_MS";
pub const ENV_CANCEL_GRACE_MS: &str = "STEMWERK_CANCEL_GRACE_MS";

/// Worker script location relative to the project root.
pub const DEFAULT_WORKER_SCRIPT: &str = "scripts/reaper/audio_separator_process.py";

#[derive(Debug, Clone)]
pub struct StemwerkConfig {
    pub project_root: PathBuf,
    pub worker_script: PathBuf,
    pub output_root: PathBuf,
    /// Interpreter override from the environment; wins over saved settings.
    pub python: Option<PathBuf>,
    pub probe_timeout: Duration,
    pub cancel_grace: Duration,
    pub validation: ValidationConfig,
    pub history_capacity: usize,
    pub settings_path: Option<PathBuf>,
}

impl Default for StemwerkConfig {
    fn default() -> Self {
        let project_root = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::for_project(project_root)
    }
}

impl StemwerkConfig {
    /// Defaults for a given project root.
    pub fn for_project(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        Self {
            worker_script: project_root.join(DEFAULT_WORKER_SCRIPT),
            project_root,
            output_root: env::temp_dir().join("stemwerk"),
            python: None,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            validation: ValidationConfig::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            settings_path: directories::ProjectDirs::from("", "", "stemwerk")
                .map(|dirs| dirs.config_dir().join("settings.json")),
        }
    }

    /// Defaults with any `STEMWERK_*` overrides applied.
    pub fn from_env() -> Self {
        let mut config = match env::var_os(ENV_PROJECT_ROOT) {
            Some(root) => Self::for_project(root),
            None => Self::default(),
        };
        if let Some(script) = env::var_os(ENV_WORKER_SCRIPT) {
            config.worker_script = PathBuf::from(script);
        }
        if let Some(out) = env::var_os(ENV_OUTPUT_ROOT) {
            config.output_root = PathBuf::from(out);
        }
        if let Some(python) = env::var_os(ENV_PYTHON).filter(|p| !p.is_empty()) {
            config.python = Some(PathBuf::from(python));
        }
        if let Some(ms) = millis_from_env(ENV_PROBE_TIMEOUT_MS) {
            config.probe_timeout = ms;
        }
        if let Some(ms) = millis_from_env(ENV_CANCEL_GRACE_MS) {
            config.cancel_grace = ms;
        }
        config
    }

    pub fn interpreter_resolver(&self) -> InterpreterResolver {
        InterpreterResolver::new(&self.project_root)
    }

    pub fn probe_config(&self, user_interpreter: Option<PathBuf>) -> ProbeConfig {
        ProbeConfig {
            timeout: self.probe_timeout,
            worker_script: Some(self.worker_script.clone()),
            user_interpreter,
        }
    }

    pub fn supervisor_config(&self, interpreter: impl Into<PathBuf>) -> SupervisorConfig {
        SupervisorConfig {
            interpreter: interpreter.into(),
            worker_script: self.worker_script.clone(),
            grace_period: self.cancel_grace,
            validation: self.validation,
        }
    }
}

fn millis_from_env(var: &str) -> Option<Duration> {
    let raw = env::var(var).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a number of milliseconds", var, raw);
            None
        }
    }
}
