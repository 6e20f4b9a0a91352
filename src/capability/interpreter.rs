//! Python interpreter resolution
//!
//! Candidates are tried in a fixed order and the first one that exists and is
//! executable wins:
//!
//! 1. A user-configured path
//! 2. The project's local virtual environment
//! 3. `python3` on the search path
//! 4. `python` on the search path
//!
//! All checks are filesystem-only; nothing is executed.

use std::env;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StemwerkError};

/// Where an interpreter candidate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterpreterOrigin {
    UserConfigured,
    LocalVenv,
    SystemPath,
}

impl fmt::Display for InterpreterOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InterpreterOrigin::UserConfigured => "user-configured",
            InterpreterOrigin::LocalVenv => "local-venv",
            InterpreterOrigin::SystemPath => "system-path",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterCandidate {
    pub path: PathBuf,
    pub origin: InterpreterOrigin,
}

impl InterpreterCandidate {
    pub fn new(path: impl Into<PathBuf>, origin: InterpreterOrigin) -> Self {
        Self {
            path: path.into(),
            origin,
        }
    }

    /// Whether the candidate currently exists and is executable.
    pub fn is_usable(&self) -> bool {
        is_executable(&self.path)
    }
}

/// What to do when a user-configured interpreter is unusable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserPathPolicy {
    /// Log a warning and continue with the venv and system rungs.
    #[default]
    FallThrough,
    /// Fail immediately with `NoInterpreterFound`.
    Strict,
}

#[derive(Debug, Clone)]
pub struct InterpreterResolver {
    project_root: PathBuf,
    search_path: Option<OsString>,
    policy: UserPathPolicy,
}

impl InterpreterResolver {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            search_path: None,
            policy: UserPathPolicy::default(),
        }
    }

    /// Use `path` instead of the `PATH` environment variable.
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    pub fn with_policy(mut self, policy: UserPathPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Platform-specific virtual environment interpreter under the project root.
    pub fn venv_interpreter(&self) -> PathBuf {
        if cfg!(windows) {
            self.project_root
                .join(".venv")
                .join("Scripts")
                .join("python.exe")
        } else {
            self.project_root.join(".venv").join("bin").join("python3")
        }
    }

    /// Every candidate in priority order, usable or not.
    pub fn candidates(&self, user_configured: Option<&Path>) -> Vec<InterpreterCandidate> {
        let mut out = Vec::with_capacity(4);
        if let Some(user) = user_configured {
            out.push(InterpreterCandidate::new(
                user,
                InterpreterOrigin::UserConfigured,
            ));
        }
        out.push(InterpreterCandidate::new(
            self.venv_interpreter(),
            InterpreterOrigin::LocalVenv,
        ));
        for name in ["python3", "python"] {
            let path = self
                .find_on_search_path(name)
                .unwrap_or_else(|| PathBuf::from(name));
            out.push(InterpreterCandidate::new(path, InterpreterOrigin::SystemPath));
        }
        out
    }

    /// Resolve the interpreter to launch the worker with.
    pub fn resolve(&self, user_configured: Option<&Path>) -> Result<InterpreterCandidate> {
        let mut tried = Vec::new();

        if let Some(user) = user_configured {
            if is_executable(user) {
                debug!("Using configured interpreter {}", user.display());
                return Ok(InterpreterCandidate::new(
                    user,
                    InterpreterOrigin::UserConfigured,
                ));
            }
            tried.push(user.display().to_string());
            match self.policy {
                UserPathPolicy::Strict => {
                    return Err(StemwerkError::NoInterpreterFound {
                        tried: tried.join(", "),
                    })
                }
                UserPathPolicy::FallThrough => warn!(
                    "Configured interpreter {} is missing or not executable, trying fallbacks",
                    user.display()
                ),
            }
        }

        let venv = self.venv_interpreter();
        if is_executable(&venv) {
            return Ok(InterpreterCandidate::new(venv, InterpreterOrigin::LocalVenv));
        }
        tried.push(venv.display().to_string());

        for name in ["python3", "python"] {
            if let Some(found) = self.find_on_search_path(name) {
                return Ok(InterpreterCandidate::new(found, InterpreterOrigin::SystemPath));
            }
            tried.push(name.to_string());
        }

        Err(StemwerkError::NoInterpreterFound {
            tried: tried.join(", "),
        })
    }

    fn find_on_search_path(&self, name: &str) -> Option<PathBuf> {
        let search = match &self.search_path {
            Some(path) => path.clone(),
            None => env::var_os("PATH")?,
        };
        let file_name = if cfg!(windows) {
            format!("{}.exe", name)
        } else {
            name.to_string()
        };
        env::split_paths(&search)
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(|dir| dir.join(&file_name))
            .find(|candidate| is_executable(candidate))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    match path.metadata() {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
