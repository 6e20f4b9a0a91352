//! Compute capability probing
//!
//! Combines the worker's own device listing (what torch can actually see)
//! with cheap native driver queries. Every external check runs through
//! [`run_bounded`], so a hung driver costs at most one timeout.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;

use super::device::{parse_device_token, Backend, Device};
use super::interpreter::{InterpreterCandidate, InterpreterResolver};
use crate::process::{run_bounded, BoundedError};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const LISTING_BEGIN: &str = "STEMWERK_DEVICES_BEGIN";
const LISTING_END: &str = "STEMWERK_DEVICES_END";
const LISTING_DEVICE: &str = "STEMWERK_DEVICE";
const LISTING_SKIPPED: &str = "STEMWERK_DEVICE_SKIPPED";
const LISTING_ENV: &str = "STEMWERK_ENV_JSON";

/// Why a single backend check produced no devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// The backend's tooling is not installed. Not reported as a device.
    Absent,
    /// The tooling exists but the query failed.
    Failed(String),
}

impl From<BoundedError> for ProbeFailure {
    fn from(err: BoundedError) -> Self {
        match err {
            BoundedError::Spawn(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ProbeFailure::Absent
            }
            other => ProbeFailure::Failed(other.to_string()),
        }
    }
}

/// One native backend query
pub trait BackendProbe: Send + Sync {
    fn name(&self) -> &str;

    fn backend(&self) -> Backend;

    fn probe(&self, timeout: Duration) -> Result<Vec<Device>, ProbeFailure>;
}

/// NVIDIA GPUs via `nvidia-smi`
#[derive(Debug, Clone)]
pub struct NvidiaSmiProbe {
    program: PathBuf,
}

impl Default for NvidiaSmiProbe {
    fn default() -> Self {
        Self {
            program: PathBuf::from("nvidia-smi"),
        }
    }
}

impl NvidiaSmiProbe {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl BackendProbe for NvidiaSmiProbe {
    fn name(&self) -> &str {
        "nvidia-smi"
    }

    fn backend(&self) -> Backend {
        Backend::Cuda
    }

    fn probe(&self, timeout: Duration) -> Result<Vec<Device>, ProbeFailure> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--query-gpu=index,name", "--format=csv,noheader"]);
        let output = run_bounded(cmd, timeout)?;
        if !output.success() {
            return Err(ProbeFailure::Failed(format!(
                "nvidia-smi exited with {}",
                output.status
            )));
        }
        Ok(parse_nvidia_smi(&output.stdout))
    }
}

/// Parse `index, name` CSV rows.
pub fn parse_nvidia_smi(lines: &[String]) -> Vec<Device> {
    lines
        .iter()
        .filter_map(|line| {
            let (index, name) = line.split_once(',')?;
            let index: u32 = index.trim().parse().ok()?;
            Some(Device::new(Backend::Cuda, index, name.trim()))
        })
        .collect()
}

/// AMD GPUs via `rocminfo`
#[derive(Debug, Clone)]
pub struct RocmInfoProbe {
    program: PathBuf,
}

impl Default for RocmInfoProbe {
    fn default() -> Self {
        Self {
            program: PathBuf::from("rocminfo"),
        }
    }
}

impl RocmInfoProbe {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl BackendProbe for RocmInfoProbe {
    fn name(&self) -> &str {
        "rocminfo"
    }

    fn backend(&self) -> Backend {
        Backend::Rocm
    }

    fn probe(&self, timeout: Duration) -> Result<Vec<Device>, ProbeFailure> {
        let output = run_bounded(Command::new(&self.program), timeout)?;
        if !output.success() {
            return Err(ProbeFailure::Failed(format!(
                "rocminfo exited with {}",
                output.status
            )));
        }
        Ok(parse_rocminfo(&output.stdout))
    }
}

/// Extract GPU agents (`Name: gfx*`) from rocminfo output.
///
/// The marketing name is used as the display name when the agent has one.
pub fn parse_rocminfo(lines: &[String]) -> Vec<Device> {
    let mut devices: Vec<Device> = Vec::new();
    let mut in_gpu_agent = false;
    let mut named = false;

    for line in lines {
        let trimmed = line.trim();
        if trimmed.starts_with("Agent ") {
            in_gpu_agent = false;
            continue;
        }
        if let Some(value) = trimmed.strip_prefix("Marketing Name:") {
            let value = value.trim();
            if in_gpu_agent && !named && !value.is_empty() {
                if let Some(last) = devices.last_mut() {
                    last.display_name = format!("{} ({})", value, last.display_name);
                    named = true;
                }
            }
        } else if let Some(value) = trimmed.strip_prefix("Name:") {
            let value = value.trim();
            if value.starts_with("gfx") {
                let index = devices.len() as u32;
                devices.push(Device::new(Backend::Rocm, index, value));
                in_gpu_agent = true;
                named = false;
            }
        }
    }

    devices
}

/// Apple Silicon exposes MPS unconditionally.
#[derive(Debug, Clone, Default)]
pub struct MpsProbe;

impl BackendProbe for MpsProbe {
    fn name(&self) -> &str {
        "mps"
    }

    fn backend(&self) -> Backend {
        Backend::Mps
    }

    fn probe(&self, _timeout: Duration) -> Result<Vec<Device>, ProbeFailure> {
        if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
            Ok(vec![Device::new(Backend::Mps, 0, "Apple MPS")])
        } else {
            Err(ProbeFailure::Absent)
        }
    }
}

/// Devices reported by the worker's `--list-devices-machine` mode
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceListing {
    pub devices: Vec<Device>,
    pub env: Option<serde_json::Value>,
}

/// Parse the worker's machine-readable device block.
///
/// Lines before the begin marker (library warnings, banners) are ignored.
/// `auto` and `cpu` rows are dropped since the CPU is always added by the
/// probe itself.
pub fn parse_device_listing(lines: &[String]) -> DeviceListing {
    let mut listing = DeviceListing::default();
    let mut rows = Vec::new();
    let mut skipped = Vec::new();
    let mut inside = false;

    for line in lines {
        let line = line.trim_end();
        if line == LISTING_BEGIN {
            inside = true;
            continue;
        }
        if !inside {
            continue;
        }
        if line == LISTING_END {
            break;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        match fields.as_slice() {
            [LISTING_DEVICE, id, name, kind, ..] => rows.push((*id, *name, *kind)),
            [LISTING_SKIPPED, id, name, reason, ..] => skipped.push((*id, *name, *reason)),
            _ => {
                if let Some(json) = line.strip_prefix(LISTING_ENV) {
                    match serde_json::from_str(json.trim()) {
                        Ok(value) => listing.env = Some(value),
                        Err(e) => debug!("Ignoring malformed worker env JSON: {}", e),
                    }
                }
            }
        }
    }

    // torch ROCm builds report AMD GPUs as type "cuda"
    let hip = listing
        .env
        .as_ref()
        .and_then(|env| env.get("torch_hip"))
        .is_some_and(|hip| !hip.is_null());

    for (id, name, kind) in rows {
        let Ok((backend, index)) = parse_device_token(id) else {
            continue;
        };
        if backend == Backend::Cpu {
            continue;
        }
        let backend = if hip && kind == "cuda" {
            Backend::Rocm
        } else {
            backend
        };
        listing.devices.push(Device::new(backend, index, name));
    }

    for (id, name, reason) in skipped {
        let Ok((backend, index)) = parse_device_token(id) else {
            continue;
        };
        let backend = if hip && backend == Backend::Cuda {
            Backend::Rocm
        } else {
            backend
        };
        listing.devices.push(Device::unavailable(
            backend,
            index,
            format!("{}: {}", name, reason),
        ));
    }

    listing
}

/// Result of one capability probe
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityReport {
    /// CPU first, then everything else found. Never empty.
    pub devices: Vec<Device>,
    /// Usable interpreters in resolution order.
    pub interpreters: Vec<InterpreterCandidate>,
    /// Environment summary printed by the worker, when it ran.
    pub worker_env: Option<serde_json::Value>,
    /// Non-fatal problems encountered while probing.
    pub warnings: Vec<String>,
}

impl CapabilityReport {
    pub fn available_devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter().filter(|d| d.available)
    }

    /// Pick a device for `token` from this report.
    pub fn select(&self, token: &str) -> Device {
        super::device::select_device(&self.devices, token)
    }
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub timeout: Duration,
    pub worker_script: Option<PathBuf>,
    pub user_interpreter: Option<PathBuf>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
            worker_script: None,
            user_interpreter: None,
        }
    }
}

/// Detects compute devices and interpreters
///
/// Reads the environment and filesystem and runs short external queries, but
/// never changes anything. Safe to call repeatedly.
pub struct CapabilityProbe {
    config: ProbeConfig,
    resolver: InterpreterResolver,
    backends: Vec<Box<dyn BackendProbe>>,
}

impl CapabilityProbe {
    /// A probe with the native checks for the current platform.
    pub fn new(resolver: InterpreterResolver, config: ProbeConfig) -> Self {
        let backends: Vec<Box<dyn BackendProbe>> = vec![
            Box::new(NvidiaSmiProbe::default()),
            Box::new(RocmInfoProbe::default()),
            Box::new(MpsProbe),
        ];
        Self {
            config,
            resolver,
            backends,
        }
    }

    /// Replace the native checks.
    pub fn with_backends(mut self, backends: Vec<Box<dyn BackendProbe>>) -> Self {
        self.backends = backends;
        self
    }

    pub fn probe(&self) -> CapabilityReport {
        let started = Instant::now();
        let mut report = CapabilityReport {
            devices: vec![Device::cpu()],
            interpreters: self.usable_interpreters(),
            worker_env: None,
            warnings: Vec::new(),
        };
        let mut seen: HashSet<String> = HashSet::new();

        if let Some(listing) = self.worker_listing(&mut report.warnings) {
            for device in listing.devices {
                if seen.insert(device.worker_token()) {
                    report.devices.push(device);
                }
            }
            report.worker_env = listing.env;
        }

        for backend in &self.backends {
            let found = match backend.probe(self.config.timeout) {
                Ok(devices) => devices,
                Err(ProbeFailure::Absent) => {
                    debug!("{} not present", backend.name());
                    continue;
                }
                Err(ProbeFailure::Failed(reason)) => {
                    warn!("{} probe failed: {}", backend.name(), reason);
                    report
                        .warnings
                        .push(format!("{}: {}", backend.name(), reason));
                    vec![Device::unavailable(backend.backend(), 0, reason)]
                }
            };
            for device in found {
                if seen.insert(device.worker_token()) {
                    report.devices.push(device);
                }
            }
        }

        info!(
            "Probe found {} device(s), {} available, in {:?}",
            report.devices.len(),
            report.available_devices().count(),
            started.elapsed()
        );
        report
    }

    fn usable_interpreters(&self) -> Vec<InterpreterCandidate> {
        let mut seen = HashSet::new();
        self.resolver
            .candidates(self.config.user_interpreter.as_deref())
            .into_iter()
            .filter(|c| c.is_usable() && seen.insert(c.path.clone()))
            .collect()
    }

    fn worker_listing(&self, warnings: &mut Vec<String>) -> Option<DeviceListing> {
        let script = self.config.worker_script.as_ref()?;
        if !script.is_file() {
            debug!("Worker script {} not found, skipping listing", script.display());
            return None;
        }
        let interpreter = match self
            .resolver
            .resolve(self.config.user_interpreter.as_deref())
        {
            Ok(found) => found,
            Err(e) => {
                warnings.push(e.to_string());
                return None;
            }
        };

        let mut cmd = Command::new(&interpreter.path);
        cmd.arg(script).arg("--list-devices-machine");
        match run_bounded(cmd, self.config.timeout) {
            Ok(output) if output.success() => Some(parse_device_listing(&output.stdout)),
            Ok(output) => {
                let reason = format!("device listing exited with {}", output.status);
                warn!("{}", reason);
                warnings.push(reason);
                None
            }
            Err(e) => {
                let reason = format!("device listing: {}", e);
                warn!("{}", reason);
                warnings.push(reason);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_parse_nvidia_smi() {
        let devices = parse_nvidia_smi(&lines(
            "0, NVIDIA GeForce RTX 4090\n1, NVIDIA RTX A4000\ngarbage",
        ));
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].id(), "cuda:1");
        assert_eq!(devices[1].display_name, "NVIDIA RTX A4000");
    }

    #[test]
    fn test_parse_rocminfo_gpu_agents() {
        let output = lines(
            "*******\nAgent 1\n*******\n  Name:                    AMD Ryzen 9 7940HS\n  Marketing Name:          AMD Ryzen 9 7940HS\n*******\nAgent 2\n*******\n  Name:                    gfx1100\n  Marketing Name:          AMD Radeon RX 7900 XTX\n*******\nAgent 3\n*******\n  Name:                    gfx1103\n",
        );
        let devices = parse_rocminfo(&output);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].display_name, "AMD Radeon RX 7900 XTX (gfx1100)");
        assert_eq!(devices[1].display_name, "gfx1103");
        assert_eq!(devices[1].worker_token(), "cuda:1");
    }

    #[test]
    fn test_parse_device_listing() {
        let output = lines(
            "some torch warning\nSTEMWERK_DEVICES_BEGIN\nSTEMWERK_DEVICE\tauto\tAuto\tauto\nSTEMWERK_DEVICE\tcpu\tCPU\tcpu\nSTEMWERK_DEVICE\tcuda:0\tRX 9070\tcuda\nSTEMWERK_DEVICE_SKIPPED\tcuda:1\t780M\trocBLAS missing gfx1103\nSTEMWERK_ENV_JSON {\"torch_hip\": \"6.2\", \"cuda_count\": 2}\nSTEMWERK_DEVICES_END\n",
        );
        let listing = parse_device_listing(&output);
        assert_eq!(listing.devices.len(), 2);
        assert_eq!(listing.devices[0].backend, Backend::Rocm);
        assert!(listing.devices[0].available);
        assert!(!listing.devices[1].available);
        assert!(listing.devices[1].display_name.contains("rocBLAS"));
        assert_eq!(listing.env.unwrap()["cuda_count"], 2);
    }

    #[test]
    fn test_parse_listing_without_begin_marker() {
        let output = lines("STEMWERK_DEVICE\tcuda:0\tGPU\tcuda\n");
        assert!(parse_device_listing(&output).devices.is_empty());
    }

    struct FailingProbe;

    impl BackendProbe for FailingProbe {
        fn name(&self) -> &str {
            "failing"
        }

        fn backend(&self) -> Backend {
            Backend::Cuda
        }

        fn probe(&self, _timeout: Duration) -> Result<Vec<Device>, ProbeFailure> {
            Err(ProbeFailure::Failed("driver query threw".to_string()))
        }
    }

    #[test]
    fn test_failed_backend_is_marked_unavailable() {
        let dir = tempfile::TempDir::new().unwrap();
        let resolver = InterpreterResolver::new(dir.path()).with_search_path("");
        let probe = CapabilityProbe::new(resolver, ProbeConfig::default())
            .with_backends(vec![Box::new(FailingProbe)]);

        let report = probe.probe();
        assert_eq!(report.devices[0], Device::cpu());
        assert_eq!(report.devices.len(), 2);
        assert!(!report.devices[1].available);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.select("auto").backend, Backend::Cpu);
    }
}
