//! Capability probing with stand-in tools

#![cfg(unix)]

mod common;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::TempDir;

use stemwerk::capability::{
    Backend, BackendProbe, CapabilityProbe, InterpreterOrigin, InterpreterResolver,
    NvidiaSmiProbe, ProbeConfig, ProbeFailure,
};

const LISTING: &str = r#"
echo "torch: some deprecation warning"
echo "STEMWERK_DEVICES_BEGIN"
printf 'STEMWERK_DEVICE\tauto\tAuto\tauto\n'
printf 'STEMWERK_DEVICE\tcpu\tCPU\tcpu\n'
printf 'STEMWERK_DEVICE\tcuda:0\tNVIDIA GeForce RTX 4090\tcuda\n'
printf 'STEMWERK_DEVICE_SKIPPED\tcuda:1\tTesla K80\tcompute capability 3.7 unsupported\n'
echo 'STEMWERK_ENV_JSON {"torch": "2.4.0", "torch_cuda": "12.1", "torch_hip": null}'
echo "STEMWERK_DEVICES_END"
"#;

struct Machine {
    dir: TempDir,
}

impl Machine {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("project")).unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        Self { dir }
    }

    fn bin(&self) -> PathBuf {
        self.dir.path().join("bin")
    }

    fn resolver(&self) -> InterpreterResolver {
        InterpreterResolver::new(self.dir.path().join("project")).with_search_path(self.bin())
    }

    fn worker(&self, body: &str) -> PathBuf {
        common::write_script(self.dir.path(), "worker.sh", body)
    }

    fn tool(&self, name: &str, body: &str) -> PathBuf {
        common::write_script(&self.bin(), name, body)
    }

    fn config(&self, worker: Option<PathBuf>, timeout: Duration) -> ProbeConfig {
        ProbeConfig {
            timeout,
            worker_script: worker,
            user_interpreter: Some(Path::new("/bin/sh").to_path_buf()),
        }
    }
}

#[test]
fn test_worker_listing_devices_are_merged_after_cpu() {
    let m = Machine::new();
    let config = m.config(Some(m.worker(LISTING)), Duration::from_secs(5));
    let report = CapabilityProbe::new(m.resolver(), config)
        .with_backends(Vec::new())
        .probe();

    let ids: Vec<String> = report.devices.iter().map(|d| d.id()).collect();
    assert_eq!(ids, vec!["cpu", "cuda:0", "cuda:1"]);
    assert_eq!(report.devices[1].backend, Backend::Cuda);
    assert!(report.devices[1].available);
    assert!(!report.devices[2].available);
    assert!(report.devices[2].display_name.contains("compute capability"));
    assert_eq!(report.available_devices().count(), 2);
    assert_eq!(report.worker_env.as_ref().unwrap()["torch"], "2.4.0");
    assert!(report.warnings.is_empty());

    assert_eq!(report.select("cuda:0").display_name, "NVIDIA GeForce RTX 4090");
    // unavailable GPU falls back to another GPU of the same family
    assert_eq!(report.select("cuda:1").id(), "cuda:0");
    assert_eq!(report.select("mps").id(), "cpu");
}

#[test]
fn test_hung_worker_listing_is_bounded() {
    let m = Machine::new();
    let config = m.config(Some(m.worker("exec sleep 30")), Duration::from_millis(300));

    let started = Instant::now();
    let report = CapabilityProbe::new(m.resolver(), config)
        .with_backends(Vec::new())
        .probe();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(report.devices.len(), 1);
    assert_eq!(report.devices[0].backend, Backend::Cpu);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("timed out"));
}

#[test]
fn test_missing_worker_script_skips_listing() {
    let m = Machine::new();
    let config = m.config(
        Some(m.dir.path().join("no-such-worker.py")),
        Duration::from_secs(1),
    );
    let report = CapabilityProbe::new(m.resolver(), config)
        .with_backends(Vec::new())
        .probe();
    assert_eq!(report.devices.len(), 1);
    assert!(report.warnings.is_empty());
    assert!(report.worker_env.is_none());
}

#[test]
fn test_nvidia_smi_csv_is_parsed() {
    let m = Machine::new();
    let smi = m.tool(
        "nvidia-smi",
        "echo '0, NVIDIA GeForce RTX 4090'\necho '1, NVIDIA RTX A4000'",
    );
    let probe = NvidiaSmiProbe::with_program(smi);
    let devices = probe.probe(Duration::from_secs(5)).unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].id(), "cuda:0");
    assert_eq!(devices[1].display_name, "NVIDIA RTX A4000");
}

#[test]
fn test_hung_native_tool_becomes_unavailable_entry() {
    let m = Machine::new();
    let smi = m.tool("nvidia-smi", "exec sleep 30");
    let config = m.config(None, Duration::from_millis(300));

    let started = Instant::now();
    let report = CapabilityProbe::new(m.resolver(), config)
        .with_backends(vec![Box::new(NvidiaSmiProbe::with_program(smi))])
        .probe();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(report.devices.len(), 2);
    assert_eq!(report.devices[1].backend, Backend::Cuda);
    assert!(!report.devices[1].available);
    assert_eq!(report.warnings.len(), 1);
}

#[test]
fn test_absent_native_tool_is_not_reported() {
    let m = Machine::new();
    let probe = NvidiaSmiProbe::with_program(m.bin().join("nvidia-smi"));
    assert_eq!(
        probe.probe(Duration::from_secs(1)).unwrap_err(),
        ProbeFailure::Absent
    );

    let report = CapabilityProbe::new(m.resolver(), m.config(None, Duration::from_secs(1)))
        .with_backends(vec![Box::new(probe)])
        .probe();
    assert_eq!(report.devices.len(), 1);
    assert!(report.warnings.is_empty());
}

#[test]
fn test_listing_and_native_probe_do_not_duplicate_devices() {
    let m = Machine::new();
    let smi = m.tool("nvidia-smi", "echo '0, NVIDIA GeForce RTX 4090'");
    let config = m.config(Some(m.worker(LISTING)), Duration::from_secs(5));
    let report = CapabilityProbe::new(m.resolver(), config)
        .with_backends(vec![Box::new(NvidiaSmiProbe::with_program(smi))])
        .probe();

    let cuda0 = report.devices.iter().filter(|d| d.id() == "cuda:0").count();
    assert_eq!(cuda0, 1);
}

#[test]
fn test_report_lists_usable_interpreters_in_order() {
    let m = Machine::new();
    m.tool("python3", "exit 0");
    let report = CapabilityProbe::new(m.resolver(), m.config(None, Duration::from_secs(1)))
        .with_backends(Vec::new())
        .probe();

    let origins: Vec<InterpreterOrigin> = report.interpreters.iter().map(|c| c.origin).collect();
    assert_eq!(
        origins,
        vec![InterpreterOrigin::UserConfigured, InterpreterOrigin::SystemPath]
    );
    assert_eq!(report.interpreters[1].path, m.bin().join("python3"));
}
