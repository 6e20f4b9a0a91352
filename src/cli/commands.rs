//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use hound::{WavReader, WavWriter};
use log::{info, warn};
use uuid::Uuid;

use crate::capability::{
    CapabilityProbe, InterpreterResolver, UserPathPolicy, AUTO_TOKEN,
};
use crate::config::StemwerkConfig;
use crate::job::{
    JobObserver, JobSpec, JobState, JobSupervisor, ProgressEvent, QuickPreset, SeparationModel,
    StemKind,
};
use crate::selection::{HostSelectionState, SelectedItem, SelectionResolver, MASTER_TRACK_ID};
use crate::state::{JsonSettingsStore, RunRegistry, Settings, SettingsStore};
use crate::validation::{analyze_wav, ValidationResult};

const TICK: Duration = Duration::from_millis(100);

/// Prints progress to the terminal.
struct ConsoleObserver;

impl JobObserver for ConsoleObserver {
    fn on_progress(&mut self, _job_id: Uuid, event: &ProgressEvent) {
        let eta = event
            .eta_sec
            .map(|s| format!(" (ETA {}:{:02})", s as u64 / 60, s as u64 % 60))
            .unwrap_or_default();
        println!("{:>3.0}% {}{}", event.percent, event.stage, eta);
    }

    fn on_state_change(&mut self, job_id: Uuid, state: JobState) {
        println!("Job {}: {}", job_id, state);
    }

    fn on_validated(&mut self, _job_id: Uuid, result: &ValidationResult) {
        print_validation(result);
    }
}

fn load_settings(config: &StemwerkConfig) -> Box<dyn SettingsStore> {
    let Some(path) = config.settings_path.as_ref() else {
        return Box::new(Settings::default());
    };
    match JsonSettingsStore::load(path) {
        Ok(store) => Box::new(store),
        Err(e) => {
            warn!("Ignoring unreadable settings {}: {}", path.display(), e);
            Box::new(Settings::default())
        }
    }
}

/// Command-line flag, then environment, then saved settings.
fn python_override(
    cli: Option<&Path>,
    config: &StemwerkConfig,
    settings: &dyn SettingsStore,
) -> Option<PathBuf> {
    cli.map(Path::to_path_buf)
        .or_else(|| config.python.clone())
        .or_else(|| settings.python_path_override())
}

/// Probe and print available compute devices.
pub fn devices(python: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = StemwerkConfig::from_env();
    let settings = load_settings(&config);
    let python = python_override(python, &config, settings.as_ref());

    let probe = CapabilityProbe::new(config.interpreter_resolver(), config.probe_config(python));
    let report = probe.probe();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Devices:");
    for device in &report.devices {
        let mark = if device.available { " " } else { "x" };
        println!("  [{}] {:<12} {}", mark, device.worker_token(), device.label());
    }
    println!("Interpreters:");
    for candidate in &report.interpreters {
        println!("  {:<16} {}", candidate.origin, candidate.path.display());
    }
    for warning in &report.warnings {
        println!("warning: {}", warning);
    }
    Ok(())
}

/// Resolve and print the interpreter that would run the worker.
pub fn interpreter(python: Option<&Path>, strict: bool) -> anyhow::Result<()> {
    let config = StemwerkConfig::from_env();
    let settings = load_settings(&config);
    let python = python_override(python, &config, settings.as_ref());

    let policy = if strict {
        UserPathPolicy::Strict
    } else {
        UserPathPolicy::FallThrough
    };
    let resolver = InterpreterResolver::new(&config.project_root).with_policy(policy);

    for candidate in resolver.candidates(python.as_deref()) {
        let mark = if candidate.is_usable() { "ok" } else { "--" };
        println!("  {} {:<16} {}", mark, candidate.origin, candidate.path.display());
    }

    let chosen = resolver.resolve(python.as_deref())?;
    println!("Using {} ({})", chosen.path.display(), chosen.origin);
    Ok(())
}

/// Options for [`separate`]
#[derive(Debug, Clone, Default)]
pub struct SeparateArgs {
    pub input: PathBuf,
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub model: Option<String>,
    pub stems: Vec<String>,
    pub preset: Option<String>,
    pub device: Option<String>,
    pub output: Option<PathBuf>,
}

/// Run one separation end to end.
pub fn separate(python: Option<&Path>, args: SeparateArgs) -> anyhow::Result<()> {
    let mut config = StemwerkConfig::from_env();
    if let Some(output) = args.output.clone() {
        config.output_root = output;
    }
    let settings = load_settings(&config);
    let python = python_override(python, &config, settings.as_ref());

    let resolver = config.interpreter_resolver();
    let interpreter = resolver.resolve(python.as_deref())?;
    info!("Interpreter: {} ({})", interpreter.path.display(), interpreter.origin);

    let report = CapabilityProbe::new(resolver, config.probe_config(python)).probe();
    let token = args
        .device
        .clone()
        .or_else(|| settings.last_device_token())
        .unwrap_or_else(|| AUTO_TOKEN.to_string());
    let device = report.select(&token);
    info!("Device: {}", device.label());

    let (model, stems) = choose_model_and_stems(&args, settings.as_ref())?;

    let stats = analyze_wav(&args.input)?;
    let mut selection = HostSelectionState::default().with_item(SelectedItem::new(
        "input",
        MASTER_TRACK_ID,
        0.0,
        stats.duration_sec,
    ));
    if args.start.is_some() || args.end.is_some() {
        selection = selection.with_time_range(
            args.start.unwrap_or(0.0),
            args.end.unwrap_or(stats.duration_sec),
        );
    }
    let regions = SelectionResolver::new().resolve(&selection)?;
    let region = regions
        .first()
        .ok_or_else(|| anyhow!("selection produced no region"))?;

    let input = if region.start_sec > 0.0 || region.end_sec < stats.duration_sec {
        let render_dir = config.output_root.join("renders");
        let dest = render_dir.join(format!("{}.wav", Uuid::new_v4().simple()));
        render_segment(&args.input, region.start_sec, region.end_sec, &dest)?;
        dest
    } else {
        args.input.clone()
    };

    let spec = JobSpec::builder(&config.output_root)
        .regions(regions)
        .model(model)
        .stems(stems)
        .device(device)
        .input(MASTER_TRACK_ID, input)
        .build()?;
    let output_dir = spec.output_dir().to_path_buf();

    let mut supervisor = JobSupervisor::new(
        config.supervisor_config(&interpreter.path),
        RunRegistry::new(config.history_capacity),
    )
    .with_settings(settings);
    supervisor.add_observer(Box::new(ConsoleObserver));

    let job_id = supervisor.request_launch(spec)?;
    while supervisor.tick().is_none() && supervisor.is_busy() {
        thread::sleep(TICK);
    }

    let job = supervisor
        .job(job_id)
        .ok_or_else(|| anyhow!("job {} disappeared", job_id))?;
    println!("Output: {}", output_dir.display());
    match job.state() {
        JobState::Succeeded => Ok(()),
        state => Err(anyhow!(
            "separation {}: {}",
            state,
            job.failure().unwrap_or("see separation_log.txt")
        )),
    }
}

fn choose_model_and_stems(
    args: &SeparateArgs,
    settings: &dyn SettingsStore,
) -> anyhow::Result<(SeparationModel, BTreeSet<StemKind>)> {
    if let Some(preset) = &args.preset {
        let preset: QuickPreset = preset.parse().map_err(|e: String| anyhow!(e))?;
        return Ok((preset.model(), preset.stems().iter().copied().collect()));
    }

    let model = match &args.model {
        Some(name) => SeparationModel::parse(name)?,
        None => settings.last_model().unwrap_or_default(),
    };
    let stems: BTreeSet<StemKind> = if args.stems.is_empty() {
        let saved = settings.last_stems();
        if saved.is_empty() || saved.iter().any(|s| !model.supports(*s)) {
            model.stems().iter().copied().collect()
        } else {
            saved
        }
    } else {
        args.stems
            .iter()
            .map(|s| StemKind::parse(s))
            .collect::<crate::Result<_>>()?
    };
    Ok((model, stems))
}

/// Copy `[start, end)` seconds of a WAV file into `dest`.
fn render_segment(input: &Path, start: f64, end: f64, dest: &Path) -> anyhow::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let mut reader =
        WavReader::open(input).with_context(|| format!("opening {}", input.display()))?;
    let spec = reader.spec();
    let channels = spec.channels as u64;
    let first = (start * spec.sample_rate as f64).round() as u64 * channels;
    let last = (end * spec.sample_rate as f64).round() as u64 * channels;
    let take = last.saturating_sub(first) as usize;

    let mut writer =
        WavWriter::create(dest, spec).with_context(|| format!("creating {}", dest.display()))?;
    match spec.sample_format {
        hound::SampleFormat::Float => {
            for sample in reader.samples::<f32>().skip(first as usize).take(take) {
                writer.write_sample(sample?)?;
            }
        }
        hound::SampleFormat::Int => {
            for sample in reader.samples::<i32>().skip(first as usize).take(take) {
                writer.write_sample(sample?)?;
            }
        }
    }
    writer.finalize()?;

    info!(
        "Rendered {:.2}-{:.2}s of {} to {}",
        start,
        end,
        input.display(),
        dest.display()
    );
    Ok(())
}

fn print_validation(result: &ValidationResult) {
    let stems: Vec<&str> = result.produced_stems.iter().map(|s| s.as_str()).collect();
    println!("Stems: {}", stems.join(", "));
    if result.ok {
        println!("Validation passed");
    } else {
        println!("Validation found {} issue(s):", result.issues.len());
        for issue in &result.issues {
            println!("  - {}", issue);
        }
    }
}
