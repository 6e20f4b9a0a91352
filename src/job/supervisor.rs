//! Worker supervision
//!
//! The supervisor launches the worker for a [`JobSpec`], polls it from a
//! cooperative [`tick`](JobSupervisor::tick) and is the only writer of job
//! state. At most one job is active at a time.

use std::fs::{self, File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::PathBuf;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info, warn};
use uuid::Uuid;

use super::events::JobObserver;
use super::lifecycle::{ExitInfo, Job, JobState};
use super::progress::ProgressParser;
use super::spec::JobSpec;
use crate::capability::Backend;
use crate::error::{Result, StemwerkError};
use crate::process::{OutputLine, Stream, WorkerProcess};
use crate::state::{RunRegistry, RunSummary, SettingsStore};
use crate::validation::{OutputValidator, ValidationConfig};

/// Log artifact written into every track output directory.
pub const LOG_FILE_NAME: &str = "separation_log.txt";

pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(5);

/// How long to keep reading after exit while grandchildren hold the pipes.
const DRAIN_LIMIT: Duration = Duration::from_secs(2);

/// How long a dropped run waits for its killed worker to be reaped.
const DROP_REAP_LIMIT: Duration = Duration::from_secs(1);

/// Hidden from the worker when it runs on the CPU.
const GPU_MASK_VARS: [&str; 3] = [
    "CUDA_VISIBLE_DEVICES",
    "HIP_VISIBLE_DEVICES",
    "ROCR_VISIBLE_DEVICES",
];

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub interpreter: PathBuf,
    pub worker_script: PathBuf,
    /// Time between the graceful terminate and the forced kill.
    pub grace_period: Duration,
    pub validation: ValidationConfig,
}

impl SupervisorConfig {
    pub fn new(interpreter: impl Into<PathBuf>, worker_script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            worker_script: worker_script.into(),
            grace_period: DEFAULT_CANCEL_GRACE,
            validation: ValidationConfig::default(),
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct CancelRequest {
    at: Instant,
    /// A terminate signal was sent while the worker was still running.
    signalled: bool,
}

struct ActiveRun {
    job: Job,
    process: Option<WorkerProcess>,
    log: Option<LineWriter<File>>,
    parser: ProgressParser,
    tracks: Vec<String>,
    pass: usize,
    started: Instant,
    cancel: Option<CancelRequest>,
    killed: bool,
}

impl ActiveRun {
    fn current_track(&self) -> &str {
        self.tracks.get(self.pass).map(String::as_str).unwrap_or("")
    }

    fn write_log(&mut self, text: &str) {
        if let Some(log) = self.log.as_mut() {
            if let Err(e) = writeln!(log, "{}", text) {
                warn!("Stopped writing {}: {}", LOG_FILE_NAME, e);
                self.log = None;
            }
        }
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        if let Some(process) = self.process.as_mut() {
            if matches!(process.try_exit(), Ok(None)) {
                warn!(
                    "Job {} dropped while worker pid {} was running, killing it",
                    self.job.id(),
                    process.pid()
                );
                process.kill_and_reap(DROP_REAP_LIMIT);
            }
        }
    }
}

enum Poll {
    Pending,
    Finished(JobState),
}

/// Owns the active job and drives it to a terminal state
pub struct JobSupervisor {
    config: SupervisorConfig,
    registry: RunRegistry,
    validator: OutputValidator,
    observers: Vec<Box<dyn JobObserver>>,
    settings: Option<Box<dyn SettingsStore>>,
    active: Option<ActiveRun>,
    last_finished: Option<Job>,
}

impl JobSupervisor {
    pub fn new(config: SupervisorConfig, registry: RunRegistry) -> Self {
        let validator = OutputValidator::new(config.validation);
        Self {
            config,
            registry,
            validator,
            observers: Vec::new(),
            settings: None,
            active: None,
            last_finished: None,
        }
    }

    /// Persist the confirmed model and device after each successful launch.
    pub fn with_settings(mut self, settings: Box<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn add_observer(&mut self, observer: Box<dyn JobObserver>) {
        self.observers.push(observer);
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    pub fn settings(&self) -> Option<&dyn SettingsStore> {
        self.settings.as_deref()
    }

    pub fn is_busy(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|run| run.job.state().is_active())
    }

    pub fn active_job(&self) -> Option<&Job> {
        self.active.as_ref().map(|run| &run.job)
    }

    pub fn last_finished(&self) -> Option<&Job> {
        self.last_finished.as_ref()
    }

    /// Look up the active or most recently finished job.
    pub fn job(&self, job_id: Uuid) -> Option<&Job> {
        self.active_job()
            .into_iter()
            .chain(self.last_finished.as_ref())
            .find(|job| job.id() == job_id)
    }

    /// Start a job. Fails with `JobAlreadyRunning` while another is active.
    pub fn request_launch(&mut self, spec: JobSpec) -> Result<Uuid> {
        if let Some(run) = &self.active {
            if run.job.state().is_active() {
                return Err(StemwerkError::JobAlreadyRunning {
                    job_id: run.job.id(),
                });
            }
        }

        let job_id = spec.id();
        let tracks: Vec<String> = spec.tracks().into_iter().map(str::to_string).collect();
        let mut run = ActiveRun {
            job: Job::new(spec),
            process: None,
            log: None,
            parser: ProgressParser::new(),
            tracks,
            pass: 0,
            started: Instant::now(),
            cancel: None,
            killed: false,
        };

        run.job.transition(JobState::Launching);
        self.registry.set_current(job_id, JobState::Launching);
        self.notify(|o| o.on_state_change(job_id, JobState::Launching));

        let launched = create_output_dirs(run.job.spec()).and_then(|()| self.spawn_pass(&mut run));
        if let Err(e) = launched {
            warn!("Job {} failed to launch: {}", job_id, e);
            run.job.set_failure(e.to_string());
            run.write_log(&format!("[stemwerk] launch failed: {}", e));
            self.finish(run, JobState::Failed);
            return Err(e);
        }

        run.job.transition(JobState::Running);
        self.registry.update_state(job_id, JobState::Running);
        self.notify(|o| o.on_state_change(job_id, JobState::Running));
        self.remember_choice(run.job.spec());
        self.active = Some(run);

        Ok(job_id)
    }

    /// Ask the active job to stop.
    ///
    /// The worker gets a graceful terminate and, after the grace period, a
    /// forced kill. A worker that already exited keeps its own outcome.
    pub fn request_cancel(&mut self, job_id: Uuid) -> Result<()> {
        let Some(run) = self.active.as_mut().filter(|run| run.job.id() == job_id) else {
            if self.last_finished.as_ref().is_some_and(|job| job.id() == job_id) {
                return Ok(());
            }
            return Err(StemwerkError::UnknownJob { job_id });
        };
        if run.cancel.is_some() {
            return Ok(());
        }

        let mut signalled = false;
        if let Some(process) = run.process.as_mut() {
            if matches!(process.try_exit(), Ok(None)) {
                info!("Cancelling job {} (pid {})", job_id, process.pid());
                match process.terminate() {
                    Ok(()) => signalled = true,
                    Err(e) => {
                        warn!("Terminate failed for job {}: {}, killing", job_id, e);
                        let _ = process.kill();
                        run.killed = true;
                        signalled = true;
                    }
                }
            }
        }
        run.cancel = Some(CancelRequest {
            at: Instant::now(),
            signalled,
        });
        run.write_log("[stemwerk] cancel requested");
        Ok(())
    }

    /// Poll the active job once. Never blocks.
    ///
    /// Returns the terminal state when the job finished during this tick.
    pub fn tick(&mut self) -> Option<JobState> {
        let mut run = self.active.take()?;
        match self.poll(&mut run) {
            Poll::Pending => {
                self.active = Some(run);
                None
            }
            Poll::Finished(state) => {
                self.finish(run, state);
                Some(state)
            }
        }
    }

    /// Tick until the active job finishes or `limit` elapses.
    pub fn run_until_idle(&mut self, poll: Duration, limit: Duration) -> Option<JobState> {
        let deadline = Instant::now() + limit;
        loop {
            if let Some(state) = self.tick() {
                return Some(state);
            }
            if self.active.is_none() {
                return self.last_finished.as_ref().map(|job| job.state());
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(poll);
        }
    }

    fn poll(&mut self, run: &mut ActiveRun) -> Poll {
        let Some(process) = run.process.as_mut() else {
            return Poll::Finished(JobState::Failed);
        };
        let lines = process.poll_lines();
        for line in &lines {
            self.handle_line(run, line);
        }

        let grace = self.config.grace_period;
        let job_id = run.job.id();
        let Some(process) = run.process.as_mut() else {
            return Poll::Finished(JobState::Failed);
        };

        if let Some(cancel) = run.cancel {
            if cancel.signalled && !run.killed && cancel.at.elapsed() >= grace {
                warn!(
                    "Job {} did not stop within {:?}, killing pid {}",
                    job_id,
                    grace,
                    process.pid()
                );
                if let Err(e) = process.kill() {
                    warn!("Kill failed for job {}: {}", job_id, e);
                }
                run.killed = true;
            }
        }

        let status = match process.try_exit() {
            Ok(Some(status)) => status,
            Ok(None) => return Poll::Pending,
            Err(e) => {
                run.job.set_failure(format!("lost track of worker: {}", e));
                return Poll::Finished(JobState::Failed);
            }
        };

        let draining = process
            .exited_at()
            .is_some_and(|at| at.elapsed() < DRAIN_LIMIT);
        if !process.output_closed() && draining {
            return Poll::Pending;
        }

        let code = status.code();
        run.job.record_exit(ExitInfo {
            code,
            duration_sec: run.started.elapsed().as_secs_f64(),
        });
        let track = run.current_track().to_string();
        run.write_log(&format!(
            "[stemwerk] worker for '{}' exited with {}",
            track,
            code.map_or_else(|| "signal".to_string(), |c| c.to_string())
        ));
        debug!("Job {} pass {} exited: {:?}", job_id, run.pass, code);

        if run.cancel.is_some_and(|c| c.signalled) {
            return Poll::Finished(JobState::Cancelled);
        }
        if code != Some(0) {
            run.job
                .set_failure(StemwerkError::WorkerNonZeroExit { code }.to_string());
            return Poll::Finished(JobState::Failed);
        }
        if run.pass + 1 >= run.tracks.len() {
            return Poll::Finished(JobState::Succeeded);
        }
        if run.cancel.is_some() {
            return Poll::Finished(JobState::Cancelled);
        }

        run.pass += 1;
        match self.spawn_pass(run) {
            Ok(()) => Poll::Pending,
            Err(e) => {
                warn!("Job {} failed to start pass {}: {}", job_id, run.pass, e);
                run.job.set_failure(e.to_string());
                Poll::Finished(JobState::Failed)
            }
        }
    }

    fn handle_line(&mut self, run: &mut ActiveRun, line: &OutputLine) {
        run.job.append_log(line.text.clone());
        run.write_log(&line.text);
        if line.stream == Stream::Stderr {
            debug!("worker: {}", line.text);
        }

        if let Some(mut event) = run.parser.parse(&line.text) {
            if run.tracks.len() > 1 {
                event.track_id = Some(run.current_track().to_string());
            }
            let job_id = run.job.id();
            self.notify(|o| o.on_progress(job_id, &event));
            run.job.record_progress(event);
        }
    }

    fn spawn_pass(&self, run: &mut ActiveRun) -> Result<()> {
        let spec = run.job.spec();
        let track = run.current_track().to_string();
        let track_dir = spec.track_output_dir(&track);

        let log_path = track_dir.join(LOG_FILE_NAME);
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| StemwerkError::FileWriteError {
                path: log_path.clone(),
                source: e,
            })?;

        let mut cmd = Command::new(&self.config.interpreter);
        cmd.args(spec.worker_args(&self.config.worker_script, &track));
        cmd.env("PYTHONUNBUFFERED", "1");
        if spec.device().backend == Backend::Cpu {
            for var in GPU_MASK_VARS {
                cmd.env(var, "");
            }
        }

        let header = format!(
            "[stemwerk] {} pass {}/{} track '{}': {:?}",
            Utc::now().to_rfc3339(),
            run.pass + 1,
            run.tracks.len(),
            track,
            cmd
        );

        let process = WorkerProcess::spawn(cmd).map_err(|e| StemwerkError::SpawnFailure {
            reason: format!("{}: {}", self.config.interpreter.display(), e),
            source: Some(e),
        })?;
        info!(
            "Job {} started worker pid {} for track '{}'",
            run.job.id(),
            process.pid(),
            track
        );

        run.job.set_pid(Some(process.pid()));
        run.log = Some(LineWriter::new(log_file));
        run.write_log(&header);
        run.process = Some(process);
        Ok(())
    }

    fn finish(&mut self, mut run: ActiveRun, state: JobState) {
        let job_id = run.job.id();
        run.job.transition(state);
        run.write_log(&format!(
            "[stemwerk] job {} {} after {:.1}s",
            job_id,
            state,
            run.started.elapsed().as_secs_f64()
        ));
        run.log = None;
        self.registry.update_state(job_id, state);
        self.notify(|o| o.on_state_change(job_id, state));

        if state == JobState::Succeeded {
            let result = self
                .validator
                .validate(run.job.spec(), run.job.spec().output_dir());
            self.notify(|o| o.on_validated(job_id, &result));
            run.job.set_validation(result);
        }

        let spec = run.job.spec();
        self.registry.finish(RunSummary {
            job_id,
            spec_summary: spec.summary(),
            model: spec.model(),
            stems: spec.requested_stems().iter().copied().collect(),
            final_state: state,
            finished_at: Utc::now(),
            output_dir: spec.output_dir().to_path_buf(),
            validated_ok: run.job.validation().map(|v| v.ok),
        });

        run.process = None;
        self.last_finished = Some(run.job.clone());
    }

    fn remember_choice(&mut self, spec: &JobSpec) {
        let Some(settings) = self.settings.as_mut() else {
            return;
        };
        let saved = settings
            .set_last_model(spec.model())
            .and_then(|()| settings.set_last_device_token(spec.device().worker_token()));
        if let Err(e) = saved {
            warn!("Could not save settings: {}", e);
        }
    }

    fn notify(&mut self, mut f: impl FnMut(&mut dyn JobObserver)) {
        for observer in self.observers.iter_mut() {
            f(observer.as_mut());
        }
    }
}

fn create_output_dirs(spec: &JobSpec) -> Result<()> {
    for track in spec.tracks() {
        let dir = spec.track_output_dir(track);
        fs::create_dir_all(&dir).map_err(|e| StemwerkError::DirectoryCreateError {
            path: dir.clone(),
            source: e,
        })?;
    }
    Ok(())
}
