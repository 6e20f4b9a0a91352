//! Run a short-lived command with a hard timeout
//!
//! Used for capability checks (driver queries, worker device listings) where
//! a hung driver must not block the caller.

use std::io;
use std::process::{Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use log::warn;
use thiserror::Error;

use super::child::{Stream, WorkerProcess};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Captured output of a bounded run
#[derive(Debug, Clone)]
pub struct BoundedOutput {
    pub status: ExitStatus,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl BoundedOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Why a bounded run produced no output
#[derive(Error, Debug)]
pub enum BoundedError {
    /// The program could not be started.
    #[error("failed to start: {0}")]
    Spawn(#[source] io::Error),

    /// The program did not finish in time and was killed.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

/// Run `command` to completion, killing it if it outlives `timeout`.
pub fn run_bounded(command: Command, timeout: Duration) -> Result<BoundedOutput, BoundedError> {
    let program = format!("{:?}", command.get_program());
    let mut process = WorkerProcess::spawn(command).map_err(BoundedError::Spawn)?;
    let deadline = Instant::now() + timeout;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    loop {
        for line in process.poll_lines() {
            match line.stream {
                Stream::Stdout => stdout.push(line.text),
                Stream::Stderr => stderr.push(line.text),
            }
        }

        let status = process.try_exit().map_err(BoundedError::Io)?;
        if let Some(status) = status {
            // Grandchildren may keep the pipes open; stop collecting at the deadline.
            if process.output_closed() || Instant::now() >= deadline {
                return Ok(BoundedOutput {
                    status,
                    stdout,
                    stderr,
                });
            }
        } else if Instant::now() >= deadline {
            warn!("{} did not finish within {:?}, killing it", program, timeout);
            if let Err(e) = process.kill() {
                warn!("Failed to kill {}: {}", program, e);
            }
            return Err(BoundedError::TimedOut(timeout));
        }

        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn test_collects_both_streams() {
        let out = run_bounded(sh("echo out; echo err 1>&2"), Duration::from_secs(5)).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, vec!["out"]);
        assert_eq!(out.stderr, vec!["err"]);
    }

    #[test]
    fn test_times_out_hung_command() {
        let started = Instant::now();
        let result = run_bounded(sh("exec sleep 30"), Duration::from_millis(200));
        let err = result.unwrap_err();
        assert!(matches!(err, BoundedError::TimedOut(_)));
        assert_eq!(err.to_string(), "timed out after 200ms");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let result = run_bounded(
            Command::new("/definitely/not/a/real/program"),
            Duration::from_secs(1),
        );
        let err = result.unwrap_err();
        assert!(matches!(err, BoundedError::Spawn(_)));
        assert!(err.to_string().starts_with("failed to start: "));
        assert!(std::error::Error::source(&err).is_some());
    }
}
