//! Non-blocking handle on an external process
//!
//! Both output pipes are pumped by reader threads into one channel, so the
//! owner can poll lines and exit status from a cooperative tick without ever
//! blocking on a read. Lines arrive in the order they were read.

use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

const REAP_POLL: Duration = Duration::from_millis(5);

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// One line of process output, without its line terminator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: Stream,
    pub text: String,
}

/// A spawned process whose output is collected in the background
#[derive(Debug)]
pub struct WorkerProcess {
    child: Child,
    lines: Receiver<OutputLine>,
    started_at: Instant,
    status: Option<ExitStatus>,
    exited_at: Option<Instant>,
    output_closed: bool,
}

impl WorkerProcess {
    /// Spawn `command` with piped stdout/stderr and a null stdin.
    pub fn spawn(mut command: Command) -> io::Result<Self> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            pump(stdout, Stream::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            pump(stderr, Stream::Stderr, tx);
        }

        debug!("Spawned process {}", child.id());

        Ok(Self {
            child,
            lines: rx,
            started_at: Instant::now(),
            status: None,
            exited_at: None,
            output_closed: false,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Drain every line read so far. Never blocks.
    pub fn poll_lines(&mut self) -> Vec<OutputLine> {
        let mut out = Vec::new();
        loop {
            match self.lines.try_recv() {
                Ok(line) => out.push(line),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.output_closed = true;
                    break;
                }
            }
        }
        out
    }

    /// True once both pipes reached end-of-file and every line was drained.
    pub fn output_closed(&self) -> bool {
        self.output_closed
    }

    /// Check for exit without waiting.
    pub fn try_exit(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.status.is_none() {
            if let Some(status) = self.child.try_wait()? {
                self.status = Some(status);
                self.exited_at = Some(Instant::now());
            }
        }
        Ok(self.status)
    }

    /// When the exit was first observed.
    pub fn exited_at(&self) -> Option<Instant> {
        self.exited_at
    }

    /// Ask the process to shut down (SIGTERM on unix).
    #[cfg(unix)]
    pub fn terminate(&mut self) -> io::Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        let pid = libc::pid_t::try_from(self.child.id())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        // SAFETY: kill(2) has no memory-safety preconditions; the pid belongs
        // to a child we have not reaped yet.
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Windows has no graceful signal for console-less children.
    #[cfg(not(unix))]
    pub fn terminate(&mut self) -> io::Result<()> {
        self.kill()
    }

    /// Force-terminate the process.
    pub fn kill(&mut self) -> io::Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        match self.child.kill() {
            Ok(()) => Ok(()),
            // Already exited between the status check and the kill
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Kill the process and wait up to `limit` for it to be reaped.
    ///
    /// Returns the exit status once reaped, `None` if the process outlived
    /// the wait (it is then left for the OS to collect).
    pub fn kill_and_reap(&mut self, limit: Duration) -> Option<ExitStatus> {
        if let Err(e) = self.kill() {
            warn!("Failed to kill process {}: {}", self.pid(), e);
        }
        let deadline = Instant::now() + limit;
        loop {
            match self.try_exit() {
                Ok(Some(status)) => return Some(status),
                Ok(None) if Instant::now() < deadline => thread::sleep(REAP_POLL),
                Ok(None) => {
                    warn!("Process {} was not reaped within {:?}", self.pid(), limit);
                    return None;
                }
                Err(e) => {
                    warn!("Failed to reap process {}: {}", self.pid(), e);
                    return None;
                }
            }
        }
    }
}

fn pump<R: Read + Send + 'static>(pipe: R, stream: Stream, tx: Sender<OutputLine>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if tx.send(OutputLine { stream, text }).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
}
