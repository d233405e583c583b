//! External process invocation
//!
//! Every collaborator (renderer, reference renderer, converter) is a black box
//! driven through [`Invoke`]. The system implementation, [`ProcessInvoker`],
//! enforces a per-call timeout and always reaps the child it spawned.
//!
//! Invocation problems are *reported*, never propagated: a missing executable,
//! a non-zero exit and a timeout all come back as an [`Invocation`] with
//! `succeeded == false`.

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Stderr marker reported when a child exceeds its timeout
pub const TIMEOUT_INDICATOR: &str = "Timeout";

/// Interval between exit-status polls while a child is running
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A fully described external invocation
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Executable to launch
    pub program: PathBuf,
    /// Arguments, in order
    pub args: Vec<OsString>,
    /// Working directory for the child
    pub cwd: PathBuf,
    /// Upper bound on wall-clock time
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, cwd: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            timeout,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append an argument that is a filesystem path
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.as_os_str().to_os_string())
    }

    /// Human-readable command line for logs and diagnostics
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

/// Outcome of one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Whether the child exited with a success status
    pub succeeded: bool,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error, or a launch/timeout description
    pub stderr: String,
}

impl Invocation {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether this failure was caused by the timeout bound
    pub fn timed_out(&self) -> bool {
        !self.succeeded && self.stderr.starts_with(TIMEOUT_INDICATOR)
    }

    /// One-line failure description for diagnostics
    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.lines().last().unwrap_or(stderr).to_string();
        }
        let stdout = self.stdout.trim();
        match stdout.lines().last() {
            Some(line) => line.to_string(),
            None => "exited with failure status".to_string(),
        }
    }
}

/// Runs external commands
pub trait Invoke {
    fn run(&self, spec: &CommandSpec) -> Invocation;
}

impl<T: Invoke + ?Sized> Invoke for &T {
    fn run(&self, spec: &CommandSpec) -> Invocation {
        (**self).run(spec)
    }
}

/// [`Invoke`] implementation backed by `std::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessInvoker;

impl ProcessInvoker {
    pub fn new() -> Self {
        Self
    }
}

impl Invoke for ProcessInvoker {
    fn run(&self, spec: &CommandSpec) -> Invocation {
        tracing::debug!("$ {} (cwd: {})", spec.display(), spec.cwd.display());

        let mut child = match Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return Invocation::failure(format!(
                    "failed to launch {}: {}",
                    spec.program.display(),
                    e
                ));
            }
        };

        // Drain both pipes while waiting so a chatty child cannot block on a full pipe
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        match wait_with_timeout(&mut child, spec.timeout) {
            Ok(Some(status)) => {
                let invocation = Invocation {
                    succeeded: status.success(),
                    stdout: collect(stdout),
                    stderr: collect(stderr),
                };
                if !invocation.stdout.is_empty() {
                    tracing::debug!("stdout: {}", invocation.stdout.trim_end());
                }
                if !invocation.stderr.is_empty() {
                    tracing::debug!("stderr: {}", invocation.stderr.trim_end());
                }
                invocation
            }
            Ok(None) => {
                // Readers are left detached: a grandchild may still hold the pipes open
                tracing::debug!(
                    "{} exceeded {}s, killed",
                    spec.program.display(),
                    spec.timeout.as_secs_f32()
                );
                Invocation::failure(format!(
                    "{} after {:.0}s",
                    TIMEOUT_INDICATOR,
                    spec.timeout.as_secs_f32()
                ))
            }
            Err(e) => Invocation::failure(format!(
                "failed to wait for {}: {}",
                spec.program.display(),
                e
            )),
        }
    }
}

/// Poll the child until it exits or the timeout elapses.
///
/// Returns `Ok(None)` on timeout, after the child has been killed and reaped.
fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> std::io::Result<Option<std::process::ExitStatus>> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) => {}
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
