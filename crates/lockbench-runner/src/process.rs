use crate::error::SpawnError;
use serde::Serialize;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_GRACE_MILLIS: u64 = 500;
const POLL_INTERVAL_MILLIS: u64 = 10;

/// How a benchmark invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExitKind {
    Exited { code: i32 },
    Signaled,
    /// Deadline elapsed; the process group was killed and output salvaged.
    TimedOut,
    /// Waiting on the child failed and the harness killed it.
    Killed,
}

impl ExitKind {
    fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => ExitKind::Exited { code },
            None => ExitKind::Signaled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit: ExitKind,
    pub elapsed: Duration,
}

impl RunOutput {
    pub fn timed_out(&self) -> bool {
        self.exit == ExitKind::TimedOut
    }
}

/// Runs the benchmark once with the given positional arguments.
///
/// Implementations must not return while the benchmark is still running, and
/// must only fail when it could not be started.
pub trait BenchmarkRunner {
    fn run(&self, args: &[String]) -> Result<RunOutput, SpawnError>;
}

/// Runs a benchmark binary as a child process under a hard wall-clock timeout.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    binary: PathBuf,
    timeout: Duration,
    grace: Duration,
}

impl ProcessRunner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            grace: Duration::from_millis(DEFAULT_GRACE_MILLIS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Upper bound on how long to wait for the output pipes to drain once the
    /// child has been reaped. Applies again after leftover group members are
    /// killed.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own group so a kill also reaches anything the benchmark forked.
            cmd.process_group(0);
        }
        cmd
    }
}

impl BenchmarkRunner for ProcessRunner {
    fn run(&self, args: &[String]) -> Result<RunOutput, SpawnError> {
        let started = Instant::now();
        let child = self
            .command(args)
            .spawn()
            .map_err(|e| SpawnError::from_io(&self.binary, e))?;
        let mut guard = ChildGuard::new(child);
        debug!(binary = %self.binary.display(), pid = guard.pid(), ?args, "benchmark started");

        let stdout = guard
            .take_stdout()
            .map(|pipe| PipeCapture::start("stdout", pipe))
            .transpose()
            .map_err(|e| SpawnError::from_io(&self.binary, e))?;
        let stderr = guard
            .take_stderr()
            .map(|pipe| PipeCapture::start("stderr", pipe))
            .transpose()
            .map_err(|e| SpawnError::from_io(&self.binary, e))?;

        // A timeout too large to represent as an instant means no deadline.
        let deadline = started.checked_add(self.timeout);
        let poll = Duration::from_millis(POLL_INTERVAL_MILLIS);
        let exit = loop {
            match guard.try_wait() {
                Ok(Some(status)) => break ExitKind::from_status(status),
                Ok(None) => {
                    let now = Instant::now();
                    match deadline {
                        Some(deadline) if now >= deadline => {
                            warn!(
                                binary = %self.binary.display(),
                                timeout_ms = self.timeout.as_millis() as u64,
                                "benchmark timed out, killing"
                            );
                            guard.terminate();
                            break ExitKind::TimedOut;
                        }
                        Some(deadline) => thread::sleep(poll.min(deadline - now)),
                        None => thread::sleep(poll),
                    }
                }
                Err(err) => {
                    warn!(binary = %self.binary.display(), error = %err, "wait on benchmark failed, killing");
                    guard.terminate();
                    break ExitKind::Killed;
                }
            }
        };

        let mut pipes = [stdout, stderr];
        let mut drained = wait_for_eof(&mut pipes, self.grace);
        // After a natural exit the group id stays reserved while a member
        // still holds our pipes, so signalling the group cannot hit a stranger.
        if !drained && matches!(exit, ExitKind::Exited { .. } | ExitKind::Signaled) {
            warn!(
                binary = %self.binary.display(),
                pgid = guard.pid(),
                "benchmark left processes holding its output, killing group"
            );
            kill_group(guard.pid());
            drained = wait_for_eof(&mut pipes, self.grace);
        }
        if !drained {
            debug!("output pipes still open, keeping partial output");
        }
        let [stdout, stderr] = pipes.map(|p| p.map(PipeCapture::into_text).unwrap_or_default());
        let elapsed = started.elapsed();
        debug!(
            ?exit,
            elapsed_ms = elapsed.as_millis() as u64,
            stdout_bytes = stdout.len(),
            "benchmark finished"
        );

        Ok(RunOutput {
            stdout,
            stderr,
            exit,
            elapsed,
        })
    }
}

/// Owns a running child. Dropping the guard before the child was reaped kills
/// and reaps it, so no exit path leaves the benchmark running.
struct ChildGuard {
    child: Option<Child>,
    pid: u32,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child: Some(child),
            pid,
        }
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    fn take_stdout(&mut self) -> Option<std::process::ChildStdout> {
        self.child.as_mut().and_then(|c| c.stdout.take())
    }

    fn take_stderr(&mut self) -> Option<std::process::ChildStderr> {
        self.child.as_mut().and_then(|c| c.stderr.take())
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };
        let status = child.try_wait()?;
        if status.is_some() {
            // Reaped: the pid may be reused from here on, so never signal it again.
            self.child = None;
        }
        Ok(status)
    }

    fn terminate(&mut self) -> Option<ExitStatus> {
        let mut child = self.child.take()?;
        kill_group(self.pid);
        let _ = child.kill();
        child.wait().ok()
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if self.child.is_some() {
            let _ = self.terminate();
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    // The child leads its own group (process_group(0)), so pgid == pid.
    // ESRCH once the group is gone is expected and ignored.
    unsafe {
        libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Drains one output pipe on a background thread into a shared buffer, so the
/// bytes written before a kill stay available to the caller.
struct PipeCapture {
    buf: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Receiver<()>,
    finished: bool,
}

impl PipeCapture {
    fn start<R: Read + Send + 'static>(name: &str, mut pipe: R) -> io::Result<Self> {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let (tx, done) = mpsc::channel();
        thread::Builder::new()
            .name(format!("lockbench-{name}"))
            .spawn(move || {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => match sink.lock() {
                            Ok(mut b) => b.extend_from_slice(&chunk[..n]),
                            Err(poisoned) => poisoned.into_inner().extend_from_slice(&chunk[..n]),
                        },
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
                let _ = tx.send(());
            })?;
        Ok(Self {
            buf,
            done,
            finished: false,
        })
    }

    /// Waits for EOF until `deadline` (forever when `None`). Returns whether
    /// the reader has finished.
    fn wait_until(&mut self, deadline: Option<Instant>) -> bool {
        if !self.finished {
            // A disconnected channel means the reader thread is gone as well.
            self.finished = match deadline {
                Some(deadline) => !matches!(
                    self.done
                        .recv_timeout(deadline.saturating_duration_since(Instant::now())),
                    Err(mpsc::RecvTimeoutError::Timeout)
                ),
                None => {
                    let _ = self.done.recv();
                    true
                }
            };
        }
        self.finished
    }

    /// What has been read so far.
    fn into_text(self) -> String {
        let bytes = match self.buf.lock() {
            Ok(b) => b.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Gives every reader up to `grace` to reach EOF; true when all of them did.
fn wait_for_eof(pipes: &mut [Option<PipeCapture>], grace: Duration) -> bool {
    let deadline = Instant::now().checked_add(grace);
    pipes
        .iter_mut()
        .flatten()
        .fold(true, |all, pipe| pipe.wait_until(deadline) && all)
}
