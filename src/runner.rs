//! Execution of a single job's external process.

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};
use tracing::{debug, warn};

use crate::command::CommandSpec;
use crate::job::{JobResult, TranscodeJob};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How long to keep reading pipes once the process itself is gone. Anything a
/// surviving grandchild writes after that is dropped.
const PIPE_GRACE: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 8 * 1024;

/// Runs one job to completion. Every outcome, including a process that never
/// started, comes back as a [`JobResult`]; implementations must not panic.
pub trait JobRunner: Send + Sync + 'static {
    fn run(&self, job: TranscodeJob) -> JobResult;
}

/// What happened to one process.
#[derive(Debug)]
pub enum Execution {
    /// Spawning failed; carries the error message.
    LaunchFailed(String),
    /// The process ended on its own. `code` is `None` when a signal ended it.
    Exited {
        code: Option<i32>,
        stdout: String,
        stderr: String,
        elapsed: Duration,
    },
    /// The deadline passed and the process (group, on unix) was killed.
    TimedOut {
        stdout: String,
        stderr: String,
        elapsed: Duration,
    },
}

/// Spawns the job's program directly (no shell) and captures stdout and
/// stderr separately. Single attempt, no retries.
///
/// With a timeout configured the process gets its own process group on unix,
/// so wrapper scripts and everything they started die together.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the process and report a timeout once `timeout` has elapsed.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run `command` and wait for it, bounded by the timeout if one is set.
    pub fn execute(&self, command: &CommandSpec) -> Execution {
        let started = Instant::now();

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        if self.timeout.is_some() {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Execution::LaunchFailed(format!(
                    "failed to launch {}: {e}",
                    command.program.display()
                ))
            }
        };

        let stdout = capture(child.stdout.take());
        let stderr = capture(child.stderr.take());

        let waited = match self.timeout {
            Some(limit) => wait_with_deadline(&mut child, limit),
            None => child.wait().map(Some),
        };

        let drain_until = Instant::now() + PIPE_GRACE;
        let stdout = collect(stdout, drain_until);
        let mut stderr = collect(stderr, drain_until);
        let elapsed = started.elapsed();

        match waited {
            Ok(Some(status)) => Execution::Exited {
                code: status.code(),
                stdout,
                stderr,
                elapsed,
            },
            Ok(None) => Execution::TimedOut {
                stdout,
                stderr,
                elapsed,
            },
            Err(e) => {
                stderr.push_str(&format!("\nfailed waiting for process: {e}"));
                Execution::Exited {
                    code: None,
                    stdout,
                    stderr,
                    elapsed,
                }
            }
        }
    }
}

impl JobRunner for ProcessRunner {
    fn run(&self, job: TranscodeJob) -> JobResult {
        debug!(job = job.index, command = %job.command, "launching");

        match self.execute(&job.command) {
            Execution::LaunchFailed(message) => {
                warn!(job = job.index, "{message}");
                JobResult::launch_failed(job, message)
            }
            Execution::Exited {
                code,
                stdout,
                stderr,
                elapsed,
            } => JobResult::exited(job, code, stdout, stderr, elapsed),
            Execution::TimedOut {
                stdout,
                stderr,
                elapsed,
            } => {
                // Only reachable with a timeout configured.
                let limit = self.timeout.unwrap_or_default();
                warn!(job = job.index, ?limit, "process timed out and was killed");
                JobResult::timed_out(job, limit, stdout, stderr, elapsed)
            }
        }
    }
}

/// `Ok(None)` means the deadline passed and the child was killed.
fn wait_with_deadline(child: &mut Child, limit: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return terminate(child);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// Kill the child's process group and reap the child. Returns its status if
/// it had already exited on its own before the signal landed.
#[cfg(unix)]
fn terminate(child: &mut Child) -> io::Result<Option<ExitStatus>> {
    use std::os::unix::process::ExitStatusExt;

    let pgid = child.id() as libc::pid_t;
    // SAFETY: kill(2) has no memory effects. The child is not reaped yet, so
    // its pid (and the group it leads) cannot have been reused.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        // No group of its own; fall back to the child alone.
        let _ = child.kill();
    }
    let status = child.wait()?;
    Ok(status.signal().is_none().then_some(status))
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> io::Result<Option<ExitStatus>> {
    match child.kill() {
        Ok(()) => {
            child.wait()?;
            Ok(None)
        }
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => child.wait().map(Some),
        Err(e) => Err(e),
    }
}

/// Drain a pipe on its own thread so a chatty child never blocks on a full
/// pipe while we wait for the other one. Chunks are forwarded as they arrive
/// so partial output survives a reader that never sees EOF.
fn capture<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Receiver<Vec<u8>>> {
    pipe.map(|mut pipe| {
        let (tx, rx) = unbounded();
        thread::spawn(move || {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match pipe.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });
        rx
    })
}

fn collect(chunks: Option<Receiver<Vec<u8>>>, deadline: Instant) -> String {
    let Some(chunks) = chunks else {
        return String::new();
    };
    let mut bytes = Vec::new();
    while let Ok(chunk) = chunks.recv_deadline(deadline) {
        bytes.extend_from_slice(&chunk);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
