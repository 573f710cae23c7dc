//! Subprocess supervisor (spec §4.1).
//!
//! Spawns an external command, writes a prompt to its stdin, collects
//! stdout/stderr, enforces a wall-clock timeout with two-phase termination,
//! and guarantees the child is dead before `invoke` resolves.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// Output buffer cap before an invocation is aborted (spec §4.1).
pub const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Grace period between the polite terminate signal and the hard kill
/// (spec §4.1's two-phase termination).
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

const READ_CHUNK_SIZE: usize = 8192;

/// Everything needed to invoke one subprocess.
#[derive(Debug, Clone)]
pub struct InvokeParams {
    pub command: PathBuf,
    pub args: Vec<String>,
    pub stdin_bytes: Vec<u8>,
    pub timeout: Duration,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
}

/// Result of a subprocess invocation. Timeouts and non-zero exits are
/// returned as fields here, never as an `Err` — only spawn failure is an
/// error (spec §4.1).
#[derive(Debug, Clone)]
pub struct InvokeResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub wall_clock: Duration,
    pub timed_out: bool,
    pub buffer_exceeded: bool,
    pub child_pid: Option<u32>,
}

#[derive(Debug, Clone)]
struct ChildInfo {
    command: PathBuf,
    spawned_at: Instant,
}

/// Map from PID to metadata for every unresolved invocation, probed by the
/// shutdown hook (spec §4.1 Live-child registry; spec §9 — expressed as an
/// object owned by the call service, threaded explicitly, not a global).
#[derive(Debug, Clone, Default)]
pub struct LiveChildRegistry {
    inner: Arc<Mutex<HashMap<u32, ChildInfo>>>,
}

impl LiveChildRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, pid: u32, command: PathBuf) {
        self.inner.lock().unwrap().insert(
            pid,
            ChildInfo {
                command,
                spawned_at: Instant::now(),
            },
        );
    }

    fn unregister(&self, pid: u32) {
        self.inner.lock().unwrap().remove(&pid);
    }

    pub fn live_pids(&self) -> Vec<u32> {
        self.inner.lock().unwrap().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hard-kill every live PID's process group. Intended to be invoked
    /// from a process-level shutdown handler (spec §4.1, §5 Cancellation).
    pub fn kill_all(&self) {
        let pids: Vec<u32> = self.live_pids();
        for pid in pids {
            kill_pid_group(pid);
        }
    }
}

#[cfg(unix)]
fn kill_pid_group(pid: u32) {
    let pid = pid as libc::pid_t;
    unsafe {
        let pgid = libc::getpgid(pid);
        if pgid != -1 {
            libc::killpg(pgid, libc::SIGKILL);
        } else {
            libc::kill(pid, libc::SIGKILL);
        }
    }
}

#[cfg(unix)]
fn terminate_pid_group(pid: u32) {
    let pid = pid as libc::pid_t;
    unsafe {
        let pgid = libc::getpgid(pid);
        if pgid != -1 {
            libc::killpg(pgid, libc::SIGTERM);
        } else {
            libc::kill(pid, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn kill_pid_group(_pid: u32) {}
#[cfg(not(unix))]
fn terminate_pid_group(_pid: u32) {}

/// The subprocess supervisor. Stateless apart from the live-child
/// registry it owns, which is threaded explicitly rather than global
/// (spec §9).
#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    registry: LiveChildRegistry,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            registry: LiveChildRegistry::default(),
        }
    }

    pub fn registry(&self) -> &LiveChildRegistry {
        &self.registry
    }

    /// Spawn `params.command`, write `params.stdin_bytes`, and collect its
    /// output under `params.timeout`. Fails only if the binary cannot be
    /// located or executed; timeouts and non-zero exits are result fields.
    pub async fn invoke(&self, params: InvokeParams) -> Result<InvokeResult> {
        trace!(
            command = %params.command.display(),
            args = ?params.args,
            "supervisor: spawning subprocess"
        );

        let start = Instant::now();
        let mut cmd = Command::new(&params.command);
        cmd.args(&params.args);
        cmd.current_dir(&params.cwd);
        cmd.env_clear();
        cmd.envs(&params.env);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setpgid(0, 0) == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    #[cfg(target_os = "linux")]
                    {
                        libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
                    }
                    Ok(())
                });
            }
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Config(format!("spawn failed: {e}")))?;
        let pid = child.id();
        if let Some(pid) = pid {
            self.registry.register(pid, params.command.clone());
        }

        // Stream drain rule: listeners are attached and stdin is written
        // and closed before we ever await process exit, to avoid
        // deadlocking on pipe-buffer fill (spec §4.1).
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(&params.stdin_bytes).await;
            drop(stdin);
        }

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let stdout_task = tokio::spawn(drain_stream(stdout_pipe));
        let stderr_task = tokio::spawn(drain_stream(stderr_pipe));

        let (exit_status, timed_out) = tokio::select! {
            status = child.wait() => {
                (status.map_err(|e| Error::Config(format!("wait failed: {e}")))?, false)
            }
            _ = tokio::time::sleep(params.timeout) => {
                self.two_phase_terminate(&mut child, pid).await;
                (child.wait().await.map_err(|e| Error::Config(format!("wait failed: {e}")))?, true)
            }
        };

        let (stdout, stdout_exceeded) = stdout_task.await.unwrap_or((Vec::new(), false));
        let (stderr, stderr_exceeded) = stderr_task.await.unwrap_or((Vec::new(), false));

        if let Some(pid) = pid {
            self.registry.unregister(pid);
        }

        let wall_clock = start.elapsed();

        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            exit_status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        debug!(
            exit_code = ?exit_status.code(),
            timed_out,
            wall_clock_ms = wall_clock.as_millis() as u64,
            "supervisor: subprocess exited"
        );

        Ok(InvokeResult {
            stdout,
            stderr,
            exit_code: exit_status.code(),
            signal,
            wall_clock,
            timed_out,
            buffer_exceeded: stdout_exceeded || stderr_exceeded,
            child_pid: pid,
        })
    }

    /// Two-phase termination: polite terminate signal to the process
    /// group, a 5-second grace window, then a hard kill if the child has
    /// not exited (spec §4.1).
    async fn two_phase_terminate(&self, child: &mut Child, pid: Option<u32>) {
        if let Some(pid) = pid {
            terminate_pid_group(pid);
        } else {
            let _ = child.start_kill();
        }

        let exited_in_grace = tokio::time::timeout(TERMINATE_GRACE, child.wait())
            .await
            .is_ok();

        if !exited_in_grace {
            warn!(?pid, "supervisor: grace period expired, sending hard kill");
            if let Some(pid) = pid {
                kill_pid_group(pid);
            }
            let _ = child.start_kill();
        }
    }
}

/// Read a stream to completion, capping at [`MAX_OUTPUT_BYTES`]. Returns
/// the bytes read so far and whether the cap was hit.
async fn drain_stream(pipe: Option<impl tokio::io::AsyncRead + Unpin>) -> (Vec<u8>, bool) {
    let Some(pipe) = pipe else {
        return (Vec::new(), false);
    };
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    let mut exceeded = false;

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        if buf.len() + n > MAX_OUTPUT_BYTES {
            let remaining = MAX_OUTPUT_BYTES.saturating_sub(buf.len());
            buf.extend_from_slice(&chunk[..remaining]);
            exceeded = true;
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    (buf, exceeded)
}
