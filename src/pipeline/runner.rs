use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Exit status and captured output of one finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Carries whatever the process wrote before it was killed.
    #[error("process did not finish within {}s", .after.as_secs_f64())]
    TimedOut {
        after: Duration,
        stdout: String,
        stderr: String,
    },

    #[error("failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),
}

/// Launches the external transformation command
///
/// The command line is `<program> <leading args...> <input> <output>`.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
    leading_args: Vec<String>,
    timeout: Duration,
    capture_limit: usize,
}

impl ProcessRunner {
    pub fn new(
        program: impl Into<String>,
        leading_args: Vec<String>,
        timeout: Duration,
        capture_limit: usize,
    ) -> Self {
        Self {
            program: program.into(),
            leading_args,
            timeout,
            capture_limit,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run the command to completion, or kill it once the timeout expires
    ///
    /// # Concurrency
    /// - stdout and stderr are drained by their own tasks while the child runs,
    ///   so a child that fills a pipe never blocks on us
    /// - at most `capture_limit` bytes of each stream are kept; the rest is discarded
    /// - the timeout covers both the exit and the end of both streams, so a
    ///   background helper holding a pipe open cannot stretch the job
    /// - the child leads its own process group; on timeout or cancellation the
    ///   whole group is killed and the child reaped before returning
    pub async fn run(&self, input: &Path, output: &Path) -> Result<ProcessOutcome, RunError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| RunError::Launch {
            program: self.program.clone(),
            source,
        })?;
        let mut group = GroupGuard::new(child.id());
        debug!("Runner: spawned '{}' (pid {:?})", self.program, child.id());

        let mut stdout_task = spawn_drain(child.stdout.take(), self.capture_limit);
        let mut stderr_task = spawn_drain(child.stderr.take(), self.capture_limit);

        let finished = timeout(self.timeout, async {
            let status = child.wait().await;
            let stdout = join_drain(&mut stdout_task).await;
            let stderr = join_drain(&mut stderr_task).await;
            (status, stdout, stderr)
        })
        .await;

        let (status, stdout, stderr) = match finished {
            Ok(finished) => finished,
            Err(_) => {
                warn!(
                    "Runner: '{}' exceeded {:?}, killing its process group",
                    self.program, self.timeout
                );
                group.kill();
                reap(&mut child, &self.program).await;
                // Every writer is gone now, so the readers reach EOF promptly.
                let stdout = join_drain_within(&mut stdout_task, DRAIN_GRACE).await;
                let stderr = join_drain_within(&mut stderr_task, DRAIN_GRACE).await;
                return Err(RunError::TimedOut {
                    after: self.timeout,
                    stdout,
                    stderr,
                });
            }
        };

        let status = status.map_err(RunError::Wait)?;
        group.disarm();
        let exit_code = exit_code(status);
        debug!("Runner: '{}' exited with code {}", self.program, exit_code);

        Ok(ProcessOutcome {
            exit_code,
            stdout,
            stderr,
        })
    }
}

/// How long captured output may take to arrive once the process group is dead.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Kills the child's process group when dropped, unless disarmed first.
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg only takes plain integers.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            error!("Runner: failed to kill process group {}: {:?}", pgid, err);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

async fn reap(child: &mut Child, program: &str) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    if let Err(e) = child.kill().await {
        error!("Runner: failed to kill '{}': {:?}", program, e);
    }
}

fn spawn_drain<R>(stream: Option<R>, limit: usize) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        match stream {
            Some(stream) => drain_capped(stream, limit).await,
            None => Vec::new(),
        }
    })
}

/// Read `stream` to EOF, keeping only the first `limit` bytes.
async fn drain_capped<R: AsyncRead + Unpin>(mut stream: R, limit: usize) -> Vec<u8> {
    let mut kept = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                warn!("Runner: error reading process output: {:?}", e);
                break;
            }
        }
    }
    kept
}

async fn join_drain(task: &mut JoinHandle<Vec<u8>>) -> String {
    match task.await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            error!("Runner: output reader task failed: {:?}", e);
            String::new()
        }
    }
}

async fn join_drain_within(task: &mut JoinHandle<Vec<u8>>, grace: Duration) -> String {
    match timeout(grace, join_drain(task)).await {
        Ok(text) => text,
        Err(_) => {
            task.abort();
            debug!("Runner: output still open {:?} after kill, dropping it", grace);
            String::new()
        }
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
