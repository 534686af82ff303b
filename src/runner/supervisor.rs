//! Subprocess supervision with a bounded wait
//!
//! Runs one child with stdin closed and stdout/stderr sharing a single pipe,
//! so the captured buffer is in the order the child wrote it. A child that
//! outlives its timeout is terminated, and whatever it printed up to that
//! point is still returned.

use std::borrow::Cow;
use std::io::PipeReader;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::common::{Error, Result};

/// Exit code reported for a timed-out child, as `timeout(1)` does
///
/// A timed-out [`run`] returns after at most
/// `timeout + kill_grace + drain_grace`.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Default for [`ProcessSpec::drain_grace`]
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8192;

/// How the child's run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    TimedOut,
}

/// Result of a supervised run
#[derive(Debug, Clone)]
pub struct SubprocessResult {
    pub exit_code: i32,
    /// Combined stdout and stderr
    pub output: Vec<u8>,
    pub status: RunStatus,
}

impl SubprocessResult {
    pub fn output_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }
}

/// What to run and how long to wait for it
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    /// Added on top of the inherited environment
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    /// Time between the polite and the forced termination
    pub kill_grace: Duration,
    /// How long to keep reading output after the child has exited
    ///
    /// A grandchild can inherit the pipe and keep it open indefinitely.
    pub drain_grace: Duration,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: Vec::new(),
            timeout,
            kill_grace: Duration::from_secs(2),
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }
}

/// Run `spec` to completion or timeout
pub async fn run(spec: &ProcessSpec) -> Result<SubprocessResult> {
    // One pipe for both streams keeps their relative order
    let (output_rx, output_tx) = std::io::pipe()?;

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(output_tx.try_clone()?)
        .stderr(output_tx)
        .kill_on_drop(true);
    if let Some(dir) = &spec.current_dir {
        cmd.current_dir(dir);
    }

    let spawned = cmd.spawn();
    // Our copies of the write end must go, or the pipe never reaches EOF
    drop(cmd);
    let mut child = spawned.map_err(|source| Error::Spawn {
        program: spec.program.clone(),
        source,
    })?;
    tracing::debug!(pid = ?child.id(), "Spawned {}", spec.program.display());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let reader = spawn_reader(output_rx, tx)?;

    let (status, exit_code) = match timeout(spec.timeout, child.wait()).await {
        Ok(Ok(exit)) => (RunStatus::Completed, exit_code_of(exit)),
        Ok(Err(e)) => {
            reader.abort();
            return Err(Error::Io(e));
        }
        Err(_) => {
            tracing::warn!(
                "Timeout after {:?} executing '{}'",
                spec.timeout,
                spec.program.display()
            );
            terminate(&mut child, spec.kill_grace).await;
            (RunStatus::TimedOut, TIMEOUT_EXIT_CODE)
        }
    };

    let mut output = Vec::new();
    let drained = timeout(spec.drain_grace, async {
        while let Some(chunk) = rx.recv().await {
            output.extend_from_slice(&chunk);
        }
    })
    .await;
    if drained.is_err() {
        while let Ok(chunk) = rx.try_recv() {
            output.extend_from_slice(&chunk);
        }
        tracing::warn!("Output pipe still open after exit; captured output may be incomplete");
    }
    reader.abort();

    Ok(SubprocessResult {
        exit_code,
        output,
        status,
    })
}

#[cfg(unix)]
fn spawn_reader(
    pipe: PipeReader,
    tx: mpsc::UnboundedSender<Vec<u8>>,
) -> std::io::Result<JoinHandle<()>> {
    let pipe = tokio::net::unix::pipe::Receiver::from_owned_fd(pipe.into())?;
    Ok(tokio::spawn(forward(pipe, tx)))
}

#[cfg(not(unix))]
fn spawn_reader(
    mut pipe: PipeReader,
    tx: mpsc::UnboundedSender<Vec<u8>>,
) -> std::io::Result<JoinHandle<()>> {
    use std::io::Read;

    Ok(tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("Error reading child output: {}", e);
                    break;
                }
            }
        }
    }))
}

/// Copy the output pipe into the capture channel until EOF
#[cfg_attr(not(unix), allow(dead_code))]
async fn forward<R: AsyncRead + Unpin>(mut pipe: R, tx: mpsc::UnboundedSender<Vec<u8>>) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!("Error reading child output: {}", e);
                break;
            }
        }
    }
}

/// Ask the child to exit, then force it after `grace`
///
/// Always reaps the child, so it is gone once this returns.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: `pid` is our own child and has not been reaped yet
        let sent = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } == 0;
        if sent {
            if let Ok(Ok(exit)) = timeout(grace, child.wait()).await {
                tracing::debug!("Child exited after SIGTERM: {}", exit);
                return;
            }
            tracing::debug!("Child ignored SIGTERM for {:?}, killing", grace);
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill child process: {}", e);
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
