//! Shell command execution with a timeout.
//!
//! Commands run on `tokio::process` with a deadline. A command that runs
//! out of time has its process group killed and is reported as not
//! completed. Output is collected until the pipes close or a short grace
//! period after exit, so a detached grandchild holding the pipes open
//! cannot stall the caller.
//!
//! [`CommandRunner`] stays synchronous for the install stages; the runner
//! bridges onto whatever runtime the caller is on, or a private one.

use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::error::DaemonError;

/// How long output is still read after the command exits or is killed.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Result of a shell command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShellOutput {
    /// `false` when the command was killed after the timeout.
    pub completed: bool,
    pub exit_code: Option<i32>,
    /// Standard output followed by standard error.
    pub output: String,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.completed && self.exit_code == Some(0)
    }

    /// Turn a timeout or a non-zero exit into an error.
    pub fn check(self, command: &str, timeout: Duration) -> Result<ShellOutput, DaemonError> {
        if !self.completed {
            return Err(DaemonError::CommandTimeout {
                command: command.to_string(),
                timeout,
            });
        }
        if self.exit_code != Some(0) {
            return Err(DaemonError::CommandFailed {
                command: command.to_string(),
                exit_code: self.exit_code,
                output: self.output.trim().to_string(),
            });
        }
        Ok(self)
    }
}

/// Runs shell command lines.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &str, timeout: Duration) -> Result<ShellOutput, DaemonError>;

    /// Run and require a successful exit.
    fn run_checked(&self, command: &str, timeout: Duration) -> Result<ShellOutput, DaemonError> {
        self.run(command, timeout)?.check(command, timeout)
    }
}

/// Runs commands through `sh -c` (`cmd /C` on Windows).
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

type Captured = (JoinHandle<()>, Arc<Mutex<Vec<u8>>>);

fn capture<R: AsyncRead + Unpin + Send + 'static>(reader: Option<R>) -> Captured {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let sink = buf.clone();
    let task = tokio::spawn(async move {
        let Some(mut reader) = reader else {
            return;
        };
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
            }
        }
    });
    (task, buf)
}

async fn collect((mut task, buf): Captured, until: Instant) -> String {
    if timeout_at(until, &mut task).await.is_err() {
        task.abort();
        debug!("Output pipe still held open, keeping partial output");
    }
    let bytes = std::mem::take(&mut *buf.lock());
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

async fn run_with_deadline(command: &str, timeout: Duration) -> Result<ShellOutput, DaemonError> {
    let (shell, flag) = if cfg!(target_os = "windows") {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    };

    debug!(command, ?timeout, "Running shell command");

    let mut cmd = Command::new(shell);
    cmd.arg(flag)
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group so a timeout kills the whole pipeline.
    #[cfg(unix)]
    cmd.process_group(0);

    let deadline = Instant::now() + timeout;
    let mut child = cmd.spawn()?;
    let pid = child.id();

    let stdout = capture(child.stdout.take());
    let stderr = capture(child.stderr.take());

    let exit_code = match timeout_at(deadline, child.wait()).await {
        Ok(status) => Some(status?.code().unwrap_or(-1)),
        Err(_) => {
            warn!(command, ?timeout, "Shell command timed out, killing it");
            kill_group(pid);
            let _ = child.kill().await;
            None
        }
    };

    let drain_until = Instant::now() + DRAIN_GRACE;
    let mut output = collect(stdout, drain_until).await;
    let stderr = collect(stderr, drain_until).await;
    if !stderr.is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&stderr);
    }

    Ok(ShellOutput {
        completed: exit_code.is_some(),
        exit_code,
        output,
    })
}

fn private_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

/// Drive a future to completion from synchronous code.
fn block_on<F, T>(future: F) -> Result<T, DaemonError>
where
    F: Future<Output = Result<T, DaemonError>> + Send,
    T: Send,
{
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| handle.block_on(future))
        }
        // A current-thread runtime cannot be re-entered from its own thread.
        Ok(_) => std::thread::scope(|scope| {
            scope
                .spawn(|| private_runtime()?.block_on(future))
                .join()
                .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
        }),
        Err(_) => private_runtime()?.block_on(future),
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str, timeout: Duration) -> Result<ShellOutput, DaemonError> {
        block_on(run_with_deadline(command, timeout))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn test_captures_output_and_exit_code() {
        let out = ShellRunner::new()
            .run("echo hello; echo oops 1>&2; exit 3", Duration::from_secs(5))
            .unwrap();
        assert!(out.completed);
        assert_eq!(out.exit_code, Some(3));
        assert!(out.output.contains("hello"));
        assert!(out.output.contains("oops"));
        assert!(!out.success());
    }

    #[test]
    fn test_timeout_kills_command() {
        let started = Instant::now();
        let out = ShellRunner::new()
            .run("sleep 5", Duration::from_millis(100))
            .unwrap();
        assert!(!out.completed);
        assert_eq!(out.exit_code, None);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_run_checked() {
        let runner = ShellRunner::new();
        assert!(runner.run_checked("true", Duration::from_secs(5)).is_ok());

        let err = runner
            .run_checked("echo nope; exit 1", Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, DaemonError::CommandFailed { exit_code: Some(1), .. }));
        assert!(err.to_string().contains("nope"));

        let err = runner
            .run_checked("sleep 5", Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, DaemonError::CommandTimeout { .. }));
    }

    // `setsid` moves the grandchild out of the killed process group while
    // it keeps the output pipes open.
    #[cfg(target_os = "linux")]
    #[test]
    fn test_timeout_holds_with_detached_grandchild() {
        let started = Instant::now();
        let out = ShellRunner::new()
            .run("setsid sleep 3 & sleep 10", Duration::from_millis(100))
            .unwrap();
        assert!(!out.completed);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_exit_returns_while_grandchild_holds_pipes() {
        let started = Instant::now();
        let out = ShellRunner::new()
            .run("(setsid sleep 3 &); echo done", Duration::from_secs(1))
            .unwrap();
        assert!(out.success());
        assert_eq!(out.output.trim(), "done");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_runs_inside_multi_thread_runtime() {
        let out = ShellRunner::new()
            .run("echo threaded", Duration::from_secs(5))
            .unwrap();
        assert!(out.success());
        assert_eq!(out.output.trim(), "threaded");
    }

    #[tokio::test]
    async fn test_runs_inside_current_thread_runtime() {
        let out = ShellRunner::new()
            .run("echo local", Duration::from_secs(5))
            .unwrap();
        assert!(out.success());
        assert_eq!(out.output.trim(), "local");
    }
}
