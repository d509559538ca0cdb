//! External process execution with hard wall-clock bounds

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by a `[STDERR]` block when stderr is non-empty
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            out.push_str("\n[STDERR]\n");
            out.push_str(&self.stderr);
        }
        out
    }

    /// Short diagnostic for failure reasons
    pub fn describe(&self) -> String {
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        match (self.code, detail.is_empty()) {
            (Some(code), true) => format!("exit code {code}"),
            (Some(code), false) => format!("exit code {code}: {detail}"),
            (None, _) => "terminated by signal".to_string(),
        }
    }
}

impl From<std::process::Output> for ProcessOutput {
    fn from(out: std::process::Output) -> Self {
        Self {
            code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    /// The bound elapsed and the process was killed
    #[error("timed out after {} seconds", .0.as_secs())]
    TimedOut(Duration),
    #[error("i/o error while waiting for process: {0}")]
    Io(#[from] io::Error),
}

/// Run a program to completion, killing it if `limit` elapses
pub async fn run(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    limit: Duration,
) -> Result<ProcessOutput, RunError> {
    debug!("Running {} {:?}", program, args);
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(|source| RunError::Spawn {
        program: program.to_string(),
        source,
    })?;

    // Dropping the future on timeout drops the child, which kills it
    match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(result) => Ok(result?.into()),
        Err(_) => Err(RunError::TimedOut(limit)),
    }
}

/// Run a command line through the platform shell
pub async fn run_shell(command_line: &str, limit: Duration) -> Result<ProcessOutput, RunError> {
    let (shell, flag) = shell();
    run(shell, &[flag.to_string(), command_line.to_string()], None, limit).await
}

fn shell() -> (&'static str, &'static str) {
    if cfg!(windows) {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    }
}

/// Start a program that outlives the agent; output is discarded
pub fn spawn_detached(program: &Path, args: &[String]) -> io::Result<()> {
    let mut cmd = std::process::Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }
    cmd.spawn().map(|_child| ())
}
