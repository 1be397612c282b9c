//! Helper-program execution tied to a task's cancellation context.
//!
//! The scheduler only signals cancellation; killing the child is done here,
//! one layer below it.

use std::path::PathBuf;
use std::process::Stdio;

use station_scheduler::TaskContext;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{JobError, Result};
use crate::types::CommandOutput;

/// Cap on captured stdout/stderr text; the tail is kept.
pub const MAX_CAPTURED_CHARS: usize = 64 * 1024;

/// A program invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Send stdout to this file instead of capturing it.
    pub stdout_file: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdout_file: None,
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

    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_file = Some(path.into());
        self
    }
}

/// Run `spec` to completion, or kill it once `ctx` is cancelled.
///
/// A killed process is not an error here: the output comes back with
/// `interrupted = true` and the caller decides what that means.
pub async fn run_command(spec: &CommandSpec, ctx: &TaskContext) -> Result<CommandOutput> {
    let stdout = match &spec.stdout_file {
        Some(path) => Stdio::from(tokio::fs::File::create(path).await?.into_std().await),
        None => Stdio::piped(),
    };

    let mut child = Command::new(&spec.program)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| JobError::Spawn {
            program: spec.program.clone(),
            reason: e.to_string(),
        })?;
    debug!(task_id = %ctx.task_id(), program = %spec.program, pid = ?child.id(), "helper spawned");

    // Drain pipes concurrently so a chatty child never blocks on a full pipe.
    let stdout_reader = tokio::spawn(read_pipe(child.stdout.take()));
    let stderr_reader = tokio::spawn(read_pipe(child.stderr.take()));

    let (status, interrupted) = tokio::select! {
        status = child.wait() => (status?, false),
        _ = ctx.cancelled() => {
            warn!(task_id = %ctx.task_id(), program = %spec.program, reason = ?ctx.reason(), "killing helper");
            child.start_kill()?;
            (child.wait().await?, true)
        }
    };

    let stdout = stdout_reader.await.unwrap_or_default();
    let stderr = stderr_reader.await.unwrap_or_default();

    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout: keep_tail(&stdout, MAX_CAPTURED_CHARS),
        stderr: keep_tail(&stderr, MAX_CAPTURED_CHARS),
        interrupted,
    })
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!("pipe read stopped: {e}");
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Keep at most `max` trailing characters.
fn keep_tail(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    text.chars().skip(count - max).collect()
}
