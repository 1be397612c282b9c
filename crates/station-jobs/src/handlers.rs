//! Executes each [`JobKind`] on this station.

use std::path::{Path, PathBuf};

use chrono::Utc;
use station_core::config::{CaptureConfig, LogsConfig, NetworkConfig};
use station_core::StationConfig;
use station_scheduler::{Scheduler, StopReason, TaskContext};
use tracing::{debug, info};

use crate::error::{JobError, Result};
use crate::process::{run_command, CommandSpec};
use crate::types::{
    CaptureArgs, CommandOutput, JobKind, JobOutput, LogArgs, NetworkArgs, StationStatus,
};

/// Runs jobs against the local machine using the station's configuration.
pub struct JobRunner {
    station_id: String,
    capture: CaptureConfig,
    logs: LogsConfig,
    network: NetworkConfig,
    scheduler: Scheduler,
}

impl JobRunner {
    pub fn new(config: &StationConfig, scheduler: Scheduler) -> Self {
        Self {
            station_id: config.station.id.clone(),
            capture: config.capture.clone(),
            logs: config.logs.clone(),
            network: config.network.clone(),
            scheduler,
        }
    }

    pub async fn run(&self, job_id: &str, kind: &JobKind, ctx: &TaskContext) -> Result<JobOutput> {
        debug!(job_id, kind = kind.name(), "running job");
        match kind {
            JobKind::StatusReport => Ok(JobOutput::Status(self.status().await)),
            JobKind::FetchLogs(args) => self.fetch_logs(args).await,
            JobKind::ConfigureNetwork(args) => self.configure_network(args, ctx).await,
            JobKind::IridiumCapture(args) => self.capture(job_id, args, ctx).await,
        }
    }

    pub async fn status(&self) -> StationStatus {
        let hostname = tokio::fs::read_to_string("/etc/hostname")
            .await
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let uptime_secs = tokio::fs::read_to_string("/proc/uptime")
            .await
            .ok()
            .and_then(|s| s.split_whitespace().next()?.parse().ok());

        StationStatus {
            station_id: self.station_id.clone(),
            hostname,
            uptime_secs,
            running_jobs: self
                .scheduler
                .running_ids()
                .into_iter()
                .map(|id| id.0)
                .collect(),
            queued_jobs: self.scheduler.queued_len(),
            reported_at: Utc::now(),
        }
    }

    async fn fetch_logs(&self, args: &LogArgs) -> Result<JobOutput> {
        let path = args.path.clone().unwrap_or_else(|| self.logs.path.clone());
        let count = args.lines.unwrap_or(self.logs.default_lines);
        let text = tokio::fs::read_to_string(&path).await?;
        let lines = tail_lines(&text, count);
        info!(path = %path, lines = lines.len(), "log tail collected");
        Ok(JobOutput::Logs { path, lines })
    }

    /// `<program> connection modify <name> <key> <value>...` then
    /// `<program> connection up <name>`.
    async fn configure_network(&self, args: &NetworkArgs, ctx: &TaskContext) -> Result<JobOutput> {
        let mut modify = vec!["connection".to_string(), "modify".to_string(), args.connection.clone()];
        for (key, value) in &args.settings {
            modify.push(key.clone());
            modify.push(value.clone());
        }
        let up = ["connection", "up", args.connection.as_str()];

        let mut steps = Vec::new();
        if !args.settings.is_empty() {
            let spec = CommandSpec::new(&self.network.program).args(modify);
            steps.push(self.checked(&spec, ctx).await?);
        }
        let spec = CommandSpec::new(&self.network.program).args(up);
        steps.push(self.checked(&spec, ctx).await?);

        info!(connection = %args.connection, "network reconfigured");
        Ok(JobOutput::Network { steps })
    }

    /// Run the capture program until it exits or the job window closes.
    ///
    /// Reaching the end of the window is the normal way a capture stops; an
    /// explicit cancel is reported as a failure.
    async fn capture(&self, job_id: &str, args: &CaptureArgs, ctx: &TaskContext) -> Result<JobOutput> {
        tokio::fs::create_dir_all(&self.capture.output_dir).await?;
        let prefix = args.file_prefix.as_deref().unwrap_or(job_id);
        let file = capture_path(
            Path::new(&self.capture.output_dir),
            prefix,
            &Utc::now().format("%Y%m%dT%H%M%SZ").to_string(),
        );

        let spec = CommandSpec::new(&self.capture.program)
            .args(self.capture.args.iter().cloned())
            .args(args.args.iter().cloned())
            .stdout_to(&file);
        info!(job_id, file = %file.display(), "capture started");
        let output = run_command(&spec, ctx).await?;

        if ctx.reason() == Some(StopReason::Cancelled) {
            return Err(JobError::Cancelled);
        }
        if !output.interrupted && output.exit_code != 0 {
            return Err(command_failed(&spec, &output));
        }

        let bytes = tokio::fs::metadata(&file).await.map(|m| m.len()).unwrap_or(0);
        info!(job_id, bytes, "capture complete");
        Ok(JobOutput::Capture {
            file: file.display().to_string(),
            bytes,
            output,
        })
    }

    /// Run a helper; cancellation or a non-zero exit fails the job.
    async fn checked(&self, spec: &CommandSpec, ctx: &TaskContext) -> Result<CommandOutput> {
        let output = run_command(spec, ctx).await?;
        if output.interrupted {
            return Err(JobError::Cancelled);
        }
        if output.exit_code != 0 {
            return Err(command_failed(spec, &output));
        }
        Ok(output)
    }
}

fn command_failed(spec: &CommandSpec, output: &CommandOutput) -> JobError {
    JobError::CommandFailed {
        program: spec.program.clone(),
        code: output.exit_code,
        stderr: output.stderr.trim().to_string(),
    }
}

fn capture_path(dir: &Path, prefix: &str, stamp: &str) -> PathBuf {
    // Job IDs come from the server; keep them from escaping the capture dir.
    let safe: String = prefix
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("{safe}-{stamp}.bits"))
}

fn tail_lines(text: &str, count: usize) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let skip = lines.len().saturating_sub(count);
    lines[skip..].iter().map(|l| l.to_string()).collect()
}
