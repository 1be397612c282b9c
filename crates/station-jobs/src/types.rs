//! Remote job records and the typed job kinds they resolve to.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use station_scheduler::Resource;

use crate::error::{JobError, Result};

/// Lifecycle state of a job as the control server tracks it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be picked up by the station.
    #[default]
    Pending,
    Running,
    Finished,
    Failed,
    /// Withdrawn by the operator; the station should drop it.
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "finished" => Ok(JobStatus::Finished),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A job as served by `GET /stations/{id}/jobs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteJob {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Unix seconds.
    pub start_time: i64,
    /// Unix seconds.
    pub end_time: i64,
    pub command: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub status: JobStatus,
}

/// Body of `PUT /jobs/{id}/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StatusUpdate {
    pub fn running() -> Self {
        Self {
            status: JobStatus::Running,
            reason: None,
        }
    }

    pub fn finished() -> Self {
        Self {
            status: JobStatus::Finished,
            reason: None,
        }
    }

    /// The job stopped because it was withdrawn or the agent shut down.
    pub fn cancelled() -> Self {
        Self {
            status: JobStatus::Cancelled,
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            reason: Some(reason.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// JobKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogArgs {
    /// Number of trailing lines; falls back to `logs.default_lines`.
    #[serde(default)]
    pub lines: Option<usize>,
    /// Alternative log file; falls back to `logs.path`.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkArgs {
    /// Connection profile to modify, e.g. `"wwan0"`.
    pub connection: String,
    /// Profile settings, e.g. `{"ipv4.method": "manual"}`.
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureArgs {
    /// Extra arguments appended after `capture.args`.
    #[serde(default)]
    pub args: Vec<String>,
    /// Output file name prefix; defaults to the job ID.
    #[serde(default)]
    pub file_prefix: Option<String>,
}

/// Every job this station knows how to run, with typed arguments.
///
/// Resolved once when a remote job is ingested, so an unknown command or a
/// malformed argument map is rejected before anything is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    StatusReport,
    FetchLogs(LogArgs),
    ConfigureNetwork(NetworkArgs),
    IridiumCapture(CaptureArgs),
}

impl JobKind {
    /// Map a remote command name and argument map to a job kind.
    ///
    /// Any command mentioning `iridium` is a radio capture.
    pub fn parse(
        command: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self> {
        let normalized = command.trim().to_ascii_lowercase();
        if normalized.contains("iridium") {
            return Ok(JobKind::IridiumCapture(parse_args(command, arguments)?));
        }
        match normalized.as_str() {
            "status" | "get_status" | "report_status" => Ok(JobKind::StatusReport),
            "logs" | "get_logs" | "fetch_logs" => Ok(JobKind::FetchLogs(parse_args(command, arguments)?)),
            "network" | "set_network" | "configure_network" => {
                Ok(JobKind::ConfigureNetwork(parse_args(command, arguments)?))
            }
            _ => Err(JobError::UnsupportedCommand(command.to_string())),
        }
    }

    /// Exclusive resources held for the whole job window.
    pub fn resources(&self) -> Vec<Resource> {
        match self {
            JobKind::IridiumCapture(_) => vec![Resource::SDR],
            JobKind::ConfigureNetwork(_) => vec![Resource::new(NETWORK_RESOURCE)],
            JobKind::StatusReport | JobKind::FetchLogs(_) => Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::StatusReport => "status_report",
            JobKind::FetchLogs(_) => "fetch_logs",
            JobKind::ConfigureNetwork(_) => "configure_network",
            JobKind::IridiumCapture(_) => "iridium_capture",
        }
    }
}

/// Held by network reconfiguration so two changes never overlap.
pub const NETWORK_RESOURCE: &str = "network";

fn parse_args<T: serde::de::DeserializeOwned>(
    command: &str,
    arguments: &serde_json::Map<String, serde_json::Value>,
) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(arguments.clone())).map_err(|e| {
        JobError::InvalidArguments {
            command: command.to_string(),
            reason: e.to_string(),
        }
    })
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Exit status and captured text of a helper program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Process exit code (-1 when killed by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// The process was killed because the job was cancelled or ran out of time.
    pub interrupted: bool,
}

/// Snapshot uploaded by a status-report job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationStatus {
    pub station_id: String,
    pub hostname: String,
    pub uptime_secs: Option<f64>,
    /// IDs of jobs executing when the snapshot was taken (this one included).
    pub running_jobs: Vec<String>,
    pub queued_jobs: usize,
    pub reported_at: DateTime<Utc>,
}

/// Body of `POST /jobs/{id}/result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutput {
    Status(StationStatus),
    Logs { path: String, lines: Vec<String> },
    Network { steps: Vec<CommandOutput> },
    Capture { file: String, bytes: u64, output: CommandOutput },
}
