//! Error types for the station-jobs crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    /// The remote job names a command this station does not implement.
    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    /// The job's argument map does not fit the command's argument type.
    #[error("Invalid arguments for {command}: {reason}")]
    InvalidArguments { command: String, reason: String },

    /// A job record the scheduler cannot represent (missing ID, bad timestamps).
    #[error("Invalid job {id}: {reason}")]
    InvalidJob { id: String, reason: String },

    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The control server answered with a non-success status.
    #[error("Server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A helper program could not be started.
    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// A helper program exited unsuccessfully.
    #[error("{program} exited with code {code}: {stderr}")]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    /// The job was cancelled before it could finish its work.
    #[error("Job cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, JobError>;
