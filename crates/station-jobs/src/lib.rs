//! `station-jobs` — the jobs a sensor station runs and where they come from.
//!
//! A [`JobSource`] lists the station's jobs; the [`JobAdapter`] turns each
//! pending one into a scheduler task whose function is executed by the
//! [`JobRunner`]. Status changes and results go back through the source.

pub mod adapter;
pub mod error;
pub mod handlers;
pub mod process;
pub mod source;
pub mod types;

pub use adapter::{JobAdapter, PollSummary};
pub use error::{JobError, Result};
pub use handlers::JobRunner;
pub use source::{HttpJobSource, JobSource};
pub use types::{JobKind, JobOutput, JobStatus, RemoteJob, StatusUpdate};
