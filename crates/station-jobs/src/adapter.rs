//! Bridges the control server's job list into the scheduler.
//!
//! Each poll fetches the station's jobs, schedules the pending ones and
//! cancels the ones the operator withdrew. Job progress flows back to the
//! source through the task's pre-run and post-run hooks.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use station_scheduler::{Scheduled, Scheduler, SchedulerError, Task, TaskContext, TaskId};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{JobError, Result};
use crate::handlers::JobRunner;
use crate::source::JobSource;
use crate::types::{JobKind, JobStatus, RemoteJob, StatusUpdate};

/// Per-poll counters, mostly for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub accepted: usize,
    pub updated: usize,
    /// Already queued or running with the same window, or already ran.
    pub unchanged: usize,
    /// Failed translation or refused by the scheduler.
    pub rejected: usize,
    pub cancelled: usize,
}

pub struct JobAdapter {
    scheduler: Scheduler,
    source: Arc<dyn JobSource>,
    runner: Arc<JobRunner>,
    poll_interval: Duration,
    /// Jobs that already ran in this process. A job the server still lists
    /// as pending (its status reports were lost) is not run again.
    completed: Arc<Mutex<HashSet<String>>>,
}

impl JobAdapter {
    pub fn new(
        scheduler: Scheduler,
        source: Arc<dyn JobSource>,
        runner: Arc<JobRunner>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            scheduler,
            source,
            runner,
            poll_interval,
            completed: Arc::default(),
        }
    }

    /// Whether `job_id` ran to completion (or failure) in this process.
    pub fn has_completed(&self, job_id: &str) -> bool {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(job_id)
    }

    /// Translate a remote job into a schedulable task.
    ///
    /// The resolved [`JobKind`] travels as the task argument; the task
    /// function runs it and uploads the output.
    pub fn to_task(&self, job: &RemoteJob) -> Result<Task> {
        if job.id.trim().is_empty() {
            return Err(invalid(job, "missing id"));
        }
        let kind = JobKind::parse(&job.command, &job.arguments)?;
        let start = timestamp(job, job.start_time, "start_time")?;
        let end = timestamp(job, job.end_time, "end_time")?;
        if end < start {
            return Err(invalid(job, "end_time is before start_time"));
        }
        if end <= Utc::now() {
            return Err(invalid(job, "window already closed"));
        }
        let arg = serde_json::to_value(&kind).map_err(|e| invalid(job, &e.to_string()))?;

        let runner = Arc::clone(&self.runner);
        let source = Arc::clone(&self.source);
        let func = move |ctx: TaskContext, arg: serde_json::Value| {
            let runner = Arc::clone(&runner);
            let source = Arc::clone(&source);
            async move {
                let kind: JobKind = serde_json::from_value(arg)?;
                let job_id = ctx.task_id().to_string();
                let output = runner.run(&job_id, &kind, &ctx).await?;
                source.upload_result(&job_id, &output).await?;
                Ok::<_, anyhow::Error>(())
            }
        };

        let pre_source = Arc::clone(&self.source);
        let pre_id = job.id.clone();
        let pre_run = move || {
            let source = Arc::clone(&pre_source);
            let job_id = pre_id.clone();
            async move {
                // Best-effort: an unreachable server must not block the run.
                report(source.as_ref(), &job_id, StatusUpdate::running()).await;
                true
            }
        };

        let post_source = Arc::clone(&self.source);
        let post_id = job.id.clone();
        let completed = Arc::clone(&self.completed);
        let post_run = move |err: Option<anyhow::Error>| {
            let source = Arc::clone(&post_source);
            let job_id = post_id.clone();
            completed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(job_id.clone());
            async move {
                let update = match err {
                    None => StatusUpdate::finished(),
                    Some(e) if matches!(e.downcast_ref::<JobError>(), Some(JobError::Cancelled)) => {
                        info!(job_id = %job_id, "job cancelled");
                        StatusUpdate::cancelled()
                    }
                    Some(e) => {
                        let reason = format!("{e:#}");
                        warn!(job_id = %job_id, error = %reason, "job failed");
                        StatusUpdate::failed(reason)
                    }
                };
                report(source.as_ref(), &job_id, update).await;
            }
        };

        Ok(Task::new(start, end, func)
            .with_id(job.id.clone())
            .with_arg(arg)
            .with_resources(kind.resources())
            .with_pre_run(pre_run)
            .with_post_run(post_run))
    }

    /// Fetch the job list once and reconcile it with the scheduler.
    pub async fn poll_once(&self) -> Result<PollSummary> {
        let jobs = self.source.fetch_jobs().await?;
        let mut summary = PollSummary::default();

        for job in &jobs {
            match job.status {
                JobStatus::Pending => {
                    if !self.ingest(job, &mut summary).await {
                        debug!("scheduler shut down; poll abandoned");
                        break;
                    }
                }
                JobStatus::Cancelled => self.withdraw(job, &mut summary),
                JobStatus::Running | JobStatus::Finished | JobStatus::Failed => {}
            }
        }

        debug!(source = self.source.name(), fetched = jobs.len(), ?summary, "poll complete");
        Ok(summary)
    }

    /// Poll every `poll_interval` until `shutdown` fires. Poll errors are
    /// logged and retried on the next tick.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            source = self.source.name(),
            interval_secs = self.poll_interval.as_secs(),
            "job polling started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(error = %e, "job poll failed");
                    }
                }
            }
        }
        info!("job polling stopped");
    }

    /// Returns `false` once the scheduler refuses all work.
    async fn ingest(&self, job: &RemoteJob, summary: &mut PollSummary) -> bool {
        if self.has_completed(&job.id) {
            debug!(job_id = %job.id, "job already ran; ignoring stale pending status");
            summary.unchanged += 1;
            return true;
        }
        let task = match self.to_task(job) {
            Ok(task) => task,
            Err(e) => {
                warn!(job_id = %job.id, command = %job.command, error = %e, "job rejected");
                summary.rejected += 1;
                if !job.id.trim().is_empty() {
                    report(self.source.as_ref(), &job.id, StatusUpdate::failed(e.to_string())).await;
                }
                return true;
            }
        };

        match self.scheduler.schedule(task) {
            Ok(Scheduled::Accepted) => summary.accepted += 1,
            Ok(Scheduled::Updated) => summary.updated += 1,
            Ok(Scheduled::AlreadyExists | Scheduled::AlreadyRunning) => summary.unchanged += 1,
            Err(SchedulerError::ShutDown) => return false,
            Err(e) => {
                // Left pending on the server; retried on the next poll.
                info!(job_id = %job.id, error = %e, "job not scheduled");
                summary.rejected += 1;
            }
        }
        true
    }

    fn withdraw(&self, job: &RemoteJob, summary: &mut PollSummary) {
        match self.scheduler.cancel(&TaskId::from(job.id.as_str())) {
            Ok(place) => {
                info!(job_id = %job.id, ?place, "job withdrawn");
                summary.cancelled += 1;
            }
            Err(SchedulerError::NotFound { .. }) => {}
            Err(e) => debug!(job_id = %job.id, error = %e, "cancel skipped"),
        }
    }
}

async fn report(source: &dyn JobSource, job_id: &str, update: StatusUpdate) {
    if let Err(e) = source.report_status(job_id, &update).await {
        warn!(job_id, status = %update.status, error = %e, "status report failed");
    }
}

fn timestamp(job: &RemoteJob, secs: i64, field: &str) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| invalid(job, &format!("{field} out of range")))
}

fn invalid(job: &RemoteJob, reason: &str) -> JobError {
    JobError::InvalidJob {
        id: job.id.clone(),
        reason: reason.to_string(),
    }
}
