// Adapter behaviour against an in-memory job source and a real scheduler.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use station_core::{SchedulerConfig, StationConfig};
use station_jobs::{
    JobAdapter, JobError, JobOutput, JobRunner, JobSource, JobStatus, PollSummary, RemoteJob,
    StatusUpdate,
};
use station_scheduler::{Scheduler, TaskId};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct FakeSource {
    jobs: Mutex<Vec<RemoteJob>>,
    statuses: Mutex<Vec<(String, StatusUpdate)>>,
    uploads: Mutex<Vec<(String, JobOutput)>>,
    fail_fetch: Mutex<bool>,
    fail_reports: Mutex<bool>,
}

impl FakeSource {
    fn set_jobs(&self, jobs: Vec<RemoteJob>) {
        *self.jobs.lock().unwrap() = jobs;
    }

    fn statuses_for(&self, id: &str) -> Vec<StatusUpdate> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|(job, _)| job == id)
            .map(|(_, update)| update.clone())
            .collect()
    }

    fn uploads_for(&self, id: &str) -> Vec<JobOutput> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .filter(|(job, _)| job == id)
            .map(|(_, output)| output.clone())
            .collect()
    }
}

#[async_trait]
impl JobSource for FakeSource {
    fn name(&self) -> &str {
        "fake"
    }

    async fn fetch_jobs(&self) -> station_jobs::Result<Vec<RemoteJob>> {
        if *self.fail_fetch.lock().unwrap() {
            return Err(JobError::Api {
                status: 503,
                message: "maintenance".to_string(),
            });
        }
        Ok(self.jobs.lock().unwrap().clone())
    }

    async fn report_status(&self, job_id: &str, update: &StatusUpdate) -> station_jobs::Result<()> {
        if *self.fail_reports.lock().unwrap() {
            return Err(JobError::Api {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        self.statuses
            .lock()
            .unwrap()
            .push((job_id.to_string(), update.clone()));
        Ok(())
    }

    async fn upload_result(&self, job_id: &str, output: &JobOutput) -> station_jobs::Result<()> {
        self.uploads
            .lock()
            .unwrap()
            .push((job_id.to_string(), output.clone()));
        Ok(())
    }
}

struct Harness {
    source: Arc<FakeSource>,
    scheduler: Scheduler,
    adapter: JobAdapter,
}

fn harness(config: StationConfig) -> Harness {
    let scheduler = Scheduler::start(&SchedulerConfig {
        workers: 2,
        tick_ms: 10,
    });
    let source = Arc::new(FakeSource::default());
    let runner = Arc::new(JobRunner::new(&config, scheduler.clone()));
    let adapter = JobAdapter::new(
        scheduler.clone(),
        source.clone() as Arc<dyn JobSource>,
        runner,
        Duration::from_millis(20),
    );
    Harness {
        source,
        scheduler,
        adapter,
    }
}

/// Job whose window opens `start_in` seconds from now and lasts `len` seconds.
fn job(id: &str, command: &str, start_in: i64, len: i64) -> RemoteJob {
    let now = Utc::now().timestamp();
    RemoteJob {
        id: id.to_string(),
        name: format!("{command} job"),
        start_time: now + start_in,
        end_time: now + start_in + len,
        command: command.to_string(),
        arguments: Default::default(),
        status: JobStatus::Pending,
    }
}

async fn wait_for_final_status(source: &FakeSource, id: &str) -> StatusUpdate {
    for _ in 0..300 {
        if let Some(last) = source.statuses_for(id).into_iter().last() {
            if last.status != JobStatus::Running {
                return last;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never finished");
}

#[tokio::test]
async fn pending_job_runs_and_reports_back() {
    let h = harness(StationConfig::default());
    h.source.set_jobs(vec![job("status-1", "get_status", 0, 30)]);

    let summary = h.adapter.poll_once().await.unwrap();
    assert_eq!(summary.accepted, 1);

    let last = wait_for_final_status(&h.source, "status-1").await;
    assert_eq!(last, StatusUpdate::finished());
    assert_eq!(
        h.source.statuses_for("status-1")[0],
        StatusUpdate::running()
    );

    let uploads = h.source.uploads_for("status-1");
    assert_eq!(uploads.len(), 1);
    match &uploads[0] {
        JobOutput::Status(status) => {
            assert_eq!(status.running_jobs, vec!["status-1".to_string()]);
        }
        other => panic!("unexpected output: {other:?}"),
    }

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn repeated_poll_leaves_queued_job_alone() {
    let h = harness(StationConfig::default());
    h.source.set_jobs(vec![job("later", "get_status", 60, 30)]);

    assert_eq!(h.adapter.poll_once().await.unwrap().accepted, 1);
    let second = h.adapter.poll_once().await.unwrap();
    assert_eq!(
        second,
        PollSummary {
            unchanged: 1,
            ..PollSummary::default()
        }
    );
    assert_eq!(h.scheduler.queued_len(), 1);

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn moved_window_updates_queued_job() {
    let h = harness(StationConfig::default());
    h.source.set_jobs(vec![job("later", "get_status", 60, 30)]);
    h.adapter.poll_once().await.unwrap();

    h.source.set_jobs(vec![job("later", "get_status", 120, 30)]);
    let summary = h.adapter.poll_once().await.unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(h.scheduler.queued_ids(), vec![TaskId::from("later")]);

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn unknown_command_reported_as_failed() {
    let h = harness(StationConfig::default());
    h.source.set_jobs(vec![job("odd", "reboot_modem", 0, 30)]);

    let summary = h.adapter.poll_once().await.unwrap();
    assert_eq!(summary.rejected, 1);
    assert_eq!(h.scheduler.queued_len(), 0);

    let statuses = h.source.statuses_for("odd");
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].status, JobStatus::Failed);
    assert!(statuses[0]
        .reason
        .as_deref()
        .unwrap_or_default()
        .contains("reboot_modem"));

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn closed_window_rejected() {
    let h = harness(StationConfig::default());
    h.source.set_jobs(vec![job("stale", "get_status", -120, 60)]);

    let summary = h.adapter.poll_once().await.unwrap();
    assert_eq!(summary.rejected, 1);
    assert_eq!(h.source.statuses_for("stale")[0].status, JobStatus::Failed);

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn overlapping_captures_share_one_radio() {
    let h = harness(StationConfig::default());
    h.source.set_jobs(vec![
        job("pass-a", "iridium", 60, 600),
        job("pass-b", "start_iridium_capture", 300, 600),
        job("logs", "get_logs", 300, 60),
    ]);

    let summary = h.adapter.poll_once().await.unwrap();
    assert_eq!(summary.accepted, 2);
    assert_eq!(summary.rejected, 1);

    let mut queued = h.scheduler.queued_ids();
    queued.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    assert_eq!(queued, vec![TaskId::from("logs"), TaskId::from("pass-a")]);
    // Scheduler conflicts stay pending server-side; nothing is reported.
    assert!(h.source.statuses_for("pass-b").is_empty());

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn cancelled_status_withdraws_queued_job() {
    let h = harness(StationConfig::default());
    h.source.set_jobs(vec![job("later", "get_status", 60, 30)]);
    h.adapter.poll_once().await.unwrap();

    let mut withdrawn = job("later", "get_status", 60, 30);
    withdrawn.status = JobStatus::Cancelled;
    h.source.set_jobs(vec![withdrawn]);

    let summary = h.adapter.poll_once().await.unwrap();
    assert_eq!(summary.cancelled, 1);
    assert_eq!(h.scheduler.queued_len(), 0);

    // Unknown to the scheduler now; a second poll is a no-op.
    assert_eq!(h.adapter.poll_once().await.unwrap(), PollSummary::default());

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn handler_error_reported_with_reason() {
    let mut config = StationConfig::default();
    config.logs.path = "/nonexistent/station/agent.log".to_string();
    let h = harness(config);
    h.source.set_jobs(vec![job("logs-1", "get_logs", 0, 30)]);

    h.adapter.poll_once().await.unwrap();
    let last = wait_for_final_status(&h.source, "logs-1").await;
    assert_eq!(last.status, JobStatus::Failed);
    assert!(last.reason.unwrap_or_default().contains("I/O error"));
    assert!(h.source.uploads_for("logs-1").is_empty());

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn log_job_uploads_tail() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for i in 0..5 {
        writeln!(file, "entry {i}").unwrap();
    }
    let mut config = StationConfig::default();
    config.logs.path = file.path().display().to_string();
    let h = harness(config);

    let mut logs = job("logs-2", "fetch_logs", 0, 30);
    logs.arguments = json!({"lines": 2}).as_object().cloned().unwrap();
    h.source.set_jobs(vec![logs]);

    h.adapter.poll_once().await.unwrap();
    assert_eq!(
        wait_for_final_status(&h.source, "logs-2").await,
        StatusUpdate::finished()
    );
    match &h.source.uploads_for("logs-2")[0] {
        JobOutput::Logs { lines, .. } => assert_eq!(lines, &["entry 3", "entry 4"]),
        other => panic!("unexpected output: {other:?}"),
    }

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn poll_error_surfaces_from_poll_once() {
    let h = harness(StationConfig::default());
    *h.source.fail_fetch.lock().unwrap() = true;

    let err = h.adapter.poll_once().await.unwrap_err();
    assert!(matches!(err, JobError::Api { status: 503, .. }));

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn run_polls_until_shutdown() {
    let h = harness(StationConfig::default());
    h.source.set_jobs(vec![job("later", "get_status", 60, 30)]);

    let shutdown = CancellationToken::new();
    let adapter = Arc::new(h.adapter);
    let handle = tokio::spawn({
        let adapter = Arc::clone(&adapter);
        let shutdown = shutdown.clone();
        async move { adapter.run(shutdown).await }
    });

    for _ in 0..100 {
        if h.scheduler.queued_len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.scheduler.queued_len(), 1);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("poll loop did not stop")
        .unwrap();

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn shut_down_scheduler_ends_poll_early() {
    let h = harness(StationConfig::default());
    h.scheduler.shutdown().await;
    h.source.set_jobs(vec![
        job("a", "get_status", 60, 30),
        job("b", "get_status", 120, 30),
    ]);

    assert_eq!(h.adapter.poll_once().await.unwrap(), PollSummary::default());
}

#[cfg(unix)]
#[tokio::test]
async fn withdrawn_running_capture_reported_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StationConfig::default();
    config.capture.program = "sleep".to_string();
    config.capture.args = vec!["30".to_string()];
    config.capture.output_dir = dir.path().display().to_string();
    let h = harness(config);

    h.source.set_jobs(vec![job("pass-1", "iridium", 0, 30)]);
    assert_eq!(h.adapter.poll_once().await.unwrap().accepted, 1);
    for _ in 0..200 {
        if !h.source.statuses_for("pass-1").is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.source.statuses_for("pass-1"), vec![StatusUpdate::running()]);

    let mut withdrawn = job("pass-1", "iridium", 0, 30);
    withdrawn.status = JobStatus::Cancelled;
    h.source.set_jobs(vec![withdrawn]);
    assert_eq!(h.adapter.poll_once().await.unwrap().cancelled, 1);

    assert_eq!(
        wait_for_final_status(&h.source, "pass-1").await,
        StatusUpdate::cancelled()
    );
    assert!(h.source.uploads_for("pass-1").is_empty());

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn finished_job_not_rerun_when_status_reports_are_lost() {
    let h = harness(StationConfig::default());
    *h.source.fail_reports.lock().unwrap() = true;
    h.source.set_jobs(vec![job("status-2", "get_status", 0, 30)]);

    assert_eq!(h.adapter.poll_once().await.unwrap().accepted, 1);
    for _ in 0..300 {
        if h.adapter.has_completed("status-2") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(h.adapter.has_completed("status-2"));
    assert_eq!(h.source.uploads_for("status-2").len(), 1);

    // The server still lists the job as pending with an open window.
    let summary = h.adapter.poll_once().await.unwrap();
    assert_eq!(
        summary,
        PollSummary {
            unchanged: 1,
            ..PollSummary::default()
        }
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.source.uploads_for("status-2").len(), 1);
    assert!(h.source.statuses_for("status-2").is_empty());

    h.scheduler.shutdown().await;
}
