use std::time::Duration;

use async_trait::async_trait;
use station_core::config::ServerConfig;
use tracing::{debug, warn};

use crate::error::{JobError, Result};
use crate::types::{JobOutput, RemoteJob, StatusUpdate};

/// Where jobs come from and where their progress goes.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Source name for logging.
    fn name(&self) -> &str;

    /// Current job list for this station.
    async fn fetch_jobs(&self) -> Result<Vec<RemoteJob>>;

    async fn report_status(&self, job_id: &str, update: &StatusUpdate) -> Result<()>;

    async fn upload_result(&self, job_id: &str, output: &JobOutput) -> Result<()>;
}

/// REST control server client.
///
/// Endpoints (relative to `server.base_url`):
/// - `GET  /stations/{station}/jobs`
/// - `PUT  /jobs/{id}/status`
/// - `POST /jobs/{id}/result`
pub struct HttpJobSource {
    client: reqwest::Client,
    base_url: String,
    station_id: String,
    token: Option<String>,
}

impl HttpJobSource {
    pub fn new(server: &ServerConfig, station_id: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(server.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: server.base_url.trim_end_matches('/').to_string(),
            station_id: station_id.to_string(),
            token: server.token.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let resp = builder.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "control server error");
            return Err(JobError::Api {
                status,
                message: text,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl JobSource for HttpJobSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_jobs(&self) -> Result<Vec<RemoteJob>> {
        let path = format!("/stations/{}/jobs", self.station_id);
        let resp = self.send(self.request(reqwest::Method::GET, &path)).await?;
        let jobs: Vec<RemoteJob> = resp.json().await?;
        debug!(count = jobs.len(), "fetched jobs");
        Ok(jobs)
    }

    async fn report_status(&self, job_id: &str, update: &StatusUpdate) -> Result<()> {
        let path = format!("/jobs/{job_id}/status");
        self.send(self.request(reqwest::Method::PUT, &path).json(update))
            .await?;
        debug!(job_id, status = %update.status, "status reported");
        Ok(())
    }

    async fn upload_result(&self, job_id: &str, output: &JobOutput) -> Result<()> {
        let path = format!("/jobs/{job_id}/result");
        self.send(self.request(reqwest::Method::POST, &path).json(output))
            .await?;
        debug!(job_id, "result uploaded");
        Ok(())
    }
}
