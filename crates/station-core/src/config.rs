use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_WORKERS: usize = 1;
pub const DEFAULT_TICK_MS: u64 = 100; // dispatch loop cadence
pub const DEFAULT_LOG_LINES: usize = 200;

/// Top-level config (station.toml + STATION_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default)]
    pub station: StationIdentity,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationIdentity {
    /// Identifier the control server knows this station by.
    #[serde(default = "default_station_id")]
    pub id: String,
}

impl Default for StationIdentity {
    fn default() -> Self {
        Self {
            id: default_station_id(),
        }
    }
}

/// Remote control server the agent polls for jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token sent with every request. `None` disables the header.
    pub token: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Worker pool and dispatch cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of jobs allowed to run concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            tick_ms: DEFAULT_TICK_MS,
        }
    }
}

/// Radio capture subprocess settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_capture_program")]
    pub program: String,
    /// Arguments passed before any job-supplied arguments.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_capture_dir")]
    pub output_dir: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: default_capture_program(),
            args: Vec::new(),
            output_dir: default_capture_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    #[serde(default = "default_log_path")]
    pub path: String,
    #[serde(default = "default_log_lines")]
    pub default_lines: usize,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
            default_lines: DEFAULT_LOG_LINES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Program used to apply connection settings (NetworkManager CLI by default).
    #[serde(default = "default_network_program")]
    pub program: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            program: default_network_program(),
        }
    }
}

fn default_station_id() -> String {
    "station-unset".to_string()
}
fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
fn default_workers() -> usize {
    DEFAULT_WORKERS
}
fn default_tick_ms() -> u64 {
    DEFAULT_TICK_MS
}
fn default_capture_program() -> String {
    "iridium-extractor".to_string()
}
fn default_capture_dir() -> String {
    "/var/lib/station/captures".to_string()
}
fn default_log_path() -> String {
    "/var/log/station/agent.log".to_string()
}
fn default_log_lines() -> usize {
    DEFAULT_LOG_LINES
}
fn default_network_program() -> String {
    "nmcli".to_string()
}

impl StationConfig {
    /// Load config from a TOML file with STATION_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. STATION_CONFIG env var
    ///   3. ~/.station/station.toml
    ///
    /// Nested keys use a double underscore, e.g. `STATION_SERVER__TOKEN`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("STATION_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: StationConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("STATION_").split("__"))
            .extract()
            .map_err(|e| crate::error::StationError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the agent cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.scheduler.workers == 0 {
            return Err(crate::error::StationError::Config(
                "scheduler.workers must be at least 1".to_string(),
            ));
        }
        if self.scheduler.tick_ms == 0 {
            return Err(crate::error::StationError::Config(
                "scheduler.tick_ms must be positive".to_string(),
            ));
        }
        if self.server.poll_interval_secs == 0 {
            return Err(crate::error::StationError::Config(
                "server.poll_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.station/station.toml", home)
}
