use thiserror::Error;

#[derive(Debug, Error)]
pub enum StationError {
    /// The config file or an env override could not be parsed, or a value is out of range.
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, StationError>;
