//! `station-core` — configuration and error types shared by every crate of
//! the sensor-station agent.

pub mod config;
pub mod error;

pub use config::{SchedulerConfig, StationConfig};
pub use error::{Result, StationError};
