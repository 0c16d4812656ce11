//! KDL configuration parsing for the GPUBay marketplace.
//!
//! This crate handles parsing of:
//! - System configuration (gpubay.kdl)
//! - Queue maintenance knobs for the reaper and node liveness checks

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{QueueConfig, SystemConfig, parse_system_config};
