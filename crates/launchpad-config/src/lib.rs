//! Configuration for Launchpad.
//!
//! This crate handles:
//! - System configuration (launchpad.kdl) with environment overrides
//! - Per-plan build resource limits
//! - Partitioning app environment variables by target and interpolating
//!   build context variables into them

pub mod env;
pub mod error;
pub mod system;

pub use env::{BuildContext, EnvPartition, partition_env};
pub use error::{ConfigError, ConfigResult};
pub use system::{SystemConfig, parse_system_config};
