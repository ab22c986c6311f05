//! Configuration for the lexcore orchestrator
//!
//! Settings are layered from an optional TOML file and `LEXCORE_*`
//! environment variables (nested keys use a double underscore, for example
//! `LEXCORE_HEALTH__INTERVAL_SECONDS=60`).

pub mod error;
pub mod manager;
pub mod types;

pub use error::{ConfigError, Result};
pub use manager::ConfigManager;
pub use types::{
    duration_from_secs, AgentEntry, ExecutionConfig, HealthConfig, LoggingConfig,
    OrchestratorConfig, RegistryConfig,
};
