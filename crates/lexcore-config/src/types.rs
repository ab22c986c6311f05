//! Core configuration types and data structures

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Seconds as a non-zero [`Duration`], or `None` when not representable
pub fn duration_from_secs(seconds: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|duration| !duration.is_zero())
}

/// Main orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Execution envelope settings
    pub execution: ExecutionConfig,
    /// Agent registry settings
    pub registry: RegistryConfig,
    /// Background health monitor settings
    pub health: HealthConfig,
    /// Logging settings
    pub logging: LoggingConfig,
    /// Agents declared from blueprints
    pub agents: Vec<AgentEntry>,
}

impl OrchestratorConfig {
    /// Reject values the orchestrator cannot run with
    ///
    /// Every timeout must convert to a non-zero [`Duration`], counts and
    /// intervals must be non-zero and explicit agent ids must be unique.
    pub fn validate(&self) -> Result<()> {
        if self.execution.timeout().is_none() {
            return Err(ConfigError::Validation(
                "execution.timeout_seconds must be a positive number of seconds".to_string(),
            ));
        }
        if self.registry.max_candidates == 0 {
            return Err(ConfigError::Validation(
                "registry.max_candidates must be greater than 0".to_string(),
            ));
        }
        if self.health.interval_seconds == 0 {
            return Err(ConfigError::Validation(
                "health.interval_seconds must be greater than 0".to_string(),
            ));
        }
        if let Some(probe) = self.health.probe_timeout_seconds {
            if duration_from_secs(probe).is_none() {
                return Err(ConfigError::Validation(
                    "health.probe_timeout_seconds must be a positive number of seconds"
                        .to_string(),
                ));
            }
        }

        let mut seen_ids = HashSet::new();
        for (position, agent) in self.agents.iter().enumerate() {
            if agent.name.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "agents[{}].name must not be empty",
                    position
                )));
            }
            if let Some(timeout) = agent.timeout_seconds {
                if duration_from_secs(timeout).is_none() {
                    return Err(ConfigError::Validation(format!(
                        "agents[{}].timeout_seconds must be a positive number of seconds",
                        position
                    )));
                }
            }
            if let Some(id) = &agent.agent_id {
                if !seen_ids.insert(id.as_str()) {
                    return Err(ConfigError::Validation(format!(
                        "agent id '{}' is declared more than once",
                        id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Execution envelope settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Default per-task deadline in seconds
    pub timeout_seconds: f64,
}

impl ExecutionConfig {
    /// `None` when `timeout_seconds` is not a usable deadline
    pub fn timeout(&self) -> Option<Duration> {
        duration_from_secs(self.timeout_seconds)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 60.0,
        }
    }
}

/// Agent registry settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Candidates tried per dispatch when the caller gives no limit
    pub max_candidates: usize,
    /// JSON file holding agent metrics across restarts
    pub metadata_path: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_candidates: 5,
            metadata_path: None,
        }
    }
}

/// Background health monitor settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    /// Seconds between scans
    pub interval_seconds: u64,
    /// Optional deadline for a single probe
    pub probe_timeout_seconds: Option<f64>,
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn probe_timeout(&self) -> Option<Duration> {
        self.probe_timeout_seconds.and_then(duration_from_secs)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 300,
            probe_timeout_seconds: None,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level or filter directive, e.g. `info` or `lexcore_agents=debug`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// An agent declared in configuration and built from a template
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AgentEntry {
    /// Stable id; required for persisted metrics to follow the agent
    pub agent_id: Option<String>,
    pub name: String,
    /// Type name used for capability inference; defaults to `name`
    pub type_name: Option<String>,
    pub description: Option<String>,
    /// `echo`, `keyword_matcher` or `pattern_extractor`
    pub template: String,
    /// Capability tags; inferred from the type name when empty
    pub capabilities: Vec<String>,
    pub practice_areas: Vec<String>,
    pub jurisdictions: Vec<String>,
    pub requires_shared_memory: bool,
    pub requires_vector_store: bool,
    pub requires_knowledge_graph: bool,
    /// Overrides `execution.timeout_seconds` for this agent
    pub timeout_seconds: Option<f64>,
    /// Payload field holding the text to inspect
    pub text_field: Option<String>,
    pub keywords: Vec<String>,
    /// Label to regular expression
    pub patterns: BTreeMap<String, String>,
}
