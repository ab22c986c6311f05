//! Error types for the agent registry

use lexcore_config::ConfigError;
use lexcore_di::DIError;
use serde::Serialize;
use thiserror::Error;

use crate::models::AgentCapability;
use crate::persistence::PersistenceError;

/// Errors raised by a single agent or its execution envelope
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// The agent's operation returned an error
    #[error("Agent execution failed: {0}")]
    ExecutionFailed(String),

    /// The operation did not finish before its deadline
    #[error("Agent timed out after {0:.3}s")]
    Timeout(f64),

    /// The operation observed its cancellation token
    #[error("Agent operation cancelled")]
    Cancelled,

    /// The envelope is already running another task
    #[error("Agent is busy with task {0}")]
    Busy(String),

    /// The payload did not have the expected shape
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The agent's health probe reported a problem
    #[error("Health check failed: {0}")]
    HealthCheckFailed(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Create a new ExecutionFailed error
    pub fn execution_failed(reason: impl Into<String>) -> Self {
        Self::ExecutionFailed(reason.into())
    }

    /// Create a new InvalidInput error
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }

    /// Create a new HealthCheckFailed error
    pub fn health_check_failed(reason: impl Into<String>) -> Self {
        Self::HealthCheckFailed(reason.into())
    }

    /// Create a new Internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }
}

/// Result type for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Invalid, duplicate or unknown agent registrations
#[derive(Debug, Clone, Error)]
pub enum RegistrationError {
    /// The registration is malformed
    #[error("Invalid agent registration: {0}")]
    Invalid(String),

    /// An agent with the supplied id already exists
    #[error("Agent already registered: {0}")]
    Duplicate(String),

    /// No agent with the supplied id exists
    #[error("Agent not found: {0}")]
    NotFound(String),
}

/// One failed candidate inside a dispatch
#[derive(Debug, Clone, Serialize)]
pub struct FailedAttempt {
    /// Candidate agent id
    pub agent_id: String,
    /// Candidate agent name
    pub agent_name: String,
    /// Description of the failure
    pub error: String,
}

/// Errors surfaced by the registry and dispatcher
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Registration was rejected
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// The configuration failed validation
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A service could not be resolved from the container
    #[error("Service resolution failed: {0}")]
    Resolution(#[from] DIError),

    /// An agent instance could not be constructed
    #[error("Failed to construct agent {agent_id}: {source}")]
    Construction {
        /// Agent whose constructor failed
        agent_id: String,
        /// Constructor error
        source: AgentError,
    },

    /// Nothing is indexed under the capability and filters
    #[error("No agents available for capability {capability}")]
    NoAgentsAvailable {
        /// Requested capability
        capability: AgentCapability,
    },

    /// Every ranked candidate failed
    #[error("All agents failed for capability {capability} ({} attempts)", .attempts.len())]
    AllCandidatesExhausted {
        /// Requested capability
        capability: AgentCapability,
        /// Failures in rank order
        attempts: Vec<FailedAttempt>,
    },

    /// Metadata could not be read or written
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Result type for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_error_display() {
        assert_eq!(
            AgentError::execution_failed("boom").to_string(),
            "Agent execution failed: boom"
        );
        assert_eq!(AgentError::Timeout(1.5).to_string(), "Agent timed out after 1.500s");
        assert_eq!(
            AgentError::Busy("task-1".to_string()).to_string(),
            "Agent is busy with task task-1"
        );
    }

    #[test]
    fn test_registry_error_names_capability() {
        let error = RegistryError::NoAgentsAvailable {
            capability: AgentCapability::CitationAnalysis,
        };
        assert_eq!(
            error.to_string(),
            "No agents available for capability citation_analysis"
        );

        let error = RegistryError::AllCandidatesExhausted {
            capability: AgentCapability::Reasoning,
            attempts: vec![FailedAttempt {
                agent_id: "a".to_string(),
                agent_name: "A".to_string(),
                error: "boom".to_string(),
            }],
        };
        assert!(error.to_string().starts_with("All agents failed for capability reasoning"));
    }

    #[test]
    fn test_registration_error_converts() {
        let error: RegistryError = RegistrationError::Duplicate("x".to_string()).into();
        assert!(matches!(
            error,
            RegistryError::Registration(RegistrationError::Duplicate(_))
        ));
    }
}
