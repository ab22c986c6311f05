//! Agent orchestration core for lexcore
//!
//! This crate tracks agent types by capability, ranks them by their observed
//! success rate and speed, and runs tasks on the best candidate with
//! sequential failover.
//!
//! # Architecture
//!
//! - **ExecutionEnvelope**: per-instance state machine with a hard deadline
//!   and a uniform [`AgentResult`]
//! - **AgentRegistry**: capability, practice area and jurisdiction indices,
//!   ranked lookup and failover dispatch
//! - **InstancePool**: live agent instances reused while idle
//! - **Health monitor**: periodic probes that mark instances failed or idle
//! - **OrchestratorContext**: owns container and registry for one process
//!
//! # Example
//!
//! ```ignore
//! use lexcore_agents::{AgentCapability, DispatchFilters, OrchestratorContext, TaskPriority};
//!
//! let context = OrchestratorContext::bootstrap(config).await?;
//! let result = context
//!     .registry()
//!     .execute_with_best_agent(
//!         AgentCapability::CitationAnalysis,
//!         payload,
//!         TaskPriority::High,
//!         DispatchFilters::new().jurisdiction("us"),
//!     )
//!     .await?;
//! context.shutdown().await?;
//! ```

pub mod agents;
pub mod collaborators;
pub mod context;
pub mod envelope;
pub mod error;
pub mod health;
pub mod index;
pub mod inference;
pub mod instance;
pub mod models;
pub mod persistence;
pub mod registry;

pub use agents::{
    Agent, AgentBlueprint, AgentContext, AgentKind, AgentTemplate, AgentType, TemplateAgent,
};
pub use collaborators::{
    CollaboratorProvider, Collaborators, InMemoryKnowledgeGraph, InMemorySharedMemory,
    InMemoryVectorStore, KnowledgeGraph, KnowledgeGraphRef, SharedMemory, SharedMemoryRef,
    VectorMatch, VectorStore, VectorStoreRef,
};
pub use context::OrchestratorContext;
pub use envelope::ExecutionEnvelope;
pub use error::{
    AgentError, FailedAttempt, RegistrationError, RegistryError, RegistryResult, Result,
};
pub use health::{HealthCheckConfig, HealthMonitor, HealthScanReport};
pub use index::{rank_candidates, CapabilityIndex};
pub use inference::infer_capabilities;
pub use instance::{AgentInstance, InstancePool, InstanceSnapshot};
pub use models::{
    AgentCapability, AgentMetadata, AgentOutput, AgentRequirements, AgentResult, AgentStatus,
    HealthReport, TaskContext, TaskPayload, TaskPriority,
};
pub use persistence::{MetadataStore, PersistedAgentMetrics, PersistedMetadata, PersistenceError};
pub use registry::{AgentRegistration, AgentRegistry, DispatchFilters, RegistryConfig};
