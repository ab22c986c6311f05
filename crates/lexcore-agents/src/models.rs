//! Data models for the agent registry
//!
//! Agent *types* are described by [`AgentMetadata`]; the uniform outcome of
//! every execution is an [`AgentResult`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AgentError;

/// Payload handed to an agent
pub type TaskPayload = Map<String, Value>;

/// Data produced by an agent
pub type AgentOutput = Map<String, Value>;

/// Closed set of behaviours an agent can declare
///
/// Callers always request work by capability, never by concrete agent type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCapability {
    /// Parsing and normalising documents
    DocumentProcessing,
    /// General text analysis
    TextAnalysis,
    /// Named entity extraction
    EntityExtraction,
    /// Legal analysis
    LegalAnalysis,
    /// Semantic analysis
    SemanticAnalysis,
    /// Document structure analysis
    StructuralAnalysis,
    /// Citation detection and resolution
    CitationAnalysis,
    /// Knowledge graph maintenance and queries
    KnowledgeGraph,
    /// Embedding similarity search
    VectorSearch,
    /// Shared memory management
    MemoryManagement,
    /// Coordinating other agents
    WorkflowOrchestration,
    /// Matching against precedent
    PrecedentMatching,
    /// Regulatory compliance checks
    ComplianceChecking,
    /// Drafting documents
    DocumentGeneration,
    /// Inference and logical reasoning
    Reasoning,
    /// Validating results
    Validation,
}

impl AgentCapability {
    /// Every capability, in declaration order
    pub const ALL: [AgentCapability; 16] = [
        Self::DocumentProcessing,
        Self::TextAnalysis,
        Self::EntityExtraction,
        Self::LegalAnalysis,
        Self::SemanticAnalysis,
        Self::StructuralAnalysis,
        Self::CitationAnalysis,
        Self::KnowledgeGraph,
        Self::VectorSearch,
        Self::MemoryManagement,
        Self::WorkflowOrchestration,
        Self::PrecedentMatching,
        Self::ComplianceChecking,
        Self::DocumentGeneration,
        Self::Reasoning,
        Self::Validation,
    ];

    /// The wire tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentProcessing => "document_processing",
            Self::TextAnalysis => "text_analysis",
            Self::EntityExtraction => "entity_extraction",
            Self::LegalAnalysis => "legal_analysis",
            Self::SemanticAnalysis => "semantic_analysis",
            Self::StructuralAnalysis => "structural_analysis",
            Self::CitationAnalysis => "citation_analysis",
            Self::KnowledgeGraph => "knowledge_graph",
            Self::VectorSearch => "vector_search",
            Self::MemoryManagement => "memory_management",
            Self::WorkflowOrchestration => "workflow_orchestration",
            Self::PrecedentMatching => "precedent_matching",
            Self::ComplianceChecking => "compliance_checking",
            Self::DocumentGeneration => "document_generation",
            Self::Reasoning => "reasoning",
            Self::Validation => "validation",
        }
    }
}

impl fmt::Display for AgentCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentCapability {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|capability| capability.as_str() == tag)
            .ok_or_else(|| AgentError::invalid_input(format!("unknown capability '{}'", s)))
    }
}

/// Lifecycle state of an envelope or instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Ready for work
    Idle,
    /// Running a task
    Processing,
    /// Last task succeeded
    Completed,
    /// Last task or health probe failed
    Failed,
    /// Last task exceeded its deadline
    Timeout,
}

impl AgentStatus {
    /// Whether an instance in this state may take a new task
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Idle | Self::Completed)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Caller-assigned task priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Background work
    Low,
    /// Default priority
    #[default]
    Normal,
    /// Interactive work
    High,
    /// Must run now
    Critical,
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskPriority {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" | "medium" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" | "urgent" => Ok(Self::Critical),
            other => Err(AgentError::invalid_input(format!(
                "unknown priority '{}'",
                other
            ))),
        }
    }
}

/// Collaborators an agent expects to receive at construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRequirements {
    /// Needs the shared memory store
    pub requires_shared_memory: bool,
    /// Needs the vector store
    pub requires_vector_store: bool,
    /// Needs the knowledge graph
    pub requires_knowledge_graph: bool,
}

impl AgentRequirements {
    /// Whether no collaborator is required
    pub fn is_empty(&self) -> bool {
        !(self.requires_shared_memory || self.requires_vector_store || self.requires_knowledge_graph)
    }
}

/// Descriptor and running metrics of a registered agent type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetadata {
    /// Globally unique id
    pub agent_id: String,
    /// Display name
    pub name: String,
    /// Type name the capabilities were inferred from
    pub agent_type: String,
    /// Free-form description
    pub description: String,
    /// Capabilities this agent is indexed under
    pub capabilities: BTreeSet<AgentCapability>,
    /// Practice areas this agent is indexed under
    pub practice_areas: BTreeSet<String>,
    /// Jurisdictions this agent is indexed under
    pub jurisdictions: BTreeSet<String>,
    /// Collaborator requirement flags
    pub requirements: AgentRequirements,
    /// Fraction of successful attempts, in `[0, 1]`
    pub success_rate: f64,
    /// Mean attempt duration in seconds
    pub avg_processing_time: f64,
    /// Attempts recorded
    pub task_count: u64,
    /// Failures recorded by dispatch and health checks
    pub error_count: u64,
    /// Most recent failure description
    pub last_error: Option<String>,
    /// Time of the most recent healthy probe
    pub last_health_check: Option<DateTime<Utc>>,
    /// Liveness as last observed
    pub status: AgentStatus,
    /// When the agent was registered in this process
    pub registered_at: DateTime<Utc>,
    /// Monotonic registration sequence, used as the final ranking tie-break
    pub registration_order: u64,
}

impl AgentMetadata {
    /// Fresh metadata with neutral metrics
    pub fn new(agent_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            name: name.into(),
            agent_type: String::new(),
            description: String::new(),
            capabilities: BTreeSet::new(),
            practice_areas: BTreeSet::new(),
            jurisdictions: BTreeSet::new(),
            requirements: AgentRequirements::default(),
            success_rate: 1.0,
            avg_processing_time: 0.0,
            task_count: 0,
            error_count: 0,
            last_error: None,
            last_health_check: None,
            status: AgentStatus::Idle,
            registered_at: Utc::now(),
            registration_order: 0,
        }
    }

    /// Fold one attempt into the running success rate and mean duration
    pub fn record_attempt(&mut self, success: bool, elapsed: f64) {
        let n = self.task_count as f64;
        let successes = (self.success_rate * n).round() + if success { 1.0 } else { 0.0 };
        self.success_rate = successes / (n + 1.0);
        self.avg_processing_time = if self.task_count == 0 {
            elapsed
        } else {
            (self.avg_processing_time * n + elapsed) / (n + 1.0)
        };
        self.task_count += 1;
    }

    /// Count a failure and remember its description
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.error_count += 1;
        self.last_error = Some(error.into());
    }

    /// Whether the agent is indexed under `capability`
    pub fn has_capability(&self, capability: AgentCapability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Outcome of a health probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Whether the agent can take work
    pub healthy: bool,
    /// Diagnostic fields
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl HealthReport {
    /// A healthy report without details
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            details: Map::new(),
        }
    }

    /// An unhealthy report with a reason
    pub fn unhealthy(reason: impl Into<String>) -> Self {
        let mut details = Map::new();
        details.insert("reason".to_string(), Value::String(reason.into()));
        Self {
            healthy: false,
            details,
        }
    }

    /// Attach a diagnostic field
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// The `reason` detail, if any
    pub fn reason(&self) -> Option<&str> {
        self.details.get("reason").and_then(Value::as_str)
    }
}

/// Identity of the task an agent is running
#[derive(Debug, Clone, Serialize)]
pub struct TaskContext {
    /// Generated per execution
    pub task_id: String,
    /// Caller-supplied or generated correlation id
    pub correlation_id: String,
    /// Caller priority
    pub priority: TaskPriority,
    /// Name of the executing agent
    pub agent_name: String,
    /// Type of the executing agent
    pub agent_type: String,
    /// Caller metadata merged with the fields above
    pub metadata: Map<String, Value>,
}

/// Uniform result of every execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    /// Whether the operation completed
    pub success: bool,
    /// Data produced on success
    pub data: Option<AgentOutput>,
    /// Failure description
    pub error: Option<String>,
    /// Wall time in seconds
    pub processing_time: f64,
    /// Type of the executing agent
    pub agent_type: String,
    /// Caller metadata merged with execution identity
    pub metadata: Map<String, Value>,
    /// Terminal envelope state
    pub status: AgentStatus,
}

impl AgentResult {
    /// Successful completion
    pub fn completed(
        data: AgentOutput,
        processing_time: f64,
        agent_type: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            processing_time,
            agent_type: agent_type.into(),
            metadata,
            status: AgentStatus::Completed,
        }
    }

    /// Failed or timed out execution
    pub fn failed(
        status: AgentStatus,
        error: impl Into<String>,
        processing_time: f64,
        agent_type: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            processing_time,
            agent_type: agent_type.into(),
            metadata,
            status,
        }
    }

    /// Whether the execution hit its deadline
    pub fn is_timeout(&self) -> bool {
        self.status == AgentStatus::Timeout
    }
}
