//! Agent trait and agent type descriptors

pub mod templates;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use lexcore_di::DIContainer;
use tokio_util::sync::CancellationToken;

use crate::collaborators::Collaborators;
use crate::error::Result;
use crate::models::{AgentOutput, HealthReport, TaskContext, TaskPayload};

pub use templates::{AgentBlueprint, AgentTemplate, TemplateAgent};

/// Trait that all agents must implement
///
/// Agents only implement their own operation; deadlines, state tracking and
/// error capture are handled by the
/// [`ExecutionEnvelope`](crate::envelope::ExecutionEnvelope) that wraps them.
///
/// # Examples
///
/// ```ignore
/// use lexcore_agents::{Agent, AgentOutput, TaskContext, TaskPayload, Result};
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
///
/// struct WordCounter;
///
/// #[async_trait]
/// impl Agent for WordCounter {
///     async fn process(
///         &self,
///         _ctx: &TaskContext,
///         payload: &TaskPayload,
///         _cancel: CancellationToken,
///     ) -> Result<AgentOutput> {
///         let words = payload["text"].as_str().unwrap_or("").split_whitespace().count();
///         let mut output = AgentOutput::new();
///         output.insert("words".into(), words.into());
///         Ok(output)
///     }
/// }
/// ```
#[async_trait]
pub trait Agent: Send + Sync {
    /// Run the agent's operation
    ///
    /// Long-running work should watch `cancel` and return
    /// [`AgentError::Cancelled`](crate::AgentError::Cancelled) once it fires;
    /// work that ignores it keeps running until it returns on its own.
    async fn process(
        &self,
        ctx: &TaskContext,
        payload: &TaskPayload,
        cancel: CancellationToken,
    ) -> Result<AgentOutput>;

    /// Report whether the agent can take work. Defaults to healthy.
    async fn health_check(&self) -> Result<HealthReport> {
        Ok(HealthReport::healthy())
    }

    /// Release resources before the registry drops the instance
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Everything an agent constructor receives
#[derive(Clone)]
pub struct AgentContext {
    /// Id of the registered agent being instantiated
    pub agent_id: String,
    /// Registered name
    pub agent_name: String,
    /// Collaborators resolved for the agent's requirement flags
    pub collaborators: Collaborators,
    /// The registry's container, for anything else the agent needs
    pub container: Arc<DIContainer>,
}

/// A concrete Rust type that can be registered as an agent type
#[async_trait]
pub trait AgentKind: Agent + Sized + 'static {
    /// Name used for capability inference and reporting
    const TYPE_NAME: &'static str;

    /// Public operation names, consulted by capability inference
    fn operations() -> &'static [&'static str] {
        &[]
    }

    /// Build one instance
    async fn build(ctx: AgentContext) -> Result<Self>;
}

type Constructor =
    Arc<dyn Fn(AgentContext) -> BoxFuture<'static, Result<Arc<dyn Agent>>> + Send + Sync>;

/// Registrable description of an agent type
///
/// Holds the type name, the operation names used for capability inference
/// and an async constructor the registry calls whenever it needs a new
/// instance.
#[derive(Clone)]
pub struct AgentType {
    type_name: String,
    operations: Vec<String>,
    constructor: Constructor,
}

impl AgentType {
    /// Descriptor for a type implementing [`AgentKind`]
    pub fn of<K: AgentKind>() -> Self {
        Self::from_fn(
            K::TYPE_NAME,
            K::operations().iter().copied(),
            |ctx| async move { Ok(Arc::new(K::build(ctx).await?) as Arc<dyn Agent>) },
        )
    }

    /// Descriptor backed by an arbitrary async constructor
    pub fn from_fn<F, Fut, I, S>(type_name: impl Into<String>, operations: I, constructor: F) -> Self
    where
        F: Fn(AgentContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn Agent>>> + Send + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            type_name: type_name.into(),
            operations: operations.into_iter().map(Into::into).collect(),
            constructor: Arc::new(move |ctx| constructor(ctx).boxed()),
        }
    }

    /// Descriptor that hands out clones of one shared agent
    pub fn shared(type_name: impl Into<String>, agent: Arc<dyn Agent>) -> Self {
        Self::from_fn(type_name, Vec::<String>::new(), move |_| {
            let agent = Arc::clone(&agent);
            async move { Ok(agent) }
        })
    }

    /// Replace the operation names
    pub fn with_operations<I, S>(mut self, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.operations = operations.into_iter().map(Into::into).collect();
        self
    }

    /// Type name
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Operation names
    pub fn operations(&self) -> &[String] {
        &self.operations
    }

    pub(crate) fn construct(&self, ctx: AgentContext) -> BoxFuture<'static, Result<Arc<dyn Agent>>> {
        (self.constructor)(ctx)
    }
}

impl fmt::Debug for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentType")
            .field("type_name", &self.type_name)
            .field("operations", &self.operations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskPriority;
    use serde_json::{Map, Value};

    struct DocumentProcessorAgent;

    #[async_trait]
    impl Agent for DocumentProcessorAgent {
        async fn process(
            &self,
            _ctx: &TaskContext,
            _payload: &TaskPayload,
            _cancel: CancellationToken,
        ) -> Result<AgentOutput> {
            let mut output = AgentOutput::new();
            output.insert("pages".to_string(), Value::from(3));
            Ok(output)
        }
    }

    #[async_trait]
    impl AgentKind for DocumentProcessorAgent {
        const TYPE_NAME: &'static str = "DocumentProcessorAgent";

        fn operations() -> &'static [&'static str] {
            &["process_document"]
        }

        async fn build(_ctx: AgentContext) -> Result<Self> {
            Ok(Self)
        }
    }

    fn context() -> AgentContext {
        AgentContext {
            agent_id: "id".to_string(),
            agent_name: "docs".to_string(),
            collaborators: Collaborators::default(),
            container: Arc::new(DIContainer::new()),
        }
    }

    #[tokio::test]
    async fn test_agent_type_of_kind() {
        let agent_type = AgentType::of::<DocumentProcessorAgent>();
        assert_eq!(agent_type.type_name(), "DocumentProcessorAgent");
        assert_eq!(agent_type.operations(), &["process_document".to_string()]);

        let agent = agent_type.construct(context()).await.unwrap();
        let task = TaskContext {
            task_id: "t".to_string(),
            correlation_id: "c".to_string(),
            priority: TaskPriority::Normal,
            agent_name: "docs".to_string(),
            agent_type: "DocumentProcessorAgent".to_string(),
            metadata: Map::new(),
        };
        let output = agent
            .process(&task, &TaskPayload::new(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output["pages"], 3);
        assert!(agent.health_check().await.unwrap().healthy);
    }

    #[tokio::test]
    async fn test_shared_agent_type_reuses_instance() {
        let agent: Arc<dyn Agent> = Arc::new(DocumentProcessorAgent);
        let agent_type = AgentType::shared("Shared", Arc::clone(&agent));
        let first = agent_type.construct(context()).await.unwrap();
        let second = agent_type.construct(context()).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
