//! Process-wide orchestration context
//!
//! The entry point builds one [`OrchestratorContext`] and passes it to
//! whatever needs the registry. There is no global instance.

use std::sync::Arc;

use lexcore_config::OrchestratorConfig;
use lexcore_di::{DIContainer, DIContainerBuilder};
use tracing::info;

use crate::agents::AgentBlueprint;
use crate::collaborators::CollaboratorProvider;
use crate::error::{RegistrationError, RegistryResult};
use crate::registry::{AgentRegistry, RegistryConfig};

/// Container, registry and health monitor for one process
pub struct OrchestratorContext {
    config: OrchestratorConfig,
    container: Arc<DIContainer>,
    registry: Arc<AgentRegistry>,
}

impl OrchestratorContext {
    /// Build a context with the in-memory collaborators installed
    ///
    /// Registers the configured blueprints, loads persisted metrics and
    /// starts the health monitor when enabled. Must run inside a tokio
    /// runtime.
    pub async fn bootstrap(config: OrchestratorConfig) -> RegistryResult<Self> {
        let container = DIContainerBuilder::new()
            .provider(CollaboratorProvider)
            .build()?;
        Self::with_container(config, Arc::new(container)).await
    }

    /// Build a context around an existing container
    ///
    /// Fails with [`crate::RegistryError::Config`] when the configuration does not
    /// validate.
    pub async fn with_container(
        config: OrchestratorConfig,
        container: Arc<DIContainer>,
    ) -> RegistryResult<Self> {
        config.validate()?;
        let registry = Arc::new(AgentRegistry::new(
            Arc::clone(&container),
            RegistryConfig::from(&config),
        ));

        for entry in &config.agents {
            let blueprint = AgentBlueprint::try_from(entry)?;
            registry.register_blueprint(&blueprint)?;
        }
        registry.load_agent_metadata().await?;

        if registry.config().health.enabled {
            registry.start_health_monitor();
        }
        info!(
            agents = registry.agent_count(),
            capabilities = registry.supported_capabilities().len(),
            "Orchestrator context ready"
        );

        Ok(Self {
            config,
            container,
            registry,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn container(&self) -> &Arc<DIContainer> {
        &self.container
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Register one more blueprint agent
    pub fn register_blueprint(&self, blueprint: &AgentBlueprint) -> Result<String, RegistrationError> {
        self.registry.register_blueprint(blueprint)
    }

    /// Shut the registry down, persisting metadata
    pub async fn shutdown(self) -> RegistryResult<()> {
        self.registry.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::SharedMemoryRef;
    use crate::error::RegistryError;
    use crate::models::{AgentCapability, TaskPayload, TaskPriority};
    use crate::registry::DispatchFilters;
    use lexcore_config::AgentEntry;
    use serde_json::json;

    fn config() -> OrchestratorConfig {
        let mut config = OrchestratorConfig::default();
        config.health.enabled = false;
        config.agents.push(AgentEntry {
            agent_id: Some("memo".to_string()),
            name: "MemoEcho".to_string(),
            template: "echo".to_string(),
            capabilities: vec!["memory_management".to_string()],
            requires_shared_memory: true,
            ..AgentEntry::default()
        });
        config
    }

    #[tokio::test]
    async fn test_bootstrap_registers_configured_agents() {
        let context = OrchestratorContext::bootstrap(config()).await.unwrap();
        assert_eq!(context.registry().agent_count(), 1);
        assert!(!context.registry().health_monitor_running());
        assert_eq!(
            context.registry().supported_capabilities(),
            vec![AgentCapability::MemoryManagement]
        );

        let mut payload = TaskPayload::new();
        payload.insert("text".to_string(), json!("remember me"));
        let result = context
            .registry()
            .execute_with_best_agent(
                AgentCapability::MemoryManagement,
                payload,
                TaskPriority::Normal,
                DispatchFilters::new(),
            )
            .await
            .unwrap();
        let task_id = result.metadata["task_id"].as_str().unwrap().to_string();

        let memory = context.container().resolve::<SharedMemoryRef>().await.unwrap();
        let stored = memory.get(&format!("MemoEcho:{}", task_id)).await.unwrap();
        assert_eq!(stored["echo"]["text"], "remember me");

        context.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_bad_blueprints() {
        let mut config = config();
        config.agents[0].template = "telepathy".to_string();
        let result = OrchestratorContext::bootstrap(config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_out_of_range_timeouts_are_rejected() {
        let mut huge = config();
        huge.execution.timeout_seconds = 1e20;
        let result = OrchestratorContext::bootstrap(huge).await;
        assert!(matches!(result, Err(RegistryError::Config(_))));

        let mut negative = config();
        negative.agents[0].timeout_seconds = Some(-5.0);
        assert!(OrchestratorContext::bootstrap(negative).await.is_err());

        let mut unbounded_probe = config();
        unbounded_probe.health.probe_timeout_seconds = Some(f64::MAX);
        assert!(OrchestratorContext::bootstrap(unbounded_probe).await.is_err());
    }

    #[tokio::test]
    async fn test_monitor_started_when_enabled() {
        let mut config = config();
        config.health.enabled = true;
        let context = OrchestratorContext::bootstrap(config).await.unwrap();
        assert!(context.registry().health_monitor_running());
        let registry = Arc::clone(context.registry());
        context.shutdown().await.unwrap();
        assert!(!registry.health_monitor_running());
    }
}
