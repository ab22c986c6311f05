//! Capability-indexed agent registry and dispatcher
//!
//! The registry tracks agent *types* with their ranking metrics, keeps the
//! capability, practice area and jurisdiction indices, and dispatches tasks
//! to the best ranked agent with sequential failover.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use lexcore_config::OrchestratorConfig;
use lexcore_di::DIContainer;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agents::{AgentBlueprint, AgentContext, AgentType};
use crate::collaborators::Collaborators;
use crate::envelope::ExecutionEnvelope;
use crate::error::{FailedAttempt, RegistrationError, RegistryError, RegistryResult};
use crate::health::{HealthCheckConfig, MonitorHandle};
use crate::index::{rank_candidates, CapabilityIndex};
use crate::inference::infer_capabilities;
use crate::instance::{AgentInstance, InstancePool, InstanceSnapshot};
use crate::models::{
    AgentCapability, AgentMetadata, AgentRequirements, AgentResult, AgentStatus, TaskPayload,
    TaskPriority,
};
use crate::persistence::{MetadataStore, PersistedAgentMetrics, PersistedMetadata};

/// Registry settings
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Deadline for agents registered without their own timeout
    pub default_timeout: Duration,
    /// Candidates tried per dispatch when the caller gives no limit
    pub max_candidates: usize,
    /// Metrics file read by `load_agent_metadata` and written by `save_metadata`
    pub metadata_path: Option<PathBuf>,
    /// Background health monitor settings
    pub health: HealthCheckConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(60),
            max_candidates: 5,
            metadata_path: None,
            health: HealthCheckConfig::default(),
        }
    }
}

impl From<&OrchestratorConfig> for RegistryConfig {
    fn from(config: &OrchestratorConfig) -> Self {
        let defaults = Self::default();
        Self {
            default_timeout: config
                .execution
                .timeout()
                .unwrap_or(defaults.default_timeout),
            max_candidates: config.registry.max_candidates,
            metadata_path: config.registry.metadata_path.clone(),
            health: HealthCheckConfig::from(&config.health),
        }
    }
}

/// Options for registering an agent type
///
/// Everything is optional. Without a name the type name is used; without
/// capabilities they are inferred from the type.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistration {
    agent_id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    capabilities: Option<BTreeSet<AgentCapability>>,
    practice_areas: BTreeSet<String>,
    jurisdictions: BTreeSet<String>,
    requirements: AgentRequirements,
    timeout: Option<Duration>,
}

impl AgentRegistration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a stable id instead of a generated one
    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declare capabilities explicitly, disabling inference
    pub fn capabilities(mut self, capabilities: impl IntoIterator<Item = AgentCapability>) -> Self {
        self.capabilities
            .get_or_insert_with(BTreeSet::new)
            .extend(capabilities);
        self
    }

    pub fn capability(self, capability: AgentCapability) -> Self {
        self.capabilities([capability])
    }

    pub fn practice_areas<I, S>(mut self, areas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.practice_areas.extend(areas.into_iter().map(Into::into));
        self
    }

    pub fn practice_area(self, area: impl Into<String>) -> Self {
        self.practice_areas([area.into()])
    }

    pub fn jurisdictions<I, S>(mut self, jurisdictions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.jurisdictions
            .extend(jurisdictions.into_iter().map(Into::into));
        self
    }

    pub fn jurisdiction(self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdictions([jurisdiction.into()])
    }

    pub fn requirements(mut self, requirements: AgentRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    /// Per-agent deadline overriding the registry default
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Dispatch options beyond capability, payload and priority
#[derive(Debug, Clone, Default)]
pub struct DispatchFilters {
    pub practice_area: Option<String>,
    pub jurisdiction: Option<String>,
    /// Overrides the registry's `max_candidates`
    pub max_candidates: Option<usize>,
    /// Caller metadata merged into every attempt's result
    pub metadata: Option<Map<String, Value>>,
    /// Shared by every attempt; generated when absent
    pub correlation_id: Option<String>,
}

impl DispatchFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn practice_area(mut self, area: impl Into<String>) -> Self {
        self.practice_area = Some(area.into());
        self
    }

    pub fn jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdiction = Some(jurisdiction.into());
        self
    }

    pub fn max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = Some(max);
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

struct RegisteredAgent {
    agent_type: AgentType,
    metadata: AgentMetadata,
    timeout: Duration,
}

/// Registry of agent types with ranked, failover dispatch
///
/// # Examples
///
/// ```ignore
/// use lexcore_agents::{AgentRegistry, AgentRegistration, AgentType, DispatchFilters};
///
/// let registry = AgentRegistry::new(container, RegistryConfig::default());
/// registry.register_agent(AgentType::of::<DocumentProcessorAgent>(), AgentRegistration::new())?;
///
/// let result = registry
///     .execute_with_best_agent(
///         AgentCapability::DocumentProcessing,
///         payload,
///         TaskPriority::Normal,
///         DispatchFilters::new(),
///     )
///     .await?;
/// ```
pub struct AgentRegistry {
    container: Arc<DIContainer>,
    config: RegistryConfig,
    agents: RwLock<HashMap<String, RegisteredAgent>>,
    index: RwLock<CapabilityIndex>,
    pool: InstancePool,
    persisted: RwLock<PersistedMetadata>,
    next_order: AtomicU64,
    health_failures: AtomicU64,
    pub(crate) monitor: Mutex<Option<MonitorHandle>>,
}

impl AgentRegistry {
    /// Create a registry bound to one container for its whole lifetime
    pub fn new(container: Arc<DIContainer>, config: RegistryConfig) -> Self {
        Self {
            container,
            config,
            agents: RwLock::new(HashMap::new()),
            index: RwLock::new(CapabilityIndex::new()),
            pool: InstancePool::new(),
            persisted: RwLock::new(PersistedMetadata::new()),
            next_order: AtomicU64::new(0),
            health_failures: AtomicU64::new(0),
            monitor: Mutex::new(None),
        }
    }

    pub fn container(&self) -> &Arc<DIContainer> {
        &self.container
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn build_metadata(
        &self,
        agent_id: String,
        agent_type: &AgentType,
        registration: &AgentRegistration,
    ) -> Result<AgentMetadata, RegistrationError> {
        let name = registration
            .name
            .clone()
            .unwrap_or_else(|| agent_type.type_name().to_string());
        if name.trim().is_empty() {
            return Err(RegistrationError::Invalid(
                "agent name must not be empty".to_string(),
            ));
        }
        let capabilities = match &registration.capabilities {
            Some(explicit) if !explicit.is_empty() => explicit.clone(),
            _ => infer_capabilities(agent_type.type_name(), agent_type.operations()),
        };

        let mut metadata = AgentMetadata::new(agent_id, name);
        metadata.agent_type = agent_type.type_name().to_string();
        metadata.description = registration.description.clone().unwrap_or_default();
        metadata.capabilities = capabilities;
        metadata.practice_areas = registration.practice_areas.clone();
        metadata.jurisdictions = registration.jurisdictions.clone();
        metadata.requirements = registration.requirements;
        Ok(metadata)
    }

    /// Register an agent type and index it under its facets
    ///
    /// Returns the agent id. Capabilities are inferred from the type name and
    /// operation names when the registration declares none. Metrics loaded
    /// earlier by [`load_agent_metadata`](Self::load_agent_metadata) for the
    /// same id seed the new entry.
    pub fn register_agent(
        &self,
        agent_type: AgentType,
        registration: AgentRegistration,
    ) -> Result<String, RegistrationError> {
        let agent_id = registration
            .agent_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if agent_id.trim().is_empty() {
            return Err(RegistrationError::Invalid(
                "agent id must not be empty".to_string(),
            ));
        }
        let mut metadata = self.build_metadata(agent_id.clone(), &agent_type, &registration)?;
        metadata.registration_order = self.next_order.fetch_add(1, Ordering::SeqCst);
        if let Some(persisted) = self.persisted.read().get(&agent_id) {
            persisted.apply(&mut metadata);
            debug!(agent_id = %agent_id, "Seeded agent metrics from persisted metadata");
        }
        let timeout = registration.timeout.unwrap_or(self.config.default_timeout);

        {
            let mut agents = self.agents.write();
            if agents.contains_key(&agent_id) {
                return Err(RegistrationError::Duplicate(agent_id));
            }
            self.index.write().index(&metadata);
            info!(
                agent_id = %agent_id,
                agent_name = %metadata.name,
                agent_type = %metadata.agent_type,
                capabilities = ?metadata.capabilities,
                "Agent registered"
            );
            agents.insert(
                agent_id.clone(),
                RegisteredAgent {
                    agent_type,
                    metadata,
                    timeout,
                },
            );
        }
        Ok(agent_id)
    }

    /// Register an agent built from a blueprint
    pub fn register_blueprint(&self, blueprint: &AgentBlueprint) -> Result<String, RegistrationError> {
        self.register_agent(blueprint.agent_type()?, blueprint.registration())
    }

    /// Replace the type, facets and descriptive fields of an existing agent
    ///
    /// Metrics are kept. Pooled instances of the old type are retired and
    /// their shutdown hooks called.
    pub async fn reregister_agent(
        &self,
        agent_id: &str,
        agent_type: AgentType,
        registration: AgentRegistration,
    ) -> Result<(), RegistrationError> {
        let mut metadata = self.build_metadata(agent_id.to_string(), &agent_type, &registration)?;
        let timeout = registration.timeout.unwrap_or(self.config.default_timeout);
        {
            let mut agents = self.agents.write();
            let entry = agents
                .get_mut(agent_id)
                .ok_or_else(|| RegistrationError::NotFound(agent_id.to_string()))?;

            let previous = &entry.metadata;
            metadata.success_rate = previous.success_rate;
            metadata.avg_processing_time = previous.avg_processing_time;
            metadata.task_count = previous.task_count;
            metadata.error_count = previous.error_count;
            metadata.last_error = previous.last_error.clone();
            metadata.last_health_check = previous.last_health_check;
            metadata.status = previous.status;
            metadata.registered_at = previous.registered_at;
            metadata.registration_order = previous.registration_order;

            let mut index = self.index.write();
            index.unindex(previous);
            index.index(&metadata);
            *entry = RegisteredAgent {
                agent_type,
                metadata,
                timeout,
            };
        }

        let retired = self.pool.remove_agent(agent_id);
        for instance in &retired {
            if let Err(err) = instance.agent().shutdown().await {
                warn!(agent_id = %agent_id, error = %err, "Retired instance failed to shut down");
            }
        }
        info!(agent_id = %agent_id, retired = retired.len(), "Agent re-registered");
        Ok(())
    }

    /// Agents under `capability`, narrowed by the optional facets and ranked
    ///
    /// Ranking is success rate descending, then mean processing time
    /// ascending, then registration order.
    pub fn find_agents_by_capability(
        &self,
        capability: AgentCapability,
        practice_area: Option<&str>,
        jurisdiction: Option<&str>,
        max_results: usize,
    ) -> Vec<AgentMetadata> {
        let ids = self
            .index
            .read()
            .lookup(capability, practice_area, jurisdiction);
        let candidates: Vec<AgentMetadata> = {
            let agents = self.agents.read();
            ids.iter()
                .filter_map(|id| agents.get(id).map(|entry| entry.metadata.clone()))
                .collect()
        };
        rank_candidates(candidates, max_results)
    }

    /// Run a task on the best agent for `capability`, failing over in rank order
    ///
    /// Per-candidate failures only show up in the candidates' metrics; the
    /// call fails with [`RegistryError::AllCandidatesExhausted`] when every
    /// candidate failed, and with a resolution error as soon as a required
    /// service cannot be resolved.
    pub async fn execute_with_best_agent(
        &self,
        capability: AgentCapability,
        payload: TaskPayload,
        priority: TaskPriority,
        filters: DispatchFilters,
    ) -> RegistryResult<AgentResult> {
        let max = filters.max_candidates.unwrap_or(self.config.max_candidates);
        let candidates = self.find_agents_by_capability(
            capability,
            filters.practice_area.as_deref(),
            filters.jurisdiction.as_deref(),
            max,
        );
        if candidates.is_empty() {
            return Err(RegistryError::NoAgentsAvailable { capability });
        }

        let correlation_id = filters
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        debug!(
            capability = %capability,
            candidates = candidates.len(),
            correlation_id = %correlation_id,
            "Dispatching task"
        );

        let mut attempts = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let started = Instant::now();
            let instance = match self.pool.claim_idle(&candidate.agent_id) {
                Some(instance) => instance,
                None => match self.spawn_instance(&candidate.agent_id).await {
                    Ok(instance) => instance,
                    Err(RegistryError::Construction { source, .. }) => {
                        let message = source.to_string();
                        self.record_outcome(
                            &candidate.agent_id,
                            false,
                            started.elapsed().as_secs_f64(),
                            Some(&message),
                        );
                        warn!(
                            agent_id = %candidate.agent_id,
                            error = %message,
                            "Agent construction failed; trying next candidate"
                        );
                        attempts.push(FailedAttempt {
                            agent_id: candidate.agent_id.clone(),
                            agent_name: candidate.name.clone(),
                            error: message,
                        });
                        continue;
                    }
                    Err(err) => return Err(err),
                },
            };

            let result = instance
                .run(
                    &payload,
                    priority,
                    filters.metadata.clone(),
                    Some(correlation_id.clone()),
                )
                .await;
            self.record_outcome(
                &candidate.agent_id,
                result.success,
                result.processing_time,
                result.error.as_deref(),
            );

            if result.success {
                info!(
                    capability = %capability,
                    agent_id = %candidate.agent_id,
                    attempts = attempts.len() + 1,
                    processing_time = result.processing_time,
                    "Task completed"
                );
                return Ok(result);
            }

            let message = result
                .error
                .clone()
                .unwrap_or_else(|| result.status.to_string());
            warn!(
                agent_id = %candidate.agent_id,
                status = %result.status,
                error = %message,
                "Candidate failed; trying next candidate"
            );
            attempts.push(FailedAttempt {
                agent_id: candidate.agent_id.clone(),
                agent_name: candidate.name.clone(),
                error: message,
            });
        }

        error!(
            capability = %capability,
            attempts = attempts.len(),
            "All candidates failed"
        );
        Err(RegistryError::AllCandidatesExhausted {
            capability,
            attempts,
        })
    }

    /// Construct a new claimed instance of a registered agent
    async fn spawn_instance(&self, agent_id: &str) -> RegistryResult<Arc<AgentInstance>> {
        let (agent_type, name, requirements, timeout) = {
            let agents = self.agents.read();
            let entry = agents
                .get(agent_id)
                .ok_or_else(|| RegistrationError::NotFound(agent_id.to_string()))?;
            (
                entry.agent_type.clone(),
                entry.metadata.name.clone(),
                entry.metadata.requirements,
                entry.timeout,
            )
        };

        let collaborators = Collaborators::resolve(&self.container, &requirements).await?;
        let missing = collaborators.missing(&requirements);
        if !missing.is_empty() {
            warn!(
                agent_id = %agent_id,
                missing = ?missing,
                "Creating agent instance without required collaborators"
            );
        }

        let ctx = AgentContext {
            agent_id: agent_id.to_string(),
            agent_name: name.clone(),
            collaborators,
            container: Arc::clone(&self.container),
        };
        let agent = agent_type
            .construct(ctx)
            .await
            .map_err(|source| RegistryError::Construction {
                agent_id: agent_id.to_string(),
                source,
            })?;

        let envelope = ExecutionEnvelope::new(agent, name, agent_type.type_name(), timeout);
        let instance = Arc::new(AgentInstance::claimed(agent_id, envelope));
        self.pool.insert(Arc::clone(&instance));
        debug!(
            agent_id = %agent_id,
            instance_id = %instance.instance_id(),
            "Created agent instance"
        );
        Ok(instance)
    }

    /// Construct one idle instance for every agent that has none
    ///
    /// Agents whose constructor fails are logged and skipped without touching
    /// their ranking metrics. Returns the number of instances created.
    pub async fn warm_up(&self) -> RegistryResult<usize> {
        let mut created = 0;
        for metadata in self.all_agent_metadata() {
            if !self.pool.instances_of(&metadata.agent_id).is_empty() {
                continue;
            }
            match self.spawn_instance(&metadata.agent_id).await {
                Ok(instance) => {
                    instance.set_status(AgentStatus::Idle);
                    created += 1;
                }
                Err(RegistryError::Construction { agent_id, source }) => {
                    warn!(agent_id = %agent_id, error = %source, "Skipping agent during warm-up");
                }
                Err(err) => return Err(err),
            }
        }
        debug!(created, "Warm-up finished");
        Ok(created)
    }

    fn record_outcome(&self, agent_id: &str, success: bool, elapsed: f64, error: Option<&str>) {
        let mut agents = self.agents.write();
        if let Some(entry) = agents.get_mut(agent_id) {
            entry.metadata.record_attempt(success, elapsed);
            if !success {
                entry
                    .metadata
                    .record_error(error.unwrap_or("unknown error"));
            }
        }
    }

    /// Record a health probe outcome on an agent's metadata
    pub(crate) fn record_health(&self, agent_id: &str, failure: Option<&str>) {
        let mut agents = self.agents.write();
        let Some(entry) = agents.get_mut(agent_id) else {
            return;
        };
        match failure {
            None => {
                entry.metadata.status = AgentStatus::Idle;
                entry.metadata.last_health_check = Some(Utc::now());
            }
            Some(reason) => {
                entry.metadata.status = AgentStatus::Failed;
                entry.metadata.record_error(reason);
                self.health_failures.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    pub(crate) fn pool(&self) -> &InstancePool {
        &self.pool
    }

    /// Write every agent's metrics to the configured metadata file
    ///
    /// Entries loaded earlier for agents not registered in this process are
    /// kept. Does nothing when no path is configured.
    pub async fn save_metadata(&self) -> RegistryResult<()> {
        let Some(path) = &self.config.metadata_path else {
            debug!("No metadata path configured; skipping save");
            return Ok(());
        };
        let snapshot = {
            let mut snapshot = self.persisted.read().clone();
            let agents = self.agents.read();
            for (agent_id, entry) in agents.iter() {
                snapshot.insert(
                    agent_id.clone(),
                    PersistedAgentMetrics::from(&entry.metadata),
                );
            }
            snapshot
        };
        MetadataStore::new(path).save(&snapshot).await?;
        info!(path = %path.display(), agents = snapshot.len(), "Agent metadata saved");
        Ok(())
    }

    /// Read the configured metadata file and seed rankings
    ///
    /// Registered agents with a persisted entry take its metrics; agents
    /// registered later with a matching explicit id are seeded on
    /// registration. Returns the number of registered agents updated.
    pub async fn load_agent_metadata(&self) -> RegistryResult<usize> {
        let Some(path) = &self.config.metadata_path else {
            return Ok(0);
        };
        let loaded = MetadataStore::new(path).load().await?;

        let mut applied = 0;
        {
            let mut agents = self.agents.write();
            for (agent_id, metrics) in &loaded {
                if let Some(entry) = agents.get_mut(agent_id) {
                    metrics.apply(&mut entry.metadata);
                    applied += 1;
                }
            }
        }
        info!(
            path = %path.display(),
            entries = loaded.len(),
            applied,
            "Agent metadata loaded"
        );
        *self.persisted.write() = loaded;
        Ok(applied)
    }

    /// Persist metadata, stop the health monitor and release every instance
    ///
    /// Per-instance shutdown errors are logged and skipped. A persistence
    /// error is returned after the instances have been released.
    pub async fn shutdown(&self) -> RegistryResult<()> {
        info!("Shutting down agent registry");
        self.stop_health_monitor().await;

        let saved = self.save_metadata().await;
        if let Err(err) = &saved {
            error!(error = %err, "Failed to save agent metadata");
        }

        let instances = self.pool.drain();
        for instance in &instances {
            if let Err(err) = instance.agent().shutdown().await {
                warn!(
                    agent_id = %instance.agent_id(),
                    instance_id = %instance.instance_id(),
                    error = %err,
                    "Agent instance failed to shut down"
                );
            }
        }
        info!(instances = instances.len(), "Agent registry shut down");
        saved
    }

    /// Metadata of one agent
    pub fn get_agent_metadata(&self, agent_id: &str) -> Option<AgentMetadata> {
        self.agents
            .read()
            .get(agent_id)
            .map(|entry| entry.metadata.clone())
    }

    /// Metadata of every agent, in registration order
    pub fn all_agent_metadata(&self) -> Vec<AgentMetadata> {
        let mut all: Vec<_> = self
            .agents
            .read()
            .values()
            .map(|entry| entry.metadata.clone())
            .collect();
        all.sort_by_key(|metadata| metadata.registration_order);
        all
    }

    pub fn agent_count(&self) -> usize {
        self.agents.read().len()
    }

    pub fn instance_count(&self) -> usize {
        self.pool.len()
    }

    pub fn instances(&self) -> Vec<InstanceSnapshot> {
        self.pool.all().iter().map(|instance| instance.snapshot()).collect()
    }

    /// Capabilities with at least one registered agent
    pub fn supported_capabilities(&self) -> Vec<AgentCapability> {
        self.index.read().capabilities()
    }

    /// Failed health probes since the registry was created
    pub fn health_failure_count(&self) -> u64 {
        self.health_failures.load(Ordering::SeqCst)
    }
}
