//! Live agent instances and the pool that reuses them

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::agents::Agent;
use crate::envelope::ExecutionEnvelope;
use crate::models::{AgentResult, AgentStatus, TaskPayload, TaskPriority};

/// Point-in-time view of an instance
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSnapshot {
    pub instance_id: String,
    pub agent_id: String,
    pub status: AgentStatus,
    pub constructed_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub active_tasks: usize,
}

/// One constructed agent bound to a registered agent id
pub struct AgentInstance {
    instance_id: String,
    agent_id: String,
    constructed_at: DateTime<Utc>,
    last_used: Mutex<DateTime<Utc>>,
    active_task_ids: Mutex<HashSet<String>>,
    status: Mutex<AgentStatus>,
    envelope: ExecutionEnvelope,
}

/// Clears the task id and an abandoned `Processing` status on every exit path
struct TaskGuard<'a> {
    instance: &'a AgentInstance,
    task_id: String,
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.instance.active_task_ids.lock().remove(&self.task_id);
        let mut status = self.instance.status.lock();
        if *status == AgentStatus::Processing {
            *status = AgentStatus::Idle;
        }
    }
}

impl AgentInstance {
    /// A new instance, already claimed for its first task
    pub fn claimed(agent_id: impl Into<String>, envelope: ExecutionEnvelope) -> Self {
        let now = Utc::now();
        Self {
            instance_id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            constructed_at: now,
            last_used: Mutex::new(now),
            active_task_ids: Mutex::new(HashSet::new()),
            status: Mutex::new(AgentStatus::Processing),
            envelope,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        self.envelope.agent()
    }

    pub fn envelope(&self) -> &ExecutionEnvelope {
        &self.envelope
    }

    pub fn status(&self) -> AgentStatus {
        *self.status.lock()
    }

    pub(crate) fn set_status(&self, status: AgentStatus) {
        *self.status.lock() = status;
    }

    /// Apply a health probe outcome without disturbing a running task
    pub(crate) fn apply_health(&self, healthy: bool) {
        let mut status = self.status.lock();
        if healthy {
            if *status != AgentStatus::Processing {
                *status = AgentStatus::Idle;
            }
        } else {
            *status = AgentStatus::Failed;
        }
    }

    pub fn last_used(&self) -> DateTime<Utc> {
        *self.last_used.lock()
    }

    pub fn active_task_ids(&self) -> Vec<String> {
        self.active_task_ids.lock().iter().cloned().collect()
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            instance_id: self.instance_id.clone(),
            agent_id: self.agent_id.clone(),
            status: self.status(),
            constructed_at: self.constructed_at,
            last_used: self.last_used(),
            active_tasks: self.active_task_ids.lock().len(),
        }
    }

    /// Claim the instance if it is idle and has no active task
    fn try_claim(&self) -> bool {
        let mut status = self.status.lock();
        if status.is_available() && self.active_task_ids.lock().is_empty() {
            *status = AgentStatus::Processing;
            true
        } else {
            false
        }
    }

    /// Run one task through the envelope and release the claim
    ///
    /// On success the instance is left `Completed`; on failure it returns to
    /// `Idle` so it can be retried. Only the health monitor marks an
    /// instance `Failed`.
    pub async fn run(
        &self,
        payload: &TaskPayload,
        priority: TaskPriority,
        metadata: Option<Map<String, Value>>,
        correlation_id: Option<String>,
    ) -> AgentResult {
        let task_id = Uuid::new_v4().to_string();
        self.active_task_ids.lock().insert(task_id.clone());
        let _guard = TaskGuard {
            instance: self,
            task_id: task_id.clone(),
        };

        let result = self
            .envelope
            .execute_task(task_id, payload, priority, metadata, correlation_id)
            .await;

        *self.last_used.lock() = Utc::now();
        self.set_status(if result.success {
            AgentStatus::Completed
        } else {
            AgentStatus::Idle
        });
        result
    }
}

impl std::fmt::Debug for AgentInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentInstance")
            .field("instance_id", &self.instance_id)
            .field("agent_id", &self.agent_id)
            .field("status", &self.status())
            .finish()
    }
}

/// Every live instance, in construction order
#[derive(Default)]
pub struct InstancePool {
    instances: RwLock<Vec<Arc<AgentInstance>>>,
}

impl InstancePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a reusable instance of `agent_id`, if one exists
    pub fn claim_idle(&self, agent_id: &str) -> Option<Arc<AgentInstance>> {
        let instances = self.instances.write();
        instances
            .iter()
            .find(|instance| instance.agent_id() == agent_id && instance.try_claim())
            .cloned()
    }

    pub fn insert(&self, instance: Arc<AgentInstance>) {
        self.instances.write().push(instance);
    }

    /// Snapshot of every instance
    pub fn all(&self) -> Vec<Arc<AgentInstance>> {
        self.instances.read().clone()
    }

    pub fn instances_of(&self, agent_id: &str) -> Vec<Arc<AgentInstance>> {
        self.instances
            .read()
            .iter()
            .filter(|instance| instance.agent_id() == agent_id)
            .cloned()
            .collect()
    }

    /// Remove and return every instance of `agent_id`
    pub fn remove_agent(&self, agent_id: &str) -> Vec<Arc<AgentInstance>> {
        let mut instances = self.instances.write();
        let (removed, kept): (Vec<_>, Vec<_>) = instances
            .drain(..)
            .partition(|instance| instance.agent_id() == agent_id);
        *instances = kept;
        removed
    }

    /// Remove and return every instance
    pub fn drain(&self) -> Vec<Arc<AgentInstance>> {
        std::mem::take(&mut *self.instances.write())
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AgentError, Result};
    use crate::models::{AgentOutput, TaskContext};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Toggle {
        fail: bool,
    }

    #[async_trait]
    impl Agent for Toggle {
        async fn process(
            &self,
            _ctx: &TaskContext,
            _payload: &TaskPayload,
            _cancel: CancellationToken,
        ) -> Result<AgentOutput> {
            if self.fail {
                Err(AgentError::execution_failed("nope"))
            } else {
                Ok(AgentOutput::new())
            }
        }
    }

    fn instance(agent_id: &str, fail: bool) -> Arc<AgentInstance> {
        let envelope = ExecutionEnvelope::new(
            Arc::new(Toggle { fail }),
            agent_id,
            "Toggle",
            Duration::from_secs(1),
        );
        Arc::new(AgentInstance::claimed(agent_id, envelope))
    }

    #[tokio::test]
    async fn test_run_releases_claim() {
        let ok = instance("a", false);
        let result = ok.run(&TaskPayload::new(), TaskPriority::Normal, None, None).await;
        assert!(result.success);
        assert_eq!(ok.status(), AgentStatus::Completed);
        assert!(ok.active_task_ids().is_empty());

        let failing = instance("b", true);
        let result = failing
            .run(&TaskPayload::new(), TaskPriority::Normal, None, None)
            .await;
        assert!(!result.success);
        assert_eq!(failing.status(), AgentStatus::Idle);
    }

    #[tokio::test]
    async fn test_claim_idle_claims_once() {
        let pool = InstancePool::new();
        let first = instance("a", false);
        pool.insert(Arc::clone(&first));

        // still claimed from construction
        assert!(pool.claim_idle("a").is_none());

        first.run(&TaskPayload::new(), TaskPriority::Normal, None, None).await;
        let claimed = pool.claim_idle("a").unwrap();
        assert!(Arc::ptr_eq(&claimed, &first));
        assert!(pool.claim_idle("a").is_none());
        assert!(pool.claim_idle("other").is_none());
    }

    #[test]
    fn test_failed_instances_are_not_claimed() {
        let pool = InstancePool::new();
        let failed = instance("a", false);
        failed.apply_health(false);
        pool.insert(failed);
        assert!(pool.claim_idle("a").is_none());
    }

    #[test]
    fn test_healthy_probe_keeps_processing() {
        let busy = instance("a", false);
        busy.apply_health(true);
        assert_eq!(busy.status(), AgentStatus::Processing);

        busy.set_status(AgentStatus::Failed);
        busy.apply_health(true);
        assert_eq!(busy.status(), AgentStatus::Idle);
    }

    #[test]
    fn test_remove_and_drain() {
        let pool = InstancePool::new();
        pool.insert(instance("a", false));
        pool.insert(instance("b", false));
        pool.insert(instance("a", false));

        assert_eq!(pool.instances_of("a").len(), 2);
        assert_eq!(pool.remove_agent("a").len(), 2);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.drain().len(), 1);
        assert!(pool.is_empty());
    }
}
