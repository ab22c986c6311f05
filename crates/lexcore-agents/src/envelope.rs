//! Execution envelope
//!
//! Wraps one agent with a deadline, a small state machine and a uniform
//! result. States move `Idle -> Processing -> {Completed, Failed, Timeout}`
//! and always fall back to `Idle` before `execute` returns, including when
//! the caller drops the future part way through. Agent errors are captured
//! in the returned [`AgentResult`] and never propagated.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::agents::Agent;
use crate::error::AgentError;
use crate::models::{AgentResult, AgentStatus, TaskContext, TaskPayload, TaskPriority};

#[derive(Debug)]
struct EnvelopeState {
    status: AgentStatus,
    last_outcome: Option<AgentStatus>,
    current_task_id: Option<String>,
    start_time: Option<Instant>,
}

/// Returns the envelope to `Idle` however `execute` exits
struct ResetGuard<'a> {
    state: &'a Mutex<EnvelopeState>,
}

impl Drop for ResetGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.status = AgentStatus::Idle;
        state.current_task_id = None;
        state.start_time = None;
    }
}

/// Deadline-bound wrapper around one agent
pub struct ExecutionEnvelope {
    agent: Arc<dyn Agent>,
    agent_name: String,
    agent_type: String,
    timeout: Duration,
    state: Mutex<EnvelopeState>,
}

impl ExecutionEnvelope {
    /// Wrap an agent with a per-task deadline
    pub fn new(
        agent: Arc<dyn Agent>,
        agent_name: impl Into<String>,
        agent_type: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            agent,
            agent_name: agent_name.into(),
            agent_type: agent_type.into(),
            timeout,
            state: Mutex::new(EnvelopeState {
                status: AgentStatus::Idle,
                last_outcome: None,
                current_task_id: None,
                start_time: None,
            }),
        }
    }

    /// The wrapped agent
    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Current state
    pub fn status(&self) -> AgentStatus {
        self.state.lock().status
    }

    /// Terminal state of the most recent task
    pub fn last_outcome(&self) -> Option<AgentStatus> {
        self.state.lock().last_outcome
    }

    /// Task currently running, if any
    pub fn current_task_id(&self) -> Option<String> {
        self.state.lock().current_task_id.clone()
    }

    /// Run one task with a freshly generated task id
    pub async fn execute(
        &self,
        payload: &TaskPayload,
        priority: TaskPriority,
        metadata: Option<Map<String, Value>>,
        correlation_id: Option<String>,
    ) -> AgentResult {
        let task_id = Uuid::new_v4().to_string();
        self.execute_task(task_id, payload, priority, metadata, correlation_id)
            .await
    }

    /// Run one task under a caller-chosen task id
    pub async fn execute_task(
        &self,
        task_id: String,
        payload: &TaskPayload,
        priority: TaskPriority,
        metadata: Option<Map<String, Value>>,
        correlation_id: Option<String>,
    ) -> AgentResult {
        let correlation_id = correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut merged = metadata.unwrap_or_default();
        merged.insert("agent_name".to_string(), Value::from(self.agent_name.clone()));
        merged.insert("agent_type".to_string(), Value::from(self.agent_type.clone()));
        merged.insert("task_id".to_string(), Value::from(task_id.clone()));
        merged.insert("correlation_id".to_string(), Value::from(correlation_id.clone()));
        merged.insert("priority".to_string(), Value::from(priority.to_string()));

        let start = Instant::now();
        {
            let mut state = self.state.lock();
            if state.status == AgentStatus::Processing {
                let busy = state.current_task_id.clone().unwrap_or_default();
                drop(state);
                warn!(
                    agent = %self.agent_name,
                    task_id = %task_id,
                    running = %busy,
                    "Envelope is busy; rejecting task"
                );
                return AgentResult::failed(
                    AgentStatus::Failed,
                    AgentError::Busy(busy).to_string(),
                    0.0,
                    self.agent_type.clone(),
                    merged,
                );
            }
            state.status = AgentStatus::Processing;
            state.current_task_id = Some(task_id.clone());
            state.start_time = Some(start);
        }
        let _reset = ResetGuard { state: &self.state };

        debug!(
            agent = %self.agent_name,
            task_id = %task_id,
            correlation_id = %correlation_id,
            priority = %priority,
            "Task started"
        );

        let ctx = TaskContext {
            task_id: task_id.clone(),
            correlation_id,
            priority,
            agent_name: self.agent_name.clone(),
            agent_type: self.agent_type.clone(),
            metadata: merged.clone(),
        };
        let cancel = CancellationToken::new();
        let outcome = timeout(
            self.timeout,
            self.agent.process(&ctx, payload, cancel.child_token()),
        )
        .await;
        let elapsed = start.elapsed().as_secs_f64();

        let result = match outcome {
            Ok(Ok(data)) => {
                debug!(agent = %self.agent_name, task_id = %task_id, elapsed, "Task completed");
                AgentResult::completed(data, elapsed, self.agent_type.clone(), merged)
            }
            Ok(Err(err)) => {
                warn!(
                    agent = %self.agent_name,
                    task_id = %task_id,
                    error = %err,
                    elapsed,
                    "Task failed"
                );
                AgentResult::failed(
                    AgentStatus::Failed,
                    err.to_string(),
                    elapsed,
                    self.agent_type.clone(),
                    merged,
                )
            }
            Err(_) => {
                cancel.cancel();
                let seconds = self.timeout.as_secs_f64();
                warn!(
                    agent = %self.agent_name,
                    task_id = %task_id,
                    timeout_seconds = seconds,
                    "Task timed out"
                );
                AgentResult::failed(
                    AgentStatus::Timeout,
                    AgentError::Timeout(seconds).to_string(),
                    elapsed,
                    self.agent_type.clone(),
                    merged,
                )
            }
        };

        {
            let mut state = self.state.lock();
            state.status = result.status;
            state.last_outcome = Some(result.status);
        }
        result
    }
}

impl std::fmt::Debug for ExecutionEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEnvelope")
            .field("agent_name", &self.agent_name)
            .field("agent_type", &self.agent_type)
            .field("timeout", &self.timeout)
            .field("state", &*self.state.lock())
            .finish()
    }
}
