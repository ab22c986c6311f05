//! Background health monitoring of agent instances

use std::sync::{Arc, Weak};
use std::time::Duration;

use lexcore_config::HealthConfig;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::instance::AgentInstance;
use crate::models::HealthReport;
use crate::registry::AgentRegistry;

/// Configuration for health checking
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Whether the background loop is started
    pub enabled: bool,
    /// Time between scans
    pub interval: Duration,
    /// Deadline for one probe; probes are unbounded when absent
    pub probe_timeout: Option<Duration>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(300),
            probe_timeout: None,
        }
    }
}

impl From<&HealthConfig> for HealthCheckConfig {
    fn from(config: &HealthConfig) -> Self {
        Self {
            enabled: config.enabled,
            interval: config.interval(),
            probe_timeout: config.probe_timeout(),
        }
    }
}

/// Outcome of one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthScanReport {
    /// Instances probed
    pub checked: usize,
    /// Instances that reported healthy
    pub healthy: usize,
    /// Instances that reported unhealthy, errored or timed out
    pub failed: usize,
}

async fn probe(
    instance: &AgentInstance,
    probe_timeout: Option<Duration>,
) -> Result<HealthReport, AgentError> {
    let check = instance.agent().health_check();
    match probe_timeout {
        Some(limit) => timeout(limit, check)
            .await
            .map_err(|_| AgentError::health_check_failed(format!(
                "probe timed out after {:.3}s",
                limit.as_secs_f64()
            )))?,
        None => check.await,
    }
}

impl AgentRegistry {
    /// Probe every pooled instance once
    ///
    /// A healthy probe returns the instance to `Idle` (a running task is left
    /// alone) and stamps the agent's `last_health_check`. An unhealthy report,
    /// an error or a timed out probe marks the instance `Failed` and counts an
    /// error on the agent. One instance's failure never stops the scan.
    pub async fn run_health_check(&self) -> HealthScanReport {
        let probe_timeout = self.config().health.probe_timeout;
        let mut report = HealthScanReport::default();

        for instance in self.pool().all() {
            report.checked += 1;
            let failure = match probe(&instance, probe_timeout).await {
                Ok(health) if health.healthy => None,
                Ok(health) => Some(
                    health
                        .reason()
                        .map(|reason| format!("Health check failed: {}", reason))
                        .unwrap_or_else(|| "Health check reported unhealthy".to_string()),
                ),
                Err(err) => Some(err.to_string()),
            };

            match &failure {
                None => report.healthy += 1,
                Some(reason) => {
                    report.failed += 1;
                    warn!(
                        agent_id = %instance.agent_id(),
                        instance_id = %instance.instance_id(),
                        reason = %reason,
                        "Agent instance unhealthy"
                    );
                }
            }
            instance.apply_health(failure.is_none());
            self.record_health(instance.agent_id(), failure.as_deref());
        }

        debug!(
            checked = report.checked,
            healthy = report.healthy,
            failed = report.failed,
            "Health scan finished"
        );
        report
    }

    /// Spawn the periodic health loop
    ///
    /// The loop holds only a weak reference and ends when the registry is
    /// dropped or the monitor is stopped. Calling this again while a loop runs
    /// is a no-op; a stopped monitor can be started again.
    pub fn start_health_monitor(self: &Arc<Self>) {
        let mut monitor = self.monitor.lock();
        if monitor.as_ref().is_some_and(MonitorHandle::is_running) {
            debug!("Health monitor already running");
            return;
        }
        let interval = self.config().health.interval;
        let cancel = CancellationToken::new();
        let task = HealthMonitor::new(Arc::downgrade(self), cancel.clone(), interval).spawn();
        *monitor = Some(MonitorHandle { cancel, task });
        info!(interval_seconds = interval.as_secs_f64(), "Health monitor started");
    }

    /// Cancel the health loop and wait for it to finish
    pub async fn stop_health_monitor(&self) {
        let handle = self.monitor.lock().take();
        if let Some(MonitorHandle { cancel, task }) = handle {
            cancel.cancel();
            if let Err(err) = task.await {
                warn!(error = %err, "Health monitor task ended abnormally");
            }
            debug!("Health monitor stopped");
        }
    }

    /// Whether the background loop is running
    pub fn health_monitor_running(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .is_some_and(MonitorHandle::is_running)
    }
}

/// A spawned loop and the token that stops it
pub(crate) struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Periodic scan loop
pub struct HealthMonitor {
    registry: Weak<AgentRegistry>,
    cancel: CancellationToken,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(registry: Weak<AgentRegistry>, cancel: CancellationToken, interval: Duration) -> Self {
        Self {
            registry,
            cancel,
            interval,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Scan every `interval` until cancelled or the registry is gone
    pub async fn run(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(registry) = self.registry.upgrade() else {
                break;
            };
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                report = registry.run_health_check() => {
                    if report.failed > 0 {
                        info!(failed = report.failed, checked = report.checked, "Health scan found failures");
                    }
                }
            }
        }
        debug!("Health monitor loop exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Agent, AgentType};
    use crate::error::Result;
    use crate::models::{
        AgentCapability, AgentOutput, AgentStatus, TaskContext, TaskPayload, TaskPriority,
    };
    use crate::registry::{AgentRegistration, DispatchFilters, RegistryConfig};
    use async_trait::async_trait;
    use lexcore_di::DIContainer;
    use parking_lot::Mutex;

    /// Health is scripted by the test
    struct Probed {
        health: Arc<Mutex<std::result::Result<bool, String>>>,
        delay: Duration,
    }

    #[async_trait]
    impl Agent for Probed {
        async fn process(
            &self,
            _ctx: &TaskContext,
            _payload: &TaskPayload,
            _cancel: CancellationToken,
        ) -> Result<AgentOutput> {
            Ok(AgentOutput::new())
        }

        async fn health_check(&self) -> Result<HealthReport> {
            tokio::time::sleep(self.delay).await;
            let outcome = self.health.lock().clone();
            match outcome {
                Ok(true) => Ok(HealthReport::healthy()),
                Ok(false) => Ok(HealthReport::unhealthy("index offline")),
                Err(message) => Err(AgentError::internal(message)),
            }
        }
    }

    async fn registry_with(
        config: RegistryConfig,
        agents: &[(&str, Arc<Mutex<std::result::Result<bool, String>>>, Duration)],
    ) -> Arc<AgentRegistry> {
        let registry = Arc::new(AgentRegistry::new(Arc::new(DIContainer::new()), config));
        for (id, health, delay) in agents {
            let agent_type = AgentType::shared(
                "Probed",
                Arc::new(Probed {
                    health: Arc::clone(health),
                    delay: *delay,
                }),
            );
            registry
                .register_agent(
                    agent_type,
                    AgentRegistration::new()
                        .agent_id(*id)
                        .capability(AgentCapability::Reasoning)
                        .jurisdiction(*id),
                )
                .unwrap();
            registry
                .execute_with_best_agent(
                    AgentCapability::Reasoning,
                    TaskPayload::new(),
                    TaskPriority::Normal,
                    DispatchFilters::new().jurisdiction(*id),
                )
                .await
                .unwrap();
        }
        registry
    }

    fn health(value: std::result::Result<bool, String>) -> Arc<Mutex<std::result::Result<bool, String>>> {
        Arc::new(Mutex::new(value))
    }

    #[tokio::test]
    async fn test_scan_continues_past_failures() {
        let healthy = health(Ok(true));
        let unhealthy = health(Ok(false));
        let erroring = health(Err("probe crashed".to_string()));
        let registry = registry_with(
            RegistryConfig::default(),
            &[
                ("erroring", erroring, Duration::ZERO),
                ("unhealthy", unhealthy, Duration::ZERO),
                ("healthy", Arc::clone(&healthy), Duration::ZERO),
            ],
        )
        .await;

        let report = registry.run_health_check().await;
        assert_eq!(
            report,
            HealthScanReport {
                checked: 3,
                healthy: 1,
                failed: 2
            }
        );
        assert_eq!(registry.health_failure_count(), 2);

        let erroring = registry.get_agent_metadata("erroring").unwrap();
        assert_eq!(erroring.status, AgentStatus::Failed);
        assert_eq!(erroring.error_count, 1);
        assert!(erroring.last_error.unwrap().contains("probe crashed"));

        let unhealthy = registry.get_agent_metadata("unhealthy").unwrap();
        assert!(unhealthy.last_error.unwrap().contains("index offline"));

        let ok = registry.get_agent_metadata("healthy").unwrap();
        assert_eq!(ok.status, AgentStatus::Idle);
        assert!(ok.last_health_check.is_some());

        let statuses: Vec<_> = registry.instances().iter().map(|i| i.status).collect();
        assert_eq!(
            statuses,
            vec![AgentStatus::Failed, AgentStatus::Failed, AgentStatus::Idle]
        );
    }

    #[tokio::test]
    async fn test_healthy_probe_revives_failed_instance() {
        let flaky = health(Ok(false));
        let registry = registry_with(
            RegistryConfig::default(),
            &[("flaky", Arc::clone(&flaky), Duration::ZERO)],
        )
        .await;

        registry.run_health_check().await;
        assert_eq!(registry.instances()[0].status, AgentStatus::Failed);

        *flaky.lock() = Ok(true);
        registry.run_health_check().await;
        assert_eq!(registry.instances()[0].status, AgentStatus::Idle);
        assert_eq!(
            registry.get_agent_metadata("flaky").unwrap().status,
            AgentStatus::Idle
        );
    }

    #[tokio::test]
    async fn test_probe_timeout_counts_as_failure() {
        let config = RegistryConfig {
            health: HealthCheckConfig {
                probe_timeout: Some(Duration::from_millis(20)),
                ..HealthCheckConfig::default()
            },
            ..RegistryConfig::default()
        };
        let registry = registry_with(config, &[("slow", health(Ok(true)), Duration::from_secs(5))]).await;

        let report = registry.run_health_check().await;
        assert_eq!(report.failed, 1);
        assert!(registry
            .get_agent_metadata("slow")
            .unwrap()
            .last_error
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_loop_scans_until_stopped() {
        let unhealthy = health(Ok(false));
        let config = RegistryConfig {
            health: HealthCheckConfig {
                interval: Duration::from_secs(60),
                ..HealthCheckConfig::default()
            },
            ..RegistryConfig::default()
        };
        let registry = registry_with(config, &[("sick", unhealthy, Duration::ZERO)]).await;

        registry.start_health_monitor();
        assert!(registry.health_monitor_running());
        assert_eq!(registry.health_failure_count(), 0);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(registry.health_failure_count(), 1);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(registry.health_failure_count(), 2);

        registry.stop_health_monitor().await;
        assert!(!registry.health_monitor_running());
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(registry.health_failure_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_restarts_after_stop() {
        let unhealthy = health(Ok(false));
        let config = RegistryConfig {
            health: HealthCheckConfig {
                interval: Duration::from_secs(60),
                ..HealthCheckConfig::default()
            },
            ..RegistryConfig::default()
        };
        let registry = registry_with(config, &[("sick", unhealthy, Duration::ZERO)]).await;

        registry.start_health_monitor();
        registry.stop_health_monitor().await;
        assert!(!registry.health_monitor_running());

        registry.start_health_monitor();
        tokio::task::yield_now().await;
        assert!(registry.health_monitor_running());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(registry.health_failure_count(), 1);

        registry.stop_health_monitor().await;
        assert!(!registry.health_monitor_running());
    }
}
