// Command definitions and handlers

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use lexcore_agents::{
    AgentCapability, AgentMetadata, DispatchFilters, OrchestratorContext, TaskPayload,
    TaskPriority,
};
use lexcore_config::{ConfigManager, OrchestratorConfig};
use serde_json::json;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "lexcore")]
#[command(about = "Capability-based dispatch for legal analysis agents", version)]
pub struct Cli {
    /// Configuration file (defaults to the user configuration directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List registered agents with their ranking metrics
    Agents {
        /// Only agents indexed under this capability
        #[arg(long)]
        capability: Option<AgentCapability>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Dispatch one task to the best agent for a capability
    Run {
        /// Capability tag, e.g. citation_analysis
        #[arg(long)]
        capability: AgentCapability,

        /// Task payload as a JSON object
        #[arg(short, long)]
        payload: String,

        #[arg(long)]
        practice_area: Option<String>,

        #[arg(long)]
        jurisdiction: Option<String>,

        #[arg(long, default_value = "normal")]
        priority: TaskPriority,

        /// Candidates to try before giving up
        #[arg(long)]
        max_candidates: Option<usize>,

        #[arg(long)]
        correlation_id: Option<String>,
    },
    /// Construct every agent and run one health scan
    Health,
}

/// Load configuration from `path` or the default location
pub fn load_config(path: Option<&Path>) -> anyhow::Result<OrchestratorConfig> {
    let manager = match path {
        Some(path) => ConfigManager::with_path(path.to_path_buf()),
        None => ConfigManager::new(),
    };
    manager
        .load_config()
        .with_context(|| format!("failed to load {}", manager.config_path().display()))
}

/// Run a command against a bootstrapped context and render its output
pub async fn execute(command: Commands, context: &OrchestratorContext) -> anyhow::Result<String> {
    debug!(command = ?command, "Executing command");
    match command {
        Commands::Agents { capability, json } => {
            let agents = match capability {
                Some(capability) => context.registry().find_agents_by_capability(
                    capability,
                    None,
                    None,
                    usize::MAX,
                ),
                None => context.registry().all_agent_metadata(),
            };
            if json {
                Ok(serde_json::to_string_pretty(&agents)?)
            } else {
                Ok(render_agents(&agents))
            }
        }
        Commands::Run {
            capability,
            payload,
            practice_area,
            jurisdiction,
            priority,
            max_candidates,
            correlation_id,
        } => {
            let payload = parse_payload(&payload)?;
            let filters = DispatchFilters {
                practice_area,
                jurisdiction,
                max_candidates,
                metadata: None,
                correlation_id,
            };
            let result = context
                .registry()
                .execute_with_best_agent(capability, payload, priority, filters)
                .await?;
            Ok(serde_json::to_string_pretty(&result)?)
        }
        Commands::Health => {
            let registry = context.registry();
            registry.warm_up().await?;
            let report = registry.run_health_check().await;
            let agents: Vec<_> = registry
                .all_agent_metadata()
                .into_iter()
                .map(|metadata| {
                    json!({
                        "agent_id": metadata.agent_id,
                        "name": metadata.name,
                        "status": metadata.status,
                        "last_health_check": metadata.last_health_check,
                        "last_error": metadata.last_error,
                    })
                })
                .collect();
            Ok(serde_json::to_string_pretty(&json!({
                "report": report,
                "agents": agents,
            }))?)
        }
    }
}

fn parse_payload(raw: &str) -> anyhow::Result<TaskPayload> {
    let value: serde_json::Value = serde_json::from_str(raw).context("payload is not valid JSON")?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => bail!("payload must be a JSON object, got {}", other),
    }
}

/// Plain table of agents in the order given
pub fn render_agents(agents: &[AgentMetadata]) -> String {
    if agents.is_empty() {
        return "No agents registered".to_string();
    }
    let mut out = format!(
        "{:<38} {:<24} {:>7} {:>9} {:>6} {:>6}  {}\n",
        "ID", "NAME", "SUCCESS", "AVG(s)", "TASKS", "ERRORS", "CAPABILITIES"
    );
    for agent in agents {
        let capabilities: Vec<_> = agent.capabilities.iter().map(|c| c.as_str()).collect();
        let _ = writeln!(
            out,
            "{:<38} {:<24} {:>7.3} {:>9.3} {:>6} {:>6}  {}",
            agent.agent_id,
            agent.name,
            agent.success_rate,
            agent.avg_processing_time,
            agent.task_count,
            agent.error_count,
            capabilities.join(",")
        );
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from([
            "lexcore",
            "--config",
            "/tmp/lexcore.toml",
            "run",
            "--capability",
            "citation_analysis",
            "--payload",
            r#"{"text": "42 U.S.C. § 1983"}"#,
            "--jurisdiction",
            "us",
            "--priority",
            "high",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/lexcore.toml")));
        match cli.command {
            Commands::Run {
                capability,
                priority,
                jurisdiction,
                practice_area,
                ..
            } => {
                assert_eq!(capability, AgentCapability::CitationAnalysis);
                assert_eq!(priority, TaskPriority::High);
                assert_eq!(jurisdiction.as_deref(), Some("us"));
                assert!(practice_area.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_capability_is_rejected() {
        let result = Cli::try_parse_from([
            "lexcore",
            "run",
            "--capability",
            "mind_reading",
            "--payload",
            "{}",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_payload_must_be_an_object() {
        assert!(parse_payload(r#"{"text": "x"}"#).is_ok());
        assert!(parse_payload("[1, 2]").is_err());
        assert!(parse_payload("not json").is_err());
    }

    #[test]
    fn test_render_agents() {
        assert_eq!(render_agents(&[]), "No agents registered");

        let mut metadata = AgentMetadata::new("memo", "MemoEcho");
        metadata.capabilities.insert(AgentCapability::MemoryManagement);
        let table = render_agents(&[metadata]);
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[1].contains("MemoEcho"));
        assert!(lines[1].contains("memory_management"));
    }
}
