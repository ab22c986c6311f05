// lexcore CLI entry point

use anyhow::Context;
use clap::Parser;
use lexcore_agents::OrchestratorContext;
use lexcore_cli::{execute, init_logging, load_config, Cli};
use tracing::error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.logging.level);

    let context = OrchestratorContext::bootstrap(config)
        .await
        .context("failed to start orchestrator")?;
    let outcome = execute(cli.command, &context).await;

    // shut down even when the command failed
    let shutdown = context.shutdown().await;
    if let Err(err) = &shutdown {
        error!(error = %err, "Orchestrator shutdown failed");
    }

    println!("{}", outcome?);
    shutdown.context("failed to persist agent metadata")?;
    Ok(())
}
