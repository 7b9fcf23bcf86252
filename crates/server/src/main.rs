mod bootstrap;
mod health;
mod wizard;

use std::time::Duration;

use anyhow::Result;
use wrench_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use tracing::Level;
    use wrench_core::config::LogFormat::*;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let application = bootstrap::bootstrap_with_config(config)?;
    let server = application.config.server.clone();

    health::spawn(&server.bind_address, server.health_check_port, application.app.clone())
        .await?;

    let slack_runner = application.slack_runner;
    let mut runner = tokio::spawn(async move { slack_runner.start().await });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        flows = ?application.app.flow_registry().names(),
        wizard = application.wizard.name(),
        "wrench-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = server.graceful_shutdown_secs,
        "wrench-server stopping"
    );

    let grace = Duration::from_secs(server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, &mut runner).await {
        Ok(Ok(result)) => result?,
        Ok(Err(join_error)) => {
            tracing::warn!(error = %join_error, "socket runner task failed");
        }
        Err(_) => {
            tracing::warn!(
                event_name = "system.server.shutdown_timeout",
                correlation_id = "shutdown",
                "socket runner still active after grace period; aborting"
            );
            runner.abort();
        }
    }

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
