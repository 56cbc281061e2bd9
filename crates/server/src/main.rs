mod bootstrap;
mod health;
mod sweeper;

use std::time::Duration;

use anyhow::Result;
use tally_core::config::{AppConfig, LoadOptions, LogFormat, TransportKind};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging needs the config, so it is loaded before bootstrap.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let store = app.store().clone();

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
        store.clone(),
    )
    .await?;

    let sweeper = sweeper::spawn(
        store,
        Duration::from_secs(app.config.conversation.sweep_interval_secs),
    );

    let transport = app.config.chat.transport;
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let runner = app.runner;
    let mut runner_task = tokio::spawn(async move {
        if let Err(error) = runner.start().await {
            tracing::warn!(
                event_name = "system.server.transport_gave_up",
                correlation_id = "bootstrap",
                error = %error,
                "chat transport stopped; process stays up for health checks"
            );
        }
    });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        transport = ?transport,
        "tally-server started"
    );

    // A stdio session ends with its input; other transports run until ctrl-c.
    if transport == TransportKind::Stdio {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => signal?,
            _ = &mut runner_task => {}
        }
    } else {
        tokio::signal::ctrl_c().await?;
    }

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = grace.as_secs(),
        "tally-server stopping"
    );

    if !runner_task.is_finished() && tokio::time::timeout(grace, &mut runner_task).await.is_err() {
        runner_task.abort();
    }
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    app.db_pool.close().await;

    Ok(())
}
