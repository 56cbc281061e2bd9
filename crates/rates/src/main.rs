use std::sync::Arc;

use anyhow::Result;
use tally_core::config::{AppConfig, LoadOptions, LogFormat, RateSourceKind};
use tally_core::rates::{LedgerRateProvider, RateProvider, StaticRateProvider};
use tally_db::{connect_from_config, migrations, SqlLedger};
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
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let provider: Arc<dyn RateProvider> = match config.rates.source {
        RateSourceKind::Static => Arc::new(StaticRateProvider::new(config.rates.static_table()?)),
        RateSourceKind::Ledger => {
            let pool = connect_from_config(&config.database).await?;
            migrations::run_pending(&pool).await?;
            Arc::new(LedgerRateProvider::new(Arc::new(SqlLedger::new(pool))))
        }
    };

    let address = format!("{}:{}", config.rates.bind_address, config.rates.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.rates.started",
        bind_address = %address,
        source = ?config.rates.source,
        auth = config.rates.api_key.is_some(),
        "rate service listening"
    );

    axum::serve(listener, tally_rates::router(provider, config.rates.api_key.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!(event_name = "system.rates.stopped", "rate service stopped");
    Ok(())
}
