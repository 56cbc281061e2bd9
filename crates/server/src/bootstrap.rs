use std::sync::Arc;

use tally_chat::{
    conversation_dispatcher, ChatTransport, NoopTransport, ReconnectPolicy, StdioTransport,
    TransportRunner,
};
use tally_core::config::{AppConfig, ConfigError, LoadOptions, TransportKind};
use tally_core::flows::{
    CatalogError, ConversationEngine, ConversationStore, EngineSettings, FlowCatalog,
};
use tally_db::{connect_from_config, migrations, DbPool, SqlLedger};
use tally_rates::{ClientBuildError, HttpRateProvider};
use thiserror::Error;
use tracing::info;

pub type Engine = ConversationEngine<SqlLedger, HttpRateProvider>;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<Engine>,
    pub runner: TransportRunner,
}

impl Application {
    pub fn store(&self) -> &Arc<ConversationStore> {
        self.engine.store()
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error(transparent)]
    RateClient(#[from] ClientBuildError),
    #[error("flow catalog is invalid: {0}")]
    Catalog(#[from] CatalogError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let catalog = FlowCatalog::standard(&config.conversation.display_codes()?)?;
    let rates = HttpRateProvider::from_config(&config.rates)?;
    let engine = Arc::new(ConversationEngine::new(
        Arc::new(catalog),
        Arc::new(ConversationStore::new(config.conversation.idle_timeout())),
        Arc::new(SqlLedger::new(db_pool.clone())),
        Arc::new(rates),
        EngineSettings { max_reprompts: config.conversation.max_reprompts() },
    ));

    let runner = TransportRunner::new(
        transport_for(config.chat.transport),
        Arc::new(conversation_dispatcher(Arc::clone(&engine))),
        ReconnectPolicy::from(&config.chat),
    )
    .with_max_in_flight(config.chat.max_in_flight);

    info!(
        event_name = "system.bootstrap.engine_ready",
        correlation_id = "bootstrap",
        rate_service = %config.rates.service_url,
        transport = ?config.chat.transport,
        idle_timeout_secs = config.conversation.idle_timeout_secs,
        "conversation engine ready"
    );

    Ok(Application { config, db_pool, engine, runner })
}

fn transport_for(kind: TransportKind) -> Arc<dyn ChatTransport> {
    match kind {
        TransportKind::Noop => Arc::new(NoopTransport),
        TransportKind::Stdio => Arc::new(StdioTransport::stdio()),
    }
}
