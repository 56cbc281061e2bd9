pub mod config;
pub mod doctor;
pub mod grant_admin;
pub mod migrate;
pub mod seed;
pub mod start;

use std::path::PathBuf;
use std::sync::OnceLock;

use serde::Serialize;
use tally_core::config::{AppConfig, LoadOptions};
use tally_db::{connect_from_config, migrations, DbPool};
use tokio::runtime::Runtime;

static CONFIG_FILE: OnceLock<PathBuf> = OnceLock::new();

/// Pins every command in this process to an explicit config file, which then must exist.
pub fn use_config_file(path: PathBuf) {
    let _ = CONFIG_FILE.set(path);
}

pub(crate) fn load_options() -> LoadOptions {
    match CONFIG_FILE.get() {
        Some(path) => {
            LoadOptions { config_path: Some(path.clone()), require_file: true, ..LoadOptions::default() }
        }
        None => LoadOptions::default(),
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    command: &'a str,
    status: &'static str,
    error_class: Option<&'a str>,
    message: String,
}

impl Envelope<'_> {
    fn render(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|error| {
            serde_json::json!({
                "command": self.command,
                "status": "error",
                "error_class": "serialization",
                "message": error.to_string(),
            })
            .to_string()
        })
    }
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let envelope = Envelope { command, status: "ok", error_class: None, message: message.into() };
        Self { exit_code: 0, output: envelope.render() }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let envelope = Envelope {
            command,
            status: "error",
            error_class: Some(error_class),
            message: message.into(),
        };
        Self { exit_code, output: envelope.render() }
    }

    fn from_step(command: &str, (error_class, message, exit_code): StepFailure) -> Self {
        Self::failure(command, error_class, message, exit_code)
    }
}

/// Failure raised inside a command's async body: `(error_class, message, exit_code)`.
pub(crate) type StepFailure = (&'static str, String, u8);

pub(crate) fn load_config(command: &str) -> Result<AppConfig, CommandResult> {
    AppConfig::load(load_options()).map_err(|error| {
        CommandResult::failure(command, "config_validation", format!("configuration issue: {error}"), 2)
    })
}

/// Runs `body` on a fresh current-thread runtime and folds runtime setup errors into the result.
pub(crate) fn block_on<T, F>(command: &str, body: F) -> Result<T, CommandResult>
where
    F: std::future::Future<Output = Result<T, StepFailure>>,
{
    let runtime = runtime(command)?;
    runtime.block_on(body).map_err(|failure| CommandResult::from_step(command, failure))
}

pub(crate) fn runtime(command: &str) -> Result<Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(command, "runtime_init", format!("async runtime unavailable: {error}"), 3)
    })
}

/// Connects and applies pending migrations.
pub(crate) async fn migrated_pool(config: &AppConfig) -> Result<DbPool, StepFailure> {
    let pool = connect_from_config(&config.database)
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
    migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string(), 5u8))?;
    Ok(pool)
}
