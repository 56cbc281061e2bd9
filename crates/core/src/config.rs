use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::currency::{CurrencyCode, Rate};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub conversation: ConversationConfig,
    pub rates: RatesConfig,
    pub chat: ChatConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ConversationConfig {
    /// Zero disables idle expiry.
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    /// Zero means unbounded.
    pub max_reprompts: u32,
    pub display_currencies: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct RatesConfig {
    pub service_url: String,
    pub timeout_secs: u64,
    pub api_key: Option<SecretString>,
    pub bind_address: String,
    pub port: u16,
    pub source: RateSourceKind,
    pub table: BTreeMap<String, Decimal>,
}

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub transport: TransportKind,
    pub max_in_flight: usize,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSourceKind {
    Static,
    Ledger,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Noop,
    Stdio,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub rates_service_url: Option<String>,
    pub rates_port: Option<u16>,
    pub transport: Option<TransportKind>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

fn standard_rate_table() -> BTreeMap<String, Decimal> {
    [("USD", 90), ("EUR", 100), ("RUB", 1)]
        .into_iter()
        .map(|(code, rate)| (code.to_owned(), Decimal::from(rate)))
        .collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://tally.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            conversation: ConversationConfig {
                idle_timeout_secs: 900,
                sweep_interval_secs: 60,
                max_reprompts: 5,
                display_currencies: vec!["RUB".to_string(), "EUR".to_string(), "USD".to_string()],
            },
            rates: RatesConfig {
                service_url: "http://127.0.0.1:5000".to_string(),
                timeout_secs: 5,
                api_key: None,
                bind_address: "127.0.0.1".to_string(),
                port: 5000,
                source: RateSourceKind::Static,
                table: standard_rate_table(),
            },
            chat: ChatConfig {
                transport: TransportKind::Noop,
                max_in_flight: 64,
                max_reconnect_attempts: 5,
                reconnect_base_delay_ms: 250,
                reconnect_max_delay_ms: 5_000,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl FromStr for RateSourceKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(Self::Static),
            "ledger" => Ok(Self::Ledger),
            other => Err(ConfigError::Validation(format!(
                "unsupported rate source `{other}` (expected static|ledger)"
            ))),
        }
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "noop" => Ok(Self::Noop),
            "stdio" => Ok(Self::Stdio),
            other => Err(ConfigError::Validation(format!(
                "unsupported chat transport `{other}` (expected noop|stdio)"
            ))),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl ConversationConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn max_reprompts(&self) -> Option<u32> {
        (self.max_reprompts > 0).then_some(self.max_reprompts)
    }

    pub fn display_codes(&self) -> Result<Vec<CurrencyCode>, ConfigError> {
        self.display_currencies
            .iter()
            .map(|raw| {
                CurrencyCode::parse(raw).map_err(|error| {
                    ConfigError::Validation(format!(
                        "conversation.display_currencies entry `{raw}` is invalid: {error}"
                    ))
                })
            })
            .collect()
    }
}

impl RatesConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The configured static table as typed entries.
    pub fn static_table(&self) -> Result<Vec<(CurrencyCode, Rate)>, ConfigError> {
        self.table
            .iter()
            .map(|(raw_code, raw_rate)| {
                let code = CurrencyCode::parse(raw_code).map_err(|error| {
                    ConfigError::Validation(format!("rates.table key `{raw_code}` is invalid: {error}"))
                })?;
                let rate = Rate::new(*raw_rate).map_err(|_| {
                    ConfigError::Validation(format!("rates.table.{code} must be greater than zero"))
                })?;
                Ok((code, rate))
            })
            .collect()
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("tally.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        let ConfigPatch { database, conversation, rates, chat, server, logging } = patch;

        if let Some(database) = database {
            merge(&mut self.database.url, database.url);
            merge(&mut self.database.max_connections, database.max_connections);
            merge(&mut self.database.timeout_secs, database.timeout_secs);
        }

        if let Some(conversation) = conversation {
            let target = &mut self.conversation;
            merge(&mut target.idle_timeout_secs, conversation.idle_timeout_secs);
            merge(&mut target.sweep_interval_secs, conversation.sweep_interval_secs);
            merge(&mut target.max_reprompts, conversation.max_reprompts);
            merge(&mut target.display_currencies, conversation.display_currencies);
        }

        if let Some(rates) = rates {
            let target = &mut self.rates;
            merge(&mut target.service_url, rates.service_url);
            merge(&mut target.timeout_secs, rates.timeout_secs);
            merge(&mut target.bind_address, rates.bind_address);
            merge(&mut target.port, rates.port);
            merge(&mut target.source, rates.source);
            merge(&mut target.table, rates.table);
            if let Some(api_key) = rates.api_key {
                target.api_key = Some(secret_value(api_key));
            }
        }

        if let Some(chat) = chat {
            let target = &mut self.chat;
            merge(&mut target.transport, chat.transport);
            merge(&mut target.max_in_flight, chat.max_in_flight);
            merge(&mut target.max_reconnect_attempts, chat.max_reconnect_attempts);
            merge(&mut target.reconnect_base_delay_ms, chat.reconnect_base_delay_ms);
            merge(&mut target.reconnect_max_delay_ms, chat.reconnect_max_delay_ms);
        }

        if let Some(server) = server {
            merge(&mut self.server.bind_address, server.bind_address);
            merge(&mut self.server.health_check_port, server.health_check_port);
            merge(&mut self.server.graceful_shutdown_secs, server.graceful_shutdown_secs);
        }

        if let Some(logging) = logging {
            merge(&mut self.logging.level, logging.level);
            merge(&mut self.logging.format, logging.format);
        }
    }

    /// `TALLY_<SECTION>_<FIELD>` variables; blank values are ignored.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        override_from_env(&mut self.database.url, "TALLY_DATABASE_URL")?;
        override_from_env(&mut self.database.max_connections, "TALLY_DATABASE_MAX_CONNECTIONS")?;
        override_from_env(&mut self.database.timeout_secs, "TALLY_DATABASE_TIMEOUT_SECS")?;

        let conversation = &mut self.conversation;
        override_from_env(&mut conversation.idle_timeout_secs, "TALLY_CONVERSATION_IDLE_TIMEOUT_SECS")?;
        override_from_env(
            &mut conversation.sweep_interval_secs,
            "TALLY_CONVERSATION_SWEEP_INTERVAL_SECS",
        )?;
        override_from_env(&mut conversation.max_reprompts, "TALLY_CONVERSATION_MAX_REPROMPTS")?;
        if let Some(value) = read_env("TALLY_CONVERSATION_DISPLAY_CURRENCIES") {
            conversation.display_currencies = value
                .split(',')
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(str::to_owned)
                .collect();
        }

        let rates = &mut self.rates;
        override_from_env(&mut rates.service_url, "TALLY_RATES_SERVICE_URL")?;
        override_from_env(&mut rates.timeout_secs, "TALLY_RATES_TIMEOUT_SECS")?;
        override_from_env(&mut rates.bind_address, "TALLY_RATES_BIND_ADDRESS")?;
        override_from_env(&mut rates.port, "TALLY_RATES_PORT")?;
        override_from_env(&mut rates.source, "TALLY_RATES_SOURCE")?;
        if let Some(value) = read_env("TALLY_RATES_API_KEY") {
            rates.api_key = Some(secret_value(value));
        }

        let chat = &mut self.chat;
        override_from_env(&mut chat.transport, "TALLY_CHAT_TRANSPORT")?;
        override_from_env(&mut chat.max_in_flight, "TALLY_CHAT_MAX_IN_FLIGHT")?;
        override_from_env(&mut chat.max_reconnect_attempts, "TALLY_CHAT_MAX_RECONNECT_ATTEMPTS")?;

        let server = &mut self.server;
        override_from_env(&mut server.bind_address, "TALLY_SERVER_BIND_ADDRESS")?;
        override_from_env(&mut server.health_check_port, "TALLY_SERVER_HEALTH_CHECK_PORT")?;
        override_from_env(&mut server.graceful_shutdown_secs, "TALLY_SERVER_GRACEFUL_SHUTDOWN_SECS")?;

        // Short aliases are accepted for the two settings operators touch most.
        for key in ["TALLY_LOG_LEVEL", "TALLY_LOGGING_LEVEL"] {
            override_from_env(&mut self.logging.level, key)?;
        }
        for key in ["TALLY_LOG_FORMAT", "TALLY_LOGGING_FORMAT"] {
            override_from_env(&mut self.logging.format, key)?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        merge(&mut self.database.url, overrides.database_url);
        merge(&mut self.logging.level, overrides.log_level);
        merge(&mut self.rates.service_url, overrides.rates_service_url);
        merge(&mut self.rates.port, overrides.rates_port);
        merge(&mut self.chat.transport, overrides.transport);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_conversation(&self.conversation)?;
        validate_rates(&self.rates)?;
        validate_chat(&self.chat)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("tally.toml"), PathBuf::from("config/tally.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Replaces every `${VAR}` with the value of `VAR`.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        let end = tail.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let var = &tail[..end];
        let value = env::var(var)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: var.to_owned() })?;
        output.push_str(&value);
        rest = &tail[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if conversation.idle_timeout_secs > 0 && conversation.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "conversation.sweep_interval_secs must be greater than zero when idle expiry is enabled"
                .to_string(),
        ));
    }

    if conversation.display_currencies.is_empty() {
        return Err(ConfigError::Validation(
            "conversation.display_currencies must list at least one currency".to_string(),
        ));
    }
    conversation.display_codes()?;

    Ok(())
}

fn validate_rates(rates: &RatesConfig) -> Result<(), ConfigError> {
    let url = rates.service_url.trim();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "rates.service_url must start with http:// or https://".to_string(),
        ));
    }

    if rates.timeout_secs == 0 || rates.timeout_secs > 60 {
        return Err(ConfigError::Validation("rates.timeout_secs must be in range 1..=60".to_string()));
    }

    if rates.port == 0 {
        return Err(ConfigError::Validation("rates.port must be greater than zero".to_string()));
    }

    let blank_key =
        rates.api_key.as_ref().map(|value| value.expose_secret().trim().is_empty()).unwrap_or(false);
    if blank_key {
        return Err(ConfigError::Validation(
            "rates.api_key must not be blank when set".to_string(),
        ));
    }

    if rates.source == RateSourceKind::Static && rates.table.is_empty() {
        return Err(ConfigError::Validation(
            "rates.table must not be empty when rates.source is static".to_string(),
        ));
    }
    rates.static_table()?;

    Ok(())
}

fn validate_chat(chat: &ChatConfig) -> Result<(), ConfigError> {
    if chat.max_in_flight == 0 {
        return Err(ConfigError::Validation(
            "chat.max_in_flight must be greater than zero".to_string(),
        ));
    }

    if chat.reconnect_base_delay_ms == 0 || chat.reconnect_base_delay_ms > chat.reconnect_max_delay_ms {
        return Err(ConfigError::Validation(
            "chat.reconnect_base_delay_ms must be in range 1..=chat.reconnect_max_delay_ms"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn merge<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn override_from_env<T: FromStr>(slot: &mut T, key: &str) -> Result<(), ConfigError> {
    let Some(value) = read_env(key) else {
        return Ok(());
    };
    *slot = value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_owned(), value })?;
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    conversation: Option<ConversationPatch>,
    rates: Option<RatesPatch>,
    chat: Option<ChatPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    idle_timeout_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    max_reprompts: Option<u32>,
    display_currencies: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RatesPatch {
    service_url: Option<String>,
    timeout_secs: Option<u64>,
    api_key: Option<String>,
    bind_address: Option<String>,
    port: Option<u16>,
    source: Option<RateSourceKind>,
    table: Option<BTreeMap<String, Decimal>>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatPatch {
    transport: Option<TransportKind>,
    max_in_flight: Option<usize>,
    max_reconnect_attempts: Option<u32>,
    reconnect_base_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
