use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use tally_core::config::AppConfig;
use toml::Value;

use crate::commands::load_options;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

fn field(key: &'static str, value: impl ToString, env_keys: &'static [&'static str]) -> Field {
    Field { key, value: value.to_string(), env_keys }
}

pub fn run() -> String {
    let options = load_options();
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = options.config_path.or_else(detect_config_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let rates_table = config
        .rates
        .table
        .iter()
        .map(|(code, rate)| format!("{code}={rate}"))
        .collect::<Vec<_>>()
        .join(", ");

    vec![
        field("database.url", &config.database.url, &["TALLY_DATABASE_URL"]),
        field(
            "database.max_connections",
            config.database.max_connections,
            &["TALLY_DATABASE_MAX_CONNECTIONS"],
        ),
        field("database.timeout_secs", config.database.timeout_secs, &["TALLY_DATABASE_TIMEOUT_SECS"]),
        field(
            "conversation.idle_timeout_secs",
            config.conversation.idle_timeout_secs,
            &["TALLY_CONVERSATION_IDLE_TIMEOUT_SECS"],
        ),
        field(
            "conversation.sweep_interval_secs",
            config.conversation.sweep_interval_secs,
            &["TALLY_CONVERSATION_SWEEP_INTERVAL_SECS"],
        ),
        field(
            "conversation.max_reprompts",
            config.conversation.max_reprompts,
            &["TALLY_CONVERSATION_MAX_REPROMPTS"],
        ),
        field(
            "conversation.display_currencies",
            config.conversation.display_currencies.join(", "),
            &["TALLY_CONVERSATION_DISPLAY_CURRENCIES"],
        ),
        field("rates.service_url", &config.rates.service_url, &["TALLY_RATES_SERVICE_URL"]),
        field("rates.timeout_secs", config.rates.timeout_secs, &["TALLY_RATES_TIMEOUT_SECS"]),
        field(
            "rates.api_key",
            config.rates.api_key.as_ref().map_or_else(
                || "<unset>".to_string(),
                |key| redact_secret(key.expose_secret()),
            ),
            &["TALLY_RATES_API_KEY"],
        ),
        field("rates.bind_address", &config.rates.bind_address, &["TALLY_RATES_BIND_ADDRESS"]),
        field("rates.port", config.rates.port, &["TALLY_RATES_PORT"]),
        field("rates.source", format!("{:?}", config.rates.source), &["TALLY_RATES_SOURCE"]),
        field("rates.table", rates_table, &[]),
        field("chat.transport", format!("{:?}", config.chat.transport), &["TALLY_CHAT_TRANSPORT"]),
        field("chat.max_in_flight", config.chat.max_in_flight, &["TALLY_CHAT_MAX_IN_FLIGHT"]),
        field(
            "chat.max_reconnect_attempts",
            config.chat.max_reconnect_attempts,
            &["TALLY_CHAT_MAX_RECONNECT_ATTEMPTS"],
        ),
        field("server.bind_address", &config.server.bind_address, &["TALLY_SERVER_BIND_ADDRESS"]),
        field(
            "server.health_check_port",
            config.server.health_check_port,
            &["TALLY_SERVER_HEALTH_CHECK_PORT"],
        ),
        field(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs,
            &["TALLY_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        field("logging.level", &config.logging.level, &["TALLY_LOGGING_LEVEL", "TALLY_LOG_LEVEL"]),
        field(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["TALLY_LOGGING_FORMAT", "TALLY_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    ["tally.toml", "config/tally.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps the first two characters so operators can tell keys apart.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    let prefix: String = trimmed.chars().take(2).collect();
    format!("{prefix}***")
}
