use std::env;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use tally_cli::commands::{doctor, grant_admin, migrate, seed, start};
use tempfile::TempDir;

#[test]
fn start_returns_success_with_valid_env() {
    with_env(&[("TALLY_DATABASE_URL", "sqlite::memory:")], || {
        let result = start::run();
        assert_eq!(result.exit_code, 0, "expected successful start preflight");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "start");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn start_returns_config_failure_for_non_sqlite_database() {
    with_env(&[("TALLY_DATABASE_URL", "postgres://localhost/tally")], || {
        let result = start::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "start");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn start_rejects_invalid_display_currencies() {
    with_env(
        &[
            ("TALLY_DATABASE_URL", "sqlite::memory:"),
            ("TALLY_CONVERSATION_DISPLAY_CURRENCIES", "USD, US-D"),
        ],
        || {
            let result = start::run();
            assert_eq!(result.exit_code, 2);
            assert_eq!(parse_payload(&result.output)["status"], "error");
        },
    );
}

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("TALLY_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let dir = TempDir::new().expect("temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("tally.db").display());

    with_env(&[("TALLY_DATABASE_URL", url.as_str())], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["command"], "seed");
        assert_eq!(first_payload["status"], "ok");
        assert_eq!(
            first_payload["message"],
            "currencies seeded: inserted [EUR, RUB, USD], already present []"
        );

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        let second_payload = parse_payload(&second.output);
        assert_eq!(
            second_payload["message"],
            "currencies seeded: inserted [], already present [EUR, RUB, USD]"
        );
    });
}

#[test]
fn grant_admin_is_idempotent() {
    let dir = TempDir::new().expect("temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("tally.db").display());

    with_env(&[("TALLY_DATABASE_URL", url.as_str())], || {
        for _ in 0..2 {
            let result = grant_admin::run("424242");
            assert_eq!(result.exit_code, 0, "expected grant to succeed");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "grant-admin");
            assert_eq!(payload["message"], "424242 is now an administrator");
        }
    });
}

#[test]
fn grant_admin_rejects_blank_identity() {
    with_env(&[("TALLY_DATABASE_URL", "sqlite::memory:")], || {
        let result = grant_admin::run("   ");
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "invalid_argument");
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[("TALLY_DATABASE_URL", "postgres://localhost/tally")], || {
        let report = parse_payload(&doctor::run(true));
        assert_eq!(report["overall_status"], "fail");

        let checks = report["checks"].as_array().expect("checks");
        assert_eq!(checks[0]["name"], "config_validation");
        assert_eq!(checks[0]["status"], "fail");
        assert!(checks[1..].iter().all(|check| check["status"] == "skipped"));
    });
}

#[test]
fn doctor_reports_unreachable_rate_service() {
    with_env(
        &[
            ("TALLY_DATABASE_URL", "sqlite::memory:"),
            ("TALLY_RATES_SERVICE_URL", "http://127.0.0.1:9"),
            ("TALLY_RATES_TIMEOUT_SECS", "1"),
        ],
        || {
            let report = parse_payload(&doctor::run(true));
            assert_eq!(report["overall_status"], "fail");

            let checks = report["checks"].as_array().expect("checks");
            let status_of = |name: &str| {
                checks
                    .iter()
                    .find(|check| check["name"] == name)
                    .map(|check| check["status"].clone())
                    .unwrap_or(Value::Null)
            };
            assert_eq!(status_of("config_validation"), "pass");
            assert_eq!(status_of("flow_catalog"), "pass");
            assert_eq!(status_of("database_connectivity"), "pass");
            assert_eq!(status_of("rate_service"), "fail");
        },
    );
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "TALLY_DATABASE_URL",
        "TALLY_DATABASE_MAX_CONNECTIONS",
        "TALLY_DATABASE_TIMEOUT_SECS",
        "TALLY_CONVERSATION_IDLE_TIMEOUT_SECS",
        "TALLY_CONVERSATION_SWEEP_INTERVAL_SECS",
        "TALLY_CONVERSATION_MAX_REPROMPTS",
        "TALLY_CONVERSATION_DISPLAY_CURRENCIES",
        "TALLY_RATES_SERVICE_URL",
        "TALLY_RATES_TIMEOUT_SECS",
        "TALLY_RATES_API_KEY",
        "TALLY_RATES_BIND_ADDRESS",
        "TALLY_RATES_PORT",
        "TALLY_RATES_SOURCE",
        "TALLY_CHAT_TRANSPORT",
        "TALLY_CHAT_MAX_IN_FLIGHT",
        "TALLY_CHAT_MAX_RECONNECT_ATTEMPTS",
        "TALLY_SERVER_BIND_ADDRESS",
        "TALLY_SERVER_HEALTH_CHECK_PORT",
        "TALLY_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "TALLY_LOGGING_LEVEL",
        "TALLY_LOGGING_FORMAT",
        "TALLY_LOG_LEVEL",
        "TALLY_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
