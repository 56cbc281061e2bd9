use serde::Serialize;
use tally_core::config::AppConfig;
use tally_core::domain::currency::CurrencyCode;
use tally_core::flows::FlowCatalog;
use tally_core::rates::{RateError, RateProvider};
use tally_db::{connect_from_config, ping};
use tally_rates::HttpRateProvider;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            serde_json::json!({
                "overall_status": CheckStatus::Fail,
                "summary": "doctor serialization failed",
                "error": error.to_string(),
            })
            .to_string()
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(crate::commands::load_options()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.push(check_flow_catalog(&config));
            checks.extend(check_runtime_dependencies(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.push(DoctorCheck::skipped("flow_catalog"));
            checks.push(DoctorCheck::skipped("database_connectivity"));
            checks.push(DoctorCheck::skipped("rate_service"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_flow_catalog(config: &AppConfig) -> DoctorCheck {
    let built = config
        .conversation
        .display_codes()
        .map_err(|error| error.to_string())
        .and_then(|codes| FlowCatalog::standard(&codes).map_err(|error| error.to_string()));

    match built {
        Ok(catalog) => DoctorCheck::pass(
            "flow_catalog",
            format!("{} trigger rules validated", catalog.rules().len()),
        ),
        Err(error) => DoctorCheck::fail("flow_catalog", error),
    }
}

fn check_runtime_dependencies(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let details = format!("failed to initialize async runtime: {error}");
            return vec![
                DoctorCheck::fail("database_connectivity", details.clone()),
                DoctorCheck::fail("rate_service", details),
            ];
        }
    };

    let (database, rates) = runtime
        .block_on(async { tokio::join!(check_database_connectivity(config), check_rate_service(config)) });
    vec![database, rates]
}

async fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let pool = match connect_from_config(&config.database).await {
        Ok(pool) => pool,
        Err(error) => {
            return DoctorCheck::fail(
                "database_connectivity",
                format!("failed to connect to database: {error}"),
            );
        }
    };
    let reachable = ping(&pool).await;
    pool.close().await;

    match reachable {
        Ok(()) => DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        ),
        Err(error) => {
            DoctorCheck::fail("database_connectivity", format!("database query failed: {error}"))
        }
    }
}

/// Any answer from the service, including an unknown-currency one, proves it is reachable.
async fn check_rate_service(config: &AppConfig) -> DoctorCheck {
    let provider = match HttpRateProvider::from_config(&config.rates) {
        Ok(provider) => provider,
        Err(error) => return DoctorCheck::fail("rate_service", error.to_string()),
    };

    match provider.lookup(&CurrencyCode::base()).await {
        Ok(_) | Err(RateError::NotFound(_)) => {
            DoctorCheck::pass("rate_service", format!("answered at {}", provider.base_url()))
        }
        Err(RateError::Unavailable(detail)) => DoctorCheck::fail(
            "rate_service",
            format!("{} is unavailable: {detail}", provider.base_url()),
        ),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

