use tally_core::flows::FlowCatalog;
use tally_db::{connect_from_config, ping};
use tally_rates::HttpRateProvider;

use crate::commands::{block_on, load_config, CommandResult};

/// Checks everything `tally-server` needs before it can accept messages.
pub fn run() -> CommandResult {
    let config = match load_config("start") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let catalog = config
        .conversation
        .display_codes()
        .map_err(|error| error.to_string())
        .and_then(|codes| FlowCatalog::standard(&codes).map_err(|error| error.to_string()));
    if let Err(message) = catalog {
        return CommandResult::failure("start", "flow_catalog", message, 2);
    }

    let rates = match HttpRateProvider::from_config(&config.rates) {
        Ok(rates) => rates,
        Err(error) => return CommandResult::failure("start", "rate_client", error.to_string(), 2),
    };

    let outcome = block_on("start", async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let reachable = ping(&pool).await.map_err(|error| ("db_connectivity", error.to_string(), 4u8));
        pool.close().await;
        reachable
    });

    match outcome {
        Ok(()) => CommandResult::success(
            "start",
            format!(
                "preflight passed: database reachable, flow catalog valid, rate service at {}",
                rates.base_url()
            ),
        ),
        Err(failure) => failure,
    }
}
