use tally_core::domain::currency::CurrencyCode;
use tally_db::{seed_currencies, SeedReport};

use crate::commands::{block_on, load_config, migrated_pool, CommandResult};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let entries = match config.rates.static_table() {
        Ok(entries) => entries,
        Err(error) => {
            return CommandResult::failure("seed", "config_validation", error.to_string(), 2);
        }
    };

    let outcome = block_on("seed", async {
        let pool = migrated_pool(&config).await?;
        let report = seed_currencies(&pool, &entries)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8));
        pool.close().await;
        report
    });

    match outcome {
        Ok(report) => CommandResult::success("seed", summary(&report)),
        Err(failure) => failure,
    }
}

fn summary(report: &SeedReport) -> String {
    format!(
        "currencies seeded: inserted [{}], already present [{}]",
        join_codes(&report.inserted),
        join_codes(&report.skipped)
    )
}

fn join_codes(codes: &[CurrencyCode]) -> String {
    codes.iter().map(CurrencyCode::as_str).collect::<Vec<_>>().join(", ")
}
