use tally_core::domain::user::UserId;
use tally_core::ledger::UserDirectory;
use tally_db::SqlLedger;

use crate::commands::{block_on, load_config, migrated_pool, CommandResult};

pub fn run(identity: &str) -> CommandResult {
    let identity = identity.trim();
    if identity.is_empty() {
        return CommandResult::failure(
            "grant-admin",
            "invalid_argument",
            "identity must not be empty",
            2,
        );
    }

    let user = UserId::new(identity);
    let outcome = load_config("grant-admin").and_then(|config| {
        block_on("grant-admin", async {
            let pool = migrated_pool(&config).await?;
            let granted = SqlLedger::new(pool.clone())
                .grant_admin(&user)
                .await
                .map_err(|error| ("admin_grant", error.to_string(), 5u8));
            pool.close().await;
            granted
        })
    });

    match outcome {
        Ok(()) => CommandResult::success("grant-admin", format!("{user} is now an administrator")),
        Err(failure) => failure,
    }
}
