use crate::commands::{block_on, load_config, migrated_pool, CommandResult};

pub fn run() -> CommandResult {
    let outcome = load_config("migrate").and_then(|config| {
        block_on("migrate", async move {
            migrated_pool(&config).await?.close().await;
            Ok(())
        })
    });

    match outcome {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err(failure) => failure,
    }
}
