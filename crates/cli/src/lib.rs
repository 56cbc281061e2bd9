pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use crate::commands::CommandResult;

#[derive(Debug, Parser)]
#[command(
    name = "tally",
    about = "Tally operator CLI",
    long_about = "Operate the tally finance bot: readiness checks, migrations, currency seeding, config inspection and admin grants.",
    after_help = "Examples:\n  tally doctor --json\n  tally --config deploy/tally.toml seed\n  tally grant-admin 123456789"
)]
pub struct Cli {
    /// Load this file instead of searching for tally.toml; it must exist.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Preflight the bot: config, flow catalog, database and rate client.
    Start,
    /// Apply pending schema migrations.
    Migrate,
    /// Insert the configured static rate table into the currencies table.
    Seed,
    /// Print effective settings with where each one came from; secrets are redacted.
    Config,
    /// Check config, flow catalog, database connectivity and rate service reachability.
    Doctor {
        /// Emit machine-readable JSON output.
        #[arg(long)]
        json: bool,
    },
    /// Grant administrator rights to a chat identity.
    GrantAdmin {
        /// Chat identity of the new administrator.
        identity: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    if let Some(path) = cli.config {
        commands::use_config_file(path);
    }

    let result = match cli.command {
        Command::Start => commands::start::run(),
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => CommandResult { exit_code: 0, output: commands::config::run() },
        Command::Doctor { json } => {
            CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::GrantAdmin { identity } => commands::grant_admin::run(&identity),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
