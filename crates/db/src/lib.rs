pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod seed;

pub use connection::{connect_from_config, connect_with_settings, ping, DbPool};
pub use repositories::{RepositoryError, SqlLedger};
pub use seed::{seed_currencies, SeedReport};
