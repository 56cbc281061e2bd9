//! Conversation engine and domain core for the tally finance assistant.
//!
//! - **Flows** (`flows`) - declarative dialogue graphs, the per-user conversation
//!   store, and the engine that drives one inbound message through them
//! - **Ledger** (`ledger`) - persistence boundary for operations, currencies, and users
//! - **Rates** (`rates`) - exchange rate lookup boundary
//! - **Config** (`config`) - layered `tally.toml` / `TALLY_*` configuration

pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod ledger;
pub mod rates;

pub use domain::currency::{CurrencyCode, CurrencyDefinition, Rate, BASE_CURRENCY};
pub use domain::operation::{FinancialOperation, NewOperation, OperationCategory, OperationId};
pub use domain::user::UserId;
pub use errors::{ApplicationError, ValidationError};
pub use flows::{
    ConversationEngine, ConversationKey, ConversationState, ConversationStore, EngineSettings,
    FlowCatalog, FlowId, Inbound, Notification, Turn, TurnOutcome,
};
pub use ledger::{InMemoryLedger, Ledger, LedgerError, UserDirectory};
pub use rates::{LedgerRateProvider, RateError, RateProvider, StaticRateProvider};
