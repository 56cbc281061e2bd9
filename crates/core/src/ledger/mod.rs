//! Persistence boundary for operations, currencies, and user records.
//!
//! Every mutating call is a single atomic unit: ownership checks happen in the
//! same statement as the delete, and insert-if-absent happens in the same
//! statement as the existence check.

mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::InMemoryLedger;

use crate::domain::{
    currency::{CurrencyCode, CurrencyDefinition, Rate},
    operation::{FinancialOperation, NewOperation, OperationId},
    user::UserId,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    AlreadyExists,
    #[error("storage failure: {0}")]
    Storage(String),
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn record_operation(
        &self,
        owner: &UserId,
        operation: NewOperation,
    ) -> Result<OperationId, LedgerError>;

    /// Operations owned by `owner`, ordered by id.
    async fn list_operations(&self, owner: &UserId)
        -> Result<Vec<FinancialOperation>, LedgerError>;

    /// Deletes only when `id` exists and belongs to `owner`; either miss is `NotFound`.
    async fn delete_operation(&self, owner: &UserId, id: OperationId) -> Result<(), LedgerError>;

    /// Inserts a currency that does not exist yet; `AlreadyExists` otherwise.
    async fn upsert_currency(&self, code: &CurrencyCode, rate: Rate) -> Result<(), LedgerError>;

    async fn update_currency(&self, code: &CurrencyCode, rate: Rate) -> Result<(), LedgerError>;

    async fn delete_currency(&self, code: &CurrencyCode) -> Result<(), LedgerError>;

    async fn get_currency(&self, code: &CurrencyCode) -> Result<Rate, LedgerError>;

    /// All currencies, ordered by code.
    async fn list_currencies(&self) -> Result<Vec<CurrencyDefinition>, LedgerError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Registers `identity`; `AlreadyExists` when it is registered already.
    async fn register_user(&self, identity: &UserId, display_name: &str)
        -> Result<(), LedgerError>;

    async fn is_registered(&self, identity: &UserId) -> Result<bool, LedgerError>;

    async fn is_admin(&self, identity: &UserId) -> Result<bool, LedgerError>;

    async fn grant_admin(&self, identity: &UserId) -> Result<(), LedgerError>;
}
