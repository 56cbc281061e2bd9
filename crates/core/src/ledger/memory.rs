use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Ledger, LedgerError, UserDirectory};
use crate::domain::{
    currency::{CurrencyCode, CurrencyDefinition, Rate},
    operation::{FinancialOperation, NewOperation, OperationId},
    user::UserId,
};

#[derive(Default)]
struct MemoryState {
    last_operation_id: i64,
    operations: BTreeMap<OperationId, FinancialOperation>,
    currencies: BTreeMap<CurrencyCode, Rate>,
    users: HashMap<UserId, String>,
    admins: HashSet<UserId>,
}

/// Ledger kept entirely in process memory. Used by tests and local runs that
/// do not need durability.
#[derive(Default)]
pub struct InMemoryLedger {
    state: RwLock<MemoryState>,
    outage: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails with `LedgerError::Storage`.
    pub fn set_outage(&self, outage: bool) {
        self.outage.store(outage, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(LedgerError::Storage("in-memory ledger outage".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn record_operation(
        &self,
        owner: &UserId,
        operation: NewOperation,
    ) -> Result<OperationId, LedgerError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        state.last_operation_id += 1;
        let id = OperationId(state.last_operation_id);
        state.operations.insert(
            id,
            FinancialOperation {
                id,
                owner: owner.clone(),
                date: operation.date,
                amount: operation.amount,
                category: operation.category,
                currency: CurrencyCode::base(),
            },
        );
        Ok(id)
    }

    async fn list_operations(
        &self,
        owner: &UserId,
    ) -> Result<Vec<FinancialOperation>, LedgerError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.operations.values().filter(|operation| &operation.owner == owner).cloned().collect())
    }

    async fn delete_operation(&self, owner: &UserId, id: OperationId) -> Result<(), LedgerError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        match state.operations.get(&id) {
            Some(operation) if &operation.owner == owner => {
                state.operations.remove(&id);
                Ok(())
            }
            _ => Err(LedgerError::NotFound),
        }
    }

    async fn upsert_currency(&self, code: &CurrencyCode, rate: Rate) -> Result<(), LedgerError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if state.currencies.contains_key(code) {
            return Err(LedgerError::AlreadyExists);
        }
        state.currencies.insert(code.clone(), rate);
        Ok(())
    }

    async fn update_currency(&self, code: &CurrencyCode, rate: Rate) -> Result<(), LedgerError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        match state.currencies.get_mut(code) {
            Some(current) => {
                *current = rate;
                Ok(())
            }
            None => Err(LedgerError::NotFound),
        }
    }

    async fn delete_currency(&self, code: &CurrencyCode) -> Result<(), LedgerError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        state.currencies.remove(code).map(|_| ()).ok_or(LedgerError::NotFound)
    }

    async fn get_currency(&self, code: &CurrencyCode) -> Result<Rate, LedgerError> {
        self.check_available()?;
        let state = self.state.read().await;
        state.currencies.get(code).copied().ok_or(LedgerError::NotFound)
    }

    async fn list_currencies(&self) -> Result<Vec<CurrencyDefinition>, LedgerError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .currencies
            .iter()
            .map(|(code, rate)| CurrencyDefinition { code: code.clone(), rate: *rate })
            .collect())
    }
}

#[async_trait]
impl UserDirectory for InMemoryLedger {
    async fn register_user(
        &self,
        identity: &UserId,
        display_name: &str,
    ) -> Result<(), LedgerError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if state.users.contains_key(identity) {
            return Err(LedgerError::AlreadyExists);
        }
        state.users.insert(identity.clone(), display_name.to_owned());
        Ok(())
    }

    async fn is_registered(&self, identity: &UserId) -> Result<bool, LedgerError> {
        self.check_available()?;
        Ok(self.state.read().await.users.contains_key(identity))
    }

    async fn is_admin(&self, identity: &UserId) -> Result<bool, LedgerError> {
        self.check_available()?;
        Ok(self.state.read().await.admins.contains(identity))
    }

    async fn grant_admin(&self, identity: &UserId) -> Result<(), LedgerError> {
        self.check_available()?;
        self.state.write().await.admins.insert(identity.clone());
        Ok(())
    }
}
