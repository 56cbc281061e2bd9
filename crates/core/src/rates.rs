use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::currency::{CurrencyCode, Rate};
use crate::ledger::{Ledger, LedgerError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RateError {
    #[error("currency `{0}` is not recognized by the rate source")]
    NotFound(CurrencyCode),
    #[error("rate source unavailable: {0}")]
    Unavailable(String),
}

/// Source of "units of the base currency per one unit of `code`".
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn lookup(&self, code: &CurrencyCode) -> Result<Rate, RateError>;
}

/// Fixed lookup table.
#[derive(Clone, Debug)]
pub struct StaticRateProvider {
    rates: BTreeMap<CurrencyCode, Rate>,
}

impl StaticRateProvider {
    pub fn new(rates: impl IntoIterator<Item = (CurrencyCode, Rate)>) -> Self {
        Self { rates: rates.into_iter().collect() }
    }

    /// USD 90, EUR 100, RUB 1.
    pub fn standard() -> Self {
        let entries = [("USD", 90), ("EUR", 100), ("RUB", 1)];
        Self::new(entries.into_iter().filter_map(|(code, rate)| {
            Some((CurrencyCode::parse(code).ok()?, Rate::new(Decimal::from(rate)).ok()?))
        }))
    }

    pub fn entries(&self) -> impl Iterator<Item = (&CurrencyCode, &Rate)> {
        self.rates.iter()
    }
}

#[async_trait]
impl RateProvider for StaticRateProvider {
    async fn lookup(&self, code: &CurrencyCode) -> Result<Rate, RateError> {
        self.rates.get(code).copied().ok_or_else(|| RateError::NotFound(code.clone()))
    }
}

/// Reads rates from the currencies an administrator maintains in the ledger.
pub struct LedgerRateProvider<L> {
    ledger: Arc<L>,
}

impl<L> LedgerRateProvider<L> {
    pub fn new(ledger: Arc<L>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl<L: Ledger> RateProvider for LedgerRateProvider<L> {
    async fn lookup(&self, code: &CurrencyCode) -> Result<Rate, RateError> {
        match self.ledger.get_currency(code).await {
            Ok(rate) => Ok(rate),
            Err(LedgerError::NotFound) => Err(RateError::NotFound(code.clone())),
            Err(error) => Err(RateError::Unavailable(error.to_string())),
        }
    }
}
