use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::Row;

use tally_core::domain::currency::{CurrencyCode, CurrencyDefinition, Rate};
use tally_core::domain::operation::{
    FinancialOperation, NewOperation, OperationCategory, OperationId,
};
use tally_core::domain::user::UserId;
use tally_core::ledger::{Ledger, LedgerError};

use super::RepositoryError;
use crate::DbPool;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite-backed ledger. Each mutation is one statement, so existence and
/// ownership checks cannot race with concurrent writers.
#[derive(Clone)]
pub struct SqlLedger {
    pub(crate) pool: DbPool,
}

impl SqlLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn decode<E: ToString>(error: E) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

fn parse_category(raw: &str) -> Result<OperationCategory, RepositoryError> {
    OperationCategory::parse(raw).ok_or_else(|| decode(format!("unknown category `{raw}`")))
}

fn parse_rate(raw: &str) -> Result<Rate, RepositoryError> {
    let value = Decimal::from_str(raw).map_err(decode)?;
    Rate::new(value).map_err(decode)
}

fn row_to_operation(row: &sqlx::sqlite::SqliteRow) -> Result<FinancialOperation, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(decode)?;
    let owner: String = row.try_get("owner_identity").map_err(decode)?;
    let date: String = row.try_get("date").map_err(decode)?;
    let amount: String = row.try_get("amount").map_err(decode)?;
    let category: String = row.try_get("category").map_err(decode)?;
    let currency: String = row.try_get("currency").map_err(decode)?;

    Ok(FinancialOperation {
        id: OperationId(id),
        owner: UserId(owner),
        date: NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(decode)?,
        amount: Decimal::from_str(&amount).map_err(decode)?,
        category: parse_category(&category)?,
        currency: CurrencyCode::parse(&currency).map_err(decode)?,
    })
}

fn row_to_currency(row: &sqlx::sqlite::SqliteRow) -> Result<CurrencyDefinition, RepositoryError> {
    let code: String = row.try_get("code").map_err(decode)?;
    let rate: String = row.try_get("rate").map_err(decode)?;

    Ok(CurrencyDefinition { code: CurrencyCode::parse(&code).map_err(decode)?, rate: parse_rate(&rate)? })
}

impl SqlLedger {
    async fn insert_operation(
        &self,
        owner: &UserId,
        operation: &NewOperation,
    ) -> Result<OperationId, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO operations (owner_identity, date, amount, category, currency, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(owner.as_str())
        .bind(operation.date.format(DATE_FORMAT).to_string())
        .bind(operation.amount.to_string())
        .bind(operation.category.as_str())
        .bind(CurrencyCode::base().as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(OperationId(result.last_insert_rowid()))
    }

    async fn select_operations(
        &self,
        owner: &UserId,
    ) -> Result<Vec<FinancialOperation>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT id, owner_identity, date, amount, category, currency
             FROM operations WHERE owner_identity = ? ORDER BY id ASC",
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_operation).collect::<Result<Vec<_>, _>>()
    }

    async fn delete_owned_operation(
        &self,
        owner: &UserId,
        id: OperationId,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM operations WHERE id = ? AND owner_identity = ?")
            .bind(id.0)
            .bind(owner.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_currency_if_absent(
        &self,
        code: &CurrencyCode,
        rate: Rate,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO currencies (code, rate, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(code) DO NOTHING",
        )
        .bind(code.as_str())
        .bind(rate.value().to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_currency_rate(&self, code: &CurrencyCode, rate: Rate) -> Result<u64, RepositoryError> {
        let result = sqlx::query("UPDATE currencies SET rate = ?, updated_at = ? WHERE code = ?")
            .bind(rate.value().to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(code.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_currency_row(&self, code: &CurrencyCode) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM currencies WHERE code = ?")
            .bind(code.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn select_currency(&self, code: &CurrencyCode) -> Result<Option<Rate>, RepositoryError> {
        let rate: Option<String> = sqlx::query_scalar("SELECT rate FROM currencies WHERE code = ?")
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await?;
        rate.as_deref().map(parse_rate).transpose()
    }

    async fn select_currencies(&self) -> Result<Vec<CurrencyDefinition>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> =
            sqlx::query("SELECT code, rate FROM currencies ORDER BY code ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_currency).collect::<Result<Vec<_>, _>>()
    }
}

fn affected_one(rows: u64, miss: LedgerError) -> Result<(), LedgerError> {
    if rows == 0 {
        Err(miss)
    } else {
        Ok(())
    }
}

#[async_trait::async_trait]
impl Ledger for SqlLedger {
    async fn record_operation(
        &self,
        owner: &UserId,
        operation: NewOperation,
    ) -> Result<OperationId, LedgerError> {
        Ok(self.insert_operation(owner, &operation).await?)
    }

    async fn list_operations(
        &self,
        owner: &UserId,
    ) -> Result<Vec<FinancialOperation>, LedgerError> {
        Ok(self.select_operations(owner).await?)
    }

    async fn delete_operation(&self, owner: &UserId, id: OperationId) -> Result<(), LedgerError> {
        affected_one(self.delete_owned_operation(owner, id).await?, LedgerError::NotFound)
    }

    async fn upsert_currency(&self, code: &CurrencyCode, rate: Rate) -> Result<(), LedgerError> {
        affected_one(self.insert_currency_if_absent(code, rate).await?, LedgerError::AlreadyExists)
    }

    async fn update_currency(&self, code: &CurrencyCode, rate: Rate) -> Result<(), LedgerError> {
        affected_one(self.update_currency_rate(code, rate).await?, LedgerError::NotFound)
    }

    async fn delete_currency(&self, code: &CurrencyCode) -> Result<(), LedgerError> {
        affected_one(self.delete_currency_row(code).await?, LedgerError::NotFound)
    }

    async fn get_currency(&self, code: &CurrencyCode) -> Result<Rate, LedgerError> {
        self.select_currency(code).await?.ok_or(LedgerError::NotFound)
    }

    async fn list_currencies(&self) -> Result<Vec<CurrencyDefinition>, LedgerError> {
        Ok(self.select_currencies().await?)
    }
}
