use chrono::Utc;
use tally_core::domain::currency::{CurrencyCode, Rate};

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub inserted: Vec<CurrencyCode>,
    /// Codes that already existed; their stored rates are left alone.
    pub skipped: Vec<CurrencyCode>,
}

/// Inserts the given currencies in one transaction. Existing codes are kept,
/// so running the seed twice changes nothing.
pub async fn seed_currencies(
    pool: &DbPool,
    entries: &[(CurrencyCode, Rate)],
) -> Result<SeedReport, RepositoryError> {
    let mut report = SeedReport::default();
    let mut tx = pool.begin().await?;
    let now = Utc::now().to_rfc3339();

    for (code, rate) in entries {
        let result = sqlx::query(
            "INSERT INTO currencies (code, rate, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(code) DO NOTHING",
        )
        .bind(code.as_str())
        .bind(rate.value().to_string())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            report.skipped.push(code.clone());
        } else {
            report.inserted.push(code.clone());
        }
    }

    tx.commit().await?;
    Ok(report)
}
