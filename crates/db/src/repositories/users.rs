use chrono::Utc;

use tally_core::domain::user::UserId;
use tally_core::ledger::{LedgerError, UserDirectory};

use super::{RepositoryError, SqlLedger};

impl SqlLedger {
    async fn insert_user_if_absent(
        &self,
        identity: &UserId,
        display_name: &str,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO users (identity, display_name, created_at) VALUES (?, ?, ?)
             ON CONFLICT(identity) DO NOTHING",
        )
        .bind(identity.as_str())
        .bind(display_name)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn exists_in(&self, table: UserTable, identity: &UserId) -> Result<bool, RepositoryError> {
        let query = match table {
            UserTable::Users => "SELECT EXISTS(SELECT 1 FROM users WHERE identity = ?)",
            UserTable::Admins => "SELECT EXISTS(SELECT 1 FROM admins WHERE identity = ?)",
        };
        let exists: i64 =
            sqlx::query_scalar(query).bind(identity.as_str()).fetch_one(&self.pool).await?;
        Ok(exists != 0)
    }

    async fn insert_admin(&self, identity: &UserId) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO admins (identity, granted_at) VALUES (?, ?)
             ON CONFLICT(identity) DO NOTHING",
        )
        .bind(identity.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum UserTable {
    Users,
    Admins,
}

#[async_trait::async_trait]
impl UserDirectory for SqlLedger {
    async fn register_user(
        &self,
        identity: &UserId,
        display_name: &str,
    ) -> Result<(), LedgerError> {
        match self.insert_user_if_absent(identity, display_name).await? {
            0 => Err(LedgerError::AlreadyExists),
            _ => Ok(()),
        }
    }

    async fn is_registered(&self, identity: &UserId) -> Result<bool, LedgerError> {
        Ok(self.exists_in(UserTable::Users, identity).await?)
    }

    async fn is_admin(&self, identity: &UserId) -> Result<bool, LedgerError> {
        Ok(self.exists_in(UserTable::Admins, identity).await?)
    }

    async fn grant_admin(&self, identity: &UserId) -> Result<(), LedgerError> {
        Ok(self.insert_admin(identity).await?)
    }
}
