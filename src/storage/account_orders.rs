use sqlx::{Row, SqlitePool};

use crate::error::Result;

/// Pending contract-based account creation
#[derive(Debug, Clone)]
pub struct AccountOrder {
    pub order_id: i64,
    pub user_id: i64,
    pub account_name: String,
    pub public_key: String,
    pub encrypted_private_key: String,
    pub activated: bool,
}

pub struct AccountOrderRepository {
    pool: SqlitePool,
}

impl AccountOrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        user_id: i64,
        account_name: &str,
        public_key: &str,
        encrypted_private_key: &str,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO account_orders (user_id, eos_account_name, eos_public_key, eos_private_key) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(account_name)
        .bind(public_key)
        .bind(encrypted_private_key)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Most recent order of the user that is not yet activated
    pub async fn latest_pending(&self, user_id: i64) -> Result<Option<AccountOrder>> {
        let row = sqlx::query(
            "SELECT order_id, user_id, eos_account_name, eos_public_key, eos_private_key, activated \
             FROM account_orders WHERE user_id = ? AND activated = 0 ORDER BY order_id DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(AccountOrder {
                order_id: row.try_get("order_id")?,
                user_id: row.try_get("user_id")?,
                account_name: row.try_get("eos_account_name")?,
                public_key: row.try_get("eos_public_key")?,
                encrypted_private_key: row.try_get("eos_private_key")?,
                activated: row.try_get::<i64, _>("activated")? != 0,
            })
        })
        .transpose()
    }

    pub async fn mark_activated(&self, order_id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE account_orders SET activated = 1 WHERE order_id = ? AND activated = 0")
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Delete the user's non-activated orders, returning how many went
    pub async fn delete_pending(&self, user_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM account_orders WHERE user_id = ? AND activated = 0")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
