use std::fmt;
use std::str::FromStr;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamOrderStatus {
    Pending,
    /// Claimed by the matcher; the purchase may already be on chain
    Triggered,
    Success,
    Failed,
}

impl RamOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RamOrderStatus::Pending => "pending",
            RamOrderStatus::Triggered => "triggered",
            RamOrderStatus::Success => "success",
            RamOrderStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RamOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RamOrderStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(RamOrderStatus::Pending),
            "triggered" => Ok(RamOrderStatus::Triggered),
            "success" => Ok(RamOrderStatus::Success),
            "failed" => Ok(RamOrderStatus::Failed),
            other => Err(Error::Deserialization(format!("Unknown order status: {}", other))),
        }
    }
}

/// Limit order as submitted by the user
#[derive(Debug, Clone)]
pub struct NewRamOrder {
    pub user_id: i64,
    pub account: String,
    pub ram_bytes: u32,
    /// EOS per KB the user is willing to pay at most
    pub price_per_kb: f64,
}

#[derive(Debug, Clone)]
pub struct RamOrder {
    pub order_id: i64,
    pub user_id: i64,
    pub account: String,
    pub ram_bytes: u32,
    pub price_per_kb: f64,
    pub status: RamOrderStatus,
    pub order_date: String,
    pub trigger_date: Option<String>,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
}

const ORDER_COLUMNS: &str = "order_id, user_id, eos_account_name, ram_bytes, price_per_kb, order_status, \
     order_date, trigger_date, transaction_id, failure_reason";

fn order_from_row(row: &SqliteRow) -> Result<RamOrder> {
    let status: String = row.try_get("order_status")?;
    let bytes: i64 = row.try_get("ram_bytes")?;
    Ok(RamOrder {
        order_id: row.try_get("order_id")?,
        user_id: row.try_get("user_id")?,
        account: row.try_get("eos_account_name")?,
        ram_bytes: u32::try_from(bytes)
            .map_err(|_| Error::Deserialization(format!("RAM bytes out of range: {}", bytes)))?,
        price_per_kb: row.try_get("price_per_kb")?,
        status: status.parse()?,
        order_date: row.try_get("order_date")?,
        trigger_date: row.try_get("trigger_date")?,
        transaction_id: row.try_get("transaction_id")?,
        failure_reason: row.try_get("failure_reason")?,
    })
}

pub struct RamOrderRepository {
    pool: SqlitePool,
}

impl RamOrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a pending order unless the user already has `max_pending` open
    /// (pending or triggered).
    ///
    /// The count and the insert are one statement, so concurrent submissions
    /// from the same user cannot both slip under the limit.
    pub async fn insert_pending(&self, order: &NewRamOrder, max_pending: u32) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO ram_orders (user_id, eos_account_name, ram_bytes, price_per_kb) \
             SELECT ?, ?, ?, ? \
             WHERE (SELECT COUNT(*) FROM ram_orders \
                    WHERE user_id = ? AND order_status IN ('pending', 'triggered')) < ?",
        )
        .bind(order.user_id)
        .bind(&order.account)
        .bind(order.ram_bytes as i64)
        .bind(order.price_per_kb)
        .bind(order.user_id)
        .bind(max_pending as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::OrderLimitReached(max_pending));
        }
        debug!("RAM order {} stored for user {}", result.last_insert_rowid(), order.user_id);
        Ok(result.last_insert_rowid())
    }

    /// Pending orders whose limit is at or above `market_price`, oldest first
    pub async fn pending_at_or_below(&self, market_price: f64) -> Result<Vec<RamOrder>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ram_orders WHERE order_status = 'pending' AND price_per_kb >= ? \
             ORDER BY order_id",
            ORDER_COLUMNS
        ))
        .bind(market_price)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    /// `pending -> triggered`. Only the caller that gets `true` may buy.
    pub async fn claim(&self, order_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE ram_orders SET order_status = 'triggered', trigger_date = datetime('now') \
             WHERE order_id = ? AND order_status = 'pending'",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Open order -> success. Returns false if it was already settled.
    pub async fn mark_success(&self, order_id: i64, transaction_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE ram_orders SET order_status = 'success', transaction_id = ?, \
             trigger_date = datetime('now') \
             WHERE order_id = ? AND order_status IN ('pending', 'triggered')",
        )
        .bind(transaction_id)
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Open order -> failed. Returns false if it was already settled.
    pub async fn mark_failed(&self, order_id: i64, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE ram_orders SET order_status = 'failed', failure_reason = ?, \
             trigger_date = datetime('now') \
             WHERE order_id = ? AND order_status IN ('pending', 'triggered')",
        )
        .bind(reason)
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn get(&self, order_id: i64) -> Result<Option<RamOrder>> {
        let row = sqlx::query(&format!("SELECT {} FROM ram_orders WHERE order_id = ?", ORDER_COLUMNS))
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    /// One page of the user's orders, newest first
    pub async fn list_for_user(&self, user_id: i64, page: u32, page_size: u32) -> Result<Vec<RamOrder>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ram_orders WHERE user_id = ? ORDER BY order_id DESC LIMIT ? OFFSET ?",
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .bind(page_size as i64)
        .bind(page as i64 * page_size as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    pub async fn count_for_user(&self, user_id: i64) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM ram_orders WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    /// Remove every order of the user, whatever its status
    pub async fn clear_for_user(&self, user_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM ram_orders WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    fn order(user_id: i64, price: f64) -> NewRamOrder {
        NewRamOrder {
            user_id,
            account: "alice".into(),
            ram_bytes: 4096,
            price_per_kb: price,
        }
    }

    #[tokio::test]
    async fn test_sixth_pending_order_rejected() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.ram_orders();

        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(repo.insert_pending(&order(1, 0.02), 5).await.unwrap());
        }

        let err = repo.insert_pending(&order(1, 0.02), 5).await.unwrap_err();
        assert!(matches!(err, Error::OrderLimitReached(5)));

        // Other users are unaffected
        repo.insert_pending(&order(2, 0.02), 5).await.unwrap();

        assert!(repo.mark_success(ids[0], "abc123").await.unwrap());
        repo.insert_pending(&order(1, 0.02), 5).await.unwrap();
        assert!(repo.insert_pending(&order(1, 0.02), 5).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_order_frees_a_slot() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.ram_orders();

        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(repo.insert_pending(&order(1, 0.02), 5).await.unwrap());
        }
        assert!(repo.insert_pending(&order(1, 0.02), 5).await.is_err());

        assert!(repo.mark_failed(ids[2], "insufficient ram").await.unwrap());
        repo.insert_pending(&order(1, 0.02), 5).await.unwrap();
        assert!(matches!(
            repo.insert_pending(&order(1, 0.02), 5).await,
            Err(Error::OrderLimitReached(5))
        ));
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.ram_orders();
        let id = repo.insert_pending(&order(1, 0.02), 5).await.unwrap();

        assert!(repo.claim(id).await.unwrap());
        assert!(!repo.claim(id).await.unwrap());

        // Claimed orders are no longer offered to the matcher
        assert!(repo.pending_at_or_below(0.01).await.unwrap().is_empty());
        let stored = repo.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, RamOrderStatus::Triggered);
        assert!(stored.trigger_date.is_some());

        assert!(repo.mark_success(id, "abc123").await.unwrap());
        assert!(!repo.claim(id).await.unwrap());
        assert_eq!(repo.get(id).await.unwrap().unwrap().status, RamOrderStatus::Success);
    }

    #[tokio::test]
    async fn test_triggered_orders_count_toward_limit() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.ram_orders();
        let id = repo.insert_pending(&order(1, 0.02), 5).await.unwrap();
        repo.claim(id).await.unwrap();

        for _ in 0..4 {
            repo.insert_pending(&order(1, 0.02), 5).await.unwrap();
        }
        assert!(repo.insert_pending(&order(1, 0.02), 5).await.is_err());
    }

    #[tokio::test]
    async fn test_pending_selection_by_limit() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.ram_orders();

        let above = repo.insert_pending(&order(1, 0.02), 5).await.unwrap();
        let equal = repo.insert_pending(&order(1, 0.018), 5).await.unwrap();
        repo.insert_pending(&order(1, 0.01), 5).await.unwrap();
        let done = repo.insert_pending(&order(1, 0.05), 5).await.unwrap();
        repo.mark_failed(done, "insufficient cpu").await.unwrap();

        let matched: Vec<i64> = repo
            .pending_at_or_below(0.018)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.order_id)
            .collect();
        assert_eq!(matched, vec![above, equal]);
    }

    #[tokio::test]
    async fn test_terminal_status_is_final() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.ram_orders();
        let id = repo.insert_pending(&order(1, 0.02), 5).await.unwrap();

        assert!(repo.mark_failed(id, "insufficient cpu").await.unwrap());
        assert!(!repo.mark_success(id, "abc123").await.unwrap());

        let stored = repo.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, RamOrderStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some("insufficient cpu"));
        assert!(stored.transaction_id.is_none());
        assert!(stored.trigger_date.is_some());
    }

    #[tokio::test]
    async fn test_paging_and_clear() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.ram_orders();
        for i in 0..7 {
            let id = repo.insert_pending(&order(1, 0.01 + i as f64 / 1000.0), 5).await;
            if let Ok(id) = id {
                repo.mark_success(id, "tx").await.unwrap();
            }
        }

        assert_eq!(repo.count_for_user(1).await.unwrap(), 7);
        let first = repo.list_for_user(1, 0, 5).await.unwrap();
        let second = repo.list_for_user(1, 1, 5).await.unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(second.len(), 2);
        assert!(first[0].order_id > second[0].order_id);

        assert_eq!(repo.clear_for_user(1).await.unwrap(), 7);
        assert_eq!(repo.count_for_user(1).await.unwrap(), 0);
    }
}
