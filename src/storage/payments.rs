use std::fmt;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentType {
    Card,
    Crypto,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Card => "card",
            PaymentType::Crypto => "crypto",
        }
    }
}

/// Normalised payment outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    /// Paid and already spent on an account
    Consumed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Consumed => "consumed",
        }
    }

    /// Map a provider status string onto our outcomes
    pub fn from_provider(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "consumed" => PaymentStatus::Consumed,
            "paid" | "succeeded" | "success" | "completed" => PaymentStatus::Succeeded,
            "expired" | "failed" | "canceled" | "cancelled" | "refunded" => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Payment {
    pub id: i64,
    pub user_id: i64,
    pub chat_id: i64,
    pub amount: f64,
    /// Raw status as last written; see [`Payment::normalized_status`]
    pub status: String,
    pub kind: PaymentType,
    pub track_id: Option<String>,
    pub pay_link: Option<String>,
    pub payload_id: Option<String>,
}

impl Payment {
    pub fn normalized_status(&self) -> PaymentStatus {
        PaymentStatus::from_provider(&self.status)
    }
}

const PAYMENT_COLUMNS: &str = "id, user_id, chat_id, amount, status, type, track_id, pay_link, payload_id";

fn payment_from_row(row: &SqliteRow) -> Result<Payment> {
    let kind: String = row.try_get("type")?;
    Ok(Payment {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        chat_id: row.try_get("chat_id")?,
        amount: row.try_get("amount")?,
        status: row.try_get("status")?,
        kind: match kind.as_str() {
            "card" => PaymentType::Card,
            "crypto" => PaymentType::Crypto,
            other => return Err(Error::Deserialization(format!("Unknown payment type: {}", other))),
        },
        track_id: row.try_get("track_id")?,
        pay_link: row.try_get("pay_link")?,
        payload_id: row.try_get("payload_id")?,
    })
}

pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        user_id: i64,
        chat_id: i64,
        amount: f64,
        kind: PaymentType,
        payload_id: Option<&str>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO payments (user_id, chat_id, amount, status, type, payload_id) \
             VALUES (?, ?, ?, 'pending', ?, ?)",
        )
        .bind(user_id)
        .bind(chat_id)
        .bind(amount)
        .bind(kind.as_str())
        .bind(payload_id)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Record the provider's answer to a payment request
    pub async fn set_provider_details(
        &self,
        id: i64,
        status: &str,
        track_id: Option<&str>,
        pay_link: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE payments SET status = ?, track_id = ?, pay_link = ? WHERE id = ?")
            .bind(status)
            .bind(track_id)
            .bind(pay_link)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_status(&self, id: i64, status: PaymentStatus) -> Result<()> {
        sqlx::query("UPDATE payments SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_status_by_payload(&self, payload_id: &str, status: PaymentStatus) -> Result<Option<Payment>> {
        sqlx::query("UPDATE payments SET status = ? WHERE payload_id = ?")
            .bind(status.as_str())
            .bind(payload_id)
            .execute(&self.pool)
            .await?;
        self.find_one("payload_id", payload_id).await
    }

    pub async fn set_status_by_track_id(&self, track_id: &str, status: PaymentStatus) -> Result<Option<Payment>> {
        sqlx::query("UPDATE payments SET status = ? WHERE track_id = ?")
            .bind(status.as_str())
            .bind(track_id)
            .execute(&self.pool)
            .await?;
        self.find_one("track_id", track_id).await
    }

    pub async fn by_payload(&self, payload_id: &str) -> Result<Option<Payment>> {
        self.find_one("payload_id", payload_id).await
    }

    pub async fn by_track_id(&self, track_id: &str) -> Result<Option<Payment>> {
        self.find_one("track_id", track_id).await
    }

    pub async fn latest_for_user(&self, user_id: i64) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE user_id = ? ORDER BY id DESC LIMIT 1",
            PAYMENT_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    /// Newest payment of the user that is paid and not yet spent
    pub async fn latest_succeeded(&self, user_id: i64) -> Result<Option<Payment>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE user_id = ? ORDER BY id DESC",
            PAYMENT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            let payment = payment_from_row(row)?;
            if payment.normalized_status() == PaymentStatus::Succeeded {
                return Ok(Some(payment));
            }
        }
        Ok(None)
    }

    async fn find_one(&self, column: &'static str, value: &str) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE {} = ? ORDER BY id DESC LIMIT 1",
            PAYMENT_COLUMNS, column
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(payment_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    #[test]
    fn test_status_normalisation() {
        assert_eq!(PaymentStatus::from_provider("Paid"), PaymentStatus::Succeeded);
        assert_eq!(PaymentStatus::from_provider("succeeded"), PaymentStatus::Succeeded);
        assert_eq!(PaymentStatus::from_provider("Expired"), PaymentStatus::Failed);
        assert_eq!(PaymentStatus::from_provider("Waiting"), PaymentStatus::Pending);
        assert_eq!(PaymentStatus::from_provider("100-success"), PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_crypto_payment_flow() {
        let db = Database::in_memory().await.unwrap();
        let payments = db.payments();

        let id = payments.create(5, 500, 12.0, PaymentType::Crypto, None).await.unwrap();
        payments
            .set_provider_details(id, "100-success", Some("trk1"), Some("https://pay.example/1"))
            .await
            .unwrap();

        let stored = payments.by_track_id("trk1").await.unwrap().unwrap();
        assert_eq!(stored.normalized_status(), PaymentStatus::Pending);
        assert_eq!(stored.chat_id, 500);

        let updated = payments
            .set_status_by_track_id("trk1", PaymentStatus::Succeeded)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.normalized_status(), PaymentStatus::Succeeded);
        assert!(payments.set_status_by_track_id("nope", PaymentStatus::Failed).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_card_payment_by_payload() {
        let db = Database::in_memory().await.unwrap();
        let payments = db.payments();

        payments.create(5, 500, 1200.0, PaymentType::Card, Some("p-1")).await.unwrap();
        let second = payments.create(5, 500, 1200.0, PaymentType::Card, Some("p-2")).await.unwrap();

        let updated = payments
            .set_status_by_payload("p-2", PaymentStatus::Failed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.id, second);
        assert_eq!(updated.kind, PaymentType::Card);

        let latest = payments.latest_for_user(5).await.unwrap().unwrap();
        assert_eq!(latest.id, second);
        assert_eq!(latest.normalized_status(), PaymentStatus::Failed);
    }
}
