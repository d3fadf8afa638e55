//! SQLite persistence
//!
//! Users, account orders, RAM orders and payments. Migrations are embedded
//! from `./migrations` at compile time.

pub mod account_orders;
pub mod payments;
pub mod ram_orders;
pub mod users;

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::Result;

pub use account_orders::{AccountOrder, AccountOrderRepository};
pub use payments::{Payment, PaymentRepository, PaymentStatus, PaymentType};
pub use ram_orders::{NewRamOrder, RamOrder, RamOrderRepository, RamOrderStatus};
pub use users::{Credential, UserRecord, UserRepository};

/// Connection pool plus typed repositories over it
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database file and run migrations
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let path = Path::new(&config.path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        info!("Database ready at {}", config.path);
        Ok(db)
    }

    /// Private in-memory database, one connection so every query sees the same data
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn users(&self) -> UserRepository {
        UserRepository::new(self.pool.clone())
    }

    pub fn account_orders(&self) -> AccountOrderRepository {
        AccountOrderRepository::new(self.pool.clone())
    }

    pub fn ram_orders(&self) -> RamOrderRepository {
        RamOrderRepository::new(self.pool.clone())
    }

    pub fn payments(&self) -> PaymentRepository {
        PaymentRepository::new(self.pool.clone())
    }

    /// Remove the linked credential, session marker, RAM orders and payments
    /// of a user in one transaction
    pub async fn delete_user_data(&self, user_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE users SET eos_account_name = NULL, eos_public_key = NULL, eos_private_key = NULL, \
             permission_name = NULL, session_password = NULL, session_expiration = NULL WHERE user_id = ?",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM ram_orders WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM payments WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!("Deleted wallet data for user {}", user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_connect_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("wallet.db");
        let config = DatabaseConfig {
            path: path.to_string_lossy().into_owned(),
            max_connections: 2,
        };

        let db = Database::connect(&config).await.unwrap();
        db.users().upsert(1, Some("alice"), None, None).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_delete_user_data() {
        let db = Database::in_memory().await.unwrap();
        let users = db.users();
        users.upsert(7, Some("bob"), None, None).await.unwrap();
        users
            .set_credential(
                7,
                &Credential {
                    account_name: "bobaccount11".into(),
                    public_key: "PUB_K1_x".into(),
                    encrypted_private_key: "00:11".into(),
                    permission: "active".into(),
                },
            )
            .await
            .unwrap();
        db.ram_orders()
            .insert_pending(
                &NewRamOrder {
                    user_id: 7,
                    account: "bobaccount11".into(),
                    ram_bytes: 1024,
                    price_per_kb: 0.02,
                },
                5,
            )
            .await
            .unwrap();

        db.delete_user_data(7).await.unwrap();

        assert!(users.credential(7).await.unwrap().is_none());
        assert_eq!(db.ram_orders().count_for_user(7).await.unwrap(), 0);
        assert!(users.get(7).await.unwrap().is_some());
    }
}
