use sqlx::{Row, SqlitePool};

use crate::error::Result;

/// Telegram user row
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub credential: Option<Credential>,
}

/// Linked EOS account with its encrypted key
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub account_name: String,
    pub public_key: String,
    pub encrypted_private_key: String,
    pub permission: String,
}

pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the user if unseen, otherwise refresh profile fields
    pub async fn upsert(
        &self,
        user_id: i64,
        username: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (user_id, username, first_name, last_name) VALUES (?, ?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET username = excluded.username, \
             first_name = excluded.first_name, last_name = excluded.last_name",
        )
        .bind(user_id)
        .bind(username)
        .bind(first_name)
        .bind(last_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, user_id: i64) -> Result<Option<UserRecord>> {
        let row = sqlx::query(
            "SELECT user_id, username, first_name, last_name, eos_account_name, eos_public_key, \
             eos_private_key, permission_name FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(UserRecord {
            user_id: row.try_get("user_id")?,
            username: row.try_get("username")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            credential: credential_from_row(&row)?,
        }))
    }

    pub async fn credential(&self, user_id: i64) -> Result<Option<Credential>> {
        let row = sqlx::query(
            "SELECT eos_account_name, eos_public_key, eos_private_key, permission_name \
             FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => credential_from_row(&row),
            None => Ok(None),
        }
    }

    /// Link a credential, replacing any previous one and dropping its session
    pub async fn set_credential(&self, user_id: i64, credential: &Credential) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (user_id, eos_account_name, eos_public_key, eos_private_key, permission_name) \
             VALUES (?, ?, ?, ?, ?) ON CONFLICT(user_id) DO UPDATE SET \
             eos_account_name = excluded.eos_account_name, eos_public_key = excluded.eos_public_key, \
             eos_private_key = excluded.eos_private_key, permission_name = excluded.permission_name, \
             session_password = NULL, session_expiration = NULL",
        )
        .bind(user_id)
        .bind(&credential.account_name)
        .bind(&credential.public_key)
        .bind(&credential.encrypted_private_key)
        .bind(&credential.permission)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Store the encrypted session marker and its unix expiry
    pub async fn set_session_marker(&self, user_id: i64, marker: &str, expires_at: i64) -> Result<()> {
        sqlx::query("UPDATE users SET session_password = ?, session_expiration = ? WHERE user_id = ?")
            .bind(marker)
            .bind(expires_at)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn session_marker(&self, user_id: i64) -> Result<Option<(String, i64)>> {
        let row = sqlx::query(
            "SELECT session_password, session_expiration FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let marker: Option<String> = row.try_get("session_password")?;
        let expires: Option<i64> = row.try_get("session_expiration")?;
        Ok(marker.zip(expires))
    }

    pub async fn clear_session_marker(&self, user_id: i64) -> Result<()> {
        sqlx::query("UPDATE users SET session_password = NULL, session_expiration = NULL WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

fn credential_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Option<Credential>> {
    let account: Option<String> = row.try_get("eos_account_name")?;
    let public_key: Option<String> = row.try_get("eos_public_key")?;
    let private_key: Option<String> = row.try_get("eos_private_key")?;
    let permission: Option<String> = row.try_get("permission_name")?;

    match (account, private_key) {
        (Some(account_name), Some(encrypted_private_key)) if !account_name.is_empty() => {
            Ok(Some(Credential {
                account_name,
                public_key: public_key.unwrap_or_default(),
                encrypted_private_key,
                permission: permission.unwrap_or_else(|| "active".to_string()),
            }))
        }
        _ => Ok(None),
    }
}
