//! Time-boxed signing sessions
//!
//! A session holds a decrypted private key in memory until its expiry. The
//! durable side is only an encrypted marker plus the expiry timestamp, so a
//! restart always forces the user to authorize again.
//!
//! Expiry is lazy: nothing sweeps the store, every read re-checks the clock.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use dashmap::DashMap;
use tracing::{debug, info};

use super::vault;
use crate::chain::PrivateKey;
use crate::error::{Error, Result};
use crate::storage::UserRepository;

/// Source of "now", swappable in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|_| Utc::now())
    }
}

#[derive(Clone)]
pub struct SessionEntry {
    pub key: PrivateKey,
    pub expires_at: DateTime<Utc>,
}

/// Process-local storage of decrypted sessions
pub trait SessionStore: Send + Sync {
    fn get(&self, user_id: i64) -> Option<SessionEntry>;
    fn insert(&self, user_id: i64, entry: SessionEntry);
    fn remove(&self, user_id: i64);
}

/// Concurrent map keyed by user; each entry is locked per shard
#[derive(Default)]
pub struct MemorySessionStore {
    entries: DashMap<i64, SessionEntry>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, user_id: i64) -> Option<SessionEntry> {
        self.entries.get(&user_id).map(|e| e.value().clone())
    }

    fn insert(&self, user_id: i64, entry: SessionEntry) {
        self.entries.insert(user_id, entry);
    }

    fn remove(&self, user_id: i64) {
        self.entries.remove(&user_id);
    }
}

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    users: UserRepository,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, users: UserRepository, clock: Arc<dyn Clock>) -> Self {
        Self { store, users, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Unlock the user's stored key for `hours`.
    ///
    /// The password is checked by decrypting the stored key; a failed
    /// decryption is [`Error::WrongPassword`].
    pub async fn authorize(&self, user_id: i64, password: &str, hours: u32) -> Result<DateTime<Utc>> {
        let credential = self.users.credential(user_id).await?.ok_or(Error::NoCredential)?;

        let plaintext =
            vault::decrypt(&credential.encrypted_private_key, password).ok_or(Error::WrongPassword)?;
        let key: PrivateKey = plaintext.parse()?;

        let expires_at = self.clock.now() + Duration::hours(hours as i64);
        self.store.insert(
            user_id,
            SessionEntry {
                key,
                expires_at,
            },
        );

        let marker = vault::encrypt(&uuid::Uuid::new_v4().to_string(), password);
        self.users
            .set_session_marker(user_id, &marker, expires_at.timestamp())
            .await?;

        info!("Session authorized for user {} until {}", user_id, expires_at);
        Ok(expires_at)
    }

    /// Check `password` against the stored key without opening a session
    pub async fn verify_password(&self, user_id: i64, password: &str) -> Result<()> {
        let credential = self.users.credential(user_id).await?.ok_or(Error::NoCredential)?;
        vault::decrypt(&credential.encrypted_private_key, password)
            .map(|_| ())
            .ok_or(Error::WrongPassword)
    }

    async fn durable_expiry(&self, user_id: i64) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .users
            .session_marker(user_id)
            .await?
            .and_then(|(_, ts)| Utc.timestamp_opt(ts, 0).single()))
    }

    /// Live in-memory entry whose durable marker agrees
    async fn live_entry(&self, user_id: i64) -> Result<Option<SessionEntry>> {
        let now = self.clock.now();

        let Some(entry) = self.store.get(user_id) else {
            return Ok(None);
        };
        if entry.expires_at <= now {
            return Ok(None);
        }

        match self.durable_expiry(user_id).await? {
            Some(durable) if durable > now => Ok(Some(entry)),
            _ => {
                debug!("Durable session marker revoked for user {}", user_id);
                Ok(None)
            }
        }
    }

    pub async fn is_active(&self, user_id: i64) -> Result<bool> {
        Ok(self.live_entry(user_id).await?.is_some())
    }

    /// The signing key if the session is live.
    ///
    /// A dead session is torn down on both sides as a side effect.
    pub async fn session_private_key(&self, user_id: i64) -> Result<Option<PrivateKey>> {
        if let Some(entry) = self.live_entry(user_id).await? {
            return Ok(Some(entry.key));
        }

        self.store.remove(user_id);
        if self.users.session_marker(user_id).await?.is_some() {
            debug!("Clearing expired session for user {}", user_id);
            self.users.clear_session_marker(user_id).await?;
        }
        Ok(None)
    }

    /// Like [`Self::session_private_key`] but absence is [`Error::SessionExpired`]
    pub async fn require_key(&self, user_id: i64) -> Result<PrivateKey> {
        self.session_private_key(user_id)
            .await?
            .ok_or(Error::SessionExpired)
    }

    /// Expiry of the live session, if any
    pub async fn expires_at(&self, user_id: i64) -> Result<Option<DateTime<Utc>>> {
        Ok(self.live_entry(user_id).await?.map(|e| e.expires_at))
    }

    /// Drop the in-memory half only, leaving the durable marker alone
    pub fn forget(&self, user_id: i64) {
        self.store.remove(user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Credential, Database};

    const KEY: &str = "5KQwrPbwdL6PhXujxW37FSSQZ1JiwsST4cqQzDeyXtP79zkvFD3";
    const PASSWORD: &str = "hunter2hunter2";

    struct Fixture {
        db: Database,
        clock: Arc<ManualClock>,
        sessions: SessionManager,
    }

    async fn fixture() -> Fixture {
        let db = Database::in_memory().await.unwrap();
        db.users()
            .set_credential(
                1,
                &Credential {
                    account_name: "alice".into(),
                    public_key: "PUB_K1_test".into(),
                    encrypted_private_key: vault::encrypt(KEY, PASSWORD),
                    permission: "active".into(),
                },
            )
            .await
            .unwrap();

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sessions = SessionManager::new(Arc::new(MemorySessionStore::new()), db.users(), clock.clone());
        Fixture { db, clock, sessions }
    }

    #[tokio::test]
    async fn test_session_expires_after_duration() {
        let f = fixture().await;

        f.sessions.authorize(1, PASSWORD, 6).await.unwrap();
        assert!(f.sessions.is_active(1).await.unwrap());
        let key = f.sessions.require_key(1).await.unwrap();
        assert_eq!(key.to_wif(), KEY);

        f.clock.advance(Duration::hours(5) + Duration::minutes(59));
        assert!(f.sessions.is_active(1).await.unwrap());

        f.clock.advance(Duration::minutes(2));
        assert!(!f.sessions.is_active(1).await.unwrap());
        assert!(matches!(f.sessions.require_key(1).await, Err(Error::SessionExpired)));

        // Expired read cleared the durable marker
        assert!(f.db.users().session_marker(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let f = fixture().await;
        let err = f.sessions.authorize(1, "not-the-password", 1).await.unwrap_err();
        assert!(matches!(err, Error::WrongPassword));
        assert!(!f.sessions.is_active(1).await.unwrap());

        assert!(f.sessions.verify_password(1, PASSWORD).await.is_ok());
        assert!(matches!(
            f.sessions.verify_password(1, "not-the-password").await,
            Err(Error::WrongPassword)
        ));
        // Verifying never opens a session
        assert!(!f.sessions.is_active(1).await.unwrap());
    }

    #[tokio::test]
    async fn test_no_credential() {
        let f = fixture().await;
        let err = f.sessions.authorize(2, PASSWORD, 1).await.unwrap_err();
        assert!(matches!(err, Error::NoCredential));
    }

    #[tokio::test]
    async fn test_durable_revoke_wins_over_memory() {
        let f = fixture().await;
        f.sessions.authorize(1, PASSWORD, 24).await.unwrap();

        f.db.users().clear_session_marker(1).await.unwrap();
        assert!(!f.sessions.is_active(1).await.unwrap());
        assert!(f.sessions.session_private_key(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restart_forces_reauthorization() {
        let f = fixture().await;
        f.sessions.authorize(1, PASSWORD, 24).await.unwrap();

        // A fresh manager over the same database has no decrypted key
        let restarted = SessionManager::new(
            Arc::new(MemorySessionStore::new()),
            f.db.users(),
            f.clock.clone(),
        );
        assert!(!restarted.is_active(1).await.unwrap());
        assert!(restarted.session_private_key(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_forget_keeps_durable_marker() {
        let f = fixture().await;
        f.sessions.authorize(1, PASSWORD, 1).await.unwrap();
        f.sessions.forget(1);

        assert!(!f.sessions.is_active(1).await.unwrap());
        assert!(f.db.users().session_marker(1).await.unwrap().is_some());
    }
}
