//! Fund-moving operations
//!
//! Every user operation signs with the key of a live session. Submissions
//! for the same signing account are serialised through [`AccountLocks`], so
//! the matcher and an interactive "buy now" never broadcast concurrently
//! for one account.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use super::session::SessionManager;
use super::vault;
use crate::chain::serializer::Action;
use crate::chain::{actions, permission, Asset, ChainClient, Name, PrivateKey};
use crate::config::AccountCreationConfig;
use crate::error::{Error, Result};
use crate::storage::{Credential, UserRepository};

/// One async mutex per chain account
#[derive(Default)]
pub struct AccountLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive submission rights on `account`
    pub async fn acquire(&self, account: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(account.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop locks nobody holds or waits for
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// EOS quantity that is still positive at 4 decimals
fn positive_eos(amount: f64) -> Result<Asset> {
    let quantity = Asset::eos(amount)?;
    if quantity.amount <= 0 {
        return Err(Error::InvalidInput(format!("Invalid amount: {}", amount)));
    }
    Ok(quantity)
}

/// Executes a triggered RAM order
#[async_trait]
pub trait RamPurchaser: Send + Sync {
    async fn buy_ram_bytes(&self, user_id: i64, receiver: &str, bytes: u32) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct CreatedAccount {
    pub account_name: String,
    pub public_key: String,
    pub transaction_id: String,
}

pub struct WalletOperations {
    chain: Arc<ChainClient>,
    sessions: Arc<SessionManager>,
    users: UserRepository,
    locks: AccountLocks,
    creation: AccountCreationConfig,
    creator_key: Option<PrivateKey>,
    min_password_len: usize,
}

impl WalletOperations {
    pub fn new(
        chain: Arc<ChainClient>,
        sessions: Arc<SessionManager>,
        users: UserRepository,
        creation: AccountCreationConfig,
        min_password_len: usize,
    ) -> Result<Self> {
        let creator_key = if creation.creator_private_key.trim().is_empty() {
            None
        } else {
            Some(creation.creator_private_key.parse::<PrivateKey>()?)
        };

        Ok(Self {
            chain,
            sessions,
            users,
            locks: AccountLocks::new(),
            creation,
            creator_key,
            min_password_len,
        })
    }

    pub fn chain(&self) -> &Arc<ChainClient> {
        &self.chain
    }

    /// Release submission locks of idle accounts
    pub fn prune_locks(&self) -> usize {
        self.locks.prune()
    }

    /// Whether an operator key is configured for paid account creation
    pub fn can_create_accounts(&self) -> bool {
        self.creator_key.is_some()
    }

    /// Session key and linked credential, or the reason there is none
    async fn signer(&self, user_id: i64) -> Result<(PrivateKey, Credential)> {
        if !self.sessions.is_active(user_id).await? {
            return Err(Error::SessionExpired);
        }
        let key = self.sessions.require_key(user_id).await?;
        let credential = self.users.credential(user_id).await?.ok_or(Error::NoCredential)?;
        Ok((key, credential))
    }

    async fn submit(&self, account: &str, actions: Vec<Action>, key: &PrivateKey) -> Result<String> {
        let _guard = self.locks.acquire(account).await;
        self.chain.send_actions(actions, key).await
    }

    pub async fn transfer(&self, user_id: i64, recipient: &str, amount: f64, memo: &str) -> Result<String> {
        let quantity = positive_eos(amount)?;
        let to = Name::new(recipient)?;
        let (key, credential) = self.signer(user_id).await?;

        let auth = permission(&credential.account_name, &credential.permission)?;
        let action = actions::transfer(&auth, auth.actor, to, &quantity, memo);

        let tx_id = self.submit(&credential.account_name, vec![action], &key).await?;
        info!(
            "Transfer of {} from {} to {}: {}",
            quantity, credential.account_name, recipient, tx_id
        );
        Ok(tx_id)
    }

    pub async fn buy_ram_bytes(&self, user_id: i64, receiver: &str, bytes: u32) -> Result<String> {
        if bytes == 0 {
            return Err(Error::InvalidInput("RAM amount must be positive".into()));
        }
        let receiver_name = Name::new(receiver)?;
        let (key, credential) = self.signer(user_id).await?;

        let auth = permission(&credential.account_name, &credential.permission)?;
        let action = actions::buy_ram_bytes(&auth, auth.actor, receiver_name, bytes);

        let tx_id = self.submit(&credential.account_name, vec![action], &key).await?;
        info!("Bought {} bytes of RAM for {}: {}", bytes, receiver, tx_id);
        Ok(tx_id)
    }

    pub async fn buy_ram_by_amount(&self, user_id: i64, receiver: &str, amount: f64) -> Result<String> {
        let quantity = positive_eos(amount)?;
        let receiver_name = Name::new(receiver)?;
        let (key, credential) = self.signer(user_id).await?;

        let auth = permission(&credential.account_name, &credential.permission)?;
        let action = actions::buy_ram(&auth, auth.actor, receiver_name, &quantity);

        let tx_id = self.submit(&credential.account_name, vec![action], &key).await?;
        info!("Bought {} of RAM for {}: {}", quantity, receiver, tx_id);
        Ok(tx_id)
    }

    /// Create a fresh account paid by the operator and link it to the user.
    ///
    /// The whole batch is one transaction; if the chain rejects it nothing is
    /// stored and the previous credential stays in place.
    pub async fn create_account(&self, user_id: i64, password: &str, funding_eos: f64) -> Result<CreatedAccount> {
        if password.chars().count() < self.min_password_len {
            return Err(Error::PasswordTooShort(self.min_password_len));
        }
        let creator_key = self
            .creator_key
            .as_ref()
            .ok_or_else(|| Error::Config("Creator private key is not configured".into()))?;

        let account_name = self
            .chain
            .find_free_account_name(self.creation.name_attempts)
            .await?;
        let new_key = PrivateKey::generate();
        let public_key = new_key.public_key();

        let auth = permission(&self.creation.creator_account, &self.creation.creator_permission)?;
        let creator = auth.actor;
        let name = Name::new(&account_name)?;

        let mut batch = vec![
            actions::new_account(&auth, creator, name, &public_key, &public_key),
            actions::buy_ram_bytes(&auth, creator, creator, self.creation.creator_ram_bytes),
            actions::buy_ram_bytes(&auth, creator, name, self.creation.new_account_ram_bytes),
            actions::delegate_bw(
                &auth,
                creator,
                name,
                &Asset::eos(self.creation.stake_net_eos)?,
                &Asset::eos(self.creation.stake_cpu_eos)?,
                true,
            ),
        ];
        if funding_eos > 0.0 {
            batch.push(actions::transfer(
                &auth,
                creator,
                name,
                &Asset::eos(funding_eos)?,
                "Welcome to EOS",
            ));
        }

        let tx_id = self
            .submit(&self.creation.creator_account, batch, creator_key)
            .await?;

        let credential = Credential {
            account_name: account_name.clone(),
            public_key: public_key.to_string(),
            encrypted_private_key: vault::encrypt(&new_key.to_string(), password),
            permission: "active".into(),
        };
        if let Err(e) = self.users.set_credential(user_id, &credential).await {
            // The account exists on chain, so the key must not be lost silently
            warn!("Account {} created but credential not stored: {}", account_name, e);
            return Err(e);
        }
        self.sessions.forget(user_id);

        info!("Created account {} for user {}: {}", account_name, user_id, tx_id);
        Ok(CreatedAccount {
            account_name,
            public_key: credential.public_key,
            transaction_id: tx_id,
        })
    }
}

#[async_trait]
impl RamPurchaser for WalletOperations {
    async fn buy_ram_bytes(&self, user_id: i64, receiver: &str, bytes: u32) -> Result<String> {
        WalletOperations::buy_ram_bytes(self, user_id, receiver, bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::client::testing::FakeChain;
    use crate::storage::Database;
    use crate::wallet::session::{ManualClock, MemorySessionStore};
    use chrono::Utc;
    use std::time::Duration;

    const PASSWORD: &str = "password123";

    struct Fixture {
        db: Database,
        chain: Arc<FakeChain>,
        sessions: Arc<SessionManager>,
        ops: WalletOperations,
    }

    async fn fixture() -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let chain = Arc::new(FakeChain::new());
        let sessions = Arc::new(SessionManager::new(
            Arc::new(MemorySessionStore::new()),
            db.users(),
            Arc::new(ManualClock::new(Utc::now())),
        ));

        let user_key = PrivateKey::generate();
        db.users()
            .set_credential(
                1,
                &Credential {
                    account_name: "alice".into(),
                    public_key: user_key.public_key().to_string(),
                    encrypted_private_key: vault::encrypt(&user_key.to_string(), PASSWORD),
                    permission: "active".into(),
                },
            )
            .await
            .unwrap();

        let creation = AccountCreationConfig {
            creator_account: "creator".into(),
            creator_private_key: PrivateKey::generate().to_string(),
            ..Default::default()
        };
        let ops = WalletOperations::new(
            Arc::new(ChainClient::new(chain.clone(), 60)),
            sessions.clone(),
            db.users(),
            creation,
            8,
        )
        .unwrap();

        Fixture {
            db,
            chain,
            sessions,
            ops,
        }
    }

    #[tokio::test]
    async fn test_operations_require_session() {
        let f = fixture().await;
        let err = f.ops.transfer(1, "bob", 1.0, "").await.unwrap_err();
        assert!(matches!(err, Error::SessionExpired));
        assert_eq!(f.chain.pushed_count(), 0);
    }

    #[tokio::test]
    async fn test_transfer_and_ram_purchase() {
        let f = fixture().await;
        f.sessions.authorize(1, PASSWORD, 1).await.unwrap();

        assert_eq!(f.ops.transfer(1, "bob", 1.5, "hi").await.unwrap(), "abc123");
        assert_eq!(f.ops.buy_ram_bytes(1, "bob", 4096).await.unwrap(), "abc123");
        assert_eq!(f.ops.buy_ram_by_amount(1, "alice", 0.5).await.unwrap(), "abc123");
        assert_eq!(f.chain.pushed_count(), 3);

        assert!(f.ops.transfer(1, "bob", 0.0, "").await.is_err());
        assert!(f.ops.transfer(1, "Not.Valid!", 1.0, "").await.is_err());
    }

    #[tokio::test]
    async fn test_account_locks_pruned_when_free() {
        let locks = AccountLocks::new();
        let held = locks.acquire("alice").await;
        drop(locks.acquire("bob").await);
        assert_eq!(locks.len(), 2);

        assert_eq!(locks.prune(), 1);
        assert_eq!(locks.len(), 1);

        drop(held);
        assert_eq!(locks.prune(), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_amount_rounding_to_zero_is_rejected() {
        let f = fixture().await;
        f.sessions.authorize(1, PASSWORD, 1).await.unwrap();

        let err = f.ops.transfer(1, "bob", 0.00004, "").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        let err = f.ops.buy_ram_by_amount(1, "alice", 0.00004).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(f.ops.transfer(1, "bob", f64::NAN, "").await.is_err());
        assert_eq!(f.chain.pushed_count(), 0);

        // Smallest representable amount still goes through
        assert_eq!(f.ops.transfer(1, "bob", 0.0001, "").await.unwrap(), "abc123");
    }

    #[tokio::test]
    async fn test_upstream_error_is_verbatim() {
        let f = fixture().await;
        f.sessions.authorize(1, PASSWORD, 1).await.unwrap();
        *f.chain.push_error.lock().unwrap() = Some("tx_cpu_usage_exceeded: billed CPU time".into());

        let err = f.ops.buy_ram_bytes(1, "alice", 1024).await.unwrap_err();
        assert_eq!(err.to_string(), "tx_cpu_usage_exceeded: billed CPU time");
        assert!(err.is_resource_exhaustion());
    }

    #[tokio::test]
    async fn test_create_account_links_new_credential() {
        let f = fixture().await;
        f.sessions.authorize(1, PASSWORD, 1).await.unwrap();

        let created = f.ops.create_account(1, "new-password", 0.1).await.unwrap();
        assert_eq!(created.transaction_id, "abc123");
        assert!(Name::is_valid_account(&created.account_name));
        assert_eq!(f.chain.pushed_count(), 1);

        let credential = f.db.users().credential(1).await.unwrap().unwrap();
        assert_eq!(credential.account_name, created.account_name);
        let key = vault::decrypt(&credential.encrypted_private_key, "new-password").unwrap();
        assert_eq!(
            key.parse::<PrivateKey>().unwrap().public_key().to_string(),
            created.public_key
        );

        // The old session signed for the old key
        assert!(!f.sessions.is_active(1).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_creation_keeps_old_credential() {
        let f = fixture().await;
        *f.chain.push_error.lock().unwrap() = Some("insufficient ram".into());

        assert!(f.ops.create_account(1, "new-password", 0.1).await.is_err());
        assert_eq!(
            f.db.users().credential(1).await.unwrap().unwrap().account_name,
            "alice"
        );
        assert!(matches!(
            f.ops.create_account(1, "short", 0.1).await,
            Err(Error::PasswordTooShort(8))
        ));
    }

    #[tokio::test]
    async fn test_account_lock_serialises() {
        let locks = Arc::new(AccountLocks::new());
        let guard = locks.acquire("alice").await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.acquire("alice").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // Different account is independent
        let _bob = locks.acquire("bob").await;

        drop(guard);
        waiter.await.unwrap();
    }
}
