//! Credential management
//!
//! Linking an existing account by private key, the contract-based account
//! order flow, wallet and profile views, and wallet deletion.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::session::SessionManager;
use super::vault;
use crate::chain::{AccountInfo, AuthorizerAccount, ChainClient, PrivateKey, PublicKey};
use crate::config::AccountCreationConfig;
use crate::error::{Error, Result};
use crate::storage::{AccountOrder, Credential, Database};

/// Key checked against the chain but not yet linked to a specific account
#[derive(Debug, Clone)]
pub struct PendingImport {
    pub public_key: String,
    pub encrypted_private_key: String,
    pub accounts: Vec<AuthorizerAccount>,
}

#[derive(Debug, Clone)]
pub enum ImportOutcome {
    Linked(Credential),
    /// The key controls several accounts, the user has to pick one
    Choose(PendingImport),
}

/// What the wallet page shows
#[derive(Debug, Clone)]
pub struct WalletOverview {
    pub credential: Credential,
    pub balance: f64,
    pub session_expires_at: Option<DateTime<Utc>>,
    /// Only present while the session is live
    pub private_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AccountProfile {
    pub account_name: String,
    pub ram_usage: i64,
    pub ram_quota: i64,
    pub net_used: i64,
    pub net_max: i64,
    pub cpu_used: i64,
    pub cpu_max: i64,
}

impl From<AccountInfo> for AccountProfile {
    fn from(info: AccountInfo) -> Self {
        Self {
            account_name: info.account_name,
            ram_usage: info.ram_usage,
            ram_quota: info.ram_quota,
            net_used: info.net_limit.used,
            net_max: info.net_limit.max,
            cpu_used: info.cpu_limit.used,
            cpu_max: info.cpu_limit.max,
        }
    }
}

/// Instructions for paying the signup contract
#[derive(Debug, Clone)]
pub struct AccountOrderTicket {
    pub account_name: String,
    pub public_key: String,
    pub contract: String,
    pub amount_eos: f64,
    pub memo: String,
}

#[derive(Debug, Clone)]
pub enum Activation {
    Activated(Credential),
    NotOnChainYet(String),
}

pub struct CredentialManager {
    db: Database,
    chain: Arc<ChainClient>,
    sessions: Arc<SessionManager>,
    creation: AccountCreationConfig,
    min_password_len: usize,
}

impl CredentialManager {
    pub fn new(
        db: Database,
        chain: Arc<ChainClient>,
        sessions: Arc<SessionManager>,
        creation: AccountCreationConfig,
        min_password_len: usize,
    ) -> Self {
        Self {
            db,
            chain,
            sessions,
            creation,
            min_password_len,
        }
    }

    pub fn check_password(&self, password: &str) -> Result<()> {
        if password.chars().count() < self.min_password_len {
            return Err(Error::PasswordTooShort(self.min_password_len));
        }
        Ok(())
    }

    /// Look up which accounts `private_key` controls and link or offer them
    pub async fn import(&self, user_id: i64, private_key: &str, password: &str) -> Result<ImportOutcome> {
        self.check_password(password)?;
        let key: PrivateKey = private_key.parse()?;
        let public_key = key.public_key().to_string();

        let mut accounts = self.chain.accounts_for_key(&public_key).await?;
        accounts.dedup_by(|a, b| a.account_name == b.account_name && a.permission_name == b.permission_name);

        let encrypted_private_key = vault::encrypt(&key.to_string(), password);
        match accounts.len() {
            0 => Err(Error::NoAccountForKey),
            1 => {
                let account = &accounts[0];
                let credential = Credential {
                    account_name: account.account_name.clone(),
                    public_key,
                    encrypted_private_key,
                    permission: account.permission_name.clone(),
                };
                self.link(user_id, &credential).await?;
                Ok(ImportOutcome::Linked(credential))
            }
            n => {
                debug!("Key controls {} accounts, asking user {}", n, user_id);
                Ok(ImportOutcome::Choose(PendingImport {
                    public_key,
                    encrypted_private_key,
                    accounts,
                }))
            }
        }
    }

    /// Finish a multi-account import with the user's pick
    pub async fn select_account(
        &self,
        user_id: i64,
        pending: &PendingImport,
        account: &str,
        permission: &str,
    ) -> Result<Credential> {
        let known = pending
            .accounts
            .iter()
            .any(|a| a.account_name == account && a.permission_name == permission);
        if !known {
            return Err(Error::NotFound(format!("{}@{}", account, permission)));
        }

        let credential = Credential {
            account_name: account.to_string(),
            public_key: pending.public_key.clone(),
            encrypted_private_key: pending.encrypted_private_key.clone(),
            permission: permission.to_string(),
        };
        self.link(user_id, &credential).await?;
        Ok(credential)
    }

    async fn link(&self, user_id: i64, credential: &Credential) -> Result<()> {
        self.db.users().set_credential(user_id, credential).await?;
        self.sessions.forget(user_id);
        info!(
            "User {} linked {}@{}",
            user_id, credential.account_name, credential.permission
        );
        Ok(())
    }

    pub async fn credential(&self, user_id: i64) -> Result<Option<Credential>> {
        self.db.users().credential(user_id).await
    }

    pub async fn overview(&self, user_id: i64) -> Result<Option<WalletOverview>> {
        let Some(credential) = self.credential(user_id).await? else {
            return Ok(None);
        };

        let balance = self.chain.eos_balance(&credential.account_name).await?;
        let session_expires_at = self.sessions.expires_at(user_id).await?;
        let private_key = self
            .sessions
            .session_private_key(user_id)
            .await?
            .map(|k| k.to_string());

        Ok(Some(WalletOverview {
            credential,
            balance,
            session_expires_at,
            private_key,
        }))
    }

    pub async fn profile(&self, user_id: i64) -> Result<AccountProfile> {
        let credential = self.credential(user_id).await?.ok_or(Error::NoCredential)?;
        let info = self
            .chain
            .account(&credential.account_name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Account {}", credential.account_name)))?;
        Ok(info.into())
    }

    /// Unlink the wallet and forget everything tied to it
    pub async fn delete_wallet(&self, user_id: i64) -> Result<()> {
        self.sessions.forget(user_id);
        self.db.delete_user_data(user_id).await?;
        self.db.account_orders().delete_pending(user_id).await?;
        Ok(())
    }

    /// Reserve a free name with a fresh key for the signup contract flow
    pub async fn create_account_order(&self, user_id: i64, password: &str) -> Result<AccountOrderTicket> {
        self.check_password(password)?;

        let account_name = self
            .chain
            .find_free_account_name(self.creation.name_attempts)
            .await?;
        let key = PrivateKey::generate();
        let public_key = key.public_key();

        self.db
            .account_orders()
            .create(
                user_id,
                &account_name,
                &public_key.to_string(),
                &vault::encrypt(&key.to_string(), password),
            )
            .await?;

        info!("Account order {} created for user {}", account_name, user_id);
        Ok(ticket(&self.creation, &account_name, &public_key.to_legacy_string()))
    }

    pub async fn pending_order(&self, user_id: i64) -> Result<Option<AccountOrderTicket>> {
        let Some(order) = self.db.account_orders().latest_pending(user_id).await? else {
            return Ok(None);
        };
        Ok(Some(ticket(&self.creation, &order.account_name, &legacy_key(&order)?)))
    }

    /// Link the ordered account once the chain knows it
    pub async fn activate_order(&self, user_id: i64) -> Result<Activation> {
        let order = self
            .db
            .account_orders()
            .latest_pending(user_id)
            .await?
            .ok_or_else(|| Error::NotFound("No pending account order".into()))?;

        if !self.chain.account_exists(&order.account_name).await? {
            return Ok(Activation::NotOnChainYet(order.account_name));
        }

        let credential = Credential {
            account_name: order.account_name.clone(),
            public_key: order.public_key.clone(),
            encrypted_private_key: order.encrypted_private_key.clone(),
            permission: "active".into(),
        };
        self.link(user_id, &credential).await?;
        self.db.account_orders().mark_activated(order.order_id).await?;
        Ok(Activation::Activated(credential))
    }

    pub async fn delete_order(&self, user_id: i64) -> Result<bool> {
        Ok(self.db.account_orders().delete_pending(user_id).await? > 0)
    }
}

fn legacy_key(order: &AccountOrder) -> Result<String> {
    Ok(order
        .public_key
        .parse::<PublicKey>()?
        .to_legacy_string())
}

fn ticket(creation: &AccountCreationConfig, account_name: &str, legacy_public_key: &str) -> AccountOrderTicket {
    AccountOrderTicket {
        account_name: account_name.to_string(),
        public_key: legacy_public_key.to_string(),
        contract: creation.signup_contract.clone(),
        amount_eos: creation.signup_amount_eos,
        memo: format!("{}-{}", account_name, legacy_public_key),
    }
}
