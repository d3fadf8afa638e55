//! Transaction assembly and broadcast

use std::sync::Arc;

use tracing::{debug, info};

use super::actions;
use super::asset::{Asset, EOS_SYMBOL};
use super::keys::PrivateKey;
use super::name::Name;
use super::rpc::{AccountInfo, AuthorizerAccount, ChainRpc, SignedTransaction};
use super::serializer::{Action, PermissionLevel, Transaction};
use crate::error::{Error, Result};

/// Signs with a caller-supplied key and pushes through [`ChainRpc`]
pub struct ChainClient {
    rpc: Arc<dyn ChainRpc>,
    expiration_secs: i64,
}

impl ChainClient {
    pub fn new(rpc: Arc<dyn ChainRpc>, expiration_secs: u32) -> Self {
        Self {
            rpc,
            expiration_secs: expiration_secs as i64,
        }
    }

    pub fn rpc(&self) -> &Arc<dyn ChainRpc> {
        &self.rpc
    }

    /// Build one transaction from `actions`, sign it and broadcast it.
    ///
    /// All actions succeed or fail together. Upstream rejections come back as
    /// [`Error::TransactionSend`] with the node's message.
    pub async fn send_actions(&self, actions: Vec<Action>, key: &PrivateKey) -> Result<String> {
        if actions.is_empty() {
            return Err(Error::TransactionBuild("No actions".into()));
        }

        let info = self.rpc.get_info().await?;
        let (ref_block_num, ref_block_prefix) = info.tapos()?;
        let expiration = info.head_time()? + chrono::Duration::seconds(self.expiration_secs);

        let trx = Transaction {
            expiration,
            ref_block_num,
            ref_block_prefix,
            actions,
        };

        let digest = trx.signing_digest(&info.chain_id_bytes()?);
        let signature = key.sign_digest(&digest)?;

        let signed = SignedTransaction {
            signatures: vec![signature.to_string()],
            compression: "none".into(),
            packed_context_free_data: String::new(),
            packed_trx: hex::encode(trx.pack()),
        };

        debug!("Pushing transaction {} with {} actions", trx.id(), trx.actions.len());
        let tx_id = self.rpc.push_transaction(&signed).await?;
        info!("Transaction accepted: {}", tx_id);
        Ok(tx_id)
    }

    pub async fn account(&self, name: &str) -> Result<Option<AccountInfo>> {
        self.rpc.get_account(name).await
    }

    pub async fn account_exists(&self, name: &str) -> Result<bool> {
        Ok(self.rpc.get_account(name).await?.is_some())
    }

    pub async fn accounts_for_key(&self, public_key: &str) -> Result<Vec<AuthorizerAccount>> {
        self.rpc
            .get_accounts_by_authorizers(&[public_key.to_string()])
            .await
    }

    /// Liquid EOS balance, zero when the account holds none
    pub async fn eos_balance(&self, account: &str) -> Result<f64> {
        let balances = self
            .rpc
            .get_currency_balance(&actions::TOKEN_CONTRACT.to_string(), account, EOS_SYMBOL)
            .await?;
        match balances.first() {
            Some(balance) => Ok(Asset::parse(balance)?.to_f64()),
            None => Ok(0.0),
        }
    }

    /// Random 12-character name that the chain reports as unused
    pub async fn find_free_account_name(&self, attempts: u32) -> Result<String> {
        for _ in 0..attempts {
            let candidate = Name::random_account(&mut rand::thread_rng());
            if !self.account_exists(&candidate).await? {
                return Ok(candidate);
            }
            debug!("Account name {} taken, retrying", candidate);
        }
        Err(Error::NameUnavailable(format!(
            "No free account name after {} attempts",
            attempts
        )))
    }
}

/// `actor@permission` authorization
pub fn permission(actor: &str, permission: &str) -> Result<PermissionLevel> {
    Ok(PermissionLevel::new(Name::new(actor)?, Name::new(permission)?))
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory chain used by tests across the crate

    use super::*;
    use crate::chain::rpc::{ChainInfo, TableRows, TableRowsRequest};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeChain {
        pub accounts: Mutex<HashMap<String, AccountInfo>>,
        pub authorizers: Mutex<HashMap<String, Vec<AuthorizerAccount>>>,
        pub balances: Mutex<HashMap<String, String>>,
        pub ram_rows: Mutex<Vec<serde_json::Value>>,
        pub table_reads: Mutex<usize>,
        pub pushed: Mutex<Vec<SignedTransaction>>,
        /// Error message returned by the next pushes
        pub push_error: Mutex<Option<String>>,
        pub tx_id: Mutex<String>,
    }

    impl FakeChain {
        pub fn new() -> Self {
            let chain = Self::default();
            *chain.tx_id.lock().unwrap() = "abc123".into();
            chain
        }

        pub fn add_account(&self, name: &str) {
            self.accounts.lock().unwrap().insert(
                name.to_string(),
                AccountInfo {
                    account_name: name.to_string(),
                    ram_quota: 8192,
                    ram_usage: 3000,
                    net_limit: Default::default(),
                    cpu_limit: Default::default(),
                    core_liquid_balance: None,
                },
            );
        }

        pub fn pushed_count(&self) -> usize {
            self.pushed.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChainRpc for FakeChain {
        async fn get_info(&self) -> Result<ChainInfo> {
            Ok(ChainInfo {
                chain_id: "aca376f206b8fc25a6ed44dbdc66547c36c6c33e3a119ffbeaef943642f0e906".into(),
                head_block_num: 1000,
                head_block_time: "2024-05-01T12:00:00.000".into(),
                last_irreversible_block_num: 990,
                last_irreversible_block_id: "000003de0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c".into(),
            })
        }

        async fn get_account(&self, name: &str) -> Result<Option<AccountInfo>> {
            Ok(self.accounts.lock().unwrap().get(name).cloned())
        }

        async fn get_accounts_by_authorizers(&self, keys: &[String]) -> Result<Vec<AuthorizerAccount>> {
            let map = self.authorizers.lock().unwrap();
            Ok(keys.iter().flat_map(|k| map.get(k).cloned().unwrap_or_default()).collect())
        }

        async fn get_table_rows(&self, _request: &TableRowsRequest) -> Result<TableRows> {
            *self.table_reads.lock().unwrap() += 1;
            Ok(TableRows {
                rows: self.ram_rows.lock().unwrap().clone(),
                more: serde_json::Value::Bool(false),
            })
        }

        async fn get_currency_balance(&self, _code: &str, account: &str, _symbol: &str) -> Result<Vec<String>> {
            Ok(self.balances.lock().unwrap().get(account).cloned().into_iter().collect())
        }

        async fn push_transaction(&self, trx: &SignedTransaction) -> Result<String> {
            if let Some(msg) = self.push_error.lock().unwrap().clone() {
                return Err(Error::TransactionSend(msg));
            }
            self.pushed.lock().unwrap().push(trx.clone());
            Ok(self.tx_id.lock().unwrap().clone())
        }
    }
}
