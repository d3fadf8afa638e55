//! Chain HTTP API
//!
//! [`ChainRpc`] is the seam the rest of the crate talks to; [`HttpChainRpc`]
//! implements it over `/v1/chain/*` on whichever endpoint the selector picked.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::endpoint::EndpointSelector;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct ChainInfo {
    pub chain_id: String,
    pub head_block_num: u32,
    pub head_block_time: String,
    pub last_irreversible_block_num: u32,
    pub last_irreversible_block_id: String,
}

impl ChainInfo {
    pub fn head_time(&self) -> Result<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.head_block_time, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|t| t.and_utc())
            .map_err(|e| Error::Deserialization(format!("Bad head_block_time: {}", e)))
    }

    pub fn chain_id_bytes(&self) -> Result<[u8; 32]> {
        let bytes = hex::decode(&self.chain_id)
            .map_err(|e| Error::Deserialization(format!("Bad chain_id: {}", e)))?;
        bytes
            .try_into()
            .map_err(|_| Error::Deserialization("chain_id must be 32 bytes".into()))
    }

    /// TAPOS reference: low 16 bits of the block number and bytes 8..12 of its id
    pub fn tapos(&self) -> Result<(u16, u32)> {
        let id = hex::decode(&self.last_irreversible_block_id)
            .map_err(|e| Error::Deserialization(format!("Bad block id: {}", e)))?;
        if id.len() < 12 {
            return Err(Error::Deserialization("Block id too short".into()));
        }
        let prefix = u32::from_le_bytes([id[8], id[9], id[10], id[11]]);
        Ok(((self.last_irreversible_block_num & 0xffff) as u16, prefix))
    }
}

/// Some nodes return limits as strings
fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom("number out of range")),
        serde_json::Value::String(s) => s.parse().map_err(serde::de::Error::custom),
        serde_json::Value::Null => Ok(0),
        other => Err(serde::de::Error::custom(format!("unexpected value {}", other))),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceLimit {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub used: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub available: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub max: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    pub account_name: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub ram_quota: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub ram_usage: i64,
    #[serde(default)]
    pub net_limit: ResourceLimit,
    #[serde(default)]
    pub cpu_limit: ResourceLimit,
    #[serde(default)]
    pub core_liquid_balance: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizerAccount {
    pub account_name: String,
    pub permission_name: String,
}

#[derive(Debug, Deserialize)]
struct AuthorizersResponse {
    accounts: Vec<AuthorizerAccount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableRowsRequest {
    pub code: String,
    pub scope: String,
    pub table: String,
    pub limit: u32,
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableRows {
    pub rows: Vec<serde_json::Value>,
    #[serde(default)]
    pub more: serde_json::Value,
}

/// Signed, packed transaction ready for broadcast
#[derive(Debug, Clone, Serialize)]
pub struct SignedTransaction {
    pub signatures: Vec<String>,
    pub compression: String,
    pub packed_context_free_data: String,
    pub packed_trx: String,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    transaction_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    what: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    message: String,
    error: Option<ErrorBody>,
}

/// Upstream failure with the node's own wording
#[derive(Debug, Clone)]
pub struct UpstreamError {
    pub status: u16,
    pub name: String,
    pub message: String,
}

impl UpstreamError {
    fn parse(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => {
                let (name, message) = match envelope.error {
                    Some(err) => {
                        let details: Vec<String> =
                            err.details.into_iter().map(|d| d.message).collect();
                        let message = if details.is_empty() {
                            err.what
                        } else {
                            details.join(", ")
                        };
                        (err.name, message)
                    }
                    None => (String::new(), envelope.message),
                };
                Self { status, name, message }
            }
            Err(_) => Self {
                status,
                name: String::new(),
                message: body.chars().take(300).collect(),
            },
        }
    }

    fn is_unknown_key(&self) -> bool {
        self.name == "unknown_key" || self.message.contains("unknown key")
    }
}

#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn get_info(&self) -> Result<ChainInfo>;

    /// `None` when the account does not exist
    async fn get_account(&self, name: &str) -> Result<Option<AccountInfo>>;

    async fn get_accounts_by_authorizers(&self, keys: &[String]) -> Result<Vec<AuthorizerAccount>>;

    async fn get_table_rows(&self, request: &TableRowsRequest) -> Result<TableRows>;

    async fn get_currency_balance(&self, code: &str, account: &str, symbol: &str) -> Result<Vec<String>>;

    /// Returns the transaction id
    async fn push_transaction(&self, trx: &SignedTransaction) -> Result<String>;
}

pub struct HttpChainRpc {
    client: reqwest::Client,
    selector: Arc<EndpointSelector>,
}

impl HttpChainRpc {
    pub fn new(selector: Arc<EndpointSelector>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, selector })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<T, CallError> {
        let endpoint = self.selector.current().await;
        let url = format!("{}/v1/chain/{}", endpoint.trim_end_matches('/'), path);
        debug!("POST {}", url);

        let response = match self.client.post(&url).json(body).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("RPC endpoint {} unreachable: {}", endpoint, e);
                self.selector.invalidate().await;
                return Err(CallError::Transport(e.into()));
            }
        };

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CallError::Transport(e.into()))?;

        if !status.is_success() {
            return Err(CallError::Upstream(UpstreamError::parse(status.as_u16(), &text)));
        }

        serde_json::from_str(&text).map_err(|e| {
            CallError::Transport(Error::Deserialization(format!("{} response: {}", path, e)))
        })
    }
}

enum CallError {
    Transport(Error),
    Upstream(UpstreamError),
}

impl From<CallError> for Error {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Transport(err) => err,
            CallError::Upstream(up) => Error::Rpc(up.message),
        }
    }
}

#[async_trait]
impl ChainRpc for HttpChainRpc {
    async fn get_info(&self) -> Result<ChainInfo> {
        Ok(self.call("get_info", &json!({})).await?)
    }

    async fn get_account(&self, name: &str) -> Result<Option<AccountInfo>> {
        match self.call::<AccountInfo>("get_account", &json!({ "account_name": name })).await {
            Ok(info) => Ok(Some(info)),
            Err(CallError::Upstream(up)) if up.is_unknown_key() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_accounts_by_authorizers(&self, keys: &[String]) -> Result<Vec<AuthorizerAccount>> {
        let response: AuthorizersResponse = self
            .call(
                "get_accounts_by_authorizers",
                &json!({ "accounts": [], "keys": keys }),
            )
            .await?;
        Ok(response.accounts)
    }

    async fn get_table_rows(&self, request: &TableRowsRequest) -> Result<TableRows> {
        let body = serde_json::to_value(request)?;
        Ok(self.call("get_table_rows", &body).await?)
    }

    async fn get_currency_balance(&self, code: &str, account: &str, symbol: &str) -> Result<Vec<String>> {
        Ok(self
            .call(
                "get_currency_balance",
                &json!({ "code": code, "account": account, "symbol": symbol }),
            )
            .await?)
    }

    async fn push_transaction(&self, trx: &SignedTransaction) -> Result<String> {
        let body = serde_json::to_value(trx)?;
        match self.call::<PushResponse>("push_transaction", &body).await {
            Ok(response) => Ok(response.transaction_id),
            Err(CallError::Upstream(up)) => Err(Error::TransactionSend(up.message)),
            Err(CallError::Transport(e)) => Err(e),
        }
    }
}
