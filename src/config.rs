//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub price: PriceConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub orders: OrdersConfig,
    #[serde(default)]
    pub account_creation: AccountCreationConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_bot_token")]
    pub bot_token: String,
    /// Payment provider token for card invoices
    #[serde(default = "default_provider_token")]
    pub provider_token: String,
    /// Used to build the return link after a crypto payment
    #[serde(default)]
    pub bot_username: String,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u32,
    /// Bot API base, used for raw calls such as `sendInvoice`
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: default_bot_token(),
            provider_token: default_provider_token(),
            bot_username: String::new(),
            poll_timeout_secs: default_poll_timeout_secs(),
            api_url: default_telegram_api_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Redundant RPC endpoints, the first one is the fallback
    #[serde(default = "default_rpc_endpoints")]
    pub endpoints: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// How long a fastest-endpoint pick is reused
    #[serde(default = "default_endpoint_ttl_secs")]
    pub endpoint_ttl_secs: u64,
    #[serde(default = "default_expiration_secs")]
    pub expiration_secs: u32,
    #[serde(default = "default_explorer_url")]
    pub explorer_tx_url: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            endpoints: default_rpc_endpoints(),
            timeout_ms: default_timeout_ms(),
            endpoint_ttl_secs: default_endpoint_ttl_secs(),
            expiration_secs: default_expiration_secs(),
            explorer_tx_url: default_explorer_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PriceProviderKind {
    Binance,
    Coingecko,
    Okx,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceProviderConfig {
    pub kind: PriceProviderKind,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceConfig {
    /// Providers in priority order
    #[serde(default = "default_price_providers")]
    pub providers: Vec<PriceProviderConfig>,
    #[serde(default = "default_price_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_price_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_price_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            providers: default_price_providers(),
            cache_ttl_secs: default_price_cache_ttl_secs(),
            retry_attempts: default_price_retry_attempts(),
            retry_delay_ms: default_price_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_min_password_len")]
    pub min_password_len: usize,
    /// Durations offered on the authorize screen
    #[serde(default = "default_session_durations")]
    pub durations_hours: Vec<u32>,
    /// Duration used when a wallet is unlocked from the wallet view
    #[serde(default = "default_unlock_hours")]
    pub unlock_hours: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_password_len: default_min_password_len(),
            durations_hours: default_session_durations(),
            unlock_hours: default_unlock_hours(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrdersConfig {
    #[serde(default = "default_max_pending")]
    pub max_pending_per_user: u32,
    #[serde(default = "default_matcher_interval_secs")]
    pub matcher_interval_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            max_pending_per_user: default_max_pending(),
            matcher_interval_secs: default_matcher_interval_secs(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountCreationConfig {
    /// Operator account paying for new accounts
    #[serde(default = "default_creator_account")]
    pub creator_account: String,
    #[serde(default = "default_creator_permission")]
    pub creator_permission: String,
    /// Never read from the config file
    #[serde(skip, default = "default_creator_private_key")]
    pub creator_private_key: String,
    /// Price of an account in EOS, converted to USD for invoices
    #[serde(default = "default_account_price_eos")]
    pub account_price_eos: f64,
    #[serde(default = "default_new_account_ram_bytes")]
    pub new_account_ram_bytes: u32,
    #[serde(default = "default_creator_ram_bytes")]
    pub creator_ram_bytes: u32,
    #[serde(default = "default_stake_net")]
    pub stake_net_eos: f64,
    #[serde(default = "default_stake_cpu")]
    pub stake_cpu_eos: f64,
    #[serde(default = "default_funding_eos")]
    pub funding_eos: f64,
    /// Contract that creates an account from a memo `name-pubkey`
    #[serde(default = "default_signup_contract")]
    pub signup_contract: String,
    #[serde(default = "default_signup_amount")]
    pub signup_amount_eos: f64,
    #[serde(default = "default_name_attempts")]
    pub name_attempts: u32,
    #[serde(default = "default_password_retries")]
    pub password_retries: u32,
}

impl Default for AccountCreationConfig {
    fn default() -> Self {
        Self {
            creator_account: default_creator_account(),
            creator_permission: default_creator_permission(),
            creator_private_key: default_creator_private_key(),
            account_price_eos: default_account_price_eos(),
            new_account_ram_bytes: default_new_account_ram_bytes(),
            creator_ram_bytes: default_creator_ram_bytes(),
            stake_net_eos: default_stake_net(),
            stake_cpu_eos: default_stake_cpu(),
            funding_eos: default_funding_eos(),
            signup_contract: default_signup_contract(),
            signup_amount_eos: default_signup_amount(),
            name_attempts: default_name_attempts(),
            password_retries: default_password_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsConfig {
    #[serde(default = "default_oxapay_merchant")]
    pub oxapay_merchant: String,
    #[serde(default = "default_oxapay_url")]
    pub oxapay_base_url: String,
    /// Public base URL the provider calls back on
    #[serde(default)]
    pub callback_base_url: String,
    #[serde(default = "default_callback_listen")]
    pub callback_listen: String,
    #[serde(default = "default_payment_lifetime")]
    pub lifetime_minutes: u32,
    #[serde(default = "default_payment_currency")]
    pub crypto_currency: String,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            oxapay_merchant: default_oxapay_merchant(),
            oxapay_base_url: default_oxapay_url(),
            callback_base_url: String::new(),
            callback_listen: default_callback_listen(),
            lifetime_minutes: default_payment_lifetime(),
            crypto_currency: default_payment_currency(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_requests")]
    pub max_requests: u32,
    #[serde(default = "default_rate_limit_window")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_rate_limit_requests(),
            window_secs: default_rate_limit_window(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_bot_token() -> String {
    std::env::var("BOT_TOKEN").unwrap_or_default()
}

fn default_provider_token() -> String {
    std::env::var("PROVIDER_TOKEN").unwrap_or_default()
}

fn default_poll_timeout_secs() -> u32 { 10 }

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".into()
}

fn default_rpc_endpoints() -> Vec<String> {
    vec![
        "https://eos.greymass.com".into(),
        "https://api.main.alohaeos.com".into(),
        "https://eospush.mytokenpocket.vip".into(),
        "https://eospush.tokenpocket.pro".into(),
    ]
}

fn default_timeout_ms() -> u64 {
    10000
}

fn default_endpoint_ttl_secs() -> u64 { 60 }
fn default_expiration_secs() -> u32 { 60 }

fn default_explorer_url() -> String {
    "https://bloks.io/transaction/".into()
}

fn default_price_providers() -> Vec<PriceProviderConfig> {
    vec![
        PriceProviderConfig {
            kind: PriceProviderKind::Binance,
            url: "https://api.binance.com/api/v3/ticker/price?symbol=EOSUSDT".into(),
        },
        PriceProviderConfig {
            kind: PriceProviderKind::Coingecko,
            url: "https://api.coingecko.com/api/v3/simple/price?ids=eos&vs_currencies=usd".into(),
        },
        PriceProviderConfig {
            kind: PriceProviderKind::Okx,
            url: "https://www.okx.com/api/v5/market/ticker?instId=EOS-USDT".into(),
        },
    ]
}

fn default_price_cache_ttl_secs() -> u64 { 60 }
fn default_price_retry_attempts() -> u32 { 3 }
fn default_price_retry_delay_ms() -> u64 { 1000 }

fn default_min_password_len() -> usize { 8 }

fn default_session_durations() -> Vec<u32> {
    vec![1, 6, 12, 24, 72, 168]
}

fn default_unlock_hours() -> u32 { 1 }

fn default_max_pending() -> u32 { 5 }
fn default_matcher_interval_secs() -> u64 { 60 }
fn default_page_size() -> u32 { 5 }

fn default_creator_account() -> String {
    std::env::var("EOS_CREATOR_ACCOUNT").unwrap_or_default()
}

fn default_creator_permission() -> String {
    "active".into()
}

fn default_creator_private_key() -> String {
    std::env::var("EOS_CREATOR_PRIVATE_KEY").unwrap_or_default()
}

fn default_account_price_eos() -> f64 {
    std::env::var("EOS_ACCOUNT_PRICE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(4.0)
}

fn default_new_account_ram_bytes() -> u32 { 3000 }
fn default_creator_ram_bytes() -> u32 { 3000 }
fn default_stake_net() -> f64 { 0.01 }
fn default_stake_cpu() -> f64 { 0.05 }
fn default_funding_eos() -> f64 { 0.1 }

fn default_signup_contract() -> String {
    "signupeoseos".into()
}

fn default_signup_amount() -> f64 { 4.0 }
fn default_name_attempts() -> u32 { 20 }
fn default_password_retries() -> u32 { 2 }

fn default_oxapay_merchant() -> String {
    std::env::var("OXAPAY_MERCHANT").unwrap_or_default()
}

fn default_oxapay_url() -> String {
    "https://api.oxapay.com".into()
}

fn default_callback_listen() -> String {
    "0.0.0.0:3000".into()
}

fn default_payment_lifetime() -> u32 { 30 }

fn default_payment_currency() -> String {
    "USDT".into()
}

fn default_rate_limit_requests() -> u32 { 5 }
fn default_rate_limit_window() -> u64 { 60 }

fn default_database_path() -> String {
    std::env::var("DATABASE_PATH").unwrap_or_else(|_| "data/wallet.db".into())
}

fn default_max_connections() -> u32 { 5 }

impl Config {
    /// Load configuration from file and environment
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("chain.timeout_ms", default_timeout_ms() as i64)?
            .set_default("orders.max_pending_per_user", default_max_pending() as i64)?
            .set_default("rate_limit.max_requests", default_rate_limit_requests() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix EOSBOT_)
            .add_source(
                config::Environment::with_prefix("EOSBOT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.chain.endpoints.is_empty() {
            anyhow::bail!("At least one chain endpoint is required");
        }

        for endpoint in &self.chain.endpoints {
            url::Url::parse(endpoint)
                .with_context(|| format!("Invalid chain endpoint: {}", endpoint))?;
        }

        if self.price.providers.is_empty() {
            anyhow::bail!("At least one price provider is required");
        }

        if self.price.retry_attempts == 0 {
            anyhow::bail!("price.retry_attempts must be at least 1");
        }

        if self.session.min_password_len < 8 {
            anyhow::bail!("session.min_password_len cannot be below 8");
        }

        if self.session.durations_hours.iter().any(|h| *h == 0) {
            anyhow::bail!("session.durations_hours must be positive");
        }

        if self.orders.max_pending_per_user == 0 {
            anyhow::bail!("orders.max_pending_per_user must be positive");
        }

        if self.orders.matcher_interval_secs == 0 {
            anyhow::bail!("orders.matcher_interval_secs must be positive");
        }

        if self.account_creation.account_price_eos <= 0.0 {
            anyhow::bail!("account_creation.account_price_eos must be positive");
        }

        if self.account_creation.funding_eos < 0.0
            || self.account_creation.stake_net_eos < 0.0
            || self.account_creation.stake_cpu_eos < 0.0
        {
            anyhow::bail!("account_creation amounts cannot be negative");
        }

        if self.rate_limit.max_requests == 0 || self.rate_limit.window_secs == 0 {
            anyhow::bail!("rate_limit values must be positive");
        }

        if self.account_creation.creator_private_key.is_empty() {
            tracing::warn!("EOS_CREATOR_PRIVATE_KEY not set - paid account creation is disabled");
        }

        Ok(())
    }

    /// Bot token is only required by commands that talk to Telegram
    pub fn require_bot_token(&self) -> Result<&str> {
        if self.telegram.bot_token.is_empty() {
            anyhow::bail!("BOT_TOKEN is not set");
        }
        Ok(&self.telegram.bot_token)
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Telegram:
    bot_token: {}
    provider_token: {}
  Chain:
    endpoints: {:?}
    timeout: {}ms
    explorer: {}
  Price:
    providers: {}
    cache_ttl: {}s
    retry: {} x {}ms
  Session:
    min_password_len: {}
    durations: {:?}h
  Orders:
    max_pending_per_user: {}
    matcher_interval: {}s
  Account creation:
    creator: {}@{}
    creator_key: {}
    price: {} EOS
  Payments:
    oxapay_merchant: {}
    callback: {}
  Rate limit: {} per {}s
  Database: {}
"#,
            mask_secret(&self.telegram.bot_token),
            mask_secret(&self.telegram.provider_token),
            self.chain.endpoints.iter().map(|e| mask_url(e)).collect::<Vec<_>>(),
            self.chain.timeout_ms,
            self.chain.explorer_tx_url,
            self.price.providers.len(),
            self.price.cache_ttl_secs,
            self.price.retry_attempts,
            self.price.retry_delay_ms,
            self.session.min_password_len,
            self.session.durations_hours,
            self.orders.max_pending_per_user,
            self.orders.matcher_interval_secs,
            self.account_creation.creator_account,
            self.account_creation.creator_permission,
            mask_secret(&self.account_creation.creator_private_key),
            self.account_creation.account_price_eos,
            mask_secret(&self.payments.oxapay_merchant),
            mask_url(&self.payments.callback_base_url),
            self.rate_limit.max_requests,
            self.rate_limit.window_secs,
            self.database.path,
        )
    }
}

fn mask_secret(value: &str) -> &'static str {
    if value.is_empty() {
        "(not set)"
    } else {
        "***"
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram: TelegramConfig::default(),
            chain: ChainConfig::default(),
            price: PriceConfig::default(),
            session: SessionConfig::default(),
            orders: OrdersConfig::default(),
            account_creation: AccountCreationConfig::default(),
            payments: PaymentsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.orders.max_pending_per_user, 5);
        assert_eq!(config.orders.matcher_interval_secs, 60);
        assert_eq!(config.price.cache_ttl_secs, 60);
        assert_eq!(config.session.durations_hours, vec![1, 6, 12, 24, 72, 168]);
        assert_eq!(config.chain.endpoints[0], "https://eos.greymass.com");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_provider_kind_deserialize() {
        let kind: PriceProviderKind = serde_json::from_str(r#""coingecko""#).unwrap();
        assert_eq!(kind, PriceProviderKind::Coingecko);
    }

    #[test]
    fn test_validate_rejects_empty_endpoints() {
        let mut config = Config::default();
        config.chain.endpoints.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_password_policy() {
        let mut config = Config::default();
        config.session.min_password_len = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[chain]
endpoints = ["https://eos.example.com"]

[orders]
max_pending_per_user = 3
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.chain.endpoints, vec!["https://eos.example.com".to_string()]);
        assert_eq!(config.orders.max_pending_per_user, 3);
        assert_eq!(config.orders.page_size, 5);
    }

    #[test]
    fn test_masked_display_hides_secrets() {
        let mut config = Config::default();
        config.telegram.bot_token = "123:secret".into();
        let shown = config.masked_display();
        assert!(!shown.contains("123:secret"));
        assert!(shown.contains("***"));
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://api.example.com?key=secret"),
            "https://api.example.com?***"
        );
        assert_eq!(mask_url("https://api.example.com"), "https://api.example.com");
    }
}
