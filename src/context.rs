/// Shared services wired from configuration
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::{
    chain::{ChainClient, ChainRpc, EndpointSelector, HttpChainRpc},
    config::Config,
    error::Result,
    orders::OrderBook,
    payments::{InvoiceSender, OxaPayClient, PaymentService},
    price::PriceService,
    rate_limit::{GovernorRateLimiter, RateLimiter},
    storage::Database,
    wallet::{Clock, CredentialManager, MemorySessionStore, SessionManager, SystemClock, WalletOperations},
};

/// Everything a handler or background task needs
pub struct AppContext {
    pub config: Config,
    pub db: Database,
    pub chain: Arc<ChainClient>,
    pub sessions: Arc<SessionManager>,
    pub prices: Arc<PriceService>,
    pub credentials: CredentialManager,
    pub wallet: Arc<WalletOperations>,
    pub orders: OrderBook,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub payments: Arc<PaymentService>,
}

impl AppContext {
    /// Connect the database and the live chain endpoints
    pub async fn build(config: Config) -> Result<Self> {
        let db = Database::connect(&config.database).await?;

        let timeout = Duration::from_millis(config.chain.timeout_ms);
        let selector = Arc::new(EndpointSelector::new(
            config.chain.endpoints.clone(),
            Duration::from_secs(config.chain.endpoint_ttl_secs),
            timeout,
        )?);
        let rpc: Arc<dyn ChainRpc> = Arc::new(HttpChainRpc::new(selector, timeout)?);
        let rate_limiter = Arc::new(GovernorRateLimiter::new(&config.rate_limit)?);

        let context = Self::assemble(config, db, rpc, Arc::new(SystemClock), rate_limiter)?;
        info!("Application context ready");
        Ok(context)
    }

    /// Wire services over the given collaborators
    pub fn assemble(
        config: Config,
        db: Database,
        rpc: Arc<dyn ChainRpc>,
        clock: Arc<dyn Clock>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Result<Self> {
        let timeout = Duration::from_millis(config.chain.timeout_ms);
        let chain = Arc::new(ChainClient::new(rpc.clone(), config.chain.expiration_secs));
        let sessions = Arc::new(SessionManager::new(
            Arc::new(MemorySessionStore::new()),
            db.users(),
            clock,
        ));
        let prices = Arc::new(PriceService::new(&config.price, rpc, timeout)?);
        let min_password_len = config.session.min_password_len;

        let credentials = CredentialManager::new(
            db.clone(),
            chain.clone(),
            sessions.clone(),
            config.account_creation.clone(),
            min_password_len,
        );
        let wallet = Arc::new(WalletOperations::new(
            chain.clone(),
            sessions.clone(),
            db.users(),
            config.account_creation.clone(),
            min_password_len,
        )?);
        let orders = OrderBook::new(
            db.ram_orders(),
            config.orders.max_pending_per_user,
            config.orders.page_size,
        );

        let oxapay = Arc::new(OxaPayClient::new(
            &config.payments.oxapay_base_url,
            &config.payments.oxapay_merchant,
            timeout,
        )?);
        let invoices = InvoiceSender::new(
            &config.telegram.api_url,
            &config.telegram.bot_token,
            &config.telegram.provider_token,
            timeout,
        )?;
        let payments = Arc::new(PaymentService::new(
            db.payments(),
            prices.clone(),
            oxapay,
            invoices,
            config.payments.clone(),
            config.account_creation.account_price_eos,
            &config.telegram.bot_username,
        ));

        Ok(Self {
            config,
            db,
            chain,
            sessions,
            prices,
            credentials,
            wallet,
            orders,
            rate_limiter,
            payments,
        })
    }

    /// Card checkout needs a provider token and a creator key
    pub fn card_payments_enabled(&self) -> bool {
        !self.config.telegram.provider_token.is_empty() && self.wallet.can_create_accounts()
    }

    /// Crypto checkout needs a merchant key and a creator key
    pub fn crypto_payments_enabled(&self) -> bool {
        !self.config.payments.oxapay_merchant.is_empty() && self.wallet.can_create_accounts()
    }
}
