//! Paid account creation
//!
//! Two ways to pay for a new account:
//! - Card: a Bot API invoice, confirmed by `successful_payment`
//! - Crypto: an OxaPay payment link, confirmed by the callback listener
//!
//! Either way the bot learns about the outcome through a [`PaymentEvent`]
//! or a payment update and then asks the user for the account password.

pub mod callback;
pub mod invoice;
pub mod oxapay;

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PaymentsConfig;
use crate::error::{Error, Result};
use crate::price::PriceService;
use crate::storage::{Payment, PaymentRepository, PaymentStatus, PaymentType};

pub use callback::{CallbackState, CALLBACK_PATH};
pub use invoice::{card_amount_cents, InvoiceSender};
pub use oxapay::{OxaPayClient, PaymentRequest};

/// A payment changed state outside the dialogue
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentEvent {
    pub user_id: i64,
    pub chat_id: i64,
    pub payment_id: i64,
    pub kind: PaymentType,
    pub status: PaymentStatus,
}

/// Result of asking OxaPay for a payment link
#[derive(Debug, Clone, PartialEq)]
pub enum CryptoCheckout {
    Link(String),
    Rejected(String),
}

pub struct PaymentService {
    payments: PaymentRepository,
    prices: Arc<PriceService>,
    oxapay: Arc<OxaPayClient>,
    invoices: InvoiceSender,
    config: PaymentsConfig,
    account_price_eos: f64,
    bot_username: String,
}

impl PaymentService {
    pub fn new(
        payments: PaymentRepository,
        prices: Arc<PriceService>,
        oxapay: Arc<OxaPayClient>,
        invoices: InvoiceSender,
        config: PaymentsConfig,
        account_price_eos: f64,
        bot_username: &str,
    ) -> Self {
        Self {
            payments,
            prices,
            oxapay,
            invoices,
            config,
            account_price_eos,
            bot_username: bot_username.to_string(),
        }
    }

    pub fn oxapay(&self) -> &Arc<OxaPayClient> {
        &self.oxapay
    }

    /// Account price in whole USD, rounded up
    async fn account_price_usd(&self) -> Result<f64> {
        let eos_usd = self.prices.get_price().await?;
        Ok((eos_usd * self.account_price_eos).ceil())
    }

    /// Record a card payment and send its invoice. Returns the amount in cents.
    pub async fn start_card_payment(&self, user_id: i64, chat_id: i64) -> Result<u32> {
        let eos_usd = self.prices.get_price().await?;
        let cents = card_amount_cents(eos_usd, self.account_price_eos);
        let payload = Uuid::new_v4().to_string();

        let id = self
            .payments
            .create(user_id, chat_id, cents as f64 / 100.0, PaymentType::Card, Some(&payload))
            .await?;

        if let Err(e) = self.invoices.send(chat_id, cents, &payload).await {
            self.payments.set_status(id, PaymentStatus::Failed).await?;
            return Err(e);
        }

        info!("Card invoice {} sent to user {} for {} cents", id, user_id, cents);
        Ok(cents)
    }

    /// Pre-checkout: the payload must name one of our pending card payments
    pub async fn verify_checkout(&self, payload: &str) -> Result<Payment> {
        let payment = self
            .payments
            .by_payload(payload)
            .await?
            .ok_or_else(|| Error::NotFound(format!("invoice {}", payload)))?;
        if payment.normalized_status() != PaymentStatus::Pending {
            return Err(Error::Payment(format!("invoice {} is already {}", payload, payment.status)));
        }
        Ok(payment)
    }

    pub async fn card_succeeded(&self, payload: &str) -> Result<Payment> {
        let payment = self
            .payments
            .set_status_by_payload(payload, PaymentStatus::Succeeded)
            .await?
            .ok_or_else(|| Error::NotFound(format!("invoice {}", payload)))?;
        info!("Card payment {} of user {} succeeded", payment.id, payment.user_id);
        Ok(payment)
    }

    /// Ask OxaPay for a payment link and store what it answered
    pub async fn start_crypto_payment(&self, user_id: i64, chat_id: i64) -> Result<CryptoCheckout> {
        let amount = self.account_price_usd().await?;
        let id = self
            .payments
            .create(user_id, chat_id, amount, PaymentType::Crypto, None)
            .await?;

        let request = PaymentRequest {
            merchant: self.oxapay.merchant().to_string(),
            amount,
            currency: self.config.crypto_currency.clone(),
            life_time: self.config.lifetime_minutes,
            fee_paid_by_payer: 1,
            under_paid_cover: 0,
            description: "EOS Account Creation".into(),
            callback_url: format!(
                "{}{}?userId={}",
                self.config.callback_base_url.trim_end_matches('/'),
                CALLBACK_PATH,
                user_id
            ),
            return_url: format!("https://t.me/{}", self.bot_username),
        };

        let response = match self.oxapay.request_payment(&request).await {
            Ok(response) => response,
            Err(e) => {
                self.payments.set_status(id, PaymentStatus::Failed).await?;
                warn!("OxaPay request for user {} failed: {}", user_id, e);
                return Ok(CryptoCheckout::Rejected(e.to_string()));
            }
        };

        self.payments
            .set_provider_details(
                id,
                &response.status_text(),
                response.track_id.as_deref(),
                response.pay_link.as_deref(),
            )
            .await?;

        match (response.is_ok(), response.pay_link) {
            (true, Some(link)) => {
                info!("Crypto payment {} opened for user {}", id, user_id);
                Ok(CryptoCheckout::Link(link))
            }
            _ => Ok(CryptoCheckout::Rejected(response.message)),
        }
    }

    /// Whether the user has a paid payment not yet spent on an account.
    /// Newer unpaid checkouts do not hide an older paid one.
    pub async fn has_paid(&self, user_id: i64) -> Result<bool> {
        Ok(self.payments.latest_succeeded(user_id).await?.is_some())
    }

    /// Spend the user's succeeded payment so it cannot create a second account
    pub async fn consume(&self, user_id: i64) -> Result<()> {
        let payment = self
            .payments
            .latest_succeeded(user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("paid order for user {}", user_id)))?;
        self.payments.set_status(payment.id, PaymentStatus::Consumed).await?;
        info!("Payment {} of user {} consumed", payment.id, user_id);
        Ok(())
    }
}
