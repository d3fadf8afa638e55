//! EOS/USD spot price from public exchange tickers

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::future::retry;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{PriceConfig, PriceProviderConfig, PriceProviderKind};
use crate::error::{Error, Result};

/// Constant delay between attempts, giving up after `max_attempts` tries
#[derive(Debug, Clone)]
pub struct FixedBackoff {
    delay: Duration,
    max_attempts: u32,
    failures: u32,
}

impl FixedBackoff {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: max_attempts.max(1),
            failures: 0,
        }
    }
}

impl Backoff for FixedBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.max_attempts {
            None
        } else {
            Some(self.delay)
        }
    }

    fn reset(&mut self) {
        self.failures = 0;
    }
}

#[derive(Deserialize)]
struct BinanceTicker {
    price: String,
}

#[derive(Deserialize)]
struct CoingeckoPrice {
    eos: CoingeckoUsd,
}

#[derive(Deserialize)]
struct CoingeckoUsd {
    usd: f64,
}

#[derive(Deserialize)]
struct OkxTickers {
    data: Vec<OkxTicker>,
}

#[derive(Deserialize)]
struct OkxTicker {
    last: String,
}

fn parse_decimal(raw: &str, provider: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|e| Error::PriceFeed(format!("{} returned bad price {:?}: {}", provider, raw, e)))
}

/// Extract the price from a provider's response body
pub fn parse_price(kind: &PriceProviderKind, body: &str) -> Result<f64> {
    let price = match kind {
        PriceProviderKind::Binance => {
            let ticker: BinanceTicker = serde_json::from_str(body)?;
            parse_decimal(&ticker.price, "Binance")?
        }
        PriceProviderKind::Coingecko => {
            let price: CoingeckoPrice = serde_json::from_str(body)?;
            price.eos.usd
        }
        PriceProviderKind::Okx => {
            let tickers: OkxTickers = serde_json::from_str(body)?;
            let ticker = tickers
                .data
                .first()
                .ok_or_else(|| Error::PriceFeed("OKX returned no tickers".into()))?;
            parse_decimal(&ticker.last, "OKX")?
        }
    };

    if !price.is_finite() || price <= 0.0 {
        return Err(Error::PriceFeed(format!("Non-positive price {}", price)));
    }
    Ok(price)
}

pub struct PriceFeed {
    client: reqwest::Client,
    providers: Vec<PriceProviderConfig>,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl PriceFeed {
    pub fn new(config: &PriceConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            providers: config.providers.clone(),
            retry_attempts: config.retry_attempts,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    async fn fetch_from(&self, provider: &PriceProviderConfig) -> Result<f64> {
        let response = self.client.get(&provider.url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::PriceFeed(format!("{:?} returned {}", provider.kind, status)));
        }
        parse_price(&provider.kind, &body)
    }

    /// Walk providers in order, first answer wins
    async fn fetch_once(&self) -> Result<f64> {
        let mut last_error = None;
        for provider in &self.providers {
            match self.fetch_from(provider).await {
                Ok(price) => {
                    debug!("EOS price {} from {:?}", price, provider.kind);
                    return Ok(price);
                }
                Err(e) => {
                    debug!("Price provider {:?} failed: {}", provider.kind, e);
                    last_error = Some(e);
                }
            }
        }
        Err(Error::PriceFeed(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "No price providers configured".into()),
        ))
    }

    /// EOS/USD, retried with a fixed delay. Fails when every attempt failed.
    pub async fn fetch_eos_usd(&self) -> Result<f64> {
        let policy = FixedBackoff::new(self.retry_delay, self.retry_attempts);
        retry(policy, || async {
            self.fetch_once().await.map_err(|e| {
                warn!("EOS price fetch failed: {}", e);
                if e.is_retryable() {
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }
}
