//! EOS/USD and RAM prices
//!
//! Both quantities are cached for a short TTL. A miss goes upstream with a
//! fixed-delay retry; when every attempt fails the caller gets the error, a
//! stale value is never served.

pub mod cache;
pub mod feed;
pub mod ram;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::future::retry;
use tracing::warn;

use crate::chain::ChainRpc;
use crate::config::PriceConfig;
use crate::error::Result;

pub use cache::{CachedValue, TtlCache};
pub use feed::{FixedBackoff, PriceFeed};
pub use ram::ram_price_per_kb;

/// Anything that can quote the current RAM price in EOS per KB
#[async_trait]
pub trait RamPriceSource: Send + Sync {
    async fn ram_price(&self) -> Result<f64>;
}

pub struct PriceService {
    feed: PriceFeed,
    rpc: Arc<dyn ChainRpc>,
    eos_usd: TtlCache<f64>,
    ram_per_kb: TtlCache<f64>,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl PriceService {
    pub fn new(config: &PriceConfig, rpc: Arc<dyn ChainRpc>, timeout: Duration) -> Result<Self> {
        let ttl = Duration::from_secs(config.cache_ttl_secs);
        Ok(Self {
            feed: PriceFeed::new(config, timeout)?,
            rpc,
            eos_usd: TtlCache::new(ttl),
            ram_per_kb: TtlCache::new(ttl),
            retry_attempts: config.retry_attempts,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    /// EOS price in USD
    pub async fn get_price(&self) -> Result<f64> {
        if let Some(price) = self.eos_usd.get().await {
            return Ok(price);
        }
        let price = self.feed.fetch_eos_usd().await?;
        self.eos_usd.set(price).await;
        Ok(price)
    }

    /// RAM price in EOS per KB
    pub async fn get_ram_price(&self) -> Result<f64> {
        if let Some(price) = self.ram_per_kb.get().await {
            return Ok(price);
        }

        let policy = FixedBackoff::new(self.retry_delay, self.retry_attempts);
        let price = retry(policy, || async {
            ram::fetch_ram_price(self.rpc.as_ref()).await.map_err(|e| {
                warn!("RAM price fetch failed: {}", e);
                if e.is_retryable() {
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await?;

        self.ram_per_kb.set(price).await;
        Ok(price)
    }

    /// Probe the upstream feeds bypassing the cache
    pub async fn check(&self) -> (Result<f64>, Result<f64>) {
        let eos = self.feed.fetch_eos_usd().await;
        let ram = ram::fetch_ram_price(self.rpc.as_ref()).await;
        (eos, ram)
    }
}

#[async_trait]
impl RamPriceSource for PriceService {
    async fn ram_price(&self) -> Result<f64> {
        self.get_ram_price().await
    }
}
