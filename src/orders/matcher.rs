//! RAM limit order matcher
//!
//! Each tick reads the RAM price once, picks every pending order whose limit
//! is at or above it and buys through the owning user's session. An order is
//! claimed (`pending -> triggered`) before anything is broadcast, so it is
//! bought at most once even if recording the result fails. Success and
//! failure are both terminal; a failed order is never retried.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::price::RamPriceSource;
use crate::storage::RamOrderRepository;
use crate::wallet::RamPurchaser;

/// Result of one executed order, for user notification
#[derive(Debug, Clone)]
pub struct OrderOutcome {
    pub order_id: i64,
    pub user_id: i64,
    pub account: String,
    pub ram_bytes: u32,
    /// Transaction id on success, failure reason otherwise
    pub result: std::result::Result<String, String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub matched: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct OrderMatcher {
    orders: RamOrderRepository,
    prices: Arc<dyn RamPriceSource>,
    purchaser: Arc<dyn RamPurchaser>,
    period: Duration,
    outcomes: Option<mpsc::UnboundedSender<OrderOutcome>>,
}

impl OrderMatcher {
    pub fn new(
        orders: RamOrderRepository,
        prices: Arc<dyn RamPriceSource>,
        purchaser: Arc<dyn RamPurchaser>,
        period: Duration,
    ) -> Self {
        Self {
            orders,
            prices,
            purchaser,
            period,
            outcomes: None,
        }
    }

    /// Report every executed order on `tx`
    pub fn with_outcomes(mut self, tx: mpsc::UnboundedSender<OrderOutcome>) -> Self {
        self.outcomes = Some(tx);
        self
    }

    /// One matching pass
    pub async fn tick(&self) -> Result<TickSummary> {
        let price = self.prices.ram_price().await?;
        let orders = self.orders.pending_at_or_below(price).await?;

        let mut summary = TickSummary {
            matched: orders.len(),
            ..Default::default()
        };
        if orders.is_empty() {
            debug!("No RAM orders at or above {} EOS/KB", price);
            return Ok(summary);
        }
        info!("RAM price {} EOS/KB matched {} orders", price, orders.len());

        for order in orders {
            match self.orders.claim(order.order_id).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("RAM order {} already claimed", order.order_id);
                    continue;
                }
                Err(e) => {
                    error!("Could not claim RAM order {}: {}", order.order_id, e);
                    continue;
                }
            }

            let result = self
                .purchaser
                .buy_ram_bytes(order.user_id, &order.account, order.ram_bytes)
                .await;

            let outcome = match result {
                Ok(tx_id) => {
                    summary.succeeded += 1;
                    info!("RAM order {} filled: {}", order.order_id, tx_id);
                    if let Err(e) = self.orders.mark_success(order.order_id, &tx_id).await {
                        error!(
                            "RAM order {} filled by {} but not recorded: {}",
                            order.order_id, tx_id, e
                        );
                    }
                    Ok(tx_id)
                }
                Err(e) => {
                    let reason = e.to_string();
                    summary.failed += 1;
                    warn!("RAM order {} failed: {}", order.order_id, reason);
                    if let Err(e) = self.orders.mark_failed(order.order_id, &reason).await {
                        error!("RAM order {} failure not recorded: {}", order.order_id, e);
                    }
                    Err(reason)
                }
            };

            if let Some(tx) = &self.outcomes {
                let _ = tx.send(OrderOutcome {
                    order_id: order.order_id,
                    user_id: order.user_id,
                    account: order.account.clone(),
                    ram_bytes: order.ram_bytes,
                    result: outcome,
                });
            }
        }

        Ok(summary)
    }

    /// Tick every period until cancelled. Ticks never overlap.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Starting RAM order matcher every {}s", self.period.as_secs());
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("RAM order matching failed: {}", e);
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("RAM order matcher shutting down");
                    break;
                }
            }
        }
    }
}
