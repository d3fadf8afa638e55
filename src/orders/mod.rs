//! RAM limit orders
//!
//! [`OrderBook`] is the user-facing side (place, page through, clear);
//! [`OrderMatcher`] executes orders in the background.

pub mod matcher;

use crate::chain::Name;
use crate::error::{Error, Result};
use crate::storage::{NewRamOrder, RamOrder, RamOrderRepository};

pub use matcher::{OrderMatcher, OrderOutcome, TickSummary};

#[derive(Debug, Clone)]
pub struct OrderPage {
    pub orders: Vec<RamOrder>,
    /// Zero-based
    pub page: u32,
    pub total_pages: u32,
    pub total: i64,
    pub page_size: u32,
}

impl OrderPage {
    /// Orders on this page and every page before it
    pub fn shown(&self) -> i64 {
        self.page as i64 * self.page_size as i64 + self.orders.len() as i64
    }
}

pub struct OrderBook {
    repo: RamOrderRepository,
    max_pending: u32,
    page_size: u32,
}

impl OrderBook {
    pub fn new(repo: RamOrderRepository, max_pending: u32, page_size: u32) -> Self {
        Self {
            repo,
            max_pending,
            page_size: page_size.max(1),
        }
    }

    /// Store a pending order; a full book is [`Error::OrderLimitReached`]
    pub async fn place(&self, user_id: i64, account: &str, ram_bytes: u32, price_per_kb: f64) -> Result<i64> {
        Name::new(account)?;
        if ram_bytes == 0 {
            return Err(Error::InvalidInput("RAM amount must be positive".into()));
        }
        if !price_per_kb.is_finite() || price_per_kb <= 0.0 {
            return Err(Error::InvalidInput(format!("Invalid price: {}", price_per_kb)));
        }

        self.repo
            .insert_pending(
                &NewRamOrder {
                    user_id,
                    account: account.to_string(),
                    ram_bytes,
                    price_per_kb,
                },
                self.max_pending,
            )
            .await
    }

    pub async fn page(&self, user_id: i64, page: u32) -> Result<OrderPage> {
        let total = self.repo.count_for_user(user_id).await?;
        let total_pages = ((total as u64).div_ceil(self.page_size as u64)).max(1) as u32;
        let page = page.min(total_pages - 1);
        let orders = self.repo.list_for_user(user_id, page, self.page_size).await?;

        Ok(OrderPage {
            orders,
            page,
            total_pages,
            total,
            page_size: self.page_size,
        })
    }

    pub async fn clear(&self, user_id: i64) -> Result<u64> {
        self.repo.clear_for_user(user_id).await
    }
}
