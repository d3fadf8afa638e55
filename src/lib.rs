//! EOS Wallet Bot Library
//!
//! Custodial EOS wallet behind a Telegram bot: encrypted key storage,
//! time-boxed signing sessions, transfers, RAM purchases and RAM limit orders.

pub mod bot;
pub mod chain;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod orders;
pub mod payments;
pub mod price;
pub mod rate_limit;
pub mod storage;
pub mod wallet;

// Re-export commonly used types
pub use config::Config;
pub use context::AppContext;
pub use error::{Error, Result};
