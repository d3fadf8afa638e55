//! CLI command implementations

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bot::TelegramBot;
use crate::chain::{ChainRpc, EndpointSelector, HttpChainRpc};
use crate::config::Config;
use crate::context::AppContext;
use crate::orders::OrderMatcher;
use crate::payments::{self, CallbackState};
use crate::price::PriceService;
use crate::storage::Database;

/// The matcher signs with the sessions held by this process, so it only
/// ever runs next to the bot that authorizes them
fn matcher_for(ctx: &AppContext) -> OrderMatcher {
    OrderMatcher::new(
        ctx.db.ram_orders(),
        ctx.prices.clone(),
        ctx.wallet.clone(),
        Duration::from_secs(ctx.config.orders.matcher_interval_secs),
    )
}

/// Start the bot, the RAM order matcher and the payment callback listener
pub async fn start(config: &Config) -> Result<()> {
    config.require_bot_token()?;
    info!("Starting EOS wallet bot...");

    let ctx = Arc::new(AppContext::build(config.clone()).await?);
    if !ctx.wallet.can_create_accounts() {
        warn!("No creator key configured - paid account creation is disabled");
    }

    let shutdown = CancellationToken::new();
    let (payment_tx, payment_rx) = mpsc::unbounded_channel();
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

    let matcher = matcher_for(&ctx).with_outcomes(outcome_tx);
    let matcher_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { matcher.run(shutdown).await }
    });

    let callback_task = if ctx.crypto_payments_enabled() {
        let state = Arc::new(CallbackState {
            payments: ctx.db.payments(),
            oxapay: ctx.payments.oxapay().clone(),
            events: payment_tx,
        });
        let listen = config.payments.callback_listen.clone();
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = payments::callback::serve(&listen, state, shutdown).await {
                error!("Payment callback listener failed: {}", e);
            }
        }))
    } else {
        info!("OxaPay merchant not configured - crypto payments disabled");
        None
    };

    let bot = TelegramBot::new(ctx.clone())?;
    let bot_task = tokio::spawn(bot.run(shutdown.clone(), payment_rx, outcome_rx));

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    shutdown.cancel();

    if let Err(e) = bot_task.await {
        error!("Bot task failed: {}", e);
    }
    if let Err(e) = matcher_task.await {
        error!("Matcher task failed: {}", e);
    }
    if let Some(task) = callback_task {
        if let Err(e) = task.await {
            error!("Callback listener task failed: {}", e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Check system health
pub async fn health(config: &Config) -> Result<()> {
    println!("\n=== SYSTEM HEALTH CHECK ===\n");

    let mut all_healthy = true;
    let timeout = Duration::from_millis(config.chain.timeout_ms);
    let selector = Arc::new(EndpointSelector::new(
        config.chain.endpoints.clone(),
        Duration::from_secs(config.chain.endpoint_ttl_secs),
        timeout,
    )?);

    for probe in selector.probe_all().await {
        print!("RPC {}... ", probe.endpoint);
        match probe.latency {
            Some(latency) => println!("OK ({}ms)", latency.as_millis()),
            None => {
                println!("FAILED");
                all_healthy = false;
            }
        }
    }

    let rpc: Arc<dyn ChainRpc> = Arc::new(HttpChainRpc::new(selector, timeout)?);
    let prices = PriceService::new(&config.price, rpc, timeout)?;
    let (eos_usd, ram) = prices.check().await;

    print!("EOS price feed... ");
    match eos_usd {
        Ok(price) => println!("OK (${:.4})", price),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    print!("RAM market... ");
    match ram {
        Ok(price) => println!("OK ({:.8} EOS/kb)", price),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    print!("Database... ");
    let started = Instant::now();
    match check_database(config).await {
        Ok(users) => println!("OK ({} users, {}ms)", users, started.elapsed().as_millis()),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    print!("Telegram... ");
    if config.telegram.bot_token.is_empty() {
        println!("NOT CONFIGURED");
        all_healthy = false;
    } else {
        println!("token set");
    }

    print!("Account creation... ");
    if config.account_creation.creator_private_key.is_empty() {
        println!("DISABLED (no creator key)");
    } else {
        println!("creator {}", config.account_creation.creator_account);
    }

    println!();
    if all_healthy {
        println!("All systems healthy!");
    } else {
        println!("Some systems are unhealthy. Check the errors above.");
    }

    Ok(())
}

async fn check_database(config: &Config) -> crate::error::Result<i64> {
    let db = Database::connect(&config.database).await?;
    db.users().count().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::client::testing::FakeChain;
    use crate::chain::{AuthorizerAccount, PrivateKey};
    use crate::rate_limit::Unlimited;
    use crate::storage::RamOrderStatus;
    use crate::wallet::ManualClock;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn test_matcher_signs_with_bot_sessions() {
        let chain = Arc::new(FakeChain::new());
        chain.ram_rows.lock().unwrap().push(json!({
            "base": {"balance": "1000000 RAM", "weight": "0.5"},
            "quote": {"balance": "20.0000 EOS", "weight": "0.5"}
        }));
        let key = PrivateKey::generate();
        chain.authorizers.lock().unwrap().insert(
            key.public_key().to_string(),
            vec![AuthorizerAccount {
                account_name: "alice".into(),
                permission_name: "active".into(),
            }],
        );

        let ctx = AppContext::assemble(
            Config::default(),
            Database::in_memory().await.unwrap(),
            chain.clone(),
            Arc::new(ManualClock::new(Utc::now())),
            Arc::new(Unlimited),
        )
        .unwrap();
        ctx.credentials.import(1, &key.to_wif(), "password1").await.unwrap();
        ctx.sessions.authorize(1, "password1", 24).await.unwrap();
        let order_id = ctx.orders.place(1, "alice", 4096, 0.05).await.unwrap();

        let summary = matcher_for(&ctx).tick().await.unwrap();
        assert_eq!((summary.succeeded, summary.failed), (1, 0));
        assert_eq!(chain.pushed_count(), 1);
        assert_eq!(
            ctx.db.ram_orders().get(order_id).await.unwrap().unwrap().status,
            RamOrderStatus::Success
        );
    }
}
