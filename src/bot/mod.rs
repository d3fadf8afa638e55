//! Telegram front end
//!
//! Long-polls the Bot API and hands every update to the [`Controller`]:
//!
//! ```text
//! getUpdates ──→ Controller ──→ Vec<Outgoing> ──→ send / edit / delete
//!                    ↑
//!      PaymentEvent / OrderOutcome channels
//! ```
//!
//! Updates are handled on their own tasks; the per-user dialogue lock keeps
//! one user's updates from interleaving.

pub mod dialogue;
pub mod format;
pub mod handlers;
pub mod keyboards;
pub mod parse;
pub mod reply;

pub use dialogue::{DialogueState, Dialogues};
pub use handlers::{Controller, Sender};
pub use reply::{Outgoing, Reply};

use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, MessageId, ParseMode, PreCheckoutQuery, UpdateKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::orders::OrderOutcome;
use crate::payments::PaymentEvent;

/// Pause after a failed poll
const POLL_RETRY_DELAY: Duration = Duration::from_secs(3);

/// How often idle per-user state is dropped
const PRUNE_INTERVAL: Duration = Duration::from_secs(600);

/// Chat a batch of actions goes to, and the message that caused it
#[derive(Debug, Clone, Copy)]
struct Target {
    chat_id: ChatId,
    source: Option<MessageId>,
}

pub struct TelegramBot {
    bot: Bot,
    controller: Arc<Controller>,
    poll_timeout: u32,
}

impl TelegramBot {
    pub fn new(ctx: Arc<AppContext>) -> Result<Self> {
        let token = ctx.config.telegram.bot_token.clone();
        if token.is_empty() {
            return Err(Error::MissingEnvVar("BOT_TOKEN".into()));
        }
        let api_url = url::Url::parse(&ctx.config.telegram.api_url)
            .map_err(|e| Error::Config(format!("Invalid Telegram API URL: {}", e)))?;

        Ok(Self {
            bot: Bot::new(token).set_api_url(api_url),
            poll_timeout: ctx.config.telegram.poll_timeout_secs,
            controller: Arc::new(Controller::new(ctx)),
        })
    }

    /// Poll until `shutdown` fires, also relaying payment and order notifications
    pub async fn run(
        self,
        shutdown: CancellationToken,
        mut payment_events: mpsc::UnboundedReceiver<PaymentEvent>,
        mut order_outcomes: mpsc::UnboundedReceiver<OrderOutcome>,
    ) {
        info!("Telegram bot polling every {}s", self.poll_timeout);
        let mut offset: i64 = 0;
        let mut prune = tokio::time::interval(PRUNE_INTERVAL);
        prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let mut request = self.bot.get_updates().timeout(self.poll_timeout);
            if offset > 0 {
                request = request.offset(offset as i32);
            }

            // A dropped poll loses nothing: updates are only confirmed by the next offset
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Telegram bot shutting down");
                    break;
                }
                _ = prune.tick() => self.controller.prune(),
                Some(event) = payment_events.recv() => {
                    let bot = self.bot.clone();
                    let controller = self.controller.clone();
                    tokio::spawn(async move {
                        let target = Target { chat_id: ChatId(event.chat_id), source: None };
                        let replies = controller.on_payment_event(&event).await;
                        if let Err(e) = apply(&bot, target, replies).await {
                            warn!("Payment notification to user {} failed: {}", event.user_id, e);
                        }
                    });
                }
                Some(outcome) = order_outcomes.recv() => {
                    let bot = self.bot.clone();
                    let controller = self.controller.clone();
                    tokio::spawn(async move {
                        let target = Target { chat_id: ChatId(outcome.user_id), source: None };
                        let replies = controller.on_order_outcome(&outcome).await;
                        if let Err(e) = apply(&bot, target, replies).await {
                            warn!("Order {} notification failed: {}", outcome.order_id, e);
                        }
                    });
                }
                result = request.send() => match result {
                    Ok(updates) => {
                        for update in updates {
                            offset = update.id.0 as i64 + 1;
                            let bot = self.bot.clone();
                            let controller = self.controller.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_update(&bot, &controller, update.kind).await {
                                    warn!("Update handling failed: {}", e);
                                }
                            });
                        }
                    }
                    Err(e) => {
                        warn!("getUpdates failed: {}", e);
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                    }
                },
            }
        }
    }
}

async fn handle_update(bot: &Bot, controller: &Controller, kind: UpdateKind) -> Result<()> {
    match kind {
        UpdateKind::Message(message) => handle_message(bot, controller, message).await,
        UpdateKind::CallbackQuery(query) => handle_callback(bot, controller, query).await,
        UpdateKind::PreCheckoutQuery(query) => handle_pre_checkout(bot, controller, query).await,
        _ => {
            debug!("Ignoring unsupported update");
            Ok(())
        }
    }
}

async fn handle_message(bot: &Bot, controller: &Controller, message: Message) -> Result<()> {
    // Keys and passwords are only accepted in private chats
    if !message.chat.is_private() {
        return Ok(());
    }
    let Some(from) = message.from.as_ref() else {
        return Ok(());
    };

    let sender = Sender {
        user_id: from.id.0 as i64,
        chat_id: message.chat.id.0,
        username: from.username.clone(),
        first_name: Some(from.first_name.clone()),
        last_name: from.last_name.clone(),
    };
    let target = Target {
        chat_id: message.chat.id,
        source: Some(message.id),
    };

    let replies = if let Some(payment) = message.successful_payment() {
        controller
            .on_successful_payment(sender.user_id, &payment.invoice_payload)
            .await
    } else if let Some(text) = message.text() {
        controller.on_text(&sender, text).await
    } else {
        return Ok(());
    };

    apply(bot, target, replies).await
}

async fn handle_callback(bot: &Bot, controller: &Controller, query: CallbackQuery) -> Result<()> {
    // Answer first to stop the button spinner
    bot.answer_callback_query(&query.id).await?;

    let Some(message) = query.message.as_ref() else {
        debug!("Callback without message context");
        return Ok(());
    };
    let chat_id = message.chat().id;
    let target = Target {
        chat_id,
        source: Some(message.id()),
    };

    let data = query.data.as_deref().unwrap_or_default();
    let replies = controller
        .on_callback(query.from.id.0 as i64, chat_id.0, data)
        .await;
    apply(bot, target, replies).await
}

async fn handle_pre_checkout(bot: &Bot, controller: &Controller, query: PreCheckoutQuery) -> Result<()> {
    match controller.on_pre_checkout(&query.invoice_payload).await {
        Ok(()) => {
            bot.answer_pre_checkout_query(&query.id, true).await?;
        }
        Err(reason) => {
            bot.answer_pre_checkout_query(&query.id, false)
                .error_message(reason)
                .await?;
        }
    }
    Ok(())
}

/// Carry out the controller's actions in order
async fn apply(bot: &Bot, target: Target, replies: Vec<Outgoing>) -> Result<()> {
    for outgoing in replies {
        match outgoing {
            Outgoing::DeleteSource => {
                if let Some(message_id) = target.source {
                    if let Err(e) = bot.delete_message(target.chat_id, message_id).await {
                        warn!("Could not delete message in chat {}: {}", target.chat_id.0, e);
                    }
                }
            }
            Outgoing::Reply(reply) => send_reply(bot, target, reply).await?,
        }
    }
    Ok(())
}

async fn send_reply(bot: &Bot, target: Target, reply: Reply) -> Result<()> {
    if let (true, Some(message_id)) = (reply.edit, target.source) {
        let mut request = bot
            .edit_message_text(target.chat_id, message_id, reply.text.clone())
            .parse_mode(ParseMode::Html);
        if let Some(keyboard) = reply.keyboard.clone() {
            request = request.reply_markup(keyboard);
        }
        match request.await {
            Ok(_) => return Ok(()),
            // Invoices and old messages cannot be edited
            Err(e) => debug!("Edit failed, sending instead: {}", e),
        }
    }

    let mut request = bot
        .send_message(target.chat_id, reply.text)
        .parse_mode(ParseMode::Html);
    if let Some(keyboard) = reply.keyboard {
        request = request.reply_markup(keyboard);
    }
    request.await?;
    Ok(())
}
