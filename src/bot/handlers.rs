//! Update routing for commands, buttons and dialogue replies
//!
//! Handlers never talk to Telegram themselves. Each entry point returns the
//! [`Outgoing`] actions for the transport to apply, which keeps every flow
//! testable against an in-memory chain and database.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::dialogue::{DialogueState, Dialogues};
use super::format::{self, escape_html, tx_link};
use super::keyboards;
use super::parse::{self, RamAmount};
use super::reply::{Outgoing, Reply};
use crate::chain::PrivateKey;
use crate::context::AppContext;
use crate::error::{is_resource_message, Error, Result};
use crate::orders::OrderOutcome;
use crate::payments::{CryptoCheckout, PaymentEvent};
use crate::rate_limit::RateDecision;
use crate::storage::PaymentStatus;
use crate::wallet::{Activation, ImportOutcome};

const BUSY: &str = "Please finish the current step first, or send /cancel.";
const INCORRECT_PASSWORD: &str = "🙅 Incorrect password. Please try again.";
const PAID_ACCOUNT_PROMPT: &str =
    "Payment successful! Please enter an 8-character or longer password to create your EOS account:";
const AUTHORIZE_PROMPT: &str = "⚠️The bot will be authorized to execute some transactions with your private key \
     temporarily. Such as executing the limit order. \n\n🔐Please enter your password to authorize:";
const TRANSFER_PROMPT: &str = "Enter Addresses with Amounts and memo(optional). The address and amount are \
     separated by commas.\n\n&lt;receiver&gt;, &lt;amount&gt;, &lt;memo&gt;\n\n<b>Example (Click to Copy):</b>\n\
     1. <code>replace_account,0.001</code>\n2. <code>replace_account,1,ThisIsTheMemo</code>\n\
     3. <code>replace_account,3.45,This_is_The_memo</code>\n(\"_\" will be replaced with space)";

/// Who sent a message
#[derive(Debug, Clone, Default)]
pub struct Sender {
    pub user_id: i64,
    pub chat_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

type Replies = Vec<Outgoing>;

fn reply(text: impl Into<String>) -> Replies {
    vec![Reply::text(text).into()]
}

fn reply_with(text: impl Into<String>, keyboard: teloxide::types::InlineKeyboardMarkup) -> Replies {
    vec![Reply::text(text).keyboard(keyboard).into()]
}

/// Start a dialogue step unless another one is pending
fn begin(state: &mut DialogueState, next: DialogueState, prompt: Reply) -> Replies {
    if !state.is_idle() {
        debug!("Rejecting new prompt while {} is pending", state.name());
        return reply(BUSY);
    }
    *state = next;
    vec![prompt.into()]
}

/// Input errors carry their own wording; everything else is shown as is
fn error_text(err: &Error) -> String {
    match err {
        Error::InvalidInput(msg) => escape_html(msg),
        other => escape_html(&other.to_string()),
    }
}

/// States whose answer is a key or password
fn expects_secret(state: &DialogueState) -> bool {
    matches!(
        state,
        DialogueState::ImportKey
            | DialogueState::ImportPassword { .. }
            | DialogueState::OrderPassword
            | DialogueState::AuthorizePassword
            | DialogueState::UnlockPassword
            | DialogueState::AccountPassword { .. }
    )
}

fn price_text(price: Option<f64>) -> String {
    match price {
        Some(p) => format!("{:.8}", p),
        None => "unavailable".to_string(),
    }
}

pub struct Controller {
    ctx: Arc<AppContext>,
    dialogues: Dialogues,
}

impl Controller {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            dialogues: Dialogues::new(),
        }
    }

    /// Release per-user state that is no longer needed
    pub fn prune(&self) {
        let dialogues = self.dialogues.prune_idle();
        let locks = self.ctx.wallet.prune_locks();
        self.ctx.rate_limiter.prune();
        debug!("Pruned {} idle dialogues and {} account locks", dialogues, locks);
    }

    fn settle(&self, user_id: i64, result: Result<Replies>) -> Replies {
        match result {
            Ok(replies) => replies,
            Err(e) => {
                warn!("Update from user {} failed: {}", user_id, e);
                reply(error_text(&e))
            }
        }
    }

    /// A command or the answer to a pending prompt
    pub async fn on_text(&self, sender: &Sender, text: &str) -> Replies {
        let text = text.trim();
        match text.strip_prefix('/') {
            Some(command) => {
                let result = self.on_command(sender, command).await;
                self.settle(sender.user_id, result)
            }
            None => self.on_reply(sender.user_id, text).await,
        }
    }

    async fn on_command(&self, sender: &Sender, command: &str) -> Result<Replies> {
        let name = command.split_whitespace().next().unwrap_or_default();
        let name = name.split('@').next().unwrap_or(name);

        match name {
            "start" => self.start(sender).await,
            "cancel" => {
                let mut state = self.dialogues.lock(sender.user_id).await;
                if state.is_idle() {
                    return Ok(reply_with("Nothing to cancel.", keyboards::start_menu()));
                }
                debug!("User {} cancelled {}", sender.user_id, state.name());
                *state = DialogueState::Idle;
                Ok(reply_with("Cancelled.", keyboards::start_menu()))
            }
            "wallets" => {
                let mut state = self.dialogues.lock(sender.user_id).await;
                self.wallets(sender.user_id, &mut state).await
            }
            _ => Ok(reply("Unknown command. Send /start to open the menu.")),
        }
    }

    async fn start(&self, sender: &Sender) -> Result<Replies> {
        if let RateDecision::Limited { wait } = self.ctx.rate_limiter.check(sender.user_id) {
            return Ok(reply(format!(
                "Rate limit exceeded. Please try again after {} seconds.",
                wait.as_secs().max(1)
            )));
        }

        self.ctx
            .db
            .users()
            .upsert(
                sender.user_id,
                sender.username.as_deref(),
                sender.first_name.as_deref(),
                sender.last_name.as_deref(),
            )
            .await?;

        let eos_usd = self.ctx.prices.get_price().await.ok();
        let ram = self.ctx.prices.get_ram_price().await.ok();
        Ok(reply_with(format::welcome(eos_usd, ram), keyboards::start_menu()))
    }

    async fn on_reply(&self, user_id: i64, text: &str) -> Replies {
        let mut state = self.dialogues.lock(user_id).await;
        let current = std::mem::take(&mut *state);
        let secret = expects_secret(&current);

        let result = self.continue_dialogue(user_id, current, text, &mut state).await;
        let mut replies = self.settle(user_id, result);
        if secret {
            replies.insert(0, Outgoing::DeleteSource);
        }
        replies
    }

    /// `state` starts out idle; a step that wants another answer sets it again
    async fn continue_dialogue(
        &self,
        user_id: i64,
        current: DialogueState,
        text: &str,
        state: &mut DialogueState,
    ) -> Result<Replies> {
        match current {
            DialogueState::Idle => {
                debug!("Ignoring free text from user {}", user_id);
                Ok(Vec::new())
            }
            DialogueState::ImportKey => Ok(self.import_key(text, state)),
            DialogueState::ImportPassword { private_key } => {
                self.import_password(user_id, private_key, text, state).await
            }
            DialogueState::ChooseAccount { pending } => {
                *state = DialogueState::ChooseAccount { pending };
                Ok(reply("Please select one of the accounts above, or send /cancel."))
            }
            DialogueState::OrderPassword => self.order_password(user_id, text, state).await,
            DialogueState::AuthorizePassword => self.authorize_password(user_id, text, state).await,
            DialogueState::AuthorizeDuration { password } => {
                *state = DialogueState::AuthorizeDuration { password };
                Ok(reply("Please choose an authorization duration above, or send /cancel."))
            }
            DialogueState::UnlockPassword => self.unlock(user_id, text).await,
            DialogueState::Transfer => self.transfer(user_id, text).await,
            DialogueState::BuyRam => self.buy_ram(user_id, text).await,
            DialogueState::RamOrder => self.place_ram_order(user_id, text).await,
            DialogueState::AccountPassword { failures } => {
                self.paid_account_password(user_id, failures, text, state).await
            }
        }
    }

    fn import_key(&self, text: &str, state: &mut DialogueState) -> Replies {
        if text.parse::<PrivateKey>().is_err() {
            *state = DialogueState::ImportKey;
            return reply("Invalid EOS private key. Please enter it again, or send /cancel.");
        }
        *state = DialogueState::ImportPassword {
            private_key: text.to_string(),
        };
        reply("🔐Please enter an encryption password(>= 8 characters):")
    }

    async fn import_password(
        &self,
        user_id: i64,
        private_key: String,
        password: &str,
        state: &mut DialogueState,
    ) -> Result<Replies> {
        if self.ctx.credentials.check_password(password).is_err() {
            *state = DialogueState::ImportPassword { private_key };
            return Ok(reply(
                "Invalid password. Please provide an encryption password.(>= 8 characters)",
            ));
        }

        match self.ctx.credentials.import(user_id, &private_key, password).await {
            Ok(ImportOutcome::Linked(credential)) => Ok(reply_with(
                format!("Account imported successfully.\n\n{}", format::linked(&credential)),
                keyboards::start_menu(),
            )),
            Ok(ImportOutcome::Choose(pending)) => {
                let keyboard = keyboards::select_account(&pending.accounts);
                *state = DialogueState::ChooseAccount { pending };
                Ok(reply_with("Multiple accounts found. Please select one:", keyboard))
            }
            Err(e) => {
                warn!("Import for user {} failed: {}", user_id, e);
                Ok(reply(format!("Error importing EOS account: {}", error_text(&e))))
            }
        }
    }

    async fn order_password(&self, user_id: i64, password: &str, state: &mut DialogueState) -> Result<Replies> {
        if self.ctx.credentials.check_password(password).is_err() {
            *state = DialogueState::OrderPassword;
            return Ok(reply("Invalid password. Please provide a password.(>= 8 characters)"));
        }

        match self.ctx.credentials.create_account_order(user_id, password).await {
            Ok(ticket) => Ok(reply_with(
                format::account_ticket(&ticket),
                keyboards::new_order_ticket(),
            )),
            Err(e) => {
                warn!("Account order for user {} failed: {}", user_id, e);
                Ok(reply(format!("Error creating EOS account: {}", error_text(&e))))
            }
        }
    }

    async fn authorize_password(&self, user_id: i64, password: &str, state: &mut DialogueState) -> Result<Replies> {
        match self.ctx.sessions.verify_password(user_id, password).await {
            Ok(()) => {
                *state = DialogueState::AuthorizeDuration {
                    password: password.to_string(),
                };
                Ok(reply_with(
                    "Select authorization duration:",
                    keyboards::authorize_durations(&self.ctx.config.session.durations_hours),
                ))
            }
            Err(Error::WrongPassword) => Ok(reply_with(INCORRECT_PASSWORD, keyboards::start_menu())),
            Err(e) => Ok(reply(format!("Error authorizing user: {}", error_text(&e)))),
        }
    }

    async fn unlock(&self, user_id: i64, password: &str) -> Result<Replies> {
        let hours = self.ctx.config.session.unlock_hours;
        match self.ctx.sessions.authorize(user_id, password, hours).await {
            Ok(_) => match self.wallet_view(user_id).await? {
                Some(mut view) => {
                    view.text = format!("<b>Unlock Wallet then buy RAM or transfer. </b>\n\n{}", view.text);
                    Ok(vec![view.into()])
                }
                None => Ok(reply("Please Create Account or Import Account.")),
            },
            Err(Error::WrongPassword) => Ok(reply_with(INCORRECT_PASSWORD, keyboards::start_menu())),
            Err(e) => Ok(reply(format!("Error authorizing user: {}", error_text(&e)))),
        }
    }

    /// Error text plus the resource hint when the chain ran out of CPU, NET or RAM
    async fn failure_text(&self, prefix: &str, user_id: i64, err: &Error) -> String {
        let mut text = format!("{}: {}", prefix, error_text(err));
        if err.is_resource_exhaustion() {
            if let Ok(Some(credential)) = self.ctx.credentials.credential(user_id).await {
                text.push_str(&format::resource_hint(&credential.account_name));
            }
        }
        text
    }

    async fn transfer(&self, user_id: i64, text: &str) -> Result<Replies> {
        let request = match parse::parse_transfer(text) {
            Ok(request) => request,
            Err(e) => return Ok(reply(error_text(&e))),
        };

        match self
            .ctx
            .wallet
            .transfer(user_id, &request.recipient, request.amount, &request.memo)
            .await
        {
            Ok(tx_id) => {
                let link = tx_link(&self.ctx.config.chain.explorer_tx_url, &tx_id);
                Ok(reply_with(
                    format!(
                        "Successfully transferred {} to {} with memo: {}.",
                        format::eos(request.amount),
                        escape_html(&request.recipient),
                        escape_html(&request.memo)
                    ),
                    keyboards::transaction(&link),
                ))
            }
            Err(e) => {
                warn!("Transfer by user {} failed: {}", user_id, e);
                Ok(reply(self.failure_text("Error transferring EOS", user_id, &e).await))
            }
        }
    }

    async fn buy_ram(&self, user_id: i64, text: &str) -> Result<Replies> {
        let purchase = match parse::parse_ram_purchase(text) {
            Ok(purchase) => purchase,
            Err(e) => return Ok(reply(error_text(&e))),
        };

        let result = match purchase.amount {
            RamAmount::Bytes(bytes) => self.ctx.wallet.buy_ram_bytes(user_id, &purchase.receiver, bytes).await,
            RamAmount::Eos(amount) => {
                self.ctx
                    .wallet
                    .buy_ram_by_amount(user_id, &purchase.receiver, amount)
                    .await
            }
        };

        match result {
            Ok(tx_id) => Ok(reply_with(
                format!(
                    "RAM bought successfully!\nTransaction ID: {}",
                    tx_link(&self.ctx.config.chain.explorer_tx_url, &tx_id)
                ),
                keyboards::wallet_back(),
            )),
            Err(e) => {
                warn!("RAM purchase by user {} failed: {}", user_id, e);
                Ok(reply(self.failure_text("Error buying RAM", user_id, &e).await))
            }
        }
    }

    async fn place_ram_order(&self, user_id: i64, text: &str) -> Result<Replies> {
        let request = match parse::parse_ram_order(text) {
            Ok(request) => request,
            Err(e) => return Ok(reply(error_text(&e))),
        };

        match self
            .ctx
            .orders
            .place(user_id, &request.receiver, request.ram_bytes, request.price_per_kb)
            .await
        {
            Ok(order_id) => {
                info!("User {} placed RAM order {}", user_id, order_id);
                Ok(reply_with("RAM order created successfully.", keyboards::wallet_back()))
            }
            Err(Error::OrderLimitReached(limit)) => Ok(reply(format!(
                "You have reached the maximum limit of {} pending RAM orders.",
                limit
            ))),
            Err(e) => Ok(reply(format!("Error creating RAM order: {}", error_text(&e)))),
        }
    }

    async fn paid_account_password(
        &self,
        user_id: i64,
        failures: u32,
        password: &str,
        state: &mut DialogueState,
    ) -> Result<Replies> {
        if self.ctx.credentials.check_password(password).is_err() {
            let failures = failures + 1;
            if failures < self.ctx.config.account_creation.password_retries {
                *state = DialogueState::AccountPassword { failures };
                return Ok(reply("Password must be at least 8 characters long. Please try again."));
            }
            warn!("User {} gave up paid account creation after {} short passwords", user_id, failures);
            return Ok(reply("Create Account Fail. Please contact Admin."));
        }

        if !self.ctx.payments.has_paid(user_id).await? {
            return Ok(reply("Payment not completed. Please complete the payment to proceed."));
        }

        let funding = self.ctx.config.account_creation.funding_eos;
        match self.ctx.wallet.create_account(user_id, password, funding).await {
            Ok(created) => {
                if let Err(e) = self.ctx.payments.consume(user_id).await {
                    warn!("Account {} created but payment not consumed: {}", created.account_name, e);
                }
                Ok(reply_with(
                    format!(
                        "Account create successfully!\n🔹 Account Name: <code>{}</code>\nTransaction ID: {}",
                        escape_html(&created.account_name),
                        tx_link(&self.ctx.config.chain.explorer_tx_url, &created.transaction_id)
                    ),
                    keyboards::return_or_close(),
                ))
            }
            Err(e) => {
                warn!("Paid account creation for user {} failed: {}", user_id, e);
                Ok(reply_with(
                    format!("Error create EOS account: {}", error_text(&e)),
                    keyboards::return_or_close(),
                ))
            }
        }
    }

    /// A pressed inline button
    pub async fn on_callback(&self, user_id: i64, chat_id: i64, data: &str) -> Replies {
        debug!("Callback {:?} from user {}", data, user_id);
        let mut state = self.dialogues.lock(user_id).await;
        let result = self.route_callback(user_id, chat_id, data, &mut state).await;
        self.settle(user_id, result)
    }

    async fn route_callback(
        &self,
        user_id: i64,
        chat_id: i64,
        data: &str,
        state: &mut DialogueState,
    ) -> Result<Replies> {
        let (action, arg) = match data.split_once(':') {
            Some((action, arg)) => (action, Some(arg)),
            None => (data, None),
        };

        match (action, arg) {
            ("close", _) => Ok(vec![Outgoing::DeleteSource]),
            ("profile", _) => self.profile(user_id).await,
            ("wallets", _) => self.wallets(user_id, state).await,
            ("import_account", _) => Ok(begin(
                state,
                DialogueState::ImportKey,
                Reply::text("🔑Please enter your EOS private key:"),
            )),
            ("select_account", Some(choice)) => self.select_account(user_id, choice, state).await,
            ("create_account_contract", _) => Ok(begin(
                state,
                DialogueState::OrderPassword,
                Reply::text("🔐Please enter a password to encrypt your private key(>= 8 characters):"),
            )),
            ("view_order", _) => self.view_order(user_id).await,
            ("activate_account", _) => self.activate(user_id).await,
            ("delete_order", _) => {
                let text = if self.ctx.credentials.delete_order(user_id).await? {
                    "Your account order has been deleted."
                } else {
                    "No pending orders found."
                };
                Ok(vec![Reply::text(text).keyboard(keyboards::wallet_back()).editing().into()])
            }
            ("authorize", None) => {
                if self.ctx.credentials.credential(user_id).await?.is_none() {
                    return Ok(reply("No account found for authorization."));
                }
                Ok(begin(state, DialogueState::AuthorizePassword, Reply::text(AUTHORIZE_PROMPT)))
            }
            ("authorize", Some(hours)) => self.authorize(user_id, hours, state).await,
            ("transfer_eos", _) => {
                if let Some(locked) = self.require_unlocked(user_id, "Unlock Wallet to Transfer. ").await? {
                    return Ok(locked);
                }
                Ok(begin(state, DialogueState::Transfer, Reply::text(TRANSFER_PROMPT)))
            }
            ("buy_ram", _) => {
                if let Some(locked) = self.require_unlocked(user_id, "Unlock Wallet then buy RAM. ").await? {
                    return Ok(locked);
                }
                let price = price_text(self.ctx.prices.get_ram_price().await.ok());
                Ok(begin(state, DialogueState::BuyRam, Reply::text(buy_ram_prompt(&price))))
            }
            ("ram_order", _) => {
                if let Some(locked) = self.require_unlocked(user_id, "Unlock Wallet then buy RAM. ").await? {
                    return Ok(locked);
                }
                let price = price_text(self.ctx.prices.get_ram_price().await.ok());
                Ok(begin(state, DialogueState::RamOrder, Reply::text(ram_order_prompt(&price))))
            }
            ("view_ram_orders", page) => self.ram_orders(user_id, page).await,
            ("clear_ram_orders", _) => {
                let cleared = self.ctx.orders.clear(user_id).await?;
                debug!("Cleared {} RAM orders of user {}", cleared, user_id);
                Ok(reply_with("All your RAM orders have been cleared.", keyboards::wallet_back()))
            }
            ("delete_account", _) => Ok(vec![Reply::text("Are you sure you want to delete your EOS account?")
                .keyboard(keyboards::confirm_delete_account())
                .editing()
                .into()]),
            ("confirm_delete_account", _) => {
                self.ctx.credentials.delete_wallet(user_id).await?;
                *state = DialogueState::Idle;
                info!("User {} deleted their wallet", user_id);
                Ok(vec![Reply::text("Your EOS account information has been deleted.")
                    .keyboard(keyboards::close_only())
                    .editing()
                    .into()])
            }
            ("pay_for_account_by_card", _) => self.pay_by_card(user_id, chat_id).await,
            ("pay_for_account_by_crypto", _) => self.pay_by_crypto(user_id, chat_id).await,
            ("create_paid_account", _) => {
                if !self.ctx.payments.has_paid(user_id).await? {
                    return Ok(reply("Payment not completed. Please complete the payment to proceed."));
                }
                Ok(begin(
                    state,
                    DialogueState::AccountPassword { failures: 0 },
                    Reply::text(PAID_ACCOUNT_PROMPT),
                ))
            }
            _ => {
                warn!("Unknown callback data {:?} from user {}", data, user_id);
                Ok(Vec::new())
            }
        }
    }

    async fn profile(&self, user_id: i64) -> Result<Replies> {
        let text = match self.ctx.credentials.profile(user_id).await {
            Ok(profile) => format::profile(&profile),
            Err(Error::NoCredential) => "Please Create or Import an EOS account.".to_string(),
            Err(e) => return Err(e),
        };
        Ok(reply_with(text, keyboards::return_or_close()))
    }

    /// Wallet page for an unlocked account
    async fn wallet_view(&self, user_id: i64) -> Result<Option<Reply>> {
        let Some(overview) = self.ctx.credentials.overview(user_id).await? else {
            return Ok(None);
        };
        let has_orders = self.ctx.orders.page(user_id, 0).await?.total > 0;
        Ok(Some(
            Reply::text(format::wallet(&overview, self.ctx.sessions.now()))
                .keyboard(keyboards::wallet_with_account(has_orders)),
        ))
    }

    async fn wallets(&self, user_id: i64, state: &mut DialogueState) -> Result<Replies> {
        if self.ctx.credentials.credential(user_id).await?.is_some() {
            if self.ctx.sessions.is_active(user_id).await? {
                if let Some(view) = self.wallet_view(user_id).await? {
                    return Ok(vec![view.into()]);
                }
            }
            return Ok(begin(
                state,
                DialogueState::UnlockPassword,
                Reply::text("🔐Please enter your password to unlock:"),
            ));
        }

        if let Some(ticket) = self.ctx.credentials.pending_order(user_id).await? {
            return Ok(reply_with(
                format!(
                    "You have an ongoing order for account: <code>{}</code>",
                    escape_html(&ticket.account_name)
                ),
                keyboards::pending_order(),
            ));
        }

        if self.ctx.payments.has_paid(user_id).await? {
            return Ok(reply_with(
                "Your payment has been received. Tap Create Account to choose a password for your new EOS account.",
                keyboards::create_paid_account(),
            ));
        }

        Ok(reply_with(
            "Please Create Account or Import Account.",
            keyboards::wallet_no_account(self.ctx.card_payments_enabled(), self.ctx.crypto_payments_enabled()),
        ))
    }

    async fn select_account(&self, user_id: i64, choice: &str, state: &mut DialogueState) -> Result<Replies> {
        let expired = || -> Replies {
            vec![Reply::text("This selection has expired. Please import the account again.")
                .editing()
                .into()]
        };
        let Some((account, permission)) = choice.split_once(':') else {
            return Ok(expired());
        };
        let pending = match std::mem::take(state) {
            DialogueState::ChooseAccount { pending } => pending,
            other => {
                *state = other;
                return Ok(expired());
            }
        };

        match self
            .ctx
            .credentials
            .select_account(user_id, &pending, account, permission)
            .await
        {
            Ok(credential) => Ok(vec![Reply::text(format!(
                "Account imported successfully.\n\n{}",
                format::linked(&credential)
            ))
            .keyboard(keyboards::start_menu())
            .editing()
            .into()]),
            Err(e) => Ok(reply(format!("Error importing EOS account: {}", error_text(&e)))),
        }
    }

    async fn view_order(&self, user_id: i64) -> Result<Replies> {
        match self.ctx.credentials.pending_order(user_id).await? {
            Some(ticket) => Ok(reply_with(format::account_ticket(&ticket), keyboards::order_ticket())),
            None => Ok(reply_with("No pending order found.", keyboards::wallet_back())),
        }
    }

    async fn activate(&self, user_id: i64) -> Result<Replies> {
        match self.ctx.credentials.activate_order(user_id).await {
            Ok(Activation::Activated(credential)) => Ok(reply_with(
                format!(
                    "Account activated successfully!\n\n🔹 Account Name: <code>{}</code>\n🔹 Public Key: <code>{}</code>",
                    escape_html(&credential.account_name),
                    escape_html(&credential.public_key)
                ),
                keyboards::wallet_back(),
            )),
            Ok(Activation::NotOnChainYet(account)) => Ok(reply_with(
                format!(
                    "Account activation failed. The account {} does not exist yet.",
                    escape_html(&account)
                ),
                keyboards::order_ticket(),
            )),
            Err(Error::NotFound(_)) => Ok(reply_with("No pending orders found.", keyboards::wallet_back())),
            Err(e) => Err(e),
        }
    }

    async fn authorize(&self, user_id: i64, hours: &str, state: &mut DialogueState) -> Result<Replies> {
        let durations = &self.ctx.config.session.durations_hours;
        let hours = match hours.parse::<u32>() {
            Ok(h) if durations.contains(&h) => h,
            _ => return Ok(reply("Invalid authorization duration.")),
        };

        let password = match std::mem::take(state) {
            DialogueState::AuthorizeDuration { password } => password,
            other => {
                *state = other;
                return Ok(vec![Reply::text(
                    "This authorization request has expired. Please tap Authorize again.",
                )
                .editing()
                .into()]);
            }
        };

        match self.ctx.sessions.authorize(user_id, &password, hours).await {
            Ok(_) => Ok(vec![Reply::text(format!("✅Authorized for {} hour(s).", hours))
                .keyboard(keyboards::wallet_back())
                .editing()
                .into()]),
            Err(e) => Ok(reply(format!("Error authorizing user: {}", error_text(&e)))),
        }
    }

    /// `Some(reply)` when the wallet is locked
    async fn require_unlocked(&self, user_id: i64, locked_text: &str) -> Result<Option<Replies>> {
        if self.ctx.sessions.is_active(user_id).await? {
            return Ok(None);
        }
        Ok(Some(vec![Reply::text(locked_text)
            .keyboard(keyboards::wallet_back())
            .editing()
            .into()]))
    }

    async fn ram_orders(&self, user_id: i64, page: Option<&str>) -> Result<Replies> {
        // Button pages are 1-based
        let (index, edit) = match page.and_then(|p| p.parse::<u32>().ok()) {
            Some(p) => (p.saturating_sub(1), true),
            None => (0, false),
        };
        let page = self.ctx.orders.page(user_id, index).await?;
        let mut view = Reply::text(format::order_page(&page)).keyboard(keyboards::order_pager(&page));
        if edit {
            view = view.editing();
        }
        Ok(vec![view.into()])
    }

    async fn pay_by_card(&self, user_id: i64, chat_id: i64) -> Result<Replies> {
        if !self.ctx.card_payments_enabled() {
            return Ok(reply("Card payments are not available right now."));
        }
        match self.ctx.payments.start_card_payment(user_id, chat_id).await {
            Ok(_) => Ok(Vec::new()),
            Err(e) => {
                warn!("Invoice for user {} failed: {}", user_id, e);
                Ok(reply_with("Failed to create invoice. Please try again.", keyboards::close_only()))
            }
        }
    }

    async fn pay_by_crypto(&self, user_id: i64, chat_id: i64) -> Result<Replies> {
        if !self.ctx.crypto_payments_enabled() {
            return Ok(reply("Crypto payments are not available right now."));
        }
        match self.ctx.payments.start_crypto_payment(user_id, chat_id).await {
            Ok(CryptoCheckout::Link(link)) => Ok(vec![Reply::text(format!(
                "Please complete your payment by clicking the link below:\n{}",
                escape_html(&link)
            ))
            .keyboard(keyboards::payment_link(&link))
            .editing()
            .into()]),
            Ok(CryptoCheckout::Rejected(reason)) => {
                warn!("OxaPay rejected payment for user {}: {}", user_id, reason);
                Ok(reply_with(
                    "Failed to initiate payment. Please try again later.",
                    keyboards::close_only(),
                ))
            }
            Err(e) => {
                warn!("Crypto payment for user {} failed: {}", user_id, e);
                Ok(reply_with(
                    "Failed to initiate payment. Please try again later.",
                    keyboards::close_only(),
                ))
            }
        }
    }

    /// Pre-checkout answer; `Err` carries the text shown to the payer
    pub async fn on_pre_checkout(&self, payload: &str) -> std::result::Result<(), String> {
        match self.ctx.payments.verify_checkout(payload).await {
            Ok(payment) => {
                debug!("Pre-checkout ok for payment {}", payment.id);
                Ok(())
            }
            Err(e) => {
                warn!("Pre-checkout rejected for {}: {}", payload, e);
                Err("This invoice is no longer valid. Please start a new payment.".to_string())
            }
        }
    }

    pub async fn on_successful_payment(&self, user_id: i64, payload: &str) -> Replies {
        match self.ctx.payments.card_succeeded(payload).await {
            Ok(payment) => self.offer_account_creation(payment.user_id).await,
            Err(e) => {
                warn!("Card payment {} of user {} not recorded: {}", payload, user_id, e);
                reply(format!("Error verifying payment: {}", error_text(&e)))
            }
        }
    }

    /// Notification from the payment callback listener
    pub async fn on_payment_event(&self, event: &PaymentEvent) -> Replies {
        match event.status {
            PaymentStatus::Succeeded => self.offer_account_creation(event.user_id).await,
            PaymentStatus::Failed => reply("Your payment failed. Please try again."),
            _ => Vec::new(),
        }
    }

    async fn offer_account_creation(&self, user_id: i64) -> Replies {
        let mut state = self.dialogues.lock(user_id).await;
        if state.is_idle() {
            *state = DialogueState::AccountPassword { failures: 0 };
            return reply(PAID_ACCOUNT_PROMPT);
        }
        reply_with(
            format!("Payment successful! {} Then tap Create Account in Wallets.", BUSY),
            keyboards::wallet_back(),
        )
    }

    /// Notification for a filled or failed RAM limit order
    pub async fn on_order_outcome(&self, outcome: &OrderOutcome) -> Replies {
        match &outcome.result {
            Ok(tx_id) => reply_with(
                format!(
                    "RAM limit order filled: {} of RAM for <code>{}</code>.\nTransaction ID: {}",
                    format::format_bytes(outcome.ram_bytes as i64),
                    escape_html(&outcome.account),
                    tx_link(&self.ctx.config.chain.explorer_tx_url, tx_id)
                ),
                keyboards::wallet_back(),
            ),
            Err(reason) => {
                let mut text = format!(
                    "RAM limit order for <code>{}</code> failed: {}",
                    escape_html(&outcome.account),
                    escape_html(reason)
                );
                if is_resource_message(reason) {
                    let payer = match self.ctx.credentials.credential(outcome.user_id).await {
                        Ok(Some(credential)) => credential.account_name,
                        _ => outcome.account.clone(),
                    };
                    text.push_str(&format::resource_hint(&payer));
                }
                reply_with(text, keyboards::wallet_back())
            }
        }
    }
}

fn buy_ram_prompt(price: &str) -> String {
    format!(
        "RAM price: {} EOS/kb\n\nEnter Addresses with Amounts (supports bytes or EOS amount)\n\
         The address and amount are separated by commas.\n\n\
         &lt;receiver&gt;,&lt;ram_bytes&gt; or &lt;ram_of_eos_price&gt;\n\n\
         <b>Example (Click to Copy):</b>\n1.<code>replace_account,1024bytes</code>\n\
         2.<code>replace_account,1.2kb</code>\n3.<code>replace_account,1mb</code>\n\
         4.<code>replace_account,2.1gb</code>\n5.<code>replace_account,1EOS</code>\n\
         6.<code>replace_account,3.45EOS</code>",
        price
    )
}

fn ram_order_prompt(price: &str) -> String {
    format!(
        "RAM Price:{} EOS/kb \n\nPlease make sure to create a Session Key that is long enough on the wallet page.\n\n\
         Enter RAM order details in the format: \n\n\
         &lt;receiver&gt;,&lt;ram_amount(EOS or bytes)&gt;,&lt;price_per_kb(EOS)&gt;\n\n\
         <b>Example (Click to Copy):</b>\n1.<code>replace_account,1024bytes,0.01</code>\n\
         2.<code>replace_account,1kb,0.01</code>\n3.<code>replace_account,1mb,0.01</code>\n\
         4.<code>replace_account,1gb,0.01</code>",
        price
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::client::testing::FakeChain;
    use crate::chain::AuthorizerAccount;
    use crate::config::Config;
    use crate::rate_limit::{RateLimiter, Unlimited};
    use crate::storage::{Database, PaymentType};
    use crate::wallet::ManualClock;
    use chrono::Utc;
    use std::time::Duration;
    use teloxide::types::InlineKeyboardButtonKind;
    use tokio_test::assert_ok;

    struct Fixture {
        chain: Arc<FakeChain>,
        ctx: Arc<AppContext>,
        controller: Controller,
    }

    async fn fixture_with(rate_limiter: Arc<dyn RateLimiter>) -> Fixture {
        let mut config = Config::default();
        config.price.retry_attempts = 1;
        config.price.retry_delay_ms = 0;
        config.account_creation.creator_private_key = PrivateKey::generate().to_string();

        let db = Database::in_memory().await.unwrap();
        let chain = Arc::new(FakeChain::new());
        let ctx = Arc::new(
            AppContext::assemble(
                config,
                db,
                chain.clone(),
                Arc::new(ManualClock::new(Utc::now())),
                rate_limiter,
            )
            .unwrap(),
        );
        Fixture {
            chain,
            controller: Controller::new(ctx.clone()),
            ctx,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(Arc::new(Unlimited)).await
    }

    fn sender() -> Sender {
        Sender {
            user_id: 1,
            chat_id: 1,
            username: Some("alice".into()),
            ..Default::default()
        }
    }

    fn replies(out: &[Outgoing]) -> Vec<&Reply> {
        out.iter()
            .filter_map(|o| match o {
                Outgoing::Reply(r) => Some(r),
                Outgoing::DeleteSource => None,
            })
            .collect()
    }

    fn text(out: &[Outgoing]) -> String {
        replies(out).first().map(|r| r.text.clone()).unwrap_or_default()
    }

    /// Link `alice` to a fresh key protected by `password1`
    async fn link_alice(f: &Fixture) {
        let key = PrivateKey::generate();
        f.chain.authorizers.lock().unwrap().insert(
            key.public_key().to_string(),
            vec![AuthorizerAccount {
                account_name: "alice".into(),
                permission_name: "active".into(),
            }],
        );
        f.ctx.credentials.import(1, &key.to_wif(), "password1").await.unwrap();
    }

    #[tokio::test]
    async fn test_prune_keeps_pending_prompts() {
        let f = fixture().await;
        f.controller.on_callback(1, 1, "import_account").await;
        let other = Sender {
            user_id: 2,
            chat_id: 2,
            ..Default::default()
        };
        f.controller.on_text(&other, "/cancel").await;

        f.controller.prune();

        let out = f.controller.on_callback(1, 1, "import_account").await;
        assert_eq!(text(&out), BUSY);
    }

    #[tokio::test]
    async fn test_import_flow_deletes_secrets() {
        let f = fixture().await;
        let key = PrivateKey::generate();
        f.chain.authorizers.lock().unwrap().insert(
            key.public_key().to_string(),
            vec![AuthorizerAccount {
                account_name: "alice".into(),
                permission_name: "active".into(),
            }],
        );

        let out = f.controller.on_callback(1, 1, "import_account").await;
        assert!(text(&out).contains("private key"));

        let out = f.controller.on_text(&sender(), "not-a-key").await;
        assert!(matches!(out[0], Outgoing::DeleteSource));
        assert!(text(&out).starts_with("Invalid EOS private key"));

        let out = f.controller.on_text(&sender(), &key.to_wif()).await;
        assert!(matches!(out[0], Outgoing::DeleteSource));
        assert!(text(&out).contains("encryption password"));

        let out = f.controller.on_text(&sender(), "short").await;
        assert!(matches!(out[0], Outgoing::DeleteSource));
        assert!(text(&out).starts_with("Invalid password"));

        let out = f.controller.on_text(&sender(), "password1").await;
        assert!(matches!(out[0], Outgoing::DeleteSource));
        assert!(text(&out).starts_with("Account imported successfully."));
        assert!(text(&out).contains("<code>alice</code>"));

        let credential = f.ctx.credentials.credential(1).await.unwrap().unwrap();
        assert_eq!(credential.account_name, "alice");
    }

    #[tokio::test]
    async fn test_busy_until_cancelled() {
        let f = fixture().await;
        f.controller.on_callback(1, 1, "import_account").await;

        let out = f.controller.on_callback(1, 1, "create_account_contract").await;
        assert_eq!(text(&out), BUSY);

        let out = f.controller.on_text(&sender(), "/cancel").await;
        assert_eq!(text(&out), "Cancelled.");

        let out = f.controller.on_callback(1, 1, "create_account_contract").await;
        assert!(text(&out).contains("encrypt your private key"));

        // Free text while idle is ignored
        f.controller.on_text(&sender(), "/cancel").await;
        assert!(f.controller.on_text(&sender(), "hello").await.is_empty());
    }

    #[tokio::test]
    async fn test_authorize_keeps_password_out_of_buttons() {
        let f = fixture().await;
        link_alice(&f).await;

        f.controller.on_callback(1, 1, "authorize").await;
        let out = f.controller.on_text(&sender(), "wrongpass1").await;
        assert!(matches!(out[0], Outgoing::DeleteSource));
        assert_eq!(text(&out), INCORRECT_PASSWORD);

        f.controller.on_callback(1, 1, "authorize").await;
        let out = f.controller.on_text(&sender(), "password1").await;
        assert_eq!(text(&out), "Select authorization duration:");
        let keyboard = replies(&out)[0].keyboard.clone().unwrap();
        for button in keyboard.inline_keyboard.iter().flatten() {
            if let InlineKeyboardButtonKind::CallbackData(data) = &button.kind {
                assert!(data.starts_with("authorize:"));
                assert!(!data.contains("password1"));
            }
        }

        let out = f.controller.on_callback(1, 1, "authorize:5").await;
        assert_eq!(text(&out), "Invalid authorization duration.");

        let out = f.controller.on_callback(1, 1, "authorize:6").await;
        assert_eq!(text(&out), "✅Authorized for 6 hour(s).");
        assert!(replies(&out)[0].edit);
        assert!(f.ctx.sessions.is_active(1).await.unwrap());

        let out = f.controller.on_callback(1, 1, "authorize:6").await;
        assert!(text(&out).contains("expired"));
    }

    #[tokio::test]
    async fn test_no_account_to_authorize() {
        let f = fixture().await;
        let out = f.controller.on_callback(1, 1, "authorize").await;
        assert_eq!(text(&out), "No account found for authorization.");
    }

    #[tokio::test]
    async fn test_locked_wallet_asks_to_unlock() {
        let f = fixture().await;
        link_alice(&f).await;

        let out = f.controller.on_callback(1, 1, "transfer_eos").await;
        assert_eq!(text(&out), "Unlock Wallet to Transfer. ");
        assert!(replies(&out)[0].edit);

        let out = f.controller.on_callback(1, 1, "wallets").await;
        assert!(text(&out).contains("unlock"));

        let out = f.controller.on_text(&sender(), "password1").await;
        assert!(matches!(out[0], Outgoing::DeleteSource));
        assert!(text(&out).starts_with("<b>Unlock Wallet then buy RAM or transfer. </b>"));
        assert!(text(&out).contains("tg-spoiler"));
        assert!(f.ctx.sessions.is_active(1).await.unwrap());
    }

    #[tokio::test]
    async fn test_transfer_and_resource_hint() {
        let f = fixture().await;
        link_alice(&f).await;
        assert_ok!(f.ctx.sessions.authorize(1, "password1", 1).await);

        let out = f.controller.on_callback(1, 1, "transfer_eos").await;
        assert!(text(&out).starts_with("Enter Addresses with Amounts"));

        let out = f.controller.on_text(&sender(), "bob,1.5,for_lunch").await;
        assert!(!matches!(out[0], Outgoing::DeleteSource));
        assert_eq!(
            text(&out),
            "Successfully transferred 1.5000 EOS to bob with memo: for lunch."
        );
        assert_eq!(f.chain.pushed_count(), 1);

        *f.chain.push_error.lock().unwrap() = Some("billed CPU time is greater than the maximum".into());
        f.controller.on_callback(1, 1, "transfer_eos").await;
        let out = f.controller.on_text(&sender(), "bob,1").await;
        assert!(text(&out).starts_with("Error transferring EOS: billed CPU time"));
        assert!(text(&out).contains("eospowerup.io"));
        assert!(text(&out).contains("account alice"));

        f.controller.on_callback(1, 1, "transfer_eos").await;
        let out = f.controller.on_text(&sender(), "bob").await;
        assert_eq!(text(&out), "Please provide the address and amount.");
    }

    #[tokio::test]
    async fn test_ram_order_then_list() {
        let f = fixture().await;
        link_alice(&f).await;
        assert_ok!(f.ctx.sessions.authorize(1, "password1", 1).await);

        let out = f.controller.on_callback(1, 1, "ram_order").await;
        assert!(text(&out).starts_with("RAM Price:unavailable EOS/kb"));

        let out = f.controller.on_text(&sender(), "alice,1kb,0.01").await;
        assert_eq!(text(&out), "RAM order created successfully.");

        let out = f.controller.on_callback(1, 1, "view_ram_orders").await;
        assert!(text(&out).starts_with("Your RAM Orders 1/1:"));
        assert!(text(&out).contains("1024 bytes"));

        let out = f.controller.on_callback(1, 1, "clear_ram_orders").await;
        assert_eq!(text(&out), "All your RAM orders have been cleared.");
        assert_eq!(f.ctx.orders.page(1, 0).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_paid_account_password_retries() {
        let f = fixture().await;
        let payments = f.ctx.db.payments();
        let id = payments.create(1, 1, 4.0, PaymentType::Card, Some("pay-1")).await.unwrap();
        payments.set_status(id, PaymentStatus::Succeeded).await.unwrap();

        let event = PaymentEvent {
            user_id: 1,
            chat_id: 1,
            payment_id: id,
            kind: PaymentType::Card,
            status: PaymentStatus::Succeeded,
        };
        let out = f.controller.on_payment_event(&event).await;
        assert_eq!(text(&out), PAID_ACCOUNT_PROMPT);

        let out = f.controller.on_text(&sender(), "short").await;
        assert!(matches!(out[0], Outgoing::DeleteSource));
        assert_eq!(text(&out), "Password must be at least 8 characters long. Please try again.");
        let out = f.controller.on_text(&sender(), "short2").await;
        assert_eq!(text(&out), "Create Account Fail. Please contact Admin.");

        // The payment is still unspent, so the wallet page offers to try again
        let out = f.controller.on_callback(1, 1, "wallets").await;
        let keyboard = replies(&out)[0].keyboard.clone().unwrap();
        assert!(matches!(
            &keyboard.inline_keyboard[0][0].kind,
            InlineKeyboardButtonKind::CallbackData(d) if d == "create_paid_account"
        ));

        let out = f.controller.on_callback(1, 1, "create_paid_account").await;
        assert_eq!(text(&out), PAID_ACCOUNT_PROMPT);
        let out = f.controller.on_text(&sender(), "password1").await;
        assert!(text(&out).starts_with("Account create successfully!"));
        assert!(text(&out).contains("https://bloks.io/transaction/abc123"));

        assert!(!f.ctx.payments.has_paid(1).await.unwrap());
        assert!(f.ctx.credentials.credential(1).await.unwrap().is_some());

        let out = f.controller.on_callback(1, 1, "create_paid_account").await;
        assert_eq!(text(&out), "Payment not completed. Please complete the payment to proceed.");
    }

    #[tokio::test]
    async fn test_payment_event_while_busy() {
        let f = fixture().await;
        f.controller.on_callback(1, 1, "import_account").await;

        let event = PaymentEvent {
            user_id: 1,
            chat_id: 1,
            payment_id: 1,
            kind: PaymentType::Crypto,
            status: PaymentStatus::Succeeded,
        };
        let out = f.controller.on_payment_event(&event).await;
        assert!(text(&out).contains("finish the current step"));

        let failed = PaymentEvent {
            status: PaymentStatus::Failed,
            ..event
        };
        let out = f.controller.on_payment_event(&failed).await;
        assert_eq!(text(&out), "Your payment failed. Please try again.");
    }

    #[tokio::test]
    async fn test_select_account_requires_pending_choice() {
        let f = fixture().await;
        let out = f.controller.on_callback(1, 1, "select_account:alice:active").await;
        assert!(text(&out).contains("expired"));
    }

    #[tokio::test]
    async fn test_start_is_rate_limited() {
        struct Deny;
        impl RateLimiter for Deny {
            fn check(&self, _user_id: i64) -> RateDecision {
                RateDecision::Limited {
                    wait: Duration::from_secs(42),
                }
            }
        }

        let f = fixture_with(Arc::new(Deny)).await;
        let out = f.controller.on_text(&sender(), "/start").await;
        assert_eq!(text(&out), "Rate limit exceeded. Please try again after 42 seconds.");
    }

    #[tokio::test]
    async fn test_order_outcome_messages() {
        let f = fixture().await;
        link_alice(&f).await;

        let filled = OrderOutcome {
            order_id: 1,
            user_id: 1,
            account: "bob".into(),
            ram_bytes: 2048,
            result: Ok("abc123".into()),
        };
        let out = f.controller.on_order_outcome(&filled).await;
        assert!(text(&out).contains("2.00 KB"));
        assert!(text(&out).contains("https://bloks.io/transaction/abc123"));

        let failed = OrderOutcome {
            result: Err("ram_usage_exceeded".into()),
            ..filled
        };
        let out = f.controller.on_order_outcome(&failed).await;
        assert!(text(&out).contains("failed: ram_usage_exceeded"));
        assert!(text(&out).contains("account alice"));
    }
}
