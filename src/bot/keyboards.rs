//! Inline keyboard layouts

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::chain::AuthorizerAccount;
use crate::orders::OrderPage;

fn btn(text: &str, callback_data: &str) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(text.to_string(), callback_data.to_string())
}

/// URL button, or a dead callback button if the URL does not parse
fn url_btn(text: &str, url: &str) -> InlineKeyboardButton {
    match url.parse() {
        Ok(parsed_url) => InlineKeyboardButton::url(text.to_string(), parsed_url),
        Err(_) => InlineKeyboardButton::callback(text.to_string(), "close".to_string()),
    }
}

fn rows(rows: Vec<Vec<InlineKeyboardButton>>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(rows)
}

pub fn start_menu() -> InlineKeyboardMarkup {
    rows(vec![
        vec![btn("🐵 Profile", "profile")],
        vec![btn("💳 Wallets", "wallets")],
        vec![btn("📦 Transfer EOS", "transfer_eos")],
        vec![btn("❌ Close", "close")],
    ])
}

pub fn wallet_back() -> InlineKeyboardMarkup {
    rows(vec![vec![btn("↔️ Wallet", "wallets")]])
}

pub fn close_only() -> InlineKeyboardMarkup {
    rows(vec![vec![btn("❌ Close", "close")]])
}

pub fn return_or_close() -> InlineKeyboardMarkup {
    rows(vec![
        vec![btn("⬅️ Return wallets list", "wallets")],
        vec![btn("❌ Close", "close")],
    ])
}

/// Wallet page for a linked, unlocked account
pub fn wallet_with_account(has_ram_orders: bool) -> InlineKeyboardMarkup {
    let mut layout = Vec::new();
    if has_ram_orders {
        layout.push(vec![btn("📜 RAM Orders", "view_ram_orders")]);
    }
    layout.extend([
        vec![btn("🔓 Authorize", "authorize")],
        vec![btn("📦 Transfer EOS", "transfer_eos"), btn("💾 Buy RAM", "buy_ram")],
        vec![btn("📝 RAM Limit Order", "ram_order")],
        vec![btn("🐵 Profile", "profile")],
        vec![btn("🗑 Delete Account", "delete_account")],
        vec![btn("❌ Close", "close")],
    ]);
    rows(layout)
}

/// Wallet page before any account is linked
pub fn wallet_no_account(card: bool, crypto: bool) -> InlineKeyboardMarkup {
    let mut layout = Vec::new();
    if crypto {
        layout.push(vec![btn("🟠 Create Account (Crypto)", "pay_for_account_by_crypto")]);
    }
    if card {
        layout.push(vec![btn("💳 Create Account (Credit Card)", "pay_for_account_by_card")]);
    }
    layout.extend([
        vec![btn("Import Account", "import_account")],
        vec![btn("Create Account (Contract)", "create_account_contract")],
        vec![btn("❌ Close", "close")],
    ]);
    rows(layout)
}

/// Paid but not yet created
pub fn create_paid_account() -> InlineKeyboardMarkup {
    rows(vec![
        vec![btn("🆕 Create Account", "create_paid_account")],
        vec![btn("❌ Close", "close")],
    ])
}

pub fn pending_order() -> InlineKeyboardMarkup {
    rows(vec![
        vec![btn("View Order", "view_order")],
        vec![btn("❌ Close", "close")],
    ])
}

pub fn new_order_ticket() -> InlineKeyboardMarkup {
    rows(vec![
        vec![btn("Activate", "activate_account")],
        vec![btn("↔️ Wallet", "wallets")],
    ])
}

pub fn order_ticket() -> InlineKeyboardMarkup {
    rows(vec![
        vec![btn("❌ Delete Order", "delete_order")],
        vec![btn("Activate", "activate_account")],
        vec![btn("↔️ Wallet", "wallets")],
    ])
}

pub fn select_account(accounts: &[AuthorizerAccount]) -> InlineKeyboardMarkup {
    rows(
        accounts
            .iter()
            .map(|a| {
                vec![btn(
                    &format!("{} ({})", a.account_name, a.permission_name),
                    &format!("select_account:{}:{}", a.account_name, a.permission_name),
                )]
            })
            .collect(),
    )
}

fn duration_label(hours: u32) -> String {
    match hours {
        1 => "1 hour".to_string(),
        24 => "1 day".to_string(),
        h if h % 24 == 0 => format!("{} days", h / 24),
        h => format!("{} hours", h),
    }
}

/// Duration buttons, three per row; the password stays server-side
pub fn authorize_durations(hours: &[u32]) -> InlineKeyboardMarkup {
    rows(
        hours
            .chunks(3)
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|h| btn(&duration_label(*h), &format!("authorize:{}", h)))
                    .collect()
            })
            .collect(),
    )
}

pub fn confirm_delete_account() -> InlineKeyboardMarkup {
    rows(vec![
        vec![btn("Yes, delete", "confirm_delete_account")],
        vec![btn("No, go back", "wallets")],
    ])
}

/// Pager for RAM orders; callback pages are 1-based
pub fn order_pager(page: &OrderPage) -> InlineKeyboardMarkup {
    let current = page.page + 1;
    let mut layout = vec![vec![btn("Clear Orders", "clear_ram_orders")]];
    if current < page.total_pages {
        layout.push(vec![btn("➡️ Next", &format!("view_ram_orders:{}", current + 1))]);
    }
    if current > 1 {
        layout.push(vec![btn("⬅️ Previous", &format!("view_ram_orders:{}", current - 1))]);
    }
    layout.push(vec![btn("↔️ Wallet", "wallets")]);
    rows(layout)
}

pub fn payment_link(url: &str) -> InlineKeyboardMarkup {
    rows(vec![vec![url_btn("Complete Payment", url)]])
}

pub fn transaction(url: &str) -> InlineKeyboardMarkup {
    rows(vec![
        vec![url_btn("View Transaction", url)],
        vec![btn("↔️ Wallet", "wallets")],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::InlineKeyboardButtonKind;

    fn callbacks(markup: &InlineKeyboardMarkup) -> Vec<String> {
        markup
            .inline_keyboard
            .iter()
            .flatten()
            .filter_map(|b| match &b.kind {
                InlineKeyboardButtonKind::CallbackData(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_duration_buttons_carry_no_password() {
        let markup = authorize_durations(&[1, 6, 12, 24, 72, 168]);
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(
            callbacks(&markup),
            vec!["authorize:1", "authorize:6", "authorize:12", "authorize:24", "authorize:72", "authorize:168"]
        );
        let labels: Vec<_> = markup.inline_keyboard.iter().flatten().map(|b| b.text.clone()).collect();
        assert_eq!(labels, vec!["1 hour", "6 hours", "12 hours", "1 day", "3 days", "7 days"]);
    }

    #[test]
    fn test_no_account_menu_payment_buttons() {
        let bare = callbacks(&wallet_no_account(false, false));
        assert!(!bare.iter().any(|c| c.starts_with("pay_for_account")));

        let full = callbacks(&wallet_no_account(true, true));
        assert!(full.contains(&"pay_for_account_by_card".to_string()));
        assert!(full.contains(&"pay_for_account_by_crypto".to_string()));
    }

    #[test]
    fn test_ram_orders_button() {
        assert_eq!(callbacks(&wallet_with_account(true))[0], "view_ram_orders");
        assert!(!callbacks(&wallet_with_account(false)).contains(&"view_ram_orders".to_string()));
    }
}
