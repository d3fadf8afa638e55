//! Message text builders (HTML parse mode)

use chrono::Duration;

use crate::chain::format_eos;
use crate::orders::OrderPage;
use crate::storage::RamOrderStatus;
use crate::storage::Credential;
use crate::wallet::{AccountOrderTicket, AccountProfile, WalletOverview};

/// Escape text for Telegram HTML
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Bytes in the largest unit below 1024, two decimals
pub fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value.abs() >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// CPU time in us, ms or s
pub fn format_micros(micros: i64) -> String {
    let value = micros as f64;
    if micros.abs() < 1_000 {
        format!("{:.2} us", value)
    } else if micros.abs() < 1_000_000 {
        format!("{:.2} ms", value / 1_000.0)
    } else {
        format!("{:.2} s", value / 1_000_000.0)
    }
}

/// "2 days 3 hours 5 minutes", skipping zero parts
pub fn format_remaining(remaining: Duration) -> String {
    let days = remaining.num_days();
    let hours = remaining.num_hours() % 24;
    let minutes = remaining.num_minutes() % 60;

    let parts: Vec<String> = [(days, "days"), (hours, "hours"), (minutes, "minutes")]
        .iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, unit)| format!("{} {}", n, unit))
        .collect();
    if parts.is_empty() {
        "less than a minute".to_string()
    } else {
        parts.join(" ")
    }
}

pub fn eos(amount: f64) -> String {
    format_eos(amount).unwrap_or_else(|_| format!("{:.4} EOS", amount))
}

pub fn tx_link(explorer_tx_url: &str, tx_id: &str) -> String {
    format!("{}{}", explorer_tx_url, tx_id)
}

/// Appended to CPU/NET/RAM failures
pub fn resource_hint(account: &str) -> String {
    format!(
        "\n\nYour account resources are insufficient. Please visit \
         <a href=\"https://eospowerup.io/free\">this website</a> and enter your account {} to get free \
         resources, or add <a href=\"https://t.me/eospowerupbot\">this Telegram bot</a> to get assistance.",
        escape_html(account)
    )
}

fn price_or_unavailable(price: Option<f64>, decimals: usize) -> String {
    match price {
        Some(p) => format!("{:.*}", decimals, p),
        None => "unavailable".to_string(),
    }
}

pub fn welcome(eos_usd: Option<f64>, ram_per_kb: Option<f64>) -> String {
    format!(
        "EOS Bot: Your Gateway to EOS 🤖\n\n🔹 EOS: ${}\n🔹 RAM: {} EOS/kb",
        price_or_unavailable(eos_usd, 4),
        price_or_unavailable(ram_per_kb, 8)
    )
}

pub fn wallet(overview: &WalletOverview, now: chrono::DateTime<chrono::Utc>) -> String {
    let credential = &overview.credential;
    let mut text = format!(
        "🔹 Account Name: <code>{}</code>\n🔹 Public Key: <code>{}</code>\n",
        escape_html(&credential.account_name),
        escape_html(&credential.public_key)
    );
    if let Some(key) = &overview.private_key {
        text.push_str(&format!(
            "🔹 Private Key(Plz Backup❗️): <span class=\"tg-spoiler\">{}</span>\n",
            key
        ));
    }
    text.push_str(&format!("🔹 Balance: {}\n", eos(overview.balance)));
    if let Some(expires_at) = overview.session_expires_at {
        text.push_str(&format!("🔹 Session Expire in {}", format_remaining(expires_at - now)));
    }
    text
}

/// Summary shown after a key is linked to an account
pub fn linked(credential: &Credential) -> String {
    format!(
        "🔹 EOS Account Name: <code>{}</code>\n🔹 Public Key: <code>{}</code>\n🔹 Permission: <code>{}</code>",
        escape_html(&credential.account_name),
        escape_html(&credential.public_key),
        escape_html(&credential.permission)
    )
}

pub fn profile(profile: &AccountProfile) -> String {
    format!(
        "🔹 Account Name: <code>{}</code>\n🔹 RAM: {} / {}\n🔹 NET: {} / {}\n🔹 CPU: {} / {}",
        escape_html(&profile.account_name),
        format_bytes(profile.ram_usage),
        format_bytes(profile.ram_quota),
        format_bytes(profile.net_used),
        format_bytes(profile.net_max),
        format_micros(profile.cpu_used),
        format_micros(profile.cpu_max),
    )
}

pub fn account_ticket(ticket: &AccountOrderTicket) -> String {
    format!(
        "<b>EOS Account Order</b>\n\nCreate Account Name: <code>{name}</code>\n\nCreation Steps:\n\
         1. Transfer {amount} to the following contract: \n\n <code>{contract}</code> \n\n with the memo: \n\
         <code>{memo}</code>\n\n\
         2. After transfer is complete, wait for 1 minute and then click the activation button below.\n\n\
         ⚠️ Note: The bot does not charge any fee during the creation process. If the account creation \
         fails and leads to asset loss, the bot cannot help you recover assets.\n\n\
         Please complete the registration order as soon as possible. Once the account name is taken, \
         the EOS cannot be refunded.",
        name = escape_html(&ticket.account_name),
        amount = eos(ticket.amount_eos),
        contract = escape_html(&ticket.contract),
        memo = escape_html(&ticket.memo),
    )
}

pub fn order_page(page: &OrderPage) -> String {
    let mut text = format!("Your RAM Orders {}/{}:\n\n", page.shown(), page.total);
    if page.orders.is_empty() {
        text.push_str("No RAM orders found.");
        return text;
    }

    for order in &page.orders {
        text.push_str(&format!(
            "🔹 Account Name: {}\n🔹 RAM Amount: {} bytes\n🔹 Price per KB: {} EOS\n\
             🔹 Status: {}\n🔹 Order Date(UTC): {}\n",
            escape_html(&order.account),
            order.ram_bytes,
            order.price_per_kb,
            order.status,
            order.order_date
        ));
        match order.status {
            RamOrderStatus::Success => {
                if let Some(tx) = &order.transaction_id {
                    text.push_str(&format!("🔹 Transaction ID: {}\n", escape_html(tx)));
                }
            }
            RamOrderStatus::Failed => {
                if let Some(reason) = &order.failure_reason {
                    text.push_str(&format!("🔹 Failure Reason: {}\n", escape_html(reason)));
                }
            }
            RamOrderStatus::Pending | RamOrderStatus::Triggered => {}
        }
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        assert_eq!(format_bytes(512), "512.00 Bytes");
        assert_eq!(format_bytes(3 * 1024), "3.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 + 512 * 1024), "5.50 MB");
        assert_eq!(format_micros(999), "999.00 us");
        assert_eq!(format_micros(1_500), "1.50 ms");
        assert_eq!(format_micros(2_000_000), "2.00 s");
    }

    #[test]
    fn test_remaining() {
        assert_eq!(
            format_remaining(Duration::days(2) + Duration::hours(3) + Duration::minutes(5)),
            "2 days 3 hours 5 minutes"
        );
        assert_eq!(format_remaining(Duration::minutes(59)), "59 minutes");
        assert_eq!(format_remaining(Duration::seconds(10)), "less than a minute");
    }

    #[test]
    fn test_escape_and_welcome() {
        assert_eq!(escape_html("a<b>&c"), "a&lt;b&gt;&amp;c");
        let text = welcome(Some(0.8), None);
        assert!(text.contains("🔹 EOS: $0.8000"));
        assert!(text.contains("🔹 RAM: unavailable EOS/kb"));
    }

    #[test]
    fn test_wallet_hides_key_without_session() {
        let overview = WalletOverview {
            credential: Credential {
                account_name: "alice".into(),
                public_key: "PUB_K1_abc".into(),
                encrypted_private_key: "x".into(),
                permission: "active".into(),
            },
            balance: 1.5,
            session_expires_at: None,
            private_key: None,
        };
        let text = wallet(&overview, chrono::Utc::now());
        assert!(text.contains("<code>alice</code>"));
        assert!(text.contains("1.5000 EOS"));
        assert!(!text.contains("tg-spoiler"));
        assert!(!text.contains("Session Expire"));
    }
}
