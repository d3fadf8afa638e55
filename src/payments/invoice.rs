//! Card invoices through the Bot API `sendInvoice` method

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const INVOICE_TITLE: &str = "New EOS Account";
const INVOICE_DESCRIPTION: &str = "Payment for services creating a new EOS account";
const INVOICE_PHOTO: &str = "https://static-btcfx.oss-ap-southeast-1.aliyuncs.com/invoice-cartoon.png";

/// Whole USD price of an account, in cents
pub fn card_amount_cents(eos_usd: f64, account_price_eos: f64) -> u32 {
    (eos_usd * account_price_eos).ceil().max(0.0) as u32 * 100
}

#[derive(Debug, Serialize)]
struct LabeledPrice<'a> {
    label: &'a str,
    amount: u32,
}

#[derive(Debug, Serialize)]
struct SendInvoice<'a> {
    chat_id: i64,
    title: &'a str,
    description: &'a str,
    payload: &'a str,
    provider_token: &'a str,
    start_parameter: &'a str,
    currency: &'a str,
    prices: Vec<LabeledPrice<'a>>,
    max_tip_amount: u32,
    suggested_tip_amounts: Vec<u32>,
    photo_url: &'a str,
    photo_width: u32,
    photo_height: u32,
    need_name: bool,
    need_phone_number: bool,
    need_email: bool,
    need_shipping_address: bool,
    is_flexible: bool,
}

#[derive(Debug, Deserialize)]
struct BotApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct InvoiceSender {
    client: reqwest::Client,
    endpoint: String,
    provider_token: String,
}

impl InvoiceSender {
    pub fn new(api_url: &str, bot_token: &str, provider_token: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/bot{}/sendInvoice", api_url.trim_end_matches('/'), bot_token),
            provider_token: provider_token.to_string(),
        })
    }

    /// Send a USD invoice; `payload` comes back on the successful payment
    pub async fn send(&self, chat_id: i64, amount_cents: u32, payload: &str) -> Result<()> {
        if self.provider_token.is_empty() {
            return Err(Error::Payment("Card payments are not configured".into()));
        }

        let invoice = SendInvoice {
            chat_id,
            title: INVOICE_TITLE,
            description: INVOICE_DESCRIPTION,
            payload,
            provider_token: &self.provider_token,
            start_parameter: "start",
            currency: "USD",
            prices: vec![LabeledPrice {
                label: "USD",
                amount: amount_cents,
            }],
            max_tip_amount: 500,
            suggested_tip_amounts: vec![100, 200, 300, 500],
            photo_url: INVOICE_PHOTO,
            photo_width: 512,
            photo_height: 512,
            need_name: false,
            need_phone_number: false,
            need_email: false,
            need_shipping_address: false,
            is_flexible: false,
        };

        let response: BotApiResponse = self
            .client
            .post(&self.endpoint)
            .json(&invoice)
            .send()
            .await?
            .json()
            .await?;

        if !response.ok {
            return Err(Error::Payment(
                response.description.unwrap_or_else(|| "sendInvoice rejected".into()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_card_amount_rounds_up_to_whole_dollars() {
        assert_eq!(card_amount_cents(0.8, 4.0), 400);
        assert_eq!(card_amount_cents(0.81, 4.0), 400);
        assert_eq!(card_amount_cents(0.83, 4.0), 400);
        assert_eq!(card_amount_cents(0.76, 4.0), 400);
        assert_eq!(card_amount_cents(1.1, 4.0), 500);
    }

    #[tokio::test]
    async fn test_send_invoice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendInvoice"))
            .and(body_partial_json(serde_json::json!({
                "chat_id": 7,
                "currency": "USD",
                "payload": "p-1",
                "prices": [{"label": "USD", "amount": 400}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true,"result":{}}"#))
            .expect(1)
            .mount(&server)
            .await;

        let sender = InvoiceSender::new(&server.uri(), "123:abc", "provider", Duration::from_secs(2)).unwrap();
        sender.send(7, 400, "p-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_invoice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"ok":false,"description":"Bad Request: CURRENCY_TOTAL_AMOUNT_INVALID"}"#),
            )
            .mount(&server)
            .await;

        let sender = InvoiceSender::new(&server.uri(), "1:x", "provider", Duration::from_secs(2)).unwrap();
        match sender.send(7, 1, "p").await {
            Err(Error::Payment(msg)) => assert!(msg.contains("CURRENCY_TOTAL_AMOUNT_INVALID")),
            other => panic!("unexpected {:?}", other),
        }

        let unconfigured = InvoiceSender::new(&server.uri(), "1:x", "", Duration::from_secs(2)).unwrap();
        assert!(unconfigured.send(7, 400, "p").await.is_err());
    }
}
