//! OxaPay merchant API client

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Result code OxaPay uses for an accepted request
pub const RESULT_OK: i64 = 100;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub merchant: String,
    pub amount: f64,
    pub currency: String,
    pub life_time: u32,
    pub fee_paid_by_payer: u8,
    pub under_paid_cover: u8,
    pub description: String,
    pub callback_url: String,
    pub return_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub result: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub track_id: Option<String>,
    #[serde(default)]
    pub pay_link: Option<String>,
}

impl PaymentResponse {
    pub fn is_ok(&self) -> bool {
        self.result == RESULT_OK
    }

    /// Status string stored until the first callback arrives
    pub fn status_text(&self) -> String {
        format!("{}-{}", self.result, self.message)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InquiryRequest<'a> {
    merchant: &'a str,
    track_id: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InquiryResponse {
    pub result: i64,
    #[serde(default)]
    pub message: String,
    /// `New`, `Waiting`, `Confirming`, `Paid`, `Expired`, ...
    #[serde(default)]
    pub status: String,
}

pub struct OxaPayClient {
    client: reqwest::Client,
    base_url: String,
    merchant: String,
}

impl OxaPayClient {
    pub fn new(base_url: &str, merchant: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            merchant: merchant.to_string(),
        })
    }

    pub fn merchant(&self) -> &str {
        &self.merchant
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(&self, path: &str, body: &B) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::Payment(format!("{} returned {}: {}", path, status, text)));
        }
        serde_json::from_str(&text).map_err(|e| Error::Payment(format!("Unexpected response from {}: {}", path, e)))
    }

    /// Open a payment and get the payer-facing link
    pub async fn request_payment(&self, request: &PaymentRequest) -> Result<PaymentResponse> {
        let response: PaymentResponse = self.post("/merchants/request", request).await?;
        debug!(
            "OxaPay request result {} ({}), track id {:?}",
            response.result, response.message, response.track_id
        );
        Ok(response)
    }

    /// Current status of `track_id` straight from the provider
    pub async fn inquiry(&self, track_id: &str) -> Result<InquiryResponse> {
        let response: InquiryResponse = self
            .post(
                "/merchants/inquiry",
                &InquiryRequest {
                    merchant: &self.merchant,
                    track_id,
                },
            )
            .await?;
        if response.result != RESULT_OK {
            return Err(Error::Payment(format!(
                "Inquiry for {} failed: {} {}",
                track_id, response.result, response.message
            )));
        }
        Ok(response)
    }
}
