//! OxaPay callback listener
//!
//! The callback body is only used to find the payment. The status itself is
//! always read back through the merchant inquiry endpoint.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::oxapay::OxaPayClient;
use super::PaymentEvent;
use crate::error::{Error, Result};
use crate::storage::{PaymentRepository, PaymentStatus, PaymentType};

pub const CALLBACK_PATH: &str = "/oxaPayCallback";

pub struct CallbackState {
    pub payments: PaymentRepository,
    pub oxapay: Arc<OxaPayClient>,
    pub events: mpsc::UnboundedSender<PaymentEvent>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(rename = "userId", alias = "userid")]
    pub user_id: Option<i64>,
    #[serde(rename = "trackId", alias = "track_id")]
    pub track_id: Option<String>,
}

/// Pull `trackId` out of a callback body, string or number
fn track_id_from_body(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    match value.get("trackId").or_else(|| value.get("track_id"))? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Verify and persist the payment a callback points at.
///
/// Emits a [`PaymentEvent`] only when the stored status changes.
pub async fn process_callback(
    state: &CallbackState,
    params: CallbackParams,
    body: &[u8],
) -> Result<PaymentStatus> {
    let track_id = match params.track_id.or_else(|| track_id_from_body(body)) {
        Some(track_id) => track_id,
        None => {
            let user_id = params
                .user_id
                .ok_or_else(|| Error::InvalidInput("callback carries neither userId nor trackId".into()))?;
            state
                .payments
                .latest_for_user(user_id)
                .await?
                .filter(|p| p.kind == PaymentType::Crypto)
                .and_then(|p| p.track_id)
                .ok_or_else(|| Error::NotFound(format!("crypto payment for user {}", user_id)))?
        }
    };

    let payment = state
        .payments
        .by_track_id(&track_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("payment {}", track_id)))?;
    if let Some(user_id) = params.user_id {
        if payment.user_id != user_id {
            return Err(Error::InvalidInput(format!(
                "payment {} does not belong to user {}",
                track_id, user_id
            )));
        }
    }

    let inquiry = state.oxapay.inquiry(&track_id).await?;
    let status = PaymentStatus::from_provider(&inquiry.status);
    debug!("Payment {} reported {} ({})", track_id, inquiry.status, status);

    if payment.normalized_status() == status {
        return Ok(status);
    }

    state.payments.set_status(payment.id, status).await?;
    info!("Payment {} of user {} is now {}", track_id, payment.user_id, status);

    let _ = state.events.send(PaymentEvent {
        user_id: payment.user_id,
        chat_id: payment.chat_id,
        payment_id: payment.id,
        kind: PaymentType::Crypto,
        status,
    });

    Ok(status)
}

async fn handle_callback(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<CallbackParams>,
    body: Bytes,
) -> (StatusCode, String) {
    match process_callback(&state, params, &body).await {
        Ok(PaymentStatus::Succeeded) => (StatusCode::OK, "Payment processed successfully.".into()),
        Ok(status) => (StatusCode::OK, format!("Payment {}.", status)),
        Err(e) => {
            warn!("Rejected payment callback: {}", e);
            (StatusCode::BAD_REQUEST, format!("Payment failed or pending. {}", e))
        }
    }
}

pub fn router(state: Arc<CallbackState>) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(handle_callback).post(handle_callback))
        .with_state(state)
}

/// Serve callbacks on `listen` until `shutdown` fires
pub async fn serve(listen: &str, state: Arc<CallbackState>, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!("Payment callback listener on {}", listen);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Payment callback listener stopped");
    Ok(())
}
