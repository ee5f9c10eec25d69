// handlers/payments.rs
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
};
use axum::Extension;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::{
    errors::{AppError, Result},
    models::transaction::TransactionResponse,
    models::user::Claims,
    services::payment,
    services::settlement::{
        self, SettlementOutcome, SettlementPayload, SIGNATURE_HEADER,
    },
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub phone_number: String,
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<Json<serde_json::Value>> {
    if payload.phone_number.trim().is_empty() {
        return Err(AppError::invalid_data("phone_number is required"));
    }

    let receipt =
        payment::initiate_payment(&state, &id, &claims.sub, &payload.phone_number).await?;

    Ok(Json(json!({
        "success": true,
        "checkout_request_id": receipt.checkout_request_id,
        "merchant_request_id": receipt.merchant_request_id,
        "customer_message": receipt.customer_message,
    })))
}

/// Trivial read the client polls while waiting for the STK push to resolve.
/// A late webhook still settles correctly after the client gives up; that is
/// the settlement processor's job, not this endpoint's.
pub async fn payment_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let booking = state
        .bookings
        .find_by_id(&id)
        .await?
        .ok_or(AppError::BookingNotFound)?;

    if !booking.involves(&claims.sub) {
        return Err(AppError::Unauthorized);
    }

    Ok(Json(json!({
        "booking_id": booking.id_hex(),
        "paid": booking.paid,
        "payment_status": booking.payment_status,
        "payout_status": booking.payout_status,
        "total_price": booking.total_price,
        "transaction_id": booking.transaction_id,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TransactionResponse>>> {
    let booking = state
        .bookings
        .find_by_id(&id)
        .await?
        .ok_or(AppError::BookingNotFound)?;

    if !booking.involves(&claims.sub) {
        return Err(AppError::Unauthorized);
    }

    let txns = state.transactions.list_for_booking(&id).await?;
    Ok(Json(txns.into_iter().map(TransactionResponse::from).collect()))
}

/// Gateway settlement callback. Authentication failures and malformed
/// payloads are rejected; business rejections are absorbed with an ack so
/// the gateway does not retry them; store failures return 5xx so a
/// transient fault IS retried.
pub async fn settlement_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>> {
    let Some(secret) = state.webhook_secret.as_deref() else {
        // Fail closed: an unsigned deployment never settles anything.
        error!("WEBHOOK_SECRET not configured, refusing settlement callback");
        return Err(AppError::configuration("webhook secret not configured"));
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            error!("settlement callback missing signature header");
            AppError::AuthError
        })?;

    if !settlement::verify_signature(secret, &body, signature) {
        error!("settlement callback signature verification failed");
        return Err(AppError::AuthError);
    }

    let payload: SettlementPayload = serde_json::from_slice(&body)?;

    match settlement::process_settlement(&state, payload).await {
        Ok(outcome) => {
            if let SettlementOutcome::Settled { booking_id } = &outcome {
                info!(booking_id, "settlement callback applied");
            }
            Ok(Json(ack()))
        }
        // Non-retryable business rejection: already logged for manual
        // reconciliation, absorbed so the gateway stops redelivering.
        Err(AppError::AmountMismatch { .. }) => Ok(Json(ack())),
        Err(e) => Err(e),
    }
}

fn ack() -> serde_json::Value {
    json!({
        "ResultCode": 0,
        "ResultDesc": "Success"
    })
}
