// services/settlement.rs
//
// Webhook settlement processor. Every step is a hard gate: a failure at one
// never proceeds to the next. Idempotency comes from the paid flag (cheap
// gate), the ledger lookup (belt and suspenders), and finally the unique
// ledger insert that acts as the commit lock when duplicate deliveries race
// past both read gates.
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::{error, info, warn};

use crate::errors::{AppError, Result};
use crate::models::transaction::Transaction;
use crate::services::notify::EVENT_PAYMENT_COMPLETED;
use crate::services::payout::disburse_payout;
use crate::services::pricing::compute_pricing;
use crate::state::AppState;

/// Absorbs independent rounding between us and the gateway, in whole KES.
pub const AMOUNT_TOLERANCE: i64 = 1;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

#[derive(Debug, Deserialize)]
pub struct SettlementPayload {
    pub status: String,

    #[serde(alias = "transaction_id")]
    pub id: String,

    #[serde(alias = "value")]
    pub amount: i64,

    #[serde(default)]
    pub metadata: Option<SettlementMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct SettlementMetadata {
    #[serde(default)]
    pub booking_id: Option<String>,
}

impl SettlementPayload {
    fn is_successful(&self) -> bool {
        matches!(
            self.status.to_ascii_uppercase().as_str(),
            "COMPLETE" | "COMPLETED" | "SUCCESS" | "SUCCESSFUL"
        )
    }

    fn booking_id(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.booking_id.as_deref())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Payment durably recorded; payout and notifications triggered.
    Settled { booking_id: String },
    /// Duplicate delivery; acknowledged with no state change.
    AlreadyProcessed,
    /// Irrelevant or unidentifiable payload; acknowledged and dropped.
    Ignored(&'static str),
}

/// Constant-time HMAC-SHA256 check over the raw callback body. The header
/// carries the base64-encoded tag.
pub fn verify_signature(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let Ok(signature) = base64.decode(signature_header.trim()) else {
        return false;
    };
    mac.verify_slice(&signature).is_ok()
}

/// Compute the signature header value for a body. Used by the gateway
/// simulator and the test suite.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(body);
    base64.encode(mac.finalize().into_bytes())
}

/// Applies an authenticated settlement payload. Signature verification has
/// already happened at the HTTP boundary; everything here is gates 2-9.
pub async fn process_settlement(
    state: &AppState,
    payload: SettlementPayload,
) -> Result<SettlementOutcome> {
    // Gate 2: only final successful reports settle anything.
    if !payload.is_successful() {
        info!(status = %payload.status, "ignoring non-successful settlement report");
        return Ok(SettlementOutcome::Ignored("non-successful status"));
    }

    // Gate 3: cannot settle what cannot be identified.
    let Some(booking_id) = payload.booking_id().map(str::to_string) else {
        warn!(gateway_txn = %payload.id, "settlement payload missing booking reference");
        return Ok(SettlementOutcome::Ignored("missing booking reference"));
    };

    let Some(booking) = state.bookings.find_by_id(&booking_id).await? else {
        warn!(booking_id, "settlement for unknown booking");
        return Ok(SettlementOutcome::Ignored("unknown booking"));
    };

    // Gate 4: primary defense against duplicate delivery.
    if booking.paid {
        info!(booking_id, "booking already paid, acknowledging duplicate");
        return Ok(SettlementOutcome::AlreadyProcessed);
    }

    // Gate 5: the same gateway transaction may arrive under a booking whose
    // paid flag has not committed yet.
    if state.transactions.payment_exists(&payload.id).await? {
        info!(booking_id, gateway_txn = %payload.id, "payment already in ledger");
        return Ok(SettlementOutcome::AlreadyProcessed);
    }

    // Gate 6: recompute, never trust the stored split or the client.
    let pricing = compute_pricing(booking.price);
    if (pricing.total_price - payload.amount).abs() > AMOUNT_TOLERANCE {
        error!(
            booking_id,
            expected = pricing.total_price,
            reported = payload.amount,
            "settlement amount mismatch, manual reconciliation required"
        );
        return Err(AppError::AmountMismatch {
            expected: pricing.total_price,
            reported: payload.amount,
        });
    }

    // Persist the authoritative split before committing.
    state.bookings.set_pricing(&booking_id, &pricing).await?;

    // Gate 7: ledger insert first. The unique index on the gateway txn id is
    // the real idempotency lock; the conditional paid flip follows it.
    let ledger_row = Transaction::payment(
        booking_id.clone(),
        booking.client.clone(),
        booking.cleaner.clone(),
        pricing.total_price,
        payload.id.clone(),
        Some(json!({ "gateway_status": payload.status })),
    );
    let now = Utc::now();
    match state.transactions.insert(ledger_row).await {
        Ok(_) => {}
        Err(AppError::DuplicateKey) => {
            info!(booking_id, "concurrent delivery won the ledger insert");
            return Ok(SettlementOutcome::AlreadyProcessed);
        }
        Err(e) => return Err(e),
    }

    if !state.bookings.mark_paid(&booking_id, &payload.id, now).await? {
        // Paid flag committed between our read and the flip; the ledger row
        // for this txn id is ours and stays as the record of this delivery.
        info!(booking_id, "paid flag already set, acknowledging");
        return Ok(SettlementOutcome::AlreadyProcessed);
    }

    info!(
        booking_id,
        amount = pricing.total_price,
        gateway_txn = %payload.id,
        "payment settled"
    );

    // Step 8: payout is a best-effort follow-on. Its failure must never
    // unwind the settlement that just committed.
    let mut settled = booking;
    settled.total_price = pricing.total_price;
    settled.platform_fee = pricing.platform_fee;
    settled.cleaner_payout = pricing.cleaner_payout;
    settled.paid = true;
    if settled.cleaner.is_some() {
        if let Err(e) = disburse_payout(state, &settled).await {
            error!(booking_id, error = %e, "payout follow-on failed");
        }
    }

    // Step 9: notify both parties, best effort.
    let event_payload = json!({
        "booking_id": booking_id,
        "amount": pricing.total_price,
    });
    if let Err(e) = state
        .notifier
        .notify(&settled.client, EVENT_PAYMENT_COMPLETED, event_payload.clone())
        .await
    {
        warn!(error = %e, "failed to notify client of payment");
    }
    if let Some(cleaner) = settled.cleaner.as_deref() {
        if let Err(e) = state
            .notifier
            .notify(cleaner, EVENT_PAYMENT_COMPLETED, event_payload)
            .await
        {
            warn!(error = %e, "failed to notify cleaner of payment");
        }
    }

    Ok(SettlementOutcome::Settled { booking_id })
}
