// services/payment.rs
//
// Payment initiation. The split is recomputed and persisted BEFORE the
// gateway call so the authoritative amounts are durable whatever the STK
// push outcome. Re-invoking is a brand-new push; idempotency lives in the
// settlement processor, not here.
use tracing::info;

use crate::errors::{AppError, Result};
use crate::models::booking::BookingStatus;
use crate::services::mpesa::ChargeReceipt;
use crate::services::pricing::compute_pricing;
use crate::state::AppState;

pub async fn initiate_payment(
    state: &AppState,
    booking_id: &str,
    requester_id: &str,
    payer_phone: &str,
) -> Result<ChargeReceipt> {
    let booking = state
        .bookings
        .find_by_id(booking_id)
        .await?
        .ok_or(AppError::BookingNotFound)?;

    if booking.client != requester_id {
        return Err(AppError::Unauthorized);
    }
    if booking.paid {
        return Err(AppError::AlreadyPaid);
    }
    if booking.status != BookingStatus::Confirmed {
        return Err(AppError::invalid_data(
            "payment can only be initiated for a confirmed booking",
        ));
    }
    if booking.cleaner.is_none() {
        // The payout split target is unknown until a cleaner is assigned.
        return Err(AppError::invalid_data(
            "a cleaner must accept the booking before payment",
        ));
    }

    let pricing = compute_pricing(booking.price);
    state.bookings.set_pricing(booking_id, &pricing).await?;

    let gateway = state.gateway.as_ref().ok_or_else(|| {
        AppError::ServiceUnavailable("payment gateway is not configured".to_string())
    })?;

    let receipt = gateway
        .request_charge(
            pricing.total_price,
            payer_phone,
            booking_id,
            "Safisha booking payment",
        )
        .await?;

    info!(
        booking_id,
        checkout_request_id = %receipt.checkout_request_id,
        amount = pricing.total_price,
        "payment initiated"
    );

    Ok(receipt)
}
