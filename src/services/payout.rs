// services/payout.rs
//
// Payout disbursement. Fire-and-forget from settlement's point of view but
// fully tracked: a pending ledger row is written before the rail call so
// there is a durable record of intent, and every terminal outcome lands in
// the ledger plus the booking's payout_status. A rail failure is caught
// here and never unwinds the already-committed payment settlement.
use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::errors::{AppError, Result};
use crate::models::booking::{Booking, PayoutStatus};
use crate::models::transaction::{Transaction, TransactionStatus};
use crate::services::notify::EVENT_PAYOUT_PROCESSED;
use crate::state::AppState;

pub async fn disburse_payout(state: &AppState, booking: &Booking) -> Result<()> {
    let booking_id = booking.id_hex();

    // Expected for bookings paid before acceptance in edge flows.
    let Some(cleaner) = booking.cleaner.clone() else {
        debug!(booking_id, "no cleaner assigned, skipping payout");
        return Ok(());
    };

    let amount = booking.cleaner_payout;

    let profile = state.cleaner_profiles.find_by_user(&cleaner).await?;
    let phone = profile.as_ref().and_then(|p| p.mpesa_phone_number.clone());

    let Some(phone) = phone else {
        let reason = if profile.is_none() {
            "cleaner profile not found"
        } else {
            "cleaner has no M-Pesa number configured"
        };
        warn!(booking_id, cleaner, reason, "payout failed before rail call");
        state
            .transactions
            .insert(Transaction::payout(
                booking_id.clone(),
                booking.client.clone(),
                cleaner,
                amount,
                TransactionStatus::Failed,
                Some(json!({ "error": reason })),
            ))
            .await?;
        state
            .bookings
            .set_payout_status(&booking_id, PayoutStatus::Failed, None)
            .await?;
        return Ok(());
    };

    // Durable record of intent before touching the rail.
    let txn = state
        .transactions
        .insert(Transaction::payout(
            booking_id.clone(),
            booking.client.clone(),
            cleaner.clone(),
            amount,
            TransactionStatus::Pending,
            None,
        ))
        .await?;
    state
        .bookings
        .set_payout_status(&booking_id, PayoutStatus::Pending, None)
        .await?;
    let txn_id = txn
        .id
        .ok_or_else(|| AppError::service("ledger row missing id"))?;

    let rail_result = match state.gateway.as_ref() {
        Some(gateway) => {
            gateway
                .transfer(amount, &phone, &format!("Safisha payout {}", booking_id))
                .await
        }
        None => Err(crate::errors::AppError::ServiceUnavailable(
            "payout rail is not configured".to_string(),
        )),
    };

    match rail_result {
        Ok(receipt) => {
            let now = Utc::now();
            state
                .transactions
                .finalize(
                    &txn_id,
                    TransactionStatus::Completed,
                    Some(&receipt.transaction_id),
                    None,
                    now,
                )
                .await?;
            state
                .bookings
                .set_payout_status(&booking_id, PayoutStatus::Processed, Some(now))
                .await?;
            info!(booking_id, cleaner, amount, "payout processed");

            if let Err(e) = state
                .notifier
                .notify(
                    &cleaner,
                    EVENT_PAYOUT_PROCESSED,
                    json!({ "booking_id": booking_id, "amount": amount }),
                )
                .await
            {
                warn!(error = %e, "failed to notify cleaner of payout");
            }
        }
        Err(e) => {
            // Reported for operator-driven retry via the ledger; not
            // auto-retried and never propagated.
            error!(booking_id, cleaner, error = %e, "payout rail failure");
            state
                .transactions
                .finalize(
                    &txn_id,
                    TransactionStatus::Failed,
                    None,
                    Some(json!({ "error": e.to_string() })),
                    Utc::now(),
                )
                .await?;
            state
                .bookings
                .set_payout_status(&booking_id, PayoutStatus::Failed, None)
                .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::booking::{CleaningCategory, ServiceSelection};
    use crate::models::cleaner_profile::CleanerProfile;
    use crate::models::transaction::TransactionType;
    use crate::repository::memory::{
        InMemoryBookingStore, InMemoryCleanerProfileStore, InMemoryTransactionStore,
    };
    use crate::services::mpesa::{ChargeReceipt, PaymentGateway, TransferReceipt};
    use crate::services::notify::Notifier;
    use crate::services::pricing::compute_pricing;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn notify(
            &self,
            _user_id: &str,
            _event: &str,
            _payload: serde_json::Value,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct StubGateway {
        fail_transfer: bool,
    }

    #[async_trait]
    impl PaymentGateway for StubGateway {
        async fn request_charge(
            &self,
            _amount: i64,
            _payer_phone: &str,
            _reference: &str,
            _description: &str,
        ) -> crate::errors::Result<ChargeReceipt> {
            Ok(ChargeReceipt {
                checkout_request_id: "ws_CO_1".to_string(),
                merchant_request_id: "mr-1".to_string(),
                customer_message: "ok".to_string(),
            })
        }

        async fn transfer(
            &self,
            _amount: i64,
            _account: &str,
            _narrative: &str,
        ) -> crate::errors::Result<TransferReceipt> {
            if self.fail_transfer {
                Err(crate::errors::AppError::mpesa("B2C failed: 500"))
            } else {
                Ok(TransferReceipt {
                    transaction_id: "AG_12345".to_string(),
                })
            }
        }
    }

    fn test_state(fail_transfer: bool) -> (AppState, Arc<InMemoryTransactionStore>) {
        let transactions = Arc::new(InMemoryTransactionStore::new());
        let state = AppState::new(
            Arc::new(InMemoryBookingStore::new()),
            transactions.clone(),
            Arc::new(InMemoryCleanerProfileStore::new()),
            Arc::new(NullNotifier),
            Some("secret".to_string()),
            "jwt".to_string(),
        )
        .with_gateway(Arc::new(StubGateway { fail_transfer }));
        (state, transactions)
    }

    async fn paid_booking(state: &AppState, cleaner: Option<&str>) -> Booking {
        let mut booking = crate::models::booking::Booking::new(
            "client-1".to_string(),
            ServiceSelection::HomeCleaning {
                cleaning_category: CleaningCategory::GeneralCleaning,
            },
            10_000,
            None,
            None,
        );
        booking.cleaner = cleaner.map(|c| c.to_string());
        let pricing = compute_pricing(booking.price);
        booking.total_price = pricing.total_price;
        booking.platform_fee = pricing.platform_fee;
        booking.cleaner_payout = pricing.cleaner_payout;
        booking.paid = true;
        state.bookings.insert(booking).await.unwrap()
    }

    #[tokio::test]
    async fn no_cleaner_is_a_silent_noop() {
        let (state, transactions) = test_state(false);
        let booking = paid_booking(&state, None).await;

        disburse_payout(&state, &booking).await.unwrap();
        assert!(transactions.all().await.is_empty());
    }

    #[tokio::test]
    async fn missing_profile_writes_failed_row() {
        let (state, transactions) = test_state(false);
        let booking = paid_booking(&state, Some("cleaner-1")).await;

        disburse_payout(&state, &booking).await.unwrap();

        let rows = transactions.all().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, TransactionType::Payout);
        assert_eq!(rows[0].status, TransactionStatus::Failed);

        let updated = state
            .bookings
            .find_by_id(&booking.id_hex())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.payout_status, PayoutStatus::Failed);
    }

    #[tokio::test]
    async fn missing_phone_number_writes_failed_row() {
        let (state, transactions) = test_state(false);
        let booking = paid_booking(&state, Some("cleaner-1")).await;
        state
            .cleaner_profiles
            .upsert(CleanerProfile::new("cleaner-1".to_string(), None))
            .await
            .unwrap();

        disburse_payout(&state, &booking).await.unwrap();

        let rows = transactions.all().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn successful_transfer_completes_row_and_marks_processed() {
        let (state, transactions) = test_state(false);
        let booking = paid_booking(&state, Some("cleaner-1")).await;
        state
            .cleaner_profiles
            .upsert(CleanerProfile::new(
                "cleaner-1".to_string(),
                Some("254712345678".to_string()),
            ))
            .await
            .unwrap();

        disburse_payout(&state, &booking).await.unwrap();

        let rows = transactions.all().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, TransactionStatus::Completed);
        assert_eq!(rows[0].transaction_id.as_deref(), Some("AG_12345"));
        assert_eq!(rows[0].amount, 4_000);

        let updated = state
            .bookings
            .find_by_id(&booking.id_hex())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.payout_status, PayoutStatus::Processed);
        assert!(updated.payout_processed_at.is_some());
    }

    #[tokio::test]
    async fn rail_failure_is_recorded_and_contained() {
        let (state, transactions) = test_state(true);
        let booking = paid_booking(&state, Some("cleaner-1")).await;
        state
            .cleaner_profiles
            .upsert(CleanerProfile::new(
                "cleaner-1".to_string(),
                Some("254712345678".to_string()),
            ))
            .await
            .unwrap();

        // Must not surface the rail error.
        disburse_payout(&state, &booking).await.unwrap();

        let rows = transactions.all().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, TransactionStatus::Failed);
        assert!(rows[0].metadata.as_ref().unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("B2C failed"));

        let updated = state
            .bookings
            .find_by_id(&booking.id_hex())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.payout_status, PayoutStatus::Failed);
        // Payment settlement stays intact.
        assert!(updated.paid);
    }
}
