// services/acceptance.rs
//
// The claim is the concurrency-critical operation of the whole system: many
// cleaners may race for one pending booking and exactly one may win. The
// store's conditional update is the only correctness mechanism; this module
// only adds miss disambiguation and the success-path notification.
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::errors::{AppError, Result};
use crate::models::booking::{Booking, BookingStatus};
use crate::services::notify::EVENT_BOOKING_ACCEPTED;
use crate::state::AppState;

pub async fn accept_booking(
    state: &AppState,
    booking_id: &str,
    cleaner_id: &str,
) -> Result<Booking> {
    let claimed = state
        .bookings
        .claim(booking_id, cleaner_id, Utc::now())
        .await?;

    let Some(booking) = claimed else {
        // The conditional update missed. Re-read to tell the caller why;
        // client UX differs per kind.
        return Err(match state.bookings.find_by_id(booking_id).await? {
            None => AppError::BookingNotFound,
            Some(existing) => {
                if existing.cleaner.is_some() {
                    AppError::AlreadyClaimed
                } else if existing.status != BookingStatus::Pending {
                    AppError::NoLongerPending
                } else {
                    // Lost the race by milliseconds and the winner's write
                    // is not yet visible to our re-read.
                    AppError::AcceptConflict
                }
            }
        });
    };

    info!(
        booking_id,
        cleaner_id, "booking accepted"
    );

    // Best effort; never fails the accept response.
    if let Err(e) = state
        .notifier
        .notify(
            &booking.client,
            EVENT_BOOKING_ACCEPTED,
            json!({
                "booking_id": booking.id_hex(),
                "cleaner": cleaner_id,
            }),
        )
        .await
    {
        warn!(error = %e, "failed to notify client of acceptance");
    }

    Ok(booking)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::booking::{CleaningCategory, ServiceSelection};
    use crate::repository::memory::{
        InMemoryBookingStore, InMemoryCleanerProfileStore, InMemoryTransactionStore,
    };
    use crate::services::notify::Notifier;
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

    fn test_state() -> AppState {
        AppState::new(
            Arc::new(InMemoryBookingStore::new()),
            Arc::new(InMemoryTransactionStore::new()),
            Arc::new(InMemoryCleanerProfileStore::new()),
            Arc::new(NullNotifier),
            Some("secret".to_string()),
            "jwt".to_string(),
        )
    }

    fn pending_booking(client: &str) -> Booking {
        Booking::new(
            client.to_string(),
            ServiceSelection::HomeCleaning {
                cleaning_category: CleaningCategory::DeepCleaning,
            },
            5_000,
            None,
            None,
        )
    }

    #[tokio::test]
    async fn accept_sets_cleaner_and_confirms() {
        let state = test_state();
        let booking = state
            .bookings
            .insert(pending_booking("client-1"))
            .await
            .unwrap();

        let accepted = accept_booking(&state, &booking.id_hex(), "cleaner-1")
            .await
            .unwrap();

        assert_eq!(accepted.cleaner.as_deref(), Some("cleaner-1"));
        assert_eq!(accepted.status, BookingStatus::Confirmed);
        assert!(accepted.accepted_at.is_some());
    }

    #[tokio::test]
    async fn second_accept_gets_conflict_kind() {
        let state = test_state();
        let booking = state
            .bookings
            .insert(pending_booking("client-1"))
            .await
            .unwrap();
        let id = booking.id_hex();

        accept_booking(&state, &id, "cleaner-1").await.unwrap();
        let err = accept_booking(&state, &id, "cleaner-2").await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyClaimed));
    }

    #[tokio::test]
    async fn unknown_booking_is_not_found() {
        let state = test_state();
        let err = accept_booking(&state, &mongodb::bson::oid::ObjectId::new().to_hex(), "c")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BookingNotFound));
    }

    #[tokio::test]
    async fn concurrent_accepts_have_exactly_one_winner() {
        let state = test_state();
        let booking = state
            .bookings
            .insert(pending_booking("client-1"))
            .await
            .unwrap();
        let id = booking.id_hex();

        let mut handles = Vec::new();
        for i in 0..16 {
            let state = state.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                accept_booking(&state, &id, &format!("cleaner-{}", i)).await
            }));
        }

        let mut winners = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(
                    AppError::AlreadyClaimed
                    | AppError::NoLongerPending
                    | AppError::AcceptConflict,
                ) => conflicts += 1,
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(conflicts, 15);

        let final_state = state.bookings.find_by_id(&id).await.unwrap().unwrap();
        assert!(final_state.cleaner.is_some());
        assert_eq!(final_state.status, BookingStatus::Confirmed);
    }
}
