// repository/mod.rs
//
// Store ports. Production uses the Mongo implementations; tests use the
// in-memory ones. The concurrency-critical operations (`claim`, `mark_paid`,
// transaction insert) are specified here as atomic compare-and-swap
// semantics that every implementation must honor.
pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;

use crate::errors::Result;
use crate::models::booking::{Booking, PayoutStatus};
use crate::models::cleaner_profile::CleanerProfile;
use crate::models::transaction::{Transaction, TransactionStatus};
use crate::services::pricing::Pricing;

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn insert(&self, booking: Booking) -> Result<Booking>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Booking>>;

    /// All bookings where the user is either party, newest first.
    async fn find_for_user(&self, user_id: &str) -> Result<Vec<Booking>>;

    /// Atomic claim: matches `{_id, cleaner: null, status: pending}` and sets
    /// cleaner, status=confirmed, accepted_at in one conditional update.
    /// Returns the updated booking, or None when the filter did not match.
    /// A read-then-write realization is a race bug.
    async fn claim(
        &self,
        id: &str,
        cleaner_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Booking>>;

    async fn set_pricing(&self, id: &str, pricing: &Pricing) -> Result<()>;

    /// Conditional `paid: false -> true` flip. Returns false when the booking
    /// was already paid (or missing), without touching it.
    async fn mark_paid(
        &self,
        id: &str,
        gateway_txn_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn set_payout_status(
        &self,
        id: &str,
        status: PayoutStatus,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// confirmed -> in-progress, only for the assigned cleaner.
    async fn start_service(&self, id: &str, cleaner_id: &str) -> Result<Option<Booking>>;

    /// in-progress -> completed, only for the assigned cleaner.
    async fn complete_service(
        &self,
        id: &str,
        cleaner_id: &str,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Option<Booking>>;

    /// Sets rating/review once, only while completed and unrated. Returns
    /// false when the condition did not match.
    async fn set_rating(&self, id: &str, rating: i32, review: Option<String>) -> Result<bool>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Appends a ledger row. Inserting a second `type=payment` row with an
    /// already-recorded gateway transaction id fails with
    /// `AppError::DuplicateKey`.
    async fn insert(&self, txn: Transaction) -> Result<Transaction>;

    async fn payment_exists(&self, gateway_txn_id: &str) -> Result<bool>;

    /// Finalizes one's own just-created row. Cross-row mutation is not part
    /// of this port.
    async fn finalize(
        &self,
        id: &ObjectId,
        status: TransactionStatus,
        gateway_txn_id: Option<&str>,
        metadata: Option<serde_json::Value>,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn list_for_booking(&self, booking_id: &str) -> Result<Vec<Transaction>>;
}

#[async_trait]
pub trait CleanerProfileStore: Send + Sync {
    async fn find_by_user(&self, user_id: &str) -> Result<Option<CleanerProfile>>;

    async fn upsert(&self, profile: CleanerProfile) -> Result<()>;

    /// Fold a completed-booking rating into the running average.
    async fn apply_rating(&self, user_id: &str, rating: i32) -> Result<()>;
}
