// repository/memory.rs
//
// Thread-safe in-memory stores. Used by the test suites and handy for local
// runs without a MongoDB instance; the CAS operations take the write lock
// for the whole check-and-mutate so they keep the same atomicity the Mongo
// conditional updates provide.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use tokio::sync::RwLock;

use crate::errors::{AppError, Result};
use crate::models::booking::{Booking, BookingStatus, PaymentStatus, PayoutStatus};
use crate::models::cleaner_profile::CleanerProfile;
use crate::models::transaction::{Transaction, TransactionStatus, TransactionType};
use crate::services::pricing::Pricing;

use super::{BookingStore, CleanerProfileStore, TransactionStore};

#[derive(Default, Clone)]
pub struct InMemoryBookingStore {
    bookings: Arc<RwLock<HashMap<String, Booking>>>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn insert(&self, mut booking: Booking) -> Result<Booking> {
        if booking.id.is_none() {
            booking.id = Some(ObjectId::new());
        }
        let mut bookings = self.bookings.write().await;
        bookings.insert(booking.id_hex(), booking.clone());
        Ok(booking)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Booking>> {
        let bookings = self.bookings.read().await;
        Ok(bookings.get(id).cloned())
    }

    async fn find_for_user(&self, user_id: &str) -> Result<Vec<Booking>> {
        let bookings = self.bookings.read().await;
        let mut found: Vec<Booking> = bookings
            .values()
            .filter(|b| b.involves(user_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn claim(
        &self,
        id: &str,
        cleaner_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Booking>> {
        let mut bookings = self.bookings.write().await;
        match bookings.get_mut(id) {
            Some(booking)
                if booking.cleaner.is_none() && booking.status == BookingStatus::Pending =>
            {
                booking.cleaner = Some(cleaner_id.to_string());
                booking.status = BookingStatus::Confirmed;
                booking.accepted_at = Some(at);
                Ok(Some(booking.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_pricing(&self, id: &str, pricing: &Pricing) -> Result<()> {
        let mut bookings = self.bookings.write().await;
        let booking = bookings.get_mut(id).ok_or(AppError::BookingNotFound)?;
        booking.total_price = pricing.total_price;
        booking.platform_fee = pricing.platform_fee;
        booking.cleaner_payout = pricing.cleaner_payout;
        Ok(())
    }

    async fn mark_paid(
        &self,
        id: &str,
        gateway_txn_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut bookings = self.bookings.write().await;
        match bookings.get_mut(id) {
            Some(booking) if !booking.paid => {
                booking.paid = true;
                booking.paid_at = Some(at);
                booking.payment_status = PaymentStatus::Paid;
                booking.transaction_id = Some(gateway_txn_id.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_payout_status(
        &self,
        id: &str,
        status: PayoutStatus,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut bookings = self.bookings.write().await;
        if let Some(booking) = bookings.get_mut(id) {
            booking.payout_status = status;
            if processed_at.is_some() {
                booking.payout_processed_at = processed_at;
            }
        }
        Ok(())
    }

    async fn start_service(&self, id: &str, cleaner_id: &str) -> Result<Option<Booking>> {
        let mut bookings = self.bookings.write().await;
        match bookings.get_mut(id) {
            Some(booking)
                if booking.cleaner.as_deref() == Some(cleaner_id)
                    && booking.status == BookingStatus::Confirmed =>
            {
                booking.status = BookingStatus::InProgress;
                Ok(Some(booking.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn complete_service(
        &self,
        id: &str,
        cleaner_id: &str,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Option<Booking>> {
        let mut bookings = self.bookings.write().await;
        match bookings.get_mut(id) {
            Some(booking)
                if booking.cleaner.as_deref() == Some(cleaner_id)
                    && booking.status == BookingStatus::InProgress =>
            {
                booking.status = BookingStatus::Completed;
                booking.completed_at = Some(at);
                if notes.is_some() {
                    booking.completion_notes = notes;
                }
                Ok(Some(booking.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_rating(&self, id: &str, rating: i32, review: Option<String>) -> Result<bool> {
        let mut bookings = self.bookings.write().await;
        match bookings.get_mut(id) {
            Some(booking)
                if booking.status == BookingStatus::Completed && booking.rating.is_none() =>
            {
                booking.rating = Some(rating);
                booking.review = review;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    transactions: Arc<RwLock<Vec<Transaction>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Transaction> {
        self.transactions.read().await.clone()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, mut txn: Transaction) -> Result<Transaction> {
        if txn.id.is_none() {
            txn.id = Some(ObjectId::new());
        }
        let mut transactions = self.transactions.write().await;
        if txn.kind == TransactionType::Payment {
            let duplicate = transactions.iter().any(|t| {
                t.kind == TransactionType::Payment
                    && t.transaction_id.is_some()
                    && t.transaction_id == txn.transaction_id
            });
            if duplicate {
                return Err(AppError::DuplicateKey);
            }
        }
        transactions.push(txn.clone());
        Ok(txn)
    }

    async fn payment_exists(&self, gateway_txn_id: &str) -> Result<bool> {
        let transactions = self.transactions.read().await;
        Ok(transactions.iter().any(|t| {
            t.kind == TransactionType::Payment
                && t.transaction_id.as_deref() == Some(gateway_txn_id)
        }))
    }

    async fn finalize(
        &self,
        id: &ObjectId,
        status: TransactionStatus,
        gateway_txn_id: Option<&str>,
        metadata: Option<serde_json::Value>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        if let Some(txn) = transactions.iter_mut().find(|t| t.id.as_ref() == Some(id)) {
            txn.status = status;
            txn.processed_at = Some(at);
            if let Some(txn_id) = gateway_txn_id {
                txn.transaction_id = Some(txn_id.to_string());
            }
            if metadata.is_some() {
                txn.metadata = metadata;
            }
        }
        Ok(())
    }

    async fn list_for_booking(&self, booking_id: &str) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        let mut found: Vec<Transaction> = transactions
            .iter()
            .filter(|t| t.booking_id == booking_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryCleanerProfileStore {
    profiles: Arc<RwLock<HashMap<String, CleanerProfile>>>,
}

impl InMemoryCleanerProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CleanerProfileStore for InMemoryCleanerProfileStore {
    async fn find_by_user(&self, user_id: &str) -> Result<Option<CleanerProfile>> {
        let profiles = self.profiles.read().await;
        Ok(profiles.get(user_id).cloned())
    }

    async fn upsert(&self, profile: CleanerProfile) -> Result<()> {
        let mut profiles = self.profiles.write().await;
        profiles.insert(profile.user_id.clone(), profile);
        Ok(())
    }

    async fn apply_rating(&self, user_id: &str, rating: i32) -> Result<()> {
        let mut profiles = self.profiles.write().await;
        if let Some(profile) = profiles.get(user_id).cloned() {
            profiles.insert(user_id.to_string(), profile.with_rating(rating));
        }
        Ok(())
    }
}
