// repository/mongo.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::bson::{self, doc, oid::ObjectId, Bson};
use mongodb::options::ReturnDocument;
use mongodb::{Collection, Database};
use serde::Serialize;

use crate::errors::{is_duplicate_key, AppError, Result};
use crate::models::booking::{Booking, BookingStatus, PayoutStatus};
use crate::models::cleaner_profile::CleanerProfile;
use crate::models::transaction::{Transaction, TransactionStatus, TransactionType};
use crate::services::pricing::Pricing;

use super::{BookingStore, CleanerProfileStore, TransactionStore};

pub const BOOKINGS_COLLECTION: &str = "bookings";
pub const TRANSACTIONS_COLLECTION: &str = "transactions";
pub const CLEANER_PROFILES_COLLECTION: &str = "cleaner_profiles";

/// Serialize a model enum/value into Bson using its serde form, so filters
/// and updates can never drift from the document representation.
fn as_bson<T: Serialize>(value: &T) -> Result<Bson> {
    mongodb::bson::to_bson(value).map_err(|e| AppError::service(e.to_string()))
}

#[derive(Clone)]
pub struct MongoBookingStore {
    collection: Collection<Booking>,
}

impl MongoBookingStore {
    pub fn new(db: &Database) -> Self {
        MongoBookingStore {
            collection: db.collection(BOOKINGS_COLLECTION),
        }
    }
}

#[async_trait]
impl BookingStore for MongoBookingStore {
    async fn insert(&self, booking: Booking) -> Result<Booking> {
        self.collection.insert_one(&booking).await?;
        Ok(booking)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Booking>> {
        let filter = doc! { "_id": ObjectId::parse_str(id)? };
        Ok(self.collection.find_one(filter).await?)
    }

    async fn find_for_user(&self, user_id: &str) -> Result<Vec<Booking>> {
        let filter = doc! {
            "$or": [
                { "client": user_id },
                { "cleaner": user_id }
            ]
        };
        let cursor = self.collection.find(filter).await?;
        let mut bookings: Vec<Booking> = cursor.try_collect().await?;
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }

    async fn claim(
        &self,
        id: &str,
        cleaner_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Booking>> {
        // Single conditional update; the match filter is the whole
        // concurrency story. Many cleaners race, one filter matches once.
        let filter = doc! {
            "_id": ObjectId::parse_str(id)?,
            "cleaner": Bson::Null,
            "status": as_bson(&BookingStatus::Pending)?,
        };
        let update = doc! {
            "$set": {
                "cleaner": cleaner_id,
                "status": as_bson(&BookingStatus::Confirmed)?,
                "accepted_at": as_bson(&at)?,
            }
        };

        let booking = self
            .collection
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await?;
        Ok(booking)
    }

    async fn set_pricing(&self, id: &str, pricing: &Pricing) -> Result<()> {
        let filter = doc! { "_id": ObjectId::parse_str(id)? };
        let update = doc! {
            "$set": {
                "total_price": pricing.total_price,
                "platform_fee": pricing.platform_fee,
                "cleaner_payout": pricing.cleaner_payout,
            }
        };
        let result = self.collection.update_one(filter, update).await?;
        if result.matched_count == 0 {
            return Err(AppError::BookingNotFound);
        }
        Ok(())
    }

    async fn mark_paid(
        &self,
        id: &str,
        gateway_txn_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let filter = doc! {
            "_id": ObjectId::parse_str(id)?,
            "paid": false,
        };
        let update = doc! {
            "$set": {
                "paid": true,
                "paid_at": as_bson(&at)?,
                "payment_status": as_bson(&crate::models::booking::PaymentStatus::Paid)?,
                "transaction_id": gateway_txn_id,
            }
        };
        let result = self.collection.update_one(filter, update).await?;
        Ok(result.modified_count == 1)
    }

    async fn set_payout_status(
        &self,
        id: &str,
        status: PayoutStatus,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let filter = doc! { "_id": ObjectId::parse_str(id)? };
        let mut fields = doc! { "payout_status": as_bson(&status)? };
        if let Some(at) = processed_at {
            fields.insert("payout_processed_at", as_bson(&at)?);
        }
        self.collection
            .update_one(filter, doc! { "$set": fields })
            .await?;
        Ok(())
    }

    async fn start_service(&self, id: &str, cleaner_id: &str) -> Result<Option<Booking>> {
        let filter = doc! {
            "_id": ObjectId::parse_str(id)?,
            "cleaner": cleaner_id,
            "status": as_bson(&BookingStatus::Confirmed)?,
        };
        let update = doc! {
            "$set": { "status": as_bson(&BookingStatus::InProgress)? }
        };
        let booking = self
            .collection
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await?;
        Ok(booking)
    }

    async fn complete_service(
        &self,
        id: &str,
        cleaner_id: &str,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Option<Booking>> {
        let filter = doc! {
            "_id": ObjectId::parse_str(id)?,
            "cleaner": cleaner_id,
            "status": as_bson(&BookingStatus::InProgress)?,
        };
        let mut fields = doc! {
            "status": as_bson(&BookingStatus::Completed)?,
            "completed_at": as_bson(&at)?,
        };
        if let Some(notes) = notes {
            fields.insert("completion_notes", notes);
        }
        let booking = self
            .collection
            .find_one_and_update(filter, doc! { "$set": fields })
            .return_document(ReturnDocument::After)
            .await?;
        Ok(booking)
    }

    async fn set_rating(&self, id: &str, rating: i32, review: Option<String>) -> Result<bool> {
        let filter = doc! {
            "_id": ObjectId::parse_str(id)?,
            "status": as_bson(&BookingStatus::Completed)?,
            "rating": Bson::Null,
        };
        let mut fields = doc! { "rating": rating };
        if let Some(review) = review {
            fields.insert("review", review);
        }
        let result = self
            .collection
            .update_one(filter, doc! { "$set": fields })
            .await?;
        Ok(result.modified_count == 1)
    }
}

#[derive(Clone)]
pub struct MongoTransactionStore {
    collection: Collection<Transaction>,
}

impl MongoTransactionStore {
    pub fn new(db: &Database) -> Self {
        MongoTransactionStore {
            collection: db.collection(TRANSACTIONS_COLLECTION),
        }
    }
}

#[async_trait]
impl TransactionStore for MongoTransactionStore {
    async fn insert(&self, txn: Transaction) -> Result<Transaction> {
        // The unique partial index on {transaction_id, type} turns a
        // duplicate payment delivery into a DuplicateKey here.
        match self.collection.insert_one(&txn).await {
            Ok(_) => Ok(txn),
            Err(e) if is_duplicate_key(&e) => Err(AppError::DuplicateKey),
            Err(e) => Err(e.into()),
        }
    }

    async fn payment_exists(&self, gateway_txn_id: &str) -> Result<bool> {
        let filter = doc! {
            "transaction_id": gateway_txn_id,
            "type": as_bson(&TransactionType::Payment)?,
        };
        Ok(self.collection.find_one(filter).await?.is_some())
    }

    async fn finalize(
        &self,
        id: &ObjectId,
        status: TransactionStatus,
        gateway_txn_id: Option<&str>,
        metadata: Option<serde_json::Value>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut fields = doc! {
            "status": as_bson(&status)?,
            "processed_at": as_bson(&at)?,
        };
        if let Some(txn_id) = gateway_txn_id {
            fields.insert("transaction_id", txn_id);
        }
        if let Some(metadata) = metadata {
            fields.insert("metadata", as_bson(&metadata)?);
        }
        self.collection
            .update_one(doc! { "_id": id }, doc! { "$set": fields })
            .await?;
        Ok(())
    }

    async fn list_for_booking(&self, booking_id: &str) -> Result<Vec<Transaction>> {
        let cursor = self
            .collection
            .find(doc! { "booking_id": booking_id })
            .await?;
        let mut txns: Vec<Transaction> = cursor.try_collect().await?;
        txns.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(txns)
    }
}

#[derive(Clone)]
pub struct MongoCleanerProfileStore {
    collection: Collection<CleanerProfile>,
}

impl MongoCleanerProfileStore {
    pub fn new(db: &Database) -> Self {
        MongoCleanerProfileStore {
            collection: db.collection(CLEANER_PROFILES_COLLECTION),
        }
    }
}

#[async_trait]
impl CleanerProfileStore for MongoCleanerProfileStore {
    async fn find_by_user(&self, user_id: &str) -> Result<Option<CleanerProfile>> {
        Ok(self.collection.find_one(doc! { "user_id": user_id }).await?)
    }

    async fn upsert(&self, profile: CleanerProfile) -> Result<()> {
        let filter = doc! { "user_id": &profile.user_id };
        let existing = self.collection.find_one(filter.clone()).await?;
        if existing.is_some() {
            let update = doc! {
                "$set": {
                    "mpesa_phone_number": as_bson(&profile.mpesa_phone_number)?,
                    "approval_status": as_bson(&profile.approval_status)?,
                    // updated_at is stored as a BSON date, not a string.
                    "updated_at": Bson::DateTime(bson::DateTime::from_chrono(Utc::now())),
                }
            };
            self.collection.update_one(filter, update).await?;
        } else {
            self.collection.insert_one(&profile).await?;
        }
        Ok(())
    }

    async fn apply_rating(&self, user_id: &str, rating: i32) -> Result<()> {
        let Some(profile) = self.find_by_user(user_id).await? else {
            return Ok(());
        };
        let updated = profile.with_rating(rating);
        let update = doc! {
            "$set": {
                "rating": updated.rating,
                "rating_count": updated.rating_count,
                "updated_at": Bson::DateTime(bson::DateTime::from_chrono(updated.updated_at)),
            }
        };
        self.collection
            .update_one(doc! { "user_id": user_id }, update)
            .await?;
        Ok(())
    }
}
