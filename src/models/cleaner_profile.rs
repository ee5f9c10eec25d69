// models/cleaner_profile.rs
use chrono::{DateTime, Utc};
use mongodb::bson;
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// One-to-one with a cleaner user. Payout logic reads it; only the rating
/// fold-in writes it from the core paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanerProfile {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub user_id: String,
    pub mpesa_phone_number: Option<String>,
    pub rating: f64,
    pub rating_count: i64,
    pub approval_status: ApprovalStatus,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl CleanerProfile {
    pub fn new(user_id: String, mpesa_phone_number: Option<String>) -> Self {
        let now = Utc::now();
        CleanerProfile {
            id: Some(ObjectId::new()),
            user_id,
            mpesa_phone_number,
            rating: 0.0,
            rating_count: 0,
            approval_status: ApprovalStatus::Approved,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fold a new rating into the running average.
    pub fn with_rating(mut self, rating: i32) -> Self {
        let total = self.rating * self.rating_count as f64 + rating as f64;
        self.rating_count += 1;
        self.rating = total / self.rating_count as f64;
        self.updated_at = Utc::now();
        self
    }
}
