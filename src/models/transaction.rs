// models/transaction.rs
use chrono::{DateTime, Utc};
use mongodb::bson;
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Payment,
    Payout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// One money-movement attempt. Rows are never deleted and never reused: a
/// failed payout gets a fresh row on retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub booking_id: String,
    pub client: String,
    pub cleaner: Option<String>,

    #[serde(rename = "type")]
    pub kind: TransactionType,

    pub amount: i64,
    pub payment_method: String,

    /// External gateway reference. Unique per payment row; this is the
    /// settlement idempotency lock.
    pub transaction_id: Option<String>,
    pub reference: String,

    pub status: TransactionStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn payment(
        booking_id: String,
        client: String,
        cleaner: Option<String>,
        amount: i64,
        gateway_txn_id: String,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Transaction {
            id: Some(ObjectId::new()),
            booking_id: booking_id.clone(),
            client,
            cleaner,
            kind: TransactionType::Payment,
            amount,
            payment_method: "mpesa".to_string(),
            transaction_id: Some(gateway_txn_id),
            reference: booking_id,
            status: TransactionStatus::Completed,
            processed_at: Some(now),
            metadata,
            created_at: now,
        }
    }

    pub fn payout(
        booking_id: String,
        client: String,
        cleaner: String,
        amount: i64,
        status: TransactionStatus,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Transaction {
            id: Some(ObjectId::new()),
            booking_id: booking_id.clone(),
            client,
            cleaner: Some(cleaner),
            kind: TransactionType::Payout,
            amount,
            payment_method: "mpesa".to_string(),
            transaction_id: None,
            reference: booking_id,
            status,
            processed_at: None,
            metadata,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: String,
    pub booking_id: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub amount: i64,
    pub payment_method: String,
    pub transaction_id: Option<String>,
    pub reference: String,
    pub status: TransactionStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Transaction> for TransactionResponse {
    fn from(txn: Transaction) -> Self {
        TransactionResponse {
            id: txn.id.map(|id| id.to_hex()).unwrap_or_default(),
            booking_id: txn.booking_id,
            kind: txn.kind,
            amount: txn.amount,
            payment_method: txn.payment_method,
            transaction_id: txn.transaction_id,
            reference: txn.reference,
            status: txn.status,
            processed_at: txn.processed_at,
            created_at: txn.created_at,
        }
    }
}
