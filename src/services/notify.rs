// services/notify.rs
//
// Outbound notification port. Delivery mechanics (push, SSE, polling table)
// live behind this trait; the core only ever fires and forgets.
use async_trait::async_trait;
use chrono::Utc;
use mongodb::bson::{doc, Document};
use mongodb::{Collection, Database};

pub const EVENT_BOOKING_ACCEPTED: &str = "booking_accepted";
pub const EVENT_BOOKING_COMPLETED: &str = "booking_completed";
pub const EVENT_PAYMENT_COMPLETED: &str = "payment_completed";
pub const EVENT_PAYOUT_PROCESSED: &str = "payout_processed";

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user_id: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<()>;
}

/// Records notifications to the `notifications` collection and logs them.
/// Downstream delivery (app push, SSE) reads from that collection.
pub struct MongoNotifier {
    collection: Collection<Document>,
}

impl MongoNotifier {
    pub fn new(db: &Database) -> Self {
        MongoNotifier {
            collection: db.collection("notifications"),
        }
    }
}

#[async_trait]
impl Notifier for MongoNotifier {
    async fn notify(
        &self,
        user_id: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<()> {
        tracing::info!(user_id, event, "dispatching notification");
        let document = doc! {
            "user_id": user_id,
            "event": event,
            "payload": mongodb::bson::to_bson(&payload)?,
            "read": false,
            "created_at": Utc::now().to_rfc3339(),
        };
        self.collection.insert_one(document).await?;
        Ok(())
    }
}

/// Log-only notifier for deployments without a notification pipeline.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        user_id: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<()> {
        tracing::info!(user_id, event, %payload, "notification");
        Ok(())
    }
}
