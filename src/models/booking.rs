// models/booking.rs
use chrono::{DateTime, Utc};
use mongodb::bson;
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    Saloon,
    Suv,
    Pickup,
    Van,
    Truck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailingPackage {
    Basic,
    Premium,
    Executive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleaningCategory {
    GeneralCleaning,
    DeepCleaning,
    MoveInMoveOut,
    PostConstruction,
}

/// Discriminated service selection. A car-detailing booking cannot carry
/// home-cleaning fields and vice versa; the wrong combination is
/// unrepresentable and rejected at deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "service_category", rename_all = "kebab-case")]
pub enum ServiceSelection {
    CarDetailing {
        vehicle_type: VehicleType,
        package: DetailingPackage,
    },
    HomeCleaning {
        cleaning_category: CleaningCategory,
    },
}

/// Monotonic lifecycle. `Cancelled` is reserved: it round-trips on the wire
/// but no operation transitions into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Processed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub client: String,
    pub cleaner: Option<String>,

    #[serde(flatten)]
    pub service: ServiceSelection,

    pub location: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,

    // Client-facing base price in whole KES. The split fields are derived
    // and only populated at payment time.
    pub price: i64,
    pub total_price: i64,
    pub platform_fee: i64,
    pub cleaner_payout: i64,

    pub status: BookingStatus,

    pub payment_status: PaymentStatus,
    pub paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub transaction_id: Option<String>,

    pub payout_status: PayoutStatus,
    pub payout_processed_at: Option<DateTime<Utc>>,

    pub rating: Option<i32>,
    pub review: Option<String>,
    pub completion_notes: Option<String>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn new(
        client: String,
        service: ServiceSelection,
        price: i64,
        location: Option<String>,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Self {
        Booking {
            id: Some(ObjectId::new()),
            client,
            cleaner: None,
            service,
            location,
            scheduled_at,
            price,
            total_price: 0,
            platform_fee: 0,
            cleaner_payout: 0,
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            paid: false,
            paid_at: None,
            transaction_id: None,
            payout_status: PayoutStatus::Pending,
            payout_processed_at: None,
            rating: None,
            review: None,
            completion_notes: None,
            created_at: Utc::now(),
            accepted_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    pub fn id_hex(&self) -> String {
        self.id.as_ref().map(|id| id.to_hex()).unwrap_or_default()
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.client == user_id || self.cleaner.as_deref() == Some(user_id)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBookingRequest {
    #[serde(flatten)]
    pub service: ServiceSelection,

    #[validate(range(min = 0, message = "price must not be negative"))]
    pub price: i64,

    pub location: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RateBookingRequest {
    #[validate(range(min = 1, max = 5, message = "rating must be between 1 and 5"))]
    pub rating: i32,

    #[validate(length(max = 500, message = "review must be at most 500 characters"))]
    pub review: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteBookingRequest {
    pub completion_notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub id: String,
    pub client: String,
    pub cleaner: Option<String>,
    #[serde(flatten)]
    pub service: ServiceSelection,
    pub location: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub price: i64,
    pub total_price: i64,
    pub platform_fee: i64,
    pub cleaner_payout: i64,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub transaction_id: Option<String>,
    pub payout_status: PayoutStatus,
    pub payout_processed_at: Option<DateTime<Utc>>,
    pub rating: Option<i32>,
    pub review: Option<String>,
    pub completion_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Booking> for BookingResponse {
    fn from(booking: Booking) -> Self {
        BookingResponse {
            id: booking.id_hex(),
            client: booking.client,
            cleaner: booking.cleaner,
            service: booking.service,
            location: booking.location,
            scheduled_at: booking.scheduled_at,
            price: booking.price,
            total_price: booking.total_price,
            platform_fee: booking.platform_fee,
            cleaner_payout: booking.cleaner_payout,
            status: booking.status,
            payment_status: booking.payment_status,
            paid: booking.paid,
            paid_at: booking.paid_at,
            transaction_id: booking.transaction_id,
            payout_status: booking.payout_status,
            payout_processed_at: booking.payout_processed_at,
            rating: booking.rating,
            review: booking.review,
            completion_notes: booking.completion_notes,
            created_at: booking.created_at,
            accepted_at: booking.accepted_at,
            completed_at: booking.completed_at,
        }
    }
}
