// state.rs
use std::sync::Arc;

use crate::repository::{BookingStore, CleanerProfileStore, TransactionStore};
use crate::services::mpesa::PaymentGateway;
use crate::services::notify::Notifier;

#[derive(Clone)]
pub struct AppState {
    pub bookings: Arc<dyn BookingStore>,
    pub transactions: Arc<dyn TransactionStore>,
    pub cleaner_profiles: Arc<dyn CleanerProfileStore>,
    /// None when gateway credentials are not configured; payment initiation
    /// then answers 503.
    pub gateway: Option<Arc<dyn PaymentGateway>>,
    pub notifier: Arc<dyn Notifier>,
    /// None means every settlement callback is refused (fail closed).
    pub webhook_secret: Option<String>,
    pub jwt_secret: String,
}

impl AppState {
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        transactions: Arc<dyn TransactionStore>,
        cleaner_profiles: Arc<dyn CleanerProfileStore>,
        notifier: Arc<dyn Notifier>,
        webhook_secret: Option<String>,
        jwt_secret: String,
    ) -> Self {
        AppState {
            bookings,
            transactions,
            cleaner_profiles,
            gateway: None,
            notifier,
            webhook_secret,
            jwt_secret,
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }
}
