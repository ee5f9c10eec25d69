pub mod acceptance;
pub mod mpesa;
pub mod notify;
pub mod payment;
pub mod payout;
pub mod pricing;
pub mod settlement;
