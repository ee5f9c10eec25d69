pub mod booking;
pub mod cleaner_profile;
pub mod transaction;
pub mod user;
