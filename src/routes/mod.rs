pub(crate) mod bookings;
pub(crate) mod payments;
