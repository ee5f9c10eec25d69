// services/pricing.rs
//
// Pure split computation. Recomputed at initiation AND settlement; client
// input is never trusted for the split.
use serde::Serialize;

/// Platform share of the total, in percent. Single authoritative constant:
/// 60% platform / 40% cleaner.
pub const PLATFORM_FEE_PERCENT: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pricing {
    pub total_price: i64,
    pub platform_fee: i64,
    pub cleaner_payout: i64,
}

/// Computes the total and the platform/cleaner split from the stored base
/// price, in whole KES. The platform fee is rounded half-up; the cleaner
/// payout absorbs the remainder so `platform_fee + cleaner_payout` is always
/// exactly `total_price`.
pub fn compute_pricing(price: i64) -> Pricing {
    let total_price = price;
    let platform_fee = (total_price * PLATFORM_FEE_PERCENT + 50) / 100;
    let cleaner_payout = total_price - platform_fee;
    Pricing {
        total_price,
        platform_fee,
        cleaner_payout,
    }
}
