// models/user.rs
use serde::{Deserialize, Serialize};

pub const ROLE_CLIENT: &str = "client";
pub const ROLE_CLEANER: &str = "cleaner";

/// JWT claims carried through request extensions by the auth middleware.
/// Session issuance lives outside this service.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}
