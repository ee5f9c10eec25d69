// config.rs
use std::env;

use crate::errors::{AppError, Result};

/// Server-level configuration. Gateway credentials live in [`MpesaConfig`]
/// so a deployment without them can still serve bookings (payment initiation
/// then answers 503).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub webhook_secret: Option<String>,
    pub port: u16,
    pub host: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(AppConfig {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| AppError::configuration("DATABASE_URL must be set"))?,
            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| AppError::configuration("JWT_SECRET must be set"))?,
            // No secret means every settlement callback is refused. There is
            // no unsigned dev-mode bypass.
            webhook_secret: env::var("WEBHOOK_SECRET").ok(),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| AppError::configuration("PORT must be a number"))?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub short_code: String,
    pub passkey: String,
    pub callback_url: String,
    pub initiator_name: String,
    pub security_credential: String,
    pub b2c_result_url: String,
    pub b2c_queue_timeout_url: String,
    pub environment: String,
}

impl MpesaConfig {
    pub fn from_env() -> Result<Self> {
        let environment =
            env::var("MPESA_ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string());

        Ok(MpesaConfig {
            consumer_key: require("MPESA_CONSUMER_KEY")?,
            consumer_secret: require("MPESA_CONSUMER_SECRET")?,
            short_code: require("MPESA_SHORT_CODE")?,
            passkey: require("MPESA_PASSKEY")?,
            callback_url: require("MPESA_CALLBACK_URL")?,
            initiator_name: require("MPESA_INITIATOR_NAME")?,
            security_credential: require("MPESA_SECURITY_CREDENTIAL")?,
            b2c_result_url: require("MPESA_B2C_RESULT_URL")?,
            b2c_queue_timeout_url: require("MPESA_B2C_QUEUE_TIMEOUT_URL")?,
            environment,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// (auth_url, stk_url, b2c_url) for the configured Daraja environment.
    pub fn get_mpesa_urls(&self) -> (String, String, String) {
        let base_url = if self.is_production() {
            "https://api.safaricom.co.ke"
        } else {
            "https://sandbox.safaricom.co.ke"
        };

        let auth_url = format!("{}/oauth/v1/generate?grant_type=client_credentials", base_url);
        let stk_url = format!("{}/mpesa/stkpush/v1/processrequest", base_url);
        let b2c_url = format!("{}/mpesa/b2c/v1/paymentrequest", base_url);

        (auth_url, stk_url, b2c_url)
    }
}

fn require(key: &str) -> Result<String> {
    env::var(key).map_err(|_| AppError::configuration(format!("{} must be set", key)))
}
