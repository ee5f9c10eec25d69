// src/errors.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("MongoDB error: {0}")]
    MongoDB(#[from] mongodb::error::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Booking not found")]
    BookingNotFound,

    #[error("Document not found")]
    DocumentNotFound,

    #[error("Invalid ObjectId: {0}")]
    InvalidObjectId(String),

    #[error("Authentication error")]
    AuthError,

    #[error("Unauthorized access")]
    Unauthorized,

    // Expected concurrent outcomes, not system failures. Distinct kinds so
    // callers can tell "someone beat you to it" from a real error.
    #[error("Booking already claimed by another cleaner")]
    AlreadyClaimed,

    #[error("Booking is no longer pending")]
    NoLongerPending,

    #[error("Booking was claimed a moment ago")]
    AcceptConflict,

    #[error("Booking is already paid")]
    AlreadyPaid,

    #[error("Duplicate key error")]
    DuplicateKey,

    #[error("Amount mismatch: expected {expected}, gateway reported {reported}")]
    AmountMismatch { expected: i64, reported: i64 },

    #[error("M-Pesa error: {0}")]
    MpesaError(String),

    #[error("External API error: {0}")]
    ExternalApi(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Service error: {0}")]
    ServiceError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::MongoDB(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string()),
            AppError::ValidationError(_) => (StatusCode::BAD_REQUEST, "Validation failed".to_string()),
            AppError::BookingNotFound => (StatusCode::NOT_FOUND, "Booking not found".to_string()),
            AppError::DocumentNotFound => (StatusCode::NOT_FOUND, "Document not found".to_string()),
            AppError::InvalidObjectId(_) => (StatusCode::BAD_REQUEST, "Invalid ID format".to_string()),
            AppError::AuthError => (StatusCode::UNAUTHORIZED, "Authentication failed".to_string()),
            AppError::Unauthorized => (StatusCode::FORBIDDEN, "Unauthorized access".to_string()),
            AppError::AlreadyClaimed => (StatusCode::CONFLICT, "Already claimed".to_string()),
            AppError::NoLongerPending => (StatusCode::CONFLICT, "No longer pending".to_string()),
            AppError::AcceptConflict => (StatusCode::CONFLICT, "Acceptance conflict".to_string()),
            AppError::AlreadyPaid => (StatusCode::CONFLICT, "Already paid".to_string()),
            AppError::DuplicateKey => (StatusCode::CONFLICT, "Duplicate entry".to_string()),
            AppError::AmountMismatch { .. } => (StatusCode::BAD_REQUEST, "Amount mismatch".to_string()),
            AppError::MpesaError(_) => (StatusCode::BAD_GATEWAY, "M-Pesa error".to_string()),
            AppError::ExternalApi(_) => (StatusCode::BAD_GATEWAY, "External API error".to_string()),
            AppError::ConfigurationError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Configuration error".to_string()),
            AppError::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "Service unavailable".to_string()),
            AppError::ServiceError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Service error".to_string()),
        };

        let body = Json(json!({
            "error": error_message,
            "message": self.to_string(),
            "success": false,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

// Manual From implementations
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ValidationError(format!("JSON parsing error: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::ExternalApi(format!("HTTP request failed: {}", err))
    }
}

impl From<mongodb::bson::oid::Error> for AppError {
    fn from(err: mongodb::bson::oid::Error) -> Self {
        AppError::InvalidObjectId(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

// Helper conversion functions
impl AppError {
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        AppError::ValidationError(msg.into())
    }

    pub fn mpesa(msg: impl Into<String>) -> Self {
        AppError::MpesaError(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        AppError::ConfigurationError(msg.into())
    }

    pub fn service(msg: impl Into<String>) -> Self {
        AppError::ServiceError(msg.into())
    }
}

/// True when a MongoDB write failed against a unique index (code 11000).
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_err)) if write_err.code == 11000
    )
}

pub type Result<T> = std::result::Result<T, AppError>;
