// handlers/bookings.rs
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use validator::Validate;

use crate::{
    errors::{AppError, Result},
    models::booking::{
        Booking, BookingResponse, BookingStatus, CompleteBookingRequest, CreateBookingRequest,
        RateBookingRequest,
    },
    models::user::{Claims, ROLE_CLEANER, ROLE_CLIENT},
    services::acceptance,
    services::notify::EVENT_BOOKING_COMPLETED,
    state::AppState,
};

pub async fn create_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingResponse>)> {
    if claims.role != ROLE_CLIENT {
        return Err(AppError::Unauthorized);
    }
    payload.validate()?;

    let booking = Booking::new(
        claims.sub,
        payload.service,
        payload.price,
        payload.location,
        payload.scheduled_at,
    );
    let booking = state.bookings.insert(booking).await?;

    info!(booking_id = %booking.id_hex(), "booking created");
    Ok((StatusCode::CREATED, Json(BookingResponse::from(booking))))
}

pub async fn get_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<BookingResponse>> {
    let booking = state
        .bookings
        .find_by_id(&id)
        .await?
        .ok_or(AppError::BookingNotFound)?;

    if !booking.involves(&claims.sub) {
        return Err(AppError::Unauthorized);
    }

    Ok(Json(BookingResponse::from(booking)))
}

pub async fn list_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<BookingResponse>>> {
    let bookings = state.bookings.find_for_user(&claims.sub).await?;
    Ok(Json(
        bookings.into_iter().map(BookingResponse::from).collect(),
    ))
}

pub async fn accept_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<BookingResponse>> {
    if claims.role != ROLE_CLEANER {
        return Err(AppError::Unauthorized);
    }

    let booking = acceptance::accept_booking(&state, &id, &claims.sub).await?;
    Ok(Json(BookingResponse::from(booking)))
}

pub async fn start_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<BookingResponse>> {
    let Some(booking) = state.bookings.start_service(&id, &claims.sub).await? else {
        return Err(start_complete_miss(&state, &id, &claims.sub, BookingStatus::Confirmed).await?);
    };
    Ok(Json(BookingResponse::from(booking)))
}

pub async fn complete_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(payload): Json<CompleteBookingRequest>,
) -> Result<Json<BookingResponse>> {
    let notes = payload.completion_notes.map(|n| sanitize_text(&n));
    let Some(booking) = state
        .bookings
        .complete_service(&id, &claims.sub, notes, Utc::now())
        .await?
    else {
        return Err(
            start_complete_miss(&state, &id, &claims.sub, BookingStatus::InProgress).await?,
        );
    };

    if let Err(e) = state
        .notifier
        .notify(
            &booking.client,
            EVENT_BOOKING_COMPLETED,
            json!({ "booking_id": booking.id_hex() }),
        )
        .await
    {
        warn!(error = %e, "failed to notify client of completion");
    }

    Ok(Json(BookingResponse::from(booking)))
}

pub async fn rate_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(payload): Json<RateBookingRequest>,
) -> Result<Json<serde_json::Value>> {
    payload.validate()?;

    let booking = state
        .bookings
        .find_by_id(&id)
        .await?
        .ok_or(AppError::BookingNotFound)?;

    if booking.client != claims.sub {
        return Err(AppError::Unauthorized);
    }
    if booking.status != BookingStatus::Completed {
        return Err(AppError::invalid_data(
            "only completed bookings can be rated",
        ));
    }

    let review = payload.review.map(|r| sanitize_text(&r));
    if !state
        .bookings
        .set_rating(&id, payload.rating, review)
        .await?
    {
        return Err(AppError::invalid_data("booking has already been rated"));
    }

    if let Some(cleaner) = booking.cleaner.as_deref() {
        state
            .cleaner_profiles
            .apply_rating(cleaner, payload.rating)
            .await?;
    }

    Ok(Json(json!({
        "success": true,
        "message": "Rating recorded",
    })))
}

/// Disambiguates a missed conditional start/complete update.
async fn start_complete_miss(
    state: &AppState,
    id: &str,
    cleaner_id: &str,
    wanted: BookingStatus,
) -> Result<AppError> {
    Ok(match state.bookings.find_by_id(id).await? {
        None => AppError::BookingNotFound,
        Some(existing) if existing.cleaner.as_deref() != Some(cleaner_id) => {
            AppError::Unauthorized
        }
        Some(existing) => AppError::invalid_data(format!(
            "booking is {:?}, expected {:?}",
            existing.status, wanted
        )),
    })
}

/// Strips markup-significant and control characters from free-text input.
fn sanitize_text(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() && *c != '<' && *c != '>')
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_markup_and_control_chars() {
        assert_eq!(
            sanitize_text("great <script>alert(1)</script>\u{0007} job "),
            "great scriptalert(1)/script job"
        );
    }
}
