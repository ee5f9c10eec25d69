use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::handlers::bookings;
use crate::middleware::auth::auth_middleware;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", post(bookings::create_booking).get(bookings::list_bookings))
        .route("/:id", get(bookings::get_booking))
        .route("/:id/accept", post(bookings::accept_booking))
        .route("/:id/start", post(bookings::start_booking))
        .route("/:id/complete", post(bookings::complete_booking))
        .route("/:id/rate", post(bookings::rate_booking))
        .layer(middleware::from_fn_with_state(state, auth_middleware))
}
