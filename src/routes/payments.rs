use axum::{
    extract::State,
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use crate::handlers::payments;
use crate::middleware::auth::auth_middleware;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    let authenticated = Router::new()
        .route("/:id/initiate", post(payments::initiate_payment))
        .route("/:id/status", get(payments::payment_status))
        .route("/:id/transactions", get(payments::list_transactions))
        .layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new()
        .route("/health", get(payments_health))
        // Authenticated by HMAC signature, not by session.
        .route("/callback", post(payments::settlement_callback))
        .merge(authenticated)
}

async fn payments_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "payments",
        "timestamp": Utc::now().to_rfc3339(),
        "stk_push": state.gateway.is_some(),
        "payout": state.gateway.is_some(),
        "settlement_callback": state.webhook_secret.is_some(),
    }))
}
