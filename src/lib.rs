pub mod config;
pub mod database;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod routes;
pub mod services;
pub mod state;

use axum::http::Method;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use state::AppState;

pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_check))
        .nest("/api/bookings", routes::bookings::routes(app_state.clone()))
        .nest("/api/payments", routes::payments::routes(app_state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

async fn root_handler() -> &'static str {
    "Safisha marketplace API"
}

async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "mpesa": state.gateway.is_some(),
        "webhook_secured": state.webhook_secret.is_some(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
