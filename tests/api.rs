// End-to-end tests against the full router: in-memory stores, a stub
// payment gateway, and real JWT auth + HMAC webhook signatures.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;

use safisha_api::errors::Result;
use safisha_api::models::user::Claims;
use safisha_api::repository::CleanerProfileStore;
use safisha_api::repository::memory::{
    InMemoryBookingStore, InMemoryCleanerProfileStore, InMemoryTransactionStore,
};
use safisha_api::services::mpesa::{ChargeReceipt, PaymentGateway, TransferReceipt};
use safisha_api::services::notify::LogNotifier;
use safisha_api::services::settlement::{sign_body, SIGNATURE_HEADER};
use safisha_api::state::AppState;

const JWT_SECRET: &str = "test-jwt-secret";
const WEBHOOK_SECRET: &str = "test-webhook-secret";

struct StubGateway {
    charges: AtomicUsize,
    transfers: AtomicUsize,
}

impl StubGateway {
    fn new() -> Self {
        StubGateway {
            charges: AtomicUsize::new(0),
            transfers: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn request_charge(
        &self,
        _amount: i64,
        _payer_phone: &str,
        _reference: &str,
        _description: &str,
    ) -> Result<ChargeReceipt> {
        self.charges.fetch_add(1, Ordering::SeqCst);
        Ok(ChargeReceipt {
            checkout_request_id: "ws_CO_test".to_string(),
            merchant_request_id: "mr-test".to_string(),
            customer_message: "Success. Request accepted for processing".to_string(),
        })
    }

    async fn transfer(
        &self,
        _amount: i64,
        _account: &str,
        _narrative: &str,
    ) -> Result<TransferReceipt> {
        self.transfers.fetch_add(1, Ordering::SeqCst);
        Ok(TransferReceipt {
            transaction_id: "AG_test".to_string(),
        })
    }
}

struct TestApp {
    router: Router,
    transactions: Arc<InMemoryTransactionStore>,
    gateway: Arc<StubGateway>,
    cleaner_profiles: Arc<InMemoryCleanerProfileStore>,
}

fn test_app_with(webhook_secret: Option<&str>, attach_gateway: bool) -> TestApp {
    let transactions = Arc::new(InMemoryTransactionStore::new());
    let cleaner_profiles = Arc::new(InMemoryCleanerProfileStore::new());
    let gateway = Arc::new(StubGateway::new());

    let mut state = AppState::new(
        Arc::new(InMemoryBookingStore::new()),
        transactions.clone(),
        cleaner_profiles.clone(),
        Arc::new(LogNotifier),
        webhook_secret.map(str::to_string),
        JWT_SECRET.to_string(),
    );
    if attach_gateway {
        state = state.with_gateway(gateway.clone());
    }

    TestApp {
        router: safisha_api::build_router(state),
        transactions,
        gateway,
        cleaner_profiles,
    }
}

fn test_app() -> TestApp {
    test_app_with(Some(WEBHOOK_SECRET), true)
}

fn token(sub: &str, role: &str) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        role: role.to_string(),
        exp: (Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

fn authed(method: Method, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json");
    match body {
        Some(value) => builder.body(Body::from(value.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn booking_payload(price: i64) -> Value {
    json!({
        "service_category": "home-cleaning",
        "cleaning_category": "deep-cleaning",
        "price": price,
        "location": "Kilimani, Nairobi"
    })
}

async fn create_booking(app: &TestApp, client: &str, price: i64) -> String {
    let response = app
        .router
        .clone()
        .oneshot(authed(
            Method::POST,
            "/api/bookings",
            &token(client, "client"),
            Some(booking_payload(price)),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    body["id"].as_str().unwrap().to_string()
}

async fn accept_booking(app: &TestApp, booking_id: &str, cleaner: &str) -> StatusCode {
    app.router
        .clone()
        .oneshot(authed(
            Method::POST,
            &format!("/api/bookings/{}/accept", booking_id),
            &token(cleaner, "cleaner"),
            None,
        ))
        .await
        .unwrap()
        .status()
}

fn settlement_request(body: Value, secret: &str) -> Request<Body> {
    let raw = body.to_string();
    let signature = sign_body(secret, raw.as_bytes());
    Request::builder()
        .method(Method::POST)
        .uri("/api/payments/callback")
        .header(header::CONTENT_TYPE, "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(raw))
        .unwrap()
}

fn settlement_body(booking_id: &str, amount: i64, txn: &str) -> Value {
    json!({
        "status": "COMPLETE",
        "id": txn,
        "amount": amount,
        "metadata": { "booking_id": booking_id }
    })
}

#[tokio::test]
async fn health_endpoint_is_open() {
    let app = test_app();
    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["mpesa"], true);
}

#[tokio::test]
async fn payments_health_reflects_configuration() {
    let configured = test_app();
    let response = configured
        .router
        .oneshot(
            Request::builder()
                .uri("/api/payments/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["stk_push"], true);
    assert_eq!(body["settlement_callback"], true);

    let bare = test_app_with(None, false);
    let response = bare
        .router
        .oneshot(
            Request::builder()
                .uri("/api/payments/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["stk_push"], false);
    assert_eq!(body["settlement_callback"], false);
}

#[tokio::test]
async fn bookings_require_a_token() {
    let app = test_app();
    let response = app
        .router
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/bookings")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(booking_payload(5_000).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cleaner_cannot_create_booking() {
    let app = test_app();
    let response = app
        .router
        .oneshot(authed(
            Method::POST,
            "/api/bookings",
            &token("cleaner-1", "cleaner"),
            Some(booking_payload(5_000)),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn booking_is_hidden_from_uninvolved_users() {
    let app = test_app();
    let id = create_booking(&app, "client-1", 5_000).await;

    let response = app
        .router
        .clone()
        .oneshot(authed(
            Method::GET,
            &format!("/api/bookings/{}", id),
            &token("client-2", "client"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn concurrent_accepts_have_exactly_one_winner() {
    let app = test_app();
    let id = create_booking(&app, "client-1", 5_000).await;

    let (a, b) = tokio::join!(
        accept_booking(&app, &id, "cleaner-1"),
        accept_booking(&app, &id, "cleaner-2"),
    );

    let statuses = [a, b];
    assert_eq!(
        statuses.iter().filter(|s| **s == StatusCode::OK).count(),
        1,
        "exactly one accept must win: {:?}",
        statuses
    );
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == StatusCode::CONFLICT)
            .count(),
        1
    );
}

#[tokio::test]
async fn accepting_missing_booking_is_404() {
    let app = test_app();
    let status = accept_booking(&app, "000000000000000000000000", "cleaner-1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn full_lifecycle_settles_and_pays_out() {
    let app = test_app();
    app.cleaner_profiles
        .upsert(safisha_api::models::cleaner_profile::CleanerProfile::new(
            "cleaner-1".to_string(),
            Some("254712345678".to_string()),
        ))
        .await
        .unwrap();

    let id = create_booking(&app, "client-1", 10_000).await;
    assert_eq!(accept_booking(&app, &id, "cleaner-1").await, StatusCode::OK);

    // Client kicks off the STK push.
    let response = app
        .router
        .clone()
        .oneshot(authed(
            Method::POST,
            &format!("/api/payments/{}/initiate", id),
            &token("client-1", "client"),
            Some(json!({ "phone_number": "0712345678" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["checkout_request_id"], "ws_CO_test");
    assert_eq!(app.gateway.charges.load(Ordering::SeqCst), 1);

    // Gateway confirms via signed webhook.
    let response = app
        .router
        .clone()
        .oneshot(settlement_request(
            settlement_body(&id, 10_000, "MPESA-E2E"),
            WEBHOOK_SECRET,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let ack = body_json(response).await;
    assert_eq!(ack["ResultCode"], 0);

    // Status endpoint reflects the settled split.
    let response = app
        .router
        .clone()
        .oneshot(authed(
            Method::GET,
            &format!("/api/payments/{}/status", id),
            &token("client-1", "client"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = body_json(response).await;
    assert_eq!(status["paid"], true);
    assert_eq!(status["total_price"], 10_000);
    assert_eq!(status["transaction_id"], "MPESA-E2E");
    assert_eq!(status["payout_status"], "processed");

    // Ledger carries the payment and the 40% payout row.
    let response = app
        .router
        .clone()
        .oneshot(authed(
            Method::GET,
            &format!("/api/payments/{}/transactions", id),
            &token("cleaner-1", "cleaner"),
            None,
        ))
        .await
        .unwrap();
    let txns = body_json(response).await;
    let txns = txns.as_array().unwrap();
    assert_eq!(txns.len(), 2);
    assert_eq!(txns[0]["type"], "payment");
    assert_eq!(txns[0]["amount"], 10_000);
    assert_eq!(txns[1]["type"], "payout");
    assert_eq!(txns[1]["amount"], 4_000);
    assert_eq!(app.gateway.transfers.load(Ordering::SeqCst), 1);

    // Cleaner runs the job to completion and the client rates it.
    let response = app
        .router
        .clone()
        .oneshot(authed(
            Method::POST,
            &format!("/api/bookings/{}/start", id),
            &token("cleaner-1", "cleaner"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(authed(
            Method::POST,
            &format!("/api/bookings/{}/complete", id),
            &token("cleaner-1", "cleaner"),
            Some(json!({ "completion_notes": "all rooms done" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let completed = body_json(response).await;
    assert_eq!(completed["status"], "completed");

    let response = app
        .router
        .clone()
        .oneshot(authed(
            Method::POST,
            &format!("/api/bookings/{}/rate", id),
            &token("client-1", "client"),
            Some(json!({ "rating": 5, "review": "spotless" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let profile = app
        .cleaner_profiles
        .find_by_user("cleaner-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(profile.rating_count, 1);
    assert!((profile.rating - 5.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn duplicate_webhook_delivery_settles_once() {
    let app = test_app();
    let id = create_booking(&app, "client-1", 10_000).await;
    assert_eq!(accept_booking(&app, &id, "cleaner-1").await, StatusCode::OK);

    for _ in 0..3 {
        let response = app
            .router
            .clone()
            .oneshot(settlement_request(
                settlement_body(&id, 10_000, "MPESA-DUP"),
                WEBHOOK_SECRET,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let payments: Vec<_> = app
        .transactions
        .all()
        .await
        .into_iter()
        .filter(|t| {
            t.kind == safisha_api::models::transaction::TransactionType::Payment
        })
        .collect();
    assert_eq!(payments.len(), 1);
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected() {
    let app = test_app();
    let id = create_booking(&app, "client-1", 10_000).await;

    let raw = settlement_body(&id, 10_000, "MPESA-BAD").to_string();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/payments/callback")
        .header(header::CONTENT_TYPE, "application/json")
        .header(SIGNATURE_HEADER, sign_body("wrong-secret", raw.as_bytes()))
        .body(Body::from(raw))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.transactions.all().await.is_empty());
}

#[tokio::test]
async fn webhook_without_signature_is_rejected() {
    let app = test_app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/payments/callback")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            settlement_body("abc", 10_000, "MPESA-X").to_string(),
        ))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_refused_when_secret_not_configured() {
    let app = test_app_with(None, true);
    let response = app
        .router
        .oneshot(settlement_request(
            settlement_body("abc", 10_000, "MPESA-X"),
            WEBHOOK_SECRET,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn malformed_webhook_body_is_400() {
    let app = test_app();
    let raw = "not json at all";
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/payments/callback")
        .header(header::CONTENT_TYPE, "application/json")
        .header(SIGNATURE_HEADER, sign_body(WEBHOOK_SECRET, raw.as_bytes()))
        .body(Body::from(raw))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn amount_mismatch_is_acked_but_not_settled() {
    let app = test_app();
    let id = create_booking(&app, "client-1", 10_000).await;
    assert_eq!(accept_booking(&app, &id, "cleaner-1").await, StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(settlement_request(
            settlement_body(&id, 4_000, "MPESA-SHORT"),
            WEBHOOK_SECRET,
        ))
        .await
        .unwrap();
    // Acked so the gateway stops redelivering a report we will never accept.
    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.transactions.all().await.is_empty());

    let response = app
        .router
        .clone()
        .oneshot(authed(
            Method::GET,
            &format!("/api/payments/{}/status", id),
            &token("client-1", "client"),
            None,
        ))
        .await
        .unwrap();
    let status = body_json(response).await;
    assert_eq!(status["paid"], false);
}

#[tokio::test]
async fn initiate_requires_the_booking_client() {
    let app = test_app();
    let id = create_booking(&app, "client-1", 10_000).await;
    assert_eq!(accept_booking(&app, &id, "cleaner-1").await, StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(authed(
            Method::POST,
            &format!("/api/payments/{}/initiate", id),
            &token("client-2", "client"),
            Some(json!({ "phone_number": "0712345678" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.gateway.charges.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn initiate_without_gateway_is_503() {
    let app = test_app_with(Some(WEBHOOK_SECRET), false);
    let id = create_booking(&app, "client-1", 10_000).await;
    assert_eq!(accept_booking(&app, &id, "cleaner-1").await, StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(authed(
            Method::POST,
            &format!("/api/payments/{}/initiate", id),
            &token("client-1", "client"),
            Some(json!({ "phone_number": "0712345678" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn pending_booking_cannot_be_paid() {
    let app = test_app();
    let id = create_booking(&app, "client-1", 10_000).await;

    let response = app
        .router
        .clone()
        .oneshot(authed(
            Method::POST,
            &format!("/api/payments/{}/initiate", id),
            &token("client-1", "client"),
            Some(json!({ "phone_number": "0712345678" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.gateway.charges.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rating_is_rejected_before_completion() {
    let app = test_app();
    let id = create_booking(&app, "client-1", 10_000).await;
    assert_eq!(accept_booking(&app, &id, "cleaner-1").await, StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(authed(
            Method::POST,
            &format!("/api/bookings/{}/rate", id),
            &token("client-1", "client"),
            Some(json!({ "rating": 4 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn only_assigned_cleaner_can_start() {
    let app = test_app();
    let id = create_booking(&app, "client-1", 10_000).await;
    assert_eq!(accept_booking(&app, &id, "cleaner-1").await, StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(authed(
            Method::POST,
            &format!("/api/bookings/{}/start", id),
            &token("cleaner-2", "cleaner"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
