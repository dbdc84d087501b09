//! HTTP tests against in-memory stores, driven with `tower::ServiceExt::oneshot`.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use boxoffice_core::environment::Clock;
use boxoffice_core::{EventId, InventoryCounts, InventoryLedger, PoolKey, TicketType};
use boxoffice_runtime::{PaymentCoordinator, ReservationConfig, ReservationCoordinator, RetryPolicy};
use boxoffice_testing::{
    FlakyHoldStore, HoldOp, InMemoryHoldStore, InMemoryLedger, InMemoryPaymentIntentStore,
    InMemoryReservationRepository, ManualClock, MockPaymentProvider, test_clock,
};
use boxoffice_web::{AppState, CORRELATION_ID_HEADER, build_router};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    ledger: InMemoryLedger,
    hold_store: FlakyHoldStore<InMemoryHoldStore>,
    provider: MockPaymentProvider,
    clock: Arc<ManualClock>,
    event_id: EventId,
}

async fn app(total: u32) -> TestApp {
    let hold_store = FlakyHoldStore::new(InMemoryHoldStore::new());
    let ledger = InMemoryLedger::new();
    let provider = MockPaymentProvider::new();
    let clock = Arc::new(ManualClock::starting_at(test_clock().now()));
    let no_retries = RetryPolicy::none();

    let reservations = ReservationCoordinator::new(
        Arc::new(hold_store.clone()),
        Arc::new(ledger.clone()),
        Arc::new(InMemoryReservationRepository::new()),
        clock.clone(),
        ReservationConfig::default(),
    )
    .with_compensation_policy(no_retries.clone());
    let payments = PaymentCoordinator::new(
        Arc::new(InMemoryPaymentIntentStore::new()),
        Arc::new(provider.clone()),
        reservations.clone(),
        clock.clone(),
    )
    .with_submit_policy(no_retries);

    let event_id = EventId::new();
    let pool = PoolKey::new(event_id, TicketType::parse("regular").unwrap());
    reservations.provision(&pool, total).await.unwrap();

    TestApp {
        router: build_router(AppState::new(reservations, payments)),
        ledger,
        hold_store,
        provider,
        clock,
        event_id,
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        read(self.send(request).await).await
    }

    async fn pay(&self, key: &str, token: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/payments")
            .header(header::CONTENT_TYPE, "application/json")
            .header("Idempotency-Key", key)
            .body(Body::from(
                json!({
                    "reservation_token": token,
                    "amount": 9000,
                    "payment_method": {"type": "credit_card", "token": "tok_visa", "last_four": "4242"},
                    "customer_email": "ada@example.com",
                })
                .to_string(),
            ))
            .unwrap();
        read(self.send(request).await).await
    }

    async fn reserve(&self, session: &str, quantity: u32) -> (StatusCode, Value) {
        self.call(
            "POST",
            "/reservations",
            Some(json!({
                "event_id": self.event_id,
                "ticket_type": "regular",
                "quantity": quantity,
                "session_id": session,
            })),
        )
        .await
    }

    /// Ledger counts, read directly rather than over HTTP.
    async fn counts(&self) -> InventoryCounts {
        let pool = PoolKey::new(self.event_id, TicketType::parse("regular").unwrap());
        self.ledger.counts(&pool).await.unwrap().unwrap()
    }
}

async fn read(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

fn token_of(body: &Value) -> String {
    body["reservation_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_reserve_pay_and_callback_sells_the_units() {
    let app = app(5).await;

    let (status, body) = app.reserve("sess-1", 2).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "active");
    let token = token_of(&body);

    let (status, payment) = app.pay("key-1", &token).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(payment["status"], "pending");
    let reference = payment["provider_reference"].as_str().unwrap().to_string();

    let (status, ack) = app
        .call(
            "POST",
            "/payments/callback",
            Some(json!({"provider_reference": reference, "outcome": "success"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["result"], "applied");

    let (_, view) = app.call("GET", &format!("/reservations/{token}"), None).await;
    assert_eq!(view["status"], "confirmed");
    assert_eq!(app.counts().await, InventoryCounts { total: 5, sold: 2, reserved: 0 });

    let (status, ack) = app
        .call(
            "POST",
            "/payments/callback",
            Some(json!({"provider_reference": reference, "outcome": "success"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["result"], "duplicate");
    assert_eq!(app.counts().await.sold, 2);
}

#[tokio::test]
async fn test_sold_out_is_a_conflict_with_availability() {
    let app = app(3).await;
    assert_eq!(app.reserve("a", 2).await.0, StatusCode::CREATED);

    let (status, body) = app.reserve("b", 2).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body, json!({"reason": "sold_out", "available": 1}));
}

#[tokio::test]
async fn test_invalid_reserve_requests_are_rejected() {
    let app = app(3).await;
    assert_eq!(app.reserve("zero", 0).await.0, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(app.reserve("many", 11).await.0, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = app
        .call(
            "POST",
            "/reservations",
            Some(json!({
                "event_id": app.event_id,
                "ticket_type": "no spaces",
                "quantity": 1,
                "session_id": "s",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_session_replay_returns_the_same_token() {
    let app = app(5).await;
    let (_, first) = app.reserve("sess-r", 1).await;
    let (status, second) = app.reserve("sess-r", 1).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(token_of(&first), token_of(&second));

    let (status, body) = app.reserve("sess-r", 2).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SESSION_CONFLICT");
}

#[tokio::test]
async fn test_cancel_is_idempotent_and_refuses_confirmed() {
    let app = app(5).await;
    let (_, body) = app.reserve("sess-c", 2).await;
    let token = token_of(&body);
    let uri = format!("/reservations/{token}");

    assert_eq!(app.call("DELETE", &uri, None).await.0, StatusCode::NO_CONTENT);
    assert_eq!(app.call("DELETE", &uri, None).await.0, StatusCode::NO_CONTENT);
    assert_eq!(app.counts().await.reserved, 0);

    let (_, body) = app.reserve("sess-d", 1).await;
    let token = token_of(&body);
    let (_, payment) = app.pay("key-d", &token).await;
    app.call(
        "POST",
        "/payments/callback",
        Some(json!({"provider_reference": payment["provider_reference"], "outcome": "success"})),
    )
    .await;

    let (status, body) = app.call("DELETE", &format!("/reservations/{token}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ALREADY_CONFIRMED");

    let unknown = uuid::Uuid::new_v4();
    let (status, _) = app.call("DELETE", &format!("/reservations/{unknown}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_repeated_idempotency_key_returns_the_same_payment() {
    let app = app(5).await;
    let (_, body) = app.reserve("sess-p", 1).await;
    let token = token_of(&body);

    let (first_status, first) = app.pay("key-p", &token).await;
    let (second_status, second) = app.pay("key-p", &token).await;
    assert_eq!(first_status, StatusCode::CREATED);
    assert_eq!(second_status, StatusCode::CREATED);
    assert_eq!(first["payment_id"], second["payment_id"]);
    assert_eq!(app.provider.submission_count(), 1);

    let (status, view) = app
        .call("GET", &format!("/payments/{}", first["payment_id"].as_str().unwrap()), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["payment_method"], "card ending 4242");

    let (status, body) = app.pay("key-other", &token).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "PAYMENT_IN_PROGRESS");
}

#[tokio::test]
async fn test_payment_requires_idempotency_key() {
    let app = app(5).await;
    let request = Request::builder()
        .method("POST")
        .uri("/payments")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, body) = read(app.send(request).await).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_failed_payment_releases_the_units() {
    let app = app(2).await;
    let (_, body) = app.reserve("sess-f", 2).await;
    let token = token_of(&body);
    let (_, payment) = app.pay("key-f", &token).await;

    let (status, ack) = app
        .call(
            "POST",
            "/payments/callback",
            Some(json!({"provider_reference": payment["provider_reference"], "outcome": "failure"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "failed");
    assert_eq!(app.counts().await.reserved, 0);
    assert_eq!(app.reserve("sess-g", 2).await.0, StatusCode::CREATED);
}

#[tokio::test]
async fn test_declined_payment_fails_at_once_and_releases_the_units() {
    let app = app(2).await;
    let (_, body) = app.reserve("sess-d", 2).await;
    let token = token_of(&body);
    app.provider.set_declining(true);

    let (status, payment) = app.pay("key-d", &token).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(payment["status"], "failed");
    assert_eq!(app.counts().await.reserved, 0);
    assert_eq!(app.reserve("sess-e", 2).await.0, StatusCode::CREATED);
}

#[tokio::test]
async fn test_unknown_pool_is_not_found() {
    let app = app(2).await;
    let (status, body) = app
        .call(
            "POST",
            "/reservations",
            Some(json!({
                "event_id": EventId::new(),
                "ticket_type": "regular",
                "quantity": 1,
                "session_id": "sess-nowhere",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "POOL_NOT_FOUND");
}

#[tokio::test]
async fn test_halted_event_stays_unavailable_after_reconcile() {
    let app = app(4).await;
    app.ledger.halt(&app.event_id, "manual check").await.unwrap();

    let (status, body) = app.reserve("sess-h1", 1).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "EVENT_HALTED");

    // Reprovisioning closes the pool in the hold store.
    let uri = format!("/inventory/{}/regular", app.event_id);
    assert_eq!(app.call("PUT", &uri, Some(json!({"total": 4}))).await.0, StatusCode::OK);

    let (status, body) = app.reserve("sess-h2", 1).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "EVENT_HALTED");

    let (status, _) = app
        .call("POST", &format!("/inventory/{}/resume", app.event_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.reserve("sess-h3", 1).await.0, StatusCode::CREATED);
}

#[tokio::test]
async fn test_unknown_callback_is_acknowledged() {
    let app = app(1).await;
    let (status, ack) = app
        .call(
            "POST",
            "/payments/callback",
            Some(json!({"provider_reference": "pi_missing", "outcome": "success"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["result"], "unknown");
}

#[tokio::test]
async fn test_late_success_after_expiry_requires_refund() {
    let app = app(2).await;
    let (_, body) = app.reserve("sess-late", 1).await;
    let token = token_of(&body);
    let (_, payment) = app.pay("key-late", &token).await;

    app.clock.advance(chrono::Duration::minutes(11));
    let (status, ack) = app
        .call(
            "POST",
            "/payments/callback",
            Some(json!({"provider_reference": payment["provider_reference"], "outcome": "success"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["result"], "refund_required");
    assert_eq!(ack["reservation_status"], "expired");
    assert_eq!(app.counts().await, InventoryCounts { total: 2, sold: 0, reserved: 0 });
}

#[tokio::test]
async fn test_hold_store_outage_is_service_unavailable() {
    let app = app(2).await;
    app.hold_store.fail(HoldOp::TryReserve);

    let (status, body) = app.reserve("sess-down", 1).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
    assert_eq!(app.counts().await.reserved, 0);
}

#[tokio::test]
async fn test_inventory_operator_surface() {
    let app = app(4).await;
    let uri = format!("/inventory/{}/regular", app.event_id);

    let (status, view) = app.call("GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["available"], 4);

    app.reserve("sess-i", 3).await;
    let (status, body) = app.call("PUT", &uri, Some(json!({"total": 2}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "TOTAL_TOO_SMALL");

    let (status, view) = app.call("PUT", &uri, Some(json!({"total": 10}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["available"], 7);

    let (status, _) = app
        .call("GET", &format!("/inventory/{}/vip", app.event_id), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .call("POST", &format!("/inventory/{}/resume", app.event_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["was_halted"], false);
}

#[tokio::test]
async fn test_health_ready_and_correlation_header() {
    let app = app(1).await;
    let (status, _) = app.call("GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);

    let response = app
        .send(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await;
    assert!(response.headers().contains_key(CORRELATION_ID_HEADER));
    let (status, body) = read(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}
