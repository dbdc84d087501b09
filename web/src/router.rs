//! Router configuration.

use crate::handlers::{health, inventory, payments, reservations};
use crate::middleware::correlation_id_layer;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;

/// Build the complete router.
///
/// ```text
/// GET    /health
/// GET    /ready
/// POST   /reservations
/// GET    /reservations/:token
/// DELETE /reservations/:token
/// POST   /payments
/// POST   /payments/callback
/// GET    /payments/:payment_id
/// PUT    /inventory/:event_id/:ticket_type
/// GET    /inventory/:event_id/:ticket_type
/// POST   /inventory/:event_id/resume
/// ```
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/reservations", post(reservations::create_reservation))
        .route(
            "/reservations/:token",
            get(reservations::get_reservation).delete(reservations::cancel_reservation),
        )
        .route("/payments", post(payments::create_payment))
        .route("/payments/callback", post(payments::provider_callback))
        .route("/payments/:payment_id", get(payments::get_payment))
        .route(
            "/inventory/:event_id/:ticket_type",
            put(inventory::provision_pool).get(inventory::get_inventory),
        )
        .route("/inventory/:event_id/resume", post(inventory::resume_event))
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
