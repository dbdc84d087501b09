//! Reservation endpoints.
//!
//! - `POST /reservations`: hold tickets
//! - `GET /reservations/:token`: read a reservation
//! - `DELETE /reservations/:token`: release it
//!
//! # State Machine
//!
//! ```text
//! active ──► confirmed   (payment callback)
//!    ├─────► cancelled   (DELETE, failed payment)
//!    └─────► expired     (sweeper, late commit)
//! ```

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use boxoffice_core::{
    EventId, PoolKey, Reservation, ReservationStatus, ReservationToken, SessionId, TicketType,
};
use boxoffice_runtime::{CancelOutcome, ReserveOutcome, ReserveRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to hold tickets.
#[derive(Debug, Deserialize)]
pub struct CreateReservationRequest {
    /// Event to reserve for
    pub event_id: Uuid,
    /// Ticket type within the event
    pub ticket_type: String,
    /// Units wanted
    pub quantity: u32,
    /// Client request identity; repeating it replays the first reservation
    pub session_id: String,
}

/// Response to a successful hold.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateReservationResponse {
    /// Token identifying the reservation
    pub reservation_token: ReservationToken,
    /// When the hold lapses
    pub expires_at: DateTime<Utc>,
    /// Current status (`active` unless this is a replay of a settled one)
    pub status: ReservationStatus,
}

/// Response when the pool cannot satisfy the request.
#[derive(Debug, Serialize, Deserialize)]
pub struct SoldOutResponse {
    /// Always `sold_out`
    pub reason: String,
    /// Units that could still be reserved
    pub available: u32,
}

/// Reservation details.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReservationView {
    /// Reservation token
    pub reservation_token: ReservationToken,
    /// Event id
    pub event_id: EventId,
    /// Ticket type
    pub ticket_type: String,
    /// Units held or sold
    pub quantity: u32,
    /// Lifecycle status
    pub status: ReservationStatus,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// When the hold lapses
    pub expires_at: DateTime<Utc>,
    /// When the reservation left `active`
    pub settled_at: Option<DateTime<Utc>>,
}

impl From<Reservation> for ReservationView {
    fn from(r: Reservation) -> Self {
        Self {
            reservation_token: r.token,
            event_id: r.pool.event_id,
            ticket_type: r.pool.ticket_type.to_string(),
            quantity: r.quantity,
            status: r.status,
            created_at: r.created_at,
            expires_at: r.expires_at,
            settled_at: r.settled_at,
        }
    }
}

/// Hold tickets.
///
/// ```bash
/// curl -X POST http://localhost:8080/reservations \
///   -H "Content-Type: application/json" \
///   -d '{"event_id":"550e8400-e29b-41d4-a716-446655440000",
///        "ticket_type":"regular","quantity":2,"session_id":"checkout-81"}'
/// ```
///
/// `201 {"reservation_token", "expires_at", "status"}` or
/// `409 {"reason":"sold_out","available":1}`.
///
/// # Errors
///
/// `422` for an invalid ticket type or quantity, `409` when the session id is
/// bound to a different request, `503` on dependency failure.
pub async fn create_reservation(
    State(state): State<AppState>,
    Json(request): Json<CreateReservationRequest>,
) -> Result<Response, AppError> {
    let ticket_type = TicketType::parse(request.ticket_type).map_err(AppError::validation)?;
    if request.session_id.trim().is_empty() {
        return Err(AppError::validation("session_id must not be empty"));
    }

    let outcome = state
        .reservations
        .reserve(ReserveRequest {
            pool: PoolKey::new(EventId::from_uuid(request.event_id), ticket_type),
            quantity: request.quantity,
            session_id: SessionId::new(request.session_id),
        })
        .await?;

    Ok(match outcome {
        ReserveOutcome::Reserved { reservation, .. } => (
            StatusCode::CREATED,
            Json(CreateReservationResponse {
                reservation_token: reservation.token,
                expires_at: reservation.expires_at,
                status: reservation.status,
            }),
        )
            .into_response(),
        ReserveOutcome::Declined { available } => (
            StatusCode::CONFLICT,
            Json(SoldOutResponse {
                reason: "sold_out".to_string(),
                available,
            }),
        )
            .into_response(),
    })
}

/// Read a reservation.
///
/// # Errors
///
/// `404` for an unknown token.
pub async fn get_reservation(
    State(state): State<AppState>,
    Path(token): Path<Uuid>,
) -> Result<Json<ReservationView>, AppError> {
    let token = ReservationToken::from_uuid(token);
    let reservation = state
        .reservations
        .get(&token)
        .await?
        .ok_or_else(|| AppError::not_found("Reservation", token))?;
    Ok(Json(reservation.into()))
}

/// Release a reservation. Repeats answer `204` as well.
///
/// # Errors
///
/// `409` when the reservation was already confirmed, `404` for an unknown
/// token, `503` on dependency failure.
pub async fn cancel_reservation(
    State(state): State<AppState>,
    Path(token): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let token = ReservationToken::from_uuid(token);
    match state.reservations.cancel(&token).await? {
        CancelOutcome::AlreadySettled(r) if r.status == ReservationStatus::Confirmed => Err(
            AppError::conflict(format!("Reservation {token} is already confirmed"), "ALREADY_CONFIRMED"),
        ),
        CancelOutcome::Cancelled(_) | CancelOutcome::AlreadySettled(_) => Ok(StatusCode::NO_CONTENT),
    }
}
