//! Operator inventory endpoints.
//!
//! - `PUT /inventory/:event_id/:ticket_type` `{"total": 500}`: create or resize a pool
//! - `GET /inventory/:event_id/:ticket_type`: ledger counts
//! - `POST /inventory/:event_id/resume`: lift a halt after manual repair

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use boxoffice_core::{EventId, InventoryCounts, PoolKey, TicketType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to size a pool.
#[derive(Debug, Deserialize)]
pub struct ProvisionRequest {
    /// Units that exist for sale
    pub total: u32,
}

/// Ledger view of a pool.
#[derive(Debug, Serialize, Deserialize)]
pub struct InventoryView {
    /// Event id
    pub event_id: EventId,
    /// Ticket type
    pub ticket_type: String,
    /// Units that exist for sale
    pub total: u32,
    /// Units sold
    pub sold: u32,
    /// Units held by live reservations
    pub reserved: u32,
    /// `total - sold - reserved`
    pub available: u32,
}

impl InventoryView {
    fn new(pool: &PoolKey, counts: InventoryCounts) -> Self {
        Self {
            event_id: pool.event_id,
            ticket_type: pool.ticket_type.to_string(),
            total: counts.total,
            sold: counts.sold,
            reserved: counts.reserved,
            available: counts.available(),
        }
    }
}

/// Result of a resume request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResumeResponse {
    /// Event id
    pub event_id: EventId,
    /// Whether the event had been halted
    pub was_halted: bool,
}

fn pool_key(event_id: Uuid, ticket_type: String) -> Result<PoolKey, AppError> {
    let ticket_type = TicketType::parse(ticket_type).map_err(AppError::validation)?;
    Ok(PoolKey::new(EventId::from_uuid(event_id), ticket_type))
}

/// Create or resize a pool.
///
/// # Errors
///
/// `409` when shrinking below what is already sold or reserved, `422` for an
/// invalid ticket type.
pub async fn provision_pool(
    State(state): State<AppState>,
    Path((event_id, ticket_type)): Path<(Uuid, String)>,
    Json(request): Json<ProvisionRequest>,
) -> Result<Json<InventoryView>, AppError> {
    let pool = pool_key(event_id, ticket_type)?;
    let counts = state.reservations.provision(&pool, request.total).await?;
    Ok(Json(InventoryView::new(&pool, counts)))
}

/// Read a pool's counts.
///
/// # Errors
///
/// `404` for an unknown pool, `503` if the pool is found corrupt (its event
/// is halted as a side effect).
pub async fn get_inventory(
    State(state): State<AppState>,
    Path((event_id, ticket_type)): Path<(Uuid, String)>,
) -> Result<Json<InventoryView>, AppError> {
    let pool = pool_key(event_id, ticket_type)?;
    let counts = state
        .reservations
        .availability(&pool)
        .await?
        .ok_or_else(|| AppError::not_found("Pool", &pool))?;
    Ok(Json(InventoryView::new(&pool, counts)))
}

/// Lift a halt.
///
/// # Errors
///
/// `503` on dependency failure.
pub async fn resume_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<ResumeResponse>, AppError> {
    let event_id = EventId::from_uuid(event_id);
    let was_halted = state.reservations.resume_event(&event_id).await?;
    Ok(Json(ResumeResponse {
        event_id,
        was_halted,
    }))
}
