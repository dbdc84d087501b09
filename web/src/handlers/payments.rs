//! Payment endpoints.
//!
//! - `POST /payments`: create (or replay) a payment intent and submit it
//! - `GET /payments/:payment_id`: read an intent
//! - `POST /payments/callback`: the provider's verdict
//!
//! # Idempotency
//!
//! `POST /payments` requires an `Idempotency-Key` header. Every request with
//! the same key answers `201` with the same `payment_id`, and only the first
//! one reaches the provider.

use crate::error::AppError;
use crate::extractors::{CorrelationId, IdempotencyKeyHeader};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use boxoffice_core::{
    Customer, Money, PaymentId, PaymentIntent, PaymentMethod, PaymentStatus, ProviderOutcome,
    ProviderReference, ReservationStatus, ReservationToken,
};
use boxoffice_runtime::{CallbackAck, InitiateRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to pay for a reservation.
#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    /// Reservation being paid for
    pub reservation_token: Uuid,
    /// Amount in cents
    pub amount: u64,
    /// How the customer pays
    pub payment_method: PaymentMethod,
    /// Customer name, forwarded to the provider
    pub customer_name: Option<String>,
    /// Customer email, forwarded to the provider
    pub customer_email: Option<String>,
}

/// Response to `POST /payments`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreatePaymentResponse {
    /// Intent id
    pub payment_id: PaymentId,
    /// Intent status
    pub status: PaymentStatus,
    /// Reference the provider's callback will carry
    pub provider_reference: ProviderReference,
}

/// Payment intent details. Never includes payment method tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentView {
    /// Intent id
    pub payment_id: PaymentId,
    /// Reservation being paid for
    pub reservation_token: ReservationToken,
    /// Intent status
    pub status: PaymentStatus,
    /// Amount in cents
    pub amount: Money,
    /// Sanitized payment method description
    pub payment_method: String,
    /// Reference the provider's callback will carry
    pub provider_reference: ProviderReference,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// When the intent was settled
    pub settled_at: Option<DateTime<Utc>>,
}

impl From<PaymentIntent> for PaymentView {
    fn from(intent: PaymentIntent) -> Self {
        Self {
            payment_id: intent.payment_id,
            reservation_token: intent.reservation_token,
            status: intent.status,
            amount: intent.amount,
            payment_method: intent.payment_method.display_label(),
            provider_reference: intent.provider_reference,
            created_at: intent.created_at,
            settled_at: intent.settled_at,
        }
    }
}

/// Provider callback body.
#[derive(Debug, Deserialize)]
pub struct ProviderCallback {
    /// Reference handed to the provider at submission
    pub provider_reference: String,
    /// `success` or `failure`
    pub outcome: ProviderOutcome,
}

/// Acknowledgement returned to the provider.
#[derive(Debug, Serialize, Deserialize)]
pub struct CallbackResponse {
    /// `applied`, `duplicate`, `refund_required`, `unknown` or `rejected`
    pub result: String,
    /// Intent status after the callback, when the intent is known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PaymentStatus>,
    /// Reservation status that forced a refund
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_status: Option<ReservationStatus>,
}

impl CallbackResponse {
    fn new(result: &str, status: Option<PaymentStatus>) -> Self {
        Self {
            result: result.to_string(),
            status,
            reservation_status: None,
        }
    }
}

/// Create a payment intent.
///
/// ```bash
/// curl -X POST http://localhost:8080/payments \
///   -H "Idempotency-Key: order-81" \
///   -H "Content-Type: application/json" \
///   -d '{"reservation_token":"…","amount":9000,
///        "payment_method":{"type":"credit_card","token":"tok_visa","last_four":"4242"}}'
/// ```
///
/// # Errors
///
/// `400` without a valid `Idempotency-Key`, `404` for an unknown
/// reservation, `409` when it is not payable or already being paid for,
/// `422` for a zero amount or a key reused for another reservation.
pub async fn create_payment(
    State(state): State<AppState>,
    IdempotencyKeyHeader(key): IdempotencyKeyHeader,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<CreatePaymentResponse>), AppError> {
    let outcome = state
        .payments
        .initiate(InitiateRequest {
            idempotency_key: key,
            reservation_token: ReservationToken::from_uuid(request.reservation_token),
            amount: Money::from_cents(request.amount),
            payment_method: request.payment_method,
            customer: Customer {
                name: request.customer_name,
                email: request.customer_email,
            },
        })
        .await?;

    let intent = outcome.intent;
    Ok((
        StatusCode::CREATED,
        Json(CreatePaymentResponse {
            payment_id: intent.payment_id,
            status: intent.status,
            provider_reference: intent.provider_reference,
        }),
    ))
}

/// Read a payment intent.
///
/// # Errors
///
/// `404` for an unknown payment id.
pub async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentView>, AppError> {
    let payment_id = PaymentId::from_uuid(payment_id);
    let intent = state
        .payments
        .get(&payment_id)
        .await?
        .ok_or_else(|| AppError::not_found("Payment", payment_id))?;
    Ok(Json(intent.into()))
}

/// Apply the provider's verdict.
///
/// Answers `200` for every callback it has dealt with (applied, duplicate,
/// unknown reference, refund needed), so the provider stops redelivering.
///
/// # Errors
///
/// `503` only when a dependency failed; the intent is back to `pending` and
/// the provider should redeliver.
pub async fn provider_callback(
    State(state): State<AppState>,
    CorrelationId(correlation_id): CorrelationId,
    Json(callback): Json<ProviderCallback>,
) -> Result<Json<CallbackResponse>, AppError> {
    let reference = ProviderReference::new(callback.provider_reference);
    let ack = match state
        .payments
        .on_provider_callback(&reference, callback.outcome)
        .await
    {
        Ok(ack) => ack,
        Err(e) if e.is_retryable() => return Err(e.into()),
        Err(e) => {
            tracing::error!(
                %correlation_id,
                %reference,
                error = %e,
                "Callback could not be applied; acknowledged without effect"
            );
            return Ok(Json(CallbackResponse::new("rejected", None)));
        }
    };

    Ok(Json(match ack {
        CallbackAck::Applied(intent) => CallbackResponse::new("applied", Some(intent.status)),
        CallbackAck::Duplicate(intent) => CallbackResponse::new("duplicate", Some(intent.status)),
        CallbackAck::RefundRequired {
            intent,
            reservation_status,
        } => CallbackResponse {
            reservation_status: Some(reservation_status),
            ..CallbackResponse::new("refund_required", Some(intent.status))
        },
        CallbackAck::Unknown => CallbackResponse::new("unknown", None),
    }))
}
