//! Error types for web handlers.
//!
//! [`AppError`] bridges coordinator errors and HTTP responses. Every error
//! body has the same shape:
//!
//! ```json
//! { "code": "RESERVATION_NOT_FOUND", "message": "Reservation … not found" }
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use boxoffice_core::{LedgerError, RepositoryError};
use boxoffice_runtime::ReservationError;
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(Path(id): Path<Uuid>) -> Result<Json<View>, AppError> {
///     let found = lookup(id).await?.ok_or_else(|| AppError::not_found("Reservation", id))?;
///     Ok(Json(found.into()))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: String,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: code.into(),
            source: None,
        }
    }

    /// Attach the underlying error, logged but never sent to the client.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// HTTP status of the response
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "BAD_REQUEST")
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} {id} not found"),
            "NOT_FOUND",
        )
    }

    /// Create a 409 Conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message, code)
    }

    /// Create a 422 Unprocessable Entity error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message, "VALIDATION_ERROR")
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
            "INTERNAL_SERVER_ERROR",
        )
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message,
            "SERVICE_UNAVAILABLE",
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Request failed"
                ),
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

/// Map coordinator errors to HTTP.
///
/// Dependency failures and halted events are `503` so clients (and the
/// payment provider) retry; everything else is a client error.
impl From<ReservationError> for AppError {
    fn from(err: ReservationError) -> Self {
        let message = err.to_string();
        match err {
            ReservationError::InvalidQuantity { .. } | ReservationError::InvalidAmount => {
                Self::validation(message)
            }
            ReservationError::SessionConflict { .. } => Self::conflict(message, "SESSION_CONFLICT"),
            ReservationError::ReservationNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, message, "RESERVATION_NOT_FOUND")
            }
            ReservationError::ReservationNotPayable { .. } => {
                Self::conflict(message, "RESERVATION_NOT_PAYABLE")
            }
            ReservationError::PaymentInProgress { .. } => {
                Self::conflict(message, "PAYMENT_IN_PROGRESS")
            }
            ReservationError::IdempotencyKeyReused { .. } => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                message,
                "IDEMPOTENCY_KEY_REUSED",
            ),
            ReservationError::Ledger(LedgerError::UnknownPool(_)) => {
                Self::new(StatusCode::NOT_FOUND, message, "POOL_NOT_FOUND")
            }
            ReservationError::Ledger(LedgerError::TotalTooSmall { .. }) => {
                Self::conflict(message, "TOTAL_TOO_SMALL")
            }
            ReservationError::Ledger(
                LedgerError::Halted(_) | LedgerError::InvariantViolation { .. },
            ) => Self::new(StatusCode::SERVICE_UNAVAILABLE, message, "EVENT_HALTED")
                .with_source(anyhow::Error::new(err)),
            ReservationError::Repository(RepositoryError::Serialization(_)) => {
                Self::internal("An internal error occurred").with_source(anyhow::Error::new(err))
            }
            ReservationError::HoldStore(_)
            | ReservationError::Ledger(_)
            | ReservationError::Repository(_) => {
                Self::unavailable("A dependency is unavailable, retry later")
                    .with_source(anyhow::Error::new(err))
            }
        }
    }
}
