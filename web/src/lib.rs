//! Axum HTTP surface for boxoffice.
//!
//! Handlers are thin: they parse the request, call one coordinator
//! operation and map its outcome to a status code.
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │  axum router + correlation middleware │  ← JSON, headers, status codes
//! ├───────────────────────────────────────┤
//! │  ReservationCoordinator               │  ← reserve / commit / cancel
//! │  PaymentCoordinator                   │  ← initiate / callback
//! ├───────────────────────────────────────┤
//! │  HoldStore · InventoryLedger · repos  │  ← Redis / Postgres / memory
//! └───────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use boxoffice_web::{AppState, build_router};
//!
//! let app = build_router(AppState::new(reservations, payments));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use error::AppError;
pub use extractors::{CorrelationId, IdempotencyKeyHeader};
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};
pub use router::build_router;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
