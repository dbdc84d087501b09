//! HTTP request handlers, organized by resource.

pub mod health;
pub mod inventory;
pub mod payments;
pub mod reservations;

pub use health::{health_check, readiness_check};
