//! Payment intent storage and the provider boundary.
//!
//! The provider is reached through a request/callback boundary:
//! [`PaymentProvider::submit`] asks it to charge an intent, and the provider
//! later calls back with the intent's [`ProviderReference`] and an outcome.

use crate::error::{ProviderError, RepositoryError};
use crate::repository::Transition;
use crate::types::{IdempotencyKey, PaymentId, PaymentIntent, PaymentStatus, ProviderReference};
use crate::BoxFuture;
use chrono::{DateTime, Utc};

/// Outcome of creating an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateIntent {
    /// The intent was stored.
    Created(PaymentIntent),
    /// An intent with the same idempotency key exists; it is returned as is.
    Existing(PaymentIntent),
    /// The reservation already has a live (pending or succeeded) intent under
    /// another key.
    ReservationTaken(PaymentIntent),
}

/// Payment intent store.
///
/// # Implementation Notes
///
/// - [`PaymentIntentStore::create_if_absent`] must be atomic on the
///   idempotency key: N concurrent calls create exactly one intent.
/// - At most one non-failed intent may reference a reservation.
pub trait PaymentIntentStore: Send + Sync {
    /// Store an intent unless its key (or its reservation) is taken.
    ///
    /// # Errors
    ///
    /// Returns error on database failure.
    fn create_if_absent(
        &self,
        intent: PaymentIntent,
    ) -> BoxFuture<'_, Result<CreateIntent, RepositoryError>>;

    /// Load an intent by id.
    ///
    /// # Errors
    ///
    /// Returns error on database failure.
    fn get<'a>(
        &'a self,
        payment_id: &'a PaymentId,
    ) -> BoxFuture<'a, Result<Option<PaymentIntent>, RepositoryError>>;

    /// Load an intent by idempotency key.
    ///
    /// # Errors
    ///
    /// Returns error on database failure.
    fn get_by_key<'a>(
        &'a self,
        key: &'a IdempotencyKey,
    ) -> BoxFuture<'a, Result<Option<PaymentIntent>, RepositoryError>>;

    /// Load an intent by provider reference.
    ///
    /// # Errors
    ///
    /// Returns error on database failure.
    fn get_by_reference<'a>(
        &'a self,
        reference: &'a ProviderReference,
    ) -> BoxFuture<'a, Result<Option<PaymentIntent>, RepositoryError>>;

    /// Move an intent from `from` to `to`, atomically.
    ///
    /// # Errors
    ///
    /// Returns error on database failure.
    fn transition<'a>(
        &'a self,
        payment_id: &'a PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Transition<PaymentIntent>, RepositoryError>>;
}

/// Acknowledgement of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSubmission {
    /// Provider-side identifier, for logs only
    pub provider_transaction: String,
}

/// Payment provider.
///
/// Abstraction over processors such as Stripe, `PayPal` or Apple Pay. The
/// result of a charge arrives asynchronously through the callback endpoint;
/// a successful `submit` only means the provider accepted the request.
pub trait PaymentProvider: Send + Sync {
    /// Ask the provider to charge an intent.
    ///
    /// # Errors
    ///
    /// Returns error if the provider cannot be reached or refuses the
    /// submission. Errors are inconclusive and never settle the intent.
    fn submit<'a>(
        &'a self,
        intent: &'a PaymentIntent,
    ) -> BoxFuture<'a, Result<ProviderSubmission, ProviderError>>;
}
