//! In-memory payment intent store and a recording payment provider.

use boxoffice_core::{
    BoxFuture, CreateIntent, IdempotencyKey, PaymentId, PaymentIntent, PaymentIntentStore,
    PaymentProvider, PaymentStatus, ProviderError, ProviderReference, ProviderSubmission,
    RepositoryError, ReservationToken, Transition,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, Default)]
struct Intents {
    by_id: HashMap<PaymentId, PaymentIntent>,
    by_key: HashMap<IdempotencyKey, PaymentId>,
    by_reference: HashMap<ProviderReference, PaymentId>,
    live_by_reservation: HashMap<ReservationToken, PaymentId>,
}

impl Intents {
    fn lookup(&self, id: Option<&PaymentId>) -> Option<PaymentIntent> {
        id.and_then(|id| self.by_id.get(id)).cloned()
    }
}

/// In-memory payment intent store.
///
/// One lock covers every index; a failed intent drops out of the live index
/// so the reservation can be paid again under a new key.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentIntentStore {
    intents: Arc<RwLock<Intents>>,
}

impl InMemoryPaymentIntentStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored intents
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn len(&self) -> Result<usize, RepositoryError> {
        let intents = self
            .intents
            .read()
            .map_err(|_| RepositoryError::Database("RwLock read failed".to_string()))?;
        Ok(intents.by_id.len())
    }

    /// Whether the store is empty
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, RepositoryError> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Intents>, RepositoryError> {
        self.intents
            .read()
            .map_err(|_| RepositoryError::Database("RwLock read failed".to_string()))
    }
}

impl PaymentIntentStore for InMemoryPaymentIntentStore {
    fn create_if_absent(
        &self,
        intent: PaymentIntent,
    ) -> BoxFuture<'_, Result<CreateIntent, RepositoryError>> {
        Box::pin(async move {
            let mut intents = self
                .intents
                .write()
                .map_err(|_| RepositoryError::Database("RwLock write failed".to_string()))?;

            if let Some(existing) = intents.lookup(intents.by_key.get(&intent.idempotency_key)) {
                return Ok(CreateIntent::Existing(existing));
            }
            if let Some(live) =
                intents.lookup(intents.live_by_reservation.get(&intent.reservation_token))
            {
                return Ok(CreateIntent::ReservationTaken(live));
            }

            intents
                .by_key
                .insert(intent.idempotency_key.clone(), intent.payment_id);
            intents
                .by_reference
                .insert(intent.provider_reference.clone(), intent.payment_id);
            if intent.status != PaymentStatus::Failed {
                intents
                    .live_by_reservation
                    .insert(intent.reservation_token, intent.payment_id);
            }
            intents.by_id.insert(intent.payment_id, intent.clone());
            Ok(CreateIntent::Created(intent))
        })
    }

    fn get<'a>(
        &'a self,
        payment_id: &'a PaymentId,
    ) -> BoxFuture<'a, Result<Option<PaymentIntent>, RepositoryError>> {
        Box::pin(async move { Ok(self.read()?.lookup(Some(payment_id))) })
    }

    fn get_by_key<'a>(
        &'a self,
        key: &'a IdempotencyKey,
    ) -> BoxFuture<'a, Result<Option<PaymentIntent>, RepositoryError>> {
        Box::pin(async move {
            let intents = self.read()?;
            Ok(intents.lookup(intents.by_key.get(key)))
        })
    }

    fn get_by_reference<'a>(
        &'a self,
        reference: &'a ProviderReference,
    ) -> BoxFuture<'a, Result<Option<PaymentIntent>, RepositoryError>> {
        Box::pin(async move {
            let intents = self.read()?;
            Ok(intents.lookup(intents.by_reference.get(reference)))
        })
    }

    fn transition<'a>(
        &'a self,
        payment_id: &'a PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Transition<PaymentIntent>, RepositoryError>> {
        Box::pin(async move {
            let mut intents = self
                .intents
                .write()
                .map_err(|_| RepositoryError::Database("RwLock write failed".to_string()))?;
            let Some(intent) = intents.by_id.get_mut(payment_id) else {
                return Ok(Transition::Missing);
            };
            if intent.status != from {
                return Ok(Transition::Rejected(intent.clone()));
            }
            intent.status = to;
            intent.settled_at = to.is_terminal().then_some(at);
            let updated = intent.clone();

            if to == PaymentStatus::Failed {
                intents
                    .live_by_reservation
                    .remove(&updated.reservation_token);
            } else {
                intents
                    .live_by_reservation
                    .insert(updated.reservation_token, updated.payment_id);
            }
            Ok(Transition::Applied(updated))
        })
    }
}

/// Payment provider that records submissions instead of charging anyone.
///
/// Tests drive the callback side themselves with the recorded references.
#[derive(Debug, Clone, Default)]
pub struct MockPaymentProvider {
    submissions: Arc<Mutex<Vec<PaymentIntent>>>,
    failing: Arc<AtomicBool>,
    declining: Arc<AtomicBool>,
}

impl MockPaymentProvider {
    /// Create a provider that accepts every submission
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent submissions fail as unavailable (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make subsequent submissions be refused outright, as a declined card
    pub fn set_declining(&self, declining: bool) {
        self.declining.store(declining, Ordering::SeqCst);
    }

    /// Intents submitted so far, in order
    #[must_use]
    pub fn submissions(&self) -> Vec<PaymentIntent> {
        self.submissions
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Number of submissions so far
    #[must_use]
    pub fn submission_count(&self) -> usize {
        self.submissions.lock().map(|s| s.len()).unwrap_or_default()
    }
}

impl PaymentProvider for MockPaymentProvider {
    fn submit<'a>(
        &'a self,
        intent: &'a PaymentIntent,
    ) -> BoxFuture<'a, Result<ProviderSubmission, ProviderError>> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ProviderError::Unavailable("mock provider down".to_string()));
            }
            if self.declining.load(Ordering::SeqCst) {
                return Err(ProviderError::Rejected("card declined".to_string()));
            }
            self.submissions
                .lock()
                .map_err(|_| ProviderError::Unavailable("Mutex lock failed".to_string()))?
                .push(intent.clone());
            Ok(ProviderSubmission {
                provider_transaction: format!("mock_{}", intent.provider_reference.as_str()),
            })
        })
    }
}
