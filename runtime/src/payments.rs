//! Payment coordinator.
//!
//! Turns an idempotency key into at most one payment intent, and a provider
//! callback into exactly one commit (or cancel) of the intent's reservation.
//!
//! # Callback ordering
//!
//! The intent's `pending → succeeded | failed` compare-and-set happens before
//! the reservation is touched, so duplicate or concurrent callbacks settle the
//! reservation once. If the reservation step fails the intent is put back to
//! `pending` and the error is returned; the provider redelivers and the whole
//! step runs again.

use crate::error::ReservationError;
use crate::metrics::PaymentMetrics;
use crate::reservations::{CancelOutcome, CommitOutcome, ReservationCoordinator};
use crate::retry::{RetryPolicy, retry_with_predicate};
use boxoffice_core::environment::Clock;
use boxoffice_core::{
    CreateIntent, Customer, IdempotencyKey, Money, PaymentId, PaymentIntent, PaymentIntentStore,
    PaymentMethod, PaymentProvider, PaymentStatus, ProviderError, ProviderOutcome,
    ProviderReference, RepositoryError, ReservationStatus, ReservationToken, Transition,
};
use std::sync::Arc;

/// A request to pay for a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateRequest {
    /// Client-chosen key; repeats return the first intent
    pub idempotency_key: IdempotencyKey,
    /// Reservation being paid for
    pub reservation_token: ReservationToken,
    /// Amount to charge
    pub amount: Money,
    /// How the customer pays
    pub payment_method: PaymentMethod,
    /// Optional customer details
    pub customer: Customer,
}

/// Result of [`PaymentCoordinator::initiate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateOutcome {
    /// The intent, as first created
    pub intent: PaymentIntent,
    /// Whether an earlier call with the same key created it
    pub replayed: bool,
}

/// Result of [`PaymentCoordinator::on_provider_callback`].
///
/// Every variant is acknowledged to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAck {
    /// The intent was settled and its reservation committed or cancelled.
    Applied(PaymentIntent),
    /// The intent was already settled; nothing changed.
    Duplicate(PaymentIntent),
    /// The payment was captured but the reservation had already been
    /// cancelled or expired. The charge has to be refunded.
    RefundRequired {
        /// The succeeded intent
        intent: PaymentIntent,
        /// Status the reservation was found in
        reservation_status: ReservationStatus,
    },
    /// No intent carries this reference.
    Unknown,
}

/// Coordinates payment intents with the provider and the reservation core.
#[derive(Clone)]
pub struct PaymentCoordinator {
    intents: Arc<dyn PaymentIntentStore>,
    provider: Arc<dyn PaymentProvider>,
    reservations: ReservationCoordinator,
    clock: Arc<dyn Clock>,
    submit_policy: RetryPolicy,
}

impl std::fmt::Debug for PaymentCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentCoordinator")
            .field("submit_policy", &self.submit_policy)
            .finish_non_exhaustive()
    }
}

impl PaymentCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(
        intents: Arc<dyn PaymentIntentStore>,
        provider: Arc<dyn PaymentProvider>,
        reservations: ReservationCoordinator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            intents,
            provider,
            reservations,
            clock,
            submit_policy: RetryPolicy::builder().max_retries(2).build(),
        }
    }

    /// Replace the retry policy for provider submissions.
    #[must_use]
    pub fn with_submit_policy(mut self, policy: RetryPolicy) -> Self {
        self.submit_policy = policy;
        self
    }

    /// Create a payment intent and submit it to the provider.
    ///
    /// Repeats with the same idempotency key (concurrent ones included)
    /// return the original intent without calling the provider again.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::InvalidAmount`] for a zero amount
    /// - [`ReservationError::ReservationNotFound`] /
    ///   [`ReservationError::ReservationNotPayable`] when the reservation is
    ///   unknown, settled or lapsed
    /// - [`ReservationError::PaymentInProgress`] when another key already pays
    ///   for the reservation
    /// - [`ReservationError::IdempotencyKeyReused`] when the key belongs to an
    ///   intent for another reservation
    /// - repository failures
    #[tracing::instrument(
        skip(self, request),
        fields(
            idempotency_key = %request.idempotency_key,
            reservation = %request.reservation_token,
            method = request.payment_method.kind(),
        )
    )]
    pub async fn initiate(&self, request: InitiateRequest) -> Result<InitiateOutcome, ReservationError> {
        if let Some(existing) = self.intents.get_by_key(&request.idempotency_key).await? {
            return replay(existing, &request);
        }

        if request.amount.is_zero() {
            return Err(ReservationError::InvalidAmount);
        }

        let reservation = self
            .reservations
            .get(&request.reservation_token)
            .await?
            .ok_or(ReservationError::ReservationNotFound(request.reservation_token))?;
        let now = self.clock.now();
        if reservation.is_lapsed(now) || reservation.status != ReservationStatus::Active {
            let status = if reservation.is_lapsed(now) {
                ReservationStatus::Expired
            } else {
                reservation.status
            };
            return Err(ReservationError::ReservationNotPayable {
                token: reservation.token,
                status,
            });
        }

        let intent = PaymentIntent {
            payment_id: PaymentId::new(),
            idempotency_key: request.idempotency_key.clone(),
            reservation_token: request.reservation_token,
            status: PaymentStatus::Pending,
            amount: request.amount,
            payment_method: request.payment_method.clone(),
            customer: request.customer.clone(),
            provider_reference: ProviderReference::generate(),
            created_at: now,
            settled_at: None,
        };

        let intent = match self.intents.create_if_absent(intent).await? {
            CreateIntent::Created(intent) => intent,
            CreateIntent::Existing(existing) => return replay(existing, &request),
            CreateIntent::ReservationTaken(live) => {
                return Err(ReservationError::PaymentInProgress {
                    token: request.reservation_token,
                    payment_id: live.payment_id,
                });
            }
        };

        PaymentMetrics::record_status("created");
        tracing::info!(
            payment_id = %intent.payment_id,
            amount = %intent.amount,
            method = %intent.payment_method.display_label(),
            "Payment intent created"
        );

        let intent = self.submit(intent).await;
        Ok(InitiateOutcome {
            intent,
            replayed: false,
        })
    }

    /// Hand a fresh intent to the provider and return it as it stands
    /// afterwards.
    ///
    /// Timeouts and outages are inconclusive: the intent stays pending until a
    /// callback arrives or the hold expires. An outright refusal settles the
    /// intent as failed and releases the reservation.
    async fn submit(&self, intent: PaymentIntent) -> PaymentIntent {
        let submitted = retry_with_predicate(
            &self.submit_policy,
            "submit_payment",
            || self.provider.submit(&intent),
            |e: &ProviderError| !e.is_definitive(),
        )
        .await;

        match submitted {
            Ok(submission) => {
                tracing::debug!(
                    payment_id = %intent.payment_id,
                    provider_transaction = %submission.provider_transaction,
                    "Payment submitted"
                );
                intent
            }
            Err(e) if e.is_definitive() => {
                PaymentMetrics::record_submission_failed();
                tracing::info!(
                    payment_id = %intent.payment_id,
                    error = %e,
                    "Payment refused by provider; releasing reservation"
                );
                self.settle_refused(intent).await
            }
            Err(e) => {
                PaymentMetrics::record_submission_failed();
                tracing::warn!(
                    payment_id = %intent.payment_id,
                    error = %e,
                    "Payment submission inconclusive; intent stays pending"
                );
                intent
            }
        }
    }

    /// Settle a refused intent the way a failure callback would.
    async fn settle_refused(&self, intent: PaymentIntent) -> PaymentIntent {
        match self
            .on_provider_callback(&intent.provider_reference, ProviderOutcome::Failure)
            .await
        {
            Ok(CallbackAck::Applied(settled) | CallbackAck::Duplicate(settled)) => settled,
            Ok(other) => {
                tracing::warn!(
                    payment_id = %intent.payment_id,
                    ?other,
                    "Unexpected settlement of refused payment"
                );
                intent
            }
            Err(e) => {
                // The intent is pending again; the hold still lapses at its TTL.
                tracing::warn!(
                    payment_id = %intent.payment_id,
                    error = %e,
                    "Could not settle refused payment"
                );
                intent
            }
        }
    }

    /// Apply the provider's verdict for an intent.
    ///
    /// # Errors
    ///
    /// Returns error only when a dependency failed; the intent is back to
    /// `pending` and the provider should redeliver.
    #[tracing::instrument(skip(self, reference), fields(reference = %reference))]
    pub async fn on_provider_callback(
        &self,
        reference: &ProviderReference,
        outcome: ProviderOutcome,
    ) -> Result<CallbackAck, ReservationError> {
        let Some(intent) = self.intents.get_by_reference(reference).await? else {
            tracing::warn!("Callback for unknown provider reference");
            return Ok(CallbackAck::Unknown);
        };

        let target = outcome.settles_to();
        if intent.status.is_terminal() {
            if intent.status != target {
                tracing::warn!(
                    payment_id = %intent.payment_id,
                    settled = %intent.status,
                    reported = %target,
                    "Conflicting callback for settled intent ignored"
                );
            }
            return Ok(CallbackAck::Duplicate(intent));
        }

        let now = self.clock.now();
        let settled = match self
            .intents
            .transition(&intent.payment_id, PaymentStatus::Pending, target, now)
            .await?
        {
            Transition::Applied(settled) => settled,
            Transition::Rejected(current) => return Ok(CallbackAck::Duplicate(current)),
            Transition::Missing => return Ok(CallbackAck::Unknown),
        };

        let token = settled.reservation_token;
        let applied = match outcome {
            ProviderOutcome::Success => match self.reservations.commit(&token).await {
                Ok(CommitOutcome::Committed(_) | CommitOutcome::AlreadyConfirmed(_)) => {
                    Ok(CallbackAck::Applied(settled.clone()))
                }
                Ok(CommitOutcome::Rejected { status }) => {
                    PaymentMetrics::record_refund_required();
                    tracing::error!(
                        payment_id = %settled.payment_id,
                        reservation = %token,
                        reservation_status = %status,
                        amount = %settled.amount,
                        "Payment captured for a reservation that can no longer be confirmed; refund required"
                    );
                    Ok(CallbackAck::RefundRequired {
                        intent: settled.clone(),
                        reservation_status: status,
                    })
                }
                Err(e) => Err(e),
            },
            ProviderOutcome::Failure => match self.reservations.cancel(&token).await {
                Ok(CancelOutcome::Cancelled(_) | CancelOutcome::AlreadySettled(_)) => {
                    Ok(CallbackAck::Applied(settled.clone()))
                }
                Err(ReservationError::ReservationNotFound(_)) => {
                    Ok(CallbackAck::Applied(settled.clone()))
                }
                Err(e) => Err(e),
            },
        };

        match applied {
            Ok(ack) => {
                PaymentMetrics::record_status(target.as_str());
                tracing::info!(payment_id = %settled.payment_id, status = %target, "Payment settled");
                Ok(ack)
            }
            Err(e) => {
                tracing::warn!(
                    payment_id = %settled.payment_id,
                    error = %e,
                    "Settling reservation failed, reverting intent to pending"
                );
                self.revert(&settled.payment_id, target).await;
                Err(e)
            }
        }
    }

    async fn revert(&self, payment_id: &PaymentId, from: PaymentStatus) {
        let now = self.clock.now();
        let reverted = retry_with_predicate(
            &self.submit_policy,
            "revert_payment",
            || {
                self.intents
                    .transition(payment_id, from, PaymentStatus::Pending, now)
            },
            |e: &RepositoryError| matches!(e, RepositoryError::Database(_)),
        )
        .await;

        if let Err(e) = reverted {
            tracing::error!(
                %payment_id,
                status = %from,
                error = %e,
                "Could not revert payment intent; needs manual reconciliation"
            );
        }
    }

    /// Load an intent.
    ///
    /// # Errors
    ///
    /// Returns error on repository failure.
    pub async fn get(&self, payment_id: &PaymentId) -> Result<Option<PaymentIntent>, ReservationError> {
        Ok(self.intents.get(payment_id).await?)
    }
}

fn replay(existing: PaymentIntent, request: &InitiateRequest) -> Result<InitiateOutcome, ReservationError> {
    if existing.reservation_token != request.reservation_token {
        return Err(ReservationError::IdempotencyKeyReused {
            key: existing.idempotency_key,
            payment_id: existing.payment_id,
        });
    }
    PaymentMetrics::record_status("replayed");
    Ok(InitiateOutcome {
        intent: existing,
        replayed: true,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::ReservationConfig;
    use crate::reservations::{ReserveOutcome, ReserveRequest};
    use boxoffice_core::{EventId, InventoryLedger, PoolKey, SessionId, TicketType};
    use boxoffice_testing::{
        InMemoryHoldStore, InMemoryLedger, InMemoryPaymentIntentStore,
        InMemoryReservationRepository, ManualClock, MockPaymentProvider, test_clock,
    };

    struct Harness {
        payments: PaymentCoordinator,
        reservations: ReservationCoordinator,
        provider: MockPaymentProvider,
        ledger: InMemoryLedger,
        clock: Arc<ManualClock>,
        pool: PoolKey,
    }

    async fn harness() -> Harness {
        let ledger = InMemoryLedger::new();
        let clock = Arc::new(ManualClock::starting_at(test_clock().now()));
        let reservations = ReservationCoordinator::new(
            Arc::new(InMemoryHoldStore::new()),
            Arc::new(ledger.clone()),
            Arc::new(InMemoryReservationRepository::new()),
            clock.clone(),
            ReservationConfig::default(),
        );
        let provider = MockPaymentProvider::new();
        let payments = PaymentCoordinator::new(
            Arc::new(InMemoryPaymentIntentStore::new()),
            Arc::new(provider.clone()),
            reservations.clone(),
            clock.clone(),
        )
        .with_submit_policy(RetryPolicy::none());
        let pool = PoolKey::new(EventId::new(), TicketType::parse("vip").unwrap());
        reservations.provision(&pool, 4).await.unwrap();
        Harness {
            payments,
            reservations,
            provider,
            ledger,
            clock,
            pool,
        }
    }

    async fn reserve(h: &Harness, session: &str) -> ReservationToken {
        let outcome = h
            .reservations
            .reserve(ReserveRequest {
                pool: h.pool.clone(),
                quantity: 2,
                session_id: SessionId::new(session),
            })
            .await
            .unwrap();
        match outcome {
            ReserveOutcome::Reserved { reservation, .. } => reservation.token,
            other => panic!("expected reservation, got {other:?}"),
        }
    }

    fn pay(key: &str, token: ReservationToken) -> InitiateRequest {
        InitiateRequest {
            idempotency_key: IdempotencyKey::new(key),
            reservation_token: token,
            amount: Money::from_cents(12_000),
            payment_method: PaymentMethod::PayPal {
                email: "buyer@example.com".to_string(),
            },
            customer: Customer::default(),
        }
    }

    #[tokio::test]
    async fn test_initiate_is_idempotent_per_key() {
        let h = harness().await;
        let token = reserve(&h, "s1").await;

        let first = h.payments.initiate(pay("k1", token)).await.unwrap();
        let second = h.payments.initiate(pay("k1", token)).await.unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.intent, second.intent);
        assert_eq!(h.provider.submission_count(), 1);
    }

    #[tokio::test]
    async fn test_second_key_for_same_reservation_is_refused() {
        let h = harness().await;
        let token = reserve(&h, "s1").await;
        let first = h.payments.initiate(pay("k1", token)).await.unwrap();

        let err = h.payments.initiate(pay("k2", token)).await.unwrap_err();
        assert_eq!(
            err,
            ReservationError::PaymentInProgress {
                token,
                payment_id: first.intent.payment_id
            }
        );
    }

    #[tokio::test]
    async fn test_key_reused_for_other_reservation() {
        let h = harness().await;
        let a = reserve(&h, "s1").await;
        let b = reserve(&h, "s2").await;
        h.payments.initiate(pay("k1", a)).await.unwrap();

        assert!(matches!(
            h.payments.initiate(pay("k1", b)).await.unwrap_err(),
            ReservationError::IdempotencyKeyReused { .. }
        ));
    }

    #[tokio::test]
    async fn test_lapsed_reservation_is_not_payable() {
        let h = harness().await;
        let token = reserve(&h, "s1").await;
        h.clock.advance(chrono::Duration::minutes(11));

        assert_eq!(
            h.payments.initiate(pay("k1", token)).await.unwrap_err(),
            ReservationError::ReservationNotPayable {
                token,
                status: ReservationStatus::Expired
            }
        );
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_intent_pending() {
        let h = harness().await;
        let token = reserve(&h, "s1").await;
        h.provider.set_failing(true);

        let outcome = h.payments.initiate(pay("k1", token)).await.unwrap();
        assert_eq!(outcome.intent.status, PaymentStatus::Pending);
        let reservation = h.reservations.get(&token).await.unwrap().unwrap();
        assert_eq!(reservation.status, ReservationStatus::Active);
    }

    #[tokio::test]
    async fn test_declined_submission_fails_intent_and_frees_units() {
        let h = harness().await;
        let token = reserve(&h, "s1").await;
        h.provider.set_declining(true);

        let outcome = h.payments.initiate(pay("k1", token)).await.unwrap();
        assert_eq!(outcome.intent.status, PaymentStatus::Failed);
        assert!(outcome.intent.settled_at.is_some());

        let reservation = h.reservations.get(&token).await.unwrap().unwrap();
        assert_eq!(reservation.status, ReservationStatus::Cancelled);
        assert_eq!(h.ledger.counts(&h.pool).await.unwrap().unwrap().reserved, 0);

        // The released units go to the next buyer.
        reserve(&h, "s2").await;
        reserve(&h, "s3").await;

        // Replaying the key reports the refusal without a second submission.
        let replay = h.payments.initiate(pay("k1", token)).await.unwrap();
        assert!(replay.replayed);
        assert_eq!(replay.intent.status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_success_callback_commits_once() {
        let h = harness().await;
        let token = reserve(&h, "s1").await;
        let intent = h.payments.initiate(pay("k1", token)).await.unwrap().intent;

        let ack = h
            .payments
            .on_provider_callback(&intent.provider_reference, ProviderOutcome::Success)
            .await
            .unwrap();
        assert!(matches!(ack, CallbackAck::Applied(ref i) if i.status == PaymentStatus::Succeeded));

        let again = h
            .payments
            .on_provider_callback(&intent.provider_reference, ProviderOutcome::Success)
            .await
            .unwrap();
        assert!(matches!(again, CallbackAck::Duplicate(_)));

        let counts = h.ledger.counts(&h.pool).await.unwrap().unwrap();
        assert_eq!((counts.sold, counts.reserved), (2, 0));
    }

    #[tokio::test]
    async fn test_failure_callback_cancels_reservation() {
        let h = harness().await;
        let token = reserve(&h, "s1").await;
        let intent = h.payments.initiate(pay("k1", token)).await.unwrap().intent;

        let ack = h
            .payments
            .on_provider_callback(&intent.provider_reference, ProviderOutcome::Failure)
            .await
            .unwrap();
        assert!(matches!(ack, CallbackAck::Applied(ref i) if i.status == PaymentStatus::Failed));

        let reservation = h.reservations.get(&token).await.unwrap().unwrap();
        assert_eq!(reservation.status, ReservationStatus::Cancelled);
        assert_eq!(h.ledger.counts(&h.pool).await.unwrap().unwrap().reserved, 0);
    }

    #[tokio::test]
    async fn test_late_success_after_expiry_requires_refund() {
        let h = harness().await;
        let token = reserve(&h, "s1").await;
        let intent = h.payments.initiate(pay("k1", token)).await.unwrap().intent;
        h.clock.advance(chrono::Duration::minutes(11));

        let ack = h
            .payments
            .on_provider_callback(&intent.provider_reference, ProviderOutcome::Success)
            .await
            .unwrap();
        assert!(matches!(
            ack,
            CallbackAck::RefundRequired {
                reservation_status: ReservationStatus::Expired,
                ..
            }
        ));
        assert_eq!(h.ledger.counts(&h.pool).await.unwrap().unwrap().sold, 0);
    }

    #[tokio::test]
    async fn test_unknown_reference_is_acknowledged() {
        let h = harness().await;
        let ack = h
            .payments
            .on_provider_callback(&ProviderReference::new("pi_unknown"), ProviderOutcome::Success)
            .await
            .unwrap();
        assert_eq!(ack, CallbackAck::Unknown);
    }
}
