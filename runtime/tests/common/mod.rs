//! Shared fixtures for the runtime integration tests.
//!
//! Every store is in-memory and wrapped in a fault injector, and the clock
//! only moves when a test advances it.

#![allow(dead_code, clippy::unwrap_used, clippy::panic)]

use boxoffice_core::environment::Clock;
use boxoffice_core::{
    Customer, EventId, IdempotencyKey, InventoryCounts, InventoryLedger, Money, PaymentIntent,
    PaymentMethod, PoolKey, Reservation, SessionId, TicketType,
};
use boxoffice_runtime::{
    ExpirySweeper, InitiateRequest, PaymentCoordinator, ReservationConfig, ReservationCoordinator,
    ReserveOutcome, ReserveRequest, RetryPolicy,
};
use boxoffice_testing::{
    FlakyHoldStore, FlakyLedger, InMemoryHoldStore, InMemoryLedger, InMemoryPaymentIntentStore,
    InMemoryReservationRepository, ManualClock, MockPaymentProvider, test_clock,
};
use std::sync::Arc;
use std::time::Duration;

pub const HOLD_TTL_SECS: i64 = 600;

pub struct Harness {
    pub reservations: ReservationCoordinator,
    pub payments: PaymentCoordinator,
    pub hold_store: FlakyHoldStore<InMemoryHoldStore>,
    pub ledger: FlakyLedger<InMemoryLedger>,
    pub repository: InMemoryReservationRepository,
    pub intents: InMemoryPaymentIntentStore,
    pub provider: MockPaymentProvider,
    pub clock: Arc<ManualClock>,
    pub pool: PoolKey,
}

fn fast_retries() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(2)
        .initial_delay(Duration::from_millis(1))
        .jitter(false)
        .build()
}

/// A harness with one provisioned pool of `total` units.
pub async fn harness(total: u32) -> Harness {
    harness_with(total, ReservationConfig::default()).await
}

pub async fn harness_with(total: u32, config: ReservationConfig) -> Harness {
    let hold_store = FlakyHoldStore::new(InMemoryHoldStore::new());
    let ledger = FlakyLedger::new(InMemoryLedger::new());
    let repository = InMemoryReservationRepository::new();
    let intents = InMemoryPaymentIntentStore::new();
    let provider = MockPaymentProvider::new();
    let clock = Arc::new(ManualClock::starting_at(test_clock().now()));

    let config = ReservationConfig {
        hold_ttl: Duration::from_secs(HOLD_TTL_SECS.unsigned_abs()),
        ..config
    };

    let reservations = ReservationCoordinator::new(
        Arc::new(hold_store.clone()),
        Arc::new(ledger.clone()),
        Arc::new(repository.clone()),
        clock.clone(),
        config,
    )
    .with_compensation_policy(fast_retries());

    let payments = PaymentCoordinator::new(
        Arc::new(intents.clone()),
        Arc::new(provider.clone()),
        reservations.clone(),
        clock.clone(),
    )
    .with_submit_policy(fast_retries());

    let pool = PoolKey::new(EventId::new(), TicketType::parse("regular").unwrap());
    reservations.provision(&pool, total).await.unwrap();

    Harness {
        reservations,
        payments,
        hold_store,
        ledger,
        repository,
        intents,
        provider,
        clock,
        pool,
    }
}

impl Harness {
    pub fn request(&self, session: &str, quantity: u32) -> ReserveRequest {
        ReserveRequest {
            pool: self.pool.clone(),
            quantity,
            session_id: SessionId::new(session),
        }
    }

    /// Reserve and insist on success.
    pub async fn reserve(&self, session: &str, quantity: u32) -> Reservation {
        match self
            .reservations
            .reserve(self.request(session, quantity))
            .await
            .unwrap()
        {
            ReserveOutcome::Reserved { reservation, .. } => reservation,
            ReserveOutcome::Declined { available } => {
                panic!("expected a reservation, declined with {available} available")
            }
        }
    }

    pub fn initiate_request(&self, key: &str, reservation: &Reservation) -> InitiateRequest {
        InitiateRequest {
            idempotency_key: IdempotencyKey::new(key),
            reservation_token: reservation.token,
            amount: Money::from_cents(4_500 * u64::from(reservation.quantity)),
            payment_method: PaymentMethod::CreditCard {
                token: "tok_visa".to_string(),
                last_four: "4242".to_string(),
            },
            customer: Customer::default(),
        }
    }

    /// Initiate a payment and insist on success.
    pub async fn pay(&self, key: &str, reservation: &Reservation) -> PaymentIntent {
        self.payments
            .initiate(self.initiate_request(key, reservation))
            .await
            .unwrap()
            .intent
    }

    pub async fn counts(&self) -> InventoryCounts {
        self.ledger.counts(&self.pool).await.unwrap().unwrap()
    }

    pub fn hold_capacity(&self) -> u32 {
        self.hold_store
            .inner()
            .capacity(&self.pool)
            .unwrap()
            .unwrap()
    }

    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(self.reservations.clone())
    }

    pub fn advance_past_ttl(&self) {
        self.clock
            .advance(chrono::Duration::seconds(HOLD_TTL_SECS + 1));
    }
}
