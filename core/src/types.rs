//! Domain types for the reservation core.
//!
//! Identifiers, inventory counts, reservations (holds) and payment intents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a sellable event
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random `EventId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ticket category within an event ("regular", "vip", ...).
///
/// Ticket types end up inside Redis keys, so only ASCII alphanumerics,
/// `-` and `_` are accepted (see [`TicketType::parse`]).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketType(String);

impl TicketType {
    /// Maximum accepted length.
    pub const MAX_LEN: usize = 64;

    /// Parse and validate a ticket type.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the value is empty, too long,
    /// or contains characters outside `[A-Za-z0-9_-]`.
    pub fn parse(value: impl Into<String>) -> Result<Self, String> {
        let value = value.into();
        if value.is_empty() {
            return Err("ticket_type must not be empty".to_string());
        }
        if value.len() > Self::MAX_LEN {
            return Err(format!(
                "ticket_type must be at most {} characters",
                Self::MAX_LEN
            ));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err("ticket_type may only contain [A-Za-z0-9_-]".to_string());
        }
        Ok(Self(value))
    }

    /// Borrow the ticket type as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One sellable counter: a ticket type of an event.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PoolKey {
    /// Event the tickets belong to
    pub event_id: EventId,
    /// Ticket category
    pub ticket_type: TicketType,
}

impl PoolKey {
    /// Creates a new pool key
    #[must_use]
    pub const fn new(event_id: EventId, ticket_type: TicketType) -> Self {
        Self {
            event_id,
            ticket_type,
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.event_id, self.ticket_type)
    }
}

/// Opaque token identifying a reservation (and its hold)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationToken(Uuid);

impl ReservationToken {
    /// Creates a new random token
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a token from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ReservationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReservationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-supplied identity of one logical reserve request
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a session id
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the session id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-supplied key that makes payment initiation idempotent
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Creates an idempotency key
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a payment intent
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(Uuid);

impl PaymentId {
    /// Creates a new random `PaymentId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `PaymentId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference the payment provider uses in its callbacks
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderReference(String);

impl ProviderReference {
    /// Wrap an existing reference
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh reference for a new intent
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("pi_{}", Uuid::new_v4().simple()))
    }

    /// Borrow the reference as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Value Objects
// ============================================================================

/// Money amount in cents
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Error returned when parsing a status string fails
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

// ============================================================================
// Inventory
// ============================================================================

/// Ledger counts of one pool.
///
/// CRITICAL: availability subtracts BOTH `sold` and `reserved`. A pool is
/// consistent only while `sold + reserved <= total`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCounts {
    /// Units that exist for sale
    pub total: u32,
    /// Units sold (monotonically non-decreasing)
    pub sold: u32,
    /// Units held by live reservations
    pub reserved: u32,
}

impl InventoryCounts {
    /// Fresh pool with nothing sold or reserved
    #[must_use]
    pub const fn new(total: u32) -> Self {
        Self {
            total,
            sold: 0,
            reserved: 0,
        }
    }

    /// `total - sold - reserved`, zero when the pool is inconsistent
    #[must_use]
    pub const fn available(&self) -> u32 {
        self.total
            .saturating_sub(self.sold)
            .saturating_sub(self.reserved)
    }

    /// Whether `sold + reserved <= total`
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        (self.sold as u64) + (self.reserved as u64) <= self.total as u64
    }

    /// Whether `quantity` more units can be reserved
    #[must_use]
    pub const fn can_reserve(&self, quantity: u32) -> bool {
        (self.sold as u64) + (self.reserved as u64) + (quantity as u64) <= self.total as u64
    }
}

// ============================================================================
// Holds & Reservations
// ============================================================================

/// A time-bounded claim in the hold store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    /// Token shared with the reservation
    pub token: ReservationToken,
    /// Pool the units were taken from
    pub pool: PoolKey,
    /// Units held
    pub quantity: u32,
    /// When the hold was granted
    pub created_at: DateTime<Utc>,
    /// When the hold lapses on its own
    pub expires_at: DateTime<Utc>,
}

impl Hold {
    /// Whether the hold has lapsed at `now`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Reservation lifecycle status.
///
/// `active` is the only non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Holding inventory, awaiting payment
    Active,
    /// Committed to sold
    Confirmed,
    /// Released by the client or after a failed payment
    Cancelled,
    /// Released by the sweeper (or a late commit) after the TTL
    Expired,
}

impl ReservationStatus {
    /// Whether the status is final
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A reservation owned by the reservation coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Token handed to the client
    pub token: ReservationToken,
    /// Pool the units were reserved from
    pub pool: PoolKey,
    /// Units reserved
    pub quantity: u32,
    /// Client request identity
    pub session_id: SessionId,
    /// Lifecycle status
    pub status: ReservationStatus,
    /// When the reservation was created
    pub created_at: DateTime<Utc>,
    /// When the hold lapses
    pub expires_at: DateTime<Utc>,
    /// When the reservation left `active`
    pub settled_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Build the reservation backing a freshly granted hold
    #[must_use]
    pub fn from_hold(hold: &Hold, session_id: SessionId) -> Self {
        Self {
            token: hold.token,
            pool: hold.pool.clone(),
            quantity: hold.quantity,
            session_id,
            status: ReservationStatus::Active,
            created_at: hold.created_at,
            expires_at: hold.expires_at,
            settled_at: None,
        }
    }

    /// Whether the reservation is `active` but past its expiry
    #[must_use]
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active && self.expires_at <= now
    }

    /// Whether a replayed reserve request asks for the same thing
    #[must_use]
    pub fn matches_request(&self, pool: &PoolKey, quantity: u32) -> bool {
        &self.pool == pool && self.quantity == quantity
    }
}

// ============================================================================
// Payments
// ============================================================================

/// Payment intent status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Submitted, awaiting the provider callback
    Pending,
    /// Provider confirmed the charge
    Succeeded,
    /// Provider rejected the charge
    Failed,
}

impl PaymentStatus {
    /// Whether the status is final
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Payment method, dispatched once when the intent is submitted.
///
/// Carries provider tokens only, never raw card numbers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Tokenized card
    CreditCard {
        /// Provider token
        token: String,
        /// Last four digits for display
        last_four: String,
    },
    /// `PayPal` account
    PayPal {
        /// `PayPal` email
        email: String,
    },
    /// Apple Pay
    ApplePay {
        /// Apple Pay token
        token: String,
    },
}

impl PaymentMethod {
    /// Short name of the method
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CreditCard { .. } => "credit_card",
            Self::PayPal { .. } => "paypal",
            Self::ApplePay { .. } => "apple_pay",
        }
    }

    /// Sanitized description, safe to log
    #[must_use]
    pub fn display_label(&self) -> String {
        match self {
            Self::CreditCard { last_four, .. } => format!("card ending {last_four}"),
            Self::PayPal { email } => format!("paypal {email}"),
            Self::ApplePay { .. } => "apple pay".to_string(),
        }
    }
}

/// Optional customer details forwarded to the provider
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    /// Full name
    pub name: Option<String>,
    /// Email address
    pub email: Option<String>,
}

/// A request to charge for one reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Internal id returned to the client
    pub payment_id: PaymentId,
    /// Client idempotency key (unique)
    pub idempotency_key: IdempotencyKey,
    /// Reservation being paid for
    pub reservation_token: ReservationToken,
    /// Lifecycle status
    pub status: PaymentStatus,
    /// Amount to charge
    pub amount: Money,
    /// How the customer pays
    pub payment_method: PaymentMethod,
    /// Customer details
    pub customer: Customer,
    /// Reference echoed by the provider's callback
    pub provider_reference: ProviderReference,
    /// When the intent was created
    pub created_at: DateTime<Utc>,
    /// When the intent reached a terminal status
    pub settled_at: Option<DateTime<Utc>>,
}

/// Outcome reported by the provider callback
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderOutcome {
    /// Charge captured
    Success,
    /// Charge rejected
    Failure,
}

impl ProviderOutcome {
    /// Intent status this outcome settles to
    #[must_use]
    pub const fn settles_to(self) -> PaymentStatus {
        match self {
            Self::Success => PaymentStatus::Succeeded,
            Self::Failure => PaymentStatus::Failed,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ticket_type_validation() {
        assert!(TicketType::parse("regular").is_ok());
        assert!(TicketType::parse("vip_2-floor").is_ok());
        assert!(TicketType::parse("").is_err());
        assert!(TicketType::parse("has space").is_err());
        assert!(TicketType::parse("a:b").is_err());
        assert!(TicketType::parse("x".repeat(65)).is_err());
    }

    #[test]
    fn test_status_round_trip_through_storage_strings() {
        for status in [
            ReservationStatus::Active,
            ReservationStatus::Confirmed,
            ReservationStatus::Cancelled,
            ReservationStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<ReservationStatus>(), Ok(status));
        }
        assert!("sold".parse::<ReservationStatus>().is_err());
        assert!(ReservationStatus::Expired.is_terminal());
        assert!(!ReservationStatus::Active.is_terminal());
    }

    #[test]
    fn test_payment_method_wire_format() {
        let method: PaymentMethod = serde_json::from_str(
            r#"{"type":"credit_card","token":"tok_visa","last_four":"4242"}"#,
        )
        .unwrap();
        assert_eq!(method.kind(), "credit_card");
        assert_eq!(method.display_label(), "card ending 4242");
    }

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_cents(12_345).to_string(), "123.45");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
    }

    proptest! {
        #[test]
        fn available_never_exceeds_total(total in 0u32..10_000, sold in 0u32..10_000, reserved in 0u32..10_000) {
            let counts = InventoryCounts { total, sold, reserved };
            prop_assert!(counts.available() <= total);
            if counts.is_consistent() {
                prop_assert_eq!(counts.available(), total - sold - reserved);
            }
        }

        #[test]
        fn can_reserve_matches_available(total in 0u32..1_000, sold in 0u32..1_000, reserved in 0u32..1_000, quantity in 1u32..100) {
            let counts = InventoryCounts { total, sold, reserved };
            if counts.is_consistent() {
                prop_assert_eq!(counts.can_reserve(quantity), quantity <= counts.available());
            } else {
                prop_assert!(!counts.can_reserve(quantity));
            }
        }
    }
}
