//! Domain types for bookings, partner wallets, inventory and the audit trail.
//!
//! Money is stored in integer minor units (cents) to avoid floating point
//! drift. Ledger entries are immutable once written; the only mutable flag is
//! [`WalletEntry::released`], which flips exactly once.

use crate::legacy;
use crate::state::BookingState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from a UUID
            #[must_use]
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Returns the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a service booking
    BookingId
);
uuid_id!(
    /// Unique identifier for a partner (technician)
    PartnerId
);
uuid_id!(
    /// Unique identifier for a customer
    CustomerId
);
uuid_id!(
    /// Unique identifier for a wallet ledger entry
    WalletEntryId
);
uuid_id!(
    /// Unique identifier for an inventory ledger entry
    InventoryEntryId
);
uuid_id!(
    /// Unique identifier for an audit record
    AuditId
);

/// Stock-keeping code of an inventory item (e.g. `FILTER-10`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemCode(String);

impl ItemCode {
    /// Creates an item code
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the code as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whoever requested a mutation: a user id, `system`, `scheduler`, ...
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    /// Creates an actor identifier
    #[must_use]
    pub fn new(actor: impl Into<String>) -> Self {
        Self(actor.into())
    }

    /// The actor used by background jobs
    #[must_use]
    pub fn system() -> Self {
        Self("system".to_string())
    }

    /// Returns the identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Money
// ============================================================================

/// Non-negative money amount in cents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` amount from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` amount from whole currency units
    #[must_use]
    pub const fn from_major(units: u64) -> Self {
        Self(units * 100)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if this amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Addition that fails on overflow
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Subtraction that fails instead of going negative
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Multiplication by a whole quantity
    #[must_use]
    pub const fn checked_mul(self, quantity: u64) -> Option<Self> {
        match self.0.checked_mul(quantity) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Share of this amount expressed in basis points (1/100 of a percent),
    /// rounded half up to the nearest cent.
    #[must_use]
    pub fn share_bps(self, bps: u32) -> Self {
        let scaled = u128::from(self.0) * u128::from(bps);
        let cents = (scaled + 5_000) / 10_000;
        Self(u64::try_from(cents).unwrap_or(u64::MAX))
    }

    /// Parse a decimal amount in major units (`"250"`, `"125.5"`, `"99.99"`).
    ///
    /// Returns `None` for negative values, more than two decimals or garbage.
    #[must_use]
    pub fn parse_major(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (whole, frac) = raw.split_once('.').unwrap_or((raw, ""));
        if whole.is_empty() || frac.len() > 2 || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let whole: u64 = whole.parse().ok()?;
        let frac: u64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<u64>().ok()? * 10,
            _ => frac.parse().ok()?,
        };
        whole.checked_mul(100)?.checked_add(frac).map(Self)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Booking
// ============================================================================

/// A service request moving through the booking lifecycle.
///
/// `status` holds the *persisted* representation, which may be canonical or
/// legacy. Use [`Booking::state`] for the canonical view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking identifier
    pub id: BookingId,
    /// Human-readable reference code (e.g. `BK-20250101-0042`)
    pub reference: String,
    /// Customer who booked the service
    pub customer_id: CustomerId,
    /// Assigned partner, `None` until assignment
    pub partner_id: Option<PartnerId>,
    /// Persisted status (canonical or legacy name)
    pub status: String,
    /// When a partner was assigned
    pub assigned_at: Option<DateTime<Utc>>,
    /// When work started on-site
    pub started_at: Option<DateTime<Utc>>,
    /// When work was completed
    pub completed_at: Option<DateTime<Utc>>,
    /// Total amount charged to the customer
    pub total_amount: Money,
    /// Platform commission on this booking
    pub commission_amount: Money,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Creates a booking in the initial `CREATED` state.
    #[must_use]
    pub fn new(
        reference: impl Into<String>,
        customer_id: CustomerId,
        total_amount: Money,
        commission_amount: Money,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: BookingId::new(),
            reference: reference.into(),
            customer_id,
            partner_id: None,
            status: BookingState::Created.as_str().to_string(),
            assigned_at: None,
            started_at: None,
            completed_at: None,
            total_amount,
            commission_amount,
            created_at: now,
            updated_at: now,
        }
    }

    /// Canonical view of the persisted status.
    #[must_use]
    pub fn state(&self) -> BookingState {
        legacy::to_canonical(&self.status)
    }
}

// ============================================================================
// Wallet
// ============================================================================

/// A partner's earnings wallet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Owning partner
    pub partner_id: PartnerId,
    /// Earnings pending their maturation window
    pub balance_hold: Money,
    /// Withdrawable earnings
    pub balance_available: Money,
    /// Lifetime earnings, never decreases
    pub total_earned: Money,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// An empty wallet for a partner.
    #[must_use]
    pub const fn empty(partner_id: PartnerId, now: DateTime<Utc>) -> Self {
        Self {
            partner_id,
            balance_hold: Money::ZERO,
            balance_available: Money::ZERO,
            total_earned: Money::ZERO,
            updated_at: now,
        }
    }
}

/// Kind of wallet ledger entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletEntryKind {
    /// Earnings credited into the hold balance
    HoldCredit,
    /// A matured hold credit moved to the available balance
    Release,
}

impl WalletEntryKind {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::HoldCredit => "hold_credit",
            Self::Release => "release",
        }
    }

    /// Parse from the database string.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "hold_credit" => Some(Self::HoldCredit),
            "release" => Some(Self::Release),
            _ => None,
        }
    }
}

/// Immutable record of one wallet mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletEntry {
    /// Entry identifier
    pub id: WalletEntryId,
    /// Wallet owner
    pub partner_id: PartnerId,
    /// Entry kind
    pub kind: WalletEntryKind,
    /// Amount moved
    pub amount: Money,
    /// Hold balance before the mutation
    pub hold_before: Money,
    /// Hold balance after the mutation
    pub hold_after: Money,
    /// Available balance before the mutation
    pub available_before: Money,
    /// Available balance after the mutation
    pub available_after: Money,
    /// Originating booking, if any
    pub booking_id: Option<BookingId>,
    /// When a hold credit matures
    pub release_date: Option<DateTime<Utc>>,
    /// Whether a hold credit has been released
    pub released: bool,
    /// For `release` entries, the hold credit being released
    pub parent_id: Option<WalletEntryId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl WalletEntry {
    /// Whether this is an unreleased hold credit due at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.kind == WalletEntryKind::HoldCredit
            && !self.released
            && self.release_date.is_some_and(|date| date <= now)
    }
}

// ============================================================================
// Inventory
// ============================================================================

/// A stocked consumable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Stock-keeping code
    pub code: ItemCode,
    /// Display name
    pub name: String,
    /// Units on hand
    pub current_stock: u32,
    /// Threshold at or below which a low-stock alert fires
    pub min_stock: u32,
    /// Current unit cost
    pub unit_cost: Money,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    /// Whether stock is at or below the minimum threshold.
    #[must_use]
    pub const fn is_low(&self) -> bool {
        self.current_stock <= self.min_stock
    }
}

/// Kind of inventory ledger entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryEntryKind {
    /// Stock used by a booking
    Consumption,
    /// Stock received
    Restock,
    /// Manual correction
    Adjustment,
}

impl InventoryEntryKind {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Consumption => "consumption",
            Self::Restock => "restock",
            Self::Adjustment => "adjustment",
        }
    }

    /// Parse from the database string.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "consumption" => Some(Self::Consumption),
            "restock" => Some(Self::Restock),
            "adjustment" => Some(Self::Adjustment),
            _ => None,
        }
    }
}

/// Immutable record of one stock mutation.
///
/// `unit_cost` is the price at the time of the mutation, so the profitability
/// of a completed booking can be reconstructed after prices change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    /// Entry identifier
    pub id: InventoryEntryId,
    /// Item affected
    pub item_code: ItemCode,
    /// Booking that consumed the stock, if any
    pub booking_id: Option<BookingId>,
    /// Entry kind
    pub kind: InventoryEntryKind,
    /// Signed quantity: negative for consumption
    pub quantity: i64,
    /// Unit cost snapshot
    pub unit_cost: Money,
    /// `unit_cost × |quantity|` snapshot
    pub total_cost: Money,
    /// Stock before the mutation
    pub stock_before: u32,
    /// Stock after the mutation
    pub stock_after: u32,
    /// Who performed the mutation
    pub performed_by: ActorId,
    /// Optional free-form reason
    pub note: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// One line of an inventory consumption request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionLine {
    /// Item to consume
    pub item_code: ItemCode,
    /// Units to consume, must be positive
    pub quantity: u32,
}

impl ConsumptionLine {
    /// Creates a consumption line
    #[must_use]
    pub fn new(item_code: impl Into<String>, quantity: u32) -> Self {
        Self {
            item_code: ItemCode::new(item_code),
            quantity,
        }
    }
}

/// Emitted when stock falls to or below its minimum threshold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlert {
    /// Item affected
    pub item_code: ItemCode,
    /// Stock after the mutation
    pub current_stock: u32,
    /// Configured threshold
    pub min_stock: u32,
    /// Booking that triggered the alert, if any
    pub booking_id: Option<BookingId>,
}

// ============================================================================
// Audit
// ============================================================================

/// Append-only audit log record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Record identifier
    pub id: AuditId,
    /// Entity type (`booking`)
    pub entity_type: String,
    /// Entity identifier
    pub entity_id: String,
    /// Action name (`booking.transition`)
    pub action: String,
    /// Canonical state before
    pub from_state: Option<String>,
    /// Canonical state after
    pub to_state: Option<String>,
    /// Who requested the action
    pub actor: ActorId,
    /// Free-form structured metadata
    pub metadata: serde_json::Value,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Outcome
// ============================================================================

/// Result of an idempotent ledger operation.
///
/// Repeating an operation is not an error: the prior result comes back as
/// [`Outcome::AlreadyProcessed`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The operation ran and wrote new records.
    Applied(T),
    /// The idempotency key was already present; the prior record is returned unchanged.
    AlreadyProcessed(T),
    /// The operation does not apply to the target (e.g. releasing a non-hold entry).
    Ignored(T),
}

impl<T> Outcome<T> {
    /// Whether new records were written.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    /// The carried value, regardless of variant.
    #[must_use]
    pub fn into_inner(self) -> T {
        match self {
            Self::Applied(value) | Self::AlreadyProcessed(value) | Self::Ignored(value) => value,
        }
    }

    /// Borrow the carried value.
    #[must_use]
    pub const fn value(&self) -> &T {
        match self {
            Self::Applied(value) | Self::AlreadyProcessed(value) | Self::Ignored(value) => value,
        }
    }
}
