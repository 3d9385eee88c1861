//! Store abstraction and the explicit unit of work.
//!
//! Every ledger-affecting function takes a `&mut dyn UnitOfWork` parameter,
//! so the boundary of atomicity is visible in its signature. Nothing reaches
//! for an ambient transaction.
//!
//! # Locking
//!
//! The `lock_*` methods acquire an exclusive row lock *before* reading, held
//! until [`UnitOfWork::commit`] or [`UnitOfWork::rollback`]. Lock waits are
//! bounded; a wait that exceeds the store's timeout fails with
//! [`crate::EngineError::LockTimeout`], which callers may retry as-is.
//!
//! Dropping a unit of work without committing rolls it back.
//!
//! # Implementations
//!
//! - `InMemoryStore` (in `servicehub-testing`): per-row async mutexes and a
//!   buffered write set, for tests and local runs
//! - `PgLedgerStore` (in `servicehub-postgres`): `SELECT … FOR UPDATE` inside
//!   a `PostgreSQL` transaction

use crate::error::EngineResult;
use crate::types::{
    AuditRecord, Booking, BookingId, InventoryEntry, InventoryItem, ItemCode, PartnerId, Wallet,
    WalletEntry, WalletEntryId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Position in the due-credit ordering `(release_date, created_at, id)`.
///
/// The release sweep pages with it, so entries that keep failing do not
/// hide the ones behind them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct DueCursor {
    /// Release date of the last entry seen
    pub release_date: DateTime<Utc>,
    /// Creation time of the last entry seen
    pub created_at: DateTime<Utc>,
    /// Id of the last entry seen
    pub id: WalletEntryId,
}

impl DueCursor {
    /// Cursor positioned on `entry`. `None` for an entry without a release date.
    #[must_use]
    pub fn after(entry: &WalletEntry) -> Option<Self> {
        Some(Self {
            release_date: entry.release_date?,
            created_at: entry.created_at,
            id: entry.id,
        })
    }
}

/// One atomic scope of reads and writes.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Lock and read a booking.
    async fn lock_booking(&mut self, id: BookingId) -> EngineResult<Option<Booking>>;

    /// Write a booking previously read through [`UnitOfWork::lock_booking`].
    async fn save_booking(&mut self, booking: &Booking) -> EngineResult<()>;

    /// Lock and read a partner's wallet, `None` if the partner has none.
    async fn lock_wallet(&mut self, partner_id: PartnerId) -> EngineResult<Option<Wallet>>;

    /// Lock a partner's wallet, creating an empty one first if missing.
    ///
    /// Concurrent creators serialize: exactly one row is created and every
    /// caller ends up holding the lock on it in turn.
    async fn lock_or_create_wallet(
        &mut self,
        partner_id: PartnerId,
        now: DateTime<Utc>,
    ) -> EngineResult<Wallet>;

    /// Write a wallet previously locked in this unit of work.
    async fn save_wallet(&mut self, wallet: &Wallet) -> EngineResult<()>;

    /// The `hold_credit` entry for a booking, if one exists (idempotency key).
    async fn find_hold_credit(
        &mut self,
        booking_id: BookingId,
    ) -> EngineResult<Option<WalletEntry>>;

    /// Lock and read a wallet entry.
    async fn lock_wallet_entry(&mut self, id: WalletEntryId) -> EngineResult<Option<WalletEntry>>;

    /// Append a wallet ledger entry.
    async fn insert_wallet_entry(&mut self, entry: &WalletEntry) -> EngineResult<()>;

    /// Flag a hold credit as released.
    async fn mark_released(&mut self, id: WalletEntryId) -> EngineResult<()>;

    /// Lock and read an inventory item.
    async fn lock_item(&mut self, code: &ItemCode) -> EngineResult<Option<InventoryItem>>;

    /// Write an inventory item previously locked in this unit of work.
    async fn save_item(&mut self, item: &InventoryItem) -> EngineResult<()>;

    /// The `consumption` entry for `(booking, item)`, if one exists (idempotency key).
    async fn find_consumption(
        &mut self,
        booking_id: BookingId,
        code: &ItemCode,
    ) -> EngineResult<Option<InventoryEntry>>;

    /// Append an inventory ledger entry.
    async fn insert_inventory_entry(&mut self, entry: &InventoryEntry) -> EngineResult<()>;

    /// Append an audit record.
    async fn append_audit(&mut self, record: &AuditRecord) -> EngineResult<()>;

    /// Make every write visible and release every lock.
    async fn commit(self: Box<Self>) -> EngineResult<()>;

    /// Discard every write and release every lock.
    async fn rollback(self: Box<Self>) -> EngineResult<()>;
}

/// Persistent store for bookings and ledgers.
///
/// Reads here take no locks and may be slightly stale. They serve
/// dashboards, the release sweep's candidate selection and tests.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a new unit of work.
    async fn begin(&self) -> EngineResult<Box<dyn UnitOfWork>>;

    /// Unreleased hold credits with `release_date ≤ now`, ordered by
    /// `(release_date, created_at, id)` and strictly after `after` when given,
    /// at most `limit`.
    async fn due_hold_credits(
        &self,
        now: DateTime<Utc>,
        after: Option<DueCursor>,
        limit: usize,
    ) -> EngineResult<Vec<WalletEntry>>;

    /// Read a booking.
    async fn booking(&self, id: BookingId) -> EngineResult<Option<Booking>>;

    /// Store a new booking. Used by booking intake, never by the engine.
    async fn insert_booking(&self, booking: &Booking) -> EngineResult<()>;

    /// Read a wallet.
    async fn wallet(&self, partner_id: PartnerId) -> EngineResult<Option<Wallet>>;

    /// Wallet ledger entries for a partner, oldest first.
    async fn wallet_entries(&self, partner_id: PartnerId) -> EngineResult<Vec<WalletEntry>>;

    /// Read an inventory item.
    async fn item(&self, code: &ItemCode) -> EngineResult<Option<InventoryItem>>;

    /// Create or replace catalog data for an item. Stock changes go through the ledger.
    async fn upsert_item(&self, item: &InventoryItem) -> EngineResult<()>;

    /// Inventory ledger entries for an item, oldest first.
    async fn inventory_entries(&self, code: &ItemCode) -> EngineResult<Vec<InventoryEntry>>;

    /// Audit records for an entity, oldest first.
    async fn audit_records(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> EngineResult<Vec<AuditRecord>>;
}
