//! In-memory ledger store with real unit-of-work semantics.
//!
//! - Row locks are per-key `tokio::sync::Mutex`es held by the unit of work
//!   until it commits or rolls back. Waits are bounded by the store's lock
//!   timeout and fail with [`EngineError::LockTimeout`].
//! - Writes are buffered in the unit of work and applied to the shared tables
//!   in one step on commit. Dropping an uncommitted unit of work discards them.
//! - A unit of work reads its own buffered writes.
//! - Both idempotency keys are enforced at insert time, like the unique
//!   indexes of the `PostgreSQL` schema, and a clash is reported as the
//!   retryable [`EngineError::Transient`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use servicehub_core::error::{EngineError, EngineResult};
use servicehub_core::store::{DueCursor, LedgerStore, UnitOfWork};
use servicehub_core::types::{
    AuditRecord, Booking, BookingId, InventoryEntry, InventoryEntryKind, InventoryItem, ItemCode,
    PartnerId, Wallet, WalletEntry, WalletEntryId, WalletEntryKind,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Default bound on row lock waits.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum RowKey {
    Booking(BookingId),
    Wallet(PartnerId),
    WalletEntry(WalletEntryId),
    Item(ItemCode),
}

#[derive(Default)]
struct Tables {
    bookings: HashMap<BookingId, Booking>,
    wallets: HashMap<PartnerId, Wallet>,
    wallet_entries: Vec<WalletEntry>,
    items: HashMap<ItemCode, InventoryItem>,
    inventory_entries: Vec<InventoryEntry>,
    audit: Vec<AuditRecord>,
}

#[derive(Default)]
struct Shared {
    tables: Mutex<Tables>,
    rows: Mutex<HashMap<RowKey, Arc<AsyncMutex<()>>>>,
}

impl Shared {
    fn tables(&self) -> EngineResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| EngineError::Storage("in-memory tables poisoned".to_string()))
    }

    fn row(&self, key: &RowKey) -> EngineResult<Arc<AsyncMutex<()>>> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| EngineError::Storage("in-memory lock table poisoned".to_string()))?;
        Ok(Arc::clone(rows.entry(key.clone()).or_default()))
    }

    /// Release row locks, then forget rows nobody else holds or waits on.
    fn release(&self, held: HashMap<RowKey, OwnedMutexGuard<()>>) {
        let keys: Vec<RowKey> = held.keys().cloned().collect();
        drop(held);
        if let Ok(mut rows) = self.rows.lock() {
            for key in keys {
                if rows.get(&key).is_some_and(|row| Arc::strong_count(row) == 1) {
                    rows.remove(&key);
                }
            }
        }
    }
}

/// In-memory [`LedgerStore`].
///
/// Cheap to clone; clones share the same tables and locks.
#[derive(Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
    lock_timeout: Duration,
}

impl InMemoryStore {
    /// Empty store with the default lock timeout
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Override the row lock timeout
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Delete a wallet row behind the engine's back (simulates out-of-band corruption).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] if the tables are poisoned.
    pub fn delete_wallet(&self, partner_id: PartnerId) -> EngineResult<Option<Wallet>> {
        Ok(self.shared.tables()?.wallets.remove(&partner_id))
    }

    /// Number of rows with a live lock entry (held or awaited).
    #[must_use]
    pub fn tracked_row_locks(&self) -> usize {
        self.shared.rows.lock().map_or(0, |rows| rows.len())
    }

    /// Every audit record, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] if the tables are poisoned.
    pub fn all_audit_records(&self) -> EngineResult<Vec<AuditRecord>> {
        Ok(self.shared.tables()?.audit.clone())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn begin(&self) -> EngineResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(InMemoryUnitOfWork {
            shared: Arc::clone(&self.shared),
            lock_timeout: self.lock_timeout,
            held: HashMap::new(),
            writes: WriteSet::default(),
        }))
    }

    async fn due_hold_credits(
        &self,
        now: DateTime<Utc>,
        after: Option<DueCursor>,
        limit: usize,
    ) -> EngineResult<Vec<WalletEntry>> {
        let tables = self.shared.tables()?;
        let mut due: Vec<(DueCursor, WalletEntry)> = tables
            .wallet_entries
            .iter()
            .filter(|entry| entry.is_due(now))
            .filter_map(|entry| DueCursor::after(entry).map(|cursor| (cursor, entry.clone())))
            .filter(|(cursor, _)| after.is_none_or(|after| *cursor > after))
            .collect();
        due.sort_by_key(|(cursor, _)| *cursor);
        Ok(due.into_iter().take(limit).map(|(_, entry)| entry).collect())
    }

    async fn booking(&self, id: BookingId) -> EngineResult<Option<Booking>> {
        Ok(self.shared.tables()?.bookings.get(&id).cloned())
    }

    async fn insert_booking(&self, booking: &Booking) -> EngineResult<()> {
        let mut tables = self.shared.tables()?;
        if tables.bookings.contains_key(&booking.id) {
            return Err(EngineError::Storage(format!(
                "booking {} already exists",
                booking.id
            )));
        }
        tables.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn wallet(&self, partner_id: PartnerId) -> EngineResult<Option<Wallet>> {
        Ok(self.shared.tables()?.wallets.get(&partner_id).cloned())
    }

    async fn wallet_entries(&self, partner_id: PartnerId) -> EngineResult<Vec<WalletEntry>> {
        Ok(self
            .shared
            .tables()?
            .wallet_entries
            .iter()
            .filter(|entry| entry.partner_id == partner_id)
            .cloned()
            .collect())
    }

    async fn item(&self, code: &ItemCode) -> EngineResult<Option<InventoryItem>> {
        Ok(self.shared.tables()?.items.get(code).cloned())
    }

    async fn upsert_item(&self, item: &InventoryItem) -> EngineResult<()> {
        self.shared
            .tables()?
            .items
            .insert(item.code.clone(), item.clone());
        Ok(())
    }

    async fn inventory_entries(&self, code: &ItemCode) -> EngineResult<Vec<InventoryEntry>> {
        Ok(self
            .shared
            .tables()?
            .inventory_entries
            .iter()
            .filter(|entry| &entry.item_code == code)
            .cloned()
            .collect())
    }

    async fn audit_records(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> EngineResult<Vec<AuditRecord>> {
        Ok(self
            .shared
            .tables()?
            .audit
            .iter()
            .filter(|record| record.entity_type == entity_type && record.entity_id == entity_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct WriteSet {
    bookings: HashMap<BookingId, Booking>,
    wallets: HashMap<PartnerId, Wallet>,
    wallet_entries: Vec<WalletEntry>,
    released: Vec<WalletEntryId>,
    items: HashMap<ItemCode, InventoryItem>,
    inventory_entries: Vec<InventoryEntry>,
    audit: Vec<AuditRecord>,
}

/// Unit of work over an [`InMemoryStore`].
pub struct InMemoryUnitOfWork {
    shared: Arc<Shared>,
    lock_timeout: Duration,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
    writes: WriteSet,
}

impl InMemoryUnitOfWork {
    async fn acquire(&mut self, key: RowKey) -> EngineResult<()> {
        if self.held.contains_key(&key) {
            return Ok(());
        }
        let row = self.shared.row(&key)?;
        let guard = tokio::time::timeout(self.lock_timeout, row.lock_owned())
            .await
            .map_err(|_| {
                EngineError::LockTimeout(format!(
                    "{key:?} not acquired within {:?}",
                    self.lock_timeout
                ))
            })?;
        self.held.insert(key, guard);
        Ok(())
    }

    fn ensure_held(&self, key: &RowKey) -> EngineResult<()> {
        if self.held.contains_key(key) {
            Ok(())
        } else {
            Err(EngineError::Storage(format!(
                "write to {key:?} without holding its row lock"
            )))
        }
    }

    fn hold_credit_exists(&self, tables: &Tables, booking_id: BookingId) -> Option<WalletEntry> {
        let is_match = |entry: &&WalletEntry| {
            entry.kind == WalletEntryKind::HoldCredit && entry.booking_id == Some(booking_id)
        };
        self.writes
            .wallet_entries
            .iter()
            .find(is_match)
            .or_else(|| tables.wallet_entries.iter().find(is_match))
            .cloned()
    }

    fn consumption_exists(
        &self,
        tables: &Tables,
        booking_id: BookingId,
        code: &ItemCode,
    ) -> Option<InventoryEntry> {
        let is_match = |entry: &&InventoryEntry| {
            entry.kind == InventoryEntryKind::Consumption
                && entry.booking_id == Some(booking_id)
                && &entry.item_code == code
        };
        self.writes
            .inventory_entries
            .iter()
            .find(is_match)
            .or_else(|| tables.inventory_entries.iter().find(is_match))
            .cloned()
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn lock_booking(&mut self, id: BookingId) -> EngineResult<Option<Booking>> {
        self.acquire(RowKey::Booking(id)).await?;
        if let Some(booking) = self.writes.bookings.get(&id) {
            return Ok(Some(booking.clone()));
        }
        Ok(self.shared.tables()?.bookings.get(&id).cloned())
    }

    async fn save_booking(&mut self, booking: &Booking) -> EngineResult<()> {
        self.ensure_held(&RowKey::Booking(booking.id))?;
        self.writes.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn lock_wallet(&mut self, partner_id: PartnerId) -> EngineResult<Option<Wallet>> {
        self.acquire(RowKey::Wallet(partner_id)).await?;
        if let Some(wallet) = self.writes.wallets.get(&partner_id) {
            return Ok(Some(wallet.clone()));
        }
        Ok(self.shared.tables()?.wallets.get(&partner_id).cloned())
    }

    async fn lock_or_create_wallet(
        &mut self,
        partner_id: PartnerId,
        now: DateTime<Utc>,
    ) -> EngineResult<Wallet> {
        if let Some(wallet) = self.lock_wallet(partner_id).await? {
            return Ok(wallet);
        }
        let wallet = Wallet::empty(partner_id, now);
        self.writes.wallets.insert(partner_id, wallet.clone());
        Ok(wallet)
    }

    async fn save_wallet(&mut self, wallet: &Wallet) -> EngineResult<()> {
        self.ensure_held(&RowKey::Wallet(wallet.partner_id))?;
        self.writes.wallets.insert(wallet.partner_id, wallet.clone());
        Ok(())
    }

    async fn find_hold_credit(
        &mut self,
        booking_id: BookingId,
    ) -> EngineResult<Option<WalletEntry>> {
        let tables = self.shared.tables()?;
        Ok(self.hold_credit_exists(&tables, booking_id))
    }

    async fn lock_wallet_entry(&mut self, id: WalletEntryId) -> EngineResult<Option<WalletEntry>> {
        self.acquire(RowKey::WalletEntry(id)).await?;
        let tables = self.shared.tables()?;
        let entry = self
            .writes
            .wallet_entries
            .iter()
            .find(|entry| entry.id == id)
            .or_else(|| tables.wallet_entries.iter().find(|entry| entry.id == id))
            .cloned()
            .map(|mut entry| {
                if self.writes.released.contains(&id) {
                    entry.released = true;
                }
                entry
            });
        Ok(entry)
    }

    async fn insert_wallet_entry(&mut self, entry: &WalletEntry) -> EngineResult<()> {
        if entry.kind == WalletEntryKind::HoldCredit {
            if let Some(booking_id) = entry.booking_id {
                let tables = self.shared.tables()?;
                if self.hold_credit_exists(&tables, booking_id).is_some() {
                    return Err(EngineError::Transient(format!(
                        "duplicate hold_credit for booking {booking_id}"
                    )));
                }
            }
        }
        self.writes.wallet_entries.push(entry.clone());
        Ok(())
    }

    async fn mark_released(&mut self, id: WalletEntryId) -> EngineResult<()> {
        self.ensure_held(&RowKey::WalletEntry(id))?;
        if !self.writes.released.contains(&id) {
            self.writes.released.push(id);
        }
        Ok(())
    }

    async fn lock_item(&mut self, code: &ItemCode) -> EngineResult<Option<InventoryItem>> {
        self.acquire(RowKey::Item(code.clone())).await?;
        if let Some(item) = self.writes.items.get(code) {
            return Ok(Some(item.clone()));
        }
        Ok(self.shared.tables()?.items.get(code).cloned())
    }

    async fn save_item(&mut self, item: &InventoryItem) -> EngineResult<()> {
        self.ensure_held(&RowKey::Item(item.code.clone()))?;
        self.writes.items.insert(item.code.clone(), item.clone());
        Ok(())
    }

    async fn find_consumption(
        &mut self,
        booking_id: BookingId,
        code: &ItemCode,
    ) -> EngineResult<Option<InventoryEntry>> {
        let tables = self.shared.tables()?;
        Ok(self.consumption_exists(&tables, booking_id, code))
    }

    async fn insert_inventory_entry(&mut self, entry: &InventoryEntry) -> EngineResult<()> {
        if entry.kind == InventoryEntryKind::Consumption {
            if let Some(booking_id) = entry.booking_id {
                let tables = self.shared.tables()?;
                if self
                    .consumption_exists(&tables, booking_id, &entry.item_code)
                    .is_some()
                {
                    return Err(EngineError::Transient(format!(
                        "duplicate consumption of {} for booking {booking_id}",
                        entry.item_code
                    )));
                }
            }
        }
        self.writes.inventory_entries.push(entry.clone());
        Ok(())
    }

    async fn append_audit(&mut self, record: &AuditRecord) -> EngineResult<()> {
        self.writes.audit.push(record.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> EngineResult<()> {
        let mut this = *self;
        {
            let mut tables = this.shared.tables()?;
            let writes = std::mem::take(&mut this.writes);
            tables.bookings.extend(writes.bookings);
            tables.wallets.extend(writes.wallets);
            tables.wallet_entries.extend(writes.wallet_entries);
            for id in writes.released {
                if let Some(entry) = tables.wallet_entries.iter_mut().find(|e| e.id == id) {
                    entry.released = true;
                }
            }
            tables.items.extend(writes.items);
            tables.inventory_entries.extend(writes.inventory_entries);
            tables.audit.extend(writes.audit);
        }
        // Row locks are released (on drop) only after the writes are visible.
        drop(this);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> EngineResult<()> {
        drop(self);
        Ok(())
    }
}

impl Drop for InMemoryUnitOfWork {
    fn drop(&mut self) {
        self.shared.release(std::mem::take(&mut self.held));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use servicehub_core::types::{CustomerId, Money};

    fn booking() -> Booking {
        Booking::new(
            "BK-1",
            CustomerId::new(),
            Money::from_major(100),
            Money::from_major(10),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible() {
        let store = InMemoryStore::new();
        let partner = PartnerId::new();

        let mut uow = store.begin().await.unwrap();
        let mut wallet = uow.lock_or_create_wallet(partner, Utc::now()).await.unwrap();
        wallet.balance_hold = Money::from_major(5);
        uow.save_wallet(&wallet).await.unwrap();
        assert!(store.wallet(partner).await.unwrap().is_none());

        uow.rollback().await.unwrap();
        assert!(store.wallet(partner).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn committed_writes_are_visible() {
        let store = InMemoryStore::new();
        let original = booking();
        store.insert_booking(&original).await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let mut locked = uow.lock_booking(original.id).await.unwrap().unwrap();
        locked.status = "ASSIGNED".to_string();
        uow.save_booking(&locked).await.unwrap();
        uow.commit().await.unwrap();

        let stored = store.booking(original.id).await.unwrap().unwrap();
        assert_eq!(stored.status, "ASSIGNED");
    }

    #[tokio::test]
    async fn second_locker_times_out() {
        let store = InMemoryStore::new().with_lock_timeout(Duration::from_millis(50));
        let original = booking();
        store.insert_booking(&original).await.unwrap();

        let mut first = store.begin().await.unwrap();
        first.lock_booking(original.id).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let err = second.lock_booking(original.id).await.unwrap_err();
        assert!(matches!(err, EngineError::LockTimeout(_)));

        drop(first);
        assert!(second.lock_booking(original.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn released_rows_leave_the_lock_table() {
        let store = InMemoryStore::new();
        let original = booking();
        store.insert_booking(&original).await.unwrap();

        let mut uow = store.begin().await.unwrap();
        uow.lock_booking(original.id).await.unwrap();
        uow.lock_wallet(PartnerId::new()).await.unwrap();
        assert_eq!(store.tracked_row_locks(), 2);
        uow.commit().await.unwrap();
        assert_eq!(store.tracked_row_locks(), 0);

        let mut uow = store.begin().await.unwrap();
        uow.lock_booking(original.id).await.unwrap();
        drop(uow);
        assert_eq!(store.tracked_row_locks(), 0);
    }

    #[tokio::test]
    async fn writes_require_the_row_lock() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let err = uow.save_booking(&booking()).await.unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
    }
}
