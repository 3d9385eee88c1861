//! `PostgreSQL` ledger store for the ServiceHub transaction engine.
//!
//! - Every unit of work is one transaction. Row locks are `SELECT … FOR UPDATE`,
//!   bounded by `SET LOCAL lock_timeout`; runaway statements are bounded by
//!   `SET LOCAL statement_timeout`.
//! - Both ledger idempotency keys are backed by unique partial indexes
//!   (see `migrations/0001_booking_ledger.sql`).
//! - Dropping an uncommitted [`PgUnitOfWork`] rolls the transaction back.
//!
//! # Example
//!
//! ```no_run
//! use servicehub_postgres::PgLedgerStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PgLedgerStore::connect("postgres://localhost/servicehub", 10).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod rows;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rows::{cents, units};
use servicehub_core::config::EngineConfig;
use servicehub_core::error::{EngineError, EngineResult};
use servicehub_core::store::{DueCursor, LedgerStore, UnitOfWork};
use servicehub_core::types::{
    AuditRecord, Booking, BookingId, InventoryEntry, InventoryItem, ItemCode, PartnerId, Wallet,
    WalletEntry, WalletEntryId, WalletEntryKind,
};
use sqlx::postgres::{PgPoolOptions, PgQueryResult};
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;

use error::map_sqlx;

/// Schema applied by [`PgLedgerStore::migrate`].
pub const SCHEMA: &str = include_str!("../migrations/0001_booking_ledger.sql");

/// [`LedgerStore`] backed by a `PostgreSQL` pool.
#[derive(Clone, Debug)]
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout: Duration,
    statement_timeout: Duration,
}

impl PgLedgerStore {
    /// Wrap an existing pool with default timeouts (2s lock, 5s statement).
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: Duration::from_millis(2_000),
            statement_timeout: Duration::from_millis(5_000),
        }
    }

    /// Override the per-transaction lock and statement timeouts.
    #[must_use]
    pub const fn with_timeouts(
        mut self,
        lock_timeout: Duration,
        statement_timeout: Duration,
    ) -> Self {
        self.lock_timeout = lock_timeout;
        self.statement_timeout = statement_timeout;
        self
    }

    /// Connect a new pool.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(map_sqlx)?;
        Ok(Self::from_pool(pool))
    }

    /// Connect using the engine configuration (URL, pool size, timeouts).
    ///
    /// # Errors
    ///
    /// Returns a storage error if the database is unreachable.
    pub async fn from_config(config: &EngineConfig) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.database_url)
            .await
            .map_err(map_sqlx)?;
        Ok(Self::from_pool(pool).with_timeouts(config.lock_timeout(), config.statement_timeout()))
    }

    /// Apply the schema. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a statement fails.
    pub async fn migrate(&self) -> EngineResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        tracing::info!("Ledger schema applied");
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> EngineResult<Box<dyn UnitOfWork>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        // SET LOCAL takes no bind parameters; both values are integers.
        let timeouts = format!(
            "SET LOCAL lock_timeout = '{}ms'; SET LOCAL statement_timeout = '{}ms'",
            self.lock_timeout.as_millis(),
            self.statement_timeout.as_millis()
        );
        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(&timeouts))
            .await
            .map_err(map_sqlx)?;

        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn due_hold_credits(
        &self,
        now: DateTime<Utc>,
        after: Option<DueCursor>,
        limit: usize,
    ) -> EngineResult<Vec<WalletEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let fetched = sqlx::query(&format!(
            "SELECT {} FROM wallet_entries \
             WHERE kind = 'hold_credit' AND released = FALSE AND release_date <= $1 \
             AND ($2::timestamptz IS NULL OR (release_date, created_at, id) > ($2, $3, $4)) \
             ORDER BY release_date, created_at, id LIMIT $5",
            rows::WALLET_ENTRY_COLUMNS
        ))
        .bind(now)
        .bind(after.map(|cursor| cursor.release_date))
        .bind(after.map(|cursor| cursor.created_at))
        .bind(after.map(|cursor| *cursor.id.as_uuid()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        fetched.iter().map(rows::wallet_entry).collect()
    }

    async fn booking(&self, id: BookingId) -> EngineResult<Option<Booking>> {
        sqlx::query(&format!(
            "SELECT {} FROM bookings WHERE id = $1",
            rows::BOOKING_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .as_ref()
        .map(rows::booking)
        .transpose()
    }

    async fn insert_booking(&self, booking: &Booking) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO bookings (id, reference, customer_id, partner_id, status, assigned_at, \
             started_at, completed_at, total_amount, commission_amount, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(booking.id.as_uuid())
        .bind(&booking.reference)
        .bind(booking.customer_id.as_uuid())
        .bind(booking.partner_id.as_ref().map(PartnerId::as_uuid))
        .bind(&booking.status)
        .bind(booking.assigned_at)
        .bind(booking.started_at)
        .bind(booking.completed_at)
        .bind(cents(booking.total_amount)?)
        .bind(cents(booking.commission_amount)?)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn wallet(&self, partner_id: PartnerId) -> EngineResult<Option<Wallet>> {
        sqlx::query(&format!(
            "SELECT {} FROM partner_wallets WHERE partner_id = $1",
            rows::WALLET_COLUMNS
        ))
        .bind(partner_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .as_ref()
        .map(rows::wallet)
        .transpose()
    }

    async fn wallet_entries(&self, partner_id: PartnerId) -> EngineResult<Vec<WalletEntry>> {
        let fetched = sqlx::query(&format!(
            "SELECT {} FROM wallet_entries WHERE partner_id = $1 ORDER BY created_at, id",
            rows::WALLET_ENTRY_COLUMNS
        ))
        .bind(partner_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        fetched.iter().map(rows::wallet_entry).collect()
    }

    async fn item(&self, code: &ItemCode) -> EngineResult<Option<InventoryItem>> {
        sqlx::query(&format!(
            "SELECT {} FROM inventory_items WHERE code = $1",
            rows::ITEM_COLUMNS
        ))
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .as_ref()
        .map(rows::item)
        .transpose()
    }

    async fn upsert_item(&self, item: &InventoryItem) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO inventory_items \
             (code, name, current_stock, min_stock, unit_cost, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (code) DO UPDATE SET name = EXCLUDED.name, \
             current_stock = EXCLUDED.current_stock, min_stock = EXCLUDED.min_stock, \
             unit_cost = EXCLUDED.unit_cost, updated_at = EXCLUDED.updated_at",
        )
        .bind(item.code.as_str())
        .bind(&item.name)
        .bind(units(item.current_stock)?)
        .bind(units(item.min_stock)?)
        .bind(cents(item.unit_cost)?)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn inventory_entries(&self, code: &ItemCode) -> EngineResult<Vec<InventoryEntry>> {
        let fetched = sqlx::query(&format!(
            "SELECT {} FROM inventory_entries WHERE item_code = $1 ORDER BY created_at, id",
            rows::INVENTORY_ENTRY_COLUMNS
        ))
        .bind(code.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        fetched.iter().map(rows::inventory_entry).collect()
    }

    async fn audit_records(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> EngineResult<Vec<AuditRecord>> {
        let fetched = sqlx::query(&format!(
            "SELECT {} FROM audit_log WHERE entity_type = $1 AND entity_id = $2 \
             ORDER BY created_at, id",
            rows::AUDIT_COLUMNS
        ))
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        fetched.iter().map(rows::audit).collect()
    }
}

/// One `PostgreSQL` transaction.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

/// An `UPDATE` that matched no row means the row vanished under us.
fn expect_one_row(
    result: Result<PgQueryResult, sqlx::Error>,
    entity: &'static str,
    id: impl ToString,
) -> EngineResult<()> {
    if result.map_err(map_sqlx)?.rows_affected() == 0 {
        return Err(EngineError::not_found(entity, id));
    }
    Ok(())
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_booking(&mut self, id: BookingId) -> EngineResult<Option<Booking>> {
        sqlx::query(&format!(
            "SELECT {} FROM bookings WHERE id = $1 FOR UPDATE",
            rows::BOOKING_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .as_ref()
        .map(rows::booking)
        .transpose()
    }

    async fn save_booking(&mut self, booking: &Booking) -> EngineResult<()> {
        let result = sqlx::query(
            "UPDATE bookings SET partner_id = $2, status = $3, assigned_at = $4, started_at = $5, \
             completed_at = $6, total_amount = $7, commission_amount = $8, updated_at = $9 \
             WHERE id = $1",
        )
        .bind(booking.id.as_uuid())
        .bind(booking.partner_id.as_ref().map(PartnerId::as_uuid))
        .bind(&booking.status)
        .bind(booking.assigned_at)
        .bind(booking.started_at)
        .bind(booking.completed_at)
        .bind(cents(booking.total_amount)?)
        .bind(cents(booking.commission_amount)?)
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await;
        expect_one_row(result, "booking", booking.id)
    }

    async fn lock_wallet(&mut self, partner_id: PartnerId) -> EngineResult<Option<Wallet>> {
        sqlx::query(&format!(
            "SELECT {} FROM partner_wallets WHERE partner_id = $1 FOR UPDATE",
            rows::WALLET_COLUMNS
        ))
        .bind(partner_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .as_ref()
        .map(rows::wallet)
        .transpose()
    }

    async fn lock_or_create_wallet(
        &mut self,
        partner_id: PartnerId,
        now: DateTime<Utc>,
    ) -> EngineResult<Wallet> {
        // Two first credits for one partner race on the insert; the loser
        // waits on the winner's row and then locks it.
        sqlx::query(
            "INSERT INTO partner_wallets (partner_id, updated_at) VALUES ($1, $2) \
             ON CONFLICT (partner_id) DO NOTHING",
        )
        .bind(partner_id.as_uuid())
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        self.lock_wallet(partner_id)
            .await?
            .ok_or_else(|| EngineError::not_found("wallet", partner_id))
    }

    async fn save_wallet(&mut self, wallet: &Wallet) -> EngineResult<()> {
        let result = sqlx::query(
            "UPDATE partner_wallets SET balance_hold = $2, balance_available = $3, \
             total_earned = $4, updated_at = $5 WHERE partner_id = $1",
        )
        .bind(wallet.partner_id.as_uuid())
        .bind(cents(wallet.balance_hold)?)
        .bind(cents(wallet.balance_available)?)
        .bind(cents(wallet.total_earned)?)
        .bind(wallet.updated_at)
        .execute(&mut *self.tx)
        .await;
        expect_one_row(result, "wallet", wallet.partner_id)
    }

    async fn find_hold_credit(
        &mut self,
        booking_id: BookingId,
    ) -> EngineResult<Option<WalletEntry>> {
        sqlx::query(&format!(
            "SELECT {} FROM wallet_entries WHERE booking_id = $1 AND kind = $2",
            rows::WALLET_ENTRY_COLUMNS
        ))
        .bind(booking_id.as_uuid())
        .bind(WalletEntryKind::HoldCredit.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .as_ref()
        .map(rows::wallet_entry)
        .transpose()
    }

    async fn lock_wallet_entry(&mut self, id: WalletEntryId) -> EngineResult<Option<WalletEntry>> {
        sqlx::query(&format!(
            "SELECT {} FROM wallet_entries WHERE id = $1 FOR UPDATE",
            rows::WALLET_ENTRY_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .as_ref()
        .map(rows::wallet_entry)
        .transpose()
    }

    async fn insert_wallet_entry(&mut self, entry: &WalletEntry) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO wallet_entries (id, partner_id, kind, amount, hold_before, hold_after, \
             available_before, available_after, booking_id, release_date, released, parent_id, \
             created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(entry.id.as_uuid())
        .bind(entry.partner_id.as_uuid())
        .bind(entry.kind.as_str())
        .bind(cents(entry.amount)?)
        .bind(cents(entry.hold_before)?)
        .bind(cents(entry.hold_after)?)
        .bind(cents(entry.available_before)?)
        .bind(cents(entry.available_after)?)
        .bind(entry.booking_id.as_ref().map(BookingId::as_uuid))
        .bind(entry.release_date)
        .bind(entry.released)
        .bind(entry.parent_id.as_ref().map(WalletEntryId::as_uuid))
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn mark_released(&mut self, id: WalletEntryId) -> EngineResult<()> {
        let result = sqlx::query("UPDATE wallet_entries SET released = TRUE WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await;
        expect_one_row(result, "wallet_entry", id)
    }

    async fn lock_item(&mut self, code: &ItemCode) -> EngineResult<Option<InventoryItem>> {
        sqlx::query(&format!(
            "SELECT {} FROM inventory_items WHERE code = $1 FOR UPDATE",
            rows::ITEM_COLUMNS
        ))
        .bind(code.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .as_ref()
        .map(rows::item)
        .transpose()
    }

    async fn save_item(&mut self, item: &InventoryItem) -> EngineResult<()> {
        let result = sqlx::query(
            "UPDATE inventory_items SET name = $2, current_stock = $3, min_stock = $4, \
             unit_cost = $5, updated_at = $6 WHERE code = $1",
        )
        .bind(item.code.as_str())
        .bind(&item.name)
        .bind(units(item.current_stock)?)
        .bind(units(item.min_stock)?)
        .bind(cents(item.unit_cost)?)
        .bind(item.updated_at)
        .execute(&mut *self.tx)
        .await;
        expect_one_row(result, "inventory_item", &item.code)
    }

    async fn find_consumption(
        &mut self,
        booking_id: BookingId,
        code: &ItemCode,
    ) -> EngineResult<Option<InventoryEntry>> {
        sqlx::query(&format!(
            "SELECT {} FROM inventory_entries \
             WHERE booking_id = $1 AND item_code = $2 AND kind = 'consumption'",
            rows::INVENTORY_ENTRY_COLUMNS
        ))
        .bind(booking_id.as_uuid())
        .bind(code.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .as_ref()
        .map(rows::inventory_entry)
        .transpose()
    }

    async fn insert_inventory_entry(&mut self, entry: &InventoryEntry) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO inventory_entries (id, item_code, booking_id, kind, quantity, unit_cost, \
             total_cost, stock_before, stock_after, performed_by, note, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(entry.id.as_uuid())
        .bind(entry.item_code.as_str())
        .bind(entry.booking_id.as_ref().map(BookingId::as_uuid))
        .bind(entry.kind.as_str())
        .bind(entry.quantity)
        .bind(cents(entry.unit_cost)?)
        .bind(cents(entry.total_cost)?)
        .bind(units(entry.stock_before)?)
        .bind(units(entry.stock_after)?)
        .bind(entry.performed_by.as_str())
        .bind(entry.note.as_deref())
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn append_audit(&mut self, record: &AuditRecord) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO audit_log (id, entity_type, entity_id, action, from_state, to_state, \
             actor, metadata, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(record.id.as_uuid())
        .bind(&record.entity_type)
        .bind(&record.entity_id)
        .bind(&record.action)
        .bind(record.from_state.as_deref())
        .bind(record.to_state.as_deref())
        .bind(record.actor.as_str())
        .bind(&record.metadata)
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> EngineResult<()> {
        self.tx.commit().await.map_err(map_sqlx)
    }

    async fn rollback(self: Box<Self>) -> EngineResult<()> {
        self.tx.rollback().await.map_err(map_sqlx)
    }
}
