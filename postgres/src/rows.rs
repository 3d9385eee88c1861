//! Row decoding and column conversions.
//!
//! Money is stored as `BIGINT` cents and stock as `INTEGER`; both are
//! non-negative by schema constraint, so a negative value read back means
//! corrupt data and is reported as a storage error.

use crate::error::{corrupt, map_sqlx};
use chrono::{DateTime, Utc};
use servicehub_core::error::{EngineError, EngineResult};
use servicehub_core::types::{
    ActorId, AuditId, AuditRecord, Booking, BookingId, CustomerId, InventoryEntry,
    InventoryEntryId, InventoryEntryKind, InventoryItem, ItemCode, Money, PartnerId, Wallet,
    WalletEntry, WalletEntryId, WalletEntryKind,
};
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

pub(crate) const BOOKING_COLUMNS: &str = "id, reference, customer_id, partner_id, status, \
     assigned_at, started_at, completed_at, total_amount, commission_amount, \
     created_at, updated_at";

pub(crate) const WALLET_COLUMNS: &str =
    "partner_id, balance_hold, balance_available, total_earned, updated_at";

pub(crate) const WALLET_ENTRY_COLUMNS: &str = "id, partner_id, kind, amount, hold_before, \
     hold_after, available_before, available_after, booking_id, release_date, released, \
     parent_id, created_at";

pub(crate) const ITEM_COLUMNS: &str = "code, name, current_stock, min_stock, unit_cost, updated_at";

pub(crate) const INVENTORY_ENTRY_COLUMNS: &str = "id, item_code, booking_id, kind, quantity, \
     unit_cost, total_cost, stock_before, stock_after, performed_by, note, created_at";

pub(crate) const AUDIT_COLUMNS: &str =
    "id, entity_type, entity_id, action, from_state, to_state, actor, metadata, created_at";

fn get<'r, T>(row: &'r PgRow, column: &str) -> EngineResult<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column).map_err(map_sqlx)
}

fn money(row: &PgRow, column: &str) -> EngineResult<Money> {
    let cents: i64 = get(row, column)?;
    u64::try_from(cents)
        .map(Money::from_cents)
        .map_err(|_| corrupt(column, cents))
}

fn stock(row: &PgRow, column: &str) -> EngineResult<u32> {
    let units: i32 = get(row, column)?;
    u32::try_from(units).map_err(|_| corrupt(column, units))
}

/// Money as a `BIGINT` bind value.
pub(crate) fn cents(amount: Money) -> EngineResult<i64> {
    i64::try_from(amount.cents())
        .map_err(|_| EngineError::InvalidAmount(format!("{amount} exceeds the storable range")))
}

/// Stock as an `INTEGER` bind value.
pub(crate) fn units(stock: u32) -> EngineResult<i32> {
    i32::try_from(stock)
        .map_err(|_| EngineError::InvalidQuantity(format!("{stock} exceeds the storable range")))
}

pub(crate) fn booking(row: &PgRow) -> EngineResult<Booking> {
    Ok(Booking {
        id: BookingId::from_uuid(get(row, "id")?),
        reference: get(row, "reference")?,
        customer_id: CustomerId::from_uuid(get(row, "customer_id")?),
        partner_id: get::<Option<Uuid>>(row, "partner_id")?.map(PartnerId::from_uuid),
        status: get(row, "status")?,
        assigned_at: get(row, "assigned_at")?,
        started_at: get(row, "started_at")?,
        completed_at: get(row, "completed_at")?,
        total_amount: money(row, "total_amount")?,
        commission_amount: money(row, "commission_amount")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

pub(crate) fn wallet(row: &PgRow) -> EngineResult<Wallet> {
    Ok(Wallet {
        partner_id: PartnerId::from_uuid(get(row, "partner_id")?),
        balance_hold: money(row, "balance_hold")?,
        balance_available: money(row, "balance_available")?,
        total_earned: money(row, "total_earned")?,
        updated_at: get(row, "updated_at")?,
    })
}

pub(crate) fn wallet_entry(row: &PgRow) -> EngineResult<WalletEntry> {
    let kind: String = get(row, "kind")?;
    Ok(WalletEntry {
        id: WalletEntryId::from_uuid(get(row, "id")?),
        partner_id: PartnerId::from_uuid(get(row, "partner_id")?),
        kind: WalletEntryKind::parse(&kind).ok_or_else(|| corrupt("kind", &kind))?,
        amount: money(row, "amount")?,
        hold_before: money(row, "hold_before")?,
        hold_after: money(row, "hold_after")?,
        available_before: money(row, "available_before")?,
        available_after: money(row, "available_after")?,
        booking_id: get::<Option<Uuid>>(row, "booking_id")?.map(BookingId::from_uuid),
        release_date: get::<Option<DateTime<Utc>>>(row, "release_date")?,
        released: get(row, "released")?,
        parent_id: get::<Option<Uuid>>(row, "parent_id")?.map(WalletEntryId::from_uuid),
        created_at: get(row, "created_at")?,
    })
}

pub(crate) fn item(row: &PgRow) -> EngineResult<InventoryItem> {
    Ok(InventoryItem {
        code: ItemCode::new(get::<String>(row, "code")?),
        name: get(row, "name")?,
        current_stock: stock(row, "current_stock")?,
        min_stock: stock(row, "min_stock")?,
        unit_cost: money(row, "unit_cost")?,
        updated_at: get(row, "updated_at")?,
    })
}

pub(crate) fn inventory_entry(row: &PgRow) -> EngineResult<InventoryEntry> {
    let kind: String = get(row, "kind")?;
    Ok(InventoryEntry {
        id: InventoryEntryId::from_uuid(get(row, "id")?),
        item_code: ItemCode::new(get::<String>(row, "item_code")?),
        booking_id: get::<Option<Uuid>>(row, "booking_id")?.map(BookingId::from_uuid),
        kind: InventoryEntryKind::parse(&kind).ok_or_else(|| corrupt("kind", &kind))?,
        quantity: get(row, "quantity")?,
        unit_cost: money(row, "unit_cost")?,
        total_cost: money(row, "total_cost")?,
        stock_before: stock(row, "stock_before")?,
        stock_after: stock(row, "stock_after")?,
        performed_by: ActorId::new(get::<String>(row, "performed_by")?),
        note: get(row, "note")?,
        created_at: get(row, "created_at")?,
    })
}

pub(crate) fn audit(row: &PgRow) -> EngineResult<AuditRecord> {
    Ok(AuditRecord {
        id: AuditId::from_uuid(get(row, "id")?),
        entity_type: get(row, "entity_type")?,
        entity_id: get(row, "entity_id")?,
        action: get(row, "action")?,
        from_state: get(row, "from_state")?,
        to_state: get(row, "to_state")?,
        actor: ActorId::new(get::<String>(row, "actor")?),
        metadata: get(row, "metadata")?,
        created_at: get(row, "created_at")?,
    })
}
