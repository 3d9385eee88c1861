//! Inventory ledger: stock consumption by bookings, restocks and manual
//! adjustments.
//!
//! Items are locked in code order so two units of work consuming overlapping
//! item sets cannot deadlock. Low-stock alerts are collected, never emitted
//! here: the caller emits them once its unit of work has committed.

use servicehub_core::environment::Clock;
use servicehub_core::error::{EngineError, EngineResult};
use servicehub_core::store::UnitOfWork;
use servicehub_core::types::{
    ActorId, BookingId, ConsumptionLine, InventoryEntry, InventoryEntryId, InventoryEntryKind,
    InventoryItem, ItemCode, LowStockAlert, Money, Outcome,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a deduction did, line by line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeductionReport {
    /// One outcome per distinct item code, in code order
    pub entries: Vec<Outcome<InventoryEntry>>,
    /// Items that ended at or below their minimum
    pub alerts: Vec<LowStockAlert>,
}

impl DeductionReport {
    /// Number of lines that wrote a new consumption entry
    #[must_use]
    pub fn applied(&self) -> usize {
        self.entries.iter().filter(|o| o.is_applied()).count()
    }
}

/// Inventory side of the ledger engine.
#[derive(Clone)]
pub struct InventoryLedger {
    clock: Arc<dyn Clock>,
}

impl InventoryLedger {
    /// Creates an inventory ledger stamping entries with `clock`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Consume stock for a booking.
    ///
    /// Lines naming the same item are merged first. Each item is consumed at
    /// most once per booking; a repeat returns the original entry as
    /// [`Outcome::AlreadyProcessed`] and leaves stock alone.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidQuantity`] for a zero quantity or an empty request
    /// - [`EngineError::NotFound`] for an unknown item
    /// - [`EngineError::InsufficientStock`] if stock would go negative
    ///
    /// On error the caller must roll back: earlier lines may already be
    /// written to the unit of work.
    #[tracing::instrument(skip(self, uow, lines), fields(%booking_id, lines = lines.len()))]
    pub async fn deduct(
        &self,
        uow: &mut dyn UnitOfWork,
        booking_id: BookingId,
        lines: &[ConsumptionLine],
        performed_by: &ActorId,
    ) -> EngineResult<DeductionReport> {
        let merged = merge_lines(lines)?;
        let now = self.clock.now();
        let mut report = DeductionReport::default();

        for (code, quantity) in merged {
            // Lock before the idempotency lookup so a concurrent duplicate
            // sees the committed entry once it gets the row.
            let mut item = uow
                .lock_item(&code)
                .await?
                .ok_or_else(|| EngineError::not_found("inventory_item", &code))?;

            if let Some(existing) = uow.find_consumption(booking_id, &code).await? {
                tracing::info!(item = %code, "Consumption already recorded, skipping");
                metrics::counter!("inventory_consumptions_duplicate_total").increment(1);
                report.entries.push(Outcome::AlreadyProcessed(existing));
                continue;
            }

            let Some(stock_after) = item.current_stock.checked_sub(quantity) else {
                tracing::warn!(
                    item = %code,
                    requested = quantity,
                    available = item.current_stock,
                    "Insufficient stock"
                );
                metrics::counter!("inventory_insufficient_stock_total").increment(1);
                return Err(EngineError::InsufficientStock {
                    item: code.to_string(),
                    requested: i64::from(quantity),
                    available: item.current_stock,
                });
            };

            let entry = build_entry(
                &item,
                Some(booking_id),
                InventoryEntryKind::Consumption,
                -i64::from(quantity),
                stock_after,
                performed_by,
                None,
                now,
            )?;

            item.current_stock = stock_after;
            item.updated_at = now;
            uow.save_item(&item).await?;
            uow.insert_inventory_entry(&entry).await?;

            if item.is_low() {
                report.alerts.push(LowStockAlert {
                    item_code: item.code.clone(),
                    current_stock: item.current_stock,
                    min_stock: item.min_stock,
                    booking_id: Some(booking_id),
                });
            }

            tracing::debug!(item = %code, quantity, stock_after, "Stock consumed");
            metrics::counter!("inventory_consumptions_total").increment(1);
            report.entries.push(Outcome::Applied(entry));
        }

        Ok(report)
    }

    /// Receive stock, optionally updating the unit cost.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidQuantity`] for zero units or stock overflow
    /// - [`EngineError::NotFound`] for an unknown item
    #[tracing::instrument(skip(self, uow), fields(item = %code))]
    pub async fn restock(
        &self,
        uow: &mut dyn UnitOfWork,
        code: &ItemCode,
        quantity: u32,
        unit_cost: Option<Money>,
        performed_by: &ActorId,
    ) -> EngineResult<(InventoryEntry, InventoryItem)> {
        if quantity == 0 {
            return Err(EngineError::InvalidQuantity(format!(
                "restock of {code} must be positive"
            )));
        }

        let mut item = uow
            .lock_item(code)
            .await?
            .ok_or_else(|| EngineError::not_found("inventory_item", code))?;

        let stock_after = item.current_stock.checked_add(quantity).ok_or_else(|| {
            EngineError::InvalidQuantity(format!("restocking {quantity} overflows {code}"))
        })?;
        if let Some(cost) = unit_cost {
            item.unit_cost = cost;
        }

        let now = self.clock.now();
        let entry = build_entry(
            &item,
            None,
            InventoryEntryKind::Restock,
            i64::from(quantity),
            stock_after,
            performed_by,
            None,
            now,
        )?;

        item.current_stock = stock_after;
        item.updated_at = now;
        uow.save_item(&item).await?;
        uow.insert_inventory_entry(&entry).await?;

        tracing::info!(quantity, stock_after, "Item restocked");
        metrics::counter!("inventory_restocks_total").increment(1);
        Ok((entry, item))
    }

    /// Apply a signed manual correction.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidQuantity`] for a zero delta
    /// - [`EngineError::NotFound`] for an unknown item
    /// - [`EngineError::InsufficientStock`] if the result would be negative
    #[tracing::instrument(skip(self, uow, reason), fields(item = %code))]
    pub async fn adjust(
        &self,
        uow: &mut dyn UnitOfWork,
        code: &ItemCode,
        delta: i64,
        reason: impl Into<String> + Send,
        performed_by: &ActorId,
    ) -> EngineResult<(InventoryEntry, InventoryItem)> {
        if delta == 0 {
            return Err(EngineError::InvalidQuantity(format!(
                "adjustment of {code} must be non-zero"
            )));
        }

        let mut item = uow
            .lock_item(code)
            .await?
            .ok_or_else(|| EngineError::not_found("inventory_item", code))?;

        let stock_after = i64::from(item.current_stock) + delta;
        let stock_after = u32::try_from(stock_after).map_err(|_| {
            if stock_after < 0 {
                EngineError::InsufficientStock {
                    item: code.to_string(),
                    requested: -delta,
                    available: item.current_stock,
                }
            } else {
                EngineError::InvalidQuantity(format!("adjusting {code} by {delta} overflows"))
            }
        })?;

        let now = self.clock.now();
        let entry = build_entry(
            &item,
            None,
            InventoryEntryKind::Adjustment,
            delta,
            stock_after,
            performed_by,
            Some(reason.into()),
            now,
        )?;

        item.current_stock = stock_after;
        item.updated_at = now;
        uow.save_item(&item).await?;
        uow.insert_inventory_entry(&entry).await?;

        tracing::info!(delta, stock_after, "Stock adjusted");
        metrics::counter!("inventory_adjustments_total").increment(1);
        Ok((entry, item))
    }
}

/// Sum quantities per item code, ordered by code.
fn merge_lines(lines: &[ConsumptionLine]) -> EngineResult<BTreeMap<ItemCode, u32>> {
    if lines.is_empty() {
        return Err(EngineError::InvalidQuantity(
            "consumption request has no lines".into(),
        ));
    }

    let mut merged = BTreeMap::new();
    for line in lines {
        if line.quantity == 0 {
            return Err(EngineError::InvalidQuantity(format!(
                "quantity for {} must be positive",
                line.item_code
            )));
        }
        let total: &mut u32 = merged.entry(line.item_code.clone()).or_default();
        *total = total.checked_add(line.quantity).ok_or_else(|| {
            EngineError::InvalidQuantity(format!("quantity for {} overflows", line.item_code))
        })?;
    }
    Ok(merged)
}

#[allow(clippy::too_many_arguments)]
fn build_entry(
    item: &InventoryItem,
    booking_id: Option<BookingId>,
    kind: InventoryEntryKind,
    quantity: i64,
    stock_after: u32,
    performed_by: &ActorId,
    note: Option<String>,
    now: chrono::DateTime<chrono::Utc>,
) -> EngineResult<InventoryEntry> {
    let total_cost = item
        .unit_cost
        .checked_mul(quantity.unsigned_abs())
        .ok_or_else(|| {
            EngineError::InvalidQuantity(format!("cost of {quantity} x {} overflows", item.code))
        })?;

    Ok(InventoryEntry {
        id: InventoryEntryId::new(),
        item_code: item.code.clone(),
        booking_id,
        kind,
        quantity,
        unit_cost: item.unit_cost,
        total_cost,
        stock_before: item.current_stock,
        stock_after,
        performed_by: performed_by.clone(),
        note,
        created_at: now,
    })
}
