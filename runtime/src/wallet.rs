//! Wallet ledger: hold credits and their release.
//!
//! Every mutation locks the wallet row before reading it, writes the new
//! balances and a ledger entry carrying before/after snapshots of both
//! balances, all inside the caller's unit of work.
//!
//! Idempotency key: at most one `hold_credit` entry per booking. A repeated
//! credit returns the existing entry untouched.

use chrono::{DateTime, Utc};
use servicehub_core::environment::Clock;
use servicehub_core::error::{EngineError, EngineResult};
use servicehub_core::store::UnitOfWork;
use servicehub_core::types::{
    BookingId, Money, Outcome, PartnerId, WalletEntry, WalletEntryId, WalletEntryKind,
};
use std::sync::Arc;

/// Wallet side of the ledger engine.
#[derive(Clone)]
pub struct WalletLedger {
    clock: Arc<dyn Clock>,
}

impl WalletLedger {
    /// Creates a wallet ledger stamping entries with `clock`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Credit `amount` into the partner's hold balance for a booking.
    ///
    /// Returns [`Outcome::AlreadyProcessed`] with the original entry if the
    /// booking was already credited.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidAmount`] for a zero amount or balance overflow
    /// - storage errors from the unit of work (including lock timeouts)
    #[tracing::instrument(skip(self, uow), fields(%partner_id, %booking_id, %amount))]
    pub async fn credit_hold(
        &self,
        uow: &mut dyn UnitOfWork,
        partner_id: PartnerId,
        booking_id: BookingId,
        amount: Money,
        release_date: DateTime<Utc>,
    ) -> EngineResult<Outcome<WalletEntry>> {
        if amount.is_zero() {
            return Err(EngineError::InvalidAmount(format!(
                "hold credit for booking {booking_id} must be positive"
            )));
        }

        let now = self.clock.now();

        // Lock the wallet first so concurrent credits for the same booking
        // serialize before the idempotency check.
        let mut wallet = uow.lock_or_create_wallet(partner_id, now).await?;

        if let Some(existing) = uow.find_hold_credit(booking_id).await? {
            tracing::info!(entry_id = %existing.id, "Hold credit already recorded, skipping");
            metrics::counter!("wallet_hold_credits_duplicate_total").increment(1);
            return Ok(Outcome::AlreadyProcessed(existing));
        }

        let hold_before = wallet.balance_hold;
        let overflow = || {
            EngineError::InvalidAmount(format!("crediting {amount} overflows wallet {partner_id}"))
        };
        wallet.balance_hold = hold_before.checked_add(amount).ok_or_else(overflow)?;
        wallet.total_earned = wallet.total_earned.checked_add(amount).ok_or_else(overflow)?;
        wallet.updated_at = now;

        let entry = WalletEntry {
            id: WalletEntryId::new(),
            partner_id,
            kind: WalletEntryKind::HoldCredit,
            amount,
            hold_before,
            hold_after: wallet.balance_hold,
            available_before: wallet.balance_available,
            available_after: wallet.balance_available,
            booking_id: Some(booking_id),
            release_date: Some(release_date),
            released: false,
            parent_id: None,
            created_at: now,
        };

        uow.save_wallet(&wallet).await?;
        uow.insert_wallet_entry(&entry).await?;

        tracing::info!(
            entry_id = %entry.id,
            hold_after = %entry.hold_after,
            %release_date,
            "Hold credit recorded"
        );
        metrics::counter!("wallet_hold_credits_total").increment(1);

        Ok(Outcome::Applied(entry))
    }

    /// Move a matured hold credit into the available balance.
    ///
    /// Always releases the full credited amount. Returns the new `release`
    /// entry, [`Outcome::AlreadyProcessed`] with the original if it was
    /// already released, or [`Outcome::Ignored`] if it is not a hold credit.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] if the entry or the partner's wallet is missing
    /// - [`EngineError::LedgerInvariant`] if the hold balance is smaller than the credit
    /// - storage errors from the unit of work (including lock timeouts)
    #[tracing::instrument(skip(self, uow), fields(%entry_id))]
    pub async fn release(
        &self,
        uow: &mut dyn UnitOfWork,
        entry_id: WalletEntryId,
    ) -> EngineResult<Outcome<WalletEntry>> {
        let original = uow
            .lock_wallet_entry(entry_id)
            .await?
            .ok_or_else(|| EngineError::not_found("wallet_entry", entry_id))?;

        if original.kind != WalletEntryKind::HoldCredit {
            tracing::debug!(kind = original.kind.as_str(), "Not a hold credit, nothing to release");
            return Ok(Outcome::Ignored(original));
        }
        if original.released {
            tracing::debug!("Hold credit already released");
            return Ok(Outcome::AlreadyProcessed(original));
        }

        let mut wallet = uow
            .lock_wallet(original.partner_id)
            .await?
            .ok_or_else(|| EngineError::not_found("wallet", original.partner_id))?;

        let now = self.clock.now();
        let hold_before = wallet.balance_hold;
        let available_before = wallet.balance_available;

        wallet.balance_hold = hold_before.checked_sub(original.amount).ok_or_else(|| {
            EngineError::LedgerInvariant(format!(
                "wallet {} holds {hold_before}, cannot release {}",
                original.partner_id, original.amount
            ))
        })?;
        wallet.balance_available = available_before.checked_add(original.amount).ok_or_else(|| {
            EngineError::InvalidAmount(format!(
                "releasing {} overflows wallet {}",
                original.amount, original.partner_id
            ))
        })?;
        wallet.updated_at = now;

        let release = WalletEntry {
            id: WalletEntryId::new(),
            partner_id: original.partner_id,
            kind: WalletEntryKind::Release,
            amount: original.amount,
            hold_before,
            hold_after: wallet.balance_hold,
            available_before,
            available_after: wallet.balance_available,
            booking_id: original.booking_id,
            release_date: None,
            released: false,
            parent_id: Some(original.id),
            created_at: now,
        };

        uow.save_wallet(&wallet).await?;
        uow.insert_wallet_entry(&release).await?;
        uow.mark_released(original.id).await?;

        tracing::info!(
            partner_id = %original.partner_id,
            amount = %original.amount,
            available_after = %release.available_after,
            "Hold credit released"
        );
        metrics::counter!("wallet_releases_total").increment(1);

        Ok(Outcome::Applied(release))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use servicehub_core::store::LedgerStore;
    use servicehub_testing::{InMemoryStore, test_clock};

    fn ledger() -> (InMemoryStore, WalletLedger, DateTime<Utc>) {
        let clock = Arc::new(test_clock());
        let now = clock.now();
        (InMemoryStore::new(), WalletLedger::new(clock), now)
    }

    async fn credit(
        store: &InMemoryStore,
        wallet: &WalletLedger,
        partner: PartnerId,
        booking: BookingId,
        amount: Money,
        release_date: DateTime<Utc>,
    ) -> Outcome<WalletEntry> {
        let mut uow = store.begin().await.unwrap();
        let outcome = wallet
            .credit_hold(uow.as_mut(), partner, booking, amount, release_date)
            .await
            .unwrap();
        uow.commit().await.unwrap();
        outcome
    }

    #[tokio::test]
    async fn credit_creates_wallet_and_snapshots() {
        let (store, wallet, now) = ledger();
        let partner = PartnerId::new();

        let outcome = credit(
            &store,
            &wallet,
            partner,
            BookingId::new(),
            Money::from_major(125),
            now + Duration::days(7),
        )
        .await;

        let entry = outcome.into_inner();
        assert_eq!(entry.hold_before, Money::ZERO);
        assert_eq!(entry.hold_after, Money::from_major(125));
        assert_eq!(entry.available_before, entry.available_after);

        let stored = store.wallet(partner).await.unwrap().unwrap();
        assert_eq!(stored.balance_hold, Money::from_major(125));
        assert_eq!(stored.total_earned, Money::from_major(125));
        assert_eq!(stored.balance_available, Money::ZERO);
    }

    #[tokio::test]
    async fn credit_twice_records_once() {
        let (store, wallet, now) = ledger();
        let partner = PartnerId::new();
        let booking = BookingId::new();

        let first = credit(&store, &wallet, partner, booking, Money::from_major(50), now).await;
        let second = credit(&store, &wallet, partner, booking, Money::from_major(50), now).await;

        assert!(first.is_applied());
        assert_eq!(second, Outcome::AlreadyProcessed(first.into_inner()));
        assert_eq!(store.wallet_entries(partner).await.unwrap().len(), 1);
        let stored = store.wallet(partner).await.unwrap().unwrap();
        assert_eq!(stored.balance_hold, Money::from_major(50));
        assert_eq!(stored.total_earned, Money::from_major(50));
    }

    #[tokio::test]
    async fn zero_credit_is_rejected() {
        let (store, wallet, now) = ledger();
        let mut uow = store.begin().await.unwrap();
        let err = wallet
            .credit_hold(uow.as_mut(), PartnerId::new(), BookingId::new(), Money::ZERO, now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidAmount(_)));
    }

    #[tokio::test]
    async fn release_moves_hold_to_available() {
        let (store, wallet, now) = ledger();
        let partner = PartnerId::new();
        let credited = credit(
            &store,
            &wallet,
            partner,
            BookingId::new(),
            Money::from_major(80),
            now,
        )
        .await
        .into_inner();

        let mut uow = store.begin().await.unwrap();
        let release = wallet.release(uow.as_mut(), credited.id).await.unwrap();
        uow.commit().await.unwrap();

        let release = release.into_inner();
        assert_eq!(release.kind, WalletEntryKind::Release);
        assert_eq!(release.parent_id, Some(credited.id));
        assert_eq!(release.hold_after, Money::ZERO);
        assert_eq!(release.available_after, Money::from_major(80));

        let stored = store.wallet(partner).await.unwrap().unwrap();
        assert_eq!(stored.balance_hold, Money::ZERO);
        assert_eq!(stored.balance_available, Money::from_major(80));
        assert_eq!(stored.total_earned, Money::from_major(80));

        let entries = store.wallet_entries(partner).await.unwrap();
        assert!(entries.iter().any(|e| e.id == credited.id && e.released));
    }

    #[tokio::test]
    async fn release_twice_is_a_no_op() {
        let (store, wallet, now) = ledger();
        let partner = PartnerId::new();
        let credited = credit(
            &store,
            &wallet,
            partner,
            BookingId::new(),
            Money::from_major(80),
            now,
        )
        .await
        .into_inner();

        for _ in 0..2 {
            let mut uow = store.begin().await.unwrap();
            wallet.release(uow.as_mut(), credited.id).await.unwrap();
            uow.commit().await.unwrap();
        }

        let before = store.wallet(partner).await.unwrap().unwrap();
        let mut uow = store.begin().await.unwrap();
        let outcome = wallet.release(uow.as_mut(), credited.id).await.unwrap();
        uow.commit().await.unwrap();

        assert!(matches!(outcome, Outcome::AlreadyProcessed(_)));
        assert_eq!(store.wallet(partner).await.unwrap().unwrap(), before);
        assert_eq!(store.wallet_entries(partner).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn releasing_a_release_entry_is_ignored() {
        let (store, wallet, now) = ledger();
        let partner = PartnerId::new();
        let credited = credit(
            &store,
            &wallet,
            partner,
            BookingId::new(),
            Money::from_major(10),
            now,
        )
        .await
        .into_inner();

        let mut uow = store.begin().await.unwrap();
        let release = wallet.release(uow.as_mut(), credited.id).await.unwrap().into_inner();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let outcome = wallet.release(uow.as_mut(), release.id).await.unwrap();
        assert!(matches!(outcome, Outcome::Ignored(_)));
    }

    #[tokio::test]
    async fn release_of_unknown_entry_is_not_found() {
        let (store, wallet, _) = ledger();
        let mut uow = store.begin().await.unwrap();
        let err = wallet
            .release(uow.as_mut(), WalletEntryId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "wallet_entry", .. }));
    }
}
