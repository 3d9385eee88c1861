//! Property tests for ledger idempotency and stock conservation.
//!
//! Run with: `cargo test -p servicehub-runtime --test ledger_properties`

#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;
use servicehub_core::environment::Clock;
use servicehub_core::store::LedgerStore;
use servicehub_core::types::{ActorId, BookingId, ConsumptionLine, ItemCode, Money, PartnerId};
use servicehub_core::EngineError;
use servicehub_runtime::{InventoryLedger, WalletLedger};
use servicehub_testing::{InMemoryStore, item, test_clock};
use std::sync::Arc;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Deducting the same request any number of times changes stock once,
    /// or never if the first attempt lacked stock.
    #[test]
    fn deduct_is_idempotent_and_never_oversells(
        stock in 0u32..50,
        quantity in 1u32..60,
        repeats in 1usize..4,
    ) {
        runtime().block_on(async {
            let clock = Arc::new(test_clock());
            let store = InMemoryStore::new();
            store
                .upsert_item(&item("ROD", stock, 0, Money::from_cents(100), clock.now()))
                .await
                .unwrap();
            let ledger = InventoryLedger::new(clock);
            let booking = BookingId::new();
            let lines = [ConsumptionLine::new("ROD", quantity)];

            for _ in 0..repeats {
                let mut uow = store.begin().await.unwrap();
                match ledger.deduct(uow.as_mut(), booking, &lines, &ActorId::system()).await {
                    Ok(_) => uow.commit().await.unwrap(),
                    Err(EngineError::InsufficientStock { requested, available, .. }) => {
                        assert_eq!(requested, i64::from(quantity));
                        assert_eq!(available, stock);
                        uow.rollback().await.unwrap();
                    }
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }

            let code = ItemCode::new("ROD");
            let after = store.item(&code).await.unwrap().unwrap().current_stock;
            let entries = store.inventory_entries(&code).await.unwrap();
            if quantity <= stock {
                assert_eq!(after, stock - quantity);
                assert_eq!(entries.len(), 1);
            } else {
                assert_eq!(after, stock);
                assert!(entries.is_empty());
            }
        });
    }

    /// Hold, available and total earned stay consistent through any mix of
    /// credits and releases.
    #[test]
    fn wallet_balances_are_conserved(
        amounts in prop::collection::vec(1u64..10_000, 1..8),
        release_mask in prop::collection::vec(any::<bool>(), 8),
    ) {
        runtime().block_on(async {
            let clock = Arc::new(test_clock());
            let store = InMemoryStore::new();
            let wallet = WalletLedger::new(clock.clone());
            let partner = PartnerId::new();

            let mut credited = Vec::new();
            for cents in &amounts {
                let mut uow = store.begin().await.unwrap();
                let entry = wallet
                    .credit_hold(
                        uow.as_mut(),
                        partner,
                        BookingId::new(),
                        Money::from_cents(*cents),
                        clock.now(),
                    )
                    .await
                    .unwrap()
                    .into_inner();
                uow.commit().await.unwrap();
                credited.push(entry);
            }

            let mut released = 0u64;
            for (entry, release) in credited.iter().zip(&release_mask) {
                if *release {
                    let mut uow = store.begin().await.unwrap();
                    wallet.release(uow.as_mut(), entry.id).await.unwrap();
                    uow.commit().await.unwrap();
                    released += entry.amount.cents();
                }
            }

            let total: u64 = amounts.iter().sum();
            let stored = store.wallet(partner).await.unwrap().unwrap();
            assert_eq!(stored.total_earned.cents(), total);
            assert_eq!(stored.balance_available.cents(), released);
            assert_eq!(stored.balance_hold.cents(), total - released);
        });
    }
}
