//! End-to-end booking lifecycle scenarios against the in-memory store.
//!
//! Each test wires a coordinator with mock collaborators, drives bookings
//! through transitions and checks bookings, wallets and inventory together.
//!
//! Run with: `cargo test -p servicehub-runtime --test transition_scenarios`

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Duration as ChronoDuration;
use servicehub_core::config::{
    COMMISSION_BASE_FEE, PARTNER_SHARE_PERCENT, StaticConfig, WALLET_HOLD_DAYS,
};
use servicehub_core::environment::Clock;
use servicehub_core::legacy::PersistenceMode;
use servicehub_core::metadata::TransitionMetadata;
use servicehub_core::store::LedgerStore;
use servicehub_core::types::{
    ActorId, ConsumptionLine, ItemCode, LowStockAlert, Money, WalletEntryKind,
};
use servicehub_core::{BookingState, EngineError};
use servicehub_runtime::{CoordinatorEnvironment, ReleaseScheduler, TransitionCoordinator};
use servicehub_testing::{
    InMemoryStore, ManualClock, MockOtp, MockPayments, RecordingStockAlerts, booking_in_state,
    init_tracing, item, test_clock,
};
use std::sync::Arc;
use std::time::Duration;

struct World {
    store: InMemoryStore,
    otp: Arc<MockOtp>,
    payments: Arc<MockPayments>,
    alerts: Arc<RecordingStockAlerts>,
    clock: Arc<ManualClock>,
    coordinator: TransitionCoordinator,
}

impl World {
    fn new(config: StaticConfig) -> Self {
        init_tracing();
        let store = InMemoryStore::new();
        let otp = Arc::new(MockOtp::new());
        let payments = Arc::new(MockPayments::new());
        let alerts = Arc::new(RecordingStockAlerts::new());
        let clock = Arc::new(test_clock());
        let coordinator = TransitionCoordinator::new(CoordinatorEnvironment {
            store: Arc::new(store.clone()),
            otp: otp.clone(),
            payments: payments.clone(),
            config: Arc::new(config),
            clock: clock.clone(),
            alerts: alerts.clone(),
            persistence_mode: PersistenceMode::Canonical,
        });
        Self {
            store,
            otp,
            payments,
            alerts,
            clock,
            coordinator,
        }
    }

    fn half_of_250() -> StaticConfig {
        StaticConfig::new()
            .with(COMMISSION_BASE_FEE, "250")
            .with(PARTNER_SHARE_PERCENT, "50")
            .with(WALLET_HOLD_DAYS, "7")
    }
}

fn partner_actor() -> ActorId {
    ActorId::new("partner-app")
}

#[tokio::test]
async fn start_requires_otp_then_stamps_start_time() {
    let world = World::new(StaticConfig::new());
    let booking = booking_in_state(BookingState::Accepted, None, world.clock.now());
    world.store.insert_booking(&booking).await.unwrap();

    let err = world
        .coordinator
        .transition(
            booking.id,
            BookingState::InProgress,
            &partner_actor(),
            TransitionMetadata::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PreconditionFailed(_)));
    assert_eq!(
        world.store.booking(booking.id).await.unwrap().unwrap().status,
        "ACCEPTED"
    );

    world.otp.verify(booking.id);
    world.clock.advance(ChronoDuration::minutes(5));

    let started = world
        .coordinator
        .transition(
            booking.id,
            BookingState::InProgress,
            &partner_actor(),
            TransitionMetadata::new(),
        )
        .await
        .unwrap();

    assert_eq!(started.state(), BookingState::InProgress);
    assert_eq!(started.started_at, Some(world.clock.now()));
    assert_eq!(world.store.booking(booking.id).await.unwrap().unwrap(), started);
}

#[tokio::test]
async fn completion_credits_half_of_base_fee_on_hold() {
    let world = World::new(World::half_of_250());
    let booking = booking_in_state(BookingState::InProgress, None, world.clock.now());
    let partner = booking.partner_id.unwrap();
    world.store.insert_booking(&booking).await.unwrap();
    world.payments.verify(booking.id);

    let completed = world
        .coordinator
        .transition(
            booking.id,
            BookingState::Completed,
            &partner_actor(),
            TransitionMetadata::new(),
        )
        .await
        .unwrap();

    assert_eq!(completed.status, "COMPLETED");
    assert_eq!(completed.completed_at, Some(world.clock.now()));

    let wallet = world.store.wallet(partner).await.unwrap().unwrap();
    assert_eq!(wallet.balance_hold, Money::from_cents(12_500));
    assert_eq!(wallet.balance_hold.to_string(), "125.00");
    assert_eq!(wallet.total_earned, Money::from_cents(12_500));
    assert_eq!(wallet.balance_available, Money::ZERO);

    let entries = world.store.wallet_entries(partner).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, WalletEntryKind::HoldCredit);
    assert_eq!(entries[0].booking_id, Some(booking.id));
    assert_eq!(
        entries[0].release_date,
        Some(world.clock.now() + ChronoDuration::days(7))
    );

    let invoices = world.payments.invoices();
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0].partner_id, partner);
    assert_eq!(invoices[0].customer_id, booking.customer_id);
}

#[tokio::test]
async fn completion_without_verified_payment_is_rejected() {
    let world = World::new(World::half_of_250());
    let booking = booking_in_state(BookingState::InProgress, None, world.clock.now());
    world.store.insert_booking(&booking).await.unwrap();

    let err = world
        .coordinator
        .transition(
            booking.id,
            BookingState::Completed,
            &partner_actor(),
            TransitionMetadata::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::PreconditionFailed(_)));
    assert!(world.payments.invoices().is_empty());
    assert!(world
        .store
        .wallet(booking.partner_id.unwrap())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn insufficient_stock_fails_the_whole_completion() {
    let world = World::new(World::half_of_250());
    let now = world.clock.now();
    let booking = booking_in_state(BookingState::InProgress, None, now);
    let partner = booking.partner_id.unwrap();
    world.store.insert_booking(&booking).await.unwrap();
    world.payments.verify(booking.id);
    world
        .store
        .upsert_item(&item("PIPE-15MM", 20, 2, Money::from_cents(450), now))
        .await
        .unwrap();
    world
        .store
        .upsert_item(&item("VALVE", 1, 0, Money::from_cents(2_000), now))
        .await
        .unwrap();

    let metadata = TransitionMetadata::new().with_inventory(vec![
        ConsumptionLine::new("PIPE-15MM", 4),
        ConsumptionLine::new("VALVE", 3),
    ]);
    let err = world
        .coordinator
        .transition(booking.id, BookingState::Completed, &partner_actor(), metadata)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        EngineError::InsufficientStock {
            item: "VALVE".into(),
            requested: 3,
            available: 1,
        }
    );

    assert_eq!(
        world.store.booking(booking.id).await.unwrap().unwrap().state(),
        BookingState::InProgress
    );
    assert!(world.store.wallet(partner).await.unwrap().is_none());
    assert!(world.store.wallet_entries(partner).await.unwrap().is_empty());

    let pipe = ItemCode::new("PIPE-15MM");
    assert_eq!(world.store.item(&pipe).await.unwrap().unwrap().current_stock, 20);
    assert!(world.store.inventory_entries(&pipe).await.unwrap().is_empty());
    assert!(world.payments.invoices().is_empty());
    assert!(world.store.all_audit_records().unwrap().is_empty());
}

#[tokio::test]
async fn completion_with_inventory_emits_alerts_after_commit() {
    let world = World::new(World::half_of_250());
    let now = world.clock.now();
    let booking = booking_in_state(BookingState::InProgress, None, now);
    world.store.insert_booking(&booking).await.unwrap();
    world.payments.verify(booking.id);
    world
        .store
        .upsert_item(&item("FILTER", 3, 1, Money::from_cents(900), now))
        .await
        .unwrap();

    let metadata = TransitionMetadata::new()
        .with_note("replaced filter cartridge")
        .with_inventory(vec![ConsumptionLine::new("FILTER", 2)]);
    world
        .coordinator
        .transition(booking.id, BookingState::Completed, &partner_actor(), metadata)
        .await
        .unwrap();

    let code = ItemCode::new("FILTER");
    assert_eq!(world.store.item(&code).await.unwrap().unwrap().current_stock, 1);
    let entries = world.store.inventory_entries(&code).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].total_cost, Money::from_cents(1_800));
    assert_eq!(entries[0].performed_by, partner_actor());

    assert_eq!(
        world.alerts.alerts(),
        vec![LowStockAlert {
            item_code: code,
            current_stock: 1,
            min_stock: 1,
            booking_id: Some(booking.id),
        }]
    );
}

#[tokio::test]
async fn full_lifecycle_leaves_one_audit_record_per_step() {
    let world = World::new(World::half_of_250());
    let booking = booking_in_state(BookingState::Created, None, world.clock.now());
    world.store.insert_booking(&booking).await.unwrap();
    world.otp.verify(booking.id);
    world.payments.verify(booking.id);
    let partner = servicehub_core::types::PartnerId::new();

    let steps = [
        (BookingState::Assigned, TransitionMetadata::new().with_partner(partner)),
        (BookingState::Accepted, TransitionMetadata::new()),
        (BookingState::InProgress, TransitionMetadata::new()),
        (BookingState::Completed, TransitionMetadata::new()),
        (
            BookingState::Disputed,
            TransitionMetadata::new().with_cancellation_reason("leak returned"),
        ),
    ];
    for (target, metadata) in steps {
        world.clock.advance(ChronoDuration::hours(1));
        world
            .coordinator
            .transition(booking.id, target, &ActorId::system(), metadata)
            .await
            .unwrap();
    }

    let final_booking = world.store.booking(booking.id).await.unwrap().unwrap();
    assert_eq!(final_booking.state(), BookingState::Disputed);
    assert_eq!(final_booking.partner_id, Some(partner));

    let audit = world
        .store
        .audit_records("booking", &booking.id.to_string())
        .await
        .unwrap();
    let path: Vec<_> = audit
        .iter()
        .map(|r| (r.from_state.clone().unwrap(), r.to_state.clone().unwrap()))
        .collect();
    assert_eq!(
        path,
        vec![
            ("CREATED".to_string(), "ASSIGNED".to_string()),
            ("ASSIGNED".to_string(), "ACCEPTED".to_string()),
            ("ACCEPTED".to_string(), "IN_PROGRESS".to_string()),
            ("IN_PROGRESS".to_string(), "COMPLETED".to_string()),
            ("COMPLETED".to_string(), "DISPUTED".to_string()),
        ]
    );
    assert_eq!(
        audit[4].metadata["request"]["extensions"][0]["kind"],
        "cancellation_reason"
    );
}

#[tokio::test]
async fn terminal_states_reject_everything() {
    let world = World::new(StaticConfig::new());
    let booking = booking_in_state(BookingState::Cancelled, None, world.clock.now());
    world.store.insert_booking(&booking).await.unwrap();

    for target in BookingState::ALL {
        let result = world
            .coordinator
            .transition(booking.id, target, &ActorId::system(), TransitionMetadata::new())
            .await;
        assert!(result.is_err(), "CANCELLED -> {target} must fail");
    }
}

#[tokio::test]
async fn scheduler_skips_entry_whose_wallet_was_deleted() {
    let world = World::new(World::half_of_250());
    let now = world.clock.now();

    let mut partners = Vec::new();
    for _ in 0..2 {
        let booking = booking_in_state(BookingState::InProgress, None, now);
        partners.push(booking.partner_id.unwrap());
        world.store.insert_booking(&booking).await.unwrap();
        world.payments.verify(booking.id);
        world
            .coordinator
            .transition(
                booking.id,
                BookingState::Completed,
                &ActorId::system(),
                TransitionMetadata::new(),
            )
            .await
            .unwrap();
    }

    world.store.delete_wallet(partners[1]).unwrap();
    world.clock.advance(ChronoDuration::days(8));

    let scheduler = ReleaseScheduler::new(
        Arc::new(world.store.clone()),
        world.clock.clone(),
        Duration::from_secs(300),
        500,
    );
    let report = scheduler.sweep().await.unwrap();

    assert_eq!(report.released, 1);
    assert_eq!(report.failed, 1);

    let healthy = world.store.wallet(partners[0]).await.unwrap().unwrap();
    assert_eq!(healthy.balance_hold, Money::ZERO);
    assert_eq!(healthy.balance_available, Money::from_cents(12_500));

    // The broken entry stays due and is retried on the next sweep.
    let retry = scheduler.sweep().await.unwrap();
    assert_eq!(retry.released, 0);
    assert_eq!(retry.failed, 1);
}
