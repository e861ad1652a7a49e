//! Integration tests for order placement under contention.

use std::sync::Arc;
use std::time::Duration;

use common::{Caller, CustomerId, ManualClock, OrderId, ProductId, SystemClock};
use ledger::{InventoryLedger, RetryPolicy};
use orders::{OrderConfig, OrderCoordinator, OrderError};
use reservations::ReservationManager;
use store::{InMemoryStore, OrderLine, OrderState, ReservationState, StockStore};

type TestCoordinator = OrderCoordinator<InMemoryStore>;

struct TestHarness {
    coordinator: TestCoordinator,
    store: InMemoryStore,
    operator: Caller,
}

impl TestHarness {
    async fn new(stock: &[(&str, u32)]) -> Self {
        Self::with_clock(stock, Arc::new(SystemClock)).await
    }

    async fn with_clock(stock: &[(&str, u32)], clock: Arc<dyn common::Clock>) -> Self {
        let store = InMemoryStore::new();
        let ledger = InventoryLedger::with_policy(
            store.clone(),
            RetryPolicy::new(100, Duration::from_micros(50), Duration::from_millis(2)),
        );
        for (product, total) in stock {
            ledger
                .register(ProductId::new(*product), *total)
                .await
                .unwrap();
        }
        let reservations = ReservationManager::new(ledger, clock);

        Self {
            coordinator: OrderCoordinator::new(
                reservations,
                OrderConfig {
                    reservation_ttl: Duration::from_secs(60),
                },
            ),
            store,
            operator: Caller::operator(CustomerId::new()),
        }
    }

    async fn stock(&self, product: &str) -> (u32, u32) {
        let record = self
            .store
            .get_stock(&ProductId::new(product))
            .await
            .unwrap()
            .unwrap();
        (record.total, record.reserved)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_orders_never_oversell() {
    let h = TestHarness::new(&[("SKU-001", 20), ("SKU-002", 10)]).await;

    let mut handles = Vec::new();
    for _ in 0..12 {
        let coordinator = h.coordinator.clone();
        let caller = Caller::customer(CustomerId::new());
        handles.push(tokio::spawn(async move {
            coordinator
                .place_order(
                    &caller,
                    vec![OrderLine::new("SKU-001", 1), OrderLine::new("SKU-002", 2)],
                )
                .await
        }));
    }

    let mut placed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(order) => {
                assert_eq!(order.state, OrderState::Pending);
                placed += 1;
            }
            Err(OrderError::OrderRejected { line_index, .. }) => assert_eq!(line_index, 1),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    // SKU-002 allows five orders of two units.
    assert_eq!(placed, 5);
    assert_eq!(h.stock("SKU-001").await, (20, 5));
    assert_eq!(h.stock("SKU-002").await, (10, 10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_confirm_racing_cancel_has_one_winner() {
    let h = TestHarness::new(&[("SKU-001", 10)]).await;
    let customer = Caller::customer(CustomerId::new());
    let order = h
        .coordinator
        .place_order(&customer, vec![OrderLine::new("SKU-001", 3)])
        .await
        .unwrap();

    let confirm = {
        let coordinator = h.coordinator.clone();
        let operator = h.operator;
        tokio::spawn(async move { coordinator.confirm_order(&operator, order.id).await })
    };
    let cancel = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.cancel_order(&customer, order.id).await })
    };
    let confirm = confirm.await.unwrap();
    let cancel = cancel.await.unwrap();

    assert!(confirm.is_ok() != cancel.is_ok());
    let stored = h
        .coordinator
        .get_order(&h.operator, order.id)
        .await
        .unwrap();
    match stored.state {
        OrderState::Confirmed => assert_eq!(h.stock("SKU-001").await, (7, 0)),
        OrderState::Cancelled => assert_eq!(h.stock("SKU-001").await, (10, 0)),
        other => panic!("unexpected final state {other}"),
    }
}

#[tokio::test]
async fn test_expired_order_cannot_be_confirmed() {
    let clock = ManualClock::default();
    let h = TestHarness::with_clock(&[("SKU-001", 10), ("SKU-002", 4)], Arc::new(clock.clone()))
        .await;
    let customer = Caller::customer(CustomerId::new());
    let order = h
        .coordinator
        .place_order(
            &customer,
            vec![OrderLine::new("SKU-001", 2), OrderLine::new("SKU-002", 4)],
        )
        .await
        .unwrap();

    clock.advance(chrono::Duration::seconds(61));
    let result = h.coordinator.confirm_order(&h.operator, order.id).await;
    assert!(matches!(
        result,
        Err(OrderError::PartialCommitFailure { line_index: 0, .. })
    ));

    assert_eq!(h.stock("SKU-001").await, (10, 0));
    assert_eq!(h.stock("SKU-002").await, (4, 0));
    let reservations = h
        .coordinator
        .order_reservations(&customer, order.id)
        .await
        .unwrap();
    assert!(reservations.iter().all(|r| r.state.is_returned()));
    assert!(
        reservations
            .iter()
            .any(|r| r.state == ReservationState::Expired)
    );

    let failed = h
        .coordinator
        .get_order(&customer, order.id)
        .await
        .unwrap();
    assert_eq!(failed.state, OrderState::Failed);
}

#[tokio::test]
async fn test_sweep_frees_stock_of_abandoned_orders() {
    let clock = ManualClock::default();
    let h = TestHarness::with_clock(&[("SKU-001", 3)], Arc::new(clock.clone())).await;
    let first = Caller::customer(CustomerId::new());
    let second = Caller::customer(CustomerId::new());

    h.coordinator
        .place_order(&first, vec![OrderLine::new("SKU-001", 3)])
        .await
        .unwrap();
    let blocked = h
        .coordinator
        .place_order(&second, vec![OrderLine::new("SKU-001", 1)])
        .await;
    assert!(matches!(blocked, Err(OrderError::OrderRejected { .. })));

    clock.advance(chrono::Duration::seconds(60));
    let report = h
        .coordinator
        .reservations()
        .sweep_expired(common::Clock::now(&clock))
        .await
        .unwrap();
    assert_eq!(report.expired, 1);

    let order = h
        .coordinator
        .place_order(&second, vec![OrderLine::new("SKU-001", 1)])
        .await
        .unwrap();
    assert_eq!(order.state, OrderState::Pending);
}

#[tokio::test]
async fn test_unknown_order_cannot_be_cancelled() {
    let h = TestHarness::new(&[]).await;
    let result = h
        .coordinator
        .cancel_order(&h.operator, OrderId::new())
        .await;
    assert!(matches!(result, Err(OrderError::OrderNotFound(_))));
}
