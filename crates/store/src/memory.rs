use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    HoldChange, OrderId, OrderRecord, ProductId, ReservationId, ReservationRecord,
    ReservationState, Result, StockChange, StockHold, StockRecord, StoreError, Version,
    store::{OrderStore, ReservationStore, StockStore},
};

#[derive(Default)]
struct Tables {
    stock: HashMap<ProductId, StockRecord>,
    holds: HashMap<ReservationId, StockHold>,
    reservations: HashMap<ReservationId, ReservationRecord>,
    orders: HashMap<OrderId, OrderRecord>,
}

/// In-memory store implementation.
///
/// A single lock guards every table, so each call is as atomic as a
/// transaction in the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of outstanding holds across all products.
    pub async fn hold_count(&self) -> usize {
        self.tables.read().await.holds.len()
    }

}

fn stale(entity: &'static str, id: impl ToString, expected: Version, actual: Version) -> StoreError {
    metrics::counter!("store_stale_version_total", "entity" => entity).increment(1);
    StoreError::StaleVersion {
        entity,
        id: id.to_string(),
        expected,
        actual,
    }
}

#[async_trait]
impl StockStore for InMemoryStore {
    async fn insert_stock(&self, record: StockRecord) -> Result<StockRecord> {
        let mut tables = self.tables.write().await;
        if tables.stock.contains_key(&record.product_id) {
            return Err(StoreError::AlreadyExists {
                entity: "stock",
                id: record.product_id.to_string(),
            });
        }

        let stored = StockRecord {
            version: Version::first(),
            ..record
        };
        tables
            .stock
            .insert(stored.product_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_stock(&self, product_id: &ProductId) -> Result<Option<StockRecord>> {
        Ok(self.tables.read().await.stock.get(product_id).cloned())
    }

    async fn apply_stock_change(&self, change: StockChange) -> Result<StockRecord> {
        let mut tables = self.tables.write().await;
        let product_id = change.record.product_id.clone();

        let current_version = tables
            .stock
            .get(&product_id)
            .map(|r| r.version)
            .ok_or_else(|| StoreError::NotFound {
                entity: "stock",
                id: product_id.to_string(),
            })?;

        if current_version != change.record.version {
            return Err(stale(
                "stock",
                &product_id,
                change.record.version,
                current_version,
            ));
        }

        match change.hold {
            HoldChange::None => {}
            HoldChange::Insert(hold) => {
                if tables.holds.contains_key(&hold.token) {
                    return Err(StoreError::AlreadyExists {
                        entity: "hold",
                        id: hold.token.to_string(),
                    });
                }
                tables.holds.insert(hold.token, hold);
            }
            HoldChange::Remove(token) => {
                if tables.holds.remove(&token).is_none() {
                    return Err(StoreError::NotFound {
                        entity: "hold",
                        id: token.to_string(),
                    });
                }
            }
        }

        let stored = StockRecord {
            version: current_version.next(),
            ..change.record
        };
        tables.stock.insert(product_id, stored.clone());
        Ok(stored)
    }

    async fn get_hold(&self, token: ReservationId) -> Result<Option<StockHold>> {
        Ok(self.tables.read().await.holds.get(&token).cloned())
    }

    async fn holds_for_product(&self, product_id: &ProductId) -> Result<Vec<StockHold>> {
        let tables = self.tables.read().await;
        let mut holds: Vec<_> = tables
            .holds
            .values()
            .filter(|h| &h.product_id == product_id)
            .cloned()
            .collect();
        holds.sort_by_key(|h| h.created_at);
        Ok(holds)
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn insert_reservation(&self, record: ReservationRecord) -> Result<ReservationRecord> {
        let mut tables = self.tables.write().await;
        if tables.reservations.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists {
                entity: "reservation",
                id: record.id.to_string(),
            });
        }

        let stored = ReservationRecord {
            version: Version::first(),
            ..record
        };
        tables.reservations.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<ReservationRecord>> {
        Ok(self.tables.read().await.reservations.get(&id).cloned())
    }

    async fn update_reservation(&self, record: ReservationRecord) -> Result<ReservationRecord> {
        let mut tables = self.tables.write().await;
        let current = tables
            .reservations
            .get(&record.id)
            .map(|r| r.version)
            .ok_or_else(|| StoreError::NotFound {
                entity: "reservation",
                id: record.id.to_string(),
            })?;

        if current != record.version {
            return Err(stale("reservation", record.id, record.version, current));
        }

        let stored = ReservationRecord {
            version: current.next(),
            ..record
        };
        tables.reservations.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn reservations_for_order(&self, order_id: OrderId) -> Result<Vec<ReservationRecord>> {
        let tables = self.tables.read().await;
        let mut reservations: Vec<_> = tables
            .reservations
            .values()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect();
        reservations.sort_by_key(|r| r.created_at);
        Ok(reservations)
    }

    async fn expired_active_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ReservationRecord>> {
        let tables = self.tables.read().await;
        let mut expired: Vec<_> = tables
            .reservations
            .values()
            .filter(|r| r.state == ReservationState::Active && r.is_past_expiry(now))
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.expires_at);
        expired.truncate(limit);
        Ok(expired)
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, record: OrderRecord) -> Result<OrderRecord> {
        let mut tables = self.tables.write().await;
        if tables.orders.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists {
                entity: "order",
                id: record.id.to_string(),
            });
        }

        let stored = OrderRecord {
            version: Version::first(),
            ..record
        };
        tables.orders.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<OrderRecord>> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn update_order(&self, record: OrderRecord) -> Result<OrderRecord> {
        let mut tables = self.tables.write().await;
        let current = tables
            .orders
            .get(&record.id)
            .map(|r| r.version)
            .ok_or_else(|| StoreError::NotFound {
                entity: "order",
                id: record.id.to_string(),
            })?;

        if current != record.version {
            return Err(stale("order", record.id, record.version, current));
        }

        let stored = OrderRecord {
            version: current.next(),
            ..record
        };
        tables.orders.insert(stored.id, stored.clone());
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CustomerId, OrderLine, OrderState};
    use chrono::Duration;

    fn hold(token: ReservationId, product: &str, quantity: u32) -> StockHold {
        StockHold {
            token,
            product_id: ProductId::new(product),
            quantity,
            created_at: Utc::now(),
        }
    }

    fn reservation(order_id: OrderId, expires_in: Duration) -> ReservationRecord {
        let now = Utc::now();
        ReservationRecord::active(
            ReservationId::new(),
            order_id,
            ProductId::new("SKU-001"),
            1,
            now,
            now + expires_in,
        )
    }

    #[tokio::test]
    async fn insert_stock_starts_at_version_one() {
        let store = InMemoryStore::new();
        let stored = store
            .insert_stock(StockRecord::new(ProductId::new("SKU-001"), 10))
            .await
            .unwrap();
        assert_eq!(stored.version, Version::first());

        let loaded = store
            .get_stock(&ProductId::new("SKU-001"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, stored);
    }

    #[tokio::test]
    async fn duplicate_stock_is_rejected() {
        let store = InMemoryStore::new();
        let record = StockRecord::new(ProductId::new("SKU-001"), 10);
        store.insert_stock(record.clone()).await.unwrap();

        let result = store.insert_stock(record).await;
        assert!(matches!(result, Err(StoreError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn stock_change_bumps_version_and_inserts_hold() {
        let store = InMemoryStore::new();
        let mut record = store
            .insert_stock(StockRecord::new(ProductId::new("SKU-001"), 10))
            .await
            .unwrap();
        let token = ReservationId::new();

        record.reserved = 3;
        let stored = store
            .apply_stock_change(StockChange::new(
                record,
                HoldChange::Insert(hold(token, "SKU-001", 3)),
            ))
            .await
            .unwrap();

        assert_eq!(stored.version, Version::new(2));
        assert_eq!(stored.reserved, 3);
        assert!(store.get_hold(token).await.unwrap().is_some());
        assert_eq!(store.hold_count().await, 1);
    }

    #[tokio::test]
    async fn stale_stock_change_is_rejected_without_side_effects() {
        let store = InMemoryStore::new();
        let record = store
            .insert_stock(StockRecord::new(ProductId::new("SKU-001"), 10))
            .await
            .unwrap();

        let mut first = record.clone();
        first.reserved = 1;
        store
            .apply_stock_change(StockChange::new(first, HoldChange::None))
            .await
            .unwrap();

        let token = ReservationId::new();
        let mut second = record;
        second.reserved = 2;
        let result = store
            .apply_stock_change(StockChange::new(
                second,
                HoldChange::Insert(hold(token, "SKU-001", 2)),
            ))
            .await;

        assert!(matches!(
            result,
            Err(StoreError::StaleVersion { expected, actual, .. })
                if expected == Version::first() && actual == Version::new(2)
        ));
        assert!(store.get_hold(token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn removing_a_missing_hold_leaves_stock_untouched() {
        let store = InMemoryStore::new();
        let mut record = store
            .insert_stock(StockRecord::new(ProductId::new("SKU-001"), 10))
            .await
            .unwrap();
        let token = ReservationId::new();
        record.reserved = 2;
        let record = store
            .apply_stock_change(StockChange::new(
                record,
                HoldChange::Insert(hold(token, "SKU-001", 2)),
            ))
            .await
            .unwrap();

        let mut released = record.clone();
        released.reserved = 0;
        store
            .apply_stock_change(StockChange::new(released, HoldChange::Remove(token)))
            .await
            .unwrap();

        // A second removal at the current version must not apply again.
        let mut current = store
            .get_stock(&ProductId::new("SKU-001"))
            .await
            .unwrap()
            .unwrap();
        let version = current.version;
        current.reserved = 0;
        current.total = 8;
        let result = store
            .apply_stock_change(StockChange::new(current, HoldChange::Remove(token)))
            .await;

        assert!(matches!(
            result,
            Err(StoreError::NotFound { entity: "hold", .. })
        ));
        let stored = store
            .get_stock(&ProductId::new("SKU-001"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, version);
        assert_eq!(stored.total, 10);
    }

    #[tokio::test]
    async fn inserting_a_held_token_is_rejected() {
        let store = InMemoryStore::new();
        let mut record = store
            .insert_stock(StockRecord::new(ProductId::new("SKU-001"), 10))
            .await
            .unwrap();
        let token = ReservationId::new();
        record.reserved = 2;
        let mut record = store
            .apply_stock_change(StockChange::new(
                record,
                HoldChange::Insert(hold(token, "SKU-001", 2)),
            ))
            .await
            .unwrap();

        record.reserved = 4;
        let result = store
            .apply_stock_change(StockChange::new(
                record,
                HoldChange::Insert(hold(token, "SKU-001", 2)),
            ))
            .await;

        assert!(matches!(
            result,
            Err(StoreError::AlreadyExists { entity: "hold", .. })
        ));
        let stored = store
            .get_stock(&ProductId::new("SKU-001"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.reserved, 2);
    }

    #[tokio::test]
    async fn stock_change_for_unknown_product_is_not_found() {
        let store = InMemoryStore::new();
        let result = store
            .apply_stock_change(StockChange::new(
                StockRecord::new(ProductId::new("SKU-404"), 1),
                HoldChange::None,
            ))
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn holds_are_listed_per_product() {
        let store = InMemoryStore::new();
        for product in ["SKU-001", "SKU-002"] {
            let mut record = store
                .insert_stock(StockRecord::new(ProductId::new(product), 10))
                .await
                .unwrap();
            record.reserved = 1;
            store
                .apply_stock_change(StockChange::new(
                    record,
                    HoldChange::Insert(hold(ReservationId::new(), product, 1)),
                ))
                .await
                .unwrap();
        }

        let holds = store
            .holds_for_product(&ProductId::new("SKU-001"))
            .await
            .unwrap();
        assert_eq!(holds.len(), 1);
        assert_eq!(holds[0].product_id, ProductId::new("SKU-001"));
    }

    #[tokio::test]
    async fn reservation_update_is_compare_and_swap() {
        let store = InMemoryStore::new();
        let stored = store
            .insert_reservation(reservation(OrderId::new(), Duration::minutes(5)))
            .await
            .unwrap();
        assert_eq!(stored.version, Version::first());

        let committed = store
            .update_reservation(stored.transitioned(ReservationState::Committed, Utc::now()))
            .await
            .unwrap();
        assert_eq!(committed.version, Version::new(2));

        let result = store
            .update_reservation(stored.transitioned(ReservationState::Released, Utc::now()))
            .await;
        assert!(matches!(result, Err(StoreError::StaleVersion { .. })));

        let loaded = store.get_reservation(stored.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, ReservationState::Committed);
    }

    #[tokio::test]
    async fn expired_active_reservations_are_filtered_and_limited() {
        let store = InMemoryStore::new();
        let order_id = OrderId::new();
        let past = store
            .insert_reservation(reservation(order_id, Duration::seconds(-30)))
            .await
            .unwrap();
        let older = store
            .insert_reservation(reservation(order_id, Duration::seconds(-60)))
            .await
            .unwrap();
        store
            .insert_reservation(reservation(order_id, Duration::minutes(5)))
            .await
            .unwrap();
        let released = store
            .insert_reservation(reservation(order_id, Duration::seconds(-90)))
            .await
            .unwrap();
        store
            .update_reservation(released.transitioned(ReservationState::Released, Utc::now()))
            .await
            .unwrap();

        let expired = store
            .expired_active_reservations(Utc::now(), 10)
            .await
            .unwrap();
        let ids: Vec<_> = expired.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![older.id, past.id]);

        let limited = store
            .expired_active_reservations(Utc::now(), 1)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, older.id);
    }

    #[tokio::test]
    async fn reservations_for_order_only_returns_owned() {
        let store = InMemoryStore::new();
        let mine = OrderId::new();
        store
            .insert_reservation(reservation(mine, Duration::minutes(5)))
            .await
            .unwrap();
        store
            .insert_reservation(reservation(OrderId::new(), Duration::minutes(5)))
            .await
            .unwrap();

        let owned = store.reservations_for_order(mine).await.unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].order_id, mine);
    }

    #[tokio::test]
    async fn order_round_trip_and_cas() {
        let store = InMemoryStore::new();
        let order = OrderRecord::pending(
            OrderId::new(),
            CustomerId::new(),
            vec![OrderLine::new("SKU-001", 2)],
            Utc::now(),
        );
        let stored = store.insert_order(order).await.unwrap();

        let mut cancelled = stored.clone();
        cancelled.state = OrderState::Cancelled;
        let updated = store.update_order(cancelled).await.unwrap();
        assert_eq!(updated.version, Version::new(2));

        let result = store.update_order(stored).await;
        assert!(matches!(result, Err(StoreError::StaleVersion { .. })));

        let loaded = store.get_order(updated.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, OrderState::Cancelled);
    }
}
