use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    OrderId, OrderRecord, ProductId, ReservationId, ReservationRecord, Result, StockChange,
    StockHold, StockRecord,
};

/// Persistence of per-product stock records and their holds.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Inserts a new stock record at version 1.
    ///
    /// Fails with `AlreadyExists` if the product already has a record.
    async fn insert_stock(&self, record: StockRecord) -> Result<StockRecord>;

    /// Retrieves the current stock record for a product.
    async fn get_stock(&self, product_id: &ProductId) -> Result<Option<StockRecord>>;

    /// Applies a stock change atomically.
    ///
    /// The record update, the hold insert/delete and the version bump happen
    /// in one transaction. Fails with `StaleVersion` if `change.record.version`
    /// is not the stored version. Returns the record as stored.
    async fn apply_stock_change(&self, change: StockChange) -> Result<StockRecord>;

    /// Retrieves an outstanding hold by its token.
    async fn get_hold(&self, token: ReservationId) -> Result<Option<StockHold>>;

    /// Lists outstanding holds for a product.
    async fn holds_for_product(&self, product_id: &ProductId) -> Result<Vec<StockHold>>;
}

/// Persistence of reservations.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Inserts a new reservation at version 1.
    async fn insert_reservation(&self, record: ReservationRecord) -> Result<ReservationRecord>;

    /// Retrieves a reservation by ID.
    async fn get_reservation(&self, id: ReservationId) -> Result<Option<ReservationRecord>>;

    /// Compare-and-swaps a reservation.
    ///
    /// `record.version` must be the version the caller read. Returns the
    /// record as stored, at the bumped version.
    async fn update_reservation(&self, record: ReservationRecord) -> Result<ReservationRecord>;

    /// Lists every reservation owned by an order, oldest first.
    async fn reservations_for_order(&self, order_id: OrderId) -> Result<Vec<ReservationRecord>>;

    /// Lists active reservations whose expiry is at or before `now`,
    /// earliest expiry first, at most `limit` of them.
    async fn expired_active_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ReservationRecord>>;
}

/// Persistence of orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order at version 1.
    async fn insert_order(&self, record: OrderRecord) -> Result<OrderRecord>;

    /// Retrieves an order by ID.
    async fn get_order(&self, id: OrderId) -> Result<Option<OrderRecord>>;

    /// Compare-and-swaps an order.
    ///
    /// `record.version` must be the version the caller read.
    async fn update_order(&self, record: OrderRecord) -> Result<OrderRecord>;
}

/// A store backing every component of the core.
pub trait Store: StockStore + ReservationStore + OrderStore + Clone + 'static {}

impl<T> Store for T where T: StockStore + ReservationStore + OrderStore + Clone + 'static {}
