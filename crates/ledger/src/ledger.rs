//! Inventory ledger: total and reserved stock per product.

use chrono::Utc;
use common::{ProductId, ReservationId};
use serde::{Deserialize, Serialize};
use store::{HoldChange, StockChange, StockHold, StockRecord, StockStatus, StockStore, StoreError};

use crate::error::{LedgerError, Result};
use crate::guard::{ConsistencyGuard, RetryPolicy};

/// Proof of a successful reservation: the hold the ledger keeps for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationToken {
    pub id: ReservationId,
    pub product_id: ProductId,
    pub quantity: u32,
}

impl From<StockHold> for ReservationToken {
    fn from(hold: StockHold) -> Self {
        Self {
            id: hold.token,
            product_id: hold.product_id,
            quantity: hold.quantity,
        }
    }
}

/// Tracks available and reserved stock per product.
///
/// Every mutation is a single compare-and-swap of the product's stock record
/// (plus its hold change), wrapped in the [`ConsistencyGuard`]. No stock is
/// cached in memory; the store is the only source of truth.
#[derive(Clone)]
pub struct InventoryLedger<S: StockStore> {
    store: S,
    guard: ConsistencyGuard,
}

impl<S: StockStore> InventoryLedger<S> {
    /// Creates a ledger with the default retry policy.
    pub fn new(store: S) -> Self {
        Self::with_policy(store, RetryPolicy::default())
    }

    /// Creates a ledger with a custom retry policy.
    pub fn with_policy(store: S, policy: RetryPolicy) -> Self {
        Self {
            store,
            guard: ConsistencyGuard::new(policy),
        }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Registers a product with its initial stock.
    #[tracing::instrument(skip(self))]
    pub async fn register(&self, product_id: ProductId, initial_total: u32) -> Result<StockRecord> {
        let record = StockRecord::new(product_id.clone(), initial_total);
        match self.store.insert_stock(record).await {
            Ok(stored) => {
                tracing::info!(%product_id, initial_total, "product stock registered");
                Ok(stored)
            }
            Err(StoreError::AlreadyExists { .. }) => Err(LedgerError::AlreadyRegistered(product_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Loads the current stock record of a product.
    pub async fn stock(&self, product_id: &ProductId) -> Result<StockRecord> {
        self.store
            .get_stock(product_id)
            .await?
            .ok_or_else(|| LedgerError::ProductNotFound(product_id.clone()))
    }

    /// Lists the outstanding holds of a product.
    pub async fn holds(&self, product_id: &ProductId) -> Result<Vec<StockHold>> {
        Ok(self.store.holds_for_product(product_id).await?)
    }

    /// Adds `delta` (possibly negative) to the product's total stock.
    ///
    /// The total can never drop below what is currently reserved.
    #[tracing::instrument(skip(self))]
    pub async fn adjust(&self, product_id: &ProductId, delta: i64) -> Result<StockRecord> {
        let record = self
            .guard
            .run(product_id, move || self.try_adjust(product_id, delta))
            .await?;

        metrics::counter!("ledger_adjustments_total").increment(1);
        tracing::info!(%product_id, delta, total = record.total, "stock adjusted");
        Ok(record)
    }

    /// Withdraws a product from sale. Existing holds stay resolvable.
    #[tracing::instrument(skip(self))]
    pub async fn discontinue(&self, product_id: &ProductId) -> Result<StockRecord> {
        self.guard
            .run(product_id, move || self.try_discontinue(product_id))
            .await
    }

    /// Reserves `quantity` units under a fresh token.
    pub async fn reserve(&self, product_id: &ProductId, quantity: u32) -> Result<ReservationToken> {
        self.reserve_with_token(ReservationId::new(), product_id, quantity)
            .await
    }

    /// Reserves `quantity` units under a caller-chosen token.
    ///
    /// Retrying with a token that is already held for the same product and
    /// quantity returns the existing hold instead of reserving twice.
    #[tracing::instrument(skip(self))]
    pub async fn reserve_with_token(
        &self,
        token: ReservationId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<ReservationToken> {
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity { quantity: 0 });
        }

        let result = self
            .guard
            .run(product_id, move || {
                self.try_reserve(token, product_id, quantity)
            })
            .await;

        match &result {
            Ok(_) => metrics::counter!("ledger_reservations_total").increment(1),
            Err(LedgerError::InsufficientStock { .. }) => {
                metrics::counter!("ledger_insufficient_stock_total").increment(1)
            }
            Err(_) => {}
        }
        result
    }

    /// Returns a hold's stock to the available pool.
    ///
    /// Releasing an unknown (or already resolved) token is a no-op and
    /// returns `None`.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, token: ReservationId) -> Result<Option<StockRecord>> {
        let Some(hold) = self.store.get_hold(token).await? else {
            return Ok(None);
        };

        let result = self
            .guard
            .run(&hold.product_id, move || {
                self.try_resolve(token, Resolution::Release)
            })
            .await?;

        if result.is_some() {
            metrics::counter!("ledger_releases_total").increment(1);
        }
        Ok(result)
    }

    /// Takes a hold's stock out of the total: the units leave with the order.
    ///
    /// Committing an unknown (or already resolved) token is a no-op and
    /// returns `None`.
    #[tracing::instrument(skip(self))]
    pub async fn commit(&self, token: ReservationId) -> Result<Option<StockRecord>> {
        let Some(hold) = self.store.get_hold(token).await? else {
            return Ok(None);
        };

        let result = self
            .guard
            .run(&hold.product_id, move || {
                self.try_resolve(token, Resolution::Commit)
            })
            .await?;

        if result.is_some() {
            metrics::counter!("ledger_commits_total").increment(1);
        }
        Ok(result)
    }

    // Single attempts. Each one re-reads the record it mutates.

    async fn try_adjust(&self, product_id: &ProductId, delta: i64) -> Result<StockRecord> {
        let mut record = self.stock(product_id).await?;
        if delta == 0 {
            return Ok(record);
        }

        let new_total = i64::from(record.total) + delta;
        if new_total < i64::from(record.reserved) {
            return Err(LedgerError::InsufficientStock {
                product_id: product_id.clone(),
                requested: u32::try_from(delta.unsigned_abs()).unwrap_or(u32::MAX),
                available: record.available(),
            });
        }
        record.total =
            u32::try_from(new_total).map_err(|_| LedgerError::InvalidQuantity { quantity: delta })?;
        record.updated_at = Utc::now();
        record.refresh_status();

        Ok(self
            .store
            .apply_stock_change(StockChange::new(record, HoldChange::None))
            .await?)
    }

    async fn try_discontinue(&self, product_id: &ProductId) -> Result<StockRecord> {
        let mut record = self.stock(product_id).await?;
        if record.status == StockStatus::Discontinued {
            return Ok(record);
        }

        record.status = StockStatus::Discontinued;
        record.updated_at = Utc::now();
        Ok(self
            .store
            .apply_stock_change(StockChange::new(record, HoldChange::None))
            .await?)
    }

    async fn try_reserve(
        &self,
        token: ReservationId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<ReservationToken> {
        if let Some(existing) = self.store.get_hold(token).await? {
            if &existing.product_id == product_id && existing.quantity == quantity {
                tracing::debug!(%token, "reservation token already held, reusing");
                return Ok(existing.into());
            }
            return Err(LedgerError::TokenMismatch(token));
        }

        let mut record = self.stock(product_id).await?;
        if record.status == StockStatus::Discontinued {
            return Err(LedgerError::ProductUnavailable(product_id.clone()));
        }
        if record.available() < quantity {
            return Err(LedgerError::InsufficientStock {
                product_id: product_id.clone(),
                requested: quantity,
                available: record.available(),
            });
        }

        let now = Utc::now();
        record.reserved += quantity;
        record.updated_at = now;
        record.refresh_status();

        let hold = StockHold {
            token,
            product_id: product_id.clone(),
            quantity,
            created_at: now,
        };
        match self
            .store
            .apply_stock_change(StockChange::new(record, HoldChange::Insert(hold.clone())))
            .await
        {
            Ok(_) => Ok(hold.into()),
            // A concurrent caller placed the same token first.
            Err(StoreError::AlreadyExists { entity: "hold", .. }) => {
                match self.store.get_hold(token).await? {
                    Some(existing)
                        if &existing.product_id == product_id && existing.quantity == quantity =>
                    {
                        Ok(existing.into())
                    }
                    _ => Err(LedgerError::TokenMismatch(token)),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn try_resolve(
        &self,
        token: ReservationId,
        resolution: Resolution,
    ) -> Result<Option<StockRecord>> {
        let Some(hold) = self.store.get_hold(token).await? else {
            return Ok(None);
        };

        let mut record = self.stock(&hold.product_id).await?;
        if record.reserved < hold.quantity {
            tracing::error!(
                product_id = %hold.product_id,
                reserved = record.reserved,
                hold = hold.quantity,
                "reserved count below outstanding hold"
            );
        }
        record.reserved = record.reserved.saturating_sub(hold.quantity);
        if resolution == Resolution::Commit {
            record.total = record.total.saturating_sub(hold.quantity);
        }
        record.updated_at = Utc::now();
        record.refresh_status();

        match self
            .store
            .apply_stock_change(StockChange::new(record, HoldChange::Remove(token)))
            .await
        {
            Ok(stored) => Ok(Some(stored)),
            // Resolved by a concurrent caller after our read of the hold.
            Err(StoreError::NotFound { entity: "hold", .. }) => {
                tracing::debug!(%token, "hold already resolved");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Release,
    Commit,
}
