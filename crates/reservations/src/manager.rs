//! Reservation manager: order lines to time-bounded stock holds.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{Clock, OrderId, ProductId, ReservationId};
use ledger::InventoryLedger;
use serde::Serialize;
use store::{ReservationRecord, ReservationState, ReservationStore, StockStore, StoreError};

use crate::error::{ReservationError, Result};

/// Default number of reservations expired per store query during a sweep.
pub const DEFAULT_SWEEP_BATCH_SIZE: usize = 500;

// A reservation only leaves ACTIVE once (plus one rollback hop), so a lost
// claim is resolved by re-reading at most a couple of times.
const MAX_CLAIM_ATTEMPTS: u32 = 3;

/// Outcome of one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Overdue active reservations found.
    pub scanned: usize,
    /// Reservations moved to EXPIRED with their stock released.
    pub expired: usize,
    /// Reservations another caller transitioned first.
    pub skipped: usize,
    /// Reservations whose release failed; they stay ACTIVE for the next sweep.
    pub failed: usize,
}

/// Creates and transitions reservations on top of the inventory ledger.
///
/// Every transition first claims the reservation row by compare-and-swap on
/// its version and only then applies the ledger effect. If the ledger step
/// fails the claim is put back, so a reservation's state and its ledger hold
/// never disagree for longer than one call.
pub struct ReservationManager<S>
where
    S: StockStore + ReservationStore + Clone,
{
    store: S,
    ledger: InventoryLedger<S>,
    clock: Arc<dyn Clock>,
    sweep_batch_size: usize,
}

impl<S> Clone for ReservationManager<S>
where
    S: StockStore + ReservationStore + Clone,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ledger: self.ledger.clone(),
            clock: Arc::clone(&self.clock),
            sweep_batch_size: self.sweep_batch_size,
        }
    }
}

impl<S> ReservationManager<S>
where
    S: StockStore + ReservationStore + Clone,
{
    /// Creates a manager over the ledger's store.
    pub fn new(ledger: InventoryLedger<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: ledger.store().clone(),
            ledger,
            clock,
            sweep_batch_size: DEFAULT_SWEEP_BATCH_SIZE,
        }
    }

    /// Sets how many reservations a sweep loads per store query.
    pub fn with_sweep_batch_size(mut self, size: usize) -> Self {
        self.sweep_batch_size = size.max(1);
        self
    }

    pub fn ledger(&self) -> &InventoryLedger<S> {
        &self.ledger
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Reserves stock for an order line and records an ACTIVE reservation
    /// expiring `ttl` from now.
    ///
    /// The reservation ID doubles as the ledger token. If the reservation
    /// cannot be stored the ledger hold is released again.
    #[tracing::instrument(skip(self))]
    pub async fn create(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
        ttl: Duration,
    ) -> Result<ReservationRecord> {
        let ttl = chrono::Duration::from_std(ttl)
            .ok()
            .filter(|t| *t > chrono::Duration::zero())
            .ok_or(ReservationError::InvalidTtl(ttl))?;

        let id = ReservationId::new();
        self.ledger
            .reserve_with_token(id, &product_id, quantity)
            .await?;

        let now = self.clock.now();
        let record = ReservationRecord::active(id, order_id, product_id, quantity, now, now + ttl);
        match self.store.insert_reservation(record).await {
            Ok(stored) => {
                metrics::counter!("reservations_created_total").increment(1);
                tracing::info!(reservation_id = %id, quantity, expires_at = %stored.expires_at, "reservation created");
                Ok(stored)
            }
            Err(e) => {
                tracing::warn!(reservation_id = %id, error = %e, "storing reservation failed, releasing hold");
                if let Err(release_err) = self.ledger.release(id).await {
                    tracing::error!(reservation_id = %id, error = %release_err, "failed to release orphaned hold");
                }
                Err(e.into())
            }
        }
    }

    /// Loads a reservation.
    pub async fn get(&self, id: ReservationId) -> Result<ReservationRecord> {
        self.store
            .get_reservation(id)
            .await?
            .ok_or(ReservationError::NotFound(id))
    }

    /// Lists every reservation owned by an order, oldest first.
    pub async fn for_order(&self, order_id: OrderId) -> Result<Vec<ReservationRecord>> {
        Ok(self.store.reservations_for_order(order_id).await?)
    }

    /// Moves an ACTIVE reservation to COMMITTED and takes its stock out of
    /// the ledger.
    ///
    /// A reservation found past its expiry is expired on the spot (stock
    /// released) and the commit fails with `InvalidState`.
    #[tracing::instrument(skip(self))]
    pub async fn commit(&self, id: ReservationId) -> Result<ReservationRecord> {
        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let record = self.get(id).await?;
            if !record.state.can_commit() {
                return Err(invalid(id, record.state, "commit"));
            }

            let now = self.clock.now();
            if record.is_past_expiry(now) {
                if self.expire(&record, now).await?.is_none() {
                    continue;
                }
                return Err(invalid(id, ReservationState::Expired, "commit"));
            }

            let Some(claimed) = self.claim(&record, ReservationState::Committed, now).await? else {
                continue;
            };
            match self.ledger.commit(id).await {
                Ok(stock) => {
                    if stock.is_none() {
                        tracing::warn!(reservation_id = %id, "no ledger hold for committed reservation");
                    }
                    metrics::counter!("reservations_committed_total").increment(1);
                    tracing::info!(reservation_id = %id, "reservation committed");
                    return Ok(claimed);
                }
                Err(e) => {
                    self.unclaim(&claimed, ReservationState::Active).await;
                    return Err(e.into());
                }
            }
        }

        Err(ReservationError::Contended(id))
    }

    /// Moves an ACTIVE reservation to RELEASED and returns its stock.
    ///
    /// Releasing a RELEASED or EXPIRED reservation is a no-op that returns
    /// the stored record. A COMMITTED reservation cannot be released; see
    /// [`revert_commit`](Self::revert_commit).
    ///
    /// A reservation reads as RELEASED as soon as it is claimed. If the
    /// claimer's ledger release then fails it goes back to ACTIVE, so a
    /// caller that saw the no-op must re-read to be sure the stock is free.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, id: ReservationId) -> Result<ReservationRecord> {
        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let record = self.get(id).await?;
            if record.state.is_returned() {
                return Ok(record);
            }
            if record.state == ReservationState::Committed {
                return Err(invalid(id, record.state, "release"));
            }

            let now = self.clock.now();
            let Some(claimed) = self.claim(&record, ReservationState::Released, now).await? else {
                continue;
            };
            if let Err(e) = self.ledger.release(id).await {
                self.unclaim(&claimed, ReservationState::Active).await;
                return Err(e.into());
            }

            metrics::counter!("reservations_released_total").increment(1);
            tracing::info!(reservation_id = %id, "reservation released");
            return Ok(claimed);
        }

        Err(ReservationError::Contended(id))
    }

    /// Undoes a commit: COMMITTED to RELEASED, adding the quantity back to
    /// the product's total stock.
    ///
    /// Already returned reservations are left as they are.
    #[tracing::instrument(skip(self))]
    pub async fn revert_commit(&self, id: ReservationId) -> Result<ReservationRecord> {
        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let record = self.get(id).await?;
            if record.state.is_returned() {
                return Ok(record);
            }
            if record.state == ReservationState::Active {
                return Err(invalid(id, record.state, "revert_commit"));
            }

            let now = self.clock.now();
            let Some(claimed) = self.claim(&record, ReservationState::Released, now).await? else {
                continue;
            };
            if let Err(e) = self
                .ledger
                .adjust(&record.product_id, i64::from(record.quantity))
                .await
            {
                self.unclaim(&claimed, ReservationState::Committed).await;
                return Err(e.into());
            }

            metrics::counter!("reservations_reverted_total").increment(1);
            tracing::info!(reservation_id = %id, quantity = record.quantity, "reservation commit reverted");
            return Ok(claimed);
        }

        Err(ReservationError::Contended(id))
    }

    /// Expires every ACTIVE reservation whose expiry is at or before `now`.
    ///
    /// Failures are counted in the report and left ACTIVE for the next sweep.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        loop {
            let due = self
                .store
                .expired_active_reservations(now, self.sweep_batch_size)
                .await?;
            let batch_len = due.len();
            let mut expired_in_batch = 0;

            for record in due {
                report.scanned += 1;
                match self.expire(&record, now).await {
                    Ok(Some(_)) => {
                        report.expired += 1;
                        expired_in_batch += 1;
                    }
                    Ok(None) => report.skipped += 1,
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!(reservation_id = %record.id, error = %e, "failed to expire reservation");
                    }
                }
            }

            if batch_len < self.sweep_batch_size || expired_in_batch == 0 {
                break;
            }
        }

        if report.scanned > 0 {
            tracing::info!(
                expired = report.expired,
                skipped = report.skipped,
                failed = report.failed,
                "expiry sweep finished"
            );
        }
        Ok(report)
    }

    /// Claims an ACTIVE reservation as EXPIRED and releases its hold.
    ///
    /// Returns `None` if another caller moved the reservation first.
    async fn expire(
        &self,
        record: &ReservationRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<ReservationRecord>> {
        let Some(claimed) = self.claim(record, ReservationState::Expired, now).await? else {
            return Ok(None);
        };
        if let Err(e) = self.ledger.release(record.id).await {
            self.unclaim(&claimed, ReservationState::Active).await;
            return Err(e.into());
        }

        metrics::counter!("reservations_expired_total").increment(1);
        tracing::info!(reservation_id = %record.id, expires_at = %record.expires_at, "reservation expired");
        Ok(Some(claimed))
    }

    async fn claim(
        &self,
        record: &ReservationRecord,
        state: ReservationState,
        now: DateTime<Utc>,
    ) -> Result<Option<ReservationRecord>> {
        match self
            .store
            .update_reservation(record.transitioned(state, now))
            .await
        {
            Ok(claimed) => Ok(Some(claimed)),
            Err(StoreError::StaleVersion { .. }) => {
                tracing::debug!(reservation_id = %record.id, %state, "reservation claim lost");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn unclaim(&self, claimed: &ReservationRecord, state: ReservationState) {
        let reverted = claimed.transitioned(state, self.clock.now());
        if let Err(e) = self.store.update_reservation(reverted).await {
            tracing::error!(reservation_id = %claimed.id, error = %e, "failed to revert reservation claim");
        }
    }
}

fn invalid(id: ReservationId, state: ReservationState, operation: &'static str) -> ReservationError {
    ReservationError::InvalidState {
        id,
        state,
        operation,
    }
}
