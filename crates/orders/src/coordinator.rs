//! Order coordinator: the reserve, confirm and release state machine.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use common::{Caller, Clock, CustomerId, OrderId, ProductId, ReservationId};
use reservations::ReservationManager;
use serde::{Deserialize, Serialize};
use store::{
    OrderLine, OrderRecord, OrderState, OrderStore, ReservationRecord, ReservationState, Store,
    StoreError,
};

use crate::error::{OrderError, Result};

const MAX_FINISH_ATTEMPTS: u32 = 3;
const RELEASE_PASSES: u32 = 2;
const FINISH_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Settings for order placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfig {
    /// How long a pending order holds its stock.
    pub reservation_ttl: Duration,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            reservation_ttl: Duration::from_secs(900),
        }
    }
}

/// Places, confirms and cancels orders.
///
/// Placement reserves every line or none. Confirmation commits every line
/// or rolls all of them back. While confirmation runs the order sits in
/// CONFIRMING, which keeps cancellation out.
pub struct OrderCoordinator<S: Store> {
    store: S,
    reservations: ReservationManager<S>,
    config: OrderConfig,
}

impl<S: Store> Clone for OrderCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            reservations: self.reservations.clone(),
            config: self.config,
        }
    }
}

impl<S: Store> OrderCoordinator<S> {
    /// Creates a coordinator over the reservation manager's store.
    pub fn new(reservations: ReservationManager<S>, config: OrderConfig) -> Self {
        Self {
            store: reservations.ledger().store().clone(),
            reservations,
            config,
        }
    }

    pub fn reservations(&self) -> &ReservationManager<S> {
        &self.reservations
    }

    pub fn config(&self) -> &OrderConfig {
        &self.config
    }

    /// Places an order owned by the caller, reserving stock for every line.
    ///
    /// If any line cannot be reserved, the lines reserved so far are
    /// released, the order is stored as CANCELLED and `OrderRejected` names
    /// the failing line.
    #[tracing::instrument(skip(self, lines), fields(customer_id = %caller.customer_id, lines = lines.len()))]
    pub async fn place_order(&self, caller: &Caller, lines: Vec<OrderLine>) -> Result<OrderRecord> {
        self.place(caller.customer_id, lines).await
    }

    /// Places an order for `customer_id` and confirms it right away.
    ///
    /// Used when payment is captured together with the order, so only an
    /// operator may do it.
    #[tracing::instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn place_and_confirm(
        &self,
        caller: &Caller,
        customer_id: CustomerId,
        lines: Vec<OrderLine>,
    ) -> Result<OrderRecord> {
        require_operator(caller)?;
        let order = self.place(customer_id, lines).await?;
        self.confirm_order(caller, order.id).await
    }

    /// Confirms a pending order by committing every reservation.
    ///
    /// If a commit fails the order becomes FAILED: committed lines get their
    /// stock back and the remaining lines are released.
    #[tracing::instrument(skip(self, caller))]
    pub async fn confirm_order(&self, caller: &Caller, order_id: OrderId) -> Result<OrderRecord> {
        require_operator(caller)?;
        let started = Instant::now();

        let order = self.load(order_id).await?;
        if !order.state.can_confirm() {
            return Err(invalid(&order, "confirm"));
        }
        // Lines get their reservation IDs once placement finishes.
        let Some(targets) = order
            .lines
            .iter()
            .map(|line| line.reservation_id.map(|id| (id, line.product_id.clone())))
            .collect::<Option<Vec<_>>>()
        else {
            return Err(invalid(&order, "confirm"));
        };

        let order = self
            .claim(order, OrderState::Confirming, None, "confirm")
            .await?;
        tracing::info!(%order_id, lines = targets.len(), "confirming order");

        for (index, (reservation_id, product_id)) in targets.iter().enumerate() {
            let Err(cause) = self.reservations.commit(*reservation_id).await else {
                continue;
            };

            tracing::warn!(%order_id, line_index = index, %product_id, error = %cause, "commit failed, rolling back order");
            let rollback_failures = self.roll_back(order_id, &targets, index).await;

            let reason = format!("line {index} ({product_id}): {cause}");
            if let Err(e) = self.finish(order, OrderState::Failed, Some(reason)).await {
                tracing::error!(%order_id, error = %e, "failed to mark order as failed");
            }

            metrics::counter!("orders_failed_total").increment(1);
            return Err(OrderError::PartialCommitFailure {
                order_id,
                line_index: index,
                product_id: product_id.clone(),
                cause,
                rollback_failures,
            });
        }

        let order = match self.finish(order, OrderState::Confirmed, None).await {
            Ok(order) => order,
            Err(e) => {
                tracing::error!(%order_id, error = %e, "confirmation could not be recorded, rolling back order");
                self.roll_back(order_id, &targets, targets.len()).await;
                let reason = format!("confirmation could not be recorded: {e}");
                match self.load(order_id).await {
                    Ok(current) => {
                        if let Err(e) = self.finish(current, OrderState::Failed, Some(reason)).await {
                            tracing::error!(%order_id, error = %e, "failed to mark order as failed");
                        }
                    }
                    Err(e) => tracing::error!(%order_id, error = %e, "failed to reload order"),
                }
                metrics::counter!("orders_failed_total").increment(1);
                return Err(e);
            }
        };

        metrics::counter!("orders_confirmed_total").increment(1);
        metrics::histogram!("order_confirm_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(%order_id, "order confirmed");
        Ok(order)
    }

    /// Cancels a pending order and releases its reservations.
    ///
    /// The owner or an operator may cancel.
    #[tracing::instrument(skip(self, caller))]
    pub async fn cancel_order(&self, caller: &Caller, order_id: OrderId) -> Result<OrderRecord> {
        let order = self.load(order_id).await?;
        authorize(caller, &order)?;
        if !order.state.can_cancel() {
            return Err(invalid(&order, "cancel"));
        }

        let reason = format!("cancelled by {}", caller.role);
        let order = self
            .claim(order, OrderState::Cancelled, Some(reason), "cancel")
            .await?;
        self.release_reservations(order_id).await;

        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::info!(%order_id, "order cancelled");
        Ok(order)
    }

    /// Loads an order visible to the caller.
    pub async fn get_order(&self, caller: &Caller, order_id: OrderId) -> Result<OrderRecord> {
        let order = self.load(order_id).await?;
        authorize(caller, &order)?;
        Ok(order)
    }

    /// Lists the reservations of an order visible to the caller.
    pub async fn order_reservations(
        &self,
        caller: &Caller,
        order_id: OrderId,
    ) -> Result<Vec<ReservationRecord>> {
        self.get_order(caller, order_id).await?;
        Ok(self.reservations.for_order(order_id).await?)
    }

    async fn place(&self, customer_id: CustomerId, lines: Vec<OrderLine>) -> Result<OrderRecord> {
        let lines = validate_lines(lines)?;
        let mut order = self
            .store
            .insert_order(OrderRecord::pending(
                OrderId::new(),
                customer_id,
                lines,
                self.now(),
            ))
            .await?;
        let order_id = order.id;
        tracing::debug!(%order_id, "order stored, reserving lines");

        for index in 0..order.lines.len() {
            let product_id = order.lines[index].product_id.clone();
            let quantity = order.lines[index].quantity;

            match self
                .reservations
                .create(order_id, product_id.clone(), quantity, self.config.reservation_ttl)
                .await
            {
                Ok(reservation) => order.lines[index].reservation_id = Some(reservation.id),
                Err(cause) => {
                    tracing::warn!(%order_id, line_index = index, %product_id, error = %cause, "line reservation failed, rejecting order");
                    self.release_reservations(order_id).await;

                    order.state = OrderState::Cancelled;
                    order.failure_reason = Some(format!("line {index} ({product_id}): {cause}"));
                    order.updated_at = self.now();
                    if let Err(e) = self.store.update_order(order).await {
                        tracing::error!(%order_id, error = %e, "failed to mark rejected order as cancelled");
                    }

                    metrics::counter!("orders_rejected_total").increment(1);
                    return Err(OrderError::OrderRejected {
                        order_id,
                        line_index: index,
                        product_id,
                        cause,
                    });
                }
            }
        }

        order.updated_at = self.now();
        match self.store.update_order(order).await {
            Ok(order) => {
                metrics::counter!("orders_placed_total").increment(1);
                tracing::info!(%order_id, "order placed");
                Ok(order)
            }
            Err(e) => {
                // Cancelled while its lines were being reserved.
                tracing::warn!(%order_id, error = %e, "order changed during placement, releasing lines");
                self.release_reservations(order_id).await;
                Err(e.into())
            }
        }
    }

    /// Reverts lines before `failed` and releases the rest. Returns the
    /// number of lines that could not be rolled back.
    async fn roll_back(
        &self,
        order_id: OrderId,
        targets: &[(ReservationId, ProductId)],
        failed: usize,
    ) -> usize {
        let mut failures = 0;
        for (index, (reservation_id, _)) in targets.iter().enumerate() {
            let result = if index < failed {
                self.reservations.revert_commit(*reservation_id).await
            } else {
                self.reservations.release(*reservation_id).await
            };
            if let Err(e) = result {
                failures += 1;
                tracing::error!(%order_id, line_index = index, error = %e, "order rollback step failed");
            }
        }
        failures
    }

    /// Releases every ACTIVE reservation of the order.
    ///
    /// A reservation another caller is releasing reads as RELEASED until its
    /// ledger step finishes, and goes back to ACTIVE if that step fails. The
    /// order is re-read afterwards so such a reservation is released here
    /// rather than waiting for the expiry sweep.
    async fn release_reservations(&self, order_id: OrderId) {
        for pass in 0..=RELEASE_PASSES {
            let reservations = match self.reservations.for_order(order_id).await {
                Ok(reservations) => reservations,
                Err(e) => {
                    tracing::error!(%order_id, error = %e, "failed to list order reservations");
                    return;
                }
            };

            let active: Vec<_> = reservations
                .into_iter()
                .filter(|r| r.state == ReservationState::Active)
                .collect();
            if active.is_empty() {
                return;
            }
            if pass == RELEASE_PASSES {
                // Left for the expiry sweep.
                tracing::warn!(%order_id, remaining = active.len(), "order reservations still active after release");
                return;
            }

            for reservation in active {
                if let Err(e) = self.reservations.release(reservation.id).await {
                    tracing::error!(%order_id, reservation_id = %reservation.id, error = %e, "failed to release reservation");
                }
            }
        }
    }

    async fn load(&self, order_id: OrderId) -> Result<OrderRecord> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))
    }

    /// Moves the order to `state` by compare-and-swap. Losing the race
    /// reports the state the winner left behind.
    async fn claim(
        &self,
        mut order: OrderRecord,
        state: OrderState,
        reason: Option<String>,
        operation: &'static str,
    ) -> Result<OrderRecord> {
        let order_id = order.id;
        order.state = state;
        order.failure_reason = reason;
        order.updated_at = self.now();

        match self.store.update_order(order).await {
            Ok(order) => Ok(order),
            Err(StoreError::StaleVersion { .. }) => {
                let current = self.load(order_id).await?;
                Err(invalid(&current, operation))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Moves an order this caller holds in CONFIRMING to its final state.
    ///
    /// Nothing else may move a CONFIRMING order, so failed writes are
    /// retried against a fresh read. A write that landed despite reporting
    /// an error is recognized on the re-read.
    async fn finish(
        &self,
        mut order: OrderRecord,
        state: OrderState,
        reason: Option<String>,
    ) -> Result<OrderRecord> {
        let order_id = order.id;
        let mut attempt = 0;

        loop {
            attempt += 1;
            order.state = state;
            order.failure_reason = reason.clone();
            order.updated_at = self.now();

            let err = match self.store.update_order(order).await {
                Ok(stored) => return Ok(stored),
                Err(e) => e,
            };
            tracing::warn!(%order_id, %state, attempt, error = %err, "order state write failed");

            let current = self.load(order_id).await?;
            if current.state == state {
                return Ok(current);
            }
            if current.state != OrderState::Confirming {
                return Err(invalid(&current, "confirm"));
            }
            if attempt >= MAX_FINISH_ATTEMPTS {
                return Err(err.into());
            }
            order = current;
            tokio::time::sleep(FINISH_RETRY_DELAY * attempt).await;
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.reservations.clock().now()
    }
}

fn validate_lines(lines: Vec<OrderLine>) -> Result<Vec<OrderLine>> {
    if lines.is_empty() {
        return Err(OrderError::EmptyOrder);
    }

    lines
        .into_iter()
        .enumerate()
        .map(|(line_index, mut line)| {
            if line.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    line_index,
                    product_id: line.product_id,
                });
            }
            line.reservation_id = None;
            Ok(line)
        })
        .collect()
}

fn require_operator(caller: &Caller) -> Result<()> {
    if caller.is_operator() {
        Ok(())
    } else {
        Err(OrderError::Forbidden(
            "order confirmation requires the operator role".to_string(),
        ))
    }
}

fn authorize(caller: &Caller, order: &OrderRecord) -> Result<()> {
    if caller.can_act_for(order.customer_id) {
        Ok(())
    } else {
        Err(OrderError::Forbidden(format!(
            "customer {} may not access order {}",
            caller.customer_id, order.id
        )))
    }
}

fn invalid(order: &OrderRecord, operation: &'static str) -> OrderError {
    OrderError::InvalidState {
        order_id: order.id,
        state: order.state,
        operation,
    }
}
