//! Order error types.

use common::{OrderId, ProductId};
use reservations::ReservationError;
use store::{OrderState, StoreError};
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// An order needs at least one line.
    #[error("Order has no lines")]
    EmptyOrder,

    /// A line asked for zero units.
    #[error("Invalid quantity on line {line_index} ({product_id})")]
    InvalidQuantity {
        line_index: usize,
        product_id: ProductId,
    },

    /// A line could not be reserved; every other line was released.
    #[error("Order {order_id} rejected: line {line_index} ({product_id}): {cause}")]
    OrderRejected {
        order_id: OrderId,
        line_index: usize,
        product_id: ProductId,
        #[source]
        cause: ReservationError,
    },

    /// A line could not be committed; the order failed and was rolled back.
    #[error(
        "Order {order_id} failed to commit line {line_index} ({product_id}): {cause}; \
         {rollback_failures} line(s) could not be rolled back"
    )]
    PartialCommitFailure {
        order_id: OrderId,
        line_index: usize,
        product_id: ProductId,
        #[source]
        cause: ReservationError,
        rollback_failures: usize,
    },

    /// The order is in the wrong state for the requested operation.
    #[error("Cannot {operation} order {order_id} in state {state}")]
    InvalidState {
        order_id: OrderId,
        state: OrderState,
        operation: &'static str,
    },

    /// The caller may not act on this order.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// No order with this ID exists.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Reservation error.
    #[error("Reservation error: {0}")]
    Reservation(#[from] ReservationError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience type alias for order results.
pub type Result<T> = std::result::Result<T, OrderError>;
