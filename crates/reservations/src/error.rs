//! Reservation error types.

use common::ReservationId;
use ledger::LedgerError;
use store::{ReservationState, StoreError};
use thiserror::Error;

/// Errors that can occur during reservation operations.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// The reservation is in the wrong state for the requested transition.
    #[error("Invalid reservation state for {operation} of {id}: {state}")]
    InvalidState {
        id: ReservationId,
        state: ReservationState,
        operation: &'static str,
    },

    /// No reservation with this ID exists.
    #[error("Reservation not found: {0}")]
    NotFound(ReservationId),

    /// The TTL must be positive and representable.
    #[error("Invalid reservation TTL: {0:?}")]
    InvalidTtl(std::time::Duration),

    /// The reservation kept changing under a transition.
    #[error("Reservation {0} changed concurrently too many times")]
    Contended(ReservationId),

    /// Ledger error.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience type alias for reservation results.
pub type Result<T> = std::result::Result<T, ReservationError>;
