//! Reservation management for the order and inventory consistency core.
//!
//! This crate provides:
//! - [`ReservationManager`]: creates time-bounded reservations backed by
//!   ledger holds and moves them through ACTIVE, COMMITTED, RELEASED and
//!   EXPIRED
//! - [`ExpirySweeper`]: a background task that expires overdue reservations

pub mod error;
pub mod manager;
pub mod sweeper;

pub use error::{ReservationError, Result};
pub use manager::{DEFAULT_SWEEP_BATCH_SIZE, ReservationManager, SweepReport};
pub use sweeper::ExpirySweeper;
