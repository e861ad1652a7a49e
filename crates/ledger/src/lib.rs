//! Inventory ledger for the order and inventory consistency core.
//!
//! This crate provides:
//! - [`InventoryLedger`]: per-product total/reserved counts with holds
//! - [`ConsistencyGuard`]: bounded exponential-backoff retry of
//!   optimistic-version conflicts
//!
//! Every mutation reads the product's stock record, computes the new counts
//! and compare-and-swaps them back together with the hold change. A lost
//! race surfaces as [`LedgerError::StaleVersion`], which the guard retries
//! against a fresh read.

pub mod error;
pub mod guard;
pub mod ledger;

pub use error::{LedgerError, Result};
pub use guard::{ConsistencyGuard, RetryPolicy};
pub use ledger::{InventoryLedger, ReservationToken};
