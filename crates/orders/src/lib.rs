//! Order coordination for the order and inventory consistency core.
//!
//! [`OrderCoordinator`] drives each order through
//!
//! ```text
//! PENDING ──┬──► CONFIRMING ──┬──► CONFIRMED
//!           │                 └──► FAILED      (every line rolled back)
//!           └──► CANCELLED                     (every line released)
//! ```
//!
//! on top of the reservation manager and the inventory ledger.

pub mod coordinator;
pub mod error;

pub use coordinator::{OrderConfig, OrderCoordinator};
pub use error::{OrderError, Result};
