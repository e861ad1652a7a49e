//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod orders;
pub mod products;

use ledger::InventoryLedger;
use ::orders::OrderCoordinator;
use store::Store;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub ledger: InventoryLedger<S>,
    pub orders: OrderCoordinator<S>,
}
