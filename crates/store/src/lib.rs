//! Persistence seam for the inventory core.
//!
//! Every record carries an explicit [`Version`] column. Writers pass the
//! record they read back in; the store compares that version against the
//! current row and bumps it in the same transaction, failing with
//! [`StoreError::StaleVersion`] when another writer got there first.

pub mod error;
pub mod memory;
pub mod order;
pub mod postgres;
pub mod reservation;
pub mod stock;
pub mod store;
pub mod version;

pub use common::{CustomerId, OrderId, ProductId, ReservationId};
pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use order::{OrderLine, OrderRecord, OrderState};
pub use postgres::PostgresStore;
pub use reservation::{ReservationRecord, ReservationState};
pub use stock::{HoldChange, StockChange, StockHold, StockRecord, StockStatus};
pub use store::{OrderStore, ReservationStore, StockStore, Store};
pub use version::Version;
