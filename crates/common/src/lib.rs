//! Shared types for the order and inventory consistency core.

pub mod caller;
pub mod clock;
pub mod types;

pub use caller::{Caller, Role};
pub use clock::{Clock, ManualClock, SystemClock};
pub use types::{CustomerId, OrderId, ProductId, ReservationId};
