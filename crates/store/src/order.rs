//! Order records and their state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CustomerId, OrderId, ProductId, ReservationId, Version};

/// The state of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Confirming ──┬──► Confirmed
///           │                 └──► Failed
///           └──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    /// Reservations are held, awaiting confirmation.
    #[default]
    Pending,

    /// Confirmation claimed the order and is committing reservations.
    Confirming,

    /// Every line was committed (terminal state).
    Confirmed,

    /// Placement was rejected or the order was cancelled (terminal state).
    Cancelled,

    /// A commit failed and every line was rolled back (terminal state).
    Failed,
}

impl OrderState {
    /// Returns true if confirmation can start in this state.
    pub fn can_confirm(&self) -> bool {
        matches!(self, OrderState::Pending)
    }

    /// Returns true if the order can be cancelled in this state.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderState::Pending)
    }

    /// Returns the state name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Pending => "PENDING",
            OrderState::Confirming => "CONFIRMING",
            OrderState::Confirmed => "CONFIRMED",
            OrderState::Cancelled => "CANCELLED",
            OrderState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderState::Pending),
            "CONFIRMING" => Ok(OrderState::Confirming),
            "CONFIRMED" => Ok(OrderState::Confirmed),
            "CANCELLED" => Ok(OrderState::Cancelled),
            "FAILED" => Ok(OrderState::Failed),
            other => Err(format!("unknown order state: {other}")),
        }
    }
}

/// A line item of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
    /// Set once the line's stock is reserved.
    pub reservation_id: Option<ReservationId>,
}

impl OrderLine {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            reservation_id: None,
        }
    }
}

/// A stored order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub lines: Vec<OrderLine>,
    pub state: OrderState,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: Version,
}

impl OrderRecord {
    /// Creates a pending order that has not been stored yet.
    pub fn pending(
        id: OrderId,
        customer_id: CustomerId,
        lines: Vec<OrderLine>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            customer_id,
            lines,
            state: OrderState::Pending,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            version: Version::initial(),
        }
    }

    /// Reservation IDs of every reserved line, in line order.
    pub fn reservation_ids(&self) -> impl Iterator<Item = ReservationId> + '_ {
        self.lines.iter().filter_map(|line| line.reservation_id)
    }

    /// Total number of units across all lines.
    pub fn total_quantity(&self) -> u64 {
        self.lines.iter().map(|line| u64::from(line.quantity)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_orders_confirm_or_cancel() {
        assert!(OrderState::Pending.can_confirm());
        assert!(OrderState::Pending.can_cancel());
        for state in [
            OrderState::Confirming,
            OrderState::Confirmed,
            OrderState::Cancelled,
            OrderState::Failed,
        ] {
            assert!(!state.can_confirm());
            assert!(!state.can_cancel());
        }
    }

    #[test]
    fn reservation_ids_skip_unreserved_lines() {
        let reserved = ReservationId::new();
        let mut order = OrderRecord::pending(
            OrderId::new(),
            CustomerId::new(),
            vec![OrderLine::new("SKU-001", 2), OrderLine::new("SKU-002", 3)],
            Utc::now(),
        );
        order.lines[0].reservation_id = Some(reserved);

        let ids: Vec<_> = order.reservation_ids().collect();
        assert_eq!(ids, vec![reserved]);
        assert_eq!(order.total_quantity(), 5);
    }
}
