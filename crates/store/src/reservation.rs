//! Reservation records and their state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{OrderId, ProductId, ReservationId, Version};

/// The state of a reservation in its lifecycle.
///
/// State transitions:
/// ```text
/// Active ──┬──► Committed ──► Released   (rollback only)
///          ├──► Released
///          └──► Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationState {
    /// Stock is held for the owning order.
    #[default]
    Active,

    /// Stock left the warehouse with the order.
    Committed,

    /// TTL ran out before the order was confirmed.
    Expired,

    /// Stock was handed back.
    Released,
}

impl ReservationState {
    /// Returns true if the reservation can be committed in this state.
    pub fn can_commit(&self) -> bool {
        matches!(self, ReservationState::Active)
    }

    /// Returns true if the stock held by this reservation was already handed back.
    pub fn is_returned(&self) -> bool {
        matches!(self, ReservationState::Released | ReservationState::Expired)
    }

    /// Returns the state name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationState::Active => "ACTIVE",
            ReservationState::Committed => "COMMITTED",
            ReservationState::Expired => "EXPIRED",
            ReservationState::Released => "RELEASED",
        }
    }
}

impl std::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReservationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(ReservationState::Active),
            "COMMITTED" => Ok(ReservationState::Committed),
            "EXPIRED" => Ok(ReservationState::Expired),
            "RELEASED" => Ok(ReservationState::Released),
            other => Err(format!("unknown reservation state: {other}")),
        }
    }
}

/// A time-bounded claim on stock owned by an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub id: ReservationId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub state: ReservationState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: Version,
}

impl ReservationRecord {
    /// Creates an active reservation that has not been stored yet.
    pub fn active(
        id: ReservationId,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            order_id,
            product_id,
            quantity,
            state: ReservationState::Active,
            created_at: now,
            expires_at,
            updated_at: now,
            version: Version::initial(),
        }
    }

    /// Returns true if the TTL has run out at `now`.
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Returns a copy moved to `state`, keeping the read version for the CAS.
    pub fn transitioned(&self, state: ReservationState, now: DateTime<Utc>) -> Self {
        Self {
            state,
            updated_at: now,
            ..self.clone()
        }
    }
}
