//! Per-product stock records and ledger holds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ProductId, ReservationId, Version};

/// Sales status of a product's stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    /// Stock is available for reservation.
    #[default]
    Active,

    /// Nothing left to reserve. Cleared again by a restock or a release.
    SoldOut,

    /// Withdrawn from sale. Existing holds can still be released or committed.
    Discontinued,
}

impl StockStatus {
    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::Active => "ACTIVE",
            StockStatus::SoldOut => "SOLD_OUT",
            StockStatus::Discontinued => "DISCONTINUED",
        }
    }
}

impl std::fmt::Display for StockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StockStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(StockStatus::Active),
            "SOLD_OUT" => Ok(StockStatus::SoldOut),
            "DISCONTINUED" => Ok(StockStatus::Discontinued),
            other => Err(format!("unknown stock status: {other}")),
        }
    }
}

/// Stock counts for one product.
///
/// Invariant: `reserved <= total`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub product_id: ProductId,
    pub total: u32,
    pub reserved: u32,
    pub status: StockStatus,
    pub version: Version,
    pub updated_at: DateTime<Utc>,
}

impl StockRecord {
    /// Creates a record for a product that has not been stored yet.
    pub fn new(product_id: ProductId, total: u32) -> Self {
        let mut record = Self {
            product_id,
            total,
            reserved: 0,
            status: StockStatus::Active,
            version: Version::initial(),
            updated_at: Utc::now(),
        };
        record.refresh_status();
        record
    }

    /// Quantity that can still be reserved.
    pub fn available(&self) -> u32 {
        self.total.saturating_sub(self.reserved)
    }

    /// Recomputes `Active`/`SoldOut` from the counts. `Discontinued` sticks.
    pub fn refresh_status(&mut self) {
        if self.status == StockStatus::Discontinued {
            return;
        }
        self.status = if self.available() == 0 {
            StockStatus::SoldOut
        } else {
            StockStatus::Active
        };
    }
}

/// The ledger's record of one outstanding reservation token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockHold {
    pub token: ReservationId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
}

/// What happens to the hold table alongside a stock update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldChange {
    /// Counts change without touching holds (adjustments, status changes).
    None,
    /// A new hold is recorded.
    Insert(StockHold),
    /// An existing hold is removed.
    Remove(ReservationId),
}

/// An atomic stock write: the updated record plus its hold side effect.
///
/// `record.version` must be the version the caller read; the store writes
/// the row at `record.version.next()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockChange {
    pub record: StockRecord,
    pub hold: HoldChange,
}

impl StockChange {
    pub fn new(record: StockRecord, hold: HoldChange) -> Self {
        Self { record, hold }
    }
}
