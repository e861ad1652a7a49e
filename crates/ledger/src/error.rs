use common::{ProductId, ReservationId};
use store::{StoreError, Version};
use thiserror::Error;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Not enough unreserved stock.
    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// The stock record changed between read and write.
    #[error(
        "Stale version for {product_id}: expected version {expected}, found {actual}"
    )]
    StaleVersion {
        product_id: ProductId,
        expected: Version,
        actual: Version,
    },

    /// The retry budget for stale versions was used up.
    #[error("Concurrency retries exhausted for {product_id} after {attempts} attempts")]
    ConcurrencyExhausted { product_id: ProductId, attempts: u32 },

    /// No stock record exists for the product.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The product is discontinued.
    #[error("Product unavailable: {0}")]
    ProductUnavailable(ProductId),

    /// The product already has a stock record.
    #[error("Product already registered: {0}")]
    AlreadyRegistered(ProductId),

    /// A quantity or delta is out of range.
    #[error("Invalid quantity: {quantity}")]
    InvalidQuantity { quantity: i64 },

    /// A token was reused for a different product or quantity.
    #[error("Reservation token {0} is already held for a different line")]
    TokenMismatch(ReservationId),

    /// Store error.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl LedgerError {
    /// Returns true if the error is a transient version conflict.
    pub fn is_stale(&self) -> bool {
        matches!(self, LedgerError::StaleVersion { .. })
    }
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::StaleVersion {
                entity: "stock",
                id,
                expected,
                actual,
            } => LedgerError::StaleVersion {
                product_id: ProductId::new(id),
                expected,
                actual,
            },
            other => LedgerError::Store(other),
        }
    }
}

/// Convenience type alias for ledger results.
pub type Result<T> = std::result::Result<T, LedgerError>;
