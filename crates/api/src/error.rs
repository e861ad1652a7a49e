//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ledger::LedgerError;
use orders::OrderError;
use reservations::ReservationError;
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Missing or malformed caller identity.
    Unauthorized(String),
    /// Caller lacks the role for this operation.
    Forbidden(String),
    /// Inventory ledger error.
    Ledger(LedgerError),
    /// Reservation error.
    Reservation(ReservationError),
    /// Order coordination error.
    Order(OrderError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Ledger(err) => (ledger_status(&err), err.to_string()),
            ApiError::Reservation(err) => (reservation_status(&err), err.to_string()),
            ApiError::Order(err) => (order_status(&err), err.to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, "internal server error");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn ledger_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::InsufficientStock { .. }
        | LedgerError::StaleVersion { .. }
        | LedgerError::ConcurrencyExhausted { .. }
        | LedgerError::ProductUnavailable(_)
        | LedgerError::AlreadyRegistered(_)
        | LedgerError::TokenMismatch(_) => StatusCode::CONFLICT,
        LedgerError::ProductNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::InvalidQuantity { .. } => StatusCode::BAD_REQUEST,
        LedgerError::Store(e) => store_status(e),
    }
}

fn reservation_status(err: &ReservationError) -> StatusCode {
    match err {
        ReservationError::InvalidState { .. } | ReservationError::Contended(_) => {
            StatusCode::CONFLICT
        }
        ReservationError::NotFound(_) => StatusCode::NOT_FOUND,
        ReservationError::InvalidTtl(_) => StatusCode::BAD_REQUEST,
        ReservationError::Ledger(e) => ledger_status(e),
        ReservationError::Store(e) => store_status(e),
    }
}

fn order_status(err: &OrderError) -> StatusCode {
    match err {
        OrderError::EmptyOrder | OrderError::InvalidQuantity { .. } => StatusCode::BAD_REQUEST,
        OrderError::OrderRejected { cause, .. } => match reservation_status(cause) {
            // An unknown product on a line is the client's mistake.
            StatusCode::NOT_FOUND => StatusCode::UNPROCESSABLE_ENTITY,
            status => status,
        },
        OrderError::PartialCommitFailure { .. } | OrderError::InvalidState { .. } => {
            StatusCode::CONFLICT
        }
        OrderError::Forbidden(_) => StatusCode::FORBIDDEN,
        OrderError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        OrderError::Reservation(e) => reservation_status(e),
        OrderError::Store(e) => store_status(e),
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::StaleVersion { .. } | StoreError::AlreadyExists { .. } => StatusCode::CONFLICT,
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

impl From<ReservationError> for ApiError {
    fn from(err: ReservationError) -> Self {
        ApiError::Reservation(err)
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Order(err)
    }
}
