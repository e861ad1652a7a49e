//! Caller identity from request headers.
//!
//! Token verification happens upstream; this layer trusts the identity the
//! gateway forwards in `x-customer-id` and `x-caller-role`.

use axum::http::HeaderMap;
use common::{Caller, CustomerId, Role};

use crate::error::ApiError;

pub const CUSTOMER_ID_HEADER: &str = "x-customer-id";
pub const ROLE_HEADER: &str = "x-caller-role";

/// Reads the caller from the request headers. The role defaults to customer.
pub fn caller_from_headers(headers: &HeaderMap) -> Result<Caller, ApiError> {
    let customer_id = header(headers, CUSTOMER_ID_HEADER)?
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {CUSTOMER_ID_HEADER} header")))?;
    let customer_id = uuid::Uuid::parse_str(customer_id)
        .map(CustomerId::from_uuid)
        .map_err(|e| ApiError::Unauthorized(format!("invalid {CUSTOMER_ID_HEADER}: {e}")))?;

    let role = match header(headers, ROLE_HEADER)? {
        Some(value) => value.parse::<Role>().map_err(ApiError::Unauthorized)?,
        None => Role::Customer,
    };

    Ok(Caller { customer_id, role })
}

/// Reads the caller and requires the operator role.
pub fn operator_from_headers(headers: &HeaderMap) -> Result<Caller, ApiError> {
    let caller = caller_from_headers(headers)?;
    if caller.is_operator() {
        Ok(caller)
    } else {
        Err(ApiError::Forbidden(
            "this operation requires the operator role".to_string(),
        ))
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, ApiError> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::trim)
                .map_err(|_| ApiError::Unauthorized(format!("{name} is not valid text")))
        })
        .transpose()
}
