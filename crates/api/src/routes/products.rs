//! Product stock endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use common::ProductId;
use serde::{Deserialize, Serialize};
use store::{StockRecord, Store};

use crate::caller::operator_from_headers;
use crate::error::ApiError;
use crate::routes::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct RegisterStockRequest {
    pub total: u32,
}

#[derive(Deserialize)]
pub struct AdjustStockRequest {
    pub delta: i64,
}

// -- Response types --

#[derive(Serialize)]
pub struct StockResponse {
    pub product_id: String,
    pub total: u32,
    pub reserved: u32,
    pub available: u32,
    pub status: String,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<StockRecord> for StockResponse {
    fn from(record: StockRecord) -> Self {
        Self {
            available: record.available(),
            product_id: record.product_id.to_string(),
            total: record.total,
            reserved: record.reserved,
            status: record.status.to_string(),
            version: record.version.as_i64(),
            updated_at: record.updated_at,
        }
    }
}

// -- Handlers --

/// POST /products/{id}/stock: register a product with its initial stock.
#[tracing::instrument(skip(state, headers, req))]
pub async fn register<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<RegisterStockRequest>,
) -> Result<(StatusCode, Json<StockResponse>), ApiError> {
    operator_from_headers(&headers)?;
    let product_id = parse_product_id(&id)?;

    let record = state.ledger.register(product_id, req.total).await?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

/// GET /products/{id}/stock: current stock counts of a product.
#[tracing::instrument(skip(state))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<StockResponse>, ApiError> {
    let product_id = parse_product_id(&id)?;
    let record = state.ledger.stock(&product_id).await?;
    Ok(Json(record.into()))
}

/// POST /products/{id}/stock/adjust: add to or remove from total stock.
#[tracing::instrument(skip(state, headers, req))]
pub async fn adjust<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AdjustStockRequest>,
) -> Result<Json<StockResponse>, ApiError> {
    operator_from_headers(&headers)?;
    let product_id = parse_product_id(&id)?;

    let record = state.ledger.adjust(&product_id, req.delta).await?;
    Ok(Json(record.into()))
}

/// DELETE /products/{id}/stock: withdraw a product from sale.
#[tracing::instrument(skip(state, headers))]
pub async fn discontinue<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<StockResponse>, ApiError> {
    operator_from_headers(&headers)?;
    let product_id = parse_product_id(&id)?;

    let record = state.ledger.discontinue(&product_id).await?;
    Ok(Json(record.into()))
}

fn parse_product_id(id: &str) -> Result<ProductId, ApiError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ApiError::BadRequest("Product ID must not be empty".to_string()));
    }
    Ok(ProductId::new(id))
}
