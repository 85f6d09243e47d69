use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::entities::stock_movement;
use crate::services::inventory::{AdjustOp, StockLevel};
use crate::{ApiResponse, ApiResult, AppState, ListQuery, PaginatedResponse};

use super::{actor_id, require_admin};

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub op: AdjustOp,
    pub quantity: i32,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct SafetyStockRequest {
    pub safety_stock: i32,
}

/// GET /inventory/:variant_id
pub async fn get_level(
    State(state): State<AppState>,
    Path(variant_id): Path<Uuid>,
) -> ApiResult<StockLevel> {
    let level = state.inventory.get_level(variant_id).await?;
    Ok(Json(ApiResponse::success(level)))
}

/// GET /inventory/low-stock
pub async fn list_low_stock(State(state): State<AppState>) -> ApiResult<Vec<StockLevel>> {
    let levels = state.inventory.list_low_stock().await?;
    Ok(Json(ApiResponse::success(levels)))
}

/// POST /inventory/:variant_id/adjust
pub async fn adjust_stock(
    State(state): State<AppState>,
    Path(variant_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<AdjustStockRequest>,
) -> ApiResult<StockLevel> {
    require_admin(&headers)?;
    let level = state
        .inventory
        .adjust(
            &*state.db,
            variant_id,
            request.op,
            request.quantity,
            &request.reason,
            actor_id(&headers),
        )
        .await?;
    Ok(Json(ApiResponse::success(level)))
}

/// PUT /inventory/:variant_id/safety-stock
pub async fn set_safety_stock(
    State(state): State<AppState>,
    Path(variant_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<SafetyStockRequest>,
) -> ApiResult<StockLevel> {
    require_admin(&headers)?;
    let level = state
        .inventory
        .set_safety_stock(variant_id, request.safety_stock)
        .await?;
    Ok(Json(ApiResponse::success(level)))
}

/// GET /inventory/:variant_id/movements
pub async fn list_movements(
    State(state): State<AppState>,
    Path(variant_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> ApiResult<PaginatedResponse<stock_movement::Model>> {
    let (movements, total) = state
        .inventory
        .list_movements(variant_id, query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        movements, total, &query,
    ))))
}
