use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use std::str::FromStr;
use uuid::Uuid;

use crate::entities::order::{self, OrderStatus};
use crate::errors::ServiceError;
use crate::services::orders::{CreateOrderRequest, OrderDetail};
use crate::services::payments::PaymentOutcome;
use crate::{ApiResponse, ApiResult, AppState, ListQuery, PaginatedResponse};

use super::{idempotency_key, require_admin, require_user};

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
}

/// POST /orders
pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateOrderRequest>,
) -> ApiResult<OrderDetail> {
    let user_id = require_user(&headers)?;
    let key = idempotency_key(&headers);
    let detail = state.orders.create_order(user_id, request, key).await?;
    Ok(Json(ApiResponse::success(detail)))
}

/// GET /orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderDetail> {
    let detail = state.orders.get_order(order_id).await?;
    Ok(Json(ApiResponse::success(detail)))
}

/// GET /orders
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<PaginatedResponse<order::Model>> {
    let (orders, total) = state.orders.list_orders(query.page, query.limit).await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        orders, total, &query,
    ))))
}

/// PUT /orders/:id/status
///
/// Cancellation routes through the payment pipeline so the reservation is
/// released under the same compare-and-set guard the scheduler uses.
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> ApiResult<OrderDetail> {
    require_admin(&headers)?;
    let status = OrderStatus::from_str(&request.status)
        .map_err(|_| ServiceError::ValidationError(format!("Unknown status {}", request.status)))?;

    if status == OrderStatus::Cancelled {
        let outcome = state.payments.cancel_order(order_id).await?;
        if outcome == PaymentOutcome::AlreadyResolved {
            return Err(ServiceError::Conflict(format!(
                "Order {order_id} payment is already resolved and cannot be cancelled"
            )));
        }
    } else {
        state.orders.update_order_status(order_id, status).await?;
    }

    let detail = state.orders.get_order(order_id).await?;
    Ok(Json(ApiResponse::success(detail)))
}
