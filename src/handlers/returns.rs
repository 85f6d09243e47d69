use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use std::str::FromStr;
use uuid::Uuid;

use crate::entities::return_entity::{self, ReturnStatus};
use crate::errors::ServiceError;
use crate::services::returns::{CreateReturnRequest, ReturnDetail};
use crate::{ApiResponse, ApiResult, AppState, ListQuery, PaginatedResponse};

use super::{require_admin, require_user};

#[derive(Debug, Deserialize)]
pub struct UpdateReturnStatusRequest {
    pub status: String,
}

/// POST /returns
pub async fn create_return(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateReturnRequest>,
) -> ApiResult<ReturnDetail> {
    let user_id = require_user(&headers)?;
    let detail = state.returns.create_return(user_id, request).await?;
    Ok(Json(ApiResponse::success(detail)))
}

/// GET /returns/:id
pub async fn get_return(
    State(state): State<AppState>,
    Path(return_id): Path<Uuid>,
) -> ApiResult<ReturnDetail> {
    let detail = state.returns.get_return(return_id).await?;
    Ok(Json(ApiResponse::success(detail)))
}

/// GET /returns
pub async fn list_returns(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<PaginatedResponse<return_entity::Model>> {
    let (returns, total) = state.returns.list_returns(query.page, query.limit).await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        returns, total, &query,
    ))))
}

/// PUT /returns/:id/status
pub async fn update_return_status(
    State(state): State<AppState>,
    Path(return_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<UpdateReturnStatusRequest>,
) -> ApiResult<return_entity::Model> {
    require_admin(&headers)?;
    let status = ReturnStatus::from_str(&request.status)
        .map_err(|_| ServiceError::ValidationError(format!("Unknown status {}", request.status)))?;
    let updated = state.returns.update_status(return_id, status).await?;
    Ok(Json(ApiResponse::success(updated)))
}
