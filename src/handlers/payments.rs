use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::entities::payment;
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub payment: payment::Model,
    /// What this check did: settled, cancelled, still_pending, or
    /// already_resolved.
    pub outcome: &'static str,
}

/// GET /payment/status/:id
///
/// Manual reconciliation for one order. Shares the scheduler's routine, so
/// a race between this and a sweep resolves the payment exactly once.
pub async fn get_payment_status(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<PaymentStatusResponse> {
    let (payment, outcome) = state.payments.check_payment(order_id).await?;
    Ok(Json(ApiResponse::success(PaymentStatusResponse {
        payment,
        outcome: outcome.as_str(),
    })))
}
