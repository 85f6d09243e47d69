//! Storefront API Library
//!
//! Order lifecycle core: inventory reservation and settlement, payment
//! reconciliation against an external gateway, and returns processing.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod gateway;
pub mod handlers;
pub mod notifications;
pub mod scheduler;
pub mod services;

use axum::{extract::State, response::Json, routing::get, routing::post, routing::put, Router};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::services::inventory::InventoryService;
use crate::services::orders::OrderService;
use crate::services::payments::PaymentService;
use crate::services::returns::ReturnService;

/// Process-wide dependencies, constructed once at startup and injected
/// into the router.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub inventory: InventoryService,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub returns: Arc<ReturnService>,
}

/// Common query parameters for list endpoints.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    20
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }
}

#[derive(Serialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, query: &ListQuery) -> Self {
        Self {
            items,
            total,
            page: query.page,
            limit: query.limit,
        }
    }
}

/// Standard API result type for JSON responses.
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        // Orders
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/orders/:id/status",
            put(handlers::orders::update_order_status),
        )
        // Payments
        .route(
            "/payment/status/:id",
            get(handlers::payments::get_payment_status),
        )
        // Returns
        .route("/returns", post(handlers::returns::create_return))
        .route("/returns", get(handlers::returns::list_returns))
        .route("/returns/:id", get(handlers::returns::get_return))
        .route(
            "/returns/:id/status",
            put(handlers::returns::update_return_status),
        )
        // Inventory
        .route("/inventory/low-stock", get(handlers::inventory::list_low_stock))
        .route("/inventory/:variant_id", get(handlers::inventory::get_level))
        .route(
            "/inventory/:variant_id/adjust",
            post(handlers::inventory::adjust_stock),
        )
        .route(
            "/inventory/:variant_id/safety-stock",
            put(handlers::inventory::set_safety_stock),
        )
        .route(
            "/inventory/:variant_id/movements",
            get(handlers::inventory::list_movements),
        )
}

async fn health_check(State(state): State<AppState>) -> ApiResult<Value> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };
    Ok(Json(ApiResponse::success(json!({
        "status": db_status,
        "checks": { "database": db_status },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))))
}
