#![allow(dead_code)]

//! Shared fixtures for the integration tests: an in-memory sqlite backed
//! service stack, a programmable gateway double, and seed helpers.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use storefront_api::config::{AppConfig, CouponRule, GatewayConfig, PricingConfig};
use storefront_api::db;
use storefront_api::entities::{
    inventory_level, order, order_item, payment, product, product_variant, stock_movement,
};
use storefront_api::gateway::{
    ChargeRequest, GatewayError, GatewayToken, PaymentGateway, TransactionStatus,
};
use storefront_api::notifications::{NotificationKind, Notifier};
use storefront_api::services::coupons::ConfiguredCoupons;
use storefront_api::services::inventory::InventoryService;
use storefront_api::services::orders::OrderService;
use storefront_api::services::payments::PaymentService;
use storefront_api::services::returns::ReturnService;

pub const RETURN_WINDOW_DAYS: i64 = 7;

/// Single-connection pool so every handle sees the same in-memory database.
pub async fn setup_db() -> Arc<DatabaseConnection> {
    let mut opts = ConnectOptions::new("sqlite::memory:".to_string());
    opts.max_connections(1).sqlx_logging(false);
    let conn = Database::connect(opts).await.expect("sqlite connect");
    db::create_schema(&conn).await.expect("schema bootstrap");
    Arc::new(conn)
}

#[derive(Clone)]
pub enum GatewayReply {
    Status(String),
    Error {
        status: u16,
        transaction_status: Option<String>,
    },
    Network,
}

/// Gateway double. Status replies are programmed per order; unknown orders
/// report `pending`.
pub struct MockGateway {
    replies: Mutex<HashMap<Uuid, GatewayReply>>,
    fail_create: AtomicBool,
    create_calls: Mutex<Vec<Uuid>>,
    pub settlement_time: DateTime<Utc>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            fail_create: AtomicBool::new(false),
            create_calls: Mutex::new(Vec::new()),
            settlement_time: Utc::now() - Duration::minutes(5),
        }
    }

    pub fn set_status(&self, order_id: Uuid, status: &str) {
        self.replies
            .lock()
            .unwrap()
            .insert(order_id, GatewayReply::Status(status.to_string()));
    }

    pub fn set_error(&self, order_id: Uuid, status: u16, transaction_status: Option<&str>) {
        self.replies.lock().unwrap().insert(
            order_id,
            GatewayReply::Error {
                status,
                transaction_status: transaction_status.map(str::to_string),
            },
        );
    }

    pub fn set_network_error(&self, order_id: Uuid) {
        self.replies
            .lock()
            .unwrap()
            .insert(order_id, GatewayReply::Network);
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> Vec<Uuid> {
        self.create_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_transaction(
        &self,
        charge: &ChargeRequest,
    ) -> Result<GatewayToken, GatewayError> {
        self.create_calls.lock().unwrap().push(charge.order_id);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(GatewayError::Network("connection refused".to_string()));
        }
        Ok(GatewayToken {
            token: format!("tok-{}", charge.order_id),
            redirect_url: Some(format!("https://pay.example/{}", charge.order_id)),
        })
    }

    async fn transaction_status(&self, order_id: Uuid) -> Result<TransactionStatus, GatewayError> {
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(&order_id)
            .cloned()
            .unwrap_or_else(|| GatewayReply::Status("pending".to_string()));

        match reply {
            GatewayReply::Status(status) => Ok(TransactionStatus {
                transaction_status: status,
                settlement_time: Some(self.settlement_time),
                transaction_time: Some(self.settlement_time),
            }),
            GatewayReply::Error {
                status,
                transaction_status,
            } => Err(GatewayError::Http {
                status,
                transaction_status,
                message: "mock gateway error".to_string(),
            }),
            GatewayReply::Network => {
                Err(GatewayError::Network("connection refused".to_string()))
            }
        }
    }
}

/// Notifier double that records every delivery.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(Option<Uuid>, NotificationKind)>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<(Option<Uuid>, NotificationKind)> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.events().into_iter().map(|(_, kind)| kind).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: Uuid, kind: NotificationKind, _payload: serde_json::Value) {
        self.events.lock().unwrap().push((Some(user_id), kind));
    }

    async fn notify_admins(&self, kind: NotificationKind, _payload: serde_json::Value) {
        self.events.lock().unwrap().push((None, kind));
    }
}

/// The full service stack wired over one in-memory database.
pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub inventory: InventoryService,
    pub orders: OrderService,
    pub payments: PaymentService,
    pub returns: ReturnService,
    pub gateway: Arc<MockGateway>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_coupons(Vec::new()).await
    }

    pub async fn with_coupons(rules: Vec<CouponRule>) -> Self {
        let db = setup_db().await;
        let gateway = Arc::new(MockGateway::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let coupons = Arc::new(ConfiguredCoupons::new(rules));
        let pricing = PricingConfig {
            tax_rate_bps: 1000,
            shipping_flat_cents: 2000,
        };

        let inventory = InventoryService::new(db.clone());
        let orders = OrderService::new(
            db.clone(),
            inventory.clone(),
            gateway.clone(),
            coupons,
            pricing,
            "gateway".to_string(),
        );
        let payments = PaymentService::new(
            db.clone(),
            inventory.clone(),
            gateway.clone(),
            notifier.clone(),
        );
        let returns = ReturnService::new(
            db.clone(),
            inventory.clone(),
            notifier.clone(),
            RETURN_WINDOW_DAYS,
        );

        Self {
            db,
            inventory,
            orders,
            payments,
            returns,
            gateway,
            notifier,
        }
    }

    /// Router-shaped state over the same services, for exercising handlers
    /// directly.
    pub fn app_state(&self) -> storefront_api::AppState {
        storefront_api::AppState {
            db: self.db.clone(),
            config: AppConfig {
                database_url: "sqlite::memory:".to_string(),
                host: "127.0.0.1".to_string(),
                port: 0,
                log_level: "info".to_string(),
                reconcile_interval_secs: 300,
                return_window_days: RETURN_WINDOW_DAYS,
                auto_migrate: true,
                pricing: PricingConfig {
                    tax_rate_bps: 1000,
                    shipping_flat_cents: 2000,
                },
                gateway: GatewayConfig::default(),
                coupons: Vec::new(),
            },
            inventory: self.inventory.clone(),
            orders: Arc::new(self.orders.clone()),
            payments: Arc::new(self.payments.clone()),
            returns: Arc::new(self.returns.clone()),
        }
    }
}

/// Seeds a product with one variant and its inventory record; returns the
/// variant id.
pub async fn seed_variant(db: &DatabaseConnection, unit_price_cents: i64, stock: i32) -> Uuid {
    seed_variant_full(db, unit_price_cents, stock, 0, 0).await
}

pub async fn seed_variant_full(
    db: &DatabaseConnection,
    unit_price_cents: i64,
    stock: i32,
    reserved: i32,
    safety_stock: i32,
) -> Uuid {
    let now = Utc::now();
    let product_id = Uuid::new_v4();
    product::ActiveModel {
        id: Set(product_id),
        title: Set("Test product".to_string()),
        base_price_cents: Set(unit_price_cents),
        created_at: Set(now),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("seed product");

    let variant_id = Uuid::new_v4();
    product_variant::ActiveModel {
        id: Set(variant_id),
        product_id: Set(product_id),
        sku: Set(format!("SKU-{variant_id}")),
        title: Set(None),
        additional_price_cents: Set(0),
        created_at: Set(now),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("seed variant");

    inventory_level::ActiveModel {
        variant_id: Set(variant_id),
        stock_quantity: Set(stock),
        reserved_quantity: Set(reserved),
        safety_stock: Set(safety_stock),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("seed inventory level");

    variant_id
}

pub async fn level(db: &DatabaseConnection, variant_id: Uuid) -> inventory_level::Model {
    inventory_level::Entity::find_by_id(variant_id)
        .one(db)
        .await
        .expect("query level")
        .expect("level exists")
}

pub async fn movements(db: &DatabaseConnection, variant_id: Uuid) -> Vec<stock_movement::Model> {
    stock_movement::Entity::find()
        .filter(stock_movement::Column::VariantId.eq(variant_id))
        .order_by_asc(stock_movement::Column::CreatedAt)
        .all(db)
        .await
        .expect("query movements")
}

pub async fn order_row(db: &DatabaseConnection, order_id: Uuid) -> order::Model {
    order::Entity::find_by_id(order_id)
        .one(db)
        .await
        .expect("query order")
        .expect("order exists")
}

pub async fn payment_row(db: &DatabaseConnection, order_id: Uuid) -> payment::Model {
    payment::Entity::find()
        .filter(payment::Column::OrderId.eq(order_id))
        .one(db)
        .await
        .expect("query payment")
        .expect("payment exists")
}

pub async fn order_items(db: &DatabaseConnection, order_id: Uuid) -> Vec<order_item::Model> {
    order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .all(db)
        .await
        .expect("query order items")
}

/// Rewrites `delivered_at` so return-window expiry can be exercised.
pub async fn backdate_delivery(db: &DatabaseConnection, order_id: Uuid, days: i64) {
    let model = order_row(db, order_id).await;
    let mut active: order::ActiveModel = model.into();
    active.delivered_at = Set(Some(Utc::now() - Duration::days(days)));
    active.update(db).await.expect("backdate delivery");
}
