//! Order creation and order-level queries.
//!
//! Creation reserves stock, snapshots pricing, and persists the order,
//! items, payment row and idempotency mapping in one transaction. The
//! gateway call happens after commit: a gateway failure leaves the order
//! pending and payable, never rolled back.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::PricingConfig;
use crate::entities::idempotency_key::{self, Entity as IdempotencyKeyEntity};
use crate::entities::order::{self, Entity as OrderEntity, OrderStatus};
use crate::entities::order_item::{self, Entity as OrderItemEntity};
use crate::entities::payment::{self, Entity as PaymentEntity, PaymentStatus};
use crate::entities::product::{self, Entity as ProductEntity};
use crate::entities::product_variant::{self, Entity as VariantEntity};
use crate::errors::ServiceError;
use crate::gateway::{ChargeRequest, GatewayToken, PaymentGateway};
use crate::services::coupons::CouponValidator;
use crate::services::inventory::InventoryService;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub shipping_address: Option<String>,
    pub coupon_code: Option<String>,
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<OrderLine>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderLine {
    pub variant_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct OrderDetail {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub payment: payment::Model,
    /// Present only on fresh creation when the gateway call succeeded.
    pub payment_token: Option<GatewayToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Totals {
    subtotal_cents: i64,
    discount_cents: i64,
    tax_cents: i64,
    shipping_cents: i64,
    total_cents: i64,
}

/// Resolved, snapshotted line ready for insertion.
struct PricedLine {
    variant_id: Uuid,
    sku: String,
    title: String,
    unit_price_cents: i64,
    quantity: i32,
    line_total_cents: i64,
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    inventory: InventoryService,
    gateway: Arc<dyn PaymentGateway>,
    coupons: Arc<dyn CouponValidator>,
    pricing: PricingConfig,
    provider: String,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        inventory: InventoryService,
        gateway: Arc<dyn PaymentGateway>,
        coupons: Arc<dyn CouponValidator>,
        pricing: PricingConfig,
        provider: String,
    ) -> Self {
        Self {
            db,
            inventory,
            gateway,
            coupons,
            pricing,
            provider,
        }
    }

    /// Creates an order with its items and pending payment.
    ///
    /// With an idempotency key this is at-most-once for the whole
    /// operation: a repeated key returns the order it first produced, with
    /// no new reservation and no new charge.
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        request: CreateOrderRequest,
        idempotency_key: Option<String>,
    ) -> Result<OrderDetail, ServiceError> {
        request.validate()?;
        if request.items.iter().any(|line| line.quantity <= 0) {
            return Err(ServiceError::ValidationError(
                "Item quantity must be positive".to_string(),
            ));
        }

        if let Some(key) = idempotency_key.as_deref() {
            if let Some(existing) = self.find_by_idempotency_key(key).await? {
                info!(order_id = %existing, key, "Idempotency key replay; returning existing order");
                return self.load_detail(existing).await;
            }
        }

        let lines = self.resolve_lines(&request.items).await?;
        let subtotal_cents: i64 = lines.iter().map(|l| l.line_total_cents).sum();

        let discount_cents = match request.coupon_code.as_deref() {
            Some(code) => self.coupons.validate(code, subtotal_cents).await?,
            None => 0,
        };
        let totals = self.price(subtotal_cents, discount_cents);

        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let txn = self.db.begin().await?;

        for line in &lines {
            self.inventory
                .reserve(&txn, line.variant_id, line.quantity)
                .await?;
        }

        order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user_id),
            status: Set(OrderStatus::Pending.to_string()),
            subtotal_cents: Set(totals.subtotal_cents),
            discount_cents: Set(totals.discount_cents),
            tax_cents: Set(totals.tax_cents),
            shipping_cents: Set(totals.shipping_cents),
            total_cents: Set(totals.total_cents),
            coupon_code: Set(request.coupon_code.clone()),
            shipping_address: Set(request.shipping_address.clone()),
            delivered_at: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        let mut item_models = Vec::with_capacity(lines.len());
        for line in &lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                variant_id: Set(Some(line.variant_id)),
                sku: Set(line.sku.clone()),
                title: Set(line.title.clone()),
                unit_price_cents: Set(line.unit_price_cents),
                quantity: Set(line.quantity),
                line_total_cents: Set(line.line_total_cents),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            item_models.push(item);
        }

        let payment_model = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            provider: Set(self.provider.clone()),
            provider_payment_id: Set(None),
            status: Set(PaymentStatus::Pending.to_string()),
            amount_cents: Set(totals.total_cents),
            paid_at: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        if let Some(key) = idempotency_key.as_deref() {
            let inserted = idempotency_key::ActiveModel {
                key: Set(key.to_string()),
                order_id: Set(order_id),
                created_at: Set(now),
            }
            .insert(&txn)
            .await;

            // First writer wins. If a concurrent request committed this key
            // between our check and here, drop everything we staged and
            // return the order the key already maps to.
            if inserted.is_err() {
                txn.rollback().await?;
                if let Some(existing) = self.find_by_idempotency_key(key).await? {
                    warn!(key, order_id = %existing, "Lost idempotency-key race; returning winner");
                    return self.load_detail(existing).await;
                }
                return Err(ServiceError::Conflict(format!(
                    "Idempotency key {key} already in use"
                )));
            }
        }

        txn.commit().await?;
        info!(order_id = %order_id, total_cents = totals.total_cents, "Order created");

        // The redemption counts only once the order actually exists; an
        // aborted transaction must not burn a limited coupon.
        if let Some(code) = request.coupon_code.as_deref() {
            self.coupons.record_use(code).await;
        }

        // Side effect outside the transaction: a gateway failure leaves the
        // order pending and payable through the status-check path.
        let payment_token = match self
            .gateway
            .create_transaction(&ChargeRequest {
                order_id,
                gross_amount_cents: totals.total_cents,
            })
            .await
        {
            Ok(token) => {
                let mut active: payment::ActiveModel = payment_model.clone().into();
                active.provider_payment_id = Set(Some(token.token.clone()));
                active.updated_at = Set(Some(Utc::now()));
                if let Err(e) = active.update(&*self.db).await {
                    warn!(order_id = %order_id, error = %e, "Failed to record gateway reference");
                }
                Some(token)
            }
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "Gateway transaction creation failed; order stays payable");
                None
            }
        };

        let mut detail = self.load_detail(order_id).await?;
        detail.payment_token = payment_token;
        Ok(detail)
    }

    /// Loads an order with its items and current payment.
    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderDetail, ServiceError> {
        self.load_detail(order_id).await
    }

    /// Lists orders newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let paginator = OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, limit.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// Admin fulfillment transition. Settlement, cancellation and return
    /// transitions are owned by their services and rejected here.
    #[instrument(skip(self))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        if matches!(
            new_status,
            OrderStatus::Cancelled | OrderStatus::Returned | OrderStatus::Processing
        ) {
            return Err(ServiceError::ValidationError(format!(
                "Status {new_status} is driven by the payment/return pipeline"
            )));
        }

        let order_model = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let current = OrderStatus::from_str(&order_model.status)
            .map_err(|_| ServiceError::InternalError(format!("Unknown order status {}", order_model.status)))?;
        if matches!(current, OrderStatus::Cancelled | OrderStatus::Returned) {
            return Err(ServiceError::ValidationError(format!(
                "Order {order_id} is {current} and cannot transition"
            )));
        }

        let now = Utc::now();
        let mut active: order::ActiveModel = order_model.into();
        active.status = Set(new_status.to_string());
        if new_status == OrderStatus::Delivered {
            active.delivered_at = Set(Some(now));
        }
        active.updated_at = Set(Some(now));
        let updated = active.update(&*self.db).await?;

        info!(order_id = %order_id, status = %new_status, "Order status updated");
        Ok(updated)
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Uuid>, ServiceError> {
        let mapping = IdempotencyKeyEntity::find_by_id(key.to_string())
            .one(&*self.db)
            .await?;
        Ok(mapping.map(|m| m.order_id))
    }

    async fn resolve_lines(&self, items: &[OrderLine]) -> Result<Vec<PricedLine>, ServiceError> {
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let variant = VariantEntity::find_by_id(item.variant_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Variant {} not found", item.variant_id))
                })?;
            let parent = ProductEntity::find_by_id(variant.product_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", variant.product_id))
                })?;

            let unit_price_cents = parent.base_price_cents + variant.additional_price_cents;
            let title = match variant.title.as_deref() {
                Some(v) if !v.is_empty() => format!("{} - {}", parent.title, v),
                _ => parent.title.clone(),
            };
            lines.push(PricedLine {
                variant_id: variant.id,
                sku: variant.sku,
                title,
                unit_price_cents,
                quantity: item.quantity,
                line_total_cents: unit_price_cents * i64::from(item.quantity),
            });
        }
        Ok(lines)
    }

    fn price(&self, subtotal_cents: i64, discount_cents: i64) -> Totals {
        compute_totals(&self.pricing, subtotal_cents, discount_cents)
    }

    async fn load_detail(&self, order_id: Uuid) -> Result<OrderDetail, ServiceError> {
        let order_model = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        let payment_model = PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .order_by_desc(payment::Column::CreatedAt)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!("Order {order_id} has no payment record"))
            })?;

        Ok(OrderDetail {
            order: order_model,
            items,
            payment: payment_model,
            payment_token: None,
        })
    }
}

/// Integer minor-currency arithmetic only; tax applies to the discounted
/// subtotal, shipping is a flat configured amount.
fn compute_totals(pricing: &PricingConfig, subtotal_cents: i64, discount_cents: i64) -> Totals {
    let taxable = subtotal_cents - discount_cents;
    let tax_cents = taxable * pricing.tax_rate_bps / 10_000;
    let shipping_cents = pricing.shipping_flat_cents;
    Totals {
        subtotal_cents,
        discount_cents,
        tax_cents,
        shipping_cents,
        total_cents: subtotal_cents - discount_cents + tax_cents + shipping_cents,
    }
}
