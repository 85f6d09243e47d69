//! Return/refund flow.
//!
//! Creation validates eligibility against the order's state and the return
//! window; the admin transition into `completed` restores stock and marks
//! the order returned, exactly once, in one transaction.

use chrono::{Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::entities::order::{self, Entity as OrderEntity, OrderStatus};
use crate::entities::order_item::{self, Entity as OrderItemEntity};
use crate::entities::return_entity::{self, Entity as ReturnEntity, ReturnStatus};
use crate::entities::return_item::{self, Entity as ReturnItemEntity};
use crate::errors::ServiceError;
use crate::notifications::{NotificationKind, Notifier};
use crate::services::inventory::InventoryService;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateReturnRequest {
    pub order_id: Uuid,
    #[validate(length(min = 1, message = "A reason is required"))]
    pub reason: String,
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<ReturnLine>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReturnLine {
    pub order_item_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct ReturnDetail {
    pub return_record: return_entity::Model,
    pub items: Vec<return_item::Model>,
}

#[derive(Clone)]
pub struct ReturnService {
    db: Arc<DatabaseConnection>,
    inventory: InventoryService,
    notifier: Arc<dyn Notifier>,
    return_window_days: i64,
}

impl ReturnService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        inventory: InventoryService,
        notifier: Arc<dyn Notifier>,
        return_window_days: i64,
    ) -> Self {
        Self {
            db,
            inventory,
            notifier,
            return_window_days,
        }
    }

    /// Opens a return for a delivered order owned by `user_id`.
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn create_return(
        &self,
        user_id: Uuid,
        request: CreateReturnRequest,
    ) -> Result<ReturnDetail, ServiceError> {
        request.validate()?;
        if request.items.iter().any(|line| line.quantity <= 0) {
            return Err(ServiceError::ValidationError(
                "Return quantity must be positive".to_string(),
            ));
        }

        let order_model = OrderEntity::find_by_id(request.order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", request.order_id))
            })?;

        if order_model.user_id != user_id {
            return Err(ServiceError::Unauthorized(
                "Order does not belong to the requesting user".to_string(),
            ));
        }

        let status = OrderStatus::from_str(&order_model.status).map_err(|_| {
            ServiceError::InternalError(format!("Unknown order status {}", order_model.status))
        })?;
        if status != OrderStatus::Delivered {
            return Err(ServiceError::ValidationError(format!(
                "Order is {status}; only delivered orders can be returned"
            )));
        }

        if let Some(delivered_at) = order_model.delivered_at {
            if Utc::now() - delivered_at > Duration::days(self.return_window_days) {
                return Err(ServiceError::ValidationError(format!(
                    "Return window of {} days has expired",
                    self.return_window_days
                )));
            }
        }

        let existing = ReturnEntity::find()
            .filter(return_entity::Column::OrderId.eq(request.order_id))
            .all(&*self.db)
            .await?;
        if existing.iter().any(|r| {
            ReturnStatus::from_str(&r.status)
                .map(|s| s.is_active())
                .unwrap_or(false)
        }) {
            return Err(ServiceError::ValidationError(
                "An active return already exists for this order".to_string(),
            ));
        }

        let order_items: HashMap<Uuid, order_item::Model> = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(request.order_id))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|item| (item.id, item))
            .collect();

        for line in &request.items {
            let item = order_items.get(&line.order_item_id).ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Item {} does not belong to this order",
                    line.order_item_id
                ))
            })?;
            if line.quantity > item.quantity {
                return Err(ServiceError::ValidationError(format!(
                    "Return quantity {} exceeds purchased quantity {} for item {}",
                    line.quantity, item.quantity, line.order_item_id
                )));
            }
        }

        let now = Utc::now();
        let return_id = Uuid::new_v4();

        let txn = self.db.begin().await?;
        let return_model = return_entity::ActiveModel {
            id: Set(return_id),
            order_id: Set(request.order_id),
            user_id: Set(Some(user_id)),
            status: Set(ReturnStatus::Requested.to_string()),
            reason: Set(request.reason.clone()),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(request.items.len());
        for line in &request.items {
            let item = return_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                return_id: Set(return_id),
                order_item_id: Set(line.order_item_id),
                quantity: Set(line.quantity),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }
        txn.commit().await?;

        info!(return_id = %return_id, order_id = %request.order_id, "Return requested");
        self.notifier
            .notify_admins(
                NotificationKind::ReturnRequested,
                serde_json::json!({
                    "return_id": return_id,
                    "order_id": request.order_id,
                    "reason": request.reason,
                }),
            )
            .await;

        Ok(ReturnDetail {
            return_record: return_model,
            items,
        })
    }

    /// Admin status transition. The move into `completed` marks the order
    /// returned and restores stock for every resolvable item, once.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        return_id: Uuid,
        new_status: ReturnStatus,
    ) -> Result<return_entity::Model, ServiceError> {
        let return_model = ReturnEntity::find_by_id(return_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Return {return_id} not found")))?;

        // Completed and rejected are terminal. Reopening a completed
        // return would let a second completion restore stock again.
        let current = ReturnStatus::from_str(&return_model.status).map_err(|_| {
            ServiceError::InternalError(format!("Unknown return status {}", return_model.status))
        })?;
        if matches!(current, ReturnStatus::Completed | ReturnStatus::Rejected) {
            return Err(ServiceError::Conflict(format!(
                "Return {return_id} is {current} and cannot transition"
            )));
        }

        let updated = if new_status == ReturnStatus::Completed {
            self.complete(&return_model).await?
        } else {
            let mut active: return_entity::ActiveModel = return_model.clone().into();
            active.status = Set(new_status.to_string());
            active.updated_at = Set(Some(Utc::now()));
            active.update(&*self.db).await?
        };

        let kind = match new_status {
            ReturnStatus::Approved => Some(NotificationKind::ReturnApproved),
            ReturnStatus::Rejected => Some(NotificationKind::ReturnRejected),
            ReturnStatus::Completed => Some(NotificationKind::ReturnCompleted),
            _ => None,
        };
        if let (Some(kind), Some(user_id)) = (kind, updated.user_id) {
            self.notifier
                .notify(
                    user_id,
                    kind,
                    serde_json::json!({
                        "return_id": return_id,
                        "order_id": updated.order_id,
                        "status": updated.status,
                    }),
                )
                .await;
        }

        info!(return_id = %return_id, status = %new_status, "Return status updated");
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn get_return(&self, return_id: Uuid) -> Result<ReturnDetail, ServiceError> {
        let return_model = ReturnEntity::find_by_id(return_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Return {return_id} not found")))?;
        let items = ReturnItemEntity::find()
            .filter(return_item::Column::ReturnId.eq(return_id))
            .all(&*self.db)
            .await?;
        Ok(ReturnDetail {
            return_record: return_model,
            items,
        })
    }

    #[instrument(skip(self))]
    pub async fn list_returns(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<return_entity::Model>, u64), ServiceError> {
        let paginator = ReturnEntity::find()
            .order_by_desc(return_entity::Column::CreatedAt)
            .paginate(&*self.db, limit.max(1));
        let total = paginator.num_items().await?;
        let returns = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((returns, total))
    }

    /// Completion is guarded by a compare-and-set on the return row so a
    /// repeated call cannot restore stock twice.
    async fn complete(
        &self,
        return_model: &return_entity::Model,
    ) -> Result<return_entity::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let claimed = ReturnEntity::update_many()
            .col_expr(
                return_entity::Column::Status,
                Expr::value(ReturnStatus::Completed.to_string()),
            )
            .col_expr(
                return_entity::Column::UpdatedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(return_entity::Column::Id.eq(return_model.id))
            .filter(return_entity::Column::Status.ne(ReturnStatus::Completed.to_string()))
            .exec(&txn)
            .await?;
        if claimed.rows_affected == 0 {
            txn.rollback().await?;
            return Err(ServiceError::Conflict(format!(
                "Return {} is already completed",
                return_model.id
            )));
        }

        let items = ReturnItemEntity::find()
            .filter(return_item::Column::ReturnId.eq(return_model.id))
            .all(&txn)
            .await?;
        for item in &items {
            let order_item_model = OrderItemEntity::find_by_id(item.order_item_id)
                .one(&txn)
                .await?;
            if let Some(variant_id) = order_item_model.and_then(|oi| oi.variant_id) {
                self.inventory
                    .restore(&txn, variant_id, item.quantity, "Return completed")
                    .await?;
            }
        }

        OrderEntity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Returned.to_string()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(return_model.order_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        info!(return_id = %return_model.id, order_id = %return_model.order_id, "Return completed; stock restored");

        ReturnEntity::find_by_id(return_model.id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!("Return {} vanished", return_model.id))
            })
    }
}
