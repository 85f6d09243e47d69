//! Inventory ledger.
//!
//! Owns the per-variant stock counters and the append-only movement log.
//! Every mutation goes through one of the named operations here, never an
//! ad hoc increment, so the movement log stays an accurate audit trail.
//! Mutators run on the caller's connection: when an operation accompanies
//! an order or payment mutation it must share that transaction.

use chrono::Utc;
use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::inventory_level::{self, Entity as LevelEntity, StockStatus};
use crate::entities::stock_movement::{self, Entity as MovementEntity, MovementAction};
use crate::errors::ServiceError;

/// Manual administrative stock change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustOp {
    Add,
    Remove,
    Set,
}

/// Current levels plus the derived status, for level queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockLevel {
    pub variant_id: Uuid,
    pub stock_quantity: i32,
    pub reserved_quantity: i32,
    pub available: i32,
    pub safety_stock: i32,
    pub status: StockStatus,
}

impl From<inventory_level::Model> for StockLevel {
    fn from(model: inventory_level::Model) -> Self {
        Self {
            variant_id: model.variant_id,
            stock_quantity: model.stock_quantity,
            reserved_quantity: model.reserved_quantity,
            available: model.available(),
            safety_stock: model.safety_stock,
            status: model.status(),
        }
    }
}

#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Earmarks `qty` units for an unsettled order.
    ///
    /// The availability check and the increment are a single guarded
    /// UPDATE, so two concurrent requests cannot both reserve past
    /// `stock_quantity - reserved_quantity`.
    #[instrument(skip(self, conn))]
    pub async fn reserve<C: ConnectionTrait>(
        &self,
        conn: &C,
        variant_id: Uuid,
        qty: i32,
    ) -> Result<(), ServiceError> {
        require_positive(qty)?;

        let result = LevelEntity::update_many()
            .col_expr(
                inventory_level::Column::ReservedQuantity,
                Expr::col(inventory_level::Column::ReservedQuantity).add(qty),
            )
            .col_expr(
                inventory_level::Column::UpdatedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(inventory_level::Column::VariantId.eq(variant_id))
            .filter(Expr::cust_with_values(
                "stock_quantity - reserved_quantity >= ?",
                [qty],
            ))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            let level = LevelEntity::find_by_id(variant_id).one(conn).await?;
            return Err(match level {
                None => ServiceError::NotFound(format!("No inventory record for variant {variant_id}")),
                Some(level) => ServiceError::InsufficientStock(format!(
                    "Variant {variant_id}: requested {qty}, available {}",
                    level.available()
                )),
            });
        }

        let level = self.fetch_level(conn, variant_id).await?;
        log_movement(
            conn,
            variant_id,
            MovementAction::Reserve,
            qty,
            level.reserved_quantity - qty,
            level.reserved_quantity,
            "Reserved for order",
            None,
        )
        .await?;

        Ok(())
    }

    /// Converts a reservation into a real depletion: both counters drop by
    /// `qty`. Called when a payment settles.
    ///
    /// The decrement is relative and applied in one statement, like
    /// `reserve`; reading then writing absolute values would clobber a
    /// concurrent reservation on the same variant.
    #[instrument(skip(self, conn))]
    pub async fn commit<C: ConnectionTrait>(
        &self,
        conn: &C,
        variant_id: Uuid,
        qty: i32,
    ) -> Result<(), ServiceError> {
        require_positive(qty)?;
        let before = self.fetch_level(conn, variant_id).await?;
        if before.stock_quantity < qty || before.reserved_quantity < qty {
            warn!(
                variant_id = %variant_id,
                stock = before.stock_quantity,
                reserved = before.reserved_quantity,
                qty,
                "Commit exceeds recorded counters; flooring at zero"
            );
        }

        LevelEntity::update_many()
            .col_expr(
                inventory_level::Column::StockQuantity,
                floored_decrement("stock_quantity", qty),
            )
            .col_expr(
                inventory_level::Column::ReservedQuantity,
                floored_decrement("reserved_quantity", qty),
            )
            .col_expr(
                inventory_level::Column::UpdatedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(inventory_level::Column::VariantId.eq(variant_id))
            .exec(conn)
            .await?;

        let after = self.fetch_level(conn, variant_id).await?;
        log_movement(
            conn,
            variant_id,
            MovementAction::StockCommitted,
            after.stock_quantity - before.stock_quantity,
            before.stock_quantity,
            after.stock_quantity,
            "Payment settled",
            None,
        )
        .await?;

        Ok(())
    }

    /// Returns reserved units to the available pool when a payment is
    /// cancelled or expires. Clamps at zero: releasing more than was
    /// reserved never drives the counter negative. Relative single-statement
    /// decrement, like `commit`.
    #[instrument(skip(self, conn))]
    pub async fn release<C: ConnectionTrait>(
        &self,
        conn: &C,
        variant_id: Uuid,
        qty: i32,
    ) -> Result<(), ServiceError> {
        require_positive(qty)?;
        let before = self.fetch_level(conn, variant_id).await?;

        LevelEntity::update_many()
            .col_expr(
                inventory_level::Column::ReservedQuantity,
                floored_decrement("reserved_quantity", qty),
            )
            .col_expr(
                inventory_level::Column::UpdatedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(inventory_level::Column::VariantId.eq(variant_id))
            .exec(conn)
            .await?;

        let after = self.fetch_level(conn, variant_id).await?;
        log_movement(
            conn,
            variant_id,
            MovementAction::StockUnreserve,
            after.reserved_quantity - before.reserved_quantity,
            before.reserved_quantity,
            after.reserved_quantity,
            "Reservation released",
            None,
        )
        .await?;

        Ok(())
    }

    /// Manual administrative stock change. `Remove` floors at zero.
    #[instrument(skip(self, conn))]
    pub async fn adjust<C: ConnectionTrait>(
        &self,
        conn: &C,
        variant_id: Uuid,
        op: AdjustOp,
        qty: i32,
        reason: &str,
        actor_id: Option<Uuid>,
    ) -> Result<StockLevel, ServiceError> {
        if qty < 0 {
            return Err(ServiceError::ValidationError(
                "Quantity must not be negative".to_string(),
            ));
        }
        let level = self.fetch_level(conn, variant_id).await?;

        let (new_stock, action) = match op {
            AdjustOp::Add => (level.stock_quantity + qty, MovementAction::StockAdd),
            AdjustOp::Remove => ((level.stock_quantity - qty).max(0), MovementAction::StockRemove),
            AdjustOp::Set => (qty, MovementAction::StockSet),
        };

        let mut active: inventory_level::ActiveModel = level.clone().into();
        active.stock_quantity = Set(new_stock);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(conn).await?;

        log_movement(
            conn,
            variant_id,
            action,
            new_stock - level.stock_quantity,
            level.stock_quantity,
            new_stock,
            reason,
            actor_id,
        )
        .await?;

        info!(variant_id = %variant_id, ?op, qty, "Stock adjusted");
        Ok(StockLevel::from(updated))
    }

    /// Puts units back on hand for a completed return. Relative increment,
    /// like `reserve`.
    #[instrument(skip(self, conn))]
    pub async fn restore<C: ConnectionTrait>(
        &self,
        conn: &C,
        variant_id: Uuid,
        qty: i32,
        reason: &str,
    ) -> Result<(), ServiceError> {
        require_positive(qty)?;

        let result = LevelEntity::update_many()
            .col_expr(
                inventory_level::Column::StockQuantity,
                Expr::col(inventory_level::Column::StockQuantity).add(qty),
            )
            .col_expr(
                inventory_level::Column::UpdatedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(inventory_level::Column::VariantId.eq(variant_id))
            .exec(conn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "No inventory record for variant {variant_id}"
            )));
        }

        let level = self.fetch_level(conn, variant_id).await?;
        log_movement(
            conn,
            variant_id,
            MovementAction::StockAdd,
            qty,
            level.stock_quantity - qty,
            level.stock_quantity,
            reason,
            None,
        )
        .await?;

        Ok(())
    }

    /// Updates the reorder threshold.
    #[instrument(skip(self))]
    pub async fn set_safety_stock(
        &self,
        variant_id: Uuid,
        safety_stock: i32,
    ) -> Result<StockLevel, ServiceError> {
        if safety_stock < 0 {
            return Err(ServiceError::ValidationError(
                "Safety stock must not be negative".to_string(),
            ));
        }
        let level = self.fetch_level(&*self.db, variant_id).await?;
        let mut active: inventory_level::ActiveModel = level.into();
        active.safety_stock = Set(safety_stock);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&*self.db).await?;
        Ok(StockLevel::from(updated))
    }

    /// Current levels and derived status for one variant.
    #[instrument(skip(self))]
    pub async fn get_level(&self, variant_id: Uuid) -> Result<StockLevel, ServiceError> {
        let level = self.fetch_level(&*self.db, variant_id).await?;
        Ok(StockLevel::from(level))
    }

    /// Variants at or below their safety stock, for reorder reporting.
    #[instrument(skip(self))]
    pub async fn list_low_stock(&self) -> Result<Vec<StockLevel>, ServiceError> {
        let levels = LevelEntity::find()
            .filter(Expr::cust("stock_quantity <= safety_stock"))
            .all(&*self.db)
            .await?;
        Ok(levels.into_iter().map(StockLevel::from).collect())
    }

    /// Movement log for one variant, newest first.
    #[instrument(skip(self))]
    pub async fn list_movements(
        &self,
        variant_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<stock_movement::Model>, u64), ServiceError> {
        let paginator = MovementEntity::find()
            .filter(stock_movement::Column::VariantId.eq(variant_id))
            .order_by_desc(stock_movement::Column::CreatedAt)
            .paginate(&*self.db, limit.max(1));

        let total = paginator.num_items().await?;
        let movements = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((movements, total))
    }

    async fn fetch_level<C: ConnectionTrait>(
        &self,
        conn: &C,
        variant_id: Uuid,
    ) -> Result<inventory_level::Model, ServiceError> {
        LevelEntity::find_by_id(variant_id)
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No inventory record for variant {variant_id}"))
            })
    }
}

/// `column - qty` floored at zero, as a single SQL expression. `CASE WHEN`
/// rather than a scalar max function, which sqlite and Postgres spell
/// differently.
fn floored_decrement(column: &str, qty: i32) -> SimpleExpr {
    Expr::cust_with_values(
        format!("CASE WHEN {column} > ? THEN {column} - ? ELSE 0 END"),
        [qty, qty],
    )
}

fn require_positive(qty: i32) -> Result<(), ServiceError> {
    if qty <= 0 {
        return Err(ServiceError::ValidationError(
            "Quantity must be positive".to_string(),
        ));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn log_movement<C: ConnectionTrait>(
    conn: &C,
    variant_id: Uuid,
    action: MovementAction,
    delta: i32,
    previous_quantity: i32,
    new_quantity: i32,
    reason: &str,
    actor_id: Option<Uuid>,
) -> Result<(), ServiceError> {
    stock_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        variant_id: Set(variant_id),
        action: Set(action.to_string()),
        delta: Set(delta),
        previous_quantity: Set(previous_quantity),
        new_quantity: Set(new_quantity),
        reason: Set(reason.to_string()),
        actor_id: Set(actor_id),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;
    Ok(())
}
