//! Payment reconciliation.
//!
//! Drives every pending payment toward a terminal state by polling the
//! gateway. Settlement commits reserved stock; cancellation releases it.
//! Both run as one transaction opened with a compare-and-set on the
//! payment row, so a scheduler tick racing a manual status check (or a
//! second tick) resolves each payment exactly once.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, QueryFilter,
    TransactionTrait,
};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::order::{self, Entity as OrderEntity, OrderStatus};
use crate::entities::order_item::{self, Entity as OrderItemEntity};
use crate::entities::payment::{self, Entity as PaymentEntity, PaymentStatus};
use crate::errors::ServiceError;
use crate::gateway::{classify_error, classify_status, CancelReason, Disposition, PaymentGateway};
use crate::notifications::{NotificationKind, Notifier};
use crate::services::inventory::InventoryService;

/// What reconciliation did with one payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Settled,
    Cancelled(CancelReason),
    StillPending,
    /// Another caller resolved the payment first; nothing was changed.
    AlreadyResolved,
}

impl PaymentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentOutcome::Settled => "settled",
            PaymentOutcome::Cancelled(_) => "cancelled",
            PaymentOutcome::StillPending => "still_pending",
            PaymentOutcome::AlreadyResolved => "already_resolved",
        }
    }
}

/// Counters for one reconciliation sweep.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ReconcileSummary {
    pub checked: u64,
    pub settled: u64,
    pub cancelled: u64,
    pub still_pending: u64,
    pub failed: u64,
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    inventory: InventoryService,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        inventory: InventoryService,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            db,
            inventory,
            gateway,
            notifier,
        }
    }

    /// One sweep over every pending payment. A failure on one payment is
    /// logged and never stops the rest of the sweep.
    #[instrument(skip(self))]
    pub async fn reconcile_pending(&self) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        let pending = match PaymentEntity::find()
            .filter(payment::Column::Status.eq(PaymentStatus::Pending.to_string()))
            .all(&*self.db)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "Failed to load pending payments; skipping sweep");
                return summary;
            }
        };

        for record in pending {
            summary.checked += 1;
            match self.reconcile_payment(&record).await {
                Ok(PaymentOutcome::Settled) => summary.settled += 1,
                Ok(PaymentOutcome::Cancelled(_)) => summary.cancelled += 1,
                Ok(PaymentOutcome::StillPending) | Ok(PaymentOutcome::AlreadyResolved) => {
                    summary.still_pending += 1
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        payment_id = %record.id,
                        order_id = %record.order_id,
                        error = %e,
                        "Failed to reconcile payment; will retry next sweep"
                    );
                }
            }
        }

        info!(
            checked = summary.checked,
            settled = summary.settled,
            cancelled = summary.cancelled,
            still_pending = summary.still_pending,
            failed = summary.failed,
            "Reconciliation sweep complete"
        );
        summary
    }

    /// Manual status check for one order; reuses the sweep's routine so the
    /// user-facing path and the scheduler agree on every classification.
    #[instrument(skip(self))]
    pub async fn check_payment(
        &self,
        order_id: Uuid,
    ) -> Result<(payment::Model, PaymentOutcome), ServiceError> {
        let record = self.find_payment(order_id).await?;

        if record.status != PaymentStatus::Pending.to_string() {
            return Ok((record, PaymentOutcome::AlreadyResolved));
        }

        let outcome = self.reconcile_payment(&record).await?;
        let refreshed = self.find_payment(order_id).await?;
        Ok((refreshed, outcome))
    }

    /// Manual cancellation (admin or user abort). Safe to race with the
    /// scheduler: whoever wins the status CAS performs the release.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<PaymentOutcome, ServiceError> {
        let record = self.find_payment(order_id).await?;
        self.cancel(&record, CancelReason::Cancelled).await
    }

    async fn reconcile_payment(
        &self,
        record: &payment::Model,
    ) -> Result<PaymentOutcome, ServiceError> {
        let (disposition, paid_at) = match self.gateway.transaction_status(record.order_id).await {
            Ok(status) => {
                let paid_at = status
                    .settlement_time
                    .or(status.transaction_time)
                    .unwrap_or_else(Utc::now);
                (classify_status(&status.transaction_status), paid_at)
            }
            Err(e) => {
                let disposition = classify_error(&e);
                if disposition == Disposition::Pending {
                    warn!(
                        order_id = %record.order_id,
                        error = %e,
                        "Gateway status query failed transiently; payment stays pending"
                    );
                }
                (disposition, Utc::now())
            }
        };

        match disposition {
            Disposition::Settle => self.settle(record, paid_at).await,
            Disposition::Cancel(reason) => self.cancel(record, reason).await,
            Disposition::Pending => Ok(PaymentOutcome::StillPending),
        }
    }

    /// Settles one payment: CAS the payment out of `pending`, commit every
    /// reserved line, move the order to `processing`. All or nothing.
    async fn settle(
        &self,
        record: &payment::Model,
        paid_at: DateTime<Utc>,
    ) -> Result<PaymentOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        if !self
            .claim_pending(&txn, record.id, PaymentStatus::Settlement, Some(paid_at))
            .await?
        {
            txn.rollback().await?;
            return Ok(PaymentOutcome::AlreadyResolved);
        }

        let (order_model, items) = self.load_order(&txn, record.order_id).await?;
        for item in &items {
            if let Some(variant_id) = item.variant_id {
                self.inventory.commit(&txn, variant_id, item.quantity).await?;
            }
        }

        self.set_order_status(&txn, &order_model, OrderStatus::Processing)
            .await?;
        txn.commit().await?;

        info!(order_id = %record.order_id, "Payment settled; stock committed");
        self.notifier
            .notify(
                order_model.user_id,
                NotificationKind::PaymentSuccess,
                serde_json::json!({
                    "order_id": record.order_id,
                    "amount_cents": record.amount_cents,
                    "paid_at": paid_at,
                }),
            )
            .await;

        Ok(PaymentOutcome::Settled)
    }

    /// Cancels one payment: CAS the payment out of `pending`, release every
    /// reserved line, move the order to `cancelled`.
    async fn cancel(
        &self,
        record: &payment::Model,
        reason: CancelReason,
    ) -> Result<PaymentOutcome, ServiceError> {
        let terminal = match reason {
            CancelReason::Expired => PaymentStatus::Expired,
            CancelReason::Cancelled | CancelReason::Denied => PaymentStatus::Cancelled,
        };

        let txn = self.db.begin().await?;

        if !self.claim_pending(&txn, record.id, terminal, None).await? {
            txn.rollback().await?;
            return Ok(PaymentOutcome::AlreadyResolved);
        }

        let (order_model, items) = self.load_order(&txn, record.order_id).await?;
        for item in &items {
            if let Some(variant_id) = item.variant_id {
                self.inventory.release(&txn, variant_id, item.quantity).await?;
            }
        }

        self.set_order_status(&txn, &order_model, OrderStatus::Cancelled)
            .await?;
        txn.commit().await?;

        info!(order_id = %record.order_id, ?reason, "Payment cancelled; reservation released");
        self.notifier
            .notify(
                order_model.user_id,
                NotificationKind::OrderCancelled,
                serde_json::json!({
                    "order_id": record.order_id,
                    "reason": format!("{reason:?}").to_lowercase(),
                }),
            )
            .await;

        Ok(PaymentOutcome::Cancelled(reason))
    }

    /// Compare-and-set on the payment row. Returns false when another
    /// caller already moved the payment out of `pending`, in which case the
    /// whole operation must be skipped.
    async fn claim_pending(
        &self,
        txn: &DatabaseTransaction,
        payment_id: Uuid,
        to: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<bool, ServiceError> {
        let result = PaymentEntity::update_many()
            .col_expr(payment::Column::Status, Expr::value(to.to_string()))
            .col_expr(payment::Column::PaidAt, Expr::value(paid_at))
            .col_expr(payment::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(payment::Column::Id.eq(payment_id))
            .filter(payment::Column::Status.eq(PaymentStatus::Pending.to_string()))
            .exec(txn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn load_order(
        &self,
        txn: &DatabaseTransaction,
        order_id: Uuid,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        let order_model = OrderEntity::find_by_id(order_id)
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(txn)
            .await?;
        Ok((order_model, items))
    }

    async fn set_order_status(
        &self,
        txn: &DatabaseTransaction,
        order_model: &order::Model,
        to: OrderStatus,
    ) -> Result<(), ServiceError> {
        // Sanity check: reconciliation only ever resolves pending orders.
        let current = OrderStatus::from_str(&order_model.status).map_err(|_| {
            ServiceError::InternalError(format!("Unknown order status {}", order_model.status))
        })?;
        if current != OrderStatus::Pending {
            warn!(
                order_id = %order_model.id,
                status = %current,
                target = %to,
                "Order left pending payment in a non-pending state"
            );
        }

        OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(to.to_string()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order_model.id))
            .exec(txn)
            .await?;
        Ok(())
    }

    async fn find_payment(&self, order_id: Uuid) -> Result<payment::Model, ServiceError> {
        PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No payment for order {order_id}")))
    }
}
