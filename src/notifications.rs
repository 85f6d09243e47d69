//! Notification sink boundary. Delivery is an external collaborator;
//! the core fires after commit and never lets a delivery failure abort
//! the transaction that triggered it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
    PaymentSuccess,
    OrderCancelled,
    ReturnRequested,
    ReturnApproved,
    ReturnRejected,
    ReturnCompleted,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: Uuid, kind: NotificationKind, payload: serde_json::Value);

    async fn notify_admins(&self, kind: NotificationKind, payload: serde_json::Value);
}

/// Default sink: structured log lines, picked up by the external
/// notification pipeline.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, user_id: Uuid, kind: NotificationKind, payload: serde_json::Value) {
        info!(user_id = %user_id, kind = %kind, payload = %payload, "User notification");
    }

    async fn notify_admins(&self, kind: NotificationKind, payload: serde_json::Value) {
        info!(kind = %kind, payload = %payload, "Admin notification");
    }
}
