//! Thin HTTP handlers over the services. Session resolution is delegated
//! to an external auth layer that forwards the acting identity in headers.

pub mod inventory;
pub mod orders;
pub mod payments;
pub mod returns;

use axum::http::HeaderMap;
use uuid::Uuid;

use crate::errors::ServiceError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ADMIN_HEADER: &str = "x-admin";
pub const IDEMPOTENCY_KEY_HEADER: &str = "x-idempotency-key";

/// Acting user id, as forwarded by the auth layer.
pub fn require_user(headers: &HeaderMap) -> Result<Uuid, ServiceError> {
    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized("Missing user identity".to_string()))?;
    Uuid::parse_str(raw)
        .map_err(|_| ServiceError::Unauthorized("Malformed user identity".to_string()))
}

/// Admin-only endpoints require the auth layer's admin marker.
pub fn require_admin(headers: &HeaderMap) -> Result<(), ServiceError> {
    let is_admin = headers
        .get(ADMIN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "true")
        .unwrap_or(false);
    if is_admin {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized("Admin access required".to_string()))
    }
}

pub fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

/// Acting admin id for audit trails, when forwarded.
pub fn actor_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
}
