//! Payment gateway client boundary.
//!
//! The core only depends on the gateway's status-query contract: create a
//! payable transaction, ask what state it is in, and classify what came
//! back (including errors, since the gateway reports terminal states
//! through its error channel too).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::config::GatewayConfig;

/// Client-facing handle for a newly created gateway transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayToken {
    pub token: String,
    pub redirect_url: Option<String>,
}

/// Gateway-reported state of an order's transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub transaction_status: String,
    pub settlement_time: Option<DateTime<Utc>>,
    pub transaction_time: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway returned HTTP {status}: {message}")]
    Http {
        status: u16,
        /// Transaction status embedded in the error body, when present.
        transaction_status: Option<String>,
        message: String,
    },

    #[error("gateway unreachable: {0}")]
    Network(String),

    #[error("gateway response malformed: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    pub fn http_status(&self) -> Option<u16> {
        match self {
            GatewayError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn embedded_transaction_status(&self) -> Option<&str> {
        match self {
            GatewayError::Http {
                transaction_status, ..
            } => transaction_status.as_deref(),
            _ => None,
        }
    }
}

/// Why a pending payment is being cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Expired,
    Cancelled,
    Denied,
}

/// Closed classification of a gateway report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Settle,
    Cancel(CancelReason),
    /// Not terminal; leave the payment for the next sweep.
    Pending,
}

/// Maps a gateway transaction status onto the reconciliation action.
/// Unrecognized states are left pending rather than guessed at.
pub fn classify_status(status: &str) -> Disposition {
    match status {
        "settlement" | "capture" => Disposition::Settle,
        "expire" => Disposition::Cancel(CancelReason::Expired),
        "cancel" => Disposition::Cancel(CancelReason::Cancelled),
        "deny" => Disposition::Cancel(CancelReason::Denied),
        _ => Disposition::Pending,
    }
}

/// Classifies a failed status query. The gateway is authoritative even via
/// its error channel: an embedded terminal transaction status, or an HTTP
/// not-found/gone, means the payment will never settle.
pub fn classify_error(err: &GatewayError) -> Disposition {
    if let Some(status) = err.embedded_transaction_status() {
        if let Disposition::Cancel(reason) = classify_status(status) {
            return Disposition::Cancel(reason);
        }
    }
    match err.http_status() {
        Some(404) => Disposition::Cancel(CancelReason::Cancelled),
        Some(410) => Disposition::Cancel(CancelReason::Expired),
        _ => Disposition::Pending,
    }
}

/// Charge details handed to the gateway at order creation.
#[derive(Debug, Clone, Serialize)]
pub struct ChargeRequest {
    pub order_id: Uuid,
    pub gross_amount_cents: i64,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_transaction(&self, charge: &ChargeRequest)
        -> Result<GatewayToken, GatewayError>;

    async fn transaction_status(&self, order_id: Uuid)
        -> Result<TransactionStatus, GatewayError>;
}

/// HTTP implementation against the configured gateway endpoint.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    server_key: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    transaction_status: Option<String>,
    #[serde(default)]
    message: String,
}

impl HttpPaymentGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            server_key: config.server_key.clone(),
        })
    }

    async fn into_gateway_error(response: reqwest::Response) -> GatewayError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let parsed: Option<ErrorBody> = serde_json::from_str(&body).ok();
        GatewayError::Http {
            status,
            transaction_status: parsed.as_ref().and_then(|b| b.transaction_status.clone()),
            message: parsed.map(|b| b.message).unwrap_or(body),
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_transaction(
        &self,
        charge: &ChargeRequest,
    ) -> Result<GatewayToken, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v2/transactions", self.base_url))
            .bearer_auth(&self.server_key)
            .json(charge)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::into_gateway_error(response).await);
        }

        response
            .json::<GatewayToken>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }

    async fn transaction_status(
        &self,
        order_id: Uuid,
    ) -> Result<TransactionStatus, GatewayError> {
        let response = self
            .client
            .get(format!("{}/v2/transactions/{}/status", self.base_url, order_id))
            .bearer_auth(&self.server_key)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::into_gateway_error(response).await);
        }

        response
            .json::<TransactionStatus>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}
