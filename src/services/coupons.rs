//! Coupon validation boundary. The catalog/marketing side owns coupon
//! management; order creation only needs "is this code good for this
//! subtotal, and for how much".

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::CouponRule;
use crate::errors::ServiceError;

#[async_trait]
pub trait CouponValidator: Send + Sync {
    /// Returns the discount in minor-currency units, or a validation error
    /// naming the failed rule. Must not consume a use: validation can be
    /// followed by an order that fails to commit.
    async fn validate(&self, code: &str, subtotal_cents: i64) -> Result<i64, ServiceError>;

    /// Records one redemption. Called only after the order transaction
    /// committed.
    async fn record_use(&self, code: &str);
}

/// Validator backed by statically configured coupon rules. Usage counts are
/// tracked in-process.
pub struct ConfiguredCoupons {
    rules: Vec<CouponRule>,
    usages: Mutex<HashMap<String, u32>>,
}

impl ConfiguredCoupons {
    pub fn new(rules: Vec<CouponRule>) -> Self {
        Self {
            rules,
            usages: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CouponValidator for ConfiguredCoupons {
    async fn validate(&self, code: &str, subtotal_cents: i64) -> Result<i64, ServiceError> {
        let rule = self
            .rules
            .iter()
            .find(|r| r.code == code)
            .ok_or_else(|| ServiceError::ValidationError(format!("Unknown coupon: {code}")))?;

        let now = Utc::now();
        if let Some(starts_at) = rule.starts_at {
            if now < starts_at {
                return Err(ServiceError::ValidationError(format!(
                    "Coupon {code} is not active yet"
                )));
            }
        }
        if let Some(ends_at) = rule.ends_at {
            if now > ends_at {
                return Err(ServiceError::ValidationError(format!(
                    "Coupon {code} has expired"
                )));
            }
        }
        if subtotal_cents < rule.min_subtotal_cents {
            return Err(ServiceError::ValidationError(format!(
                "Coupon {code} requires a subtotal of at least {}",
                rule.min_subtotal_cents
            )));
        }

        if let Some(max_uses) = rule.max_uses {
            let usages = self
                .usages
                .lock()
                .map_err(|_| ServiceError::InternalError("Coupon usage lock poisoned".into()))?;
            let used = usages.get(code).copied().unwrap_or(0);
            if used >= max_uses {
                return Err(ServiceError::ValidationError(format!(
                    "Coupon {code} usage limit reached"
                )));
            }
        }

        let discount = if rule.discount_bps > 0 {
            subtotal_cents * rule.discount_bps / 10_000
        } else {
            rule.discount_cents
        };
        // A discount can never exceed what it discounts.
        Ok(discount.min(subtotal_cents))
    }

    async fn record_use(&self, code: &str) {
        if let Ok(mut usages) = self.usages.lock() {
            *usages.entry(code.to_string()).or_insert(0) += 1;
        }
    }
}
