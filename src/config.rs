use chrono::{DateTime, Utc};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use validator::Validate;

const CONFIG_DIR: &str = "config";
const DEFAULT_ENV: &str = "development";

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_reconcile_interval() -> u64 {
    300
}
fn default_return_window_days() -> i64 {
    7
}
fn default_gateway_timeout() -> u64 {
    10
}
fn default_provider() -> String {
    "gateway".to_string()
}

/// Tax and shipping rules used by order pricing. All amounts are integer
/// minor-currency units; tax is expressed in basis points to keep the
/// arithmetic exact.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct PricingConfig {
    /// e.g. 1000 = 10%.
    #[validate(range(min = 0, max = 10000))]
    pub tax_rate_bps: i64,
    #[validate(range(min = 0))]
    pub shipping_flat_cents: i64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            tax_rate_bps: 1000,
            shipping_flat_cents: 2000,
        }
    }
}

/// Payment gateway connection settings.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct GatewayConfig {
    pub base_url: String,
    pub server_key: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            server_key: String::new(),
            provider: default_provider(),
            timeout_secs: default_gateway_timeout(),
        }
    }
}

/// A coupon the configured validator accepts.
#[derive(Clone, Debug, Deserialize)]
pub struct CouponRule {
    pub code: String,
    /// Fixed discount amount.
    #[serde(default)]
    pub discount_cents: i64,
    /// Percentage discount in basis points, applied instead of
    /// `discount_cents` when non-zero.
    #[serde(default)]
    pub discount_bps: i64,
    #[serde(default)]
    pub min_subtotal_cents: i64,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub max_uses: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    pub database_url: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Seconds between payment reconciliation sweeps.
    #[serde(default = "default_reconcile_interval")]
    #[validate(range(min = 1))]
    pub reconcile_interval_secs: u64,

    /// Days after delivery during which a return may be opened.
    #[serde(default = "default_return_window_days")]
    #[validate(range(min = 1))]
    pub return_window_days: i64,

    /// Create tables from the entity definitions on startup (sqlite/dev).
    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default)]
    pub pricing: PricingConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub coupons: Vec<CouponRule>,
}

impl AppConfig {
    /// Loads configuration layered as: `config/default.toml`, then
    /// `config/{APP_ENV}.toml` if present, then `APP_*` environment
    /// variables (`APP_PRICING__TAX_RATE_BPS=1000` style nesting).
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

        let mut builder = Config::builder()
            .add_source(File::from(Path::new(CONFIG_DIR).join("default.toml")).required(false));

        let env_file = Path::new(CONFIG_DIR).join(format!("{env}.toml"));
        builder = builder
            .add_source(File::from(env_file).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"));

        let cfg: AppConfig = builder.build()?.try_deserialize()?;
        cfg.validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pricing_defaults_are_exact_integers() {
        let pricing = PricingConfig::default();
        assert_eq!(pricing.tax_rate_bps, 1000);
        assert_eq!(pricing.shipping_flat_cents, 2000);
    }

    #[test]
    fn bind_addr_joins_host_and_port() {
        let cfg = AppConfig {
            database_url: "sqlite::memory:".into(),
            host: "0.0.0.0".into(),
            port: 3000,
            log_level: "info".into(),
            reconcile_interval_secs: 300,
            return_window_days: 7,
            auto_migrate: true,
            pricing: PricingConfig::default(),
            gateway: GatewayConfig::default(),
            coupons: vec![],
        };
        assert_eq!(cfg.bind_addr(), "0.0.0.0:3000");
    }
}
