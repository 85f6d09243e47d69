use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use storefront_api::config::AppConfig;
use storefront_api::gateway::HttpPaymentGateway;
use storefront_api::notifications::TracingNotifier;
use storefront_api::scheduler::ReconciliationScheduler;
use storefront_api::services::coupons::ConfiguredCoupons;
use storefront_api::services::inventory::InventoryService;
use storefront_api::services::orders::OrderService;
use storefront_api::services::payments::PaymentService;
use storefront_api::services::returns::ReturnService;
use storefront_api::{api_routes, db, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    let db = Arc::new(
        db::connect(&config.database_url)
            .await
            .context("failed to connect to database")?,
    );
    if config.auto_migrate {
        db::create_schema(&db)
            .await
            .context("failed to create schema")?;
    }

    let gateway = Arc::new(
        HttpPaymentGateway::new(&config.gateway)
            .map_err(|e| anyhow::anyhow!("failed to build gateway client: {e}"))?,
    );
    let notifier = Arc::new(TracingNotifier);
    let coupons = Arc::new(ConfiguredCoupons::new(config.coupons.clone()));

    let inventory = InventoryService::new(db.clone());
    let orders = Arc::new(OrderService::new(
        db.clone(),
        inventory.clone(),
        gateway.clone(),
        coupons,
        config.pricing.clone(),
        config.gateway.provider.clone(),
    ));
    let payments = Arc::new(PaymentService::new(
        db.clone(),
        inventory.clone(),
        gateway,
        notifier.clone(),
    ));
    let returns = Arc::new(ReturnService::new(
        db.clone(),
        inventory.clone(),
        notifier,
        config.return_window_days,
    ));

    let scheduler = Arc::new(ReconciliationScheduler::new(
        payments.clone(),
        Duration::from_secs(config.reconcile_interval_secs),
    ));
    scheduler.start();

    let state = AppState {
        db,
        config: config.clone(),
        inventory,
        orders,
        payments,
        returns,
    };

    let app = api_routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "Storefront API listening");

    let shutdown_scheduler = scheduler.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            shutdown_scheduler.stop();
        })
        .await
        .context("server error")?;

    Ok(())
}
