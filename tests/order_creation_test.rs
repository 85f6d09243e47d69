mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use sea_orm::EntityTrait;
use uuid::Uuid;

use storefront_api::config::CouponRule;
use storefront_api::entities::order::{self, OrderStatus};
use storefront_api::entities::payment::PaymentStatus;
use storefront_api::errors::ServiceError;
use storefront_api::services::orders::{CreateOrderRequest, OrderLine};

use common::{level, order_items, seed_variant, TestApp};

fn request(lines: Vec<OrderLine>) -> CreateOrderRequest {
    CreateOrderRequest {
        shipping_address: Some("1 Example Way".to_string()),
        coupon_code: None,
        items: lines,
    }
}

#[tokio::test]
async fn creates_order_with_exact_integer_pricing() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let variant_a = seed_variant(&app.db, 10_000, 10).await;
    let variant_b = seed_variant(&app.db, 5_000, 10).await;

    let detail = app
        .orders
        .create_order(
            user,
            request(vec![
                OrderLine {
                    variant_id: variant_a,
                    quantity: 2,
                },
                OrderLine {
                    variant_id: variant_b,
                    quantity: 1,
                },
            ]),
            None,
        )
        .await
        .expect("order created");

    // 2 x 10000 + 1 x 5000, 10% tax, flat 2000 shipping.
    assert_eq!(detail.order.subtotal_cents, 25_000);
    assert_eq!(detail.order.discount_cents, 0);
    assert_eq!(detail.order.tax_cents, 2_500);
    assert_eq!(detail.order.shipping_cents, 2_000);
    assert_eq!(detail.order.total_cents, 29_500);
    assert_eq!(detail.order.status, OrderStatus::Pending.to_string());

    assert_eq!(detail.items.len(), 2);
    let snapshot = detail
        .items
        .iter()
        .find(|i| i.variant_id == Some(variant_a))
        .expect("line for first variant");
    assert_eq!(snapshot.unit_price_cents, 10_000);
    assert_eq!(snapshot.line_total_cents, 20_000);

    assert_eq!(detail.payment.amount_cents, 29_500);
    assert_eq!(detail.payment.status, PaymentStatus::Pending.to_string());

    // Stock is reserved, not depleted, until settlement.
    let level_a = level(&app.db, variant_a).await;
    assert_eq!(level_a.stock_quantity, 10);
    assert_eq!(level_a.reserved_quantity, 2);
    let level_b = level(&app.db, variant_b).await;
    assert_eq!(level_b.reserved_quantity, 1);
}

#[tokio::test]
async fn gateway_token_is_issued_after_commit() {
    let app = TestApp::new().await;
    let variant = seed_variant(&app.db, 1_000, 5).await;

    let detail = app
        .orders
        .create_order(
            Uuid::new_v4(),
            request(vec![OrderLine {
                variant_id: variant,
                quantity: 1,
            }]),
            None,
        )
        .await
        .expect("order created");

    let token = detail.payment_token.expect("token present");
    assert_eq!(token.token, format!("tok-{}", detail.order.id));
    assert_eq!(
        detail.payment.provider_payment_id.as_deref(),
        Some(token.token.as_str())
    );
    assert_eq!(app.gateway.create_calls(), vec![detail.order.id]);
}

#[tokio::test]
async fn idempotency_key_replay_returns_the_first_order() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let variant = seed_variant(&app.db, 2_000, 10).await;
    let key = "order-abc-123".to_string();

    let first = app
        .orders
        .create_order(
            user,
            request(vec![OrderLine {
                variant_id: variant,
                quantity: 3,
            }]),
            Some(key.clone()),
        )
        .await
        .expect("first create");

    let replay = app
        .orders
        .create_order(
            user,
            request(vec![OrderLine {
                variant_id: variant,
                quantity: 3,
            }]),
            Some(key),
        )
        .await
        .expect("replay");

    assert_eq!(replay.order.id, first.order.id);
    assert!(replay.payment_token.is_none());

    // One order, one reservation, one gateway charge.
    let all_orders = order::Entity::find().all(&*app.db).await.unwrap();
    assert_eq!(all_orders.len(), 1);
    assert_eq!(level(&app.db, variant).await.reserved_quantity, 3);
    assert_eq!(app.gateway.create_calls().len(), 1);
}

#[tokio::test]
async fn insufficient_stock_aborts_the_whole_order() {
    let app = TestApp::new().await;
    let plenty = seed_variant(&app.db, 1_000, 10).await;
    let scarce = seed_variant(&app.db, 1_000, 1).await;

    let err = app
        .orders
        .create_order(
            Uuid::new_v4(),
            request(vec![
                OrderLine {
                    variant_id: plenty,
                    quantity: 2,
                },
                OrderLine {
                    variant_id: scarce,
                    quantity: 5,
                },
            ]),
            None,
        )
        .await
        .expect_err("must fail");
    assert_matches!(err, ServiceError::InsufficientStock(_));

    // The first line's reservation rolled back with the transaction.
    assert_eq!(level(&app.db, plenty).await.reserved_quantity, 0);
    assert_eq!(level(&app.db, scarce).await.reserved_quantity, 0);
    assert!(order::Entity::find().all(&*app.db).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_variant_is_rejected() {
    let app = TestApp::new().await;
    let err = app
        .orders
        .create_order(
            Uuid::new_v4(),
            request(vec![OrderLine {
                variant_id: Uuid::new_v4(),
                quantity: 1,
            }]),
            None,
        )
        .await
        .expect_err("must fail");
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn empty_and_nonpositive_lines_are_rejected() {
    let app = TestApp::new().await;
    let variant = seed_variant(&app.db, 1_000, 5).await;

    let err = app
        .orders
        .create_order(Uuid::new_v4(), request(vec![]), None)
        .await
        .expect_err("empty order");
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = app
        .orders
        .create_order(
            Uuid::new_v4(),
            request(vec![OrderLine {
                variant_id: variant,
                quantity: 0,
            }]),
            None,
        )
        .await
        .expect_err("zero quantity");
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn gateway_failure_leaves_the_order_payable() {
    let app = TestApp::new().await;
    let variant = seed_variant(&app.db, 3_000, 5).await;
    app.gateway.fail_create(true);

    let detail = app
        .orders
        .create_order(
            Uuid::new_v4(),
            request(vec![OrderLine {
                variant_id: variant,
                quantity: 2,
            }]),
            None,
        )
        .await
        .expect("order still created");

    assert!(detail.payment_token.is_none());
    assert_eq!(detail.order.status, OrderStatus::Pending.to_string());
    assert_eq!(detail.payment.status, PaymentStatus::Pending.to_string());
    assert!(detail.payment.provider_payment_id.is_none());
    assert_eq!(level(&app.db, variant).await.reserved_quantity, 2);
}

#[tokio::test]
async fn coupon_discount_feeds_the_tax_base() {
    let rules = vec![CouponRule {
        code: "SAVE5".to_string(),
        discount_cents: 5_000,
        discount_bps: 0,
        min_subtotal_cents: 0,
        starts_at: None,
        ends_at: Some(Utc::now() + Duration::days(1)),
        max_uses: None,
    }];
    let app = TestApp::with_coupons(rules).await;
    let variant = seed_variant(&app.db, 10_000, 5).await;

    let mut req = request(vec![OrderLine {
        variant_id: variant,
        quantity: 2,
    }]);
    req.coupon_code = Some("SAVE5".to_string());

    let detail = app
        .orders
        .create_order(Uuid::new_v4(), req, None)
        .await
        .expect("order created");

    // 20000 - 5000 discount, 10% tax on 15000, 2000 shipping.
    assert_eq!(detail.order.subtotal_cents, 20_000);
    assert_eq!(detail.order.discount_cents, 5_000);
    assert_eq!(detail.order.tax_cents, 1_500);
    assert_eq!(detail.order.total_cents, 18_500);
    assert_eq!(detail.order.coupon_code.as_deref(), Some("SAVE5"));
}

#[tokio::test]
async fn unknown_coupon_rejects_the_order() {
    let app = TestApp::new().await;
    let variant = seed_variant(&app.db, 1_000, 5).await;

    let mut req = request(vec![OrderLine {
        variant_id: variant,
        quantity: 1,
    }]);
    req.coupon_code = Some("NOPE".to_string());

    let err = app
        .orders
        .create_order(Uuid::new_v4(), req, None)
        .await
        .expect_err("must fail");
    assert_matches!(err, ServiceError::ValidationError(_));
    assert_eq!(level(&app.db, variant).await.reserved_quantity, 0);
}

#[tokio::test]
async fn failed_orders_do_not_burn_limited_coupons() {
    let rules = vec![CouponRule {
        code: "ONCE".to_string(),
        discount_cents: 1_000,
        discount_bps: 0,
        min_subtotal_cents: 0,
        starts_at: None,
        ends_at: None,
        max_uses: Some(1),
    }];
    let app = TestApp::with_coupons(rules).await;
    let scarce = seed_variant(&app.db, 10_000, 1).await;
    let user = Uuid::new_v4();

    let mut req = request(vec![OrderLine {
        variant_id: scarce,
        quantity: 5,
    }]);
    req.coupon_code = Some("ONCE".to_string());
    let err = app
        .orders
        .create_order(user, req, None)
        .await
        .expect_err("out of stock");
    assert_matches!(err, ServiceError::InsufficientStock(_));

    // The aborted order did not consume the single use.
    let mut req = request(vec![OrderLine {
        variant_id: scarce,
        quantity: 1,
    }]);
    req.coupon_code = Some("ONCE".to_string());
    let detail = app
        .orders
        .create_order(user, req, None)
        .await
        .expect("coupon still valid");
    assert_eq!(detail.order.discount_cents, 1_000);

    // The committed order did.
    let plenty = seed_variant(&app.db, 10_000, 5).await;
    let mut req = request(vec![OrderLine {
        variant_id: plenty,
        quantity: 1,
    }]);
    req.coupon_code = Some("ONCE".to_string());
    let err = app
        .orders
        .create_order(user, req, None)
        .await
        .expect_err("limit reached");
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn admin_cancellation_of_a_settled_order_conflicts() {
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, HeaderValue};
    use axum::Json;
    use storefront_api::handlers::orders::{update_order_status, UpdateOrderStatusRequest};

    let app = TestApp::new().await;
    let variant = seed_variant(&app.db, 1_000, 10).await;
    let detail = app
        .orders
        .create_order(
            Uuid::new_v4(),
            request(vec![OrderLine {
                variant_id: variant,
                quantity: 2,
            }]),
            None,
        )
        .await
        .unwrap();
    app.gateway.set_status(detail.order.id, "settlement");
    app.payments.reconcile_pending().await;

    let mut headers = HeaderMap::new();
    headers.insert("x-admin", HeaderValue::from_static("true"));

    let result = update_order_status(
        State(app.app_state()),
        Path(detail.order.id),
        headers.clone(),
        Json(UpdateOrderStatusRequest {
            status: "cancelled".to_string(),
        }),
    )
    .await;
    assert_matches!(result, Err(ServiceError::Conflict(_)));

    // The settled order is untouched.
    let detail = app.orders.get_order(detail.order.id).await.unwrap();
    assert_eq!(detail.order.status, OrderStatus::Processing.to_string());

    // A still-pending order cancels normally through the same endpoint.
    let pending = app
        .orders
        .create_order(
            Uuid::new_v4(),
            request(vec![OrderLine {
                variant_id: variant,
                quantity: 1,
            }]),
            None,
        )
        .await
        .unwrap();
    let result = update_order_status(
        State(app.app_state()),
        Path(pending.order.id),
        headers,
        Json(UpdateOrderStatusRequest {
            status: "cancelled".to_string(),
        }),
    )
    .await;
    assert!(result.is_ok());
    let pending = app.orders.get_order(pending.order.id).await.unwrap();
    assert_eq!(pending.order.status, OrderStatus::Cancelled.to_string());
}

#[tokio::test]
async fn fulfillment_transitions_set_delivered_at() {
    let app = TestApp::new().await;
    let variant = seed_variant(&app.db, 1_000, 5).await;
    let detail = app
        .orders
        .create_order(
            Uuid::new_v4(),
            request(vec![OrderLine {
                variant_id: variant,
                quantity: 1,
            }]),
            None,
        )
        .await
        .unwrap();

    let shipped = app
        .orders
        .update_order_status(detail.order.id, OrderStatus::Shipped)
        .await
        .expect("shipped");
    assert!(shipped.delivered_at.is_none());

    let delivered = app
        .orders
        .update_order_status(detail.order.id, OrderStatus::Delivered)
        .await
        .expect("delivered");
    assert!(delivered.delivered_at.is_some());

    // Pipeline-owned statuses are not reachable through this path.
    let err = app
        .orders
        .update_order_status(detail.order.id, OrderStatus::Cancelled)
        .await
        .expect_err("cancellation is pipeline-owned");
    assert_matches!(err, ServiceError::ValidationError(_));

    // Items remain queryable with their snapshot prices.
    let items = order_items(&app.db, detail.order.id).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].unit_price_cents, 1_000);
}
