//! Database-backed pricing through the cart totals and shipping config endpoints.

mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{money, response_json, TestApp, VoucherSeed};
use rstest::rstest;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use storefront_api::entities::commerce::VoucherScope;
use uuid::Uuid;

async fn totals(app: &TestApp, user_id: Uuid) -> Value {
    let response = app
        .request(Method::GET, "/api/v1/cart/totals", Some(user_id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    response_json(response).await["data"].clone()
}

#[tokio::test]
async fn empty_cart_prices_to_zero() {
    let app = TestApp::new().await;
    let user = app.seed_user(None).await;
    app.seed_shipping(dec!(6), dec!(2)).await;

    let body = totals(&app, user.id).await;
    for field in ["subtotal", "discount", "shipping", "total"] {
        assert_eq!(money(&body[field]), Decimal::ZERO, "{}", field);
    }
    assert!(body["applied_voucher_code"].is_null());
}

#[rstest]
#[case(1, dec!(6))]
#[case(2, dec!(8))]
#[case(10, dec!(24))]
#[tokio::test]
async fn shipping_follows_active_config(#[case] quantity: i32, #[case] expected: Decimal) {
    let app = TestApp::new().await;
    let user = app.seed_user(None).await;
    let product = app.seed_product("Socks", dec!(5)).await;
    app.seed_shipping(dec!(6), dec!(2)).await;
    app.seed_cart_line(user.id, product.id, quantity).await;

    let body = totals(&app, user.id).await;
    assert_eq!(money(&body["shipping"]), expected);
    assert_eq!(
        money(&body["total"]),
        dec!(5) * Decimal::from(quantity) + expected
    );
}

#[tokio::test]
async fn fixed_voucher_applies_once_above_threshold() {
    let app = TestApp::new().await;
    let user = app.seed_user(None).await;
    let serum = app.seed_product("Serum", dec!(59.90)).await;
    app.seed_voucher(
        VoucherSeed {
            min_quantity: 1,
            ..VoucherSeed::fixed("SERUM20", dec!(20), VoucherScope::ProductList)
        },
        &[serum.id],
    )
    .await;
    app.seed_cart_line(user.id, serum.id, 2).await;

    let body = totals(&app, user.id).await;
    assert_eq!(money(&body["subtotal"]), dec!(119.80));
    assert_eq!(money(&body["discount"]), dec!(20.00));
    assert_eq!(money(&body["total"]), dec!(99.80));
    assert_eq!(body["applied_voucher_code"], "SERUM20");
}

#[rstest]
#[case(10, dec!(400))]
#[case(9, dec!(0))]
#[tokio::test]
async fn per_unit_voucher_needs_minimum_quantity(
    #[case] quantity: i32,
    #[case] expected: Decimal,
) {
    let app = TestApp::new().await;
    let user = app.seed_user(None).await;
    let product = app.seed_product("Bulk", dec!(100)).await;
    app.seed_voucher(
        VoucherSeed {
            min_quantity: 10,
            per_unit: true,
            ..VoucherSeed::fixed("BULK40", dec!(40), VoucherScope::ProductList)
        },
        &[product.id],
    )
    .await;
    app.seed_cart_line(user.id, product.id, quantity).await;

    let body = totals(&app, user.id).await;
    assert_eq!(money(&body["discount"]), expected);
}

#[tokio::test]
async fn user_type_voucher_ignores_other_user_types() {
    let app = TestApp::new().await;
    let wholesale = app.seed_user_type("wholesale").await;
    let retail = app.seed_user_type("retail").await;
    let retail_user = app.seed_user(Some(retail.id)).await;
    let wholesale_user = app.seed_user(Some(wholesale.id)).await;
    let product = app.seed_product("Crate", dec!(80)).await;
    app.seed_voucher(
        VoucherSeed {
            target_user_type_id: Some(wholesale.id),
            ..VoucherSeed::fixed("WHOLESALE", dec!(10), VoucherScope::UserType)
        },
        &[product.id],
    )
    .await;
    app.seed_cart_line(retail_user.id, product.id, 1).await;
    app.seed_cart_line(wholesale_user.id, product.id, 1).await;

    let retail_body = totals(&app, retail_user.id).await;
    assert_eq!(money(&retail_body["discount"]), Decimal::ZERO);
    assert!(retail_body["applied_voucher_code"].is_null());

    let wholesale_body = totals(&app, wholesale_user.id).await;
    assert_eq!(money(&wholesale_body["discount"]), dec!(10));
}

#[tokio::test]
async fn user_voucher_only_applies_to_its_user() {
    let app = TestApp::new().await;
    let vip = app.seed_user(None).await;
    let regular = app.seed_user(None).await;
    let product = app.seed_product("Gift", dec!(50)).await;
    app.seed_voucher(
        VoucherSeed {
            target_user_id: Some(vip.id),
            ..VoucherSeed::fixed("VIP", dec!(15), VoucherScope::User)
        },
        &[product.id],
    )
    .await;
    app.seed_cart_line(vip.id, product.id, 1).await;
    app.seed_cart_line(regular.id, product.id, 1).await;

    assert_eq!(money(&totals(&app, vip.id).await["discount"]), dec!(15));
    assert_eq!(money(&totals(&app, regular.id).await["discount"]), dec!(0));
}

#[tokio::test]
async fn expired_and_future_vouchers_do_not_apply() {
    let app = TestApp::new().await;
    let user = app.seed_user(None).await;
    let product = app.seed_product("Tea", dec!(20)).await;
    let now = Utc::now();
    app.seed_voucher(
        VoucherSeed {
            valid_to: Some(now - Duration::days(1)),
            ..VoucherSeed::fixed("OLD", dec!(5), VoucherScope::Global)
        },
        &[product.id],
    )
    .await;
    app.seed_voucher(
        VoucherSeed {
            valid_from: Some(now + Duration::days(1)),
            ..VoucherSeed::fixed("SOON", dec!(5), VoucherScope::Global)
        },
        &[product.id],
    )
    .await;
    app.seed_cart_line(user.id, product.id, 1).await;

    assert_eq!(money(&totals(&app, user.id).await["discount"]), dec!(0));
}

#[tokio::test]
async fn discount_larger_than_cart_floors_total_at_zero() {
    let app = TestApp::new().await;
    let user = app.seed_user(None).await;
    let product = app.seed_product("Sticker", dec!(3)).await;
    app.seed_voucher(
        VoucherSeed::fixed("HUGE", dec!(50), VoucherScope::Global),
        &[product.id],
    )
    .await;
    app.seed_cart_line(user.id, product.id, 1).await;

    let body = totals(&app, user.id).await;
    assert_eq!(money(&body["discount"]), dec!(50));
    assert_eq!(money(&body["total"]), dec!(0));
}

#[tokio::test]
async fn replacing_shipping_config_keeps_a_single_active_row() {
    let app = TestApp::new().await;
    let admin = app.seed_admin().await;
    let user = app.seed_user(None).await;
    let product = app.seed_product("Box", dec!(10)).await;
    app.seed_cart_line(user.id, product.id, 3).await;

    let initial = app
        .request(Method::GET, "/api/v1/shipping-config", Some(admin.id), None)
        .await;
    assert_eq!(initial.status(), StatusCode::OK);
    assert!(response_json(initial).await["data"]["id"].is_null());

    for (first, additional) in [("4.00", "1.00"), ("7.50", "0.50")] {
        let response = app
            .request(
                Method::PUT,
                "/api/v1/shipping-config",
                Some(admin.id),
                Some(json!({
                    "base_fee_first_item": first,
                    "additional_fee_per_item": additional
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let active = response_json(
        app.request(Method::GET, "/api/v1/shipping-config", Some(admin.id), None)
            .await,
    )
    .await;
    assert_eq!(money(&active["data"]["base_fee_first_item"]), dec!(7.50));
    assert_eq!(money(&totals(&app, user.id).await["shipping"]), dec!(8.50));
}

#[tokio::test]
async fn negative_shipping_fee_is_rejected() {
    let app = TestApp::new().await;
    let admin = app.seed_admin().await;
    let response = app
        .request(
            Method::PUT,
            "/api/v1/shipping-config",
            Some(admin.id),
            Some(json!({
                "base_fee_first_item": "-1.00",
                "additional_fee_per_item": "0"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn shipping_config_requires_an_admin() {
    let app = TestApp::new().await;
    let shopper = app.seed_user(None).await;
    let free_shipping = json!({
        "base_fee_first_item": "0",
        "additional_fee_per_item": "0"
    });

    let anonymous = app
        .request(
            Method::PUT,
            "/api/v1/shipping-config",
            None,
            Some(free_shipping.clone()),
        )
        .await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let as_shopper = app
        .request(
            Method::PUT,
            "/api/v1/shipping-config",
            Some(shopper.id),
            Some(free_shipping),
        )
        .await;
    assert_eq!(as_shopper.status(), StatusCode::FORBIDDEN);

    let read = app
        .request(Method::GET, "/api/v1/shipping-config", Some(shopper.id), None)
        .await;
    assert_eq!(read.status(), StatusCode::FORBIDDEN);

    let unknown = app
        .request(Method::GET, "/api/v1/shipping-config", Some(Uuid::new_v4()), None)
        .await;
    assert_eq!(unknown.status(), StatusCode::FORBIDDEN);
}
