//! Cart endpoints and the one-pending-order guard.

mod common;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use common::{response_json, TestApp};
use rstest::rstest;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use serde_json::{json, Value};
use storefront_api::{
    entities::{order, Order, PaymentStatus},
    errors::ServiceError,
};
use uuid::Uuid;

async fn cart_items(app: &TestApp, user_id: Uuid) -> Vec<Value> {
    let response = app
        .request(Method::GET, "/api/v1/cart", Some(user_id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    response_json(response).await["data"]["items"]
        .as_array()
        .cloned()
        .unwrap_or_default()
}

async fn add(app: &TestApp, user_id: Uuid, product_id: Uuid, quantity: i32) -> Uuid {
    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(user_id),
            Some(json!({ "product_id": product_id, "quantity": quantity })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    response_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap()
}

fn pending_order_row(user_id: Uuid) -> order::ActiveModel {
    let now = Utc::now();
    order::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        payment_status: Set(PaymentStatus::Pending),
        subtotal_amount: Set(Decimal::ZERO),
        discount_amount: Set(Decimal::ZERO),
        shipping_amount: Set(Decimal::ZERO),
        total_amount: Set(Decimal::ZERO),
        currency: Set("USD".to_string()),
        payment_method: Set(None),
        payment_intent_id: Set(None),
        shipping_address: Set(None),
        billing_address: Set(None),
        remark: Set(None),
        applied_voucher_code: Set(None),
        paid_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

#[tokio::test]
async fn adding_the_same_product_increments_its_line() {
    let app = TestApp::new().await;
    let user = app.seed_user(None).await;
    let product = app.seed_product("Mug", dec!(8)).await;

    let first = add(&app, user.id, product.id, 2).await;
    let second = add(&app, user.id, product.id, 3).await;
    assert_eq!(first, second);

    let items = cart_items(&app, user.id).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["quantity"], 5);
    assert_eq!(items[0]["product_name"], "Mug");
}

#[tokio::test]
async fn invalid_additions_are_rejected() {
    let app = TestApp::new().await;
    let user = app.seed_user(None).await;
    let product = app.seed_product("Mug", dec!(8)).await;

    let zero = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(user.id),
            Some(json!({ "product_id": product.id, "quantity": 0 })),
        )
        .await;
    assert_eq!(zero.status(), StatusCode::BAD_REQUEST);

    let unknown = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(user.id),
            Some(json!({ "product_id": Uuid::new_v4(), "quantity": 1 })),
        )
        .await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    assert!(cart_items(&app, user.id).await.is_empty());
}

#[tokio::test]
async fn positive_quantity_update_replaces_the_quantity() {
    let app = TestApp::new().await;
    let user = app.seed_user(None).await;
    let product = app.seed_product("Bowl", dec!(12)).await;
    let item_id = add(&app, user.id, product.id, 1).await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/cart/items/{}", item_id),
            Some(user.id),
            Some(json!({ "quantity": 4 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["data"]["quantity"], 4);
    assert_eq!(cart_items(&app, user.id).await[0]["quantity"], 4);
}

#[rstest]
#[case(0)]
#[case(-3)]
#[tokio::test]
async fn non_positive_quantity_removes_the_line(#[case] quantity: i32) {
    let app = TestApp::new().await;
    let user = app.seed_user(None).await;
    let product = app.seed_product("Plate", dec!(6)).await;
    let item_id = add(&app, user.id, product.id, 2).await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/cart/items/{}", item_id),
            Some(user.id),
            Some(json!({ "quantity": quantity })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(cart_items(&app, user.id).await.is_empty());
}

#[tokio::test]
async fn delete_removes_the_line_once() {
    let app = TestApp::new().await;
    let user = app.seed_user(None).await;
    let product = app.seed_product("Fork", dec!(2)).await;
    let item_id = add(&app, user.id, product.id, 1).await;
    let path = format!("/api/v1/cart/items/{}", item_id);

    let removed = app.request(Method::DELETE, &path, Some(user.id), None).await;
    assert_eq!(removed.status(), StatusCode::NO_CONTENT);
    assert!(cart_items(&app, user.id).await.is_empty());

    let again = app.request(Method::DELETE, &path, Some(user.id), None).await;
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn other_users_cart_lines_are_not_found() {
    let app = TestApp::new().await;
    let owner = app.seed_user(None).await;
    let intruder = app.seed_user(None).await;
    let product = app.seed_product("Spoon", dec!(2)).await;
    let item_id = add(&app, owner.id, product.id, 3).await;
    let path = format!("/api/v1/cart/items/{}", item_id);

    let update = app
        .request(
            Method::PUT,
            &path,
            Some(intruder.id),
            Some(json!({ "quantity": 0 })),
        )
        .await;
    assert_eq!(update.status(), StatusCode::NOT_FOUND);

    let delete = app
        .request(Method::DELETE, &path, Some(intruder.id), None)
        .await;
    assert_eq!(delete.status(), StatusCode::NOT_FOUND);

    let items = cart_items(&app, owner.id).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["quantity"], 3);
}

#[tokio::test]
async fn second_pending_order_for_a_user_is_rejected_by_the_database() {
    let app = TestApp::new().await;
    let user = app.seed_user(None).await;
    let product = app.seed_product("Lamp", dec!(20)).await;
    app.seed_cart_line(user.id, product.id, 1).await;

    let first = app
        .state
        .services
        .checkout
        .create_order_from_cart(user.id, Default::default())
        .await
        .unwrap();

    let err = pending_order_row(user.id)
        .insert(&*app.db)
        .await
        .unwrap_err();
    assert!(ServiceError::from(err).is_unique_violation());

    // Paid orders do not count against the guard.
    app.state
        .services
        .orders
        .mark_order_paid(first.order.order.id)
        .await
        .unwrap();
    pending_order_row(user.id).insert(&*app.db).await.unwrap();
}

#[tokio::test]
async fn concurrent_checkouts_share_one_pending_order() {
    let app = TestApp::new().await;
    let user = app.seed_user(None).await;
    let product = app.seed_product("Rug", dec!(70)).await;
    app.seed_cart_line(user.id, product.id, 1).await;

    let stripe = || storefront_api::services::commerce::CreateOrderRequest {
        payment_method: Some("stripe".to_string()),
        ..Default::default()
    };
    let checkout = &app.state.services.checkout;
    let (a, b) = tokio::join!(
        checkout.create_order_from_cart(user.id, stripe()),
        checkout.create_order_from_cart(user.id, stripe()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.order.order.id, b.order.order.id);
    assert_ne!(a.reused, b.reused);
    let pending = Order::find()
        .filter(order::Column::UserId.eq(user.id))
        .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
        .count(&*app.db)
        .await
        .unwrap();
    assert_eq!(pending, 1);
}
