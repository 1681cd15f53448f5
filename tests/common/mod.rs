#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::Value;
use storefront_api::{
    auth::USER_ID_HEADER,
    config::AppConfig,
    db,
    entities::commerce::{
        cart, cart_item, product, product_media, shipping_config, user, user_type, voucher,
        voucher_product, DiscountType, VoucherScope,
    },
    payments::{CheckoutSessionRequest, PaymentGateway, PaymentProviderError, ProviderSession},
    AppState,
};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// In-memory payment provider that records every session request.
#[derive(Default)]
pub struct FakeGateway {
    pub created: Mutex<Vec<CheckoutSessionRequest>>,
    pub sessions: Mutex<HashMap<String, ProviderSession>>,
    pub fail_create: Mutex<bool>,
}

impl FakeGateway {
    pub fn create_calls(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<CheckoutSessionRequest> {
        self.created.lock().unwrap().last().cloned()
    }

    /// Registers a provider-side session as the retrieve endpoint would report it.
    pub fn put_session(
        &self,
        id: &str,
        payment_status: &str,
        order_id: Option<Uuid>,
        amount_total: Option<i64>,
    ) {
        self.sessions.lock().unwrap().insert(
            id.to_string(),
            ProviderSession {
                id: id.to_string(),
                url: None,
                payment_status: payment_status.to_string(),
                client_reference_id: order_id.map(|id| id.to_string()),
                amount_total,
            },
        );
    }

    /// Marks an already created session as paid, keeping its amount.
    pub fn pay_session(&self, id: &str) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(id) {
            session.payment_status = "paid".to_string();
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<ProviderSession, PaymentProviderError> {
        if *self.fail_create.lock().unwrap() {
            return Err(PaymentProviderError::Api {
                status: 503,
                message: "unavailable".into(),
            });
        }

        let mut created = self.created.lock().unwrap();
        created.push(request.clone());
        let id = format!("cs_test_{}", created.len());
        let session = ProviderSession {
            url: Some(format!("https://checkout.test/pay/{}", id)),
            id: id.clone(),
            payment_status: "unpaid".to_string(),
            client_reference_id: Some(request.order_id.to_string()),
            amount_total: Some((request.gross_amount() - request.discount_amount).max(0)),
        };
        self.sessions.lock().unwrap().insert(id, session.clone());
        Ok(session)
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<ProviderSession, PaymentProviderError> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| PaymentProviderError::Api {
                status: 404,
                message: format!("No such checkout.session: {}", session_id),
            })
    }
}

/// Application backed by a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub db: Arc<DatabaseConnection>,
    pub gateway: Arc<FakeGateway>,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("storefront_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.frontend_url = "https://shop.test".to_string();
        cfg.stripe_webhook_secret = Some(WEBHOOK_SECRET.to_string());

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db = Arc::new(pool);
        let gateway = Arc::new(FakeGateway::default());
        let state = AppState::new(db.clone(), cfg, gateway.clone());
        let router = storefront_api::build_router(state.clone());

        Self {
            router,
            state,
            db,
            gateway,
            _dir: dir,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        user_id: Option<Uuid>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user_id) = user_id {
            builder = builder.header(USER_ID_HEADER, user_id.to_string());
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router response")
    }

    pub async fn post_raw(&self, uri: &str, headers: &[(&str, String)], body: Vec<u8>) -> Response {
        let mut builder = Request::builder().method(Method::POST).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        self.router
            .clone()
            .oneshot(builder.body(Body::from(body)).expect("request"))
            .await
            .expect("router response")
    }

    pub async fn seed_user_type(&self, name: &str) -> user_type::Model {
        user_type::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("insert user type")
    }

    pub async fn seed_user(&self, user_type_id: Option<Uuid>) -> user::Model {
        let id = Uuid::new_v4();
        user::ActiveModel {
            id: Set(id),
            email: Set(format!("{}@example.test", id)),
            user_type_id: Set(user_type_id),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("insert user")
    }

    /// A user in the configured admin user type.
    pub async fn seed_admin(&self) -> user::Model {
        let admin_type = self
            .seed_user_type(&self.state.config.admin_user_type.clone())
            .await;
        self.seed_user(Some(admin_type.id)).await
    }

    pub async fn seed_product(&self, name: &str, price: Decimal) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            stock: Set(100),
            category_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("insert product")
    }

    pub async fn seed_media(&self, product_id: Uuid, url: &str, position: i32) {
        product_media::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            url: Set(url.to_string()),
            position: Set(position),
        }
        .insert(&*self.db)
        .await
        .expect("insert media");
    }

    pub async fn seed_shipping(&self, first: Decimal, additional: Decimal) {
        let now = Utc::now();
        shipping_config::ActiveModel {
            base_fee_first_item: Set(first),
            additional_fee_per_item: Set(additional),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("insert shipping config");
    }

    /// Stores a voucher and links it to `products`.
    pub async fn seed_voucher(&self, voucher: VoucherSeed, products: &[Uuid]) -> voucher::Model {
        let model = voucher::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(voucher.code.to_string()),
            discount_type: Set(voucher.discount_type),
            amount: Set(voucher.amount),
            scope: Set(voucher.scope),
            target_user_type_id: Set(voucher.target_user_type_id),
            target_user_id: Set(voucher.target_user_id),
            min_quantity: Set(voucher.min_quantity),
            per_unit: Set(voucher.per_unit),
            is_active: Set(true),
            valid_from: Set(voucher.valid_from),
            valid_to: Set(voucher.valid_to),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("insert voucher");

        for product_id in products {
            voucher_product::ActiveModel {
                voucher_id: Set(model.id),
                product_id: Set(*product_id),
            }
            .insert(&*self.db)
            .await
            .expect("link voucher product");
        }
        model
    }

    /// Puts `quantity` of a product in the user's cart, bypassing the API.
    pub async fn seed_cart_line(&self, user_id: Uuid, product_id: Uuid, quantity: i32) {
        let cart = self
            .state
            .services
            .cart
            .get_or_create_cart(user_id)
            .await
            .expect("cart");
        let now = Utc::now();
        cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart.id),
            product_id: Set(product_id),
            quantity: Set(quantity),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("insert cart item");
    }

    pub async fn cart_model(&self, user_id: Uuid) -> cart::Model {
        self.state
            .services
            .cart
            .get_or_create_cart(user_id)
            .await
            .expect("cart")
    }
}

/// Voucher fields that vary between tests.
#[derive(Debug, Clone)]
pub struct VoucherSeed {
    pub code: &'static str,
    pub discount_type: DiscountType,
    pub amount: Decimal,
    pub scope: VoucherScope,
    pub target_user_type_id: Option<Uuid>,
    pub target_user_id: Option<Uuid>,
    pub min_quantity: i32,
    pub per_unit: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl VoucherSeed {
    pub fn fixed(code: &'static str, amount: Decimal, scope: VoucherScope) -> Self {
        Self {
            code,
            discount_type: DiscountType::Fixed,
            amount,
            scope,
            target_user_type_id: None,
            target_user_id: None,
            min_quantity: 0,
            per_unit: false,
            valid_from: None,
            valid_to: None,
        }
    }

    pub fn percent(code: &'static str, amount: Decimal, scope: VoucherScope) -> Self {
        Self {
            discount_type: DiscountType::Percent,
            ..Self::fixed(code, amount, scope)
        }
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Parses a JSON decimal (string or number) and rounds to cents.
pub fn money(value: &Value) -> Decimal {
    let parsed = match value {
        Value::String(s) => s.parse::<Decimal>().expect("decimal string"),
        Value::Number(n) => n.to_string().parse::<Decimal>().expect("decimal number"),
        other => panic!("not a money value: {other}"),
    };
    parsed.round_dp(2)
}
