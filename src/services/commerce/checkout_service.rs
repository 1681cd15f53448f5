use crate::{
    config::AppConfig,
    entities::{
        commerce::{cart, cart_item, product_media, Cart, CartItem, Product, ProductMedia},
        order, order_item, OrderItem, PaymentStatus,
    },
    errors::ServiceError,
    payments::{to_minor_units, CheckoutSessionRequest, PaymentGateway, SessionLineItem},
    services::{
        commerce::{
            cart_service,
            pricing_service::{self, allocate_discount, round_money},
        },
        orders::{self, MarkPaidOutcome, OrderDetails, OrderService, SessionPayment},
    },
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Payment method that opens a hosted provider checkout.
pub const STRIPE_PAYMENT_METHOD: &str = "stripe";

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, max = 50))]
    pub payment_method: Option<String>,
    #[validate(length(max = 2000))]
    pub remark: Option<String>,
    pub shipping_address: Option<Json>,
    /// Falls back to `shipping_address` when omitted
    pub billing_address: Option<Json>,
    /// Defaults to `false` for provider checkouts and `true` otherwise
    pub clear_cart: Option<bool>,
}

impl CreateOrderRequest {
    fn uses_provider(&self) -> bool {
        self.payment_method
            .as_deref()
            .map_or(false, |m| m.eq_ignore_ascii_case(STRIPE_PAYMENT_METHOD))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResult {
    pub order: OrderDetails,
    /// True when an existing pending order was reused
    pub reused: bool,
    pub payment_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentSession {
    pub order_id: Uuid,
    pub session_id: String,
    pub payment_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentVerification {
    pub order_id: Uuid,
    pub payment_status: PaymentStatus,
    /// False when the order had already been marked paid by another path
    pub newly_paid: bool,
}

/// A cart line joined with the catalog data snapshotted into the order.
struct SnapshotLine {
    product_id: Uuid,
    name: String,
    price: Decimal,
    media_url: Option<String>,
    quantity: i32,
}

/// Turns carts into orders and drives payment for them.
///
/// Policy for repeat checkouts: a user has at most one pending order (backed
/// by a partial unique index). Checking out again reuses it, replacing its
/// lines with a fresh snapshot when the cart has items and keeping the
/// previous snapshot when the cart is empty.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    orders: Arc<OrderService>,
    gateway: Arc<dyn PaymentGateway>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        orders: Arc<OrderService>,
        gateway: Arc<dyn PaymentGateway>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            orders,
            gateway,
            config,
        }
    }

    /// Creates (or reuses) the user's pending order from their cart.
    ///
    /// The database work runs in one transaction. A provider session, when
    /// requested, is opened only after that transaction commits.
    #[instrument(skip(self, request))]
    pub async fn create_order_from_cart(
        &self,
        user_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<CheckoutResult, ServiceError> {
        request.validate()?;

        // A concurrent checkout may win the pending-order insert; the second
        // attempt then finds and reuses that order.
        let (order, reused) = match self.write_order(user_id, &request).await {
            Err(e) if e.is_unique_violation() => {
                warn!(%user_id, "Concurrent checkout detected; reusing pending order");
                self.write_order(user_id, &request).await?
            }
            other => other?,
        };

        let items = orders::load_items(&*self.db, order.id).await?;
        let mut details = OrderDetails { order, items };

        let payment_url = if request.uses_provider() {
            if details.order.total_amount > Decimal::ZERO {
                let session = self.open_payment_session(&details).await?;
                details.order.payment_intent_id = Some(session.session_id);
                session.payment_url
            } else {
                info!(order_id = %details.order.id, "Zero-total order; no payment session opened");
                None
            }
        } else {
            None
        };

        if !reused {
            counter!("storefront_orders_created_total", 1);
        }
        info!(
            order_id = %details.order.id,
            %user_id,
            reused,
            total = %details.order.total_amount,
            "Checkout completed"
        );

        Ok(CheckoutResult {
            order: details,
            reused,
            payment_url,
        })
    }

    async fn write_order(
        &self,
        user_id: Uuid,
        request: &CreateOrderRequest,
    ) -> Result<(order::Model, bool), ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let lines = load_snapshot_lines(&txn, user_id).await?;
        let existing = orders::lock_pending_order(&txn, user_id).await?;

        let (order, reused) = match existing {
            None if lines.is_empty() => {
                return Err(ServiceError::BadRequest("Cart is empty".to_string()));
            }
            None => {
                let order = order::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    payment_status: Set(PaymentStatus::Pending),
                    subtotal_amount: Set(Decimal::ZERO),
                    discount_amount: Set(Decimal::ZERO),
                    shipping_amount: Set(Decimal::ZERO),
                    total_amount: Set(Decimal::ZERO),
                    currency: Set(self.config.default_currency.clone()),
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
                .insert(&txn)
                .await?;
                (order, false)
            }
            Some(order) => (order, true),
        };

        let mut active: order::ActiveModel = order.clone().into();

        if !lines.is_empty() {
            if reused {
                OrderItem::delete_many()
                    .filter(order_item::Column::OrderId.eq(order.id))
                    .exec(&txn)
                    .await?;
            }

            let totals = pricing_service::compute_totals(&txn, user_id, now).await?;
            let line_subtotals: Vec<Decimal> = lines
                .iter()
                .map(|line| round_money(line.price * Decimal::from(line.quantity)))
                .collect();
            let shares = allocate_discount(&line_subtotals, totals.discount);

            for (position, ((line, line_subtotal), share)) in lines
                .iter()
                .zip(line_subtotals.iter())
                .zip(shares.iter())
                .enumerate()
            {
                order_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    order_id: Set(order.id),
                    product_id: Set(Some(line.product_id)),
                    position: Set(position as i32),
                    quantity: Set(line.quantity),
                    unit_price: Set(line.price),
                    snapshot_name: Set(Some(line.name.clone())),
                    snapshot_price: Set(Some(line.price)),
                    snapshot_media_url: Set(line.media_url.clone()),
                    line_subtotal: Set(*line_subtotal),
                    discount_amount: Set(*share),
                    line_total: Set(round_money((*line_subtotal - *share).max(Decimal::ZERO))),
                    created_at: Set(now),
                }
                .insert(&txn)
                .await?;
            }

            active.subtotal_amount = Set(totals.subtotal);
            active.discount_amount = Set(totals.discount);
            active.shipping_amount = Set(totals.shipping);
            active.total_amount = Set(totals.total);
            active.applied_voucher_code = Set(totals.applied_voucher_code);
        } else {
            info!(order_id = %order.id, "Cart empty; keeping existing order snapshot");
        }

        if let Some(method) = &request.payment_method {
            active.payment_method = Set(Some(method.to_lowercase()));
        }
        if let Some(remark) = &request.remark {
            active.remark = Set(Some(remark.clone()));
        }
        if let Some(shipping) = &request.shipping_address {
            active.shipping_address = Set(Some(shipping.clone()));
            active.billing_address = Set(Some(
                request
                    .billing_address
                    .clone()
                    .unwrap_or_else(|| shipping.clone()),
            ));
        } else if let Some(billing) = &request.billing_address {
            active.billing_address = Set(Some(billing.clone()));
        }
        active.updated_at = Set(now);
        let order = orders::save_pending_order(&txn, active).await?;

        if request.clear_cart.unwrap_or(!request.uses_provider()) {
            cart_service::clear_cart(&txn, user_id).await?;
        }

        txn.commit().await?;
        Ok((order, reused))
    }

    /// Opens a fresh provider session for a pending order owned by the user.
    ///
    /// Does not change the payment status; only a webhook or an explicit
    /// verification does that.
    #[instrument(skip(self))]
    pub async fn retry_payment_for_order(
        &self,
        order_id: Uuid,
        user_id: Uuid,
    ) -> Result<PaymentSession, ServiceError> {
        let order = orders::find_owned_order(&*self.db, order_id, user_id).await?;
        if order.is_paid() {
            return Err(ServiceError::Conflict(format!(
                "Order {} has already been paid",
                order_id
            )));
        }
        if order.total_amount <= Decimal::ZERO {
            return Err(ServiceError::BadRequest(
                "Order total is zero; no payment is required".to_string(),
            ));
        }

        let items = orders::load_items(&*self.db, order.id).await?;
        self.open_payment_session(&OrderDetails { order, items })
            .await
    }

    /// Confirms a provider session and marks its order paid.
    #[instrument(skip(self))]
    pub async fn verify_payment_status(
        &self,
        session_id: &str,
        user_id: Uuid,
    ) -> Result<PaymentVerification, ServiceError> {
        if session_id.is_empty()
            || !session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ServiceError::BadRequest("Invalid session id".to_string()));
        }

        let session = self.gateway.retrieve_checkout_session(session_id).await?;
        if !session.is_paid() {
            return Err(ServiceError::BadRequest(format!(
                "Payment not completed (status: {})",
                session.payment_status
            )));
        }

        let order_id = session
            .client_reference_id
            .as_deref()
            .and_then(|reference| Uuid::parse_str(reference).ok())
            .ok_or_else(|| {
                ServiceError::BadRequest("Payment session has no order reference".to_string())
            })?;

        let order = orders::find_owned_order(&*self.db, order_id, user_id).await?;
        if order.is_paid() {
            return Ok(PaymentVerification {
                order_id,
                payment_status: PaymentStatus::Paid,
                newly_paid: false,
            });
        }

        let payment = SessionPayment {
            session_id: &session.id,
            amount_total: session.amount_total,
        };
        let outcome = self.orders.mark_session_paid(order_id, payment).await?;
        if let MarkPaidOutcome::SessionMismatch(_) = outcome {
            return Err(ServiceError::Conflict(
                "Payment session does not match the order's current total".to_string(),
            ));
        }
        Ok(PaymentVerification {
            order_id,
            payment_status: outcome.order().payment_status,
            newly_paid: outcome.transitioned(),
        })
    }

    /// Builds the provider request from the order snapshot. Called with no
    /// transaction open.
    async fn open_payment_session(
        &self,
        details: &OrderDetails,
    ) -> Result<PaymentSession, ServiceError> {
        let request = session_request(details, &self.config.frontend_url)?;
        let session = self.gateway.create_checkout_session(&request).await?;
        counter!("storefront_payment_sessions_created_total", 1);

        self.orders
            .record_payment_session(details.order.id, &session.id)
            .await?;

        info!(order_id = %details.order.id, session_id = %session.id, "Payment session opened");
        Ok(PaymentSession {
            order_id: details.order.id,
            session_id: session.id,
            payment_url: session.url,
        })
    }
}

/// Provider request for an order: one line per snapshot item, a shipping
/// line when shipping is charged, and the order discount in minor units.
pub fn session_request(
    details: &OrderDetails,
    frontend_url: &str,
) -> Result<CheckoutSessionRequest, ServiceError> {
    let order = &details.order;
    let mut line_items = Vec::with_capacity(details.items.len() + 1);

    for item in &details.items {
        line_items.push(SessionLineItem {
            name: item
                .snapshot_name
                .clone()
                .unwrap_or_else(|| "Item".to_string()),
            unit_amount: to_minor_units(item.snapshot_price.unwrap_or(item.unit_price))?,
            quantity: i64::from(item.quantity),
        });
    }

    if order.shipping_amount > Decimal::ZERO {
        line_items.push(SessionLineItem {
            name: "Shipping".to_string(),
            unit_amount: to_minor_units(order.shipping_amount)?,
            quantity: 1,
        });
    }

    let frontend = frontend_url.trim_end_matches('/');
    Ok(CheckoutSessionRequest {
        order_id: order.id,
        currency: order.currency.clone(),
        line_items,
        discount_amount: to_minor_units(order.discount_amount)?,
        success_url: format!(
            "{}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}",
            frontend
        ),
        cancel_url: format!("{}/checkout/cancel?order_id={}", frontend, order.id),
    })
}

/// Cart lines with product name, price and first media URL, in cart order.
async fn load_snapshot_lines(
    txn: &DatabaseTransaction,
    user_id: Uuid,
) -> Result<Vec<SnapshotLine>, ServiceError> {
    let cart = match Cart::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(txn)
        .await?
    {
        Some(cart) => cart,
        None => return Ok(Vec::new()),
    };

    let rows = CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .order_by_asc(cart_item::Column::CreatedAt)
        .find_also_related(Product)
        .all(txn)
        .await?;

    let product_ids: Vec<Uuid> = rows.iter().map(|(item, _)| item.product_id).collect();
    let mut first_media: HashMap<Uuid, String> = HashMap::new();
    if !product_ids.is_empty() {
        for media in ProductMedia::find()
            .filter(product_media::Column::ProductId.is_in(product_ids))
            .order_by_asc(product_media::Column::Position)
            .all(txn)
            .await?
        {
            first_media.entry(media.product_id).or_insert(media.url);
        }
    }

    Ok(rows
        .into_iter()
        .filter(|(item, _)| item.quantity > 0)
        .filter_map(|(item, product)| {
            let product = product?;
            Some(SnapshotLine {
                product_id: product.id,
                media_url: first_media.get(&product.id).cloned(),
                name: product.name,
                price: round_money(product.price),
                quantity: item.quantity,
            })
        })
        .collect())
}
