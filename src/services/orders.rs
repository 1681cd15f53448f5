use crate::{
    entities::{order, order_item, Order, OrderItem, PaymentStatus},
    errors::ServiceError,
    payments::to_minor_units,
    services::commerce::cart_service,
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveEnum, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Select, UpdateMany,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Order with its line items, as returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// A completed provider payment as reported by the provider.
#[derive(Debug, Clone, Copy)]
pub struct SessionPayment<'a> {
    pub session_id: &'a str,
    /// Charged amount in minor units, when the provider reports it
    pub amount_total: Option<i64>,
}

/// Result of [`OrderService::mark_order_paid`] and
/// [`OrderService::mark_session_paid`].
#[derive(Debug, Clone)]
pub enum MarkPaidOutcome {
    /// This call moved the order from pending to paid.
    Transitioned(order::Model),
    /// The order was already paid; nothing changed.
    AlreadyPaid(order::Model),
    /// The session paid for an older version of the order; nothing changed.
    SessionMismatch(order::Model),
}

impl MarkPaidOutcome {
    pub fn order(&self) -> &order::Model {
        match self {
            Self::Transitioned(order) | Self::AlreadyPaid(order) | Self::SessionMismatch(order) => {
                order
            }
        }
    }

    pub fn transitioned(&self) -> bool {
        matches!(self, Self::Transitioned(_))
    }
}

/// Order reads and payment-state transitions
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Fetches an order owned by `user_id`. Other users' orders are reported
    /// as not found.
    #[instrument(skip(self))]
    pub async fn get_order_for_user(
        &self,
        order_id: Uuid,
        user_id: Uuid,
    ) -> Result<OrderDetails, ServiceError> {
        let order = find_owned_order(&*self.db, order_id, user_id).await?;
        let items = load_items(&*self.db, order.id).await?;
        Ok(OrderDetails { order, items })
    }

    /// The caller's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<OrderDetails>, ServiceError> {
        let orders = Order::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut items_by_order: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
        for item in OrderItem::find()
            .filter(order_item::Column::OrderId.is_in(ids))
            .order_by_asc(order_item::Column::Position)
            .all(&*self.db)
            .await?
        {
            items_by_order.entry(item.order_id).or_default().push(item);
        }

        Ok(orders
            .into_iter()
            .map(|order| {
                let items = items_by_order.remove(&order.id).unwrap_or_default();
                OrderDetails { order, items }
            })
            .collect())
    }

    /// Moves an order from pending to paid.
    ///
    /// Idempotent and safe to race: the transition is a single conditional
    /// update, so only one caller observes `Transitioned` and only that caller
    /// clears the cart. Cart clearing is best effort and never fails the call.
    #[instrument(skip(self))]
    pub async fn mark_order_paid(&self, order_id: Uuid) -> Result<MarkPaidOutcome, ServiceError> {
        let result = pay_pending(Order::update_many().filter(order::Column::Id.eq(order_id)))
            .exec(&*self.db)
            .await?;
        self.finish_transition(order_id, result.rows_affected).await
    }

    /// Marks an order paid from a provider session.
    ///
    /// The session must be the order's current one, or must have charged
    /// exactly the order's current total. A repeat checkout reprices the
    /// order and opens a new session, so an older session for a different
    /// amount leaves the order pending.
    #[instrument(skip(self))]
    pub async fn mark_session_paid(
        &self,
        order_id: Uuid,
        payment: SessionPayment<'_>,
    ) -> Result<MarkPaidOutcome, ServiceError> {
        let db = &*self.db;
        let order = Order::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.is_paid() {
            info!(%order_id, "Order already paid; mark-paid is a no-op");
            return Ok(MarkPaidOutcome::AlreadyPaid(order));
        }

        let update = Order::update_many().filter(order::Column::Id.eq(order_id));
        let update = if order.payment_intent_id.as_deref() == Some(payment.session_id) {
            // The session id pins the order version.
            update.filter(order::Column::PaymentIntentId.eq(payment.session_id))
        } else if payment.amount_total == Some(to_minor_units(order.total_amount)?) {
            // A retried session for the same amount; the version read above
            // must still be current.
            update.filter(order::Column::UpdatedAt.eq(order.updated_at))
        } else {
            warn!(
                %order_id,
                session_id = payment.session_id,
                current_session = ?order.payment_intent_id,
                amount_total = ?payment.amount_total,
                "Paid session does not match the order's current total"
            );
            counter!("storefront_stale_payment_sessions_total", 1);
            return Ok(MarkPaidOutcome::SessionMismatch(order));
        };

        let result = pay_pending(update).exec(db).await?;
        if result.rows_affected == 0 {
            let current = self.load_order(order_id).await?;
            if !current.is_paid() {
                warn!(%order_id, session_id = payment.session_id, "Order changed while applying payment");
                return Ok(MarkPaidOutcome::SessionMismatch(current));
            }
        }
        self.finish_transition(order_id, result.rows_affected).await
    }

    async fn load_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    async fn finish_transition(
        &self,
        order_id: Uuid,
        rows_affected: u64,
    ) -> Result<MarkPaidOutcome, ServiceError> {
        let order = self.load_order(order_id).await?;

        if rows_affected == 0 {
            info!(%order_id, "Order already paid; mark-paid is a no-op");
            return Ok(MarkPaidOutcome::AlreadyPaid(order));
        }

        counter!("storefront_orders_paid_total", 1);
        info!(%order_id, user_id = %order.user_id, "Order marked paid");

        if let Err(e) = cart_service::clear_cart(&*self.db, order.user_id).await {
            warn!(%order_id, "Failed to clear cart after payment: {}", e);
        }

        Ok(MarkPaidOutcome::Transitioned(order))
    }

    /// Records the provider session for the latest payment attempt. Paid
    /// orders are left untouched.
    #[instrument(skip(self))]
    pub async fn record_payment_session(
        &self,
        order_id: Uuid,
        session_id: &str,
    ) -> Result<(), ServiceError> {
        let result = Order::update_many()
            .col_expr(order::Column::PaymentIntentId, Expr::value(session_id))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending.to_value()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            warn!(%order_id, session_id, "Payment session not recorded; order no longer pending");
        }
        Ok(())
    }
}

/// Pending-to-paid update; callers add the row filters.
fn pay_pending(update: UpdateMany<Order>) -> UpdateMany<Order> {
    let now = Utc::now();
    update
        .col_expr(
            order::Column::PaymentStatus,
            Expr::value(PaymentStatus::Paid.to_value()),
        )
        .col_expr(order::Column::PaidAt, Expr::value(now))
        .col_expr(order::Column::UpdatedAt, Expr::value(now))
        .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending.to_value()))
}

pub(crate) async fn find_owned_order<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    user_id: Uuid,
) -> Result<order::Model, ServiceError> {
    Order::find_by_id(order_id)
        .one(conn)
        .await?
        .filter(|order| order.user_id == user_id)
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

fn pending_order_query(user_id: Uuid) -> Select<Order> {
    Order::find()
        .filter(order::Column::UserId.eq(user_id))
        .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending.to_value()))
}

/// The user's pending order, locked for the rest of the transaction.
///
/// SQLite has no row locks; its single writer serializes the transaction
/// instead.
pub(crate) async fn lock_pending_order<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Option<order::Model>, ServiceError> {
    Ok(pending_order_query(user_id)
        .lock_exclusive()
        .one(conn)
        .await?)
}

/// Writes a pending order snapshot. Fails with `Conflict` when the order was
/// paid since it was read, leaving the paid amounts untouched.
pub(crate) async fn save_pending_order<C: ConnectionTrait>(
    conn: &C,
    order: order::ActiveModel,
) -> Result<order::Model, ServiceError> {
    Order::update(order)
        .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending.to_value()))
        .exec(conn)
        .await
        .map_err(|e| match e {
            DbErr::RecordNotUpdated => {
                ServiceError::Conflict("Order was paid during checkout".to_string())
            }
            other => other.into(),
        })
}

pub(crate) async fn load_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<order_item::Model>, ServiceError> {
    Ok(OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::Position)
        .all(conn)
        .await?)
}
