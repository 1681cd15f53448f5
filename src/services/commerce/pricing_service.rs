use crate::{
    entities::commerce::{
        cart, cart_item, voucher, voucher_product, Cart, CartItem, DiscountType, Product, User,
        Voucher, VoucherProduct, VoucherScope,
    },
    errors::ServiceError,
    services::commerce::shipping_config_service::{self, ShippingRate},
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Rounds a money value to cents, midpoint away from zero, with a fixed scale of 2.
pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// Result of pricing a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceBreakdown {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
    pub applied_voucher_code: Option<String>,
}

impl PriceBreakdown {
    pub fn zero() -> Self {
        Self {
            subtotal: round_money(Decimal::ZERO),
            discount: round_money(Decimal::ZERO),
            shipping: round_money(Decimal::ZERO),
            total: round_money(Decimal::ZERO),
            applied_voucher_code: None,
        }
    }
}

/// The purchasing user as seen by voucher targeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Customer {
    pub id: Uuid,
    pub user_type_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: Uuid,
    pub unit_price: Decimal,
    pub quantity: i32,
}

/// Voucher with its product links resolved.
#[derive(Debug, Clone)]
pub struct VoucherRule {
    pub code: String,
    pub discount_type: DiscountType,
    pub amount: Decimal,
    pub scope: VoucherScope,
    pub target_user_type_id: Option<Uuid>,
    pub target_user_id: Option<Uuid>,
    pub min_quantity: i32,
    pub per_unit: bool,
    pub is_active: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub product_ids: HashSet<Uuid>,
}

impl VoucherRule {
    pub fn from_model(model: voucher::Model, product_ids: HashSet<Uuid>) -> Self {
        Self {
            code: model.code,
            discount_type: model.discount_type,
            amount: model.amount,
            scope: model.scope,
            target_user_type_id: model.target_user_type_id,
            target_user_id: model.target_user_id,
            min_quantity: model.min_quantity,
            per_unit: model.per_unit,
            is_active: model.is_active,
            valid_from: model.valid_from,
            valid_to: model.valid_to,
            product_ids,
        }
    }

    fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.valid_from.map_or(true, |from| from <= now)
            && self.valid_to.map_or(true, |to| now <= to)
    }

    /// Whether this customer may use the voucher at all.
    pub fn is_applicable_to(&self, customer: &Customer, now: DateTime<Utc>) -> bool {
        if !self.is_active || !self.is_within_window(now) {
            return false;
        }

        match self.scope {
            // A type target on these scopes narrows eligibility further.
            VoucherScope::Global | VoucherScope::ProductList => self
                .target_user_type_id
                .map_or(true, |target| customer.user_type_id == Some(target)),
            VoucherScope::UserType => {
                self.target_user_type_id.is_some()
                    && self.target_user_type_id == customer.user_type_id
            }
            VoucherScope::User => self.target_user_id == Some(customer.id),
        }
    }

    fn percent_of(&self, base: Decimal) -> Decimal {
        self.amount / Decimal::ONE_HUNDRED * base
    }

    /// Discount this voucher contributes, or `None` when its thresholds are not met.
    pub fn contribution(
        &self,
        subtotal: Decimal,
        product_qty: &HashMap<Uuid, i64>,
    ) -> Option<Decimal> {
        let min_quantity = i64::from(self.min_quantity.max(0));

        // User-type vouchers without product links discount the whole cart,
        // gated on the subtotal.
        if self.scope == VoucherScope::UserType && self.product_ids.is_empty() {
            if subtotal < Decimal::from(min_quantity) {
                return None;
            }
            return Some(match self.discount_type {
                DiscountType::Fixed => self.amount,
                DiscountType::Percent => self.percent_of(subtotal),
            });
        }

        let matched_qty: i64 = self
            .product_ids
            .iter()
            .filter_map(|id| product_qty.get(id))
            .sum();

        if matched_qty == 0 || matched_qty < min_quantity {
            return None;
        }

        Some(match self.discount_type {
            DiscountType::Fixed if self.per_unit => self.amount * Decimal::from(matched_qty),
            DiscountType::Fixed => self.amount,
            // Applied to the whole cart subtotal, not only the matched lines.
            DiscountType::Percent => self.percent_of(subtotal),
        })
    }
}

/// Prices a cart.
///
/// Never fails: an unknown customer or an empty cart prices to all zeros.
/// Vouchers stack additively, evaluated in the given order; the code of the
/// last contributing voucher is reported.
pub fn price_cart(
    customer: Option<&Customer>,
    lines: &[CartLine],
    vouchers: &[VoucherRule],
    shipping_rate: &ShippingRate,
    now: DateTime<Utc>,
) -> PriceBreakdown {
    let customer = match customer {
        Some(customer) => customer,
        None => return PriceBreakdown::zero(),
    };

    let mut subtotal = Decimal::ZERO;
    let mut product_qty: HashMap<Uuid, i64> = HashMap::new();
    for line in lines.iter().filter(|line| line.quantity > 0) {
        subtotal += line.unit_price * Decimal::from(line.quantity);
        *product_qty.entry(line.product_id).or_insert(0) += i64::from(line.quantity);
    }

    if product_qty.is_empty() {
        return PriceBreakdown::zero();
    }

    let mut discount = Decimal::ZERO;
    let mut applied_voucher_code = None;
    for rule in vouchers
        .iter()
        .filter(|rule| rule.is_applicable_to(customer, now))
    {
        if let Some(amount) = rule.contribution(subtotal, &product_qty) {
            debug!(code = %rule.code, %amount, "voucher applied");
            discount += amount;
            applied_voucher_code = Some(rule.code.clone());
        }
    }

    let total_qty: i64 = product_qty.values().sum();
    let subtotal = round_money(subtotal);
    let discount = round_money(discount);
    let shipping = round_money(shipping_rate.fee_for(total_qty));
    let total = round_money((subtotal - discount + shipping).max(Decimal::ZERO));

    PriceBreakdown {
        subtotal,
        discount,
        shipping,
        total,
        applied_voucher_code,
    }
}

/// Splits an order-level discount across lines in proportion to their subtotals.
///
/// Shares are whole cents and always sum to the (cent-rounded) discount: each
/// line gets the floor of its exact share, and leftover cents go to the lines
/// with the largest remainders. A zero subtotal allocates nothing.
pub fn allocate_discount(line_subtotals: &[Decimal], total_discount: Decimal) -> Vec<Decimal> {
    let subtotal: Decimal = line_subtotals.iter().copied().sum();
    let total_discount = round_money(total_discount);

    if subtotal <= Decimal::ZERO || total_discount <= Decimal::ZERO {
        return line_subtotals
            .iter()
            .map(|_| round_money(Decimal::ZERO))
            .collect();
    }

    let total_cents = total_discount * Decimal::ONE_HUNDRED;
    let mut cents = Vec::with_capacity(line_subtotals.len());
    let mut remainders = Vec::with_capacity(line_subtotals.len());
    for line in line_subtotals {
        let exact = if *line > Decimal::ZERO {
            *line * total_cents / subtotal
        } else {
            Decimal::ZERO
        };
        let floor = exact.floor();
        cents.push(floor);
        remainders.push(exact - floor);
    }

    let mut leftover = total_cents - cents.iter().copied().sum::<Decimal>();
    let mut order: Vec<usize> = (0..line_subtotals.len()).collect();
    order.sort_by(|a, b| remainders[*b].cmp(&remainders[*a]).then(a.cmp(b)));
    for idx in order {
        if leftover <= Decimal::ZERO {
            break;
        }
        if line_subtotals[idx] > Decimal::ZERO {
            cents[idx] += Decimal::ONE;
            leftover -= Decimal::ONE;
        }
    }

    cents
        .into_iter()
        .map(|c| round_money(c / Decimal::ONE_HUNDRED))
        .collect()
}

/// Database-backed pricing for a user's current cart
#[derive(Clone)]
pub struct PricingService {
    db: Arc<DatabaseConnection>,
}

impl PricingService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Computes subtotal, discount, shipping and total for the user's cart.
    #[instrument(skip(self))]
    pub async fn compute_totals(&self, user_id: Uuid) -> Result<PriceBreakdown, ServiceError> {
        compute_totals(&*self.db, user_id, Utc::now()).await
    }
}

/// Connection-generic variant so checkout can price inside its transaction.
pub async fn compute_totals<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<PriceBreakdown, ServiceError> {
    let user = match User::find_by_id(user_id).one(conn).await? {
        Some(user) => user,
        None => return Ok(PriceBreakdown::zero()),
    };
    let customer = Customer {
        id: user.id,
        user_type_id: user.user_type_id,
    };

    let cart = match Cart::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?
    {
        Some(cart) => cart,
        None => return Ok(PriceBreakdown::zero()),
    };

    let lines = load_cart_lines(conn, cart.id).await?;
    if lines.is_empty() {
        return Ok(PriceBreakdown::zero());
    }

    let vouchers = load_active_vouchers(conn).await?;
    let rate = shipping_config_service::active_rate(conn).await?;

    Ok(price_cart(Some(&customer), &lines, &vouchers, &rate, now))
}

async fn load_cart_lines<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> Result<Vec<CartLine>, ServiceError> {
    let rows = CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .order_by_asc(cart_item::Column::CreatedAt)
        .find_also_related(Product)
        .all(conn)
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(item, product)| {
            product.map(|product| CartLine {
                product_id: product.id,
                unit_price: product.price,
                quantity: item.quantity,
            })
        })
        .collect())
}

/// Active vouchers with their product links, in a stable evaluation order.
pub async fn load_active_vouchers<C: ConnectionTrait>(
    conn: &C,
) -> Result<Vec<VoucherRule>, ServiceError> {
    let vouchers = Voucher::find()
        .filter(voucher::Column::IsActive.eq(true))
        .order_by_asc(voucher::Column::CreatedAt)
        .order_by_asc(voucher::Column::Code)
        .all(conn)
        .await?;

    if vouchers.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = vouchers.iter().map(|v| v.id).collect();
    let mut links: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
    for link in VoucherProduct::find()
        .filter(voucher_product::Column::VoucherId.is_in(ids))
        .all(conn)
        .await?
    {
        links
            .entry(link.voucher_id)
            .or_default()
            .insert(link.product_id);
    }

    Ok(vouchers
        .into_iter()
        .map(|model| {
            let products = links.remove(&model.id).unwrap_or_default();
            VoucherRule::from_model(model, products)
        })
        .collect())
}
