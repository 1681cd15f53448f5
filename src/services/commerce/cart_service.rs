use crate::{
    entities::commerce::{cart, cart_item, Cart, CartItem, CartModel, Product},
    errors::{is_unique_violation, ServiceError},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Shopping cart service.
///
/// Carts are created lazily, one per user. Quantities are always positive:
/// adding an existing product increments its row and setting a quantity of
/// zero or less removes it.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 10000))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateCartItemRequest {
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartLineView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_subtotal: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<CartLineView>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Returns the user's cart, creating an empty one on first use.
    #[instrument(skip(self))]
    pub async fn get_or_create_cart(&self, user_id: Uuid) -> Result<CartModel, ServiceError> {
        if let Some(cart) = find_cart(&*self.db, user_id).await? {
            return Ok(cart);
        }

        let now = Utc::now();
        let created = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await;

        match created {
            Ok(cart) => {
                info!(cart_id = %cart.id, %user_id, "Created cart");
                Ok(cart)
            }
            // Lost a race with a concurrent request creating the same cart
            Err(e) if is_unique_violation(&e) => find_cart(&*self.db, user_id)
                .await?
                .ok_or(ServiceError::DatabaseError(e)),
            Err(e) => Err(e.into()),
        }
    }

    /// Cart with product details for display.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = self.get_or_create_cart(user_id).await?;
        let rows = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .find_also_related(Product)
            .all(&*self.db)
            .await?;

        let items = rows
            .into_iter()
            .filter_map(|(item, product)| {
                product.map(|product| CartLineView {
                    id: item.id,
                    product_id: product.id,
                    product_name: product.name,
                    unit_price: product.price,
                    quantity: item.quantity,
                    line_subtotal: product.price * Decimal::from(item.quantity),
                })
            })
            .collect();

        Ok(CartView {
            id: cart.id,
            user_id: cart.user_id,
            items,
        })
    }

    /// Adds a product, incrementing the quantity when it is already in the cart.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        request: AddToCartRequest,
    ) -> Result<cart_item::Model, ServiceError> {
        request.validate()?;

        let cart = self.get_or_create_cart(user_id).await?;
        let txn = self.db.begin().await?;

        Product::find_by_id(request.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", request.product_id))
            })?;

        let now = Utc::now();

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(request.product_id))
            .one(&txn)
            .await?;

        let item = match existing {
            Some(item) => {
                let quantity = item.quantity + request.quantity;
                let mut item: cart_item::ActiveModel = item.into();
                item.quantity = Set(quantity);
                item.updated_at = Set(now);
                item.update(&txn).await?
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(request.product_id),
                    quantity: Set(request.quantity),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?
            }
        };

        txn.commit().await?;

        info!(
            cart_id = %cart.id,
            product_id = %request.product_id,
            quantity = item.quantity,
            "Cart item added"
        );
        Ok(item)
    }

    /// Sets a line's quantity; zero or less removes the line.
    ///
    /// Returns `None` when the line was removed.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<Option<cart_item::Model>, ServiceError> {
        let item = self.find_owned_item(user_id, item_id).await?;

        if quantity <= 0 {
            item.delete(&*self.db).await?;
            info!(%item_id, "Cart item removed (quantity {})", quantity);
            return Ok(None);
        }

        let mut item: cart_item::ActiveModel = item.into();
        item.quantity = Set(quantity);
        item.updated_at = Set(Utc::now());
        let item = item.update(&*self.db).await?;
        Ok(Some(item))
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, item_id: Uuid) -> Result<(), ServiceError> {
        let item = self.find_owned_item(user_id, item_id).await?;
        item.delete(&*self.db).await?;
        info!(%item_id, "Cart item removed");
        Ok(())
    }

    /// Empties the user's cart. A missing cart is not an error.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        clear_cart(&*self.db, user_id).await
    }

    async fn find_owned_item(
        &self,
        user_id: Uuid,
        item_id: Uuid,
    ) -> Result<cart_item::Model, ServiceError> {
        let not_found = || ServiceError::NotFound(format!("Cart item {} not found", item_id));

        let (item, cart) = CartItem::find_by_id(item_id)
            .find_also_related(Cart)
            .one(&*self.db)
            .await?
            .ok_or_else(not_found)?;

        match cart {
            Some(cart) if cart.user_id == user_id => Ok(item),
            _ => Err(not_found()),
        }
    }
}

async fn find_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Option<CartModel>, ServiceError> {
    Ok(Cart::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?)
}

pub(crate) async fn clear_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<u64, ServiceError> {
    let cart = match find_cart(conn, user_id).await? {
        Some(cart) => cart,
        None => return Ok(0),
    };

    let result = CartItem::delete_many()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .exec(conn)
        .await?;

    info!(cart_id = %cart.id, removed = result.rows_affected, "Cart cleared");
    Ok(result.rows_affected)
}
