use crate::{
    entities::commerce::{shipping_config, ShippingConfig},
    errors::{is_unique_violation, ServiceError},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::{Validate, ValidationError};

/// Fee schedule applied to a cart: the base fee covers the first unit and
/// every further unit across the whole cart adds the incremental fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShippingRate {
    pub base_fee_first_item: Decimal,
    pub additional_fee_per_item: Decimal,
}

impl ShippingRate {
    pub fn zero() -> Self {
        Self {
            base_fee_first_item: Decimal::ZERO,
            additional_fee_per_item: Decimal::ZERO,
        }
    }

    pub fn fee_for(&self, total_qty: i64) -> Decimal {
        if total_qty <= 0 {
            return Decimal::ZERO;
        }
        self.base_fee_first_item + self.additional_fee_per_item * Decimal::from(total_qty - 1)
    }
}

impl From<&shipping_config::Model> for ShippingRate {
    fn from(model: &shipping_config::Model) -> Self {
        Self {
            base_fee_first_item: model.base_fee_first_item,
            additional_fee_per_item: model.additional_fee_per_item,
        }
    }
}

/// Rate of the active configuration, or zero fees when none is active.
pub async fn active_rate<C: ConnectionTrait>(conn: &C) -> Result<ShippingRate, ServiceError> {
    Ok(find_active(conn)
        .await?
        .as_ref()
        .map(ShippingRate::from)
        .unwrap_or_else(ShippingRate::zero))
}

async fn find_active<C: ConnectionTrait>(
    conn: &C,
) -> Result<Option<shipping_config::Model>, ServiceError> {
    Ok(ShippingConfig::find()
        .filter(shipping_config::Column::IsActive.eq(true))
        .one(conn)
        .await?)
}

#[derive(Debug, Clone, Serialize)]
pub struct ShippingConfigView {
    /// `None` when no configuration has been stored yet
    pub id: Option<i32>,
    pub base_fee_first_item: Decimal,
    pub additional_fee_per_item: Decimal,
    pub is_active: bool,
}

impl From<shipping_config::Model> for ShippingConfigView {
    fn from(model: shipping_config::Model) -> Self {
        Self {
            id: Some(model.id),
            base_fee_first_item: model.base_fee_first_item,
            additional_fee_per_item: model.additional_fee_per_item,
            is_active: model.is_active,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateShippingConfigRequest {
    #[validate(custom = "validate_non_negative")]
    pub base_fee_first_item: Decimal,
    #[validate(custom = "validate_non_negative")]
    pub additional_fee_per_item: Decimal,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        let mut err = ValidationError::new("non_negative");
        err.message = Some("Fees must be zero or greater".into());
        return Err(err);
    }
    Ok(())
}

/// Owns the single active shipping configuration
#[derive(Clone)]
pub struct ShippingConfigService {
    db: Arc<DatabaseConnection>,
}

impl ShippingConfigService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Returns the active configuration, or an unsaved zero-fee default.
    #[instrument(skip(self))]
    pub async fn active(&self) -> Result<ShippingConfigView, ServiceError> {
        Ok(match find_active(&*self.db).await? {
            Some(model) => model.into(),
            None => ShippingConfigView {
                id: None,
                base_fee_first_item: Decimal::ZERO,
                additional_fee_per_item: Decimal::ZERO,
                is_active: true,
            },
        })
    }

    /// Retires the current active row and stores a new one in one transaction.
    ///
    /// With `is_active = false` the new row is stored for the record and
    /// shipping falls back to zero fees.
    #[instrument(skip(self))]
    pub async fn replace_active(
        &self,
        request: UpdateShippingConfigRequest,
    ) -> Result<ShippingConfigView, ServiceError> {
        request.validate()?;

        let txn = self.db.begin().await?;
        let now = Utc::now();

        ShippingConfig::update_many()
            .col_expr(shipping_config::Column::IsActive, Expr::value(false))
            .col_expr(shipping_config::Column::UpdatedAt, Expr::value(now))
            .filter(shipping_config::Column::IsActive.eq(true))
            .exec(&txn)
            .await?;

        let inserted = shipping_config::ActiveModel {
            base_fee_first_item: Set(request.base_fee_first_item),
            additional_fee_per_item: Set(request.additional_fee_per_item),
            is_active: Set(request.is_active),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                warn!("Concurrent shipping config update rejected");
                ServiceError::Conflict("Shipping configuration was updated concurrently".into())
            } else {
                ServiceError::DatabaseError(e)
            }
        })?;

        txn.commit().await?;

        info!(
            id = inserted.id,
            base = %inserted.base_fee_first_item,
            additional = %inserted.additional_fee_per_item,
            active = inserted.is_active,
            "Shipping configuration replaced"
        );
        Ok(inserted.into())
    }
}
