use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discount voucher.
///
/// `scope` decides which users may use the voucher; linked products (see
/// [`super::voucher_product`]) decide which cart lines count towards it.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "vouchers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub discount_type: DiscountType,
    /// Fixed currency amount, or a percentage (0-100) for percent vouchers.
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub amount: Decimal,
    pub scope: VoucherScope,
    #[sea_orm(nullable)]
    pub target_user_type_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub target_user_id: Option<Uuid>,
    pub min_quantity: i32,
    pub per_unit: bool,
    pub is_active: bool,
    #[sea_orm(nullable)]
    pub valid_from: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub valid_to: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::voucher_product::Entity")]
    ProductLinks,
}

impl Related<super::voucher_product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductLinks.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    #[sea_orm(string_value = "fixed")]
    Fixed,
    #[sea_orm(string_value = "percent")]
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum VoucherScope {
    #[sea_orm(string_value = "global")]
    Global,
    #[sea_orm(string_value = "user_type")]
    UserType,
    #[sea_orm(string_value = "user")]
    User,
    #[sea_orm(string_value = "product_list")]
    ProductList,
}
