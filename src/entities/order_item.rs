use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order line with catalog snapshot fields.
///
/// `product_id` is kept for reference only; display data comes from the
/// `snapshot_*` columns so later catalog edits or deletions do not change
/// historical orders.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    #[sea_orm(nullable)]
    pub product_id: Option<Uuid>,
    /// Display order within the order, starting at 0
    pub position: i32,
    pub quantity: i32,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub unit_price: Decimal,
    #[sea_orm(nullable)]
    pub snapshot_name: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub snapshot_price: Option<Decimal>,
    #[sea_orm(nullable)]
    pub snapshot_media_url: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub line_subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub discount_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub line_total: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id",
        on_delete = "Cascade"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
