use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub payment_status: PaymentStatus,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub subtotal_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub discount_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub shipping_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub total_amount: Decimal,
    pub currency: String,
    #[sea_orm(nullable)]
    pub payment_method: Option<String>,
    /// Provider checkout session id of the most recent payment attempt.
    #[sea_orm(nullable)]
    pub payment_intent_id: Option<String>,
    #[sea_orm(column_type = "Json", nullable)]
    pub shipping_address: Option<Json>,
    #[sea_orm(column_type = "Json", nullable)]
    pub billing_address: Option<Json>,
    #[sea_orm(column_type = "Text", nullable)]
    pub remark: Option<String>,
    #[sea_orm(nullable)]
    pub applied_voucher_code: Option<String>,
    #[sea_orm(nullable)]
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Order payment state machine: `Pending` -> `Paid`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
}

impl Model {
    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }
}
