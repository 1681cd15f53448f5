use sea_orm_migration::prelude::*;

use super::m20250301_000001_create_catalog_tables::Users;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Orders::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Orders::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(Orders::PaymentStatus)
                            .string_len(20)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Orders::SubtotalAmount)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Orders::DiscountAmount)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Orders::ShippingAmount)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Orders::TotalAmount)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Orders::Currency)
                            .string_len(3)
                            .not_null()
                            .default("USD"),
                    )
                    .col(ColumnDef::new(Orders::PaymentMethod).string_len(50).null())
                    .col(ColumnDef::new(Orders::PaymentIntentId).string_len(255).null())
                    .col(ColumnDef::new(Orders::ShippingAddress).json().null())
                    .col(ColumnDef::new(Orders::BillingAddress).json().null())
                    .col(ColumnDef::new(Orders::Remark).text().null())
                    .col(
                        ColumnDef::new(Orders::AppliedVoucherCode)
                            .string_len(64)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Orders::PaidAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Orders::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Orders::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_orders_user_id")
                            .from(Orders::Table, Orders::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OrderItems::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(OrderItems::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                    .col(ColumnDef::new(OrderItems::ProductId).uuid().null())
                    .col(
                        ColumnDef::new(OrderItems::Position)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                    .col(
                        ColumnDef::new(OrderItems::UnitPrice)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(ColumnDef::new(OrderItems::SnapshotName).string_len(255).null())
                    .col(
                        ColumnDef::new(OrderItems::SnapshotPrice)
                            .decimal_len(16, 4)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OrderItems::SnapshotMediaUrl)
                            .string_len(1024)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OrderItems::LineSubtotal)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(OrderItems::DiscountAmount)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(OrderItems::LineTotal)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(OrderItems::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_order_items_order_id")
                            .from(OrderItems::Table, OrderItems::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_orders_user_created")
                    .table(Orders::Table)
                    .col(Orders::UserId)
                    .col((Orders::CreatedAt, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_order_items_order_id")
                    .table(OrderItems::Table)
                    .col(OrderItems::OrderId)
                    .to_owned(),
            )
            .await?;

        // One pending order per user; repeat checkouts reuse it.
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS uq_orders_one_pending_per_user \
                 ON orders (user_id) WHERE payment_status = 'pending'",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP INDEX IF EXISTS uq_orders_one_pending_per_user")
            .await?;
        manager
            .drop_table(Table::drop().table(OrderItems::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Orders::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Orders {
    Table,
    Id,
    UserId,
    PaymentStatus,
    SubtotalAmount,
    DiscountAmount,
    ShippingAmount,
    TotalAmount,
    Currency,
    PaymentMethod,
    PaymentIntentId,
    ShippingAddress,
    BillingAddress,
    Remark,
    AppliedVoucherCode,
    PaidAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum OrderItems {
    Table,
    Id,
    OrderId,
    ProductId,
    Position,
    Quantity,
    UnitPrice,
    SnapshotName,
    SnapshotPrice,
    SnapshotMediaUrl,
    LineSubtotal,
    DiscountAmount,
    LineTotal,
    CreatedAt,
}
