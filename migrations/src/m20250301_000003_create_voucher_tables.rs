use sea_orm_migration::prelude::*;

use super::m20250301_000001_create_catalog_tables::{Products, UserTypes, Users};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Vouchers::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Vouchers::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(Vouchers::Code)
                            .string_len(64)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Vouchers::DiscountType)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Vouchers::Amount).decimal_len(16, 4).not_null())
                    .col(
                        ColumnDef::new(Vouchers::Scope)
                            .string_len(20)
                            .not_null()
                            .default("global"),
                    )
                    .col(ColumnDef::new(Vouchers::TargetUserTypeId).uuid().null())
                    .col(ColumnDef::new(Vouchers::TargetUserId).uuid().null())
                    .col(
                        ColumnDef::new(Vouchers::MinQuantity)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Vouchers::PerUnit)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Vouchers::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Vouchers::ValidFrom)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Vouchers::ValidTo)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Vouchers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_vouchers_target_user_type_id")
                            .from(Vouchers::Table, Vouchers::TargetUserTypeId)
                            .to(UserTypes::Table, UserTypes::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_vouchers_target_user_id")
                            .from(Vouchers::Table, Vouchers::TargetUserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(VoucherProducts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(VoucherProducts::VoucherId).uuid().not_null())
                    .col(ColumnDef::new(VoucherProducts::ProductId).uuid().not_null())
                    .primary_key(
                        Index::create()
                            .col(VoucherProducts::VoucherId)
                            .col(VoucherProducts::ProductId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_voucher_products_voucher_id")
                            .from(VoucherProducts::Table, VoucherProducts::VoucherId)
                            .to(Vouchers::Table, Vouchers::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_voucher_products_product_id")
                            .from(VoucherProducts::Table, VoucherProducts::ProductId)
                            .to(Products::Table, Products::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(VoucherProducts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Vouchers::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Vouchers {
    Table,
    Id,
    Code,
    DiscountType,
    Amount,
    Scope,
    TargetUserTypeId,
    TargetUserId,
    MinQuantity,
    PerUnit,
    IsActive,
    ValidFrom,
    ValidTo,
    CreatedAt,
}

#[derive(DeriveIden)]
enum VoucherProducts {
    Table,
    VoucherId,
    ProductId,
}
