use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ShippingConfigs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ShippingConfigs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ShippingConfigs::BaseFeeFirstItem)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ShippingConfigs::AdditionalFeePerItem)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ShippingConfigs::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(ShippingConfigs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ShippingConfigs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // At most one active row. Partial indexes are not expressible through the
        // index builder, so this goes through raw SQL (valid on Postgres and SQLite).
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS uq_shipping_configs_single_active \
                 ON shipping_configs (is_active) WHERE is_active = TRUE",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP INDEX IF EXISTS uq_shipping_configs_single_active")
            .await?;
        manager
            .drop_table(Table::drop().table(ShippingConfigs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ShippingConfigs {
    Table,
    Id,
    BaseFeeFirstItem,
    AdditionalFeePerItem,
    IsActive,
    CreatedAt,
    UpdatedAt,
}
