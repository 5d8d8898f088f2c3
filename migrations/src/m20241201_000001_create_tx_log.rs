use sea_orm_migration::prelude::*;
use txlog_services::{Dialect, provision};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Same DDL the server runs at startup, so either path leaves an
        // identical table behind.
        let dialect = Dialect::resolve(None, manager.get_database_backend())
            .map_err(|e| DbErr::Custom(e.to_string()))?;
        provision(manager.get_connection(), dialect)
            .await
            .map_err(|e| DbErr::Custom(e.to_string()))
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TxLog::Table).if_exists().to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TxLog {
    Table,
}
