//! Money tables:
//!
//! - `payments`: received payments, cancellable, optionally idempotent
//! - `financial_history`: append-only ledger of every balance mutation

use sea_orm::ConnectionTrait;
use sea_orm_migration::prelude::*;

use super::m20260301_000000_roster::{Groups, Students};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
enum Payments {
    Table,
    Id,
    OrganizationId,
    StudentId,
    GroupId,
    LessonCount,
    Price,
    Description,
    IdempotencyKey,
    CreatedBy,
    CreatedAt,
    CancelledBy,
    CancelledAt,
}

#[derive(Iden)]
enum FinancialHistory {
    Table,
    Id,
    OrganizationId,
    StudentId,
    GroupId,
    Field,
    Reason,
    Delta,
    BalanceBefore,
    BalanceAfter,
    ActorId,
    Comment,
    Metadata,
    CreatedAt,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Payments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Payments::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Payments::OrganizationId).string().not_null())
                    .col(ColumnDef::new(Payments::StudentId).string().not_null())
                    .col(ColumnDef::new(Payments::GroupId).string())
                    .col(ColumnDef::new(Payments::LessonCount).big_integer().not_null())
                    .col(ColumnDef::new(Payments::Price).big_integer().not_null())
                    .col(ColumnDef::new(Payments::Description).string())
                    .col(ColumnDef::new(Payments::IdempotencyKey).string())
                    .col(ColumnDef::new(Payments::CreatedBy).string())
                    .col(
                        ColumnDef::new(Payments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Payments::CancelledBy).string())
                    .col(ColumnDef::new(Payments::CancelledAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-payments-student_id")
                            .from(Payments::Table, Payments::StudentId)
                            .to(Students::Table, Students::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-payments-group_id")
                            .from(Payments::Table, Payments::GroupId)
                            .to(Groups::Table, Groups::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // System payments have no `created_by`; fold NULL into one key space
        // so their idempotency keys are unique too.
        manager
            .get_connection()
            .execute_unprepared(
                r#"CREATE UNIQUE INDEX "uidx-payments-organization_id-created_by-idempotency_key"
                   ON "payments" ("organization_id", COALESCE("created_by", ''), "idempotency_key")"#,
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(FinancialHistory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FinancialHistory::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(FinancialHistory::OrganizationId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(FinancialHistory::StudentId).string().not_null())
                    .col(ColumnDef::new(FinancialHistory::GroupId).string())
                    .col(ColumnDef::new(FinancialHistory::Field).string().not_null())
                    .col(ColumnDef::new(FinancialHistory::Reason).string().not_null())
                    .col(ColumnDef::new(FinancialHistory::Delta).big_integer().not_null())
                    .col(
                        ColumnDef::new(FinancialHistory::BalanceBefore)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FinancialHistory::BalanceAfter)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(FinancialHistory::ActorId).string())
                    .col(ColumnDef::new(FinancialHistory::Comment).string())
                    .col(ColumnDef::new(FinancialHistory::Metadata).json())
                    .col(
                        ColumnDef::new(FinancialHistory::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-financial_history-student_id")
                            .from(FinancialHistory::Table, FinancialHistory::StudentId)
                            .to(Students::Table, Students::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-financial_history-organization_id-student_id")
                    .table(FinancialHistory::Table)
                    .col(FinancialHistory::OrganizationId)
                    .col(FinancialHistory::StudentId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FinancialHistory::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Payments::Table).to_owned())
            .await?;
        Ok(())
    }
}
