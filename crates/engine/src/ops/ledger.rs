use std::collections::BTreeMap;

use sea_orm::{
    DatabaseTransaction, QueryFilter, QueryOrder, TransactionTrait, prelude::*, sea_query::Expr,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    BalanceChange, BalanceField, BalanceTarget, Balances, Ctx, EngineError, GroupScope,
    HistoryFilter, LedgerEntry, LedgerReason, ResultEngine, history,
    ledger::{LedgerChange, apply_ledger_change},
    student_groups, students,
};

use super::{Engine, with_tx};

/// A place where the history does not explain the live balances.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Discrepancy {
    pub target: BalanceTarget,
    pub field: BalanceField,
    pub kind: DiscrepancyKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// `balance_after != balance_before + delta` on a stored row.
    Arithmetic { entry_id: i64 },
    /// A row does not start where the previous one ended.
    BrokenChain {
        entry_id: i64,
        expected_before: i64,
        balance_before: i64,
    },
    /// Replaying the history does not land on the live balance.
    LiveMismatch { replayed: i64, live: i64 },
}

fn student_column(field: BalanceField) -> students::Column {
    match field {
        BalanceField::LessonsBalance => students::Column::LessonsBalance,
        BalanceField::TotalLessons => students::Column::TotalLessons,
        BalanceField::TotalPayments => students::Column::TotalPayments,
    }
}

fn enrollment_column(field: BalanceField) -> student_groups::Column {
    match field {
        BalanceField::LessonsBalance => student_groups::Column::LessonsBalance,
        BalanceField::TotalLessons => student_groups::Column::TotalLessons,
        BalanceField::TotalPayments => student_groups::Column::TotalPayments,
    }
}

impl Engine {
    /// The single write path for balance columns.
    ///
    /// Applies `delta` with a relative update (the store serializes
    /// concurrent writers on the row), re-reads the row inside `db_tx` and
    /// appends the matching history row. `before` is derived from the
    /// re-read value, never from an earlier snapshot.
    ///
    /// - no reason: [`EngineError::MissingReason`], nothing written;
    /// - `delta == 0`: nothing written, `Ok(None)`;
    /// - a decrement leaving the balance negative under a reason that
    ///   forbids overdraft: [`EngineError::InsufficientBalance`].
    pub(crate) async fn mutate_balance(
        &self,
        db_tx: &DatabaseTransaction,
        ctx: &Ctx,
        change: BalanceChange,
    ) -> ResultEngine<Option<LedgerEntry>> {
        let reason = change.reason.ok_or(EngineError::MissingReason)?;
        if change.delta == 0 {
            return Ok(None);
        }

        let balances = match change.target {
            BalanceTarget::Student { student_id } => {
                let column = student_column(change.field);
                let result = students::Entity::update_many()
                    .col_expr(column, Expr::col(column).add(change.delta))
                    .filter(students::Column::Id.eq(student_id.to_string()))
                    .filter(students::Column::OrganizationId.eq(ctx.organization_id.as_str()))
                    .exec(db_tx)
                    .await?;
                if result.rows_affected == 0 {
                    return Err(EngineError::KeyNotFound("student not exists".to_string()));
                }
                self.require_student(db_tx, ctx, student_id)
                    .await?
                    .balances()
            }
            BalanceTarget::Enrollment {
                student_id,
                group_id,
            } => {
                let column = enrollment_column(change.field);
                let result = student_groups::Entity::update_many()
                    .col_expr(column, Expr::col(column).add(change.delta))
                    .filter(student_groups::Column::StudentId.eq(student_id.to_string()))
                    .filter(student_groups::Column::GroupId.eq(group_id.to_string()))
                    .filter(
                        student_groups::Column::OrganizationId.eq(ctx.organization_id.as_str()),
                    )
                    .exec(db_tx)
                    .await?;
                if result.rows_affected == 0 {
                    return Err(EngineError::KeyNotFound("enrollment not exists".to_string()));
                }
                self.require_enrollment(db_tx, ctx, student_id, group_id)
                    .await?
                    .balances()
            }
        };

        let balance_after = balances.get(change.field);
        let balance_before = balance_after.checked_sub(change.delta).ok_or_else(|| {
            EngineError::Consistency(format!("{} overflow", change.field))
        })?;

        if change.delta < 0 && balance_after < 0 && !reason.allows_overdraft() {
            tracing::warn!(
                pool = ?change.target,
                field = %change.field,
                reason = %reason,
                balance_before,
                delta = change.delta,
                "rejected overdraft"
            );
            return Err(EngineError::InsufficientBalance(format!(
                "{} is {balance_before}, cannot take {}",
                change.field, -change.delta
            )));
        }

        let entry = apply_ledger_change(
            db_tx,
            LedgerChange {
                organization_id: ctx.organization_id.clone(),
                target: change.target,
                field: change.field,
                reason,
                delta: change.delta,
                balance_before,
                balance_after,
                actor_id: ctx.actor_id.clone(),
                comment: change.comment,
                metadata: change.metadata,
            },
        )
        .await?;

        tracing::debug!(
            entry_id = entry.id,
            pool = ?entry.target,
            field = %entry.field,
            reason = %entry.reason,
            delta = entry.delta,
            balance_after = entry.balance_after,
            "balance mutated"
        );
        Ok(Some(entry))
    }

    async fn current_balances(
        &self,
        db_tx: &DatabaseTransaction,
        ctx: &Ctx,
        target: BalanceTarget,
    ) -> ResultEngine<Balances> {
        match target {
            BalanceTarget::Student { student_id } => Ok(self
                .require_student(db_tx, ctx, student_id)
                .await?
                .balances()),
            BalanceTarget::Enrollment {
                student_id,
                group_id,
            } => Ok(self
                .require_enrollment(db_tx, ctx, student_id, group_id)
                .await?
                .balances()),
        }
    }

    /// Apply one reasoned balance change in its own transaction.
    ///
    /// For collaborators that need a ledger movement no dedicated operation
    /// covers. Returns `None` when `delta` is zero.
    pub async fn change_balance(
        &self,
        ctx: &Ctx,
        change: BalanceChange,
    ) -> ResultEngine<Option<LedgerEntry>> {
        with_tx!(self, |db_tx| self.mutate_balance(&db_tx, ctx, change).await)
    }

    /// Set a balance field to `value`, recording the difference as
    /// `MANUAL_SET`.
    ///
    /// Returns `None` when the field already holds `value`.
    pub async fn set_balance(
        &self,
        ctx: &Ctx,
        target: BalanceTarget,
        field: BalanceField,
        value: i64,
        comment: Option<&str>,
    ) -> ResultEngine<Option<LedgerEntry>> {
        with_tx!(self, |db_tx| {
            let current = self.current_balances(&db_tx, ctx, target).await?.get(field);
            let delta = value.checked_sub(current).ok_or_else(|| {
                EngineError::Validation(format!("{field} value {value} out of range"))
            })?;

            let mut change = BalanceChange::new(target, field, delta).reason(LedgerReason::ManualSet);
            if let Some(comment) = comment {
                change = change.comment(comment);
            }
            self.mutate_balance(&db_tx, ctx, change).await
        })
    }

    /// Ledger rows of a student, in creation order.
    pub async fn get_ledger_history(
        &self,
        ctx: &Ctx,
        student_id: Uuid,
        filter: &HistoryFilter,
    ) -> ResultEngine<Vec<LedgerEntry>> {
        with_tx!(self, |db_tx| {
            self.require_student(&db_tx, ctx, student_id).await?;

            let mut query = history::Entity::find()
                .filter(history::Column::OrganizationId.eq(ctx.organization_id.as_str()))
                .filter(history::Column::StudentId.eq(student_id.to_string()));
            query = match filter.scope {
                GroupScope::Any => query,
                GroupScope::Unallocated => query.filter(history::Column::GroupId.is_null()),
                GroupScope::Group(group_id) => {
                    query.filter(history::Column::GroupId.eq(group_id.to_string()))
                }
            };
            if let Some(field) = filter.field {
                query = query.filter(history::Column::Field.eq(field.as_str()));
            }
            if let Some(reason) = filter.reason {
                query = query.filter(history::Column::Reason.eq(reason.as_str()));
            }

            let models = query
                .order_by_asc(history::Column::Id)
                .all(&db_tx)
                .await?;
            models
                .into_iter()
                .map(LedgerEntry::try_from)
                .collect::<ResultEngine<Vec<_>>>()
        })
    }

    /// Replace the comment of a ledger row. Nothing else on a row can change.
    pub async fn annotate_history(
        &self,
        ctx: &Ctx,
        entry_id: i64,
        comment: Option<&str>,
    ) -> ResultEngine<LedgerEntry> {
        let comment = comment
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(ToString::to_string);
        with_tx!(self, |db_tx| {
            let model = history::Entity::find_by_id(entry_id)
                .filter(history::Column::OrganizationId.eq(ctx.organization_id.as_str()))
                .one(&db_tx)
                .await?
                .ok_or_else(|| EngineError::KeyNotFound("history entry not exists".to_string()))?;

            let mut active: history::ActiveModel = model.into();
            active.comment = sea_orm::ActiveValue::Set(comment);
            let model = active.update(&db_tx).await?;
            LedgerEntry::try_from(model)
        })
    }

    /// Replays a student's history from zero and reports every place where it
    /// does not add up: bad row arithmetic, rows that do not chain, and pools
    /// whose replayed total differs from the live balance.
    ///
    /// An empty result means the ledger fully explains the balances.
    pub async fn verify_ledger(&self, ctx: &Ctx, student_id: Uuid) -> ResultEngine<Vec<Discrepancy>> {
        with_tx!(self, |db_tx| {
            let student = self.require_student(&db_tx, ctx, student_id).await?;
            let enrollments = student_groups::Entity::find()
                .filter(student_groups::Column::StudentId.eq(student_id.to_string()))
                .filter(student_groups::Column::OrganizationId.eq(ctx.organization_id.as_str()))
                .all(&db_tx)
                .await?;

            let mut live: BTreeMap<Option<Uuid>, Balances> = BTreeMap::new();
            live.insert(None, student.balances());
            for enrollment in &enrollments {
                let group_id = crate::util::parse_uuid(&enrollment.group_id, "group")?;
                live.insert(Some(group_id), enrollment.balances());
            }

            let rows = history::Entity::find()
                .filter(history::Column::OrganizationId.eq(ctx.organization_id.as_str()))
                .filter(history::Column::StudentId.eq(student_id.to_string()))
                .order_by_asc(history::Column::Id)
                .all(&db_tx)
                .await?;

            let mut discrepancies = Vec::new();
            let mut replayed: BTreeMap<Option<Uuid>, Balances> = BTreeMap::new();
            for row in rows {
                let entry = LedgerEntry::try_from(row)?;
                let pool = entry.target.group_id();
                let running = replayed.entry(pool).or_default().get_mut(entry.field);

                if entry.balance_before.checked_add(entry.delta) != Some(entry.balance_after) {
                    discrepancies.push(Discrepancy {
                        target: entry.target,
                        field: entry.field,
                        kind: DiscrepancyKind::Arithmetic { entry_id: entry.id },
                    });
                }
                if entry.balance_before != *running {
                    discrepancies.push(Discrepancy {
                        target: entry.target,
                        field: entry.field,
                        kind: DiscrepancyKind::BrokenChain {
                            entry_id: entry.id,
                            expected_before: *running,
                            balance_before: entry.balance_before,
                        },
                    });
                }
                *running = entry.balance_after;
            }

            for (pool, balances) in &live {
                let totals = replayed.get(pool).copied().unwrap_or_default();
                for field in BalanceField::ALL {
                    if totals.get(field) != balances.get(field) {
                        discrepancies.push(Discrepancy {
                            target: BalanceTarget::for_student(student_id, *pool),
                            field,
                            kind: DiscrepancyKind::LiveMismatch {
                                replayed: totals.get(field),
                                live: balances.get(field),
                            },
                        });
                    }
                }
            }

            if !discrepancies.is_empty() {
                tracing::warn!(
                    %student_id,
                    count = discrepancies.len(),
                    "ledger does not explain live balances"
                );
            }
            Ok(discrepancies)
        })
    }
}
