use sea_orm::TransactionTrait;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    Allocation, BalanceChange, BalanceField, BalanceTarget, Balances, Ctx, EngineError,
    LedgerEntry, LedgerReason, ResultEngine,
};

use super::{Engine, with_tx};

/// Result of a `redistribute` call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Redistribution {
    /// Correlates every row of the call (`metadata.redistribution_id`).
    pub id: Uuid,
    pub entries: Vec<LedgerEntry>,
}

impl Allocation {
    fn amounts(&self) -> [(BalanceField, i64); 3] {
        [
            (BalanceField::LessonsBalance, self.lessons),
            (BalanceField::TotalLessons, self.total_lessons),
            (BalanceField::TotalPayments, self.total_payments),
        ]
    }
}

/// Per-field totals requested across all allocations.
fn requested_totals(allocations: &[Allocation]) -> ResultEngine<Balances> {
    let mut totals = Balances::default();
    for allocation in allocations {
        for (field, amount) in allocation.amounts() {
            if amount < 0 {
                return Err(EngineError::Validation(format!(
                    "{field} allocation must not be negative"
                )));
            }
            let total = totals.get_mut(field);
            *total = total.checked_add(amount).ok_or_else(|| {
                EngineError::Validation(format!("{field} allocation out of range"))
            })?;
        }
    }
    Ok(totals)
}

impl Engine {
    /// Move amounts from the student's unallocated balance into enrollments.
    ///
    /// Everything is validated before the first write: amounts are
    /// non-negative, every group is one the student is enrolled in (and not
    /// dismissed from), and per
    /// field the requested total does not exceed the unallocated amount.
    /// Each non-zero amount then produces two `BALANCE_REDISTRIBUTED` rows
    /// (student decrement, enrollment increment) sharing one
    /// `redistribution_id`. The whole call is one transaction.
    pub async fn redistribute(
        &self,
        ctx: &Ctx,
        student_id: Uuid,
        allocations: &[Allocation],
    ) -> ResultEngine<Redistribution> {
        if allocations.is_empty() {
            return Err(EngineError::Validation("no allocations given".to_string()));
        }
        let requested = requested_totals(allocations)?;

        with_tx!(self, |db_tx| {
            let student = self.require_student(&db_tx, ctx, student_id).await?;
            for allocation in allocations {
                self.require_open_enrollment(&db_tx, ctx, student_id, allocation.group_id)
                    .await?;
            }

            let available = student.balances();
            for field in BalanceField::ALL {
                if requested.get(field) > available.get(field) {
                    tracing::warn!(
                        %student_id,
                        %field,
                        requested = requested.get(field),
                        available = available.get(field),
                        "over-allocation rejected"
                    );
                    return Err(EngineError::Validation(format!(
                        "cannot allocate {} {field}: only {} unallocated",
                        requested.get(field),
                        available.get(field)
                    )));
                }
            }

            let id = Uuid::new_v4();
            let metadata = json!({ "redistribution_id": id });
            let mut entries = Vec::new();
            for allocation in allocations {
                let enrollment = BalanceTarget::Enrollment {
                    student_id,
                    group_id: allocation.group_id,
                };
                for (field, amount) in allocation.amounts() {
                    if amount == 0 {
                        continue;
                    }
                    let moves = [
                        (BalanceTarget::Student { student_id }, -amount),
                        (enrollment, amount),
                    ];
                    for (target, delta) in moves {
                        let entry = self
                            .mutate_balance(
                                &db_tx,
                                ctx,
                                BalanceChange::new(target, field, delta)
                                    .reason(LedgerReason::BalanceRedistributed)
                                    .metadata(metadata.clone()),
                            )
                            .await?;
                        entries.extend(entry);
                    }
                }
            }

            tracing::info!(
                %student_id,
                redistribution_id = %id,
                rows = entries.len(),
                "balance redistributed"
            );
            Ok(Redistribution { id, entries })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_sum_per_field() {
        let g1 = Uuid::new_v4();
        let g2 = Uuid::new_v4();
        let totals = requested_totals(&[
            Allocation::new(g1).lessons(4).total_payments(100),
            Allocation::new(g2).lessons(3),
        ])
        .unwrap();
        assert_eq!(
            totals,
            Balances {
                lessons_balance: 7,
                total_lessons: 0,
                total_payments: 100,
            }
        );
    }

    #[test]
    fn negative_amounts_are_rejected() {
        let err = requested_totals(&[Allocation::new(Uuid::new_v4()).total_lessons(-1)])
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Validation("TOTAL_LESSONS allocation must not be negative".to_string())
        );
    }
}
