//! Ledger primitives.
//!
//! Students carry *unallocated* counters, enrollments (`student_groups`)
//! carry *allocated* ones. Every change to any of them is recorded as one
//! immutable [`LedgerEntry`](crate::LedgerEntry) written in the same database
//! transaction as the change itself:
//!
//! - [`BalanceTarget`] names the pool (student or enrollment),
//! - [`BalanceField`] names the counter,
//! - [`LedgerReason`] says why; a change without a reason is rejected.
//!
//! The only write path is `Engine::mutate_balance`, which performs the update
//! and then calls [`apply_ledger_change`] with the before/after snapshot.

use chrono::Utc;
use sea_orm::{ActiveValue, DatabaseTransaction, prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, LedgerEntry, ResultEngine, history, util::db_enum};

db_enum! {
    /// A balance counter.
    pub enum BalanceField ("balance field") {
        /// Lessons still available.
        LessonsBalance => "LESSONS_BALANCE",
        /// Money received, in minor units.
        TotalPayments => "TOTAL_PAYMENTS",
        /// Lessons ever granted.
        TotalLessons => "TOTAL_LESSONS",
    }
}

impl BalanceField {
    pub const ALL: [BalanceField; 3] = [
        BalanceField::LessonsBalance,
        BalanceField::TotalLessons,
        BalanceField::TotalPayments,
    ];
}

/// The three counters of one pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    pub lessons_balance: i64,
    pub total_lessons: i64,
    pub total_payments: i64,
}

impl Balances {
    pub fn get(&self, field: BalanceField) -> i64 {
        match field {
            BalanceField::LessonsBalance => self.lessons_balance,
            BalanceField::TotalLessons => self.total_lessons,
            BalanceField::TotalPayments => self.total_payments,
        }
    }

    pub(crate) fn get_mut(&mut self, field: BalanceField) -> &mut i64 {
        match field {
            BalanceField::LessonsBalance => &mut self.lessons_balance,
            BalanceField::TotalLessons => &mut self.total_lessons,
            BalanceField::TotalPayments => &mut self.total_payments,
        }
    }
}

db_enum! {
    /// Why a balance changed.
    ///
    /// Closed set: new situations get new names, existing names are never
    /// repurposed.
    pub enum LedgerReason ("ledger reason") {
        PaymentCreated => "PAYMENT_CREATED",
        PaymentCancelled => "PAYMENT_CANCELLED",
        AttendancePresentCharged => "ATTENDANCE_PRESENT_CHARGED",
        AttendanceAbsentCharged => "ATTENDANCE_ABSENT_CHARGED",
        MakeupAttendedCharged => "MAKEUP_ATTENDED_CHARGED",
        AttendanceReverted => "ATTENDANCE_REVERTED",
        MakeupGranted => "MAKEUP_GRANTED",
        MakeupRevoked => "MAKEUP_REVOKED",
        ManualSet => "MANUAL_SET",
        BalanceRedistributed => "BALANCE_REDISTRIBUTED",
    }
}

impl LedgerReason {
    /// Whether a decrement with this reason may leave the balance negative.
    ///
    /// Consumption (attendance, cancelled payments, manual corrections) can
    /// put a student in debt. Moving balance between pools never may.
    pub fn allows_overdraft(self) -> bool {
        !matches!(self, Self::BalanceRedistributed)
    }
}

/// The pool a balance change applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum BalanceTarget {
    /// The student's unallocated balance.
    Student { student_id: Uuid },
    /// The balance allocated to one enrollment.
    Enrollment { student_id: Uuid, group_id: Uuid },
}

impl BalanceTarget {
    /// Enrollment when `group_id` is given, otherwise the unallocated pool.
    pub fn for_student(student_id: Uuid, group_id: Option<Uuid>) -> Self {
        match group_id {
            Some(group_id) => Self::Enrollment {
                student_id,
                group_id,
            },
            None => Self::Student { student_id },
        }
    }

    pub fn student_id(&self) -> Uuid {
        match *self {
            Self::Student { student_id } | Self::Enrollment { student_id, .. } => student_id,
        }
    }

    pub fn group_id(&self) -> Option<Uuid> {
        match *self {
            Self::Student { .. } => None,
            Self::Enrollment { group_id, .. } => Some(group_id),
        }
    }
}

/// A requested balance change.
///
/// Built by the operation that needs it and handed to
/// `Engine::mutate_balance`, which rejects it when no reason was given.
#[derive(Clone, Debug, PartialEq)]
pub struct BalanceChange {
    pub target: BalanceTarget,
    pub field: BalanceField,
    pub delta: i64,
    pub reason: Option<LedgerReason>,
    pub comment: Option<String>,
    pub metadata: Option<Json>,
}

impl BalanceChange {
    #[must_use]
    pub fn new(target: BalanceTarget, field: BalanceField, delta: i64) -> Self {
        Self {
            target,
            field,
            delta,
            reason: None,
            comment: None,
            metadata: None,
        }
    }

    #[must_use]
    pub fn reason(mut self, reason: LedgerReason) -> Self {
        self.reason = Some(reason);
        self
    }

    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: Json) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A fully resolved ledger row, ready to be appended.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerChange {
    pub organization_id: String,
    pub target: BalanceTarget,
    pub field: BalanceField,
    pub reason: LedgerReason,
    pub delta: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub actor_id: Option<String>,
    pub comment: Option<String>,
    pub metadata: Option<Json>,
}

impl LedgerChange {
    fn validate(&self) -> ResultEngine<()> {
        if self.balance_before.checked_add(self.delta) != Some(self.balance_after) {
            return Err(EngineError::Consistency(format!(
                "{} {}: before {} + delta {} != after {}",
                self.field, self.reason, self.balance_before, self.delta, self.balance_after
            )));
        }
        Ok(())
    }
}

/// Appends one history row for a balance mutation that already happened in
/// `db_tx`.
///
/// Taking a `DatabaseTransaction` (not a plain connection) keeps the row and
/// the mutation in one atomic unit: if the transaction rolls back, both go.
pub(crate) async fn apply_ledger_change(
    db_tx: &DatabaseTransaction,
    change: LedgerChange,
) -> ResultEngine<LedgerEntry> {
    change.validate()?;

    let model = history::ActiveModel {
        id: ActiveValue::NotSet,
        organization_id: ActiveValue::Set(change.organization_id),
        student_id: ActiveValue::Set(change.target.student_id().to_string()),
        group_id: ActiveValue::Set(change.target.group_id().map(|id| id.to_string())),
        field: ActiveValue::Set(change.field.as_str().to_string()),
        reason: ActiveValue::Set(change.reason.as_str().to_string()),
        delta: ActiveValue::Set(change.delta),
        balance_before: ActiveValue::Set(change.balance_before),
        balance_after: ActiveValue::Set(change.balance_after),
        actor_id: ActiveValue::Set(change.actor_id),
        comment: ActiveValue::Set(change.comment),
        metadata: ActiveValue::Set(change.metadata),
        created_at: ActiveValue::Set(Utc::now()),
    }
    .insert(db_tx)
    .await?;

    LedgerEntry::try_from(model)
}
