//! Attendance rows and the charge rules of the attendance state machine.
//!
//! An attendance is either *original* (the student's own lesson) or a
//! *makeup* (`missed_attendance_id` points at the absence it replaces). What a
//! status costs depends only on that distinction:
//!
//! | status        | original | makeup |
//! |---------------|----------|--------|
//! | `PRESENT`     | 1        | 1      |
//! | `ABSENT`      | 1        | 0      |
//! | `UNSPECIFIED` | 0        | 0      |
//!
//! The row remembers how many lessons are currently charged and to which
//! pool, so any transition reconciles against what was actually written
//! rather than against the previous status.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    BalanceTarget, EngineError, LedgerReason,
    util::{db_enum, parse_optional_uuid, parse_uuid},
};

db_enum! {
    pub enum AttendanceStatus ("attendance status") {
        Present => "PRESENT",
        Absent => "ABSENT",
        Unspecified => "UNSPECIFIED",
    }
}

db_enum! {
    /// Enrollment standing of the student when the attendance was taken.
    pub enum StudentStatus ("student status") {
        Active => "ACTIVE",
        Trial => "TRIAL",
    }
}

impl AttendanceStatus {
    /// Lessons consumed by an attendance in this status.
    pub fn lessons_charged(self, is_makeup: bool) -> i64 {
        match (self, is_makeup) {
            (Self::Present, _) => 1,
            (Self::Absent, false) => 1,
            (Self::Absent, true) | (Self::Unspecified, _) => 0,
        }
    }

    fn charge_reason(self, is_makeup: bool) -> Option<LedgerReason> {
        match (self, is_makeup) {
            (Self::Present, false) => Some(LedgerReason::AttendancePresentCharged),
            (Self::Absent, false) => Some(LedgerReason::AttendanceAbsentCharged),
            (Self::Present, true) => Some(LedgerReason::MakeupAttendedCharged),
            _ => None,
        }
    }
}

/// The ledger effect of moving an attendance to a new status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Reconciliation {
    /// Charge and already-charged agree.
    Unchanged,
    /// Consume `lessons` more from the pool resolved now.
    Charge { lessons: i64, reason: LedgerReason },
    /// Give `lessons` back to the pool that was charged.
    Refund { lessons: i64 },
}

pub(crate) fn reconcile(
    charged_lessons: i64,
    status: AttendanceStatus,
    is_makeup: bool,
) -> Reconciliation {
    let wanted = status.lessons_charged(is_makeup);
    match wanted.cmp(&charged_lessons) {
        std::cmp::Ordering::Equal => Reconciliation::Unchanged,
        std::cmp::Ordering::Greater => match status.charge_reason(is_makeup) {
            Some(reason) => Reconciliation::Charge {
                lessons: wanted - charged_lessons,
                reason,
            },
            None => Reconciliation::Unchanged,
        },
        std::cmp::Ordering::Less => Reconciliation::Refund {
            lessons: charged_lessons - wanted,
        },
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attendance {
    pub id: Uuid,
    pub organization_id: String,
    pub student_id: Uuid,
    pub lesson_id: Uuid,
    pub status: AttendanceStatus,
    pub student_status: StudentStatus,
    pub comment: Option<String>,
    /// Set on a makeup: the absence it replaces.
    pub missed_attendance_id: Option<Uuid>,
    pub charged_lessons: i64,
    /// Pool of the current charge; `None` is the unallocated balance.
    pub charged_group_id: Option<Uuid>,
    /// A `MAKEUP_GRANTED` credit for this absence is outstanding.
    pub makeup_credited: bool,
    pub makeup_credit_group_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Attendance {
    pub fn is_makeup(&self) -> bool {
        self.missed_attendance_id.is_some()
    }

    /// Whether deleting this row would orphan ledger rows.
    pub fn has_ledger_effect(&self) -> bool {
        self.charged_lessons != 0 || self.makeup_credited
    }

    pub(crate) fn charged_target(&self) -> BalanceTarget {
        BalanceTarget::for_student(self.student_id, self.charged_group_id)
    }

    pub(crate) fn credit_target(&self) -> BalanceTarget {
        BalanceTarget::for_student(self.student_id, self.makeup_credit_group_id)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "attendances")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub organization_id: String,
    pub student_id: String,
    pub lesson_id: String,
    pub status: String,
    pub student_status: String,
    pub comment: Option<String>,
    #[sea_orm(unique)]
    pub missed_attendance_id: Option<String>,
    pub charged_lessons: i64,
    pub charged_group_id: Option<String>,
    pub makeup_credited: bool,
    pub makeup_credit_group_id: Option<String>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::students::Entity",
        from = "Column::StudentId",
        to = "super::students::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Students,
    #[sea_orm(
        belongs_to = "super::lessons::Entity",
        from = "Column::LessonId",
        to = "super::lessons::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Lessons,
}

impl Related<super::students::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Students.def()
    }
}

impl Related<super::lessons::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lessons.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Attendance {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "attendance")?,
            student_id: parse_uuid(&model.student_id, "student")?,
            lesson_id: parse_uuid(&model.lesson_id, "lesson")?,
            status: AttendanceStatus::try_from(model.status.as_str())?,
            student_status: StudentStatus::try_from(model.student_status.as_str())?,
            missed_attendance_id: parse_optional_uuid(
                model.missed_attendance_id.as_deref(),
                "attendance",
            )?,
            charged_group_id: parse_optional_uuid(model.charged_group_id.as_deref(), "group")?,
            makeup_credit_group_id: parse_optional_uuid(
                model.makeup_credit_group_id.as_deref(),
                "group",
            )?,
            organization_id: model.organization_id,
            comment: model.comment,
            charged_lessons: model.charged_lessons,
            makeup_credited: model.makeup_credited,
            created_at: model.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AttendanceStatus::*;

    /// Applies a status sequence the way the engine does and returns the
    /// signed lesson deltas written to the ledger.
    fn replay(is_makeup: bool, statuses: &[AttendanceStatus]) -> Vec<i64> {
        let mut charged = 0;
        let mut deltas = Vec::new();
        for status in statuses {
            match reconcile(charged, *status, is_makeup) {
                Reconciliation::Unchanged => {}
                Reconciliation::Charge { lessons, .. } => {
                    charged += lessons;
                    deltas.push(-lessons);
                }
                Reconciliation::Refund { lessons } => {
                    charged -= lessons;
                    deltas.push(lessons);
                }
            }
        }
        deltas
    }

    #[test]
    fn original_attendance_charges_present_and_absent() {
        assert_eq!(
            reconcile(0, Present, false),
            Reconciliation::Charge {
                lessons: 1,
                reason: LedgerReason::AttendancePresentCharged
            }
        );
        assert_eq!(
            reconcile(0, Absent, false),
            Reconciliation::Charge {
                lessons: 1,
                reason: LedgerReason::AttendanceAbsentCharged
            }
        );
        assert_eq!(reconcile(0, Unspecified, false), Reconciliation::Unchanged);
    }

    #[test]
    fn switching_present_absent_is_free() {
        assert_eq!(reconcile(1, Absent, false), Reconciliation::Unchanged);
        assert_eq!(reconcile(1, Present, false), Reconciliation::Unchanged);
    }

    #[test]
    fn makeup_charges_only_when_attended() {
        assert_eq!(
            reconcile(0, Present, true),
            Reconciliation::Charge {
                lessons: 1,
                reason: LedgerReason::MakeupAttendedCharged
            }
        );
        assert_eq!(reconcile(0, Absent, true), Reconciliation::Unchanged);
        assert_eq!(reconcile(1, Absent, true), Reconciliation::Refund { lessons: 1 });
    }

    #[test]
    fn any_sequence_nets_to_its_terminal_status() {
        let deltas = replay(false, &[Present, Absent, Unspecified]);
        assert_eq!(deltas, vec![-1, 1]);
        assert_eq!(deltas.iter().sum::<i64>(), 0);

        let deltas = replay(false, &[Absent, Unspecified, Present, Present]);
        assert_eq!(deltas.iter().sum::<i64>(), -1);

        let deltas = replay(true, &[Present, Absent, Present, Unspecified]);
        assert_eq!(deltas, vec![-1, 1, -1, 1]);
    }
}
