//! Enrollments: the student × group join, with its own allocated balance.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Balances, EngineError, StudentStatus, util::db_enum, util::parse_uuid};

db_enum! {
    pub enum EnrollmentStatus ("enrollment status") {
        Active => "ACTIVE",
        Trial => "TRIAL",
        Dismissed => "DISMISSED",
    }
}

impl EnrollmentStatus {
    /// Standing recorded on attendances taken under this enrollment.
    pub fn student_status(self) -> StudentStatus {
        match self {
            Self::Trial => StudentStatus::Trial,
            Self::Active | Self::Dismissed => StudentStatus::Active,
        }
    }
}

/// A student's enrollment in a group.
///
/// Financially independent from the student's unallocated pool and from
/// other enrollments. Dismissed enrollments keep their balances.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub student_id: Uuid,
    pub group_id: Uuid,
    pub status: EnrollmentStatus,
    pub balances: Balances,
    pub joined_at: DateTime<Utc>,
}

impl Enrollment {
    pub fn is_dismissed(&self) -> bool {
        self.status == EnrollmentStatus::Dismissed
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "student_groups")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub student_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub group_id: String,
    pub organization_id: String,
    pub status: String,
    pub lessons_balance: i64,
    pub total_lessons: i64,
    pub total_payments: i64,
    pub joined_at: DateTimeUtc,
}

impl Model {
    pub(crate) fn balances(&self) -> Balances {
        Balances {
            lessons_balance: self.lessons_balance,
            total_lessons: self.total_lessons,
            total_payments: self.total_payments,
        }
    }
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
        belongs_to = "super::groups::Entity",
        from = "Column::GroupId",
        to = "super::groups::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Groups,
}

impl Related<super::students::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Students.def()
    }
}

impl Related<super::groups::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Groups.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Enrollment {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            student_id: parse_uuid(&model.student_id, "student")?,
            group_id: parse_uuid(&model.group_id, "group")?,
            status: EnrollmentStatus::try_from(model.status.as_str())?,
            balances: model.balances(),
            joined_at: model.joined_at,
        })
    }
}
