//! The module contains `Student` and its storage model.

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Balances, EngineError, util::parse_uuid};

/// A learner.
///
/// `balances` is the *unallocated* pool: lessons and money not yet assigned
/// to any enrollment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub organization_id: String,
    pub name: String,
    pub login: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub balances: Balances,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "students")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub login: Option<String>,
    pub birth_date: Option<Date>,
    pub lessons_balance: i64,
    pub total_lessons: i64,
    pub total_payments: i64,
    pub created_at: DateTimeUtc,
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
    #[sea_orm(has_many = "super::student_groups::Entity")]
    StudentGroups,
    #[sea_orm(has_many = "super::attendances::Entity")]
    Attendances,
}

impl Related<super::student_groups::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StudentGroups.def()
    }
}

impl Related<super::attendances::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Attendances.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Student {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "student")?,
            balances: model.balances(),
            organization_id: model.organization_id,
            name: model.name,
            login: model.login,
            birth_date: model.birth_date,
            created_at: model.created_at,
        })
    }
}
