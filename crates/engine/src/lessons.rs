//! Lessons: concrete occurrences of a group meeting.

use chrono::{NaiveDate, NaiveTime};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    EngineError, ScheduledLesson,
    schedule::parse_time,
    util::{db_enum, parse_uuid},
};

db_enum! {
    pub enum LessonStatus ("lesson status") {
        Active => "ACTIVE",
        Cancelled => "CANCELLED",
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: Uuid,
    pub organization_id: String,
    pub group_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: LessonStatus,
}

impl Lesson {
    pub fn is_active(&self) -> bool {
        self.status == LessonStatus::Active
    }

    pub fn slot(&self) -> ScheduledLesson {
        ScheduledLesson {
            date: self.date,
            time: self.time,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "lessons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub organization_id: String,
    pub group_id: String,
    pub date: Date,
    /// `HH:MM`, so lexical order is chronological within a day.
    pub time: String,
    pub status: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::groups::Entity",
        from = "Column::GroupId",
        to = "super::groups::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Groups,
    #[sea_orm(has_many = "super::attendances::Entity")]
    Attendances,
}

impl Related<super::groups::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Groups.def()
    }
}

impl Related<super::attendances::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Attendances.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Lesson {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "lesson")?,
            group_id: parse_uuid(&model.group_id, "group")?,
            time: parse_time(&model.time)?,
            status: LessonStatus::try_from(model.status.as_str())?,
            organization_id: model.organization_id,
            date: model.date,
        })
    }
}
