//! Groups: recurring class offerings with a weekly schedule.

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, ScheduleSlot, util::parse_uuid};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub organization_id: String,
    pub name: String,
    pub course: String,
    pub location: Option<String>,
    /// Weekly meetings, in the order they were defined.
    pub schedule: Vec<ScheduleSlot>,
    pub start_date: NaiveDate,
    pub lesson_count: u32,
    pub max_students: u32,
    pub created_at: DateTime<Utc>,
}

impl Group {
    /// The slot shown when only one meeting time is displayed.
    pub fn primary_slot(&self) -> Option<&ScheduleSlot> {
        self.schedule.first()
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "groups")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub organization_id: String,
    pub name: String,
    /// Accent/case-folded name, unique per organization.
    pub name_norm: String,
    pub course: String,
    pub location: Option<String>,
    pub schedule: Json,
    pub start_date: Date,
    pub lesson_count: i32,
    pub max_students: i32,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::lessons::Entity")]
    Lessons,
    #[sea_orm(has_many = "super::student_groups::Entity")]
    StudentGroups,
}

impl Related<super::lessons::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lessons.def()
    }
}

impl Related<super::student_groups::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StudentGroups.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Group {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let schedule: Vec<ScheduleSlot> = serde_json::from_value(model.schedule)
            .map_err(|err| EngineError::Validation(format!("invalid stored schedule: {err}")))?;

        Ok(Self {
            id: parse_uuid(&model.id, "group")?,
            organization_id: model.organization_id,
            name: model.name,
            course: model.course,
            location: model.location,
            schedule,
            start_date: model.start_date,
            lesson_count: u32::try_from(model.lesson_count).unwrap_or_default(),
            max_students: u32::try_from(model.max_students).unwrap_or_default(),
            created_at: model.created_at,
        })
    }
}
