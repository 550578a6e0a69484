//! Payments: money received for a number of lessons.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    BalanceTarget, EngineError,
    util::{parse_optional_uuid, parse_uuid},
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub organization_id: String,
    pub student_id: Uuid,
    /// `None` when the payment went to the unallocated balance.
    pub group_id: Option<Uuid>,
    pub lesson_count: i64,
    /// Minor units.
    pub price: i64,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub cancelled_by: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    pub fn target(&self) -> BalanceTarget {
        BalanceTarget::for_student(self.student_id, self.group_id)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub organization_id: String,
    pub student_id: String,
    pub group_id: Option<String>,
    pub lesson_count: i64,
    pub price: i64,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTimeUtc,
    pub cancelled_by: Option<String>,
    pub cancelled_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::students::Entity",
        from = "Column::StudentId",
        to = "super::students::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Students,
}

impl Related<super::students::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Students.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Payment {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "payment")?,
            student_id: parse_uuid(&model.student_id, "student")?,
            group_id: parse_optional_uuid(model.group_id.as_deref(), "group")?,
            organization_id: model.organization_id,
            lesson_count: model.lesson_count,
            price: model.price,
            description: model.description,
            idempotency_key: model.idempotency_key,
            created_by: model.created_by,
            created_at: model.created_at,
            cancelled_by: model.cancelled_by,
            cancelled_at: model.cancelled_at,
        })
    }
}
