//! Financial history: the append-only audit trail of balance mutations.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    BalanceField, BalanceTarget, EngineError, LedgerReason,
    util::{parse_optional_uuid, parse_uuid},
};

/// One immutable ledger row.
///
/// `balance_after == balance_before + delta` always holds. Only `comment` can
/// change after the row is written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Monotonic: ordering by id is creation order.
    pub id: i64,
    pub organization_id: String,
    pub target: BalanceTarget,
    pub field: BalanceField,
    pub reason: LedgerReason,
    pub delta: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub actor_id: Option<String>,
    pub comment: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Which pools a history query covers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GroupScope {
    /// Unallocated and every enrollment.
    #[default]
    Any,
    /// Only the student's unallocated balance.
    Unallocated,
    /// Only the enrollment in this group.
    Group(Uuid),
}

/// Filters for listing ledger history.
#[derive(Clone, Debug, Default)]
pub struct HistoryFilter {
    pub scope: GroupScope,
    pub field: Option<BalanceField>,
    pub reason: Option<LedgerReason>,
}

impl HistoryFilter {
    #[must_use]
    pub fn group(mut self, group_id: Uuid) -> Self {
        self.scope = GroupScope::Group(group_id);
        self
    }

    #[must_use]
    pub fn unallocated(mut self) -> Self {
        self.scope = GroupScope::Unallocated;
        self
    }

    #[must_use]
    pub fn field(mut self, field: BalanceField) -> Self {
        self.field = Some(field);
        self
    }

    #[must_use]
    pub fn reason(mut self, reason: LedgerReason) -> Self {
        self.reason = Some(reason);
        self
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "financial_history")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub organization_id: String,
    pub student_id: String,
    pub group_id: Option<String>,
    pub field: String,
    pub reason: String,
    pub delta: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub actor_id: Option<String>,
    pub comment: Option<String>,
    pub metadata: Option<Json>,
    pub created_at: DateTimeUtc,
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

impl TryFrom<Model> for LedgerEntry {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let student_id = parse_uuid(&model.student_id, "student")?;
        let group_id = parse_optional_uuid(model.group_id.as_deref(), "group")?;

        Ok(Self {
            id: model.id,
            organization_id: model.organization_id,
            target: BalanceTarget::for_student(student_id, group_id),
            field: BalanceField::try_from(model.field.as_str())?,
            reason: LedgerReason::try_from(model.reason.as_str())?,
            delta: model.delta,
            balance_before: model.balance_before,
            balance_after: model.balance_after,
            actor_id: model.actor_id,
            comment: model.comment,
            metadata: model.metadata,
            created_at: model.created_at,
        })
    }
}
