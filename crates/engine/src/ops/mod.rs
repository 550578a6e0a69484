use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use sea_orm::{DatabaseConnection, DatabaseTransaction, QueryFilter, prelude::*};
use uuid::Uuid;

use crate::{
    Ctx, EngineError, EnrollmentStatus, ResultEngine, attendances, business_date, groups, lessons,
    student_groups, students,
};

mod attendance;
mod ledger;
mod calendar;
mod payments;
mod redistribution;
mod roster;

pub use ledger::{Discrepancy, DiscrepancyKind};
pub use redistribution::Redistribution;

/// Run a block inside a DB transaction, committing on success and rolling back on error.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.database.begin().await?;
        let result = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

pub(crate) use with_tx;

#[derive(Debug)]
pub struct Engine {
    database: DatabaseConnection,
    timezone: Tz,
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// The business timezone used to decide what "today" is.
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn today(&self) -> NaiveDate {
        business_date(Utc::now(), self.timezone)
    }

    async fn require_student(
        &self,
        db_tx: &DatabaseTransaction,
        ctx: &Ctx,
        student_id: Uuid,
    ) -> ResultEngine<students::Model> {
        students::Entity::find_by_id(student_id.to_string())
            .filter(students::Column::OrganizationId.eq(ctx.organization_id.as_str()))
            .one(db_tx)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("student not exists".to_string()))
    }

    async fn require_group(
        &self,
        db_tx: &DatabaseTransaction,
        ctx: &Ctx,
        group_id: Uuid,
    ) -> ResultEngine<groups::Model> {
        groups::Entity::find_by_id(group_id.to_string())
            .filter(groups::Column::OrganizationId.eq(ctx.organization_id.as_str()))
            .one(db_tx)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("group not exists".to_string()))
    }

    async fn require_lesson(
        &self,
        db_tx: &DatabaseTransaction,
        ctx: &Ctx,
        lesson_id: Uuid,
    ) -> ResultEngine<lessons::Model> {
        lessons::Entity::find_by_id(lesson_id.to_string())
            .filter(lessons::Column::OrganizationId.eq(ctx.organization_id.as_str()))
            .one(db_tx)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("lesson not exists".to_string()))
    }

    async fn require_attendance(
        &self,
        db_tx: &DatabaseTransaction,
        ctx: &Ctx,
        attendance_id: Uuid,
    ) -> ResultEngine<attendances::Model> {
        attendances::Entity::find_by_id(attendance_id.to_string())
            .filter(attendances::Column::OrganizationId.eq(ctx.organization_id.as_str()))
            .one(db_tx)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("attendance not exists".to_string()))
    }

    async fn find_enrollment(
        &self,
        db_tx: &DatabaseTransaction,
        ctx: &Ctx,
        student_id: Uuid,
        group_id: Uuid,
    ) -> ResultEngine<Option<student_groups::Model>> {
        let model = student_groups::Entity::find_by_id((student_id.to_string(), group_id.to_string()))
            .filter(student_groups::Column::OrganizationId.eq(ctx.organization_id.as_str()))
            .one(db_tx)
            .await?;
        Ok(model)
    }

    /// An enrollment that can still receive money: present and not
    /// dismissed. Both failures are validation errors.
    async fn require_open_enrollment(
        &self,
        db_tx: &DatabaseTransaction,
        ctx: &Ctx,
        student_id: Uuid,
        group_id: Uuid,
    ) -> ResultEngine<student_groups::Model> {
        let model = self
            .find_enrollment(db_tx, ctx, student_id, group_id)
            .await?
            .ok_or_else(|| {
                EngineError::Validation(format!("student is not enrolled in group {group_id}"))
            })?;
        if model.status == EnrollmentStatus::Dismissed.as_str() {
            return Err(EngineError::Validation(format!(
                "student was dismissed from group {group_id}"
            )));
        }
        Ok(model)
    }

    async fn require_enrollment(
        &self,
        db_tx: &DatabaseTransaction,
        ctx: &Ctx,
        student_id: Uuid,
        group_id: Uuid,
    ) -> ResultEngine<student_groups::Model> {
        self.find_enrollment(db_tx, ctx, student_id, group_id)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("enrollment not exists".to_string()))
    }
}

/// The builder for `Engine`
#[derive(Default)]
pub struct EngineBuilder {
    database: DatabaseConnection,
    timezone: Option<Tz>,
}

impl EngineBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> EngineBuilder {
        self.database = db;
        self
    }

    /// Business timezone; UTC when not set.
    pub fn timezone(mut self, timezone: Tz) -> EngineBuilder {
        self.timezone = Some(timezone);
        self
    }

    /// Construct `Engine`
    pub async fn build(self) -> ResultEngine<Engine> {
        Ok(Engine {
            database: self.database,
            timezone: self.timezone.unwrap_or(chrono_tz::UTC),
        })
    }
}
