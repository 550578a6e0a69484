use chrono::Utc;
use sea_orm::{
    ActiveValue, DatabaseTransaction, PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait,
    prelude::*,
};
use uuid::Uuid;

use crate::{
    Ctx, Enrollment, EnrollmentStatus, EngineError, Group, LessonStatus, MAX_LESSON_COUNT,
    NewGroupCmd, NewStudentCmd, ResultEngine, Student, StudentStatus, generate_schedule, groups,
    lessons, student_groups, students,
    util::{normalize_key, normalize_optional_text, normalize_required_name, parse_uuid},
};

use super::{Engine, with_tx};

impl Engine {
    /// Add a new student with zero balances.
    pub async fn create_student(&self, ctx: &Ctx, cmd: NewStudentCmd) -> ResultEngine<Student> {
        let name = normalize_required_name(&cmd.name, "student")?;
        let login = normalize_optional_text(cmd.login.as_deref());
        with_tx!(self, |db_tx| {
            let model = students::ActiveModel {
                id: ActiveValue::Set(Uuid::new_v4().to_string()),
                organization_id: ActiveValue::Set(ctx.organization_id.clone()),
                name: ActiveValue::Set(name),
                login: ActiveValue::Set(login),
                birth_date: ActiveValue::Set(cmd.birth_date),
                lessons_balance: ActiveValue::Set(0),
                total_lessons: ActiveValue::Set(0),
                total_payments: ActiveValue::Set(0),
                created_at: ActiveValue::Set(Utc::now()),
            }
            .insert(&db_tx)
            .await?;

            tracing::info!(student_id = %model.id, "student created");
            Student::try_from(model)
        })
    }

    /// Return a student snapshot from DB.
    pub async fn student(&self, ctx: &Ctx, student_id: Uuid) -> ResultEngine<Student> {
        with_tx!(self, |db_tx| {
            let model = self.require_student(&db_tx, ctx, student_id).await?;
            Student::try_from(model)
        })
    }

    /// Create a group and generate its lessons from the weekly schedule.
    ///
    /// Group names are unique per organization, ignoring case, accents and
    /// punctuation.
    pub async fn create_group(&self, ctx: &Ctx, cmd: NewGroupCmd) -> ResultEngine<Group> {
        let name = normalize_required_name(&cmd.name, "group")?;
        let name_norm = normalize_key(&name);
        let course = normalize_required_name(&cmd.course, "course")?;
        if cmd.schedule.is_empty() {
            return Err(EngineError::Validation(
                "group schedule must not be empty".to_string(),
            ));
        }
        for slot in &cmd.schedule {
            slot.validate()?;
        }
        if cmd.lesson_count > MAX_LESSON_COUNT {
            return Err(EngineError::Validation(format!(
                "lesson count {} exceeds {MAX_LESSON_COUNT}",
                cmd.lesson_count
            )));
        }
        if cmd.max_students == 0 {
            return Err(EngineError::Validation(
                "max students must be at least 1".to_string(),
            ));
        }
        let lesson_count = i32::try_from(cmd.lesson_count)
            .map_err(|_| EngineError::Validation("lesson count out of range".to_string()))?;
        let max_students = i32::try_from(cmd.max_students)
            .map_err(|_| EngineError::Validation("max students out of range".to_string()))?;
        let schedule_json = serde_json::to_value(&cmd.schedule)
            .map_err(|err| EngineError::Validation(format!("invalid schedule: {err}")))?;

        with_tx!(self, |db_tx| {
            let exists = groups::Entity::find()
                .filter(groups::Column::OrganizationId.eq(ctx.organization_id.as_str()))
                .filter(groups::Column::NameNorm.eq(name_norm.as_str()))
                .one(&db_tx)
                .await?
                .is_some();
            if exists {
                return Err(EngineError::ExistingKey(name));
            }

            let model = groups::ActiveModel {
                id: ActiveValue::Set(Uuid::new_v4().to_string()),
                organization_id: ActiveValue::Set(ctx.organization_id.clone()),
                name: ActiveValue::Set(name),
                name_norm: ActiveValue::Set(name_norm),
                course: ActiveValue::Set(course),
                location: ActiveValue::Set(normalize_optional_text(cmd.location.as_deref())),
                schedule: ActiveValue::Set(schedule_json),
                start_date: ActiveValue::Set(cmd.start_date),
                lesson_count: ActiveValue::Set(lesson_count),
                max_students: ActiveValue::Set(max_students),
                created_at: ActiveValue::Set(Utc::now()),
            }
            .insert(&db_tx)
            .await?;

            let generated = generate_schedule(&cmd.schedule, cmd.start_date, cmd.lesson_count);
            if generated.len() < cmd.lesson_count as usize {
                tracing::warn!(
                    group_id = %model.id,
                    requested = cmd.lesson_count,
                    generated = generated.len(),
                    "schedule produced fewer lessons than requested"
                );
            }
            self.insert_lessons(&db_tx, ctx, &model, &generated).await?;

            tracing::info!(group_id = %model.id, "group created");
            Group::try_from(model)
        })
    }

    /// Return a group from DB.
    pub async fn group(&self, ctx: &Ctx, group_id: Uuid) -> ResultEngine<Group> {
        with_tx!(self, |db_tx| {
            let model = self.require_group(&db_tx, ctx, group_id).await?;
            Group::try_from(model)
        })
    }

    /// Enroll a student in a group.
    ///
    /// - `ExistingKey` if the student is already enrolled (dismissed included);
    /// - `Validation` when the group is full or `status` is `DISMISSED`.
    ///
    /// The student gets an `UNSPECIFIED` attendance on every active lesson of
    /// the group dated today or later.
    pub async fn enroll_student(
        &self,
        ctx: &Ctx,
        student_id: Uuid,
        group_id: Uuid,
        status: EnrollmentStatus,
    ) -> ResultEngine<Enrollment> {
        if status == EnrollmentStatus::Dismissed {
            return Err(EngineError::Validation(
                "cannot enroll as dismissed".to_string(),
            ));
        }
        let today = self.today();
        with_tx!(self, |db_tx| {
            self.require_student(&db_tx, ctx, student_id).await?;
            let group = self.require_group(&db_tx, ctx, group_id).await?;

            if self
                .find_enrollment(&db_tx, ctx, student_id, group_id)
                .await?
                .is_some()
            {
                return Err(EngineError::ExistingKey(
                    "student already enrolled".to_string(),
                ));
            }

            let seats_taken = student_groups::Entity::find()
                .filter(student_groups::Column::GroupId.eq(group.id.as_str()))
                .filter(student_groups::Column::Status.ne(EnrollmentStatus::Dismissed.as_str()))
                .count(&db_tx)
                .await?;
            if seats_taken >= u64::try_from(group.max_students).unwrap_or_default() {
                return Err(EngineError::Validation(format!(
                    "group {} is full",
                    group.name
                )));
            }

            let model = student_groups::ActiveModel {
                student_id: ActiveValue::Set(student_id.to_string()),
                group_id: ActiveValue::Set(group_id.to_string()),
                organization_id: ActiveValue::Set(ctx.organization_id.clone()),
                status: ActiveValue::Set(status.as_str().to_string()),
                lessons_balance: ActiveValue::Set(0),
                total_lessons: ActiveValue::Set(0),
                total_payments: ActiveValue::Set(0),
                joined_at: ActiveValue::Set(Utc::now()),
            }
            .insert(&db_tx)
            .await?;

            let upcoming: Vec<Uuid> = lessons::Entity::find()
                .filter(lessons::Column::GroupId.eq(group.id.as_str()))
                .filter(lessons::Column::Status.eq(LessonStatus::Active.as_str()))
                .filter(lessons::Column::Date.gte(today))
                .all(&db_tx)
                .await?
                .iter()
                .map(|lesson| parse_uuid(&lesson.id, "lesson"))
                .collect::<ResultEngine<_>>()?;
            self.seed_attendances(&db_tx, ctx, &upcoming, &[(student_id, status.student_status())])
                .await?;

            tracing::info!(%student_id, %group_id, %status, "student enrolled");
            Enrollment::try_from(model)
        })
    }

    /// Change an enrollment's status. Balances are kept on dismissal.
    pub async fn set_enrollment_status(
        &self,
        ctx: &Ctx,
        student_id: Uuid,
        group_id: Uuid,
        status: EnrollmentStatus,
    ) -> ResultEngine<Enrollment> {
        with_tx!(self, |db_tx| {
            let model = self
                .require_enrollment(&db_tx, ctx, student_id, group_id)
                .await?;
            if model.status == status.as_str() {
                return Enrollment::try_from(model);
            }

            let mut active: student_groups::ActiveModel = model.into();
            active.status = ActiveValue::Set(status.as_str().to_string());
            let model = active.update(&db_tx).await?;

            tracing::info!(%student_id, %group_id, %status, "enrollment status changed");
            Enrollment::try_from(model)
        })
    }

    /// Return an enrollment snapshot from DB.
    pub async fn enrollment(
        &self,
        ctx: &Ctx,
        student_id: Uuid,
        group_id: Uuid,
    ) -> ResultEngine<Enrollment> {
        with_tx!(self, |db_tx| {
            let model = self
                .require_enrollment(&db_tx, ctx, student_id, group_id)
                .await?;
            Enrollment::try_from(model)
        })
    }

    /// All enrollments of a student, dismissed included.
    pub async fn enrollments_for_student(
        &self,
        ctx: &Ctx,
        student_id: Uuid,
    ) -> ResultEngine<Vec<Enrollment>> {
        with_tx!(self, |db_tx| {
            self.require_student(&db_tx, ctx, student_id).await?;
            let models = student_groups::Entity::find()
                .filter(student_groups::Column::StudentId.eq(student_id.to_string()))
                .filter(student_groups::Column::OrganizationId.eq(ctx.organization_id.as_str()))
                .order_by_asc(student_groups::Column::JoinedAt)
                .all(&db_tx)
                .await?;
            models
                .into_iter()
                .map(Enrollment::try_from)
                .collect::<ResultEngine<Vec<_>>>()
        })
    }

    /// Non-dismissed students of a group with the standing their attendances
    /// are recorded under.
    pub(super) async fn group_roster(
        &self,
        db_tx: &DatabaseTransaction,
        ctx: &Ctx,
        group_id: &str,
    ) -> ResultEngine<Vec<(Uuid, StudentStatus)>> {
        let models = student_groups::Entity::find()
            .filter(student_groups::Column::GroupId.eq(group_id))
            .filter(student_groups::Column::OrganizationId.eq(ctx.organization_id.as_str()))
            .filter(student_groups::Column::Status.ne(EnrollmentStatus::Dismissed.as_str()))
            .all(db_tx)
            .await?;

        let mut roster = Vec::with_capacity(models.len());
        for model in models {
            let enrollment = Enrollment::try_from(model)?;
            roster.push((enrollment.student_id, enrollment.status.student_status()));
        }
        Ok(roster)
    }
}
