use std::collections::HashSet;

use chrono::Utc;
use sea_orm::{
    ActiveValue, DatabaseTransaction, QueryFilter, QueryOrder, TransactionTrait, prelude::*,
    sea_query::Expr,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    Attendance, AttendanceStatus, BalanceChange, BalanceField, BalanceTarget, Ctx, EngineError,
    LedgerReason, LessonStatus, RecordAttendanceCmd, ResultEngine, StudentStatus,
    attendances::{self, Reconciliation, reconcile},
    lessons,
    util::{normalize_optional_text, parse_uuid},
};

use super::{Engine, with_tx};

fn new_attendance_model(
    ctx: &Ctx,
    student_id: Uuid,
    lesson_id: Uuid,
    student_status: StudentStatus,
    missed_attendance_id: Option<Uuid>,
) -> attendances::ActiveModel {
    attendances::ActiveModel {
        id: ActiveValue::Set(Uuid::new_v4().to_string()),
        organization_id: ActiveValue::Set(ctx.organization_id.clone()),
        student_id: ActiveValue::Set(student_id.to_string()),
        lesson_id: ActiveValue::Set(lesson_id.to_string()),
        status: ActiveValue::Set(AttendanceStatus::Unspecified.as_str().to_string()),
        student_status: ActiveValue::Set(student_status.as_str().to_string()),
        comment: ActiveValue::Set(None),
        missed_attendance_id: ActiveValue::Set(missed_attendance_id.map(|id| id.to_string())),
        charged_lessons: ActiveValue::Set(0),
        charged_group_id: ActiveValue::Set(None),
        makeup_credited: ActiveValue::Set(false),
        makeup_credit_group_id: ActiveValue::Set(None),
        created_at: ActiveValue::Set(Utc::now()),
    }
}

fn ensure_lesson_active(lesson: &lessons::Model) -> ResultEngine<()> {
    if lesson.status == LessonStatus::Cancelled.as_str() {
        return Err(EngineError::Validation(format!(
            "lesson {} is cancelled",
            lesson.id
        )));
    }
    Ok(())
}

impl Engine {
    /// Set a student's attendance on a lesson, creating the row if needed.
    ///
    /// A new row takes its student status from the command, else from the
    /// enrollment in the lesson's group (`TRIAL` stays trial, anything else is
    /// `ACTIVE`). The status change then goes through the same
    /// reconciliation as [`Engine::update_attendance_status`].
    pub async fn record_attendance(
        &self,
        ctx: &Ctx,
        cmd: RecordAttendanceCmd,
    ) -> ResultEngine<Attendance> {
        let comment = normalize_optional_text(cmd.comment.as_deref());
        with_tx!(self, |db_tx| {
            self.require_student(&db_tx, ctx, cmd.student_id).await?;
            let lesson = self.require_lesson(&db_tx, ctx, cmd.lesson_id).await?;
            ensure_lesson_active(&lesson)?;

            let existing = attendances::Entity::find()
                .filter(attendances::Column::StudentId.eq(cmd.student_id.to_string()))
                .filter(attendances::Column::LessonId.eq(cmd.lesson_id.to_string()))
                .one(&db_tx)
                .await?;

            let model = match existing {
                Some(model) => {
                    if cmd.student_status.is_none() && comment.is_none() {
                        model
                    } else {
                        let mut active: attendances::ActiveModel = model.into();
                        if let Some(student_status) = cmd.student_status {
                            active.student_status =
                                ActiveValue::Set(student_status.as_str().to_string());
                        }
                        if comment.is_some() {
                            active.comment = ActiveValue::Set(comment);
                        }
                        active.update(&db_tx).await?
                    }
                }
                None => {
                    let group_id = parse_uuid(&lesson.group_id, "group")?;
                    let student_status = match cmd.student_status {
                        Some(student_status) => student_status,
                        None => self
                            .find_enrollment(&db_tx, ctx, cmd.student_id, group_id)
                            .await?
                            .map(crate::Enrollment::try_from)
                            .transpose()?
                            .map_or(StudentStatus::Active, |e| e.status.student_status()),
                    };
                    let mut active =
                        new_attendance_model(ctx, cmd.student_id, cmd.lesson_id, student_status, None);
                    active.comment = ActiveValue::Set(comment);
                    active.insert(&db_tx).await?
                }
            };

            let model = self
                .transition(&db_tx, ctx, model, &lesson, cmd.status)
                .await?;
            Attendance::try_from(model)
        })
    }

    /// Move an attendance to `status`, writing the ledger difference.
    pub async fn update_attendance_status(
        &self,
        ctx: &Ctx,
        attendance_id: Uuid,
        status: AttendanceStatus,
    ) -> ResultEngine<Attendance> {
        with_tx!(self, |db_tx| {
            let model = self.require_attendance(&db_tx, ctx, attendance_id).await?;
            let lesson_id = parse_uuid(&model.lesson_id, "lesson")?;
            let lesson = self.require_lesson(&db_tx, ctx, lesson_id).await?;
            let model = self.transition(&db_tx, ctx, model, &lesson, status).await?;
            Attendance::try_from(model)
        })
    }

    /// Change student status and/or comment. No ledger effect.
    ///
    /// `None` leaves a value as it is; an empty comment clears it.
    pub async fn update_attendance_details(
        &self,
        ctx: &Ctx,
        attendance_id: Uuid,
        student_status: Option<StudentStatus>,
        comment: Option<&str>,
    ) -> ResultEngine<Attendance> {
        with_tx!(self, |db_tx| {
            let model = self.require_attendance(&db_tx, ctx, attendance_id).await?;
            if student_status.is_none() && comment.is_none() {
                return Attendance::try_from(model);
            }
            let mut active: attendances::ActiveModel = model.into();
            if let Some(student_status) = student_status {
                active.student_status = ActiveValue::Set(student_status.as_str().to_string());
            }
            if let Some(comment) = comment {
                active.comment = ActiveValue::Set(normalize_optional_text(Some(comment)));
            }
            let model = active.update(&db_tx).await?;
            Attendance::try_from(model)
        })
    }

    /// Reconcile `model` against `status`.
    ///
    /// The charge goes to the enrollment of the lesson's group when the
    /// student has one, else to the unallocated balance; the pool is stored
    /// on the row so a later refund returns to the same place.
    async fn transition(
        &self,
        db_tx: &DatabaseTransaction,
        ctx: &Ctx,
        model: attendances::Model,
        lesson: &lessons::Model,
        status: AttendanceStatus,
    ) -> ResultEngine<attendances::Model> {
        let attendance = Attendance::try_from(model.clone())?;
        if attendance.status == status {
            return Ok(model);
        }
        ensure_lesson_active(lesson)?;

        if status != AttendanceStatus::Absent
            && self.find_makeup(db_tx, attendance.id).await?.is_some()
        {
            tracing::warn!(
                attendance_id = %attendance.id,
                %status,
                "status change rejected: absence has a makeup"
            );
            return Err(EngineError::Consistency(
                "attendance has a makeup; remove it before changing the status".to_string(),
            ));
        }

        let metadata = json!({
            "attendance_id": attendance.id,
            "lesson_id": attendance.lesson_id,
        });
        let mut charged_lessons = attendance.charged_lessons;
        let mut charged_group_id = attendance.charged_group_id;

        match reconcile(attendance.charged_lessons, status, attendance.is_makeup()) {
            Reconciliation::Unchanged => {}
            Reconciliation::Charge { lessons, reason } => {
                let group_id = parse_uuid(&lesson.group_id, "group")?;
                let pool = self
                    .find_enrollment(db_tx, ctx, attendance.student_id, group_id)
                    .await?
                    .map(|_| group_id);
                let target = BalanceTarget::for_student(attendance.student_id, pool);
                self.mutate_balance(
                    db_tx,
                    ctx,
                    BalanceChange::new(target, BalanceField::LessonsBalance, -lessons)
                        .reason(reason)
                        .metadata(metadata),
                )
                .await?;
                charged_lessons += lessons;
                charged_group_id = pool;
            }
            Reconciliation::Refund { lessons } => {
                self.mutate_balance(
                    db_tx,
                    ctx,
                    BalanceChange::new(
                        attendance.charged_target(),
                        BalanceField::LessonsBalance,
                        lessons,
                    )
                    .reason(LedgerReason::AttendanceReverted)
                    .metadata(metadata),
                )
                .await?;
                charged_lessons -= lessons;
                if charged_lessons == 0 {
                    charged_group_id = None;
                }
            }
        }

        let mut active: attendances::ActiveModel = model.into();
        active.status = ActiveValue::Set(status.as_str().to_string());
        active.charged_lessons = ActiveValue::Set(charged_lessons);
        active.charged_group_id = ActiveValue::Set(charged_group_id.map(|id| id.to_string()));
        let model = active.update(db_tx).await?;

        tracing::info!(
            attendance_id = %attendance.id,
            from = %attendance.status,
            to = %status,
            charged_lessons,
            "attendance status changed"
        );
        Ok(model)
    }

    /// Schedule a makeup for an absence.
    ///
    /// Creates an `UNSPECIFIED` attendance on `lesson_id` linked to the
    /// absence. With `credit_original_group` the absence's lesson is given
    /// back (+1, `MAKEUP_GRANTED`) to the enrollment of its group, or to the
    /// unallocated balance when the student is not enrolled there.
    pub async fn create_makeup(
        &self,
        ctx: &Ctx,
        missed_attendance_id: Uuid,
        lesson_id: Uuid,
        credit_original_group: bool,
    ) -> ResultEngine<Attendance> {
        with_tx!(self, |db_tx| {
            let missed = self
                .require_attendance(&db_tx, ctx, missed_attendance_id)
                .await?;
            let missed = Attendance::try_from(missed)?;
            if missed.status != AttendanceStatus::Absent {
                return Err(EngineError::Validation(
                    "only an absence can be made up".to_string(),
                ));
            }
            if missed.is_makeup() {
                return Err(EngineError::Validation(
                    "a makeup cannot itself be made up".to_string(),
                ));
            }
            if self.find_makeup(&db_tx, missed.id).await?.is_some() {
                return Err(EngineError::ExistingKey("makeup already exists".to_string()));
            }
            if credit_original_group && missed.makeup_credited {
                return Err(EngineError::Consistency(
                    "makeup credit already outstanding for this absence".to_string(),
                ));
            }

            let makeup = self
                .insert_makeup(&db_tx, ctx, &missed, lesson_id)
                .await?;

            if credit_original_group {
                let missed_lesson = self.require_lesson(&db_tx, ctx, missed.lesson_id).await?;
                let group_id = parse_uuid(&missed_lesson.group_id, "group")?;
                let pool = self
                    .find_enrollment(&db_tx, ctx, missed.student_id, group_id)
                    .await?
                    .map(|_| group_id);
                self.mutate_balance(
                    &db_tx,
                    ctx,
                    BalanceChange::new(
                        BalanceTarget::for_student(missed.student_id, pool),
                        BalanceField::LessonsBalance,
                        1,
                    )
                    .reason(LedgerReason::MakeupGranted)
                    .metadata(json!({
                        "attendance_id": missed.id,
                        "makeup_attendance_id": makeup.id,
                    })),
                )
                .await?;

                attendances::ActiveModel {
                    id: ActiveValue::Unchanged(missed.id.to_string()),
                    makeup_credited: ActiveValue::Set(true),
                    makeup_credit_group_id: ActiveValue::Set(pool.map(|id| id.to_string())),
                    ..Default::default()
                }
                .update(&db_tx)
                .await?;
            }

            tracing::info!(
                missed_attendance_id = %missed.id,
                makeup_attendance_id = %makeup.id,
                credited = credit_original_group,
                "makeup created"
            );
            Ok(makeup)
        })
    }

    /// The makeup scheduled for an absence, if any.
    pub async fn makeup_for(
        &self,
        ctx: &Ctx,
        missed_attendance_id: Uuid,
    ) -> ResultEngine<Option<Attendance>> {
        with_tx!(self, |db_tx| {
            self.require_attendance(&db_tx, ctx, missed_attendance_id)
                .await?;
            self.find_makeup(&db_tx, missed_attendance_id)
                .await?
                .map(Attendance::try_from)
                .transpose()
        })
    }

    /// Move a makeup to another lesson.
    ///
    /// The old makeup must not carry a charge. It is deleted and a fresh
    /// `UNSPECIFIED` makeup with the same absence link is created on
    /// `new_lesson_id`. Balances are untouched.
    pub async fn reschedule_makeup(
        &self,
        ctx: &Ctx,
        makeup_attendance_id: Uuid,
        new_lesson_id: Uuid,
    ) -> ResultEngine<Attendance> {
        with_tx!(self, |db_tx| {
            let old = self
                .require_attendance(&db_tx, ctx, makeup_attendance_id)
                .await?;
            let old = Attendance::try_from(old)?;
            let missed_attendance_id = old.missed_attendance_id.ok_or_else(|| {
                EngineError::Validation("attendance is not a makeup".to_string())
            })?;
            if old.charged_lessons != 0 {
                tracing::warn!(%makeup_attendance_id, "reschedule rejected: makeup is charged");
                return Err(EngineError::Consistency(
                    "makeup is charged; revert its status first".to_string(),
                ));
            }

            let missed = self
                .require_attendance(&db_tx, ctx, missed_attendance_id)
                .await?;
            let missed = Attendance::try_from(missed)?;

            attendances::Entity::delete_by_id(old.id.to_string())
                .exec(&db_tx)
                .await?;
            let mut makeup = self
                .insert_makeup(&db_tx, ctx, &missed, new_lesson_id)
                .await?;
            if old.comment.is_some() {
                makeup = Attendance::try_from(
                    attendances::ActiveModel {
                        id: ActiveValue::Unchanged(makeup.id.to_string()),
                        comment: ActiveValue::Set(old.comment),
                        ..Default::default()
                    }
                    .update(&db_tx)
                    .await?,
                )?;
            }

            tracing::info!(
                %missed_attendance_id,
                old_makeup_id = %old.id,
                new_makeup_id = %makeup.id,
                "makeup rescheduled"
            );
            Ok(makeup)
        })
    }

    /// Take back an outstanding `MAKEUP_GRANTED` credit (-1, `MAKEUP_REVOKED`)
    /// from the pool that received it.
    ///
    /// Independent from the makeup attendance itself: reverting or deleting
    /// the makeup never touches the credit.
    pub async fn revoke_makeup_credit(
        &self,
        ctx: &Ctx,
        missed_attendance_id: Uuid,
    ) -> ResultEngine<Attendance> {
        with_tx!(self, |db_tx| {
            let missed = self
                .require_attendance(&db_tx, ctx, missed_attendance_id)
                .await?;
            let attendance = Attendance::try_from(missed.clone())?;
            if !attendance.makeup_credited {
                return Err(EngineError::Validation(
                    "no outstanding makeup credit".to_string(),
                ));
            }

            self.mutate_balance(
                &db_tx,
                ctx,
                BalanceChange::new(attendance.credit_target(), BalanceField::LessonsBalance, -1)
                    .reason(LedgerReason::MakeupRevoked)
                    .metadata(json!({ "attendance_id": attendance.id })),
            )
            .await?;

            let mut active: attendances::ActiveModel = missed.into();
            active.makeup_credited = ActiveValue::Set(false);
            active.makeup_credit_group_id = ActiveValue::Set(None);
            let model = active.update(&db_tx).await?;

            tracing::info!(%missed_attendance_id, "makeup credit revoked");
            Attendance::try_from(model)
        })
    }

    /// Delete an attendance that never touched a balance (or whose effects
    /// were already reverted).
    ///
    /// If the row is an absence with a makeup, the makeup's link is cleared
    /// first; the makeup itself stays.
    pub async fn delete_attendance(&self, ctx: &Ctx, attendance_id: Uuid) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            let model = self.require_attendance(&db_tx, ctx, attendance_id).await?;
            let attendance = Attendance::try_from(model)?;
            if attendance.has_ledger_effect() {
                tracing::warn!(
                    %attendance_id,
                    charged_lessons = attendance.charged_lessons,
                    makeup_credited = attendance.makeup_credited,
                    "delete rejected: attendance has ledger effects"
                );
                return Err(EngineError::Consistency(
                    "attendance has unreverted ledger effects".to_string(),
                ));
            }

            attendances::Entity::update_many()
                .col_expr(
                    attendances::Column::MissedAttendanceId,
                    Expr::value(Option::<String>::None),
                )
                .filter(attendances::Column::MissedAttendanceId.eq(attendance_id.to_string()))
                .exec(&db_tx)
                .await?;
            attendances::Entity::delete_by_id(attendance_id.to_string())
                .exec(&db_tx)
                .await?;

            tracing::info!(%attendance_id, "attendance deleted");
            Ok(())
        })
    }

    /// Attendances of a lesson, oldest first.
    pub async fn attendances_for_lesson(
        &self,
        ctx: &Ctx,
        lesson_id: Uuid,
    ) -> ResultEngine<Vec<Attendance>> {
        with_tx!(self, |db_tx| {
            self.require_lesson(&db_tx, ctx, lesson_id).await?;
            let models = attendances::Entity::find()
                .filter(attendances::Column::LessonId.eq(lesson_id.to_string()))
                .order_by_asc(attendances::Column::CreatedAt)
                .all(&db_tx)
                .await?;
            models
                .into_iter()
                .map(Attendance::try_from)
                .collect::<ResultEngine<Vec<_>>>()
        })
    }

    /// Return an attendance from DB.
    pub async fn attendance(&self, ctx: &Ctx, attendance_id: Uuid) -> ResultEngine<Attendance> {
        with_tx!(self, |db_tx| {
            let model = self.require_attendance(&db_tx, ctx, attendance_id).await?;
            Attendance::try_from(model)
        })
    }

    async fn find_makeup(
        &self,
        db_tx: &DatabaseTransaction,
        missed_attendance_id: Uuid,
    ) -> ResultEngine<Option<attendances::Model>> {
        let model = attendances::Entity::find()
            .filter(attendances::Column::MissedAttendanceId.eq(missed_attendance_id.to_string()))
            .one(db_tx)
            .await?;
        Ok(model)
    }

    async fn insert_makeup(
        &self,
        db_tx: &DatabaseTransaction,
        ctx: &Ctx,
        missed: &Attendance,
        lesson_id: Uuid,
    ) -> ResultEngine<Attendance> {
        if lesson_id == missed.lesson_id {
            return Err(EngineError::Validation(
                "makeup must be on a different lesson".to_string(),
            ));
        }
        let lesson = self.require_lesson(db_tx, ctx, lesson_id).await?;
        ensure_lesson_active(&lesson)?;

        let taken = attendances::Entity::find()
            .filter(attendances::Column::StudentId.eq(missed.student_id.to_string()))
            .filter(attendances::Column::LessonId.eq(lesson_id.to_string()))
            .one(db_tx)
            .await?
            .is_some();
        if taken {
            return Err(EngineError::ExistingKey(
                "student already has an attendance on this lesson".to_string(),
            ));
        }

        let model = new_attendance_model(
            ctx,
            missed.student_id,
            lesson_id,
            missed.student_status,
            Some(missed.id),
        )
        .insert(db_tx)
        .await?;
        Attendance::try_from(model)
    }

    /// Create the missing `UNSPECIFIED` attendances for every
    /// (lesson, student) pair.
    pub(super) async fn seed_attendances(
        &self,
        db_tx: &DatabaseTransaction,
        ctx: &Ctx,
        lesson_ids: &[Uuid],
        roster: &[(Uuid, StudentStatus)],
    ) -> ResultEngine<usize> {
        if lesson_ids.is_empty() || roster.is_empty() {
            return Ok(0);
        }

        let existing = attendances::Entity::find()
            .filter(
                attendances::Column::LessonId
                    .is_in(lesson_ids.iter().map(ToString::to_string)),
            )
            .all(db_tx)
            .await?;
        let mut taken: HashSet<(String, String)> = existing
            .into_iter()
            .map(|model| (model.student_id, model.lesson_id))
            .collect();

        let mut created = 0;
        for lesson_id in lesson_ids {
            for (student_id, student_status) in roster {
                if !taken.insert((student_id.to_string(), lesson_id.to_string())) {
                    continue;
                }
                new_attendance_model(ctx, *student_id, *lesson_id, *student_status, None)
                    .insert(db_tx)
                    .await?;
                created += 1;
            }
        }

        tracing::debug!(created, "attendances seeded");
        Ok(created)
    }
}
