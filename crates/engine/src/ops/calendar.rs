use std::collections::HashSet;

use chrono::{NaiveDate, NaiveTime};
use sea_orm::{
    ActiveValue, DatabaseTransaction, QueryFilter, QueryOrder, TransactionTrait, prelude::*,
};
use uuid::Uuid;

use crate::{
    Ctx, EngineError, Lesson, LessonStatus, ResultEngine, ScheduledLesson, attendances, groups,
    lessons, schedule::format_time,
};

use super::{Engine, with_tx};

impl Engine {
    /// Persist `schedule` as lessons of the group.
    ///
    /// Slots the group already has are skipped, so re-running with the same
    /// schedule creates nothing. Every currently enrolled (non-dismissed)
    /// student gets an `UNSPECIFIED` attendance on each created lesson.
    /// Returns only the lessons created by this call.
    pub async fn create_lessons_for_group(
        &self,
        ctx: &Ctx,
        group_id: Uuid,
        schedule: &[ScheduledLesson],
    ) -> ResultEngine<Vec<Lesson>> {
        with_tx!(self, |db_tx| {
            let group = self.require_group(&db_tx, ctx, group_id).await?;
            self.insert_lessons(&db_tx, ctx, &group, schedule).await
        })
    }

    pub(super) async fn insert_lessons(
        &self,
        db_tx: &DatabaseTransaction,
        ctx: &Ctx,
        group: &groups::Model,
        schedule: &[ScheduledLesson],
    ) -> ResultEngine<Vec<Lesson>> {
        let existing: Vec<lessons::Model> = lessons::Entity::find()
            .filter(lessons::Column::GroupId.eq(group.id.as_str()))
            .all(db_tx)
            .await?;
        let mut taken: HashSet<(NaiveDate, String)> = existing
            .into_iter()
            .map(|lesson| (lesson.date, lesson.time))
            .collect();

        let mut created = Vec::new();
        for slot in schedule {
            let time = format_time(slot.time);
            if !taken.insert((slot.date, time.clone())) {
                continue;
            }
            let model = new_lesson_model(ctx, &group.id, slot.date, time)
                .insert(db_tx)
                .await?;
            created.push(Lesson::try_from(model)?);
        }

        let roster = self.group_roster(db_tx, ctx, &group.id).await?;
        let lesson_ids: Vec<Uuid> = created.iter().map(|lesson| lesson.id).collect();
        self.seed_attendances(db_tx, ctx, &lesson_ids, &roster)
            .await?;

        tracing::info!(
            group_id = %group.id,
            created = created.len(),
            skipped = schedule.len() - created.len(),
            "lessons created"
        );
        Ok(created)
    }

    /// Add a single lesson to a group.
    ///
    /// Fails with `ExistingKey` when the group already meets at that slot.
    pub async fn add_lesson(
        &self,
        ctx: &Ctx,
        group_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> ResultEngine<Lesson> {
        with_tx!(self, |db_tx| {
            let group = self.require_group(&db_tx, ctx, group_id).await?;
            let slot = ScheduledLesson { date, time };
            self.ensure_slot_free(&db_tx, &group.id, &slot).await?;

            let mut created = self.insert_lessons(&db_tx, ctx, &group, &[slot]).await?;
            created
                .pop()
                .ok_or_else(|| EngineError::ExistingKey(format!("lesson {date} {time}")))
        })
    }

    /// Move a lesson to another date/time. Attendances follow the lesson.
    pub async fn reschedule_lesson(
        &self,
        ctx: &Ctx,
        lesson_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> ResultEngine<Lesson> {
        with_tx!(self, |db_tx| {
            let lesson = self.require_lesson(&db_tx, ctx, lesson_id).await?;
            let slot = ScheduledLesson { date, time };
            let label = format_time(time);
            if lesson.date == date && lesson.time == label {
                return Lesson::try_from(lesson);
            }
            self.ensure_slot_free(&db_tx, &lesson.group_id, &slot)
                .await?;

            let mut active: lessons::ActiveModel = lesson.into();
            active.date = ActiveValue::Set(date);
            active.time = ActiveValue::Set(label);
            let model = active.update(&db_tx).await?;

            tracing::info!(%lesson_id, %date, %time, "lesson rescheduled");
            Lesson::try_from(model)
        })
    }

    /// Cancel a lesson.
    ///
    /// Rejected while any of its attendances carries a charge: revert those
    /// first so the ledger is not left with charges for a lesson that never
    /// happened.
    pub async fn cancel_lesson(&self, ctx: &Ctx, lesson_id: Uuid) -> ResultEngine<Lesson> {
        with_tx!(self, |db_tx| {
            let lesson = self.require_lesson(&db_tx, ctx, lesson_id).await?;
            if lesson.status == LessonStatus::Cancelled.as_str() {
                return Lesson::try_from(lesson);
            }

            let charged = attendances::Entity::find()
                .filter(attendances::Column::LessonId.eq(lesson.id.as_str()))
                .filter(attendances::Column::ChargedLessons.ne(0))
                .one(&db_tx)
                .await?;
            if charged.is_some() {
                tracing::warn!(%lesson_id, "cancel rejected: lesson has charged attendances");
                return Err(EngineError::Consistency(
                    "lesson has charged attendances".to_string(),
                ));
            }

            let mut active: lessons::ActiveModel = lesson.into();
            active.status = ActiveValue::Set(LessonStatus::Cancelled.as_str().to_string());
            let model = active.update(&db_tx).await?;

            tracing::info!(%lesson_id, "lesson cancelled");
            Lesson::try_from(model)
        })
    }

    /// Return a lesson from DB.
    pub async fn lesson(&self, ctx: &Ctx, lesson_id: Uuid) -> ResultEngine<Lesson> {
        with_tx!(self, |db_tx| {
            let model = self.require_lesson(&db_tx, ctx, lesson_id).await?;
            Lesson::try_from(model)
        })
    }

    /// Lessons of a group, in calendar order.
    pub async fn lessons_for_group(&self, ctx: &Ctx, group_id: Uuid) -> ResultEngine<Vec<Lesson>> {
        with_tx!(self, |db_tx| {
            self.require_group(&db_tx, ctx, group_id).await?;
            let models = lessons::Entity::find()
                .filter(lessons::Column::GroupId.eq(group_id.to_string()))
                .order_by_asc(lessons::Column::Date)
                .order_by_asc(lessons::Column::Time)
                .all(&db_tx)
                .await?;
            models
                .into_iter()
                .map(Lesson::try_from)
                .collect::<ResultEngine<Vec<_>>>()
        })
    }

    async fn ensure_slot_free(
        &self,
        db_tx: &DatabaseTransaction,
        group_id: &str,
        slot: &ScheduledLesson,
    ) -> ResultEngine<()> {
        let label = format_time(slot.time);
        let exists = lessons::Entity::find()
            .filter(lessons::Column::GroupId.eq(group_id))
            .filter(lessons::Column::Date.eq(slot.date))
            .filter(lessons::Column::Time.eq(label.as_str()))
            .one(db_tx)
            .await?
            .is_some();
        if exists {
            return Err(EngineError::ExistingKey(format!(
                "lesson {} {label}",
                slot.date
            )));
        }
        Ok(())
    }
}

fn new_lesson_model(
    ctx: &Ctx,
    group_id: &str,
    date: NaiveDate,
    time: String,
) -> lessons::ActiveModel {
    lessons::ActiveModel {
        id: ActiveValue::Set(Uuid::new_v4().to_string()),
        organization_id: ActiveValue::Set(ctx.organization_id.clone()),
        group_id: ActiveValue::Set(group_id.to_string()),
        date: ActiveValue::Set(date),
        time: ActiveValue::Set(time),
        status: ActiveValue::Set(LessonStatus::Active.as_str().to_string()),
    }
}
