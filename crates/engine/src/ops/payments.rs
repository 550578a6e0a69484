use chrono::Utc;
use sea_orm::{
    ActiveValue, DatabaseTransaction, QueryFilter, QueryOrder, TransactionTrait, prelude::*,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    BalanceChange, BalanceField, Ctx, EngineError, LedgerReason, Payment,
    PaymentCmd, ResultEngine, payments,
    util::normalize_optional_text,
};

use super::{Engine, with_tx};

impl Engine {
    /// Register a payment and credit it to the student.
    ///
    /// The target is the enrollment when `group_id` is given (the student
    /// must be enrolled and not dismissed), otherwise the unallocated
    /// balance. Each of `LESSONS_BALANCE`, `TOTAL_LESSONS` and
    /// `TOTAL_PAYMENTS` gets its own `PAYMENT_CREATED` row carrying the
    /// payment id.
    ///
    /// A repeated `idempotency_key` from the same actor returns the payment
    /// already recorded under it and writes nothing.
    pub async fn apply_payment(&self, ctx: &Ctx, cmd: PaymentCmd) -> ResultEngine<Payment> {
        if cmd.lesson_count < 0 || cmd.price < 0 {
            return Err(EngineError::Validation(
                "payment amounts must not be negative".to_string(),
            ));
        }
        if cmd.lesson_count == 0 && cmd.price == 0 {
            return Err(EngineError::Validation("payment is empty".to_string()));
        }
        let description = normalize_optional_text(cmd.description.as_deref());
        let idempotency_key = normalize_optional_text(cmd.idempotency_key.as_deref());

        with_tx!(self, |db_tx| {
            if let Some(key) = idempotency_key.as_deref() {
                if let Some(existing) = self.find_payment_by_key(&db_tx, ctx, key).await? {
                    tracing::debug!(payment_id = %existing.id, "idempotent payment replay");
                    return Payment::try_from(existing);
                }
            }

            self.require_student(&db_tx, ctx, cmd.student_id).await?;
            if let Some(group_id) = cmd.group_id {
                self.require_group(&db_tx, ctx, group_id).await?;
                self.require_open_enrollment(&db_tx, ctx, cmd.student_id, group_id)
                    .await?;
            }

            let model = payments::ActiveModel {
                id: ActiveValue::Set(Uuid::new_v4().to_string()),
                organization_id: ActiveValue::Set(ctx.organization_id.clone()),
                student_id: ActiveValue::Set(cmd.student_id.to_string()),
                group_id: ActiveValue::Set(cmd.group_id.map(|id| id.to_string())),
                lesson_count: ActiveValue::Set(cmd.lesson_count),
                price: ActiveValue::Set(cmd.price),
                description: ActiveValue::Set(description),
                idempotency_key: ActiveValue::Set(idempotency_key),
                created_by: ActiveValue::Set(ctx.actor_id.clone()),
                created_at: ActiveValue::Set(Utc::now()),
                cancelled_by: ActiveValue::Set(None),
                cancelled_at: ActiveValue::Set(None),
            }
            .insert(&db_tx)
            .await?;
            let payment = Payment::try_from(model)?;

            self.post_payment(&db_tx, ctx, &payment, 1, LedgerReason::PaymentCreated)
                .await?;

            tracing::info!(
                payment_id = %payment.id,
                student_id = %payment.student_id,
                lesson_count = payment.lesson_count,
                price = payment.price,
                "payment applied"
            );
            Ok(payment)
        })
    }

    /// Cancel a payment, writing the compensating `PAYMENT_CANCELLED` rows.
    ///
    /// The balance may go negative if the lessons were already consumed.
    pub async fn cancel_payment(&self, ctx: &Ctx, payment_id: Uuid) -> ResultEngine<Payment> {
        with_tx!(self, |db_tx| {
            let model = self.require_payment(&db_tx, ctx, payment_id).await?;
            let payment = Payment::try_from(model.clone())?;
            if payment.is_cancelled() {
                return Err(EngineError::Validation(
                    "payment already cancelled".to_string(),
                ));
            }

            self.post_payment(&db_tx, ctx, &payment, -1, LedgerReason::PaymentCancelled)
                .await?;

            let mut active: payments::ActiveModel = model.into();
            active.cancelled_by = ActiveValue::Set(ctx.actor_id.clone());
            active.cancelled_at = ActiveValue::Set(Some(Utc::now()));
            let model = active.update(&db_tx).await?;

            tracing::info!(%payment_id, "payment cancelled");
            Payment::try_from(model)
        })
    }

    /// Return a payment from DB.
    pub async fn payment(&self, ctx: &Ctx, payment_id: Uuid) -> ResultEngine<Payment> {
        with_tx!(self, |db_tx| {
            let model = self.require_payment(&db_tx, ctx, payment_id).await?;
            Payment::try_from(model)
        })
    }

    /// Payments of a student, oldest first, cancelled included.
    pub async fn payments_for_student(
        &self,
        ctx: &Ctx,
        student_id: Uuid,
    ) -> ResultEngine<Vec<Payment>> {
        with_tx!(self, |db_tx| {
            self.require_student(&db_tx, ctx, student_id).await?;
            let models = payments::Entity::find()
                .filter(payments::Column::OrganizationId.eq(ctx.organization_id.as_str()))
                .filter(payments::Column::StudentId.eq(student_id.to_string()))
                .order_by_asc(payments::Column::CreatedAt)
                .all(&db_tx)
                .await?;
            models
                .into_iter()
                .map(Payment::try_from)
                .collect::<ResultEngine<Vec<_>>>()
        })
    }

    /// One ledger row per non-zero field of `payment`, scaled by `sign`.
    async fn post_payment(
        &self,
        db_tx: &DatabaseTransaction,
        ctx: &Ctx,
        payment: &Payment,
        sign: i64,
        reason: LedgerReason,
    ) -> ResultEngine<()> {
        let target = payment.target();
        let metadata = json!({ "payment_id": payment.id });
        for (field, amount) in [
            (BalanceField::LessonsBalance, payment.lesson_count),
            (BalanceField::TotalLessons, payment.lesson_count),
            (BalanceField::TotalPayments, payment.price),
        ] {
            self.mutate_balance(
                db_tx,
                ctx,
                BalanceChange::new(target, field, sign * amount)
                    .reason(reason)
                    .metadata(metadata.clone()),
            )
            .await?;
        }
        Ok(())
    }

    async fn require_payment(
        &self,
        db_tx: &DatabaseTransaction,
        ctx: &Ctx,
        payment_id: Uuid,
    ) -> ResultEngine<payments::Model> {
        payments::Entity::find_by_id(payment_id.to_string())
            .filter(payments::Column::OrganizationId.eq(ctx.organization_id.as_str()))
            .one(db_tx)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("payment not exists".to_string()))
    }

    async fn find_payment_by_key(
        &self,
        db_tx: &DatabaseTransaction,
        ctx: &Ctx,
        key: &str,
    ) -> ResultEngine<Option<payments::Model>> {
        let created_by = match ctx.actor_id.as_deref() {
            Some(actor_id) => payments::Column::CreatedBy.eq(actor_id),
            None => payments::Column::CreatedBy.is_null(),
        };
        let model = payments::Entity::find()
            .filter(payments::Column::OrganizationId.eq(ctx.organization_id.as_str()))
            .filter(created_by)
            .filter(payments::Column::IdempotencyKey.eq(key))
            .one(db_tx)
            .await?;
        Ok(model)
    }
}
