mod common;

use common::{ctx, engine_with_db, group, school, student};
use engine::{
    BalanceField, Balances, Ctx, EngineError, HistoryFilter, LedgerReason, PaymentCmd,
};
use sea_orm::ConnectionTrait;
use uuid::Uuid;

#[tokio::test]
async fn payment_credits_every_field_with_one_row_each() {
    let (engine, _db) = engine_with_db().await;
    let anna = student(&engine, "Anna").await;

    let payment = engine
        .apply_payment(
            &ctx(),
            PaymentCmd::new(anna.id, 8, 12000).description("October"),
        )
        .await
        .unwrap();
    assert_eq!(payment.group_id, None);
    assert_eq!(payment.created_by.as_deref(), Some("admin"));

    let anna = engine.student(&ctx(), anna.id).await.unwrap();
    assert_eq!(
        anna.balances,
        Balances {
            lessons_balance: 8,
            total_lessons: 8,
            total_payments: 12000,
        }
    );

    let history = engine
        .get_ledger_history(&ctx(), anna.id, &HistoryFilter::default())
        .await
        .unwrap();
    let fields: Vec<BalanceField> = history.iter().map(|e| e.field).collect();
    assert_eq!(
        fields,
        vec![
            BalanceField::LessonsBalance,
            BalanceField::TotalLessons,
            BalanceField::TotalPayments
        ]
    );
    for entry in &history {
        assert_eq!(entry.reason, LedgerReason::PaymentCreated);
        assert_eq!(
            entry.metadata,
            Some(serde_json::json!({ "payment_id": payment.id }))
        );
    }
}

#[tokio::test]
async fn payment_into_group_credits_the_enrollment() {
    let school = school().await;
    let engine = &school.engine;

    engine
        .apply_payment(
            &ctx(),
            PaymentCmd::new(school.student.id, 4, 6000).group_id(school.group.id),
        )
        .await
        .unwrap();

    let enrollment = engine
        .enrollment(&ctx(), school.student.id, school.group.id)
        .await
        .unwrap();
    assert_eq!(enrollment.balances.lessons_balance, 4);
    assert_eq!(enrollment.balances.total_payments, 6000);
    let student = engine.student(&ctx(), school.student.id).await.unwrap();
    assert_eq!(student.balances, Balances::default());

    let other = group(engine, "Violin", 2).await;
    let err = engine
        .apply_payment(
            &ctx(),
            PaymentCmd::new(school.student.id, 1, 100).group_id(other.id),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::Validation(format!("student is not enrolled in group {}", other.id))
    );
}

#[tokio::test]
async fn invalid_amounts_are_rejected() {
    let (engine, _db) = engine_with_db().await;
    let anna = student(&engine, "Anna").await;

    assert_eq!(
        engine
            .apply_payment(&ctx(), PaymentCmd::new(anna.id, 0, 0))
            .await
            .unwrap_err(),
        EngineError::Validation("payment is empty".to_string())
    );
    assert_eq!(
        engine
            .apply_payment(&ctx(), PaymentCmd::new(anna.id, -1, 100))
            .await
            .unwrap_err(),
        EngineError::Validation("payment amounts must not be negative".to_string())
    );
}

#[tokio::test]
async fn idempotency_key_is_per_actor() {
    let (engine, _db) = engine_with_db().await;
    let anna = student(&engine, "Anna").await;
    let cmd = PaymentCmd::new(anna.id, 4, 4000).idempotency_key("receipt-17");

    let first = engine.apply_payment(&ctx(), cmd.clone()).await.unwrap();
    let replay = engine.apply_payment(&ctx(), cmd.clone()).await.unwrap();
    assert_eq!(first.id, replay.id);
    assert_eq!(
        engine
            .student(&ctx(), anna.id)
            .await
            .unwrap()
            .balances
            .lessons_balance,
        4
    );

    let other_actor = Ctx::new(common::ORG, "secretary");
    let second = engine.apply_payment(&other_actor, cmd).await.unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(
        engine.payments_for_student(&ctx(), anna.id).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn system_payment_keys_are_unique_in_the_store() {
    let (engine, db) = engine_with_db().await;
    let anna = student(&engine, "Anna").await;
    let system = Ctx::system(common::ORG);
    let cmd = PaymentCmd::new(anna.id, 2, 2000).idempotency_key("import-1");

    let first = engine.apply_payment(&system, cmd.clone()).await.unwrap();
    assert_eq!(first.created_by, None);
    let replay = engine.apply_payment(&system, cmd).await.unwrap();
    assert_eq!(first.id, replay.id);

    // A writer that skips the lookup still hits the unique index.
    let duplicate = db
        .execute_unprepared(&format!(
            "INSERT INTO payments (id, organization_id, student_id, lesson_count, price, \
             idempotency_key, created_at) \
             VALUES ('{}', '{}', '{}', 2, 2000, 'import-1', '2099-01-01T00:00:00Z')",
            Uuid::new_v4(),
            common::ORG,
            anna.id
        ))
        .await;
    assert!(duplicate.is_err());
    assert_eq!(
        engine.payments_for_student(&ctx(), anna.id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn cancel_payment_compensates_once() {
    let (engine, _db) = engine_with_db().await;
    let anna = student(&engine, "Anna").await;
    let payment = engine
        .apply_payment(&ctx(), PaymentCmd::new(anna.id, 4, 4000))
        .await
        .unwrap();

    // Part of the lessons were already consumed.
    engine
        .set_balance(
            &ctx(),
            payment.target(),
            BalanceField::LessonsBalance,
            1,
            Some("three lessons attended before migration"),
        )
        .await
        .unwrap();

    let cancelled = engine.cancel_payment(&ctx(), payment.id).await.unwrap();
    assert!(cancelled.is_cancelled());
    assert_eq!(cancelled.cancelled_by.as_deref(), Some("admin"));

    let anna_now = engine.student(&ctx(), anna.id).await.unwrap();
    assert_eq!(
        anna_now.balances,
        Balances {
            lessons_balance: -3,
            total_lessons: 0,
            total_payments: 0,
        }
    );

    let rows = engine
        .get_ledger_history(
            &ctx(),
            anna.id,
            &HistoryFilter::default().reason(LedgerReason::PaymentCancelled),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|e| e.delta < 0));

    assert_eq!(
        engine.cancel_payment(&ctx(), payment.id).await.unwrap_err(),
        EngineError::Validation("payment already cancelled".to_string())
    );
    assert!(engine.verify_ledger(&ctx(), anna.id).await.unwrap().is_empty());
}
