mod common;

use sea_orm::{ConnectionTrait, Statement};

use common::{ORG, ctx, engine_with_db, school, student};
use engine::{
    BalanceChange, BalanceField, BalanceTarget, Ctx, DiscrepancyKind, EngineError,
    HistoryFilter, LedgerReason, PaymentCmd,
};

#[tokio::test]
async fn change_without_reason_is_rejected() {
    let (engine, _db) = engine_with_db().await;
    let anna = student(&engine, "Anna").await;

    let err = engine
        .change_balance(
            &ctx(),
            BalanceChange::new(
                BalanceTarget::Student {
                    student_id: anna.id,
                },
                BalanceField::LessonsBalance,
                5,
            ),
        )
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::MissingReason);

    let anna = engine.student(&ctx(), anna.id).await.unwrap();
    assert_eq!(anna.balances.lessons_balance, 0);
    let history = engine
        .get_ledger_history(&ctx(), anna.id, &HistoryFilter::default())
        .await
        .unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn zero_delta_writes_nothing() {
    let (engine, _db) = engine_with_db().await;
    let anna = student(&engine, "Anna").await;

    let entry = engine
        .change_balance(
            &ctx(),
            BalanceChange::new(
                BalanceTarget::Student {
                    student_id: anna.id,
                },
                BalanceField::TotalPayments,
                0,
            )
            .reason(LedgerReason::ManualSet),
        )
        .await
        .unwrap();
    assert!(entry.is_none());
    assert!(
        engine
            .get_ledger_history(&ctx(), anna.id, &HistoryFilter::default())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn redistribution_reason_cannot_overdraw() {
    let (engine, _db) = engine_with_db().await;
    let anna = student(&engine, "Anna").await;
    let target = BalanceTarget::Student {
        student_id: anna.id,
    };

    let err = engine
        .change_balance(
            &ctx(),
            BalanceChange::new(target, BalanceField::LessonsBalance, -1)
                .reason(LedgerReason::BalanceRedistributed),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientBalance(_)));

    // Consumption may create debt.
    let entry = engine
        .change_balance(
            &ctx(),
            BalanceChange::new(target, BalanceField::LessonsBalance, -1)
                .reason(LedgerReason::AttendancePresentCharged),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!((entry.balance_before, entry.balance_after), (0, -1));

    let history = engine
        .get_ledger_history(&ctx(), anna.id, &HistoryFilter::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn set_balance_records_the_difference() {
    let (engine, _db) = engine_with_db().await;
    let anna = student(&engine, "Anna").await;
    let target = BalanceTarget::Student {
        student_id: anna.id,
    };

    let first = engine
        .set_balance(&ctx(), target, BalanceField::LessonsBalance, 5, Some("opening"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.reason, LedgerReason::ManualSet);
    assert_eq!(
        (first.balance_before, first.delta, first.balance_after),
        (0, 5, 5)
    );
    assert_eq!(first.comment.as_deref(), Some("opening"));
    assert_eq!(first.actor_id.as_deref(), Some("admin"));

    let second = engine
        .set_balance(&ctx(), target, BalanceField::LessonsBalance, 2, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        (second.balance_before, second.delta, second.balance_after),
        (5, -3, 2)
    );
    assert!(second.id > first.id);

    let unchanged = engine
        .set_balance(&ctx(), target, BalanceField::LessonsBalance, 2, None)
        .await
        .unwrap();
    assert!(unchanged.is_none());

    assert!(engine.verify_ledger(&ctx(), anna.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn history_filters_by_pool_field_and_reason() {
    let school = school().await;
    let engine = &school.engine;
    let anna = school.student.id;

    engine
        .apply_payment(&ctx(), PaymentCmd::new(anna, 4, 8000))
        .await
        .unwrap();
    engine
        .apply_payment(
            &ctx(),
            PaymentCmd::new(anna, 2, 0).group_id(school.group.id),
        )
        .await
        .unwrap();

    let all = engine
        .get_ledger_history(&ctx(), anna, &HistoryFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 5);
    assert!(all.windows(2).all(|pair| pair[0].id < pair[1].id));

    let unallocated = engine
        .get_ledger_history(&ctx(), anna, &HistoryFilter::default().unallocated())
        .await
        .unwrap();
    assert_eq!(unallocated.len(), 3);
    assert!(unallocated.iter().all(|e| e.target.group_id().is_none()));

    let group = engine
        .get_ledger_history(
            &ctx(),
            anna,
            &HistoryFilter::default()
                .group(school.group.id)
                .field(BalanceField::LessonsBalance),
        )
        .await
        .unwrap();
    assert_eq!(group.len(), 1);
    assert_eq!(group[0].delta, 2);

    let payments = engine
        .get_ledger_history(
            &ctx(),
            anna,
            &HistoryFilter::default().field(BalanceField::TotalPayments),
        )
        .await
        .unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].delta, 8000);

    let cancelled = engine
        .get_ledger_history(
            &ctx(),
            anna,
            &HistoryFilter::default().reason(LedgerReason::PaymentCancelled),
        )
        .await
        .unwrap();
    assert!(cancelled.is_empty());
}

#[tokio::test]
async fn annotate_changes_only_the_comment() {
    let (engine, _db) = engine_with_db().await;
    let anna = student(&engine, "Anna").await;
    let entry = engine
        .set_balance(
            &ctx(),
            BalanceTarget::Student {
                student_id: anna.id,
            },
            BalanceField::TotalLessons,
            3,
            None,
        )
        .await
        .unwrap()
        .unwrap();

    let annotated = engine
        .annotate_history(&ctx(), entry.id, Some("  imported from paper register "))
        .await
        .unwrap();
    assert_eq!(annotated.comment.as_deref(), Some("imported from paper register"));
    assert_eq!(
        (annotated.delta, annotated.balance_before, annotated.balance_after),
        (entry.delta, entry.balance_before, entry.balance_after)
    );
    assert_eq!(annotated.reason, entry.reason);

    let err = engine
        .annotate_history(&Ctx::new("org-2", "admin"), entry.id, Some("x"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::KeyNotFound("history entry not exists".to_string())
    );
}

#[tokio::test]
async fn verify_ledger_replays_history() {
    let school = school().await;
    let engine = &school.engine;
    let anna = school.student.id;

    engine
        .apply_payment(&ctx(), PaymentCmd::new(anna, 10, 20000))
        .await
        .unwrap();
    engine
        .redistribute(
            &ctx(),
            anna,
            &[engine::Allocation::new(school.group.id).lessons(4)],
        )
        .await
        .unwrap();
    assert!(engine.verify_ledger(&ctx(), anna).await.unwrap().is_empty());

    // A write that bypasses the ledger is caught.
    school
        .db
        .execute(Statement::from_sql_and_values(
            school.db.get_database_backend(),
            "UPDATE students SET lessons_balance = lessons_balance + 1 WHERE id = ?",
            vec![anna.to_string().into()],
        ))
        .await
        .unwrap();

    let discrepancies = engine.verify_ledger(&ctx(), anna).await.unwrap();
    assert_eq!(discrepancies.len(), 1);
    assert_eq!(discrepancies[0].field, BalanceField::LessonsBalance);
    assert_eq!(
        discrepancies[0].kind,
        DiscrepancyKind::LiveMismatch {
            replayed: 6,
            live: 7
        }
    );
}

#[tokio::test]
async fn verify_ledger_flags_bad_rows() {
    let (engine, db) = engine_with_db().await;
    let anna = student(&engine, "Anna").await;
    let target = BalanceTarget::Student {
        student_id: anna.id,
    };
    engine
        .set_balance(&ctx(), target, BalanceField::LessonsBalance, 5, None)
        .await
        .unwrap();
    let second = engine
        .set_balance(&ctx(), target, BalanceField::LessonsBalance, 7, None)
        .await
        .unwrap()
        .unwrap();

    db.execute(Statement::from_sql_and_values(
        db.get_database_backend(),
        "UPDATE financial_history SET balance_before = 4 WHERE id = ?",
        vec![second.id.into()],
    ))
    .await
    .unwrap();

    let kinds: Vec<DiscrepancyKind> = engine
        .verify_ledger(&ctx(), anna.id)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            DiscrepancyKind::Arithmetic {
                entry_id: second.id
            },
            DiscrepancyKind::BrokenChain {
                entry_id: second.id,
                expected_before: 5,
                balance_before: 4
            },
        ]
    );
}

#[tokio::test]
async fn other_organizations_see_nothing() {
    let (engine, _db) = engine_with_db().await;
    let anna = student(&engine, "Anna").await;
    let stranger = Ctx::system("org-2");
    assert_ne!(stranger.organization_id, ORG);

    assert_eq!(
        engine.student(&stranger, anna.id).await.unwrap_err(),
        EngineError::KeyNotFound("student not exists".to_string())
    );
    assert_eq!(
        engine
            .get_ledger_history(&stranger, anna.id, &HistoryFilter::default())
            .await
            .unwrap_err(),
        EngineError::KeyNotFound("student not exists".to_string())
    );
    let err = engine
        .set_balance(
            &stranger,
            BalanceTarget::Student {
                student_id: anna.id,
            },
            BalanceField::LessonsBalance,
            3,
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::KeyNotFound("student not exists".to_string())
    );
}
