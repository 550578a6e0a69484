mod common;

use common::{School, ctx, group, school};
use engine::{
    Allocation, BalanceField, Balances, EngineError, EnrollmentStatus, Group, HistoryFilter,
    LedgerReason, PaymentCmd,
};

/// The fixture student enrolled in a second group, with 10 unallocated
/// lessons worth 20000.
async fn two_groups() -> (School, Group) {
    let school = school().await;
    let second = group(&school.engine, "Piano B", 4).await;
    school
        .engine
        .enroll_student(&ctx(), school.student.id, second.id, EnrollmentStatus::Active)
        .await
        .unwrap();
    school
        .engine
        .apply_payment(&ctx(), PaymentCmd::new(school.student.id, 10, 20000))
        .await
        .unwrap();
    (school, second)
}

async fn allocated(school: &School, group: &Group) -> Balances {
    school
        .engine
        .enrollment(&ctx(), school.student.id, group.id)
        .await
        .unwrap()
        .balances
}

async fn unallocated(school: &School) -> Balances {
    school
        .engine
        .student(&ctx(), school.student.id)
        .await
        .unwrap()
        .balances
}

#[tokio::test]
async fn ten_lessons_split_four_and_three() {
    let (school, second) = two_groups().await;
    let first = school.group.clone();

    let result = school
        .engine
        .redistribute(
            &ctx(),
            school.student.id,
            &[
                Allocation::new(first.id).lessons(4),
                Allocation::new(second.id).lessons(3),
            ],
        )
        .await
        .unwrap();

    assert_eq!(unallocated(&school).await.lessons_balance, 3);
    assert_eq!(allocated(&school, &first).await.lessons_balance, 4);
    assert_eq!(allocated(&school, &second).await.lessons_balance, 3);

    // One increment per group allocation...
    let credited = school
        .engine
        .get_ledger_history(
            &ctx(),
            school.student.id,
            &HistoryFilter::default().reason(LedgerReason::BalanceRedistributed),
        )
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.target.group_id().is_some())
        .collect::<Vec<_>>();
    assert_eq!(credited.len(), 2);
    assert_eq!(
        credited.iter().map(|e| e.delta).collect::<Vec<_>>(),
        vec![4, 3]
    );

    // ...each mirrored by a decrement of the unallocated pool.
    assert_eq!(result.entries.len(), 4);
    let debited: i64 = result
        .entries
        .iter()
        .filter(|e| e.target.group_id().is_none())
        .map(|e| e.delta)
        .sum();
    assert_eq!(debited, -7);
    for entry in &result.entries {
        assert_eq!(entry.reason, LedgerReason::BalanceRedistributed);
        assert_eq!(
            entry.metadata,
            Some(serde_json::json!({ "redistribution_id": result.id }))
        );
    }
    assert!(
        school
            .engine
            .verify_ledger(&ctx(), school.student.id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn totals_are_conserved_across_pools() {
    let (school, second) = two_groups().await;
    let first = school.group.clone();

    school
        .engine
        .redistribute(
            &ctx(),
            school.student.id,
            &[
                Allocation::new(first.id)
                    .lessons(5)
                    .total_lessons(5)
                    .total_payments(10000),
                Allocation::new(second.id)
                    .lessons(5)
                    .total_lessons(5)
                    .total_payments(10000),
            ],
        )
        .await
        .unwrap();

    let pools = [
        unallocated(&school).await,
        allocated(&school, &first).await,
        allocated(&school, &second).await,
    ];
    for field in BalanceField::ALL {
        let total: i64 = pools.iter().map(|b| b.get(field)).sum();
        let expected = if field == BalanceField::TotalPayments {
            20000
        } else {
            10
        };
        assert_eq!(total, expected, "{field}");
    }
    assert_eq!(unallocated(&school).await, Balances::default());
}

#[tokio::test]
async fn over_allocation_changes_nothing() {
    let (school, second) = two_groups().await;
    let first = school.group.clone();
    let rows_before = school
        .engine
        .get_ledger_history(&ctx(), school.student.id, &HistoryFilter::default())
        .await
        .unwrap()
        .len();

    let err = school
        .engine
        .redistribute(
            &ctx(),
            school.student.id,
            &[
                Allocation::new(first.id).lessons(6),
                Allocation::new(second.id).lessons(5),
            ],
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::Validation(
            "cannot allocate 11 LESSONS_BALANCE: only 10 unallocated".to_string()
        )
    );

    assert_eq!(unallocated(&school).await.lessons_balance, 10);
    assert_eq!(allocated(&school, &first).await, Balances::default());
    assert_eq!(allocated(&school, &second).await, Balances::default());
    let rows_after = school
        .engine
        .get_ledger_history(&ctx(), school.student.id, &HistoryFilter::default())
        .await
        .unwrap()
        .len();
    assert_eq!(rows_before, rows_after);
}

#[tokio::test]
async fn only_enrolled_groups_can_receive() {
    let (school, _second) = two_groups().await;
    let elsewhere = group(&school.engine, "Violin", 2).await;

    let err = school
        .engine
        .redistribute(
            &ctx(),
            school.student.id,
            &[
                Allocation::new(school.group.id).lessons(1),
                Allocation::new(elsewhere.id).lessons(1),
            ],
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::Validation(format!("student is not enrolled in group {}", elsewhere.id))
    );
    assert_eq!(unallocated(&school).await.lessons_balance, 10);
}

#[tokio::test]
async fn dismissed_enrollments_keep_their_balance() {
    let (school, second) = two_groups().await;
    school
        .engine
        .redistribute(
            &ctx(),
            school.student.id,
            &[Allocation::new(second.id).lessons(2)],
        )
        .await
        .unwrap();

    let dismissed = school
        .engine
        .set_enrollment_status(
            &ctx(),
            school.student.id,
            second.id,
            EnrollmentStatus::Dismissed,
        )
        .await
        .unwrap();
    assert!(dismissed.is_dismissed());
    assert_eq!(dismissed.balances.lessons_balance, 2);

    let enrollments = school
        .engine
        .enrollments_for_student(&ctx(), school.student.id)
        .await
        .unwrap();
    assert_eq!(enrollments.len(), 2);
}

#[tokio::test]
async fn dismissed_enrollments_take_no_new_money() {
    let (school, second) = two_groups().await;
    school
        .engine
        .redistribute(
            &ctx(),
            school.student.id,
            &[Allocation::new(second.id).lessons(2)],
        )
        .await
        .unwrap();
    school
        .engine
        .set_enrollment_status(
            &ctx(),
            school.student.id,
            second.id,
            EnrollmentStatus::Dismissed,
        )
        .await
        .unwrap();
    let dismissed_error =
        EngineError::Validation(format!("student was dismissed from group {}", second.id));

    let err = school
        .engine
        .redistribute(
            &ctx(),
            school.student.id,
            &[Allocation::new(second.id).lessons(3)],
        )
        .await
        .unwrap_err();
    assert_eq!(err, dismissed_error);

    let err = school
        .engine
        .apply_payment(
            &ctx(),
            PaymentCmd::new(school.student.id, 5, 10000).group_id(second.id),
        )
        .await
        .unwrap_err();
    assert_eq!(err, dismissed_error);

    assert_eq!(allocated(&school, &second).await.lessons_balance, 2);
    assert_eq!(unallocated(&school).await.lessons_balance, 8);
}
