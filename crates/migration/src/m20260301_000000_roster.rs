//! Roster and calendar tables:
//!
//! - `students`: learners with their unallocated balances
//! - `groups`: recurring classes with a weekly schedule
//! - `student_groups`: enrollments with their allocated balances
//! - `lessons`: concrete group meetings
//! - `attendances`: one row per student per lesson, plus makeups

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
pub(crate) enum Students {
    Table,
    Id,
    OrganizationId,
    Name,
    Login,
    BirthDate,
    LessonsBalance,
    TotalLessons,
    TotalPayments,
    CreatedAt,
}

#[derive(Iden)]
pub(crate) enum Groups {
    Table,
    Id,
    OrganizationId,
    Name,
    NameNorm,
    Course,
    Location,
    Schedule,
    StartDate,
    LessonCount,
    MaxStudents,
    CreatedAt,
}

#[derive(Iden)]
enum StudentGroups {
    Table,
    StudentId,
    GroupId,
    OrganizationId,
    Status,
    LessonsBalance,
    TotalLessons,
    TotalPayments,
    JoinedAt,
}

#[derive(Iden)]
enum Lessons {
    Table,
    Id,
    OrganizationId,
    GroupId,
    Date,
    Time,
    Status,
}

#[derive(Iden)]
enum Attendances {
    Table,
    Id,
    OrganizationId,
    StudentId,
    LessonId,
    Status,
    StudentStatus,
    Comment,
    MissedAttendanceId,
    ChargedLessons,
    ChargedGroupId,
    MakeupCredited,
    MakeupCreditGroupId,
    CreatedAt,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Students::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Students::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Students::OrganizationId).string().not_null())
                    .col(ColumnDef::new(Students::Name).string().not_null())
                    .col(ColumnDef::new(Students::Login).string())
                    .col(ColumnDef::new(Students::BirthDate).date())
                    .col(
                        ColumnDef::new(Students::LessonsBalance)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Students::TotalLessons)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Students::TotalPayments)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Students::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-students-organization_id")
                    .table(Students::Table)
                    .col(Students::OrganizationId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Groups::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Groups::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Groups::OrganizationId).string().not_null())
                    .col(ColumnDef::new(Groups::Name).string().not_null())
                    .col(ColumnDef::new(Groups::NameNorm).string().not_null())
                    .col(ColumnDef::new(Groups::Course).string().not_null())
                    .col(ColumnDef::new(Groups::Location).string())
                    .col(ColumnDef::new(Groups::Schedule).json().not_null())
                    .col(ColumnDef::new(Groups::StartDate).date().not_null())
                    .col(ColumnDef::new(Groups::LessonCount).integer().not_null())
                    .col(ColumnDef::new(Groups::MaxStudents).integer().not_null())
                    .col(
                        ColumnDef::new(Groups::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uidx-groups-organization_id-name_norm")
                    .table(Groups::Table)
                    .col(Groups::OrganizationId)
                    .col(Groups::NameNorm)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(StudentGroups::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(StudentGroups::StudentId).string().not_null())
                    .col(ColumnDef::new(StudentGroups::GroupId).string().not_null())
                    .col(
                        ColumnDef::new(StudentGroups::OrganizationId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(StudentGroups::Status).string().not_null())
                    .col(
                        ColumnDef::new(StudentGroups::LessonsBalance)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(StudentGroups::TotalLessons)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(StudentGroups::TotalPayments)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(StudentGroups::JoinedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(StudentGroups::StudentId)
                            .col(StudentGroups::GroupId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-student_groups-student_id")
                            .from(StudentGroups::Table, StudentGroups::StudentId)
                            .to(Students::Table, Students::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-student_groups-group_id")
                            .from(StudentGroups::Table, StudentGroups::GroupId)
                            .to(Groups::Table, Groups::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-student_groups-group_id")
                    .table(StudentGroups::Table)
                    .col(StudentGroups::GroupId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Lessons::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Lessons::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Lessons::OrganizationId).string().not_null())
                    .col(ColumnDef::new(Lessons::GroupId).string().not_null())
                    .col(ColumnDef::new(Lessons::Date).date().not_null())
                    .col(ColumnDef::new(Lessons::Time).string().not_null())
                    .col(ColumnDef::new(Lessons::Status).string().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-lessons-group_id")
                            .from(Lessons::Table, Lessons::GroupId)
                            .to(Groups::Table, Groups::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uidx-lessons-group_id-date-time")
                    .table(Lessons::Table)
                    .col(Lessons::GroupId)
                    .col(Lessons::Date)
                    .col(Lessons::Time)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Attendances::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Attendances::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Attendances::OrganizationId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Attendances::StudentId).string().not_null())
                    .col(ColumnDef::new(Attendances::LessonId).string().not_null())
                    .col(ColumnDef::new(Attendances::Status).string().not_null())
                    .col(
                        ColumnDef::new(Attendances::StudentStatus)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Attendances::Comment).string())
                    .col(ColumnDef::new(Attendances::MissedAttendanceId).string())
                    .col(
                        ColumnDef::new(Attendances::ChargedLessons)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Attendances::ChargedGroupId).string())
                    .col(
                        ColumnDef::new(Attendances::MakeupCredited)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Attendances::MakeupCreditGroupId).string())
                    .col(
                        ColumnDef::new(Attendances::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-attendances-student_id")
                            .from(Attendances::Table, Attendances::StudentId)
                            .to(Students::Table, Students::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-attendances-lesson_id")
                            .from(Attendances::Table, Attendances::LessonId)
                            .to(Lessons::Table, Lessons::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    // No cascade: the link is cleared explicitly before the
                    // missed attendance is deleted.
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-attendances-missed_attendance_id")
                            .from(Attendances::Table, Attendances::MissedAttendanceId)
                            .to(Attendances::Table, Attendances::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uidx-attendances-student_id-lesson_id")
                    .table(Attendances::Table)
                    .col(Attendances::StudentId)
                    .col(Attendances::LessonId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uidx-attendances-missed_attendance_id")
                    .table(Attendances::Table)
                    .col(Attendances::MissedAttendanceId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-attendances-lesson_id")
                    .table(Attendances::Table)
                    .col(Attendances::LessonId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Attendances::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Lessons::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(StudentGroups::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Groups::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Students::Table).to_owned())
            .await?;
        Ok(())
    }
}
