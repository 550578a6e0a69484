#![allow(dead_code)]

use chrono::NaiveDate;
use sea_orm::{Database, DatabaseConnection};

use engine::{
    Ctx, Engine, EnrollmentStatus, Group, Lesson, NewGroupCmd, NewStudentCmd, ScheduleSlot,
    Student,
};
use migration::MigratorTrait;

pub const ORG: &str = "org-1";

pub async fn engine_with_db() -> (Engine, DatabaseConnection) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let engine = Engine::builder()
        .database(db.clone())
        .timezone(chrono_tz::Europe::Rome)
        .build()
        .await
        .unwrap();
    (engine, db)
}

pub fn ctx() -> Ctx {
    Ctx::new(ORG, "admin")
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A Monday far enough ahead that every generated lesson is upcoming.
pub fn first_monday() -> NaiveDate {
    date(2099, 1, 5)
}

pub async fn student(engine: &Engine, name: &str) -> Student {
    engine
        .create_student(&ctx(), NewStudentCmd::new(name))
        .await
        .unwrap()
}

/// A weekly Monday 10:00 group with `lesson_count` lessons.
pub async fn group(engine: &Engine, name: &str, lesson_count: u32) -> Group {
    engine
        .create_group(
            &ctx(),
            NewGroupCmd::new(name, "Piano", first_monday(), lesson_count)
                .slot(ScheduleSlot::parse(1, "10:00").unwrap()),
        )
        .await
        .unwrap()
}

pub struct School {
    pub engine: Engine,
    pub db: DatabaseConnection,
    pub student: Student,
    pub group: Group,
    pub lessons: Vec<Lesson>,
}

/// One student enrolled (active) in one four-lesson group.
pub async fn school() -> School {
    let (engine, db) = engine_with_db().await;
    let student = student(&engine, "Anna Rossi").await;
    let group = group(&engine, "Piano A", 4).await;
    engine
        .enroll_student(&ctx(), student.id, group.id, EnrollmentStatus::Active)
        .await
        .unwrap();
    let lessons = engine.lessons_for_group(&ctx(), group.id).await.unwrap();
    School {
        engine,
        db,
        student,
        group,
        lessons,
    }
}
