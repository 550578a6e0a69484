//! Lesson ledger engine.
//!
//! Roster, lesson calendar, attendance state machine and the student
//! financial ledger of a multi-tenant school. Every operation is a method on
//! [`Engine`], runs in one database transaction and is scoped to the
//! organization of the [`Ctx`] it receives.

pub use attendances::{Attendance, AttendanceStatus, StudentStatus};
pub use commands::{Allocation, NewGroupCmd, NewStudentCmd, PaymentCmd, RecordAttendanceCmd};
pub use context::Ctx;
pub use error::EngineError;
pub use groups::Group;
pub use history::{GroupScope, HistoryFilter, LedgerEntry};
pub use ledger::{BalanceChange, BalanceField, BalanceTarget, Balances, LedgerReason};
pub use lessons::{Lesson, LessonStatus};
pub use ops::{Discrepancy, DiscrepancyKind, Engine, EngineBuilder, Redistribution};
pub use payments::Payment;
pub use schedule::{
    MAX_LESSON_COUNT, ScheduleSlot, ScheduledLesson, business_date, generate_schedule,
    parse_timezone,
};
pub use student_groups::{Enrollment, EnrollmentStatus};
pub use students::Student;

mod attendances;
mod commands;
mod context;
mod error;
mod groups;
mod history;
mod ledger;
mod lessons;
mod ops;
mod payments;
mod schedule;
mod student_groups;
mod students;
mod util;

type ResultEngine<T> = Result<T, EngineError>;
