//! Command structs for engine operations.
//!
//! These types group parameters for write operations (roster, attendance,
//! payments, redistribution), keeping call sites readable and avoiding long
//! argument lists.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::{AttendanceStatus, ScheduleSlot, StudentStatus};

/// Create a student.
#[derive(Clone, Debug)]
pub struct NewStudentCmd {
    pub name: String,
    pub login: Option<String>,
    pub birth_date: Option<NaiveDate>,
}

impl NewStudentCmd {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            login: None,
            birth_date: None,
        }
    }

    #[must_use]
    pub fn login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }

    #[must_use]
    pub fn birth_date(mut self, birth_date: NaiveDate) -> Self {
        self.birth_date = Some(birth_date);
        self
    }
}

/// Create a group and its generated lessons.
#[derive(Clone, Debug)]
pub struct NewGroupCmd {
    pub name: String,
    pub course: String,
    pub location: Option<String>,
    pub schedule: Vec<ScheduleSlot>,
    pub start_date: NaiveDate,
    pub lesson_count: u32,
    pub max_students: u32,
}

impl NewGroupCmd {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        course: impl Into<String>,
        start_date: NaiveDate,
        lesson_count: u32,
    ) -> Self {
        Self {
            name: name.into(),
            course: course.into(),
            location: None,
            schedule: Vec::new(),
            start_date,
            lesson_count,
            max_students: 12,
        }
    }

    #[must_use]
    pub fn slot(mut self, slot: ScheduleSlot) -> Self {
        self.schedule.push(slot);
        self
    }

    #[must_use]
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    #[must_use]
    pub fn max_students(mut self, max_students: u32) -> Self {
        self.max_students = max_students;
        self
    }
}

/// Record (or update) a student's attendance on a lesson.
#[derive(Clone, Debug)]
pub struct RecordAttendanceCmd {
    pub student_id: Uuid,
    pub lesson_id: Uuid,
    pub status: AttendanceStatus,
    /// Defaults to the enrollment's standing when the row is created.
    pub student_status: Option<StudentStatus>,
    pub comment: Option<String>,
}

impl RecordAttendanceCmd {
    #[must_use]
    pub fn new(student_id: Uuid, lesson_id: Uuid, status: AttendanceStatus) -> Self {
        Self {
            student_id,
            lesson_id,
            status,
            student_status: None,
            comment: None,
        }
    }

    #[must_use]
    pub fn student_status(mut self, student_status: StudentStatus) -> Self {
        self.student_status = Some(student_status);
        self
    }

    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Register a payment.
#[derive(Clone, Debug)]
pub struct PaymentCmd {
    pub student_id: Uuid,
    /// Pay straight into an enrollment instead of the unallocated balance.
    pub group_id: Option<Uuid>,
    pub lesson_count: i64,
    /// Minor units.
    pub price: i64,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
}

impl PaymentCmd {
    #[must_use]
    pub fn new(student_id: Uuid, lesson_count: i64, price: i64) -> Self {
        Self {
            student_id,
            group_id: None,
            lesson_count,
            price,
            description: None,
            idempotency_key: None,
        }
    }

    #[must_use]
    pub fn group_id(mut self, group_id: Uuid) -> Self {
        self.group_id = Some(group_id);
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Amounts to move from the unallocated balance into one enrollment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub group_id: Uuid,
    pub lessons: i64,
    pub total_lessons: i64,
    pub total_payments: i64,
}

impl Allocation {
    #[must_use]
    pub fn new(group_id: Uuid) -> Self {
        Self {
            group_id,
            lessons: 0,
            total_lessons: 0,
            total_payments: 0,
        }
    }

    #[must_use]
    pub fn lessons(mut self, lessons: i64) -> Self {
        self.lessons = lessons;
        self
    }

    #[must_use]
    pub fn total_lessons(mut self, total_lessons: i64) -> Self {
        self.total_lessons = total_lessons;
        self
    }

    #[must_use]
    pub fn total_payments(mut self, total_payments: i64) -> Self {
        self.total_payments = total_payments;
        self
    }
}
