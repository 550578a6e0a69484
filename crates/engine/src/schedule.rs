//! Weekly lesson schedule generation.
//!
//! A group meets on one or more weekdays, each at a fixed local time. The
//! generator turns that pattern into concrete calendar dates. Dates are plain
//! calendar days (`NaiveDate`): a lesson on 2026-01-05 is on 2026-01-05 for
//! every reader, whatever their clock says. The business timezone is only
//! needed to decide what "today" is and to localize a lesson for display.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{EngineError, ResultEngine};

const TIME_FORMAT: &str = "%H:%M";

/// Upper bound for the lessons a single schedule may generate.
pub const MAX_LESSON_COUNT: u32 = 1_000;

/// One weekly meeting: a weekday (0 = Sunday … 6 = Saturday) and a time.
///
/// Deserialization goes through [`ScheduleSlot::parse`], so a stored or
/// submitted slot with an out-of-range weekday is rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSlot")]
pub struct ScheduleSlot {
    pub day_of_week: u8,
    #[serde(serialize_with = "hhmm::serialize")]
    pub time: NaiveTime,
}

impl ScheduleSlot {
    pub fn new(day_of_week: u8, time: NaiveTime) -> ResultEngine<Self> {
        if day_of_week > 6 {
            return Err(EngineError::Validation(format!(
                "invalid day of week {day_of_week}: expected 0 (Sunday) to 6 (Saturday)"
            )));
        }
        Ok(Self { day_of_week, time })
    }

    /// Parse a slot from its wire form (`day_of_week`, `"HH:MM"`).
    pub fn parse(day_of_week: u8, time: &str) -> ResultEngine<Self> {
        Self::new(day_of_week, parse_time(time)?)
    }

    pub fn time_label(&self) -> String {
        self.time.format(TIME_FORMAT).to_string()
    }

    /// Re-check a slot that may have been built field by field.
    pub fn validate(&self) -> ResultEngine<()> {
        Self::new(self.day_of_week, self.time).map(|_| ())
    }
}

#[derive(Deserialize)]
struct RawSlot {
    day_of_week: u8,
    time: String,
}

impl TryFrom<RawSlot> for ScheduleSlot {
    type Error = EngineError;

    fn try_from(raw: RawSlot) -> Result<Self, Self::Error> {
        Self::parse(raw.day_of_week, &raw.time)
    }
}

/// A generated lesson occurrence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledLesson {
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
}

impl ScheduledLesson {
    pub fn time_label(&self) -> String {
        self.time.format(TIME_FORMAT).to_string()
    }

    /// The lesson start as an instant in the business timezone.
    ///
    /// `None` when the local time does not exist (DST gap).
    pub fn starts_at(&self, tz: Tz) -> Option<DateTime<Tz>> {
        tz.from_local_datetime(&self.date.and_time(self.time))
            .earliest()
    }
}

/// Generates up to `lesson_count` lessons following `pattern`, starting on
/// `start_date` (inclusive).
///
/// If a weekday appears more than once in the pattern, its first entry wins;
/// slots with a weekday outside 0..=6 are ignored. The walk is bounded to
/// `lesson_count * 7 + 7` days, so a pattern that can never produce enough
/// lessons (e.g. an empty one) yields a shorter sequence instead of looping;
/// callers decide whether that is acceptable.
pub fn generate_schedule(
    pattern: &[ScheduleSlot],
    start_date: NaiveDate,
    lesson_count: u32,
) -> Vec<ScheduledLesson> {
    let mut by_weekday: [Option<NaiveTime>; 7] = [None; 7];
    for slot in pattern {
        if let Some(entry) = by_weekday.get_mut(usize::from(slot.day_of_week)) {
            if entry.is_none() {
                *entry = Some(slot.time);
            }
        }
    }
    if by_weekday.iter().all(Option::is_none) {
        return Vec::new();
    }

    let target = lesson_count as usize;
    let max_days = u64::from(lesson_count) * 7 + 7;
    let mut lessons = Vec::new();
    let mut date = start_date;

    for _ in 0..max_days {
        if lessons.len() >= target {
            break;
        }
        let weekday = date.weekday().num_days_from_sunday() as usize;
        if let Some(time) = by_weekday[weekday] {
            lessons.push(ScheduledLesson { date, time });
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }

    lessons
}

/// Calendar date of `instant` in the business timezone.
pub fn business_date(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// Parse an IANA timezone name (e.g. `Europe/Rome`).
pub fn parse_timezone(name: &str) -> ResultEngine<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| EngineError::Validation(format!("unknown timezone: {name}")))
}

pub(crate) fn parse_time(raw: &str) -> ResultEngine<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), TIME_FORMAT)
        .map_err(|_| EngineError::Validation(format!("invalid time {raw:?}: expected HH:MM")))
}

pub(crate) fn format_time(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_time(*time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_time(&raw).map_err(D::Error::custom)
    }
}
