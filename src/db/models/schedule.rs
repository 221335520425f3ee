use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// Directory Models (`faculties`, `groups` tables)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Faculty {
    pub id: i64,
    pub name: String,
    pub abbr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub faculty_id: i64,
}

// ============================================================================
// Timetable Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub subject: String,
    pub time_start: String,
    pub time_end: String,
    pub lesson_type: String,
    pub teacher: String,
    pub group: String,
    pub auditory: String,
    pub building: String,
    pub place: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Day {
    pub date: String,
    pub weekday: String,
    pub lessons: Vec<Lesson>,
}

/// The group a week of lessons was fetched for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekInfo {
    pub date_start: String,
    pub date_end: String,
    pub is_odd: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Week {
    pub group: GroupInfo,
    pub week: WeekInfo,
    pub days: Vec<Day>,
}

impl Week {
    pub fn lesson_count(&self) -> usize {
        self.days.iter().map(|d| d.lessons.len()).sum()
    }
}

/// Consecutive weeks of one group's timetable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemesterSchedule {
    pub group: Option<GroupInfo>,
    pub weeks: Vec<Week>,
    pub start_date: String,
    pub end_date: String,
}

impl SemesterSchedule {
    /// Build a schedule from the fetched weeks. With no weeks both bounds fall
    /// back to the requested seed date.
    pub fn from_weeks(weeks: Vec<Week>, requested_start: NaiveDate) -> Self {
        let seed = requested_start.format("%Y-%m-%d").to_string();
        let start_date = weeks
            .first()
            .map(|w| w.week.date_start.clone())
            .unwrap_or_else(|| seed.clone());
        let end_date = weeks
            .last()
            .map(|w| w.week.date_end.clone())
            .unwrap_or(seed);

        SemesterSchedule {
            group: weeks.first().map(|w| w.group.clone()),
            weeks,
            start_date,
            end_date,
        }
    }

    pub fn lesson_count(&self) -> usize {
        self.weeks.iter().map(Week::lesson_count).sum()
    }

    /// Flatten into persisted rows in week, day, lesson order.
    pub fn lesson_records(&self, group_id: i64) -> Vec<LessonRecord> {
        self.weeks
            .iter()
            .flat_map(|week| week.days.iter())
            .flat_map(|day| {
                day.lessons.iter().map(move |lesson| LessonRecord {
                    group_id,
                    date: day.date.clone(),
                    weekday: day.weekday.clone(),
                    subject: lesson.subject.clone(),
                    lesson_type: lesson.lesson_type.clone(),
                    start_time: lesson.time_start.clone(),
                    end_time: lesson.time_end.clone(),
                    teacher: lesson.teacher.clone(),
                    group_name: lesson.group.clone(),
                    auditory: lesson.auditory.clone(),
                    building: lesson.building.clone(),
                    place: lesson.place.clone(),
                })
            })
            .collect()
    }
}

/// A lesson as stored in the `schedule` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct LessonRecord {
    pub group_id: i64,
    pub date: String,
    pub weekday: String,
    pub subject: String,
    pub lesson_type: String,
    pub start_time: String,
    pub end_time: String,
    pub teacher: String,
    pub group_name: String,
    pub auditory: String,
    pub building: String,
    pub place: Option<String>,
}
