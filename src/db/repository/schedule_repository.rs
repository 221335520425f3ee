#[cfg(test)]
use sqlx::sqlite::SqliteConnection;

use crate::db::models::LessonRecord;
use crate::db::repository::reconciler::{NaturalKey, SqlValue};
#[cfg(test)]
use crate::error::{SyncError, SyncResult};

impl NaturalKey for LessonRecord {
    const TABLE: &'static str = "schedule";
    const KEY_COLUMNS: &'static [&'static str] =
        &["group_id", "date", "start_time", "end_time", "subject"];
    const VALUE_COLUMNS: &'static [&'static str] = &[
        "weekday",
        "lesson_type",
        "teacher",
        "group_name",
        "auditory",
        "building",
        "place",
    ];

    fn key_values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Int(self.group_id),
            SqlValue::Text(self.date.clone()),
            SqlValue::Text(self.start_time.clone()),
            SqlValue::Text(self.end_time.clone()),
            SqlValue::Text(self.subject.clone()),
        ]
    }

    fn non_key_values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.weekday.clone()),
            SqlValue::Text(self.lesson_type.clone()),
            SqlValue::Text(self.teacher.clone()),
            SqlValue::Text(self.group_name.clone()),
            SqlValue::Text(self.auditory.clone()),
            SqlValue::Text(self.building.clone()),
            SqlValue::NullableText(self.place.clone()),
        ]
    }
}

/// Read access to the `schedule` table for assertions. Writes go through the
/// reconciler.
#[cfg(test)]
pub struct ScheduleRepository;

#[cfg(test)]
impl ScheduleRepository {
    pub async fn find_for_group(
        conn: &mut SqliteConnection,
        group_id: i64,
    ) -> SyncResult<Vec<LessonRecord>> {
        sqlx::query_as::<_, LessonRecord>(
            r#"
            SELECT group_id, date, weekday, subject, lesson_type, start_time, end_time,
                   teacher, group_name, auditory, building, place
            FROM schedule
            WHERE group_id = ?
            ORDER BY date, start_time, subject
            "#,
        )
        .bind(group_id)
        .fetch_all(conn)
        .await
        .map_err(SyncError::Database)
    }

    pub async fn count(conn: &mut SqliteConnection) -> SyncResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM schedule")
            .fetch_one(conn)
            .await
            .map_err(SyncError::Database)
    }
}
