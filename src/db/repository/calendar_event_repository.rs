#[cfg(test)]
use sqlx::sqlite::SqliteConnection;

use crate::db::models::CalendarEvent;
use crate::db::repository::reconciler::{NaturalKey, SqlValue};
#[cfg(test)]
use crate::error::{SyncError, SyncResult};

impl NaturalKey for CalendarEvent {
    const TABLE: &'static str = "calendar_events";
    const KEY_COLUMNS: &'static [&'static str] =
        &["title", "date", "start_time", "end_time", "calendar_name"];
    const VALUE_COLUMNS: &'static [&'static str] = &["description", "location", "creator"];

    fn key_values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.title.clone()),
            SqlValue::Text(self.date.clone()),
            SqlValue::Text(self.start_time.clone()),
            SqlValue::Text(self.end_time.clone()),
            SqlValue::Text(self.calendar_name.clone()),
        ]
    }

    fn non_key_values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.description.clone()),
            SqlValue::Text(self.location.clone()),
            SqlValue::Text(self.creator.clone()),
        ]
    }
}

/// Read access to the `calendar_events` table for assertions. Writes go
/// through the reconciler.
#[cfg(test)]
pub struct CalendarEventRepository;

#[cfg(test)]
impl CalendarEventRepository {
    /// All events ordered by date, start time and calendar.
    pub async fn find_all(conn: &mut SqliteConnection) -> SyncResult<Vec<CalendarEvent>> {
        sqlx::query_as::<_, CalendarEvent>(
            r#"
            SELECT title, description, date, start_time, end_time, location, creator, calendar_name
            FROM calendar_events
            ORDER BY date, start_time, calendar_name, id
            "#,
        )
        .fetch_all(conn)
        .await
        .map_err(SyncError::Database)
    }
}
