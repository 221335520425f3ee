use sqlx::sqlite::SqliteConnection;
use sqlx::FromRow;
use tracing::{info, warn};

use crate::db::repository::reconciler::{quote_ident, NaturalKey};
use crate::error::{SyncError, SyncResult};

/// Tables a sync run writes to.
pub const REQUIRED_TABLES: &[&str] = &["calendar_events", "faculties", "groups", "schedule"];

/// Names from `tables` that do not exist in the store.
pub async fn missing_tables(
    conn: &mut SqliteConnection,
    tables: &[&str],
) -> SyncResult<Vec<String>> {
    let existing =
        sqlx::query_scalar::<_, String>("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(conn)
            .await
            .map_err(SyncError::Database)?;

    Ok(tables
        .iter()
        .filter(|t| !existing.iter().any(|e| e == *t))
        .map(|t| t.to_string())
        .collect())
}

/// Fail with [`SyncError::MissingTables`] unless every required table exists.
pub async fn check_required_tables(conn: &mut SqliteConnection) -> SyncResult<()> {
    let missing = missing_tables(conn, REQUIRED_TABLES).await?;
    if missing.is_empty() {
        info!("All required tables are present");
        Ok(())
    } else {
        Err(SyncError::MissingTables(missing))
    }
}

/// Delete every row of `R::TABLE` except the lowest `id` per natural key.
/// Returns the number of rows removed.
pub async fn remove_duplicates<R: NaturalKey>(conn: &mut SqliteConnection) -> SyncResult<u64> {
    let table = quote_ident(R::TABLE);
    let keys = R::KEY_COLUMNS
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        "DELETE FROM {table} WHERE id NOT IN (SELECT MIN(id) FROM {table} GROUP BY {keys})"
    );
    let removed = sqlx::query(&sql)
        .execute(conn)
        .await
        .map_err(SyncError::Database)?
        .rows_affected();

    if removed > 0 {
        warn!("Removed {} duplicate rows from {}", removed, R::TABLE);
    }
    Ok(removed)
}

/// Create the unique natural-key index for `R::TABLE` if it is missing.
pub async fn ensure_unique_index<R: NaturalKey>(
    conn: &mut SqliteConnection,
    index_name: &str,
) -> SyncResult<()> {
    let keys = R::KEY_COLUMNS
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {}({})",
        quote_ident(index_name),
        quote_ident(R::TABLE),
        keys
    );
    sqlx::query(&sql)
        .execute(conn)
        .await
        .map_err(SyncError::Database)?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct GroupLessonCount {
    pub group_id: i64,
    pub group_name: String,
    pub lessons: i64,
}

/// Row counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub calendar_events: i64,
    pub faculties: i64,
    pub groups: i64,
    pub lessons: i64,
    pub groups_with_schedule: i64,
    /// Groups with the most stored lessons, largest first.
    pub busiest_groups: Vec<GroupLessonCount>,
}

async fn count_rows(conn: &mut SqliteConnection, table: &str) -> SyncResult<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    sqlx::query_scalar::<_, i64>(&sql)
        .fetch_one(conn)
        .await
        .map_err(SyncError::Database)
}

pub async fn collect_stats(
    conn: &mut SqliteConnection,
    busiest_limit: i64,
) -> SyncResult<StoreStats> {
    let calendar_events = count_rows(&mut *conn, "calendar_events").await?;
    let faculties = count_rows(&mut *conn, "faculties").await?;
    let groups = count_rows(&mut *conn, "groups").await?;
    let lessons = count_rows(&mut *conn, "schedule").await?;

    let groups_with_schedule =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(DISTINCT group_id) FROM schedule")
            .fetch_one(&mut *conn)
            .await
            .map_err(SyncError::Database)?;

    let busiest_groups = sqlx::query_as::<_, GroupLessonCount>(
        r#"
        SELECT s.group_id AS group_id,
               COALESCE(g.name, MAX(s.group_name)) AS group_name,
               COUNT(*) AS lessons
        FROM schedule s
        LEFT JOIN "groups" g ON g.id = s.group_id
        GROUP BY s.group_id
        ORDER BY lessons DESC, s.group_id
        LIMIT ?
        "#,
    )
    .bind(busiest_limit)
    .fetch_all(&mut *conn)
    .await
    .map_err(SyncError::Database)?;

    Ok(StoreStats {
        calendar_events,
        faculties,
        groups,
        lessons,
        groups_with_schedule,
        busiest_groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::testing::{manager, FlakyConnector};
    use crate::db::models::{CalendarEvent, LessonRecord};
    use crate::db::repository::reconciler::{reconcile, ReconcileOptions};
    use crate::services::init::run_migrations;

    #[tokio::test]
    async fn reports_missing_tables_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(FlakyConnector::new(dir.path().join("empty.db")));
        mgr.connect().await.unwrap();
        let conn = mgr.connection().unwrap();

        sqlx::query("CREATE TABLE faculties (id INTEGER PRIMARY KEY, name TEXT, abbr TEXT)")
            .execute(&mut *conn)
            .await
            .unwrap();

        let missing = missing_tables(conn, REQUIRED_TABLES).await.unwrap();
        assert_eq!(missing, vec!["calendar_events", "groups", "schedule"]);

        let err = check_required_tables(conn).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing required tables: calendar_events, groups, schedule"
        );
    }

    #[tokio::test]
    async fn sweep_keeps_lowest_id_then_index_blocks_new_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(FlakyConnector::new(dir.path().join("legacy.db")));
        mgr.connect().await.unwrap();
        let conn = mgr.connection().unwrap();

        // A legacy table without the unique index.
        sqlx::query(
            r#"
            CREATE TABLE calendar_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                date TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                location TEXT NOT NULL DEFAULT '',
                creator TEXT NOT NULL DEFAULT '',
                calendar_name TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .unwrap();

        for description in ["first", "second", "third"] {
            sqlx::query(
                "INSERT INTO calendar_events (title, description, date, start_time, end_time, calendar_name) \
                 VALUES ('Open day', ?, '2024-05-01', '10:00', '12:00', 'Events')",
            )
            .bind(description)
            .execute(&mut *conn)
            .await
            .unwrap();
        }
        sqlx::query(
            "INSERT INTO calendar_events (title, date, start_time, end_time, calendar_name) \
             VALUES ('Lecture', '2024-05-02', '10:00', '12:00', 'Events')",
        )
        .execute(&mut *conn)
        .await
        .unwrap();

        assert_eq!(remove_duplicates::<CalendarEvent>(conn).await.unwrap(), 2);
        assert_eq!(remove_duplicates::<CalendarEvent>(conn).await.unwrap(), 0);

        let kept: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, description FROM calendar_events ORDER BY id")
                .fetch_all(&mut *conn)
                .await
                .unwrap();
        assert_eq!(kept, vec![(1, "first".to_string()), (4, String::new())]);

        ensure_unique_index::<CalendarEvent>(conn, "unique_calendar_event")
            .await
            .unwrap();
        let dup = sqlx::query(
            "INSERT INTO calendar_events (title, date, start_time, end_time, calendar_name) \
             VALUES ('Lecture', '2024-05-02', '10:00', '12:00', 'Events')",
        )
        .execute(&mut *conn)
        .await
        .unwrap_err();
        assert!(crate::error::is_unique_violation(&dup));
    }

    #[tokio::test]
    async fn stats_count_tables_and_busiest_groups() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(FlakyConnector::new(dir.path().join("sync.db")));
        mgr.connect().await.unwrap();
        run_migrations(mgr.connection().unwrap()).await.unwrap();

        let lesson = |group_id: i64, subject: &str| LessonRecord {
            group_id,
            date: "2024-09-02".to_string(),
            weekday: "1".to_string(),
            subject: subject.to_string(),
            lesson_type: String::new(),
            start_time: "10:00".to_string(),
            end_time: "11:40".to_string(),
            teacher: String::new(),
            group_name: format!("group-{}", group_id),
            auditory: String::new(),
            building: String::new(),
            place: None,
        };
        let records = vec![lesson(1, "A"), lesson(2, "A"), lesson(2, "B")];
        reconcile(&mut mgr, &records, &ReconcileOptions::default()).await;

        let stats = collect_stats(mgr.connection().unwrap(), 10).await.unwrap();
        assert_eq!(stats.lessons, 3);
        assert_eq!(stats.groups_with_schedule, 2);
        assert_eq!(stats.calendar_events, 0);
        assert_eq!(stats.busiest_groups[0].group_id, 2);
        assert_eq!(stats.busiest_groups[0].group_name, "group-2");
        assert_eq!(stats.busiest_groups[0].lessons, 2);
    }
}
