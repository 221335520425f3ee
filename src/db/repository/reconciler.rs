use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnection};
use sqlx::Connection;
use tracing::{debug, info, warn};

use crate::db::connection::ConnectionManager;
use crate::error::{
    is_connection_error, is_lock_contention, is_unique_violation, SyncError, SyncResult,
};
use crate::services::retry::RetryPolicy;

/// A value bound into a reconcile statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Int(i64),
    Text(String),
    NullableText(Option<String>),
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlValue::Int(v) => write!(f, "{}", v),
            SqlValue::Text(v) => write!(f, "{}", v),
            SqlValue::NullableText(Some(v)) => write!(f, "{}", v),
            SqlValue::NullableText(None) => write!(f, "NULL"),
        }
    }
}

/// A record that can be upserted into `TABLE` by its natural key.
///
/// `key_values` and `non_key_values` must line up with `KEY_COLUMNS` and
/// `VALUE_COLUMNS`. The table needs a unique index over exactly the key
/// columns for the `ON CONFLICT` clause to apply.
pub trait NaturalKey {
    const TABLE: &'static str;
    const KEY_COLUMNS: &'static [&'static str];
    const VALUE_COLUMNS: &'static [&'static str];

    fn key_values(&self) -> Vec<SqlValue>;
    fn non_key_values(&self) -> Vec<SqlValue>;

    fn describe_key(&self) -> String {
        self.key_values()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Records per committed transaction.
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        ReconcileOptions {
            batch_size: 50,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of one reconcile call. Only committed batches are counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Natural key was new.
    pub inserted: usize,
    /// Natural key already stored; non-key fields refreshed.
    pub updated: usize,
    /// Upsert raced with another writer and hit a unique constraint.
    pub duplicates: usize,
    /// Rejected by the store for any other reason.
    pub rejected: usize,
    /// Stopped early because the connection could not be kept alive.
    pub interrupted: bool,
}

impl ReconcileStats {
    pub fn processed(&self) -> usize {
        self.inserted + self.updated + self.duplicates + self.rejected
    }

    pub fn merge(&mut self, other: ReconcileStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.duplicates += other.duplicates;
        self.rejected += other.rejected;
        self.interrupted |= other.interrupted;
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

struct Statements {
    exists: String,
    upsert: String,
}

impl Statements {
    fn for_record<R: NaturalKey>() -> Self {
        let table = quote_ident(R::TABLE);
        let keys: Vec<String> = R::KEY_COLUMNS.iter().map(|c| quote_ident(c)).collect();
        let values: Vec<String> = R::VALUE_COLUMNS.iter().map(|c| quote_ident(c)).collect();

        let exists = format!(
            "SELECT 1 FROM {} WHERE {} LIMIT 1",
            table,
            keys.iter()
                .map(|k| format!("{} = ?", k))
                .collect::<Vec<_>>()
                .join(" AND ")
        );

        let columns: Vec<&String> = keys.iter().chain(values.iter()).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let on_conflict = if values.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!(
                "DO UPDATE SET {}",
                values
                    .iter()
                    .map(|v| format!("{} = excluded.{}", v, v))
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        };

        let upsert = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) {}",
            table,
            columns
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            placeholders,
            keys.join(", "),
            on_conflict
        );

        Statements { exists, upsert }
    }
}

fn bind_values<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    values: Vec<SqlValue>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = match value {
            SqlValue::Int(v) => query.bind(v),
            SqlValue::Text(v) => query.bind(v),
            SqlValue::NullableText(v) => query.bind(v),
        };
    }
    query
}

/// Upsert `records` into `R::TABLE`, committing every `batch_size` records.
///
/// - Each record is checked for existence by natural key and upserted in the
///   batch transaction; a unique violation only rolls back that record's
///   savepoint and counts it as a duplicate.
/// - A connection failure inside a batch rolls the batch back, drops the
///   connection and retries the batch per `options.retry`.
/// - The connection is re-verified after every commit. If it cannot be kept
///   alive the committed counts are returned with `interrupted` set.
pub async fn reconcile<R: NaturalKey>(
    manager: &mut ConnectionManager,
    records: &[R],
    options: &ReconcileOptions,
) -> ReconcileStats {
    let mut stats = ReconcileStats::default();
    if records.is_empty() {
        return stats;
    }

    if !manager.ensure_connection().await {
        warn!(
            "No database connection; skipping {} records for {}",
            records.len(),
            R::TABLE
        );
        stats.interrupted = true;
        return stats;
    }

    let statements = Statements::for_record::<R>();
    let operation = format!("reconcile batch into {}", R::TABLE);
    let batch_size = options.batch_size.max(1);

    for chunk in records.chunks(batch_size) {
        let mut attempts = options.retry.attempts(&operation);

        let committed = loop {
            let result = match manager.connection() {
                Ok(conn) => reconcile_batch(conn, &statements, chunk).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(batch) => {
                    attempts.succeeded();
                    break Some(batch);
                }
                Err(err) => {
                    let transient = err.is_transient();
                    if transient {
                        manager.disconnect().await;
                    }
                    if !attempts.retry_after(&err, transient).await {
                        break None;
                    }
                    if !manager.ensure_connection().await {
                        break None;
                    }
                }
            }
        };

        let Some(batch) = committed else {
            warn!(
                "Giving up on {} after {} committed records",
                R::TABLE,
                stats.processed()
            );
            stats.interrupted = true;
            return stats;
        };
        stats.merge(batch);

        if !manager.ensure_connection().await {
            warn!(
                "Connection lost after committing {} records to {}; stopping",
                stats.processed(),
                R::TABLE
            );
            stats.interrupted = true;
            return stats;
        }
    }

    info!(
        "{}: {} inserted, {} updated, {} duplicates, {} rejected",
        R::TABLE,
        stats.inserted,
        stats.updated,
        stats.duplicates,
        stats.rejected
    );
    stats
}

async fn reconcile_batch<R: NaturalKey>(
    conn: &mut SqliteConnection,
    statements: &Statements,
    chunk: &[R],
) -> SyncResult<ReconcileStats> {
    let mut batch = ReconcileStats::default();
    let mut tx = conn.begin().await?;

    for record in chunk {
        let exists = bind_values(sqlx::query(&statements.exists), record.key_values())
            .fetch_optional(&mut *tx)
            .await?
            .is_some();

        let mut values = record.key_values();
        values.extend(record.non_key_values());

        let mut savepoint = Connection::begin(&mut *tx).await?;
        let result = bind_values(sqlx::query(&statements.upsert), values)
            .execute(&mut *savepoint)
            .await;

        match result {
            Ok(_) => {
                savepoint.commit().await?;
                if exists {
                    batch.updated += 1;
                } else {
                    batch.inserted += 1;
                }
            }
            Err(e) if is_unique_violation(&e) => {
                savepoint.rollback().await?;
                let conflict = SyncError::ConstraintViolation(format!(
                    "{} [{}]: {}",
                    R::TABLE,
                    record.describe_key(),
                    e
                ));
                debug!("Counting as duplicate: {}", conflict);
                batch.duplicates += 1;
            }
            Err(e) if is_connection_error(&e) || is_lock_contention(&e) => return Err(e.into()),
            Err(e) => {
                savepoint.rollback().await?;
                warn!(
                    "Rejected {} record [{}]: {}",
                    R::TABLE,
                    record.describe_key(),
                    e
                );
                batch.rejected += 1;
            }
        }
    }

    tx.commit().await?;
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::testing::{manager, release_lock, FlakyConnector};
    use crate::db::models::{CalendarEvent, LessonRecord};
    use crate::db::repository::{CalendarEventRepository, ScheduleRepository};
    use crate::services::init::run_migrations;

    async fn migrated_store(connector: FlakyConnector) -> ConnectionManager {
        let mut mgr = manager(connector);
        mgr.connect().await.unwrap();
        run_migrations(mgr.connection().unwrap()).await.unwrap();
        mgr
    }

    fn options(batch_size: usize) -> ReconcileOptions {
        ReconcileOptions {
            batch_size,
            retry: RetryPolicy::immediate(2),
        }
    }

    fn event(description: &str) -> CalendarEvent {
        CalendarEvent {
            title: "Open day".to_string(),
            description: description.to_string(),
            date: "2024-05-01".to_string(),
            start_time: "10:00".to_string(),
            end_time: "12:00".to_string(),
            location: "Main hall".to_string(),
            creator: "events@example.org".to_string(),
            calendar_name: "Events".to_string(),
        }
    }

    fn lessons(count: usize) -> Vec<LessonRecord> {
        (0..count)
            .map(|i| LessonRecord {
                group_id: 35433,
                date: format!("2024-09-{:02}", i % 28 + 1),
                weekday: String::new(),
                subject: format!("Subject {}", i),
                lesson_type: "Lecture".to_string(),
                start_time: "10:00".to_string(),
                end_time: "11:40".to_string(),
                teacher: "Ivanova A. A.".to_string(),
                group_name: "3530901/10001".to_string(),
                auditory: "101".to_string(),
                building: "GZ".to_string(),
                place: None,
            })
            .collect()
    }

    #[test]
    fn statements_cover_key_and_value_columns() {
        let s = Statements::for_record::<CalendarEvent>();
        assert_eq!(
            s.exists,
            "SELECT 1 FROM \"calendar_events\" WHERE \"title\" = ? AND \"date\" = ? AND \"start_time\" = ? AND \"end_time\" = ? AND \"calendar_name\" = ? LIMIT 1"
        );
        assert!(s.upsert.starts_with("INSERT INTO \"calendar_events\" (\"title\", \"date\""));
        assert!(s.upsert.contains(
            "ON CONFLICT(\"title\", \"date\", \"start_time\", \"end_time\", \"calendar_name\")"
        ));
        assert!(s.upsert.ends_with(
            "DO UPDATE SET \"description\" = excluded.\"description\", \"location\" = excluded.\"location\", \"creator\" = excluded.\"creator\""
        ));
    }

    #[tokio::test]
    async fn same_event_twice_updates_description() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = migrated_store(FlakyConnector::new(dir.path().join("sync.db"))).await;

        let first = reconcile(&mut mgr, &[event("first")], &options(50)).await;
        assert_eq!((first.inserted, first.updated), (1, 0));

        let second = reconcile(&mut mgr, &[event("second")], &options(50)).await;
        assert_eq!((second.inserted, second.updated), (0, 1));

        let stored = CalendarEventRepository::find_all(mgr.connection().unwrap())
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].description, "second");
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = migrated_store(FlakyConnector::new(dir.path().join("sync.db"))).await;
        let records = lessons(60);

        let first = reconcile(&mut mgr, &records, &options(50)).await;
        assert_eq!(first.inserted, 60);
        assert!(!first.interrupted);

        let mut refreshed = records.clone();
        refreshed[7].teacher = "Petrov B. B.".to_string();
        refreshed[7].place = Some("Main building".to_string());

        let second = reconcile(&mut mgr, &refreshed, &options(50)).await;
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 60);

        let conn = mgr.connection().unwrap();
        assert_eq!(ScheduleRepository::count(conn).await.unwrap(), 60);
        let stored = ScheduleRepository::find_for_group(conn, 35433).await.unwrap();
        let row = stored
            .iter()
            .find(|r| r.subject == "Subject 7")
            .expect("lesson stored");
        assert_eq!(row.teacher, "Petrov B. B.");
        assert_eq!(row.place.as_deref(), Some("Main building"));
    }

    #[tokio::test]
    async fn duplicates_within_one_batch_are_stored_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = migrated_store(FlakyConnector::new(dir.path().join("sync.db"))).await;

        let mut records = lessons(3);
        records.push(records[0].clone());

        let stats = reconcile(&mut mgr, &records, &options(50)).await;
        assert_eq!(stats.inserted, 3);
        assert_eq!(stats.updated, 1);
        assert_eq!(
            ScheduleRepository::count(mgr.connection().unwrap())
                .await
                .unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn connection_loss_keeps_committed_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");
        let records = lessons(120);

        // Ping 1 happens before the first batch; pings 2, 3 and 4 follow the
        // commits at 25, 50 and 75 records. The fourth fails for good.
        let mut mgr =
            migrated_store(FlakyConnector::new(path.clone()).losing_connection_at_ping(4)).await;
        let partial = reconcile(&mut mgr, &records, &options(25)).await;
        assert!(partial.interrupted);
        assert_eq!(partial.processed(), 75);
        assert_eq!(partial.inserted, 75);

        let mut healthy = migrated_store(FlakyConnector::new(path)).await;
        let rerun = reconcile(&mut healthy, &records, &options(25)).await;
        assert!(!rerun.interrupted);
        assert_eq!(rerun.inserted, 45);
        assert_eq!(rerun.updated, 75);
        assert_eq!(
            ScheduleRepository::count(healthy.connection().unwrap())
                .await
                .unwrap(),
            120
        );
    }

    #[tokio::test]
    async fn unavailable_store_reconciles_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let connector = FlakyConnector::new(dir.path().join("sync.db"));
        connector
            .refuse_connects
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let mut mgr = manager(connector);

        let stats = reconcile(&mut mgr, &lessons(5), &options(50)).await;
        assert_eq!(stats.processed(), 0);
        assert!(stats.interrupted);
    }

    #[tokio::test]
    async fn loss_inside_second_batch_keeps_first_batch_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");
        let records = lessons(120);

        // Ping 2 follows the commit at 50. From then on the file stays locked
        // by another writer and reconnects are refused, so the second batch
        // (records 51..100) never commits.
        let connector = FlakyConnector::new(path.clone()).locked_for_good_at_ping(2);
        let locker = connector.locker.clone();
        let mut mgr = migrated_store(connector).await;
        let partial = reconcile(&mut mgr, &records, &options(50)).await;
        assert!(partial.interrupted);
        assert_eq!(partial.inserted, 50);
        assert_eq!(partial.processed(), 50);
        release_lock(&locker).await.unwrap();

        let mut healthy = migrated_store(FlakyConnector::new(path)).await;
        assert_eq!(
            ScheduleRepository::count(healthy.connection().unwrap())
                .await
                .unwrap(),
            50
        );
        let rerun = reconcile(&mut healthy, &records, &options(50)).await;
        assert_eq!((rerun.inserted, rerun.updated), (70, 50));
    }

    #[tokio::test]
    async fn locked_batch_is_retried_without_double_counting() {
        let dir = tempfile::tempdir().unwrap();
        let connector = FlakyConnector::new(dir.path().join("sync.db")).locked_once_at_ping(1);
        let connects = connector.connects.clone();
        let mut mgr = migrated_store(connector).await;

        let stats = reconcile(&mut mgr, &lessons(30), &options(50)).await;
        assert!(!stats.interrupted);
        assert_eq!(stats.inserted, 30);
        assert_eq!(stats.updated, 0);
        assert_eq!(stats.duplicates + stats.rejected, 0);
        // initial connect + the reconnect after the failed attempt
        assert_eq!(connects.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(
            ScheduleRepository::count(mgr.connection().unwrap())
                .await
                .unwrap(),
            30
        );
    }

    #[tokio::test]
    async fn unique_violation_outside_natural_key_counts_as_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = migrated_store(FlakyConnector::new(dir.path().join("sync.db"))).await;
        sqlx::query("CREATE UNIQUE INDEX one_room_per_slot ON schedule (date, start_time, auditory)")
            .execute(mgr.connection().unwrap())
            .await
            .unwrap();

        // Same room and slot as lesson 0 under a different subject: a new
        // natural key that trips the extra index.
        let mut records = lessons(3);
        let mut clash = records[0].clone();
        clash.subject = "Elective".to_string();
        records.insert(1, clash);

        let stats = reconcile(&mut mgr, &records, &options(50)).await;
        assert_eq!(stats.inserted, 3);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.rejected, 0);
        assert!(!stats.interrupted);

        let stored = ScheduleRepository::find_for_group(mgr.connection().unwrap(), 35433)
            .await
            .unwrap();
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().all(|r| r.subject != "Elective"));
    }
}
