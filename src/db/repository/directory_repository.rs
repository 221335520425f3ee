use sqlx::sqlite::SqliteConnection;

use crate::db::models::{Faculty, Group};
use crate::db::repository::reconciler::{NaturalKey, SqlValue};
use crate::error::{SyncError, SyncResult};

impl NaturalKey for Faculty {
    const TABLE: &'static str = "faculties";
    const KEY_COLUMNS: &'static [&'static str] = &["id"];
    const VALUE_COLUMNS: &'static [&'static str] = &["name", "abbr"];

    fn key_values(&self) -> Vec<SqlValue> {
        vec![SqlValue::Int(self.id)]
    }

    fn non_key_values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.name.clone()),
            SqlValue::Text(self.abbr.clone()),
        ]
    }
}

impl NaturalKey for Group {
    const TABLE: &'static str = "groups";
    const KEY_COLUMNS: &'static [&'static str] = &["id"];
    const VALUE_COLUMNS: &'static [&'static str] = &["name", "faculty_id"];

    fn key_values(&self) -> Vec<SqlValue> {
        vec![SqlValue::Int(self.id)]
    }

    fn non_key_values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.name.clone()),
            SqlValue::Int(self.faculty_id),
        ]
    }
}

/// Faculties and groups of the university directory.
pub struct DirectoryRepository;

impl DirectoryRepository {
    /// Group ids in faculty-then-id order, the order schedules are synced in.
    pub async fn group_ids(conn: &mut SqliteConnection) -> SyncResult<Vec<i64>> {
        sqlx::query_scalar::<_, i64>(r#"SELECT id FROM "groups" ORDER BY faculty_id, id"#)
            .fetch_all(conn)
            .await
            .map_err(SyncError::Database)
    }

    #[cfg(test)]
    pub async fn find_faculties(conn: &mut SqliteConnection) -> SyncResult<Vec<Faculty>> {
        sqlx::query_as::<_, Faculty>("SELECT id, name, abbr FROM faculties ORDER BY id")
            .fetch_all(conn)
            .await
            .map_err(SyncError::Database)
    }
}
