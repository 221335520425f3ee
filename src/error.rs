use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Fetch from {endpoint} failed: {cause}")]
    Fetch { endpoint: String, cause: String },

    #[error("{endpoint} responded with HTTP {status}")]
    HttpStatus { endpoint: String, status: u16 },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Database connection unavailable: {0}")]
    Connection(String),

    #[error("Natural key conflict: {0}")]
    ConstraintViolation(String),

    #[error("Missing required tables: {}", .0.join(", "))]
    MissingTables(Vec<String>),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
}

impl SyncError {
    pub fn fetch(endpoint: impl Into<String>, cause: impl ToString) -> Self {
        SyncError::Fetch {
            endpoint: endpoint.into(),
            cause: cause.to_string(),
        }
    }

    /// Whether the failure is worth another attempt against the same endpoint
    /// or connection.
    pub fn is_transient(&self) -> bool {
        match self {
            // Anything that went wrong on the wire: refused, reset, timed out,
            // closed mid-body. Only a bad request or an undecodable body is final.
            SyncError::Request(e) => !(e.is_builder() || e.is_decode()),
            SyncError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            SyncError::Database(e) => is_connection_error(e) || is_lock_contention(e),
            SyncError::Connection(_) => true,
            _ => false,
        }
    }
}

/// Errors that mean the connection itself is gone, as opposed to a bad statement.
pub fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

/// SQLITE_BUSY or SQLITE_LOCKED, including their extended codes: another
/// writer holds the database and the statement may succeed later.
pub fn is_lock_contention(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db) = err else {
        return false;
    };
    db.code()
        .and_then(|code| code.parse::<i32>().ok())
        .map(|code| matches!(code & 0xff, 5 | 6))
        .unwrap_or(false)
}

/// Unique / primary key violations reported by the store.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
