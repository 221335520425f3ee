//! Ownership of the single database connection used by a sync run.
//!
//! State machine:
//!
//! ```text
//! Disconnected -> Connected -> (ping fails) -> Reconnecting -> Connected | Disconnected
//! ```
//!
//! Storage operations call [`ConnectionManager::ensure_connection`] before doing
//! any work and fall back to an empty result when it returns `false`.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::error::{SyncError, SyncResult};
use crate::services::init::redact_db_url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Reconnecting,
}

/// Opens and pings connections. The production implementation talks to
/// SQLite; tests substitute connectors that fail on demand.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<SqliteConnection, sqlx::Error>;

    /// Trivial liveness check.
    async fn ping(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(conn).await.map(|_| ())
    }

    /// Human readable target for logs. Must not contain credentials.
    fn describe(&self) -> String;
}

pub struct SqliteConnector {
    url: String,
    options: SqliteConnectOptions,
}

impl SqliteConnector {
    pub fn from_url(url: &str) -> SyncResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        Ok(SqliteConnector {
            url: url.to_string(),
            options,
        })
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    async fn connect(&self) -> Result<SqliteConnection, sqlx::Error> {
        self.options.connect().await
    }

    fn describe(&self) -> String {
        redact_db_url(&self.url)
    }
}

pub struct ConnectionManager {
    connector: Box<dyn Connector>,
    connection: Option<SqliteConnection>,
    state: ConnectionState,
    reconnect_delay: Duration,
    reconnect_attempts: u32,
}

impl ConnectionManager {
    pub fn new(
        connector: Box<dyn Connector>,
        reconnect_delay: Duration,
        reconnect_attempts: u32,
    ) -> Self {
        ConnectionManager {
            connector,
            connection: None,
            state: ConnectionState::Disconnected,
            reconnect_delay,
            reconnect_attempts: reconnect_attempts.max(1),
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> SyncResult<Self> {
        let connector = SqliteConnector::from_url(&config.url)?;
        Ok(Self::new(
            Box::new(connector),
            config.reconnect_delay,
            config.reconnect_attempts,
        ))
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Open the connection. Replaces any connection already held.
    pub async fn connect(&mut self) -> SyncResult<()> {
        self.disconnect().await;
        match self.connector.connect().await {
            Ok(conn) => {
                self.connection = Some(conn);
                self.state = ConnectionState::Connected;
                info!("Connected to database {}", self.connector.describe());
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Failed to connect to database {}: {}",
                    self.connector.describe(),
                    e
                );
                self.state = ConnectionState::Disconnected;
                Err(SyncError::Connection(e.to_string()))
            }
        }
    }

    /// Verify the connection with a ping, reconnecting when it is missing or
    /// dead. Returns whether a usable connection exists afterwards.
    pub async fn ensure_connection(&mut self) -> bool {
        if let Some(conn) = self.connection.as_mut() {
            match self.connector.ping(conn).await {
                Ok(()) => return true,
                Err(e) => warn!("Database liveness check failed: {}", e),
            }
        }

        self.reconnect().await
    }

    async fn reconnect(&mut self) -> bool {
        self.disconnect().await;
        self.state = ConnectionState::Reconnecting;

        for attempt in 1..=self.reconnect_attempts {
            info!(
                "Reconnecting to database (attempt {}/{})",
                attempt, self.reconnect_attempts
            );
            tokio::time::sleep(self.reconnect_delay).await;

            match self.connector.connect().await {
                Ok(conn) => {
                    self.connection = Some(conn);
                    self.state = ConnectionState::Connected;
                    info!("Reconnected to database {}", self.connector.describe());
                    return true;
                }
                Err(e) => warn!("Reconnect attempt {} failed: {}", attempt, e),
            }
        }

        self.state = ConnectionState::Disconnected;
        false
    }

    /// Close the connection if one is held. Safe to call repeatedly; close
    /// errors are only logged.
    pub async fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            if let Err(e) = conn.close().await {
                debug!("Ignoring error while closing database connection: {}", e);
            } else {
                debug!("Database connection closed");
            }
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Borrow the live connection.
    pub fn connection(&mut self) -> SyncResult<&mut SqliteConnection> {
        self.connection
            .as_mut()
            .ok_or_else(|| SyncError::Connection("not connected".to_string()))
    }
}
