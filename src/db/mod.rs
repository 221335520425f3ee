pub mod connection;
pub mod models;
pub mod repository;

pub use connection::{ConnectionManager, ConnectionState, Connector, SqliteConnector};
