//! Batch sync of public calendars and the university timetable into SQLite.

pub mod config;
pub mod db;
pub mod error;
pub mod services;
