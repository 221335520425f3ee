use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Placeholder title for events that carry no summary.
pub const UNTITLED_EVENT: &str = "(untitled)";
/// Placeholder creator for events without a creator email.
pub const UNKNOWN_CREATOR: &str = "unknown";
/// Sentinel span for all-day or unparseable events.
pub const ALL_DAY_START: &str = "00:00";
pub const ALL_DAY_END: &str = "23:59";

// ============================================================================
// Calendar Event (`calendar_events` table)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub title: String,
    pub description: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`
    pub start_time: String,
    /// `HH:MM`
    pub end_time: String,
    pub location: String,
    pub creator: String,
    pub calendar_name: String,
}

impl CalendarEvent {
    pub fn is_all_day(&self) -> bool {
        self.start_time == ALL_DAY_START && self.end_time == ALL_DAY_END
    }
}
