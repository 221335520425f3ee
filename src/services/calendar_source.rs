use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc};
use serde::Deserialize;

use crate::config::CalendarSourceConfig;
use crate::error::SyncResult;
use crate::services::http::JsonClient;

// ============================================================================
// Payload Types
// ============================================================================

/// Body of `GET {base}/{calendar_id}/events`. Items stay undecoded so one
/// malformed event cannot fail the whole page.
#[derive(Debug, Default, Deserialize)]
pub struct EventsPayload {
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub creator: Option<RawCreator>,
    #[serde(default)]
    pub start: Option<RawEventTime>,
    #[serde(default)]
    pub end: Option<RawEventTime>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawCreator {
    #[serde(default)]
    pub email: Option<String>,
}

/// Either a timed (`dateTime`) or an all-day (`date`) boundary.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawEventTime {
    #[serde(default, rename = "dateTime")]
    pub date_time: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

// ============================================================================
// Fetch Window
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub min: DateTime<Utc>,
    pub max: DateTime<Utc>,
}

impl TimeWindow {
    /// First day of `today`'s month at 00:00:00Z to its last day at 23:59:59Z.
    pub fn month_of(today: NaiveDate) -> Self {
        let first = today.with_day(1).unwrap_or(today);
        let next_month = if first.month() == 12 {
            NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
        }
        .unwrap_or(first);

        TimeWindow {
            min: Utc.from_utc_datetime(&first.and_time(NaiveTime::MIN)),
            max: Utc.from_utc_datetime(&next_month.and_time(NaiveTime::MIN)) - Duration::seconds(1),
        }
    }
}

fn rfc3339(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ============================================================================
// Fetcher
// ============================================================================

/// Reads expanded single events of public calendars.
pub struct CalendarFetcher {
    http: JsonClient,
    base_url: String,
    api_key: String,
    max_results: u32,
}

impl CalendarFetcher {
    pub fn new(http: JsonClient, config: &CalendarSourceConfig) -> Self {
        CalendarFetcher {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_results: config.max_results,
        }
    }

    pub async fn events(&self, calendar_id: &str, window: &TimeWindow) -> SyncResult<EventsPayload> {
        let url = format!("{}/{}/events", self.base_url, calendar_id);
        let query = [
            ("key", self.api_key.clone()),
            ("maxResults", self.max_results.to_string()),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
            ("timeMin", rfc3339(&window.min)),
            ("timeMax", rfc3339(&window.max)),
        ];
        self.http.get_json(&url, &query).await
    }
}
