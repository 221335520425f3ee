use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};

use crate::config::ScheduleSourceConfig;
use crate::error::SyncResult;
use crate::services::http::JsonClient;

// ============================================================================
// Payload Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct FacultiesPayload {
    #[serde(default)]
    pub faculties: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFaculty {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub abbr: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupsPayload {
    #[serde(default)]
    pub groups: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawGroup {
    pub id: i64,
    pub name: String,
}

/// One week of a group's timetable as returned by `scheduler/{group_id}`.
#[derive(Debug, Default, Deserialize)]
pub struct WeekPayload {
    #[serde(default)]
    pub group: Option<RawGroupInfo>,
    #[serde(default)]
    pub week: Option<RawWeekInfo>,
    /// Decoded one by one, so a malformed day drops only itself.
    #[serde(default)]
    pub days: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawGroupInfo {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawWeekInfo {
    #[serde(default)]
    pub date_start: String,
    #[serde(default)]
    pub date_end: String,
    #[serde(default)]
    pub is_odd: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawDay {
    #[serde(default)]
    pub date: String,
    #[serde(default, deserialize_with = "number_or_string")]
    pub weekday: String,
    /// Undecoded so a malformed lesson only drops itself.
    #[serde(default)]
    pub lessons: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawLesson {
    pub subject: String,
    #[serde(default)]
    pub time_start: String,
    #[serde(default)]
    pub time_end: String,
    #[serde(default, rename = "typeObj")]
    pub type_obj: Option<RawNamed>,
    #[serde(default)]
    pub teachers: Option<Vec<RawTeacher>>,
    #[serde(default)]
    pub groups: Option<Vec<RawNamed>>,
    #[serde(default)]
    pub auditories: Option<Vec<RawAuditory>>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawNamed {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawTeacher {
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawAuditory {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub building: Option<RawBuilding>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawBuilding {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub abbr: Option<String>,
}

/// `weekday` arrives as `1` or `"1"` depending on the endpoint version.
fn number_or_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Weekday {
        Number(i64),
        Text(String),
        Missing(()),
    }

    Ok(match Weekday::deserialize(deserializer)? {
        Weekday::Number(n) => n.to_string(),
        Weekday::Text(s) => s,
        Weekday::Missing(()) => String::new(),
    })
}

// ============================================================================
// Fetcher
// ============================================================================

/// Client for the university timetable API.
pub struct ScheduleFetcher {
    http: JsonClient,
    base_url: String,
}

impl ScheduleFetcher {
    pub fn new(http: JsonClient, config: &ScheduleSourceConfig) -> Self {
        ScheduleFetcher {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn faculties(&self) -> SyncResult<FacultiesPayload> {
        let url = format!("{}/faculties", self.base_url);
        self.http.get_json(&url, &[]).await
    }

    pub async fn groups(&self, faculty_id: i64) -> SyncResult<GroupsPayload> {
        let url = format!("{}/faculties/{}/groups", self.base_url, faculty_id);
        self.http.get_json(&url, &[]).await
    }

    /// The week containing `date` (the current week when `None`). A 404 or a
    /// body without a week descriptor means there is no timetable.
    pub async fn week(
        &self,
        group_id: i64,
        date: Option<NaiveDate>,
    ) -> SyncResult<Option<WeekPayload>> {
        let url = format!("{}/scheduler/{}", self.base_url, group_id);
        let query: Vec<(&str, String)> = date
            .map(|d| vec![("date", d.format("%Y-%m-%d").to_string())])
            .unwrap_or_default();

        let payload: Option<WeekPayload> = self.http.get_optional_json(&url, &query).await?;
        Ok(payload.filter(|p| p.week.is_some()))
    }
}
