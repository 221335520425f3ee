use std::env;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub calendar: CalendarSourceConfig,
    pub schedule: ScheduleSourceConfig,
    pub http: HttpConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    /// Apply the embedded migrations before syncing.
    pub run_migrations: bool,
    /// Fixed pause before each reconnect attempt.
    pub reconnect_delay: Duration,
    pub reconnect_attempts: u32,
}

/// One calendar partition: the calendar id used in the URL and the name stored
/// alongside its events.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CalendarSource {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct CalendarSourceConfig {
    pub base_url: String,
    pub api_key: String,
    pub max_results: u32,
    pub calendars: Vec<CalendarSource>,
}

#[derive(Debug, Clone)]
pub struct ScheduleSourceConfig {
    pub base_url: String,
    pub max_weeks: usize,
    pub max_groups: Option<usize>,
    /// Overrides the derived semester start date.
    pub semester_start: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Attempts for fetches and reconcile batches before giving up.
    pub max_retries: u32,
    /// Records per reconcile commit.
    pub batch_size: usize,
    /// Pause between partitions (calendars, faculties, groups).
    pub pacing_delay_range: DelayRange,
    /// Pause between week fetches of one semester.
    pub week_pacing_range: DelayRange,
    /// Proactive connection check every N groups.
    pub connection_check_interval: usize,
}

/// Inclusive range a pacing delay is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub const fn fixed(delay: Duration) -> Self {
        DelayRange {
            min: delay,
            max: delay,
        }
    }

    pub const fn zero() -> Self {
        Self::fixed(Duration::ZERO)
    }

    /// Parse `"1000-2000"` or `"1500"` (milliseconds).
    pub fn parse_millis(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (min, max) = match raw.split_once('-') {
            Some((a, b)) => (a.trim().parse::<u64>().ok()?, b.trim().parse::<u64>().ok()?),
            None => {
                let v = raw.parse::<u64>().ok()?;
                (v, v)
            }
        };
        if min > max {
            return None;
        }
        Some(DelayRange {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        })
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let calendars = match env::var("CALENDARS") {
            Ok(raw) if !raw.trim().is_empty() => parse_calendars(&raw)?,
            _ => Vec::new(),
        };

        let api_key = env::var("CALENDAR_API_KEY").unwrap_or_default();
        if !calendars.is_empty() && api_key.is_empty() {
            return Err(ConfigError::MissingEnv("CALENDAR_API_KEY".to_string()));
        }

        let semester_start = match env::var("SCHEDULE_SEMESTER_START") {
            Ok(v) => Some(
                NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d")
                    .map_err(|_| ConfigError::InvalidValue("SCHEDULE_SEMESTER_START".to_string()))?,
            ),
            Err(_) => None,
        };

        Ok(Config {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/campus.db".to_string()),
                run_migrations: match env::var("DATABASE_RUN_MIGRATIONS") {
                    Ok(v) => parse_bool(&v).unwrap_or(true),
                    Err(_) => true,
                },
                reconnect_delay: Duration::from_millis(env_parse("DATABASE_RECONNECT_DELAY_MS", 2000)?),
                reconnect_attempts: env_parse("DATABASE_RECONNECT_ATTEMPTS", 3)?,
            },
            calendar: CalendarSourceConfig {
                base_url: env::var("CALENDAR_BASE_URL").unwrap_or_else(|_| {
                    "https://www.googleapis.com/calendar/v3/calendars".to_string()
                }),
                api_key,
                max_results: env_parse("CALENDAR_MAX_RESULTS", 2500)?,
                calendars,
            },
            schedule: ScheduleSourceConfig {
                base_url: env::var("SCHEDULE_BASE_URL")
                    .unwrap_or_else(|_| "https://ruz.spbstu.ru/api/v1/ruz".to_string()),
                max_weeks: env_parse("SCHEDULE_MAX_WEEKS", 30)?,
                max_groups: match env::var("SCHEDULE_MAX_GROUPS") {
                    Ok(v) => Some(
                        v.trim()
                            .parse()
                            .map_err(|_| ConfigError::InvalidValue("SCHEDULE_MAX_GROUPS".to_string()))?,
                    ),
                    Err(_) => None,
                },
                semester_start,
            },
            http: HttpConfig {
                timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECONDS", 30)?),
                user_agent: env::var("HTTP_USER_AGENT")
                    .unwrap_or_else(|_| default_user_agent().to_string()),
            },
            sync: SyncConfig {
                max_retries: env_parse("SYNC_MAX_RETRIES", 3)?,
                batch_size: env_parse("SYNC_BATCH_SIZE", 50)?,
                pacing_delay_range: env_delay_range(
                    "SYNC_PACING_DELAY_RANGE",
                    DelayRange::fixed(Duration::from_secs(2)),
                )?,
                week_pacing_range: env_delay_range(
                    "SYNC_WEEK_PACING_RANGE",
                    DelayRange {
                        min: Duration::from_secs(1),
                        max: Duration::from_secs(2),
                    },
                )?,
                connection_check_interval: env_parse("SYNC_CONNECTION_CHECK_INTERVAL", 50)?,
            },
        })
    }
}

fn default_user_agent() -> &'static str {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36"
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(default),
    }
}

fn env_delay_range(name: &str, default: DelayRange) -> Result<DelayRange, ConfigError> {
    match env::var(name) {
        Ok(v) => DelayRange::parse_millis(&v).ok_or_else(|| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(default),
    }
}

/// Calendars are configured as a JSON list: `[{"id": "...", "name": "..."}]`.
pub fn parse_calendars(raw: &str) -> Result<Vec<CalendarSource>, ConfigError> {
    serde_json::from_str(raw).map_err(|_| ConfigError::InvalidValue("CALENDARS".to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: DatabaseConfig {
                url: "sqlite://data/campus.db".to_string(),
                run_migrations: true,
                reconnect_delay: Duration::from_secs(2),
                reconnect_attempts: 3,
            },
            calendar: CalendarSourceConfig {
                base_url: "https://www.googleapis.com/calendar/v3/calendars".to_string(),
                api_key: String::new(),
                max_results: 2500,
                calendars: Vec::new(),
            },
            schedule: ScheduleSourceConfig {
                base_url: "https://ruz.spbstu.ru/api/v1/ruz".to_string(),
                max_weeks: 30,
                max_groups: None,
                semester_start: None,
            },
            http: HttpConfig {
                timeout: Duration::from_secs(30),
                user_agent: default_user_agent().to_string(),
            },
            sync: SyncConfig {
                max_retries: 3,
                batch_size: 50,
                pacing_delay_range: DelayRange::fixed(Duration::from_secs(2)),
                week_pacing_range: DelayRange {
                    min: Duration::from_secs(1),
                    max: Duration::from_secs(2),
                },
                connection_check_interval: 50,
            },
        }
    }
}
