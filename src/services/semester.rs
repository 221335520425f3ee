//! Week-by-week walk over a group's semester timetable.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate};
use tracing::{debug, info, warn};

use crate::config::DelayRange;
use crate::db::models::{SemesterSchedule, Week};
use crate::error::SyncResult;
use crate::services::normalize::normalize_week;
use crate::services::pacing::pace;
use crate::services::schedule_source::ScheduleFetcher;

/// Where the semester containing `today` is assumed to begin: February 7th
/// for the spring term, September 1st for the autumn term. January still
/// belongs to the previous year's autumn term.
pub fn semester_start(today: NaiveDate) -> NaiveDate {
    let (year, month, day) = match today.month() {
        1 => (today.year() - 1, 9, 1),
        2..=7 => (today.year(), 2, 7),
        _ => (today.year(), 9, 1),
    };
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(today)
}

/// Parse `YYYY-MM-DD` or `YYYY.MM.DD`.
pub fn parse_api_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&value.trim().replace('.', "-"), "%Y-%m-%d").ok()
}

/// A source of normalized timetable weeks.
#[async_trait]
pub trait WeekSource: Send + Sync {
    /// The week containing `date`, or `None` when there is no timetable.
    async fn week(&self, group_id: i64, date: NaiveDate) -> SyncResult<Option<Week>>;
}

#[async_trait]
impl WeekSource for ScheduleFetcher {
    async fn week(&self, group_id: i64, date: NaiveDate) -> SyncResult<Option<Week>> {
        Ok(ScheduleFetcher::week(self, group_id, Some(date))
            .await?
            .and_then(normalize_week))
    }
}

/// The weeks collected by a walk and how many week fetches failed on the way.
#[derive(Debug, Clone)]
pub struct SemesterFetch {
    pub schedule: SemesterSchedule,
    pub failed_fetches: usize,
}

impl SemesterFetch {
    /// Nothing was fetched and at least one fetch failed: the timetable is
    /// unknown rather than empty.
    pub fn all_failed(&self) -> bool {
        self.schedule.weeks.is_empty() && self.failed_fetches > 0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SemesterRange {
    pub max_weeks: usize,
    /// Pause between week fetches.
    pub pacing: DelayRange,
}

impl SemesterRange {
    /// Fetch consecutive weeks from `seed`.
    ///
    /// Stops when a fetch returns no data, a week start repeats or
    /// `max_weeks` fetches were made. The next cursor is the day after the
    /// fetched week's end; a failed fetch or an unreadable end date moves the
    /// cursor forward by seven days instead.
    pub async fn fetch<S: WeekSource + ?Sized>(
        &self,
        source: &S,
        group_id: i64,
        seed: NaiveDate,
    ) -> SemesterFetch {
        let mut weeks: Vec<Week> = Vec::new();
        let mut failed_fetches = 0;
        let mut seen = HashSet::new();
        let mut cursor = seed;

        for n in 0..self.max_weeks {
            if n > 0 {
                pace(self.pacing).await;
            }

            match source.week(group_id, cursor).await {
                Ok(Some(week)) => {
                    let start = parse_api_date(&week.week.date_start)
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| week.week.date_start.clone());
                    if !seen.insert(start) {
                        debug!(
                            "Group {}: week starting {} already fetched, stopping",
                            group_id, week.week.date_start
                        );
                        break;
                    }

                    cursor = match parse_api_date(&week.week.date_end) {
                        Some(end) => end + Duration::days(1),
                        None => {
                            warn!(
                                "Group {}: unreadable week end {:?}, skipping ahead a week",
                                group_id, week.week.date_end
                            );
                            cursor + Duration::days(7)
                        }
                    };
                    weeks.push(week);
                }
                Ok(None) => {
                    debug!("Group {}: no timetable for {}, stopping", group_id, cursor);
                    break;
                }
                Err(e) => {
                    warn!(
                        "Group {}: failed to fetch week of {}: {}",
                        group_id, cursor, e
                    );
                    failed_fetches += 1;
                    cursor += Duration::days(7);
                }
            }
        }

        let schedule = SemesterSchedule::from_weeks(weeks, seed);
        info!(
            "Group {}: {} weeks, {} lessons, {} failed fetches ({} - {})",
            group_id,
            schedule.weeks.len(),
            schedule.lesson_count(),
            failed_fetches,
            schedule.start_date,
            schedule.end_date
        );
        SemesterFetch {
            schedule,
            failed_fetches,
        }
    }
}
