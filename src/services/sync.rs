//! One complete sync run: calendars, the faculty/group directory, then every
//! group's semester timetable.

use std::fmt;

use chrono::{Local, NaiveDate};
use tracing::{error, info, warn};

use crate::config::{CalendarSource, Config};
use crate::db::repository::maintenance::{self, StoreStats};
use crate::db::repository::{reconcile, DirectoryRepository, ReconcileOptions, ReconcileStats};
use crate::db::ConnectionManager;
use crate::error::SyncResult;
use crate::services::calendar_source::{CalendarFetcher, TimeWindow};
use crate::services::http::JsonClient;
use crate::services::init;
use crate::services::normalize::{normalize_events, normalize_faculties, normalize_groups};
use crate::services::pacing::pace;
use crate::services::retry::RetryPolicy;
use crate::services::schedule_source::ScheduleFetcher;
use crate::services::semester::{semester_start, SemesterRange};

/// Groups listed by name in the final statistics.
const BUSIEST_GROUPS: i64 = 10;

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Synced(ReconcileStats),
    Failed(String),
}

impl Outcome {
    pub fn stats(&self) -> Option<&ReconcileStats> {
        match self {
            Outcome::Synced(stats) => Some(stats),
            Outcome::Failed(_) => None,
        }
    }

    /// Fetch failed, or the store went away before everything was written.
    pub fn is_failed(&self) -> bool {
        match self {
            Outcome::Synced(stats) => stats.interrupted,
            Outcome::Failed(_) => true,
        }
    }

    fn reason(&self) -> String {
        match self {
            Outcome::Synced(stats) => interrupted_reason(stats),
            Outcome::Failed(reason) => reason.clone(),
        }
    }
}

fn interrupted_reason(stats: &ReconcileStats) -> String {
    format!(
        "store connection lost after {} records",
        stats.processed()
    )
}

/// Result of syncing one independently fetched unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionReport {
    pub name: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupReport {
    pub group_id: i64,
    pub weeks: usize,
    pub lessons: usize,
    /// Week fetches that failed after retries.
    pub failed_fetches: usize,
    pub stats: ReconcileStats,
}

impl GroupReport {
    /// Every week fetch failed, or the lessons could not all be written.
    pub fn is_failed(&self) -> bool {
        self.failure().is_some()
    }

    pub fn failure(&self) -> Option<String> {
        if self.weeks == 0 && self.failed_fetches > 0 {
            Some(format!("all {} week fetches failed", self.failed_fetches))
        } else if self.stats.interrupted {
            Some(interrupted_reason(&self.stats))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub calendars: Vec<PartitionReport>,
    pub faculties: Option<PartitionReport>,
    pub groups: Vec<PartitionReport>,
    pub schedules: Vec<GroupReport>,
    pub store: StoreStats,
}

impl SyncReport {
    pub fn calendar_totals(&self) -> ReconcileStats {
        totals(self.calendars.iter())
    }

    pub fn group_totals(&self) -> ReconcileStats {
        totals(self.groups.iter())
    }

    pub fn schedule_totals(&self) -> ReconcileStats {
        let mut sum = ReconcileStats::default();
        for group in &self.schedules {
            sum.merge(group.stats);
        }
        sum
    }

    /// `(partition, reason)` for every partition that did not sync.
    pub fn failures(&self) -> Vec<(String, String)> {
        let partitions = self
            .calendars
            .iter()
            .chain(self.faculties.iter())
            .chain(self.groups.iter())
            .filter(|p| p.outcome.is_failed())
            .map(|p| (p.name.clone(), p.outcome.reason()));
        let schedules = self.schedules.iter().filter_map(|g| {
            g.failure()
                .map(|reason| (format!("schedule of group {}", g.group_id), reason))
        });
        partitions.chain(schedules).collect()
    }

    pub fn failed_groups(&self) -> usize {
        self.schedules.iter().filter(|g| g.is_failed()).count()
    }
}

fn totals<'a>(parts: impl Iterator<Item = &'a PartitionReport>) -> ReconcileStats {
    let mut sum = ReconcileStats::default();
    for stats in parts.filter_map(|p| p.outcome.stats()) {
        sum.merge(*stats);
    }
    sum
}

fn write_stats(f: &mut fmt::Formatter<'_>, label: &str, stats: &ReconcileStats) -> fmt::Result {
    writeln!(
        f,
        "  {:<16} {:>6} inserted {:>6} updated {:>6} duplicates {:>6} rejected{}",
        label,
        stats.inserted,
        stats.updated,
        stats.duplicates,
        stats.rejected,
        if stats.interrupted { " (interrupted)" } else { "" }
    )
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sync results:")?;
        write_stats(f, "calendar events", &self.calendar_totals())?;
        if let Some(stats) = self.faculties.as_ref().and_then(|p| p.outcome.stats()) {
            write_stats(f, "faculties", stats)?;
        }
        write_stats(f, "groups", &self.group_totals())?;
        write_stats(f, "lessons", &self.schedule_totals())?;

        let failed_groups = self.failed_groups();
        writeln!(
            f,
            "  schedules        {} groups synced, {} failed, {} weeks, {} lessons fetched",
            self.schedules.len() - failed_groups,
            failed_groups,
            self.schedules.iter().map(|g| g.weeks).sum::<usize>(),
            self.schedules.iter().map(|g| g.lessons).sum::<usize>()
        )?;

        let failures = self.failures();
        if !failures.is_empty() {
            writeln!(f, "Failed partitions:")?;
            for (name, reason) in failures {
                writeln!(f, "  {}: {}", name, reason)?;
            }
        }

        let store = &self.store;
        writeln!(f, "Store:")?;
        writeln!(f, "  calendar_events  {}", store.calendar_events)?;
        writeln!(f, "  faculties        {}", store.faculties)?;
        writeln!(f, "  groups           {}", store.groups)?;
        writeln!(
            f,
            "  schedule         {} lessons across {} groups",
            store.lessons, store.groups_with_schedule
        )?;
        for g in &store.busiest_groups {
            writeln!(f, "    {:<20} {:>6} lessons", g.group_name, g.lessons)?;
        }
        Ok(())
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct SyncOrchestrator {
    config: Config,
    calendars: CalendarFetcher,
    schedule: ScheduleFetcher,
    reconcile: ReconcileOptions,
    today: NaiveDate,
}

impl SyncOrchestrator {
    pub fn new(config: Config) -> SyncResult<Self> {
        let policy = RetryPolicy::with_attempts(config.sync.max_retries);
        let http = JsonClient::new(&config.http, policy.clone())?;

        Ok(SyncOrchestrator {
            calendars: CalendarFetcher::new(http.clone(), &config.calendar),
            schedule: ScheduleFetcher::new(http, &config.schedule),
            reconcile: ReconcileOptions {
                batch_size: config.sync.batch_size,
                retry: policy,
            },
            today: Local::now().date_naive(),
            config,
        })
    }

    /// Pin the date the fetch window and semester seed are derived from.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Run every sync step. Only store setup failures are returned as errors;
    /// partition failures are recorded in the report.
    pub async fn run(&self) -> SyncResult<SyncReport> {
        let mut manager = init::open_store(&self.config.database).await?;
        let mut report = SyncReport::default();

        report.calendars = self.sync_calendars(&mut manager).await;
        let (faculties, groups) = self.sync_directory(&mut manager).await;
        report.faculties = faculties;
        report.groups = groups;
        report.schedules = self.sync_schedules(&mut manager).await;
        report.store = self.collect_stats(&mut manager).await;

        manager.disconnect().await;
        info!(
            "Sync finished with {} failed partitions",
            report.failures().len()
        );
        Ok(report)
    }

    async fn sync_calendars(&self, manager: &mut ConnectionManager) -> Vec<PartitionReport> {
        let window = TimeWindow::month_of(self.today);
        let mut reports = Vec::new();

        for (i, calendar) in self.config.calendar.calendars.iter().enumerate() {
            if i > 0 {
                pace(self.config.sync.pacing_delay_range).await;
            }
            let outcome = self.sync_calendar(manager, calendar, &window).await;
            reports.push(PartitionReport {
                name: format!("calendar {}", calendar.name),
                outcome,
            });
        }
        reports
    }

    async fn sync_calendar(
        &self,
        manager: &mut ConnectionManager,
        calendar: &CalendarSource,
        window: &TimeWindow,
    ) -> Outcome {
        info!("Syncing calendar {}", calendar.name);
        match self.calendars.events(&calendar.id, window).await {
            Ok(payload) => {
                let events = normalize_events(payload, &calendar.name);
                info!("Calendar {}: {} events", calendar.name, events.len());
                Outcome::Synced(reconcile(manager, &events, &self.reconcile).await)
            }
            Err(e) => {
                warn!("Calendar {} failed: {}", calendar.name, e);
                Outcome::Failed(e.to_string())
            }
        }
    }

    async fn sync_directory(
        &self,
        manager: &mut ConnectionManager,
    ) -> (Option<PartitionReport>, Vec<PartitionReport>) {
        let faculties = match self.schedule.faculties().await {
            Ok(payload) => normalize_faculties(payload),
            Err(e) => {
                error!("Failed to fetch faculties: {}", e);
                let report = PartitionReport {
                    name: "faculties".to_string(),
                    outcome: Outcome::Failed(e.to_string()),
                };
                return (Some(report), Vec::new());
            }
        };
        info!("Fetched {} faculties", faculties.len());
        let faculty_stats = reconcile(manager, &faculties, &self.reconcile).await;

        let mut groups = Vec::new();
        for faculty in &faculties {
            pace(self.config.sync.pacing_delay_range).await;

            let outcome = match self.schedule.groups(faculty.id).await {
                Ok(payload) => {
                    let records = normalize_groups(payload, faculty.id);
                    info!("Faculty {}: {} groups", faculty.abbr, records.len());
                    Outcome::Synced(reconcile(manager, &records, &self.reconcile).await)
                }
                Err(e) => {
                    warn!("Failed to fetch groups of faculty {}: {}", faculty.id, e);
                    Outcome::Failed(e.to_string())
                }
            };
            groups.push(PartitionReport {
                name: format!("groups of faculty {}", faculty.id),
                outcome,
            });
        }

        let faculties = PartitionReport {
            name: "faculties".to_string(),
            outcome: Outcome::Synced(faculty_stats),
        };
        (Some(faculties), groups)
    }

    async fn sync_schedules(&self, manager: &mut ConnectionManager) -> Vec<GroupReport> {
        let mut group_ids = if manager.ensure_connection().await {
            match manager.connection() {
                Ok(conn) => DirectoryRepository::group_ids(conn).await.unwrap_or_else(|e| {
                    error!("Failed to list groups: {}", e);
                    Vec::new()
                }),
                Err(_) => Vec::new(),
            }
        } else {
            error!("No database connection; skipping schedules");
            Vec::new()
        };
        if let Some(max) = self.config.schedule.max_groups {
            group_ids.truncate(max);
        }

        let seed = self
            .config
            .schedule
            .semester_start
            .unwrap_or_else(|| semester_start(self.today));
        let range = SemesterRange {
            max_weeks: self.config.schedule.max_weeks,
            pacing: self.config.sync.week_pacing_range,
        };
        let check_every = self.config.sync.connection_check_interval;
        info!(
            "Syncing schedules of {} groups from {}",
            group_ids.len(),
            seed
        );

        let mut reports = Vec::with_capacity(group_ids.len());
        for (i, &group_id) in group_ids.iter().enumerate() {
            if i > 0 {
                pace(self.config.sync.pacing_delay_range).await;
                if check_every > 0 && i % check_every == 0 && !manager.ensure_connection().await {
                    warn!("Connection check failed after {} groups", i);
                }
            }

            let fetched = range.fetch(&self.schedule, group_id, seed).await;
            let records = fetched.schedule.lesson_records(group_id);
            let stats = reconcile(manager, &records, &self.reconcile).await;
            if fetched.all_failed() {
                warn!(
                    "Group {}: all {} week fetches failed",
                    group_id, fetched.failed_fetches
                );
            }

            info!(
                "Group {} ({}/{}): {} lessons, {} inserted, {} updated",
                group_id,
                i + 1,
                group_ids.len(),
                records.len(),
                stats.inserted,
                stats.updated
            );
            reports.push(GroupReport {
                group_id,
                weeks: fetched.schedule.weeks.len(),
                lessons: records.len(),
                failed_fetches: fetched.failed_fetches,
                stats,
            });
        }
        reports
    }

    async fn collect_stats(&self, manager: &mut ConnectionManager) -> StoreStats {
        if !manager.ensure_connection().await {
            warn!("No database connection; store statistics unavailable");
            return StoreStats::default();
        }
        let stats = match manager.connection() {
            Ok(conn) => maintenance::collect_stats(conn, BUSIEST_GROUPS).await,
            Err(e) => Err(e),
        };
        stats.unwrap_or_else(|e| {
            warn!("Failed to collect store statistics: {}", e);
            StoreStats::default()
        })
    }
}
