pub mod calendar_event_repository;
pub mod directory_repository;
pub mod maintenance;
pub mod reconciler;
pub mod schedule_repository;

#[cfg(test)]
pub use calendar_event_repository::CalendarEventRepository;
pub use directory_repository::DirectoryRepository;
pub use reconciler::{reconcile, NaturalKey, ReconcileOptions, ReconcileStats};
#[cfg(test)]
pub use schedule_repository::ScheduleRepository;
