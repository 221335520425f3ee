pub mod calendar_source;
pub mod http;
pub mod init;
pub mod normalize;
pub mod pacing;
pub mod retry;
pub mod schedule_source;
pub mod semester;
pub mod sync;
