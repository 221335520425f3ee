//! Canonical records produced by the normalizers and persisted by the reconciler.

pub mod calendar;
pub mod schedule;

pub use self::calendar::*;
pub use self::schedule::*;
