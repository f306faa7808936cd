//! Time source for deadline rules.
//!
//! Everything that compares against "now" goes through a `Clock` so tests can
//! pin or advance time.

use chrono::{DateTime, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;

    /// Returns `true` once `deadline` lies strictly in the past.
    ///
    /// A deadline equal to `now` has not passed yet.
    fn has_passed(&self, deadline: DateTime<Utc>) -> bool {
        self.now() > deadline
    }
}

/// Wall-clock time from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
