//! Time Provider Abstraction
//!
//! Backups are named after the civil calendar date on which they run, so
//! the export pipeline asks a `TimeProvider` for "now" instead of reading
//! the clock directly. Tests pin the date with `FixedTimeProvider`.
//!
//! # Examples
//!
//! ```rust
//! use dbgate_core::models::time::{FixedTimeProvider, TimeProvider};
//! use chrono::NaiveDate;
//!
//! let at = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap().and_hms_opt(8, 0, 0).unwrap();
//! let provider = FixedTimeProvider::new(at);
//! assert_eq!(provider.today_stamp(), "2024-03-09");
//! ```

use chrono::{Local, NaiveDateTime};
use std::sync::Mutex;

/// Trait for providing the current local civil time
pub trait TimeProvider: Send + Sync {
    /// Current local date-time, second precision is sufficient for callers
    fn now(&self) -> NaiveDateTime;

    /// Calendar date formatted as `YYYY-MM-DD`
    fn today_stamp(&self) -> String {
        self.now().format("%Y-%m-%d").to_string()
    }
}

/// System time provider using the local wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Settable time provider for deterministic tests
#[derive(Debug)]
pub struct FixedTimeProvider {
    current: Mutex<NaiveDateTime>,
}

impl FixedTimeProvider {
    /// Create a provider pinned at `at`
    pub fn new(at: NaiveDateTime) -> Self {
        Self {
            current: Mutex::new(at),
        }
    }

    /// Move the pinned time
    pub fn set(&self, at: NaiveDateTime) {
        if let Ok(mut current) = self.current.lock() {
            *current = at;
        }
    }

    /// Advance the pinned time by `duration`
    pub fn advance(&self, duration: chrono::Duration) {
        if let Ok(mut current) = self.current.lock() {
            *current += duration;
        }
    }
}

impl TimeProvider for FixedTimeProvider {
    fn now(&self) -> NaiveDateTime {
        match self.current.lock() {
            Ok(current) => *current,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
