//! Clock abstraction.
//!
//! Every time-dependent decision (lease expiry, row id timestamps, cache
//! freshness) reads time through a [`Clock`] so tests can drive it with a
//! [`ManualClock`] instead of sleeping.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Wall-clock instant in microseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Microseconds since the Unix epoch.
    pub micros: u64,
}

impl Timestamp {
    /// Create a timestamp from microseconds.
    pub const fn from_micros(micros: u64) -> Self {
        Self { micros }
    }

    /// Create a timestamp from milliseconds.
    pub const fn from_millis(ms: u64) -> Self {
        Self { micros: ms * 1_000 }
    }

    /// The Unix epoch.
    pub const fn zero() -> Self {
        Self { micros: 0 }
    }

    /// Milliseconds since the Unix epoch.
    pub const fn as_millis(self) -> u64 {
        self.micros / 1_000
    }

    /// Add a duration, saturating at the maximum value.
    pub fn add(self, duration: Duration) -> Self {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        Self {
            micros: self.micros.saturating_add(micros),
        }
    }

    /// Check if this timestamp is at or after the given deadline.
    pub const fn is_at_or_after(self, deadline: Timestamp) -> bool {
        self.micros >= deadline.micros
    }

    /// Time remaining until a deadline; zero if it has passed.
    pub fn until(self, deadline: Timestamp) -> Duration {
        Duration::from_micros(deadline.micros.saturating_sub(self.micros))
    }

    /// Time elapsed since an earlier timestamp; zero if `earlier` is in the future.
    pub fn since(self, earlier: Timestamp) -> Duration {
        Duration::from_micros(self.micros.saturating_sub(earlier.micros))
    }

    /// RFC 3339 rendering for operator output.
    pub fn to_rfc3339(self) -> String {
        let secs = i64::try_from(self.micros / 1_000_000).unwrap_or(i64::MAX);
        let nanos = ((self.micros % 1_000_000) * 1_000) as u32;
        chrono::DateTime::from_timestamp(secs, nanos)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| format!("{}us", self.micros))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time.
    fn now(&self) -> Timestamp;
}

/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let micros = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros();
        Timestamp::from_micros(u64::try_from(micros).unwrap_or(u64::MAX))
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    /// Create a manual clock starting at the given time.
    pub fn new(start: Timestamp) -> Self {
        Self {
            micros: AtomicU64::new(start.micros),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let micros = u64::try_from(by.as_micros()).unwrap_or(u64::MAX);
        self.micros.fetch_add(micros, Ordering::AcqRel);
    }

    /// Set the clock to an absolute time. May move backwards.
    pub fn set(&self, to: Timestamp) {
        self.micros.store(to.micros, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_micros(self.micros.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_arithmetic() {
        let t = Timestamp::from_millis(1_000);
        let later = t.add(Duration::from_millis(500));
        assert_eq!(later.as_millis(), 1_500);
        assert!(later.is_at_or_after(t));
        assert!(!t.is_at_or_after(later));
        assert_eq!(t.until(later), Duration::from_millis(500));
        assert_eq!(later.until(t), Duration::ZERO);
        assert_eq!(later.since(t), Duration::from_millis(500));
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(Timestamp::from_millis(10));
        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now().as_millis(), 15);
        clock.set(Timestamp::from_millis(3));
        assert_eq!(clock.now().as_millis(), 3);
    }

    #[test]
    fn rfc3339_rendering() {
        let t = Timestamp::from_millis(0);
        assert!(t.to_rfc3339().starts_with("1970-01-01T00:00:00"));
    }
}
