//! Monotonic time abstraction shared by all three state machines.
//!
//! Mirrors the `Clock`/`LocalTime`/`LocalDuration` split used throughout
//! `nakamoto-p2p`'s managers (`BloomManager::idle`, `PeerManager::timer_expired`,
//! ...), so tests can swap in a fake clock instead of `SystemTime::now()`.

use std::ops::{Add, Sub};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A point in time, measured in milliseconds since the Unix epoch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalTime(u64);

impl LocalTime {
    /// Construct a `LocalTime` from milliseconds since the Unix epoch.
    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Milliseconds since the Unix epoch.
    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl From<SystemTime> for LocalTime {
    fn from(t: SystemTime) -> Self {
        let ms = t
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self(ms)
    }
}

impl Sub for LocalTime {
    type Output = LocalDuration;

    fn sub(self, other: Self) -> LocalDuration {
        LocalDuration::from_millis(self.0.saturating_sub(other.0))
    }
}

impl Add<LocalDuration> for LocalTime {
    type Output = LocalTime;

    fn add(self, other: LocalDuration) -> LocalTime {
        LocalTime(self.0 + other.as_millis())
    }
}

/// A duration of time, measured in milliseconds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalDuration(u64);

impl LocalDuration {
    /// Zero duration.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * 1000)
    }

    /// Construct from milliseconds.
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Duration in milliseconds.
    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl From<LocalDuration> for Duration {
    fn from(d: LocalDuration) -> Self {
        Duration::from_millis(d.0)
    }
}

/// A source of monotonic local time.
///
/// Kept as a trait (rather than calling `SystemTime::now()` directly) so
/// that every FSM can be driven by a fake clock in tests, the way
/// `BloomManager<C: Clock>` is parametrized in the teacher's managers.
pub trait Clock {
    /// Return the current local time.
    fn local_time(&self) -> LocalTime;
}

/// Clock backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn local_time(&self) -> LocalTime {
        SystemTime::now().into()
    }
}

/// A clock whose time is advanced manually, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FakeClock(LocalTime);

impl FakeClock {
    /// Create a fake clock starting at time zero.
    pub fn new() -> Self {
        Self(LocalTime::default())
    }

    /// Advance the clock by `d`.
    pub fn advance(&mut self, d: LocalDuration) {
        self.0 = self.0 + d;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn local_time(&self) -> LocalTime {
        self.0
    }
}
