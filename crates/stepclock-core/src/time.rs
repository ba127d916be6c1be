//! Time primitives for stepclock
//!
//! Two kinds of time flow through the system:
//! - Civil time (LocalTime): what the clock face should show, derived from
//!   UTC through a time zone rule
//! - Monotonic time (MonotonicClock): used for pulse spacing and scheduling,
//!   never affected by wall-clock steps

use std::fmt;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;

use crate::MinuteOfDay;

/// A civil-time reading together with the offset rules that produced it
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LocalTime {
    /// Local wall-clock datetime
    pub datetime: NaiveDateTime,
    /// Offset east of UTC in seconds
    pub utc_offset: i32,
    /// Whether daylight saving time is in effect
    pub is_dst: bool,
}

impl LocalTime {
    pub fn new(datetime: NaiveDateTime, utc_offset: i32, is_dst: bool) -> Self {
        LocalTime {
            datetime,
            utc_offset,
            is_dst,
        }
    }

    /// Minute of day shown by a correct clock at this instant
    #[inline]
    pub fn minute_of_day(&self) -> MinuteOfDay {
        MinuteOfDay::from_datetime(self.datetime)
    }

    /// Offset formatted like `strftime("%z")`, e.g. `+0100`
    pub fn offset_string(&self) -> String {
        let sign = if self.utc_offset < 0 { '-' } else { '+' };
        let abs = self.utc_offset.unsigned_abs();
        format!("{}{:02}{:02}", sign, abs / 3600, (abs % 3600) / 60)
    }
}

impl fmt::Debug for LocalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, isdst={})",
            self.datetime.format("%Y-%m-%d %H:%M:%S"),
            self.offset_string(),
            self.is_dst as u8
        )
    }
}

/// Monotonic time base shared by the pulse driver and the scheduler
///
/// `hold` occupies the caller for the given duration. On the single control
/// loop this is loop-occupying time: nothing else is serviced meanwhile.
pub trait MonotonicClock {
    /// Time elapsed since the clock was created
    fn elapsed(&self) -> Duration;

    /// Occupy the caller for `duration`
    fn hold(&self, duration: Duration);
}

/// Monotonic clock backed by `std::time::Instant`
#[derive(Clone, Copy, Debug)]
pub struct SystemMonotonic {
    origin: Instant,
}

impl SystemMonotonic {
    pub fn new() -> Self {
        SystemMonotonic {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemMonotonic {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemMonotonic {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    fn hold(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
