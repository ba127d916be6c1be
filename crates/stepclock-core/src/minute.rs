//! Minute-of-day primitive
//!
//! The physical clock face only knows hours and minutes, so every position
//! and every deficit is expressed modulo one day.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, NaiveTime, Timelike};

use crate::StepClockError;

/// Minutes in one civil day
pub const MINUTES_PER_DAY: u16 = 1440;

/// Minute of day in `[0, 1439]`
/// INVARIANT: value is always `< MINUTES_PER_DAY`
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MinuteOfDay(u16);

impl MinuteOfDay {
    pub const MIDNIGHT: MinuteOfDay = MinuteOfDay(0);

    /// Create from a raw minute count, rejecting values outside one day
    #[inline]
    pub fn new(minutes: u16) -> Option<Self> {
        (minutes < MINUTES_PER_DAY).then_some(MinuteOfDay(minutes))
    }

    /// Create from hour (0-23) and minute (0-59)
    #[inline]
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(MinuteOfDay((hour * 60 + minute) as u16))
        } else {
            None
        }
    }

    /// Reduce any signed minute count into one day
    #[inline]
    pub fn wrapping(minutes: i64) -> Self {
        MinuteOfDay(minutes.rem_euclid(MINUTES_PER_DAY as i64) as u16)
    }

    /// Minute of day of a civil time (seconds truncated)
    #[inline]
    pub fn from_time(time: NaiveTime) -> Self {
        MinuteOfDay((time.hour() * 60 + time.minute()) as u16)
    }

    /// Minute of day of a civil datetime (date ignored)
    #[inline]
    pub fn from_datetime(datetime: NaiveDateTime) -> Self {
        Self::from_time(datetime.time())
    }

    #[inline]
    pub fn get(self) -> u16 {
        self.0
    }

    #[inline]
    pub fn hour(self) -> u16 {
        self.0 / 60
    }

    #[inline]
    pub fn minute(self) -> u16 {
        self.0 % 60
    }

    /// The next minute, wrapping at midnight
    #[inline]
    pub fn succ(self) -> Self {
        MinuteOfDay((self.0 + 1) % MINUTES_PER_DAY)
    }

    /// Forward distance from `self` to `target`, always in `[0, 1439]`.
    ///
    /// The clock can only move forward, so a target that is "behind" is
    /// reached by going almost a full day around.
    #[inline]
    pub fn forward_distance_to(self, target: MinuteOfDay) -> u16 {
        (target.0 + MINUTES_PER_DAY - self.0) % MINUTES_PER_DAY
    }
}

impl fmt::Display for MinuteOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl fmt::Debug for MinuteOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MinuteOfDay({})", self)
    }
}

impl FromStr for MinuteOfDay {
    type Err = StepClockError;

    /// Parse `H:MM`/`HH:MM` (00:00 to 23:59)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StepClockError::InvalidClockTime(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;

        let field = |part: &str| -> Option<u32> {
            if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            part.parse().ok()
        };

        let hour = field(h).ok_or_else(invalid)?;
        let minute = field(m).ok_or_else(invalid)?;
        MinuteOfDay::from_hm(hour, minute).ok_or_else(invalid)
    }
}
