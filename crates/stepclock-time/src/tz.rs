//! Time zone rules (POSIX TZ strings)
//!
//! A rule such as `CET-1CEST,M3.5.0/2,M10.5.0/3` selects the civil offset
//! and DST state for any UTC instant. Rules can also be built from a fixed
//! hour/minute offset or from a named preset.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};

use stepclock_core::{LocalTime, StepClockError, StepClockResult};

/// Default transition time of day (02:00 local)
const DEFAULT_TRANSITION_TIME: i32 = 2 * 3600;

/// Limit for transition times (POSIX extension allows +-167h)
const MAX_TRANSITION_HOURS: u32 = 167;

/// Named zone with its offset east of UTC in seconds
#[derive(Clone, Debug, PartialEq, Eq)]
struct Designation {
    abbr: String,
    offset: i32,
}

/// Day a DST transition falls on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TransitionDate {
    /// `Jn`: day 1-365, February 29 never counted
    JulianNoLeap(u16),
    /// `n`: day 0-365, February 29 counted in leap years
    JulianZero(u16),
    /// `Mm.w.d`: weekday `d` (0 = Sunday) of week `w` (5 = last) in month `m`
    MonthWeekDay { month: u32, week: u32, weekday: u32 },
}

impl TransitionDate {
    fn resolve(self, year: i32) -> Option<NaiveDate> {
        match self {
            TransitionDate::JulianNoLeap(day) => {
                let leap = NaiveDate::from_ymd_opt(year, 2, 29).is_some();
                let ordinal = if leap && day >= 60 { day + 1 } else { day };
                NaiveDate::from_yo_opt(year, ordinal as u32)
            }
            TransitionDate::JulianZero(day) => NaiveDate::from_yo_opt(year, day as u32 + 1),
            TransitionDate::MonthWeekDay {
                month,
                week,
                weekday,
            } => {
                let first = NaiveDate::from_ymd_opt(year, month, 1)?;
                let first_weekday = first.weekday().num_days_from_sunday();
                let mut day = 1 + (weekday + 7 - first_weekday) % 7 + (week - 1) * 7;
                let last = days_in_month(year, month)?;
                while day > last {
                    day -= 7;
                }
                NaiveDate::from_ymd_opt(year, month, day)
            }
        }
    }
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some(next.pred_opt()?.day())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Transition {
    date: TransitionDate,
    /// Seconds after local midnight (may be negative or exceed a day)
    time: i32,
}

impl Transition {
    /// UTC timestamp of this transition in `year`, given the offset in
    /// force just before it
    fn utc_timestamp(&self, year: i32, offset_before: i32) -> Option<i64> {
        let midnight = self.date.resolve(year)?.and_hms_opt(0, 0, 0)?;
        Some(midnight.and_utc().timestamp() + self.time as i64 - offset_before as i64)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct DstRule {
    zone: Designation,
    start: Transition,
    end: Transition,
}

/// Civil offset in force at an instant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CivilOffset {
    /// Seconds east of UTC
    pub offset: i32,
    pub is_dst: bool,
}

/// Time zone rule selecting civil offset and DST behaviour
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeZoneRule {
    source: String,
    std: Designation,
    dst: Option<DstRule>,
}

impl TimeZoneRule {
    /// Parse a POSIX TZ rule string
    pub fn parse(rule: &str) -> StepClockResult<Self> {
        let fail = |what: &str| StepClockError::InvalidTimeZone(format!("{:?}: {}", rule, what));
        let mut cur = Cursor::new(rule.trim());

        let std_abbr = cur.name().ok_or_else(|| fail("missing standard zone name"))?;
        let std_west = cur
            .offset()
            .ok_or_else(|| fail("missing or invalid standard offset"))?;
        let std = Designation {
            abbr: std_abbr,
            offset: -std_west,
        };

        if cur.at_end() {
            return Ok(TimeZoneRule {
                source: rule.trim().to_string(),
                std,
                dst: None,
            });
        }

        let dst_abbr = cur.name().ok_or_else(|| fail("invalid daylight zone name"))?;
        let dst_west = if cur.starts_offset() {
            cur.offset()
                .ok_or_else(|| fail("invalid daylight offset"))?
        } else {
            std_west - 3600
        };

        let (start, end) = if cur.eat(b',') {
            let start = cur
                .transition()
                .ok_or_else(|| fail("invalid DST start rule"))?;
            if !cur.eat(b',') {
                return Err(fail("missing DST end rule"));
            }
            let end = cur.transition().ok_or_else(|| fail("invalid DST end rule"))?;
            (start, end)
        } else {
            // Same default as the C library: US rules
            (
                Transition {
                    date: TransitionDate::MonthWeekDay {
                        month: 3,
                        week: 2,
                        weekday: 0,
                    },
                    time: DEFAULT_TRANSITION_TIME,
                },
                Transition {
                    date: TransitionDate::MonthWeekDay {
                        month: 11,
                        week: 1,
                        weekday: 0,
                    },
                    time: DEFAULT_TRANSITION_TIME,
                },
            )
        };

        if !cur.at_end() {
            return Err(fail("unexpected trailing characters"));
        }

        Ok(TimeZoneRule {
            source: rule.trim().to_string(),
            std,
            dst: Some(DstRule {
                zone: Designation {
                    abbr: dst_abbr,
                    offset: -dst_west,
                },
                start,
                end,
            }),
        })
    }

    /// Coordinated Universal Time, no DST
    pub fn utc() -> Self {
        TimeZoneRule {
            source: "UTC0".to_string(),
            std: Designation {
                abbr: "UTC".to_string(),
                offset: 0,
            },
            dst: None,
        }
    }

    /// Rule for a fixed offset; with `dst` set, EU-style transitions apply
    /// around it (last Sunday of March/October at 01:00 UTC)
    pub fn fixed(offset: FixedOffset) -> StepClockResult<Self> {
        let east = offset.offset_secs()?;
        let rule = if offset.dst {
            format!(
                "LTZ{}LDT,M3.5.0/{},M10.5.0/{}",
                format_hms(-east),
                format_hms(3600 + east),
                format_hms(2 * 3600 + east)
            )
        } else {
            format!("LTZ{}", format_hms(-east))
        };
        Self::parse(&rule)
    }

    /// The rule as a POSIX TZ string
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn has_dst(&self) -> bool {
        self.dst.is_some()
    }

    /// Offset and DST state in force at `utc`
    pub fn civil_offset(&self, utc: DateTime<Utc>) -> CivilOffset {
        let standard = CivilOffset {
            offset: self.std.offset,
            is_dst: false,
        };
        let Some(dst) = &self.dst else {
            return standard;
        };

        let year = (utc + Duration::seconds(self.std.offset as i64)).year();
        let start = dst.start.utc_timestamp(year, self.std.offset);
        let end = dst.end.utc_timestamp(year, dst.zone.offset);
        let (Some(start), Some(end)) = (start, end) else {
            return standard;
        };

        let ts = utc.timestamp();
        let in_dst = if start < end {
            ts >= start && ts < end
        } else {
            // Southern hemisphere: DST spans the new year
            !(ts >= end && ts < start)
        };

        if in_dst {
            CivilOffset {
                offset: dst.zone.offset,
                is_dst: true,
            }
        } else {
            standard
        }
    }

    /// Civil time at `utc`
    pub fn to_local(&self, utc: DateTime<Utc>) -> LocalTime {
        let civil = self.civil_offset(utc);
        let datetime = (utc + Duration::seconds(civil.offset as i64)).naive_utc();
        LocalTime::new(datetime, civil.offset, civil.is_dst)
    }

    /// UTC instant of a civil time.
    ///
    /// Ambiguous times (clocks going back) resolve to standard time; times
    /// skipped by a spring-forward jump are read as standard time and so
    /// land after the jump.
    pub fn from_local(&self, local: NaiveDateTime) -> DateTime<Utc> {
        let as_std = local.and_utc() - Duration::seconds(self.std.offset as i64);
        let Some(dst) = &self.dst else {
            return as_std;
        };
        if !self.civil_offset(as_std).is_dst {
            return as_std;
        }

        let as_dst = local.and_utc() - Duration::seconds(dst.zone.offset as i64);
        if self.civil_offset(as_dst).is_dst {
            as_dst
        } else {
            as_std
        }
    }

    /// Civil time of a local reading, with offset and DST flag filled in
    pub fn resolve_local(&self, local: NaiveDateTime) -> LocalTime {
        let civil = self.civil_offset(self.from_local(local));
        LocalTime::new(local, civil.offset, civil.is_dst)
    }
}

impl fmt::Display for TimeZoneRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Fixed hour/minute offset with optional DST
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedOffset {
    /// Hours east of UTC (-12..=14); the sign applies to the minutes too
    pub hours: i32,
    /// Additional minutes (0..=59)
    pub minutes: u32,
    /// Apply EU-style DST around the offset
    pub dst: bool,
}

impl FixedOffset {
    pub fn new(hours: i32, minutes: u32, dst: bool) -> Self {
        FixedOffset {
            hours,
            minutes,
            dst,
        }
    }

    /// Offset east of UTC in seconds
    pub fn offset_secs(&self) -> StepClockResult<i32> {
        if !(-12..=14).contains(&self.hours) || self.minutes > 59 {
            return Err(StepClockError::InvalidTimeZone(format!(
                "offset {}:{:02} out of range",
                self.hours, self.minutes
            )));
        }
        let magnitude = self.hours.abs() * 3600 + self.minutes as i32 * 60;
        Ok(if self.hours < 0 { -magnitude } else { magnitude })
    }
}

/// Named region presets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZonePreset {
    Utc,
    EuropeWestern,
    EuropeCentral,
    EuropeEastern,
    UsEastern,
    UsCentral,
    UsMountain,
    UsPacific,
}

impl ZonePreset {
    pub const ALL: [ZonePreset; 8] = [
        ZonePreset::Utc,
        ZonePreset::EuropeWestern,
        ZonePreset::EuropeCentral,
        ZonePreset::EuropeEastern,
        ZonePreset::UsEastern,
        ZonePreset::UsCentral,
        ZonePreset::UsMountain,
        ZonePreset::UsPacific,
    ];

    /// Look up a preset by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "utc" | "gmt" => Some(ZonePreset::Utc),
            "wet" | "uk" | "eu-western" => Some(ZonePreset::EuropeWestern),
            "eu" | "cet" | "eu-central" => Some(ZonePreset::EuropeCentral),
            "eet" | "eu-eastern" => Some(ZonePreset::EuropeEastern),
            "us-eastern" => Some(ZonePreset::UsEastern),
            "us-central" => Some(ZonePreset::UsCentral),
            "us-mountain" => Some(ZonePreset::UsMountain),
            "us-pacific" => Some(ZonePreset::UsPacific),
            _ => None,
        }
    }

    /// POSIX TZ string of this preset
    pub fn posix(self) -> &'static str {
        match self {
            ZonePreset::Utc => "UTC0",
            ZonePreset::EuropeWestern => "WET0WEST,M3.5.0/1,M10.5.0",
            ZonePreset::EuropeCentral => "CET-1CEST,M3.5.0/2,M10.5.0/3",
            ZonePreset::EuropeEastern => "EET-2EEST,M3.5.0/3,M10.5.0/4",
            ZonePreset::UsEastern => "EST5EDT,M3.2.0,M11.1.0",
            ZonePreset::UsCentral => "CST6CDT,M3.2.0,M11.1.0",
            ZonePreset::UsMountain => "MST7MDT,M3.2.0,M11.1.0",
            ZonePreset::UsPacific => "PST8PDT,M3.2.0,M11.1.0",
        }
    }

    pub fn rule(self) -> StepClockResult<TimeZoneRule> {
        TimeZoneRule::parse(self.posix())
    }
}

/// Format seconds as POSIX `[-]h[:mm[:ss]]`
fn format_hms(secs: i32) -> String {
    let sign = if secs < 0 { "-" } else { "" };
    let abs = secs.unsigned_abs();
    let (h, m, s) = (abs / 3600, (abs % 3600) / 60, abs % 60);
    match (m, s) {
        (0, 0) => format!("{}{}", sign, h),
        (_, 0) => format!("{}{}:{:02}", sign, h, m),
        _ => format!("{}{}:{:02}:{:02}", sign, h, m, s),
    }
}

/// Byte cursor over a TZ string
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(s: &'a str) -> Self {
        Cursor {
            bytes: s.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn starts_offset(&self) -> bool {
        matches!(self.peek(), Some(b) if b.is_ascii_digit() || b == b'+' || b == b'-')
    }

    /// Zone name: 3+ letters, or `<...>` quoted
    fn name(&mut self) -> Option<String> {
        let start = self.pos;
        if self.eat(b'<') {
            while let Some(b) = self.peek() {
                if b == b'>' {
                    let name = std::str::from_utf8(&self.bytes[start + 1..self.pos]).ok()?;
                    self.pos += 1;
                    return (name.len() >= 3).then(|| name.to_string());
                }
                if !(b.is_ascii_alphanumeric() || b == b'+' || b == b'-') {
                    return None;
                }
                self.pos += 1;
            }
            return None;
        }

        while matches!(self.peek(), Some(b) if b.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        let name = std::str::from_utf8(&self.bytes[start..self.pos]).ok()?;
        (name.len() >= 3).then(|| name.to_string())
    }

    fn number(&mut self) -> Option<u32> {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) && self.pos - start < 4 {
            self.pos += 1;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()?
            .parse()
            .ok()
    }

    /// `[+-]hh[:mm[:ss]]` in seconds; hours limited to `max_hours`
    fn hms(&mut self, max_hours: u32) -> Option<i32> {
        let negative = if self.eat(b'-') {
            true
        } else {
            self.eat(b'+');
            false
        };
        let hours = self.number().filter(|h| *h <= max_hours)?;
        let mut secs = hours * 3600;
        if self.eat(b':') {
            secs += self.number().filter(|m| *m < 60)? * 60;
            if self.eat(b':') {
                secs += self.number().filter(|s| *s < 60)?;
            }
        }
        let secs = secs as i32;
        Some(if negative { -secs } else { secs })
    }

    /// Zone offset, west of UTC as written in TZ strings
    fn offset(&mut self) -> Option<i32> {
        self.hms(24)
    }

    fn transition(&mut self) -> Option<Transition> {
        let date = if self.eat(b'M') {
            let month = self.number().filter(|m| (1..=12).contains(m))?;
            if !self.eat(b'.') {
                return None;
            }
            let week = self.number().filter(|w| (1..=5).contains(w))?;
            if !self.eat(b'.') {
                return None;
            }
            let weekday = self.number().filter(|d| *d <= 6)?;
            TransitionDate::MonthWeekDay {
                month,
                week,
                weekday,
            }
        } else if self.eat(b'J') {
            TransitionDate::JulianNoLeap(self.number().filter(|d| (1..=365).contains(d))? as u16)
        } else {
            TransitionDate::JulianZero(self.number().filter(|d| *d <= 365)? as u16)
        };

        let time = if self.eat(b'/') {
            self.hms(MAX_TRANSITION_HOURS)?
        } else {
            DEFAULT_TRANSITION_TIME
        };
        Some(Transition { date, time })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn utc(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    fn local(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn cet() -> TimeZoneRule {
        ZonePreset::EuropeCentral.rule().unwrap()
    }

    #[test]
    fn test_parse_cet() {
        let rule = cet();
        assert!(rule.has_dst());
        assert_eq!(rule.as_str(), "CET-1CEST,M3.5.0/2,M10.5.0/3");

        let winter = rule.civil_offset(utc("2026-01-15 12:00:00"));
        assert_eq!(winter, CivilOffset { offset: 3600, is_dst: false });
        let summer = rule.civil_offset(utc("2026-07-15 12:00:00"));
        assert_eq!(summer, CivilOffset { offset: 7200, is_dst: true });
    }

    #[test]
    fn test_cet_spring_forward_edges() {
        // 2026-03-29 is the last Sunday of March; switch at 01:00 UTC
        let rule = cet();
        assert!(!rule.civil_offset(utc("2026-03-29 00:59:59")).is_dst);
        assert!(rule.civil_offset(utc("2026-03-29 01:00:00")).is_dst);

        let before = rule.to_local(utc("2026-03-29 00:59:00"));
        let after = rule.to_local(utc("2026-03-29 01:01:00"));
        assert_eq!(before.minute_of_day().to_string(), "01:59");
        assert_eq!(after.minute_of_day().to_string(), "03:01");
    }

    #[test]
    fn test_cet_fall_back_edges() {
        // 2026-10-25 is the last Sunday of October; back at 01:00 UTC
        let rule = cet();
        assert!(rule.civil_offset(utc("2026-10-25 00:59:59")).is_dst);
        assert!(!rule.civil_offset(utc("2026-10-25 01:00:00")).is_dst);
    }

    #[test]
    fn test_us_default_rules_without_dates() {
        let rule = TimeZoneRule::parse("EST5EDT").unwrap();
        // 2026-03-08 is the second Sunday of March; 02:00 EST = 07:00 UTC
        assert!(!rule.civil_offset(utc("2026-03-08 06:59:59")).is_dst);
        assert!(rule.civil_offset(utc("2026-03-08 07:00:00")).is_dst);
        assert_eq!(rule.civil_offset(utc("2026-07-01 00:00:00")).offset, -4 * 3600);
    }

    #[test]
    fn test_southern_hemisphere() {
        // New Zealand: DST from last Sunday of September to first Sunday of April
        let rule = TimeZoneRule::parse("NZST-12NZDT,M9.5.0,M4.1.0/3").unwrap();
        assert!(rule.civil_offset(utc("2026-01-10 00:00:00")).is_dst);
        assert!(!rule.civil_offset(utc("2026-06-10 00:00:00")).is_dst);
        assert_eq!(rule.civil_offset(utc("2026-01-10 00:00:00")).offset, 13 * 3600);
    }

    #[test]
    fn test_quoted_names_and_julian_dates() {
        let rule = TimeZoneRule::parse("<+0330>-3:30<+0430>,J79/24,J263/24").unwrap();
        assert_eq!(rule.civil_offset(utc("2026-01-01 00:00:00")).offset, 3 * 3600 + 1800);
        assert_eq!(rule.civil_offset(utc("2026-06-01 00:00:00")).offset, 4 * 3600 + 1800);

        let zero = TimeZoneRule::parse("AAA0BBB,0/0,364/0").unwrap();
        assert!(zero.civil_offset(utc("2026-06-01 00:00:00")).is_dst);
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "",
            "C1",
            "CET",
            "CET-1CEST,M3.5.0",
            "CET-1CEST,M13.5.0,M10.5.0",
            "CET-1CEST,M3.6.0,M10.5.0",
            "CET-25",
            "CET-1CEST,M3.5.0/2,M10.5.0/3x",
        ] {
            let err = TimeZoneRule::parse(bad).unwrap_err();
            assert!(matches!(err, StepClockError::InvalidTimeZone(_)), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_fixed_offset_with_dst_matches_cet() {
        let fixed = TimeZoneRule::fixed(FixedOffset::new(1, 0, true)).unwrap();
        let preset = cet();

        for instant in [
            "2026-03-29 00:59:59",
            "2026-03-29 01:00:00",
            "2026-07-01 12:00:00",
            "2026-10-25 00:59:59",
            "2026-10-25 01:00:00",
        ] {
            assert_eq!(
                fixed.civil_offset(utc(instant)),
                preset.civil_offset(utc(instant)),
                "{instant}"
            );
        }
    }

    #[test]
    fn test_fixed_offset_half_hours() {
        let india = TimeZoneRule::fixed(FixedOffset::new(5, 30, false)).unwrap();
        assert_eq!(india.as_str(), "LTZ-5:30");
        assert_eq!(india.civil_offset(utc("2026-01-01 00:00:00")).offset, 19800);

        let newfoundland = TimeZoneRule::fixed(FixedOffset::new(-3, 30, false)).unwrap();
        assert_eq!(newfoundland.civil_offset(utc("2026-01-01 00:00:00")).offset, -12600);

        assert!(TimeZoneRule::fixed(FixedOffset::new(15, 0, false)).is_err());
    }

    #[test]
    fn test_all_presets_parse() {
        for preset in ZonePreset::ALL {
            assert!(preset.rule().is_ok(), "{:?}", preset);
        }
        assert_eq!(ZonePreset::from_name("EU"), Some(ZonePreset::EuropeCentral));
        assert_eq!(ZonePreset::from_name("mars"), None);
    }

    #[test]
    fn test_from_local_round_trip_and_gap() {
        let rule = cet();
        let summer = local("2026-07-01 14:02:00");
        assert_eq!(rule.to_local(rule.from_local(summer)).datetime, summer);

        // 02:30 does not exist on 2026-03-29; it lands after the jump
        let skipped = rule.from_local(local("2026-03-29 02:30:00"));
        assert_eq!(skipped, utc("2026-03-29 01:30:00"));
        assert_eq!(rule.to_local(skipped).minute_of_day().to_string(), "03:30");

        // 02:30 happens twice on 2026-10-25; standard time wins
        let ambiguous = rule.resolve_local(local("2026-10-25 02:30:00"));
        assert!(!ambiguous.is_dst);
    }

    proptest! {
        #[test]
        fn prop_local_time_survives_round_trip(secs in 1_735_689_600i64..1_893_456_000) {
            let instant = DateTime::from_timestamp(secs, 0).unwrap();
            for preset in [ZonePreset::EuropeCentral, ZonePreset::UsPacific] {
                let rule = preset.rule().unwrap();
                let shown = rule.to_local(instant).datetime;
                prop_assert_eq!(rule.to_local(rule.from_local(shown)).datetime, shown);
            }
        }
    }
}
