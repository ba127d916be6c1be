//! Wall clocks: the host system clock and the battery-backed clock chip
//!
//! The host clock keeps UTC. The backed clock keeps local wall time (no
//! offset information) and survives power loss.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use stepclock_core::{StepClockError, StepClockResult};

/// The host system clock (UTC)
pub trait HostClock {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;

    /// Set the clock to `utc`
    fn set(&mut self, utc: DateTime<Utc>) -> StepClockResult<()>;

    /// Offer a fresh network reading.
    ///
    /// Hosts whose system clock is kept by an external time daemon leave
    /// this as a no-op.
    fn discipline(&mut self, _network_utc: DateTime<Utc>) -> StepClockResult<()> {
        Ok(())
    }
}

/// Battery-backed clock chip holding local wall time
pub trait BackedClock {
    /// Probe the device; fails when it is absent
    fn begin(&mut self) -> StepClockResult<()>;

    /// Whether the oscillator is running (false after a battery loss)
    fn is_running(&self) -> bool;

    /// Current local wall time
    fn read(&self) -> StepClockResult<NaiveDateTime>;

    /// Set local wall time
    fn write(&mut self, local: NaiveDateTime) -> StepClockResult<()>;
}

/// Host clock over the process's view of system time.
///
/// `set` only shifts an in-process offset; the operating system clock is
/// never written. `discipline` re-anchors the offset on network time, so a
/// step taken from the backed clock during an outage is undone by the next
/// successful fetch.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemHostClock {
    offset: Duration,
}

impl SystemHostClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset applied on top of system time
    pub fn offset(&self) -> Duration {
        self.offset
    }
}

impl HostClock for SystemHostClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.offset
    }

    fn set(&mut self, utc: DateTime<Utc>) -> StepClockResult<()> {
        self.offset = utc - Utc::now();
        tracing::debug!(offset_ms = self.offset.num_milliseconds(), "host clock adjusted");
        Ok(())
    }

    fn discipline(&mut self, network_utc: DateTime<Utc>) -> StepClockResult<()> {
        let offset = network_utc - Utc::now();
        if (offset - self.offset).num_seconds().abs() >= 1 {
            tracing::info!(
                from_ms = self.offset.num_milliseconds(),
                to_ms = offset.num_milliseconds(),
                "host clock disciplined by network time"
            );
        }
        self.offset = offset;
        Ok(())
    }
}

const RECORD_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Backed clock emulated with a file.
///
/// The file holds the local time that was written and the UTC second at
/// which it was written (`2026-03-29T01:59:00 1774749540`). Reads advance the
/// stored time by the seconds elapsed since, so the chip keeps ticking while
/// the process is down.
#[derive(Clone, Debug)]
pub struct FileBackedClock {
    path: PathBuf,
}

impl FileBackedClock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileBackedClock { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StepClockResult<(NaiveDateTime, i64)> {
        let unavailable = |what: String| {
            StepClockError::HardwareUnavailable(format!("{}: {}", self.path.display(), what))
        };
        let content = fs::read_to_string(&self.path).map_err(|e| unavailable(e.to_string()))?;
        let mut fields = content.split_whitespace();
        let local = fields
            .next()
            .and_then(|f| NaiveDateTime::parse_from_str(f, RECORD_FORMAT).ok())
            .ok_or_else(|| unavailable("bad local time".into()))?;
        let written_at = fields
            .next()
            .and_then(|f| f.parse::<i64>().ok())
            .ok_or_else(|| unavailable("bad write stamp".into()))?;
        Ok((local, written_at))
    }
}

impl BackedClock for FileBackedClock {
    fn begin(&mut self) -> StepClockResult<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        if dir.is_dir() {
            Ok(())
        } else {
            Err(StepClockError::HardwareUnavailable(format!(
                "{}: directory missing",
                self.path.display()
            )))
        }
    }

    fn is_running(&self) -> bool {
        self.load().is_ok()
    }

    fn read(&self) -> StepClockResult<NaiveDateTime> {
        let (local, written_at) = self.load()?;
        let elapsed = (Utc::now().timestamp() - written_at).max(0);
        Ok(local + Duration::seconds(elapsed))
    }

    fn write(&mut self, local: NaiveDateTime) -> StepClockResult<()> {
        let record = format!("{} {}\n", local.format(RECORD_FORMAT), Utc::now().timestamp());
        fs::write(&self.path, record).map_err(|e| {
            StepClockError::HardwareUnavailable(format!("{}: {}", self.path.display(), e))
        })
    }
}
