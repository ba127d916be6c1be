//! Authoritative time source
//!
//! Combines the host clock, the backed clock and network time under one
//! time zone rule. In network mode the host clock is authoritative and the
//! backed clock is its power-loss fallback; in manual mode the backed clock
//! is authoritative.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use stepclock_core::{LocalTime, MinuteOfDay, StepClockError, StepClockResult};

use crate::{BackedClock, FixedOffset, HostClock, NetworkTime, TimeZoneRule};

/// Network fetch budget at initialization
pub const INITIAL_FETCH_TIMEOUT: Duration = Duration::from_secs(7);

/// Network fetch budget for a resync
pub const RESYNC_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Civil jump range (seconds) recognised as a DST transition
pub const DST_FLIP_RANGE: std::ops::RangeInclusive<i64> = 55 * 60..=65 * 60;

/// Where authoritative time comes from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncMode {
    /// Host clock disciplined by network time
    Network,
    /// Backed clock set by hand
    Manual,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Network => f.write_str("network"),
            SyncMode::Manual => f.write_str("manual"),
        }
    }
}

/// Time source configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimeSourceConfig {
    NetworkWithRule { server: String, rule: TimeZoneRule },
    NetworkWithOffset { server: String, offset: FixedOffset },
    ManualWithRule { rule: TimeZoneRule },
    ManualWithOffset { offset: FixedOffset },
}

impl TimeSourceConfig {
    pub fn mode(&self) -> SyncMode {
        match self {
            TimeSourceConfig::NetworkWithRule { .. } | TimeSourceConfig::NetworkWithOffset { .. } => {
                SyncMode::Network
            }
            TimeSourceConfig::ManualWithRule { .. } | TimeSourceConfig::ManualWithOffset { .. } => {
                SyncMode::Manual
            }
        }
    }

    pub fn server(&self) -> Option<&str> {
        match self {
            TimeSourceConfig::NetworkWithRule { server, .. }
            | TimeSourceConfig::NetworkWithOffset { server, .. } => Some(server),
            _ => None,
        }
    }

    /// The effective time zone rule
    pub fn rule(&self) -> StepClockResult<TimeZoneRule> {
        match self {
            TimeSourceConfig::NetworkWithRule { rule, .. }
            | TimeSourceConfig::ManualWithRule { rule } => Ok(rule.clone()),
            TimeSourceConfig::NetworkWithOffset { offset, .. }
            | TimeSourceConfig::ManualWithOffset { offset } => TimeZoneRule::fixed(*offset),
        }
    }
}

/// Clock devices handed to the time source
pub struct TimeDevices {
    pub host: Box<dyn HostClock>,
    pub chip: Box<dyn BackedClock>,
    pub network: Box<dyn NetworkTime>,
}

/// What happened during initialization
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InitReport {
    /// Backed clock probe failure, if any
    pub hardware_error: Option<StepClockError>,
    /// Backed clock was stopped and has been seeded from the host
    pub chip_seeded: bool,
    /// UTC obtained from the network
    pub network_utc: Option<DateTime<Utc>>,
    /// Network fetch failure, if any
    pub fetch_error: Option<StepClockError>,
    /// Backed clock time was copied onto the host clock
    pub host_from_chip: bool,
}

/// Outcome of one network synchronisation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncReport {
    pub network_utc: DateTime<Utc>,
    /// Network local time minus backed clock time; `None` without a chip
    pub drift_secs: Option<i64>,
    pub backed_clock_updated: bool,
}

/// Host clock reading with its civil interpretation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockSnapshot {
    pub utc: DateTime<Utc>,
    pub local: LocalTime,
}

/// Host clock before and after a resync
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncObservation {
    pub before: ClockSnapshot,
    pub after: ClockSnapshot,
    pub sync: StepClockResult<SyncReport>,
}

impl SyncObservation {
    /// Signed civil delta (local wall time) in seconds
    pub fn delta_secs(&self) -> i64 {
        (self.after.local.datetime - self.before.local.datetime).num_seconds()
    }

    /// Whether the change looks like a DST transition: the DST flag toggled
    /// and the civil time moved by about one hour
    pub fn is_dst_flip(&self) -> bool {
        self.before.local.is_dst != self.after.local.is_dst
            && DST_FLIP_RANGE.contains(&self.delta_secs().abs())
    }
}

/// Authoritative local time provider
pub struct TimeSource {
    mode: SyncMode,
    server: Option<String>,
    rule: TimeZoneRule,
    host: Box<dyn HostClock>,
    chip: Box<dyn BackedClock>,
    network: Box<dyn NetworkTime>,
    hardware_available: bool,
    report: InitReport,
}

impl TimeSource {
    /// Bring up the time source.
    ///
    /// Only an invalid rule fails; device problems are recorded in the
    /// init report and degrade to host-only time.
    pub fn initialize(config: TimeSourceConfig, devices: TimeDevices) -> StepClockResult<Self> {
        let rule = config.rule()?;
        let mut source = TimeSource {
            mode: config.mode(),
            server: config.server().map(str::to_string),
            rule,
            host: devices.host,
            chip: devices.chip,
            network: devices.network,
            hardware_available: false,
            report: InitReport::default(),
        };

        tracing::info!(mode = %source.mode, rule = %source.rule, "initializing time source");
        source.probe_chip();

        match source.server.clone() {
            Some(server) => match source.network.fetch(&server, INITIAL_FETCH_TIMEOUT) {
                Ok(utc) => {
                    source.report.network_utc = Some(utc);
                    let local = source.rule.to_local(utc);
                    tracing::info!(server = %server, local = ?local, "network time obtained");
                    if source.hardware_available {
                        if let Err(e) = source.chip.write(local.datetime) {
                            tracing::warn!(error = %e, "failed to update backed clock");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(server = %server, error = %e, "network time unavailable, using backed clock");
                    source.report.fetch_error = Some(e);
                    source.apply_chip_to_host();
                }
            },
            None => source.apply_chip_to_host(),
        }

        Ok(source)
    }

    fn probe_chip(&mut self) {
        if let Err(e) = self.chip.begin() {
            tracing::error!(error = %e, "backed clock not found, using host clock only");
            self.report.hardware_error = Some(e);
            return;
        }
        self.hardware_available = true;

        if !self.chip.is_running() {
            let seed = self.rule.to_local(self.host.now());
            tracing::warn!(seed = ?seed, "backed clock stopped, seeding from host clock");
            match self.chip.write(seed.datetime) {
                Ok(()) => self.report.chip_seeded = true,
                Err(e) => tracing::warn!(error = %e, "failed to seed backed clock"),
            }
        }
    }

    /// Copy the backed clock's local time onto the host clock
    fn apply_chip_to_host(&mut self) {
        if !self.hardware_available {
            return;
        }
        let applied = self.chip.read().and_then(|local| {
            let utc = self.rule.from_local(local);
            self.host.set(utc).map(|()| utc)
        });
        match applied {
            Ok(utc) => {
                self.report.host_from_chip = true;
                tracing::info!(utc = %utc, "host clock set from backed clock");
            }
            Err(e) => tracing::warn!(error = %e, "could not apply backed clock to host clock"),
        }
    }

    /// Authoritative local time
    pub fn now_local(&self) -> LocalTime {
        if self.mode == SyncMode::Manual && self.hardware_available {
            match self.chip.read() {
                Ok(local) => return self.rule.resolve_local(local),
                Err(e) => tracing::debug!(error = %e, "backed clock read failed, using host clock"),
            }
        }
        self.rule.to_local(self.host.now())
    }

    /// Authoritative minute of day
    pub fn minute_of_day(&self) -> MinuteOfDay {
        self.now_local().minute_of_day()
    }

    /// Fetch network time and correct the backed clock when it drifted by
    /// more than `max_drift_secs`. The host clock is never written here.
    pub fn sync_with_ntp(&mut self, max_drift_secs: u32) -> StepClockResult<SyncReport> {
        let server = self
            .server
            .clone()
            .ok_or_else(|| StepClockError::Config("no network time server configured".into()))?;
        let network_utc = self.network.fetch(&server, RESYNC_FETCH_TIMEOUT)?;
        let network_local = self.rule.to_local(network_utc).datetime;

        if !self.hardware_available {
            return Ok(SyncReport {
                network_utc,
                drift_secs: None,
                backed_clock_updated: false,
            });
        }

        let drift_secs = self
            .chip
            .read()
            .map(|chip| (network_local - chip).num_seconds())
            .ok();
        let needs_update = match drift_secs {
            Some(drift) => drift.unsigned_abs() > max_drift_secs as u64,
            None => true,
        };
        if needs_update {
            self.chip.write(network_local)?;
            tracing::info!(drift_secs = ?drift_secs, "backed clock corrected from network time");
        }

        Ok(SyncReport {
            network_utc,
            drift_secs,
            backed_clock_updated: needs_update,
        })
    }

    /// Current host clock reading
    pub fn snapshot(&self) -> ClockSnapshot {
        let utc = self.host.now();
        ClockSnapshot {
            utc,
            local: self.rule.to_local(utc),
        }
    }

    /// Snapshot, synchronise, snapshot again
    pub fn resync(&mut self, max_drift_secs: u32) -> SyncObservation {
        let before = self.snapshot();
        let sync = self.sync_with_ntp(max_drift_secs);
        if let Ok(report) = &sync {
            if let Err(e) = self.host.discipline(report.network_utc) {
                tracing::warn!(error = %e, "host clock rejected network time");
            }
        }
        let after = self.snapshot();

        if let Err(e) = &sync {
            tracing::warn!(error = %e, "network resync failed");
        }
        tracing::info!(before = ?before.local, after = ?after.local, "resync");

        SyncObservation {
            before,
            after,
            sync,
        }
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn rule(&self) -> &TimeZoneRule {
        &self.rule
    }

    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    /// Whether the backed clock answered at initialization
    pub fn is_hardware_available(&self) -> bool {
        self.hardware_available
    }

    pub fn init_report(&self) -> &InitReport {
        &self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ZonePreset;
    use chrono::NaiveDateTime;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::Rc;

    fn utc(s: &str) -> DateTime<Utc> {
        local(s).and_utc()
    }

    fn local(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[derive(Clone)]
    struct FakeHost(Rc<Cell<DateTime<Utc>>>);

    impl HostClock for FakeHost {
        fn now(&self) -> DateTime<Utc> {
            self.0.get()
        }

        fn set(&mut self, utc: DateTime<Utc>) -> StepClockResult<()> {
            self.0.set(utc);
            Ok(())
        }
    }

    /// Host that follows network time like a disciplined system clock
    #[derive(Clone)]
    struct FollowingHost(FakeHost);

    impl HostClock for FollowingHost {
        fn now(&self) -> DateTime<Utc> {
            self.0.now()
        }

        fn set(&mut self, utc: DateTime<Utc>) -> StepClockResult<()> {
            self.0.set(utc)
        }

        fn discipline(&mut self, network_utc: DateTime<Utc>) -> StepClockResult<()> {
            self.0.set(network_utc)
        }
    }

    #[derive(Clone, Default)]
    struct FakeChip {
        time: Rc<RefCell<Option<NaiveDateTime>>>,
        absent: bool,
    }

    impl BackedClock for FakeChip {
        fn begin(&mut self) -> StepClockResult<()> {
            if self.absent {
                Err(StepClockError::HardwareUnavailable("no ack".into()))
            } else {
                Ok(())
            }
        }

        fn is_running(&self) -> bool {
            self.time.borrow().is_some()
        }

        fn read(&self) -> StepClockResult<NaiveDateTime> {
            self.time
                .borrow()
                .ok_or_else(|| StepClockError::HardwareUnavailable("stopped".into()))
        }

        fn write(&mut self, local: NaiveDateTime) -> StepClockResult<()> {
            *self.time.borrow_mut() = Some(local);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct FakeNetwork(Rc<RefCell<VecDeque<StepClockResult<DateTime<Utc>>>>>);

    impl NetworkTime for FakeNetwork {
        fn fetch(&mut self, _server: &str, timeout: Duration) -> StepClockResult<DateTime<Utc>> {
            self.0
                .borrow_mut()
                .pop_front()
                .unwrap_or(Err(StepClockError::TimeFetchTimeout(timeout)))
        }
    }

    struct Rig {
        host: FakeHost,
        chip: FakeChip,
        network: FakeNetwork,
    }

    impl Rig {
        fn new(host_utc: &str, chip_local: Option<&str>) -> Self {
            let chip = FakeChip::default();
            *chip.time.borrow_mut() = chip_local.map(local);
            Rig {
                host: FakeHost(Rc::new(Cell::new(utc(host_utc)))),
                chip,
                network: FakeNetwork::default(),
            }
        }

        fn devices(&self) -> TimeDevices {
            TimeDevices {
                host: Box::new(self.host.clone()),
                chip: Box::new(self.chip.clone()),
                network: Box::new(self.network.clone()),
            }
        }

        fn network_config() -> TimeSourceConfig {
            TimeSourceConfig::NetworkWithRule {
                server: "pool.ntp.org".into(),
                rule: ZonePreset::EuropeCentral.rule().unwrap(),
            }
        }
    }

    #[test]
    fn test_network_success_updates_chip_only() {
        let rig = Rig::new("2026-07-01 12:00:00", Some("2026-07-01 13:50:00"));
        rig.network
            .0
            .borrow_mut()
            .push_back(Ok(utc("2026-07-01 12:02:00")));

        let source = TimeSource::initialize(Rig::network_config(), rig.devices()).unwrap();
        assert_eq!(*rig.chip.time.borrow(), Some(local("2026-07-01 14:02:00")));
        assert_eq!(rig.host.0.get(), utc("2026-07-01 12:00:00"));
        assert_eq!(source.minute_of_day().to_string(), "14:00");
        assert_eq!(source.init_report().network_utc, Some(utc("2026-07-01 12:02:00")));
    }

    #[test]
    fn test_network_timeout_falls_back_to_chip() {
        let rig = Rig::new("2000-01-01 00:00:00", Some("2026-07-01 14:02:00"));

        let source = TimeSource::initialize(Rig::network_config(), rig.devices()).unwrap();
        assert!(matches!(
            source.init_report().fetch_error,
            Some(StepClockError::TimeFetchTimeout(_))
        ));
        assert!(source.init_report().host_from_chip);
        // CEST: local 14:02 is 12:02 UTC
        assert_eq!(rig.host.0.get(), utc("2026-07-01 12:02:00"));
        assert_eq!(source.minute_of_day().to_string(), "14:02");
    }

    #[test]
    fn test_resync_recovers_from_stale_chip_fallback() {
        // Chip two hours behind true local 14:02 CEST
        let rig = Rig::new("2000-01-01 00:00:00", Some("2026-07-01 12:02:00"));
        let devices = TimeDevices {
            host: Box::new(FollowingHost(rig.host.clone())),
            ..rig.devices()
        };

        let mut source = TimeSource::initialize(Rig::network_config(), devices).unwrap();
        assert!(source.init_report().host_from_chip);
        assert_eq!(source.minute_of_day().to_string(), "12:02");

        rig.network
            .0
            .borrow_mut()
            .push_back(Ok(utc("2026-07-01 12:02:10")));
        let observation = source.resync(60);

        assert!(observation.sync.is_ok());
        assert!(!observation.is_dst_flip());
        assert_eq!(observation.delta_secs(), 2 * 3600 + 10);
        assert_eq!(source.minute_of_day().to_string(), "14:02");
        assert_eq!(*rig.chip.time.borrow(), Some(local("2026-07-01 14:02:10")));
    }

    #[test]
    fn test_sync_alone_leaves_host_alone() {
        let rig = Rig::new("2026-07-01 10:00:00", Some("2026-07-01 14:00:00"));
        rig.network.0.borrow_mut().extend([
            Ok(utc("2026-07-01 12:00:00")),
            Ok(utc("2026-07-01 12:00:00")),
        ]);
        let devices = TimeDevices {
            host: Box::new(FollowingHost(rig.host.clone())),
            ..rig.devices()
        };
        let mut source = TimeSource::initialize(Rig::network_config(), devices).unwrap();

        source.sync_with_ntp(60).unwrap();
        assert_eq!(rig.host.0.get(), utc("2026-07-01 10:00:00"));
    }

    #[test]
    fn test_missing_chip_uses_host_only() {
        let mut rig = Rig::new("2026-01-10 08:30:00", None);
        rig.chip.absent = true;
        let config = TimeSourceConfig::ManualWithOffset {
            offset: FixedOffset::new(1, 0, false),
        };

        let source = TimeSource::initialize(config, rig.devices()).unwrap();
        assert!(!source.is_hardware_available());
        assert!(matches!(
            source.init_report().hardware_error,
            Some(StepClockError::HardwareUnavailable(_))
        ));
        assert_eq!(source.minute_of_day().to_string(), "09:30");
    }

    #[test]
    fn test_stopped_chip_is_seeded_from_host() {
        let rig = Rig::new("2026-01-10 08:30:00", None);
        let config = TimeSourceConfig::ManualWithRule {
            rule: ZonePreset::EuropeCentral.rule().unwrap(),
        };

        let source = TimeSource::initialize(config, rig.devices()).unwrap();
        assert!(source.init_report().chip_seeded);
        assert_eq!(*rig.chip.time.borrow(), Some(local("2026-01-10 09:30:00")));
    }

    #[test]
    fn test_manual_mode_reads_chip() {
        let rig = Rig::new("2026-01-10 08:30:00", Some("2026-01-10 17:45:00"));
        let config = TimeSourceConfig::ManualWithRule {
            rule: ZonePreset::EuropeCentral.rule().unwrap(),
        };

        let mut source = TimeSource::initialize(config, rig.devices()).unwrap();
        assert_eq!(source.mode(), SyncMode::Manual);
        assert_eq!(source.minute_of_day().to_string(), "17:45");

        // Chip moves on its own; host is not consulted
        *rig.chip.time.borrow_mut() = Some(local("2026-01-10 17:46:30"));
        assert_eq!(source.minute_of_day().to_string(), "17:46");
        assert!(matches!(source.sync_with_ntp(60), Err(StepClockError::Config(_))));
    }

    #[test]
    fn test_sync_updates_chip_only_beyond_threshold() {
        let rig = Rig::new("2026-07-01 12:00:00", Some("2026-07-01 14:00:00"));
        rig.network.0.borrow_mut().extend([
            Ok(utc("2026-07-01 12:00:00")),
            Ok(utc("2026-07-01 12:00:30")),
            Ok(utc("2026-07-01 12:05:00")),
        ]);
        let mut source = TimeSource::initialize(Rig::network_config(), rig.devices()).unwrap();

        let small = source.sync_with_ntp(60).unwrap();
        assert_eq!(small.drift_secs, Some(30));
        assert!(!small.backed_clock_updated);

        let large = source.sync_with_ntp(60).unwrap();
        assert_eq!(large.drift_secs, Some(300));
        assert!(large.backed_clock_updated);
        assert_eq!(*rig.chip.time.borrow(), Some(local("2026-07-01 14:05:00")));
        assert_eq!(rig.host.0.get(), utc("2026-07-01 12:00:00"));
    }

    #[test]
    fn test_dst_flip_detection() {
        let rule = ZonePreset::EuropeCentral.rule().unwrap();
        let snap = |s: &str| ClockSnapshot {
            utc: utc(s),
            local: rule.to_local(utc(s)),
        };
        let observe = |a: &str, b: &str| SyncObservation {
            before: snap(a),
            after: snap(b),
            sync: Err(StepClockError::TimeFetchTimeout(RESYNC_FETCH_TIMEOUT)),
        };

        let spring = observe("2026-03-29 00:59:00", "2026-03-29 01:01:00");
        assert_eq!(spring.delta_secs(), 62 * 60);
        assert!(spring.is_dst_flip());

        let autumn = observe("2026-10-25 00:58:00", "2026-10-25 01:01:00");
        assert_eq!(autumn.delta_secs(), -57 * 60);
        assert!(autumn.is_dst_flip());

        let plain = observe("2026-07-01 12:00:00", "2026-07-01 13:00:00");
        assert!(!plain.is_dst_flip());

        let big_jump = observe("2026-03-29 00:00:00", "2026-03-29 02:00:00");
        assert!(!big_jump.is_dst_flip());
    }
}
