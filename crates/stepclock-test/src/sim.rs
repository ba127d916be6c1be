//! Simulated world - every clock and device on one shared timeline
//!
//! Simulates:
//! - True UTC plus a host clock skewed from it
//! - A battery-backed chip that ticks with true time
//! - An SNTP service that can be down or discipline the host on contact
//! - The H-bridge, the position record and the monotonic clock
//!
//! Holds on the monotonic clock advance the whole world, so pulse drive
//! and dead time consume simulated wall time exactly as on hardware.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::{Mutex, MutexGuard};

use stepclock_core::{MonotonicClock, StepClockError, StepClockResult};
use stepclock_drive::{Bridge, Phase, PulseDriver, PulseTiming};
use stepclock_runtime::{CatchUpEngine, EngineConfig, PollOutcome};
use stepclock_state::{PersistedPosition, RecordStore};
use stepclock_time::{
    BackedClock, HostClock, NetworkTime, TimeDevices, TimeSource, TimeSourceConfig, TimeZoneRule,
    ZonePreset,
};

/// Shared simulation state
#[derive(Clone, Debug)]
pub struct SimState {
    /// Monotonic time since the world began
    pub mono: Duration,
    pub true_utc: DateTime<Utc>,
    /// Host clock minus true time
    pub host_skew: chrono::Duration,
    pub chip_present: bool,
    /// Chip local time; `None` while stopped
    pub chip: Option<NaiveDateTime>,
    pub network_up: bool,
    /// A successful fetch also zeroes the host skew (time daemon behaviour)
    pub sntp_disciplines_host: bool,
    pub fetches: u32,
    pub bridge_fails: bool,
    pub phases: Vec<Phase>,
    pub record: Option<String>,
    pub store_writable: bool,
}

impl SimState {
    fn advance(&mut self, d: Duration) {
        let step = chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero());
        self.mono += d;
        self.true_utc += step;
        if let Some(chip) = self.chip.as_mut() {
            *chip += step;
        }
    }

    pub fn host_utc(&self) -> DateTime<Utc> {
        self.true_utc + self.host_skew
    }
}

/// Handle to the simulated world
#[derive(Clone, Debug)]
pub struct SimWorld {
    state: Arc<Mutex<SimState>>,
}

impl SimWorld {
    /// World at `true_utc` with a network, a running chip showing true
    /// local time under `rule`, and an empty record
    pub fn new(true_utc: DateTime<Utc>, rule: &TimeZoneRule) -> Self {
        SimWorld {
            state: Arc::new(Mutex::new(SimState {
                mono: Duration::ZERO,
                true_utc,
                host_skew: chrono::Duration::zero(),
                chip_present: true,
                chip: Some(rule.to_local(true_utc).datetime),
                network_up: true,
                sntp_disciplines_host: true,
                fetches: 0,
                bridge_fails: false,
                phases: Vec::new(),
                record: None,
                store_writable: true,
            })),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock()
    }

    pub fn advance(&self, d: Duration) {
        self.state.lock().advance(d);
    }

    pub fn set_record(&self, record: &str) {
        self.state.lock().record = Some(record.to_string());
    }

    pub fn record(&self) -> Option<String> {
        self.state.lock().record.clone()
    }

    pub fn set_host_skew(&self, skew: chrono::Duration) {
        self.state.lock().host_skew = skew;
    }

    pub fn pulses(&self) -> usize {
        self.state.lock().phases.len()
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.state.lock().phases.clone()
    }

    pub fn monotonic(&self) -> SimMonotonic {
        SimMonotonic(self.clone())
    }

    pub fn host(&self) -> SimHost {
        SimHost(self.clone())
    }

    pub fn chip(&self) -> SimChip {
        SimChip(self.clone())
    }

    pub fn network(&self) -> SimNetwork {
        SimNetwork(self.clone())
    }

    pub fn bridge(&self) -> SimBridge {
        SimBridge(self.clone())
    }

    pub fn store(&self) -> SimStore {
        SimStore(self.clone())
    }
}

/// Monotonic clock; `hold` advances the world
#[derive(Clone, Debug)]
pub struct SimMonotonic(SimWorld);

impl MonotonicClock for SimMonotonic {
    fn elapsed(&self) -> Duration {
        self.0.state().mono
    }

    fn hold(&self, duration: Duration) {
        self.0.advance(duration);
    }
}

#[derive(Clone, Debug)]
pub struct SimHost(SimWorld);

impl HostClock for SimHost {
    fn now(&self) -> DateTime<Utc> {
        self.0.state().host_utc()
    }

    fn set(&mut self, utc: DateTime<Utc>) -> StepClockResult<()> {
        let mut state = self.0.state();
        let skew = utc - state.true_utc;
        state.host_skew = skew;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct SimChip(SimWorld);

impl BackedClock for SimChip {
    fn begin(&mut self) -> StepClockResult<()> {
        if self.0.state().chip_present {
            Ok(())
        } else {
            Err(StepClockError::HardwareUnavailable("no answer on bus".into()))
        }
    }

    fn is_running(&self) -> bool {
        self.0.state().chip.is_some()
    }

    fn read(&self) -> StepClockResult<NaiveDateTime> {
        let state = self.0.state();
        if !state.chip_present {
            return Err(StepClockError::HardwareUnavailable("no answer on bus".into()));
        }
        state
            .chip
            .ok_or_else(|| StepClockError::HardwareUnavailable("oscillator stopped".into()))
    }

    fn write(&mut self, local: NaiveDateTime) -> StepClockResult<()> {
        let mut state = self.0.state();
        if !state.chip_present {
            return Err(StepClockError::HardwareUnavailable("no answer on bus".into()));
        }
        state.chip = Some(local);
        Ok(())
    }
}

/// SNTP service; when down, a fetch burns its whole timeout
#[derive(Clone, Debug)]
pub struct SimNetwork(SimWorld);

impl NetworkTime for SimNetwork {
    fn fetch(&mut self, _server: &str, timeout: Duration) -> StepClockResult<DateTime<Utc>> {
        let mut state = self.0.state();
        state.fetches += 1;
        if !state.network_up {
            state.advance(timeout);
            return Err(StepClockError::TimeFetchTimeout(timeout));
        }
        if state.sntp_disciplines_host {
            state.host_skew = chrono::Duration::zero();
        }
        Ok(state.true_utc)
    }
}

#[derive(Clone, Debug)]
pub struct SimBridge(SimWorld);

impl Bridge for SimBridge {
    fn drive(&mut self, phase: Phase) -> StepClockResult<()> {
        let mut state = self.0.state();
        if state.bridge_fails {
            return Err(StepClockError::Actuator("bridge fault".into()));
        }
        state.phases.push(phase);
        Ok(())
    }

    fn coast(&mut self) -> StepClockResult<()> {
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct SimStore(SimWorld);

impl RecordStore for SimStore {
    fn read(&self) -> StepClockResult<Option<String>> {
        Ok(self.0.state().record.clone())
    }

    fn write(&mut self, record: &str) -> StepClockResult<()> {
        let mut state = self.0.state();
        if !state.store_writable {
            return Err(StepClockError::Storage("read-only medium".into()));
        }
        state.record = Some(record.to_string());
        Ok(())
    }
}

/// Builder wiring a simulated world into a booted engine
#[derive(Clone, Debug)]
pub struct SimRig {
    pub world: SimWorld,
    pub rule: TimeZoneRule,
    pub manual: bool,
    pub timing: PulseTiming,
    pub engine: EngineConfig,
}

impl SimRig {
    /// Network-mode rig, central European time, default timing
    pub fn network(true_utc: DateTime<Utc>) -> StepClockResult<Self> {
        let rule = ZonePreset::EuropeCentral.rule()?;
        Ok(SimRig {
            world: SimWorld::new(true_utc, &rule),
            rule,
            manual: false,
            timing: PulseTiming::default(),
            engine: EngineConfig::default(),
        })
    }

    /// Manual-mode rig, central European time, default timing
    pub fn manual(true_utc: DateTime<Utc>) -> StepClockResult<Self> {
        Ok(SimRig {
            manual: true,
            ..Self::network(true_utc)?
        })
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    fn time_source_config(&self) -> TimeSourceConfig {
        if self.manual {
            TimeSourceConfig::ManualWithRule {
                rule: self.rule.clone(),
            }
        } else {
            TimeSourceConfig::NetworkWithRule {
                server: "sim.ntp".into(),
                rule: self.rule.clone(),
            }
        }
    }

    pub fn time_source(&self) -> StepClockResult<TimeSource> {
        let devices = TimeDevices {
            host: Box::new(self.world.host()),
            chip: Box::new(self.world.chip()),
            network: Box::new(self.world.network()),
        };
        TimeSource::initialize(self.time_source_config(), devices)
    }

    pub fn driver(&self) -> PulseDriver {
        PulseDriver::new(
            Box::new(self.world.bridge()),
            Box::new(self.world.monotonic()),
            self.timing,
        )
    }

    /// Initialize the time source and boot the engine
    pub fn boot(&self) -> StepClockResult<CatchUpEngine> {
        Ok(self.boot_with(self.time_source()?))
    }

    /// Boot the engine on an already initialized time source
    pub fn boot_with(&self, time: TimeSource) -> CatchUpEngine {
        CatchUpEngine::boot(
            time,
            PersistedPosition::new(Box::new(self.world.store())),
            self.driver(),
            Box::new(self.world.monotonic()),
            self.engine.clone(),
        )
    }
}

/// Poll every `step` of simulated time until `stop` holds or `max_polls`
/// passes ran; returns every outcome
pub fn run_until<F>(
    engine: &mut CatchUpEngine,
    world: &SimWorld,
    step: Duration,
    max_polls: usize,
    mut stop: F,
) -> Vec<PollOutcome>
where
    F: FnMut(&PollOutcome) -> bool,
{
    let mut outcomes = Vec::new();
    for _ in 0..max_polls {
        let outcome = engine.poll();
        let done = stop(&outcome);
        outcomes.push(outcome);
        if done {
            break;
        }
        world.advance(step);
    }
    outcomes
}

/// Poll every `step` for `span` of simulated time
pub fn run_for(
    engine: &mut CatchUpEngine,
    world: &SimWorld,
    step: Duration,
    span: Duration,
) -> Vec<PollOutcome> {
    let end = world.state().mono + span;
    let mut outcomes = Vec::new();
    while world.state().mono < end {
        outcomes.push(engine.poll());
        world.advance(step);
    }
    outcomes
}

/// Parse `YYYY-MM-DD HH:MM:SS` as UTC
pub fn utc(s: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|t| t.and_utc())
        .unwrap_or_default()
}
