//! Catch-up engine - keeps the clock face on authoritative time
//!
//! Each `poll` compares the persisted position with the authoritative
//! minute and does at most one of: nothing, one regular tick, or one step of
//! a catch-up session. Every accepted pulse is persisted before the next
//! poll.

use std::fmt;
use std::time::Duration;

use stepclock_core::{MinuteOfDay, MonotonicClock, StepClockError, StepClockResult};
use stepclock_drive::{PulseDriver, PulseTiming};
use stepclock_state::PersistedPosition;
use stepclock_time::{SyncMode, TimeSource};

/// Engine tuning
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Largest deficit corrected automatically
    pub max_catchup_minutes: u16,
    /// Spacing between catch-up pulses
    pub catchup_interval: Duration,
    /// Network resync cadence; `None` disables
    pub resync_every: Option<Duration>,
    /// Civil jump (seconds) after a resync that triggers a catch-up
    pub drift_threshold_secs: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_catchup_minutes: 180,
            catchup_interval: PulseTiming::default().cycle(),
            resync_every: Some(Duration::from_secs(15 * 60)),
            drift_threshold_secs: 60,
        }
    }
}

/// Why a catch-up session was started
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CatchUpReason {
    Boot,
    Drift,
    ResyncDrift,
    Manual,
}

impl fmt::Display for CatchUpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CatchUpReason::Boot => "boot",
            CatchUpReason::Drift => "drift",
            CatchUpReason::ResyncDrift => "resync drift",
            CatchUpReason::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// A running burst of catch-up pulses
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatchUpSession {
    pub remaining: u16,
    pub total: u16,
    pub interval: Duration,
    /// Completion time of the last pulse of this session
    pub last_pulse: Option<Duration>,
    pub reason: CatchUpReason,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    CatchingUp,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => f.write_str("idle"),
            EngineState::CatchingUp => f.write_str("catching_up"),
        }
    }
}

/// What one poll did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// Aligned, nothing to do
    Idle,
    /// One regular minute tick
    Ticked,
    /// A catch-up session began (no pulse yet)
    SessionStarted { pulses: u16, reason: CatchUpReason },
    /// One catch-up pulse
    CatchUpStep { remaining: u16 },
    /// Session running, interval not elapsed
    Waiting,
    /// Last session pulse sent; position re-anchored
    CatchUpFinished { minute: MinuteOfDay },
    /// DST flip absorbed without pulses
    Realigned { minute: MinuteOfDay },
    /// Pulse not emitted (guard or actuator); retried next poll
    Deferred,
    /// Deficit beyond the automatic bound
    Blocked { deficit: u16, limit: u16 },
}

/// Result of a manual clock entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManualSetOutcome {
    AlreadyAligned,
    CatchUpStarted { pulses: u16 },
    /// A running session was redirected to the new deficit
    Retargeted { pulses: u16 },
}

impl ManualSetOutcome {
    /// Pulses still to be emitted
    pub fn pulses(&self) -> u16 {
        match self {
            ManualSetOutcome::AlreadyAligned => 0,
            ManualSetOutcome::CatchUpStarted { pulses } | ManualSetOutcome::Retargeted { pulses } => {
                *pulses
            }
        }
    }
}

impl fmt::Display for ManualSetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManualSetOutcome::AlreadyAligned => f.write_str("already_aligned"),
            ManualSetOutcome::CatchUpStarted { .. } => f.write_str("catch_up_started"),
            ManualSetOutcome::Retargeted { .. } => f.write_str("retargeted"),
        }
    }
}

/// Point-in-time view of the engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineStatus {
    pub persisted: MinuteOfDay,
    pub authoritative: MinuteOfDay,
    pub state: EngineState,
    pub remaining: u16,
    pub alert: Option<StepClockError>,
    pub mode: SyncMode,
    pub hardware_available: bool,
}

/// Orchestrates time source, position store and pulse driver
pub struct CatchUpEngine {
    time: TimeSource,
    position: PersistedPosition,
    driver: PulseDriver,
    clock: Box<dyn MonotonicClock>,
    config: EngineConfig,
    persisted: MinuteOfDay,
    session: Option<CatchUpSession>,
    last_resync: Option<Duration>,
    alert: Option<StepClockError>,
}

impl CatchUpEngine {
    /// Boot sequence: observe a resync, load the position, absorb a DST
    /// flip, then start any bounded catch-up.
    pub fn boot(
        mut time: TimeSource,
        mut position: PersistedPosition,
        driver: PulseDriver,
        clock: Box<dyn MonotonicClock>,
        config: EngineConfig,
    ) -> Self {
        let observation = (time.mode() == SyncMode::Network)
            .then(|| time.resync(config.drift_threshold_secs));

        let load = position.load(time.minute_of_day());
        let mut engine = CatchUpEngine {
            time,
            position,
            driver,
            clock,
            config,
            persisted: load.position,
            session: None,
            last_resync: None,
            alert: None,
        };

        let now = engine.time.minute_of_day();
        tracing::info!(
            state = %engine.persisted,
            now = %now,
            diff = engine.persisted.forward_distance_to(now),
            origin = ?load.origin,
            "boot"
        );

        if observation.as_ref().is_some_and(|o| o.is_dst_flip()) {
            engine.realign("dst flip at boot");
        }
        if let Err(e) = engine.try_start_catch_up(CatchUpReason::Boot) {
            engine.raise_alert(e);
        }
        engine.last_resync = Some(engine.clock.elapsed());
        engine
    }

    /// One control-loop pass; emits at most one pulse
    pub fn poll(&mut self) -> PollOutcome {
        if let Some(outcome) = self.resync_if_due() {
            return outcome;
        }
        if self.session.is_some() {
            return self.advance_session();
        }

        let now = self.time.minute_of_day();
        let diff = self.persisted.forward_distance_to(now);
        let limit = self.config.max_catchup_minutes;
        match diff {
            0 => {
                self.clear_alert();
                PollOutcome::Idle
            }
            1 => match self.driver.trigger_pulse(false) {
                Ok(phase) => {
                    self.step();
                    tracing::info!(minute = %self.persisted, ?phase, "tick");
                    PollOutcome::Ticked
                }
                Err(e @ StepClockError::PulseGuardRejected { .. }) => {
                    tracing::debug!(error = %e, "tick deferred");
                    PollOutcome::Deferred
                }
                Err(e) => {
                    tracing::warn!(error = %e, "tick failed");
                    PollOutcome::Deferred
                }
            },
            deficit if deficit <= limit => {
                self.start_session(deficit, CatchUpReason::Drift);
                PollOutcome::SessionStarted {
                    pulses: deficit,
                    reason: CatchUpReason::Drift,
                }
            }
            deficit => {
                self.raise_alert(StepClockError::CatchUpBoundExceeded { deficit, limit });
                PollOutcome::Blocked { deficit, limit }
            }
        }
    }

    fn resync_if_due(&mut self) -> Option<PollOutcome> {
        if self.time.mode() != SyncMode::Network {
            return None;
        }
        let every = self.config.resync_every?;
        let now = self.clock.elapsed();
        if let Some(last) = self.last_resync {
            if now.saturating_sub(last) < every {
                return None;
            }
        }
        self.last_resync = Some(now);

        let observation = self.time.resync(self.config.drift_threshold_secs);
        if observation.is_dst_flip() {
            let minute = self.realign("dst flip at resync");
            return Some(PollOutcome::Realigned { minute });
        }

        let delta = observation.delta_secs();
        if delta == 0 || delta.unsigned_abs() < self.config.drift_threshold_secs as u64 {
            return None;
        }
        tracing::info!(delta_secs = delta, "clock corrected by resync");
        match self.try_start_catch_up(CatchUpReason::ResyncDrift) {
            Ok(Some(pulses)) => Some(PollOutcome::SessionStarted {
                pulses,
                reason: CatchUpReason::ResyncDrift,
            }),
            Ok(None) => None,
            Err(e) => {
                let outcome = match &e {
                    StepClockError::CatchUpBoundExceeded { deficit, limit } => {
                        Some(PollOutcome::Blocked {
                            deficit: *deficit,
                            limit: *limit,
                        })
                    }
                    _ => None,
                };
                self.raise_alert(e);
                outcome
            }
        }
    }

    fn advance_session(&mut self) -> PollOutcome {
        let now = self.clock.elapsed();
        let Some(session) = &self.session else {
            return PollOutcome::Idle;
        };
        let due = session
            .last_pulse
            .map_or(true, |last| now.saturating_sub(last) >= session.interval);
        if !due {
            return PollOutcome::Waiting;
        }

        if let Err(e) = self.driver.trigger_pulse(true) {
            tracing::warn!(error = %e, "catch-up pulse failed");
            return PollOutcome::Deferred;
        }
        self.step();

        let stamp = self.clock.elapsed();
        let remaining = match self.session.as_mut() {
            Some(session) => {
                session.remaining = session.remaining.saturating_sub(1);
                session.last_pulse = Some(stamp);
                session.remaining
            }
            None => 0,
        };
        tracing::info!(minute = %self.persisted, remaining, "catch-up step");

        if remaining > 0 {
            return PollOutcome::CatchUpStep { remaining };
        }

        self.session = None;
        self.persisted = self.time.minute_of_day();
        self.persist();
        tracing::info!(minute = %self.persisted, "catch-up finished");
        PollOutcome::CatchUpFinished {
            minute: self.persisted,
        }
    }

    /// Start a bounded catch-up toward authoritative time.
    ///
    /// A running session is never restarted. Returns the session size, or
    /// `None` when nothing was started.
    pub fn try_start_catch_up(&mut self, reason: CatchUpReason) -> StepClockResult<Option<u16>> {
        if self.session.is_some() {
            return Ok(None);
        }
        let now = self.time.minute_of_day();
        let diff = self.persisted.forward_distance_to(now);
        let limit = self.config.max_catchup_minutes;

        if diff == 0 {
            tracing::info!(%reason, "clock up to date, no catch-up needed");
            return Ok(None);
        }
        if diff > limit {
            return Err(StepClockError::CatchUpBoundExceeded {
                deficit: diff,
                limit,
            });
        }
        self.start_session(diff, reason);
        Ok(Some(diff))
    }

    fn start_session(&mut self, pulses: u16, reason: CatchUpReason) {
        let interval = self.config.catchup_interval;
        tracing::info!(
            pulses,
            %reason,
            from = %self.persisted,
            interval = %humantime::format_duration(interval),
            "catch-up started"
        );
        self.clear_alert();
        self.session = Some(CatchUpSession {
            remaining: pulses,
            total: pulses,
            interval,
            last_pulse: None,
            reason,
        });
    }

    /// Snap the position to authoritative time without pulses, dropping
    /// any running session
    pub fn realign(&mut self, reason: &str) -> MinuteOfDay {
        if let Some(session) = self.session.take() {
            tracing::info!(remaining = session.remaining, "catch-up cancelled by realignment");
        }
        let from = self.persisted;
        self.persisted = self.time.minute_of_day();
        self.persist();
        self.clear_alert();
        tracing::info!(reason, from = %from, to = %self.persisted, "realigned without catch-up");
        self.persisted
    }

    /// Operator entry of the time the clock face actually shows.
    ///
    /// The entry is always persisted. A deficit beyond the bound raises the
    /// alert and moves nothing; a running session is retargeted instead of
    /// being restarted.
    pub fn manual_set(&mut self, shown: MinuteOfDay) -> StepClockResult<ManualSetOutcome> {
        let now = self.time.minute_of_day();
        let diff = shown.forward_distance_to(now);
        let limit = self.config.max_catchup_minutes;
        tracing::info!(shown = %shown, now = %now, diff, "manual set");

        self.persisted = shown;
        self.persist();

        if diff > limit {
            let err = StepClockError::CatchUpBoundExceeded {
                deficit: diff,
                limit,
            };
            self.raise_alert(err.clone());
            return Err(err);
        }
        self.clear_alert();

        if diff == 0 {
            if self.session.take().is_some() {
                tracing::info!("catch-up dropped, clock already aligned");
            }
            return Ok(ManualSetOutcome::AlreadyAligned);
        }

        match self.session.as_mut() {
            Some(session) => {
                session.remaining = diff;
                session.total = diff;
                session.reason = CatchUpReason::Manual;
                tracing::info!(pulses = diff, "catch-up retargeted");
                Ok(ManualSetOutcome::Retargeted { pulses: diff })
            }
            None => {
                self.start_session(diff, CatchUpReason::Manual);
                Ok(ManualSetOutcome::CatchUpStarted { pulses: diff })
            }
        }
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            persisted: self.persisted,
            authoritative: self.time.minute_of_day(),
            state: self.state(),
            remaining: self.session.as_ref().map_or(0, |s| s.remaining),
            alert: self.alert.clone(),
            mode: self.time.mode(),
            hardware_available: self.time.is_hardware_available(),
        }
    }

    pub fn state(&self) -> EngineState {
        if self.session.is_some() {
            EngineState::CatchingUp
        } else {
            EngineState::Idle
        }
    }

    pub fn persisted(&self) -> MinuteOfDay {
        self.persisted
    }

    pub fn session(&self) -> Option<&CatchUpSession> {
        self.session.as_ref()
    }

    /// Pending operator-facing error
    pub fn alert(&self) -> Option<&StepClockError> {
        self.alert.as_ref()
    }

    pub fn time(&self) -> &TimeSource {
        &self.time
    }

    pub fn driver(&self) -> &PulseDriver {
        &self.driver
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn step(&mut self) {
        self.persisted = self.persisted.succ();
        self.persist();
    }

    fn persist(&mut self) {
        if let Err(e) = self.position.save(self.persisted) {
            tracing::warn!(error = %e, position = %self.persisted, "failed to persist position");
        }
    }

    fn raise_alert(&mut self, err: StepClockError) {
        if self.alert.is_none() {
            tracing::error!(error = %err, "clock needs operator attention");
        }
        self.alert = Some(err);
    }

    fn clear_alert(&mut self) {
        if self.alert.take().is_some() {
            tracing::info!("alert cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_interval_covers_pulse_cycle() {
        let config = EngineConfig::default();
        assert_eq!(config.catchup_interval, Duration::from_millis(700));
        assert_eq!(config.max_catchup_minutes, 180);
    }

    #[test]
    fn test_reason_and_outcome_labels() {
        assert_eq!(CatchUpReason::ResyncDrift.to_string(), "resync drift");
        assert_eq!(EngineState::CatchingUp.to_string(), "catching_up");
        let outcome = ManualSetOutcome::Retargeted { pulses: 3 };
        assert_eq!(outcome.to_string(), "retargeted");
        assert_eq!(outcome.pulses(), 3);
        assert_eq!(ManualSetOutcome::AlreadyAligned.pulses(), 0);
    }
}
