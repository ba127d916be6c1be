//! Pulse driver - strict A/B alternation with an anti-duplicate guard
//!
//! Every accepted pulse drives one polarity for `pulse`, then coasts for
//! `dead_time`. Both are spent inside `trigger_pulse` through
//! `MonotonicClock::hold`, so the control loop is occupied for
//! `pulse + dead_time` per step.

use std::time::Duration;

use stepclock_core::{MonotonicClock, StepClockError, StepClockResult};

use crate::{Bridge, Phase};

/// Fixed margin added on top of drive + dead time
pub const SAFETY_MARGIN: Duration = Duration::from_millis(50);

/// Pulse waveform and guard timing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PulseTiming {
    /// Active drive time per pulse
    pub pulse: Duration,
    /// Coast time after each pulse
    pub dead_time: Duration,
    /// Minimum spacing between normal pulses
    pub min_gap: Duration,
}

impl Default for PulseTiming {
    fn default() -> Self {
        PulseTiming {
            pulse: Duration::from_millis(500),
            dead_time: Duration::from_millis(150),
            min_gap: Duration::from_millis(600),
        }
    }
}

impl PulseTiming {
    /// Drive + dead time + safety margin
    #[inline]
    pub fn cycle(&self) -> Duration {
        self.pulse + self.dead_time + SAFETY_MARGIN
    }

    /// Gap enforced between normal pulses
    #[inline]
    pub fn required_gap(&self) -> Duration {
        self.min_gap.max(self.cycle())
    }
}

/// Anti-duplicate guard state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PulseGuard {
    /// Completion time of the last accepted pulse
    pub last_accepted: Option<Duration>,
    /// Gap required between normal pulses
    pub required_gap: Duration,
    /// Polarity of the next pulse
    pub next_phase: Phase,
}

impl PulseGuard {
    fn new(required_gap: Duration) -> Self {
        PulseGuard {
            last_accepted: None,
            required_gap,
            next_phase: Phase::A,
        }
    }

    /// Check admission of a normal pulse at `now`
    fn admit(&self, now: Duration) -> StepClockResult<()> {
        match self.last_accepted {
            Some(last) => {
                let elapsed = now.saturating_sub(last);
                if elapsed < self.required_gap {
                    Err(StepClockError::PulseGuardRejected {
                        elapsed,
                        required: self.required_gap,
                    })
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }
}

/// Two-phase pulse driver
pub struct PulseDriver {
    bridge: Box<dyn Bridge>,
    clock: Box<dyn MonotonicClock>,
    timing: PulseTiming,
    guard: PulseGuard,
    accepted: u64,
}

impl PulseDriver {
    /// Create a driver; the first emitted pulse is phase A
    pub fn new(
        bridge: Box<dyn Bridge>,
        clock: Box<dyn MonotonicClock>,
        timing: PulseTiming,
    ) -> Self {
        PulseDriver {
            bridge,
            clock,
            guard: PulseGuard::new(timing.required_gap()),
            timing,
            accepted: 0,
        }
    }

    /// Emit one pulse if the guard permits.
    ///
    /// `allow_burst` skips the min-gap admission check only; the dead time
    /// after the pulse is always enforced. Returns the phase driven. A pulse
    /// that was driven counts as accepted even when the coast afterwards
    /// fails; that failure is only logged.
    pub fn trigger_pulse(&mut self, allow_burst: bool) -> StepClockResult<Phase> {
        if !allow_burst {
            self.guard.admit(self.clock.elapsed())?;
        }

        let phase = self.guard.next_phase;
        let driven = self.bridge.drive(phase);
        if driven.is_ok() {
            self.clock.hold(self.timing.pulse);
        }
        // Always release the coil, even after a failed drive
        let released = self.bridge.coast();
        self.clock.hold(self.timing.dead_time);
        driven?;

        // The coil was driven for the full pulse, so the step happened
        self.guard.next_phase = phase.flipped();
        self.guard.last_accepted = Some(self.clock.elapsed());
        self.accepted += 1;
        if let Err(e) = released {
            tracing::error!(error = %e, ?phase, "bridge failed to coast after pulse");
        }
        Ok(phase)
    }

    /// Current guard state
    pub fn guard(&self) -> &PulseGuard {
        &self.guard
    }

    pub fn timing(&self) -> &PulseTiming {
        &self.timing
    }

    /// Number of accepted pulses since construction
    pub fn accepted(&self) -> u64 {
        self.accepted
    }
}
