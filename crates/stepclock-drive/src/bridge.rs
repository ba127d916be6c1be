//! H-bridge abstraction for the stepping coil

use std::fs;
use std::path::{Path, PathBuf};

use stepclock_core::{StepClockError, StepClockResult};

/// Coil polarity of one step pulse
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// IN1 high, IN2 low
    A,
    /// IN1 low, IN2 high
    B,
}

impl Phase {
    /// The opposite polarity
    #[inline]
    pub fn flipped(self) -> Phase {
        match self {
            Phase::A => Phase::B,
            Phase::B => Phase::A,
        }
    }

    /// Line levels (IN1, IN2) for this phase
    #[inline]
    pub fn levels(self) -> (bool, bool) {
        match self {
            Phase::A => (true, false),
            Phase::B => (false, true),
        }
    }
}

/// Two-line bridge driving the stepping coil
pub trait Bridge {
    /// Drive the coil with the given polarity
    fn drive(&mut self, phase: Phase) -> StepClockResult<()>;

    /// Release both lines (inactive/coasting)
    fn coast(&mut self) -> StepClockResult<()>;
}

/// Bridge on Linux sysfs GPIO lines (`/sys/class/gpio`)
#[derive(Debug)]
pub struct SysfsBridge {
    in1: PathBuf,
    in2: PathBuf,
}

impl SysfsBridge {
    pub const DEFAULT_ROOT: &'static str = "/sys/class/gpio";

    /// Export and configure both lines under the default sysfs root
    pub fn open(in1: u32, in2: u32) -> StepClockResult<Self> {
        Self::open_at(Path::new(Self::DEFAULT_ROOT), in1, in2)
    }

    /// Export and configure both lines under `root`.
    /// Both lines end up as outputs driven low.
    pub fn open_at(root: &Path, in1: u32, in2: u32) -> StepClockResult<Self> {
        let in1 = Self::setup_line(root, in1)?;
        let in2 = Self::setup_line(root, in2)?;
        let mut bridge = SysfsBridge { in1, in2 };
        bridge.coast()?;
        Ok(bridge)
    }

    fn setup_line(root: &Path, line: u32) -> StepClockResult<PathBuf> {
        let dir = root.join(format!("gpio{}", line));
        if !dir.exists() {
            write_sysfs(&root.join("export"), &line.to_string())?;
        }
        // "low" configures the direction and the initial level at once
        write_sysfs(&dir.join("direction"), "low")?;
        Ok(dir.join("value"))
    }

    fn set(&self, in1: bool, in2: bool) -> StepClockResult<()> {
        write_sysfs(&self.in1, level(in1))?;
        write_sysfs(&self.in2, level(in2))
    }
}

impl Bridge for SysfsBridge {
    fn drive(&mut self, phase: Phase) -> StepClockResult<()> {
        let (in1, in2) = phase.levels();
        // Release first so both legs are never high together
        self.set(false, false)?;
        self.set(in1, in2)
    }

    fn coast(&mut self) -> StepClockResult<()> {
        self.set(false, false)
    }
}

fn level(high: bool) -> &'static str {
    if high {
        "1"
    } else {
        "0"
    }
}

fn write_sysfs(path: &Path, value: &str) -> StepClockResult<()> {
    fs::write(path, value)
        .map_err(|e| StepClockError::Actuator(format!("{}: {}", path.display(), e)))
}

/// Bridge that only logs, used when no GPIO lines are configured
#[derive(Debug, Default)]
pub struct DryRunBridge {
    pulses: u64,
}

impl DryRunBridge {
    pub fn new() -> Self {
        DryRunBridge::default()
    }

    /// Number of pulses driven so far
    pub fn pulses(&self) -> u64 {
        self.pulses
    }
}

impl Bridge for DryRunBridge {
    fn drive(&mut self, phase: Phase) -> StepClockResult<()> {
        self.pulses += 1;
        tracing::debug!(?phase, pulses = self.pulses, "dry-run bridge drive");
        Ok(())
    }

    fn coast(&mut self) -> StepClockResult<()> {
        Ok(())
    }
}
