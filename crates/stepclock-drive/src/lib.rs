//! stepclock Drive - Actuator layer for minute-step mechanisms
//!
//! This crate provides:
//! - Two-phase H-bridge abstraction (A/B polarity, coast)
//! - Sysfs GPIO and dry-run bridge implementations
//! - Pulse driver with strict alternation, dead time and min-gap guard

pub mod bridge;
pub mod pulse;

pub use bridge::*;
pub use pulse::*;
