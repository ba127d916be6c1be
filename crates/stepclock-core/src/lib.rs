//! stepclock Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout stepclock:
//! - Clock position (MinuteOfDay) and its forward-only arithmetic
//! - Civil time snapshots (LocalTime)
//! - Monotonic time and loop-occupying holds (MonotonicClock)
//! - Error types shared by every component

pub mod error;
pub mod minute;
pub mod time;

pub use error::*;
pub use minute::*;
pub use time::*;
