//! stepclock Time - Authoritative civil time for the slave clock
//!
//! This crate answers "what minute should the clock show now?":
//! - Time zone rules: POSIX TZ strings, fixed offsets, named presets
//! - Clock devices: host clock, battery-backed clock, SNTP
//! - TimeSource: boot-time reconciliation, periodic network resync and
//!   DST flip observation

pub mod clock;
pub mod ntp;
pub mod source;
pub mod tz;

pub use clock::*;
pub use ntp::*;
pub use source::*;
pub use tz::*;
