//! stepclock Runtime - Catch-up engine and daemon plumbing
//!
//! This crate ties the components together:
//! - CatchUpEngine: regular ticks, bounded catch-up, DST realignment,
//!   manual override and periodic resync
//! - Controller: single owner of the engine, fed by a command queue
//! - HTTP control surface, configuration file and log setup

pub mod config;
pub mod controller;
pub mod engine;
pub mod http;
pub mod logging;

pub use config::*;
pub use controller::*;
pub use engine::*;
pub use http::{ApiState, StatusReport};
