//! stepclock Test Harness - Simulation and scenario validation
//!
//! This crate provides:
//! - A simulated world driving every clock, device and store from one
//!   timeline
//! - A rig that boots a real engine on top of it
//! - Scenario, property and control-loop tests under `tests/`

pub mod sim;

pub use sim::*;
