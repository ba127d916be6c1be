//! stepclock State - Persisted clock position
//!
//! This crate implements the position ledger:
//! - Single text record store (file-backed, atomic overwrite)
//! - `HH:MM` and legacy `YYYY-MM-DD HH:MM` record parsing
//! - Self-healing load (missing record initialized, corrupt record reset)

pub mod position;
pub mod store;

pub use position::*;
pub use store::*;
