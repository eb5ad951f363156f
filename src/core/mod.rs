//! Core abstractions shared by all components.
//!
//! - [`adapter`]: Traits to implement for new hardware
//! - [`types`]: Flight/stream states, telemetry, commands and outcomes
//! - [`watch`]: Observable single-writer state cell

pub mod adapter;
pub mod types;
pub mod watch;
