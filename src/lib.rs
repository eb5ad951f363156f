//! Vimana - Flight session coordinator for a camera drone
//!
//! This library owns the flight state machine that gates user commands,
//! telemetry ingestion, the local video preview sink, and the outbound
//! re-broadcast session, with every hardware service injected as a trait.
//!
//! ## Features
//!
//! - `mock`: Simulated flight controller, camera feed and stream publisher

pub mod config;
pub mod core;
pub mod devices;
pub mod error;
pub mod flight;
pub mod session;
pub mod streaming;
pub mod video;

// Re-export commonly used types
pub use config::Config;
pub use crate::core::types::{
    CommandOutcome, Completion, Dispatch, FlightState, StreamState, SurfaceId, TelemetrySnapshot,
};
pub use error::{Error, Result};
pub use session::{Adapters, SessionCoordinator};
