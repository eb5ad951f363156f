//! Flight control
//!
//! ```text
//!   UI ──command──▶ CommandGate ──VehicleCommand + Ack──▶ FlightAdapter
//!                      │  ▲                                  │
//!          optimistic  │  │ outcome                          │ acks, LinkEvents
//!                      ▼  │                                  ▼
//!              FlightStateMachine ◀──────── flight-supervisor thread
//!                                                  │
//!                                                  ▼
//!                                           TelemetryIngest
//! ```
//!
//! - [`state_machine`]: Transition table and the authoritative flight state
//! - [`telemetry`]: Sample merge, distance-from-home, battery classification
//! - [`gate`]: Precondition checks and dispatch for every user command

mod dispatch;
pub mod gate;
pub mod state_machine;
mod supervisor;
pub mod telemetry;

pub use gate::CommandGate;
pub use state_machine::{FlightEvent, FlightStateMachine, Maneuver, Transition};
pub use telemetry::{BatteryStatus, TelemetryIngest};
