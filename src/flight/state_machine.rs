//! Flight state machine
//!
//! Owns the authoritative [`FlightState`]. Every write goes through
//! [`FlightStateMachine::apply`], which evaluates the transition table and
//! stores the result under the state cell's lock, so concurrent callers
//! (UI commands, hardware acknowledgements, telemetry, timeouts) are
//! serialized and readers always see a settled value.
//!
//! # Transition Table
//!
//! ```text
//! Disconnected ──link up──▶ OnGround | InAir (from reported vehicle status)
//! OnGround  ──take_off──▶ TakingOff ──confirmed──▶ InAir
//!                                   ──failed────▶ OnGround
//!                                   ──timeout───▶ Error
//! InAir     ──land──────▶ Landing   ──confirmed──▶ OnGround
//!                                   ──failed/timeout──▶ Error
//! InAir     ──go_home───▶ GoingHome ──confirmed──▶ OnGround
//!                                   ──failed/timeout──▶ Error
//! any       ──emergency─▶ EmergencyStop
//! any       ──link lost─▶ Disconnected
//! any       ──fault─────▶ Error
//! EmergencyStop | Error ──reset──▶ OnGround | InAir | Disconnected
//! ```

use crate::core::types::{FlightState, VehicleStatus};
use crate::core::watch::{Watch, WatchReceiver};

/// Flight commands that move the vehicle through an optimistic state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Maneuver {
    TakeOff,
    Land,
    ReturnToHome,
}

impl Maneuver {
    /// State the maneuver may be requested from
    pub fn precondition(self) -> FlightState {
        match self {
            Maneuver::TakeOff => FlightState::OnGround,
            Maneuver::Land | Maneuver::ReturnToHome => FlightState::InAir,
        }
    }

    /// Optimistic state entered on request
    pub fn pending_state(self) -> FlightState {
        match self {
            Maneuver::TakeOff => FlightState::TakingOff,
            Maneuver::Land => FlightState::Landing,
            Maneuver::ReturnToHome => FlightState::GoingHome,
        }
    }

    fn confirmed_state(self) -> FlightState {
        match self {
            Maneuver::TakeOff => FlightState::InAir,
            Maneuver::Land | Maneuver::ReturnToHome => FlightState::OnGround,
        }
    }

    /// A refused take-off leaves the vehicle where it was; a refused
    /// landing or return leaves it in an unknown airborne condition.
    fn failed_state(self) -> FlightState {
        match self {
            Maneuver::TakeOff => FlightState::OnGround,
            Maneuver::Land | Maneuver::ReturnToHome => FlightState::Error,
        }
    }

    /// Message used when the precondition does not hold
    pub fn rejection_message(self) -> &'static str {
        match self {
            Maneuver::TakeOff => "not on ground",
            Maneuver::Land | Maneuver::ReturnToHome => "not airborne",
        }
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlightEvent {
    /// User issued a maneuver (optimistic transition)
    Requested(Maneuver),
    /// Hardware confirmed the maneuver
    Confirmed(Maneuver),
    /// Hardware reported the maneuver failed
    Failed(Maneuver),
    /// No confirmation within the configured window
    TimedOut(Maneuver),
    EmergencyStop,
    /// External reset out of `EmergencyStop`/`Error`. `link` carries the last
    /// reported vehicle status when telemetry is live.
    Reset { link: Option<VehicleStatus> },
    /// Fresh telemetry arrived carrying the vehicle status
    LinkUp(VehicleStatus),
    /// Telemetry stale or adapter disconnect
    LinkLost,
    /// Flight controller fault
    Fault,
}

fn state_from_status(status: &VehicleStatus) -> FlightState {
    if status.reports_airborne() {
        FlightState::InAir
    } else {
        FlightState::OnGround
    }
}

/// Pure transition function. `None` means the event does not apply in
/// `current` and the state is left untouched.
pub fn next_state(current: FlightState, event: &FlightEvent) -> Option<FlightState> {
    use FlightState::*;

    match event {
        FlightEvent::EmergencyStop => Some(EmergencyStop),
        FlightEvent::Fault => Some(Error),
        FlightEvent::LinkLost => match current {
            Disconnected => None,
            OnGround | TakingOff | InAir | Landing | GoingHome | EmergencyStop | Error => {
                Some(Disconnected)
            }
        },
        FlightEvent::LinkUp(status) => match current {
            Disconnected => Some(state_from_status(status)),
            OnGround | TakingOff | InAir | Landing | GoingHome | EmergencyStop | Error => None,
        },
        FlightEvent::Reset { link } => match current {
            EmergencyStop | Error => Some(link.as_ref().map_or(Disconnected, state_from_status)),
            Disconnected | OnGround | TakingOff | InAir | Landing | GoingHome => None,
        },
        FlightEvent::Requested(maneuver) => {
            (current == maneuver.precondition()).then(|| maneuver.pending_state())
        }
        FlightEvent::Confirmed(maneuver) => {
            (current == maneuver.pending_state()).then(|| maneuver.confirmed_state())
        }
        FlightEvent::Failed(maneuver) => {
            (current == maneuver.pending_state()).then(|| maneuver.failed_state())
        }
        FlightEvent::TimedOut(maneuver) => (current == maneuver.pending_state()).then_some(Error),
    }
}

/// An applied state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: FlightState,
    pub to: FlightState,
}

/// Serialized owner of the vehicle's flight state
pub struct FlightStateMachine {
    state: Watch<FlightState>,
}

impl FlightStateMachine {
    pub fn new() -> Self {
        Self {
            state: Watch::new(FlightState::Disconnected),
        }
    }

    pub fn current(&self) -> FlightState {
        self.state.get()
    }

    /// Stream of flight states, starting with the current one
    pub fn subscribe(&self) -> WatchReceiver<FlightState> {
        self.state.subscribe()
    }

    /// Apply `event`. Returns the transition, or the unchanged current
    /// state when the event does not apply.
    pub fn apply(&self, event: FlightEvent) -> Result<Transition, FlightState> {
        let mut ignored_in = FlightState::Disconnected;
        let applied = self.state.update(|current| {
            ignored_in = *current;
            next_state(*current, &event)
        });

        match applied {
            Some((from, to)) => {
                if from != to {
                    log::info!("Flight state: {} -> {} ({:?})", from, to, event);
                }
                Ok(Transition { from, to })
            }
            None => {
                log::debug!("Flight event {:?} ignored in state {}", event, ignored_in);
                Err(ignored_in)
            }
        }
    }
}

impl Default for FlightStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
