//! Command gate
//!
//! Validates user commands against the current flight state, applies the
//! optimistic transition, and dispatches to the [`FlightAdapter`]. Outcomes
//! arrive later through the caller's [`Completion`], delivered by the
//! supervisor thread once the hardware answers or the confirmation window
//! closes.
//!
//! Rejections are synchronous: the returned [`Dispatch::Rejected`] carries
//! the outcome and the completion is dropped without being called.

use super::dispatch::{Dispatcher, GATE_STOPPED};
use super::state_machine::{FlightEvent, FlightStateMachine, Maneuver, Transition};
use super::supervisor::{Control, Supervisor};
use super::telemetry::TelemetryIngest;
use crate::config::FlightConfig;
use crate::core::adapter::{FlightAdapter, Subscription};
use crate::core::types::{
    CommandOutcome, Completion, Direction, Dispatch, FlightState, Rotation, VehicleCommand,
};
use crate::error::{Error, Result};
use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

const NO_PRODUCT: &str = "no product connected";
const NOT_AIRBORNE: &str = "not airborne";

/// Single entry point for vehicle commands
pub struct CommandGate {
    config: FlightConfig,
    flight: Arc<FlightStateMachine>,
    telemetry: Arc<TelemetryIngest>,
    dispatcher: Arc<Dispatcher>,
    subscription: Mutex<Option<Subscription>>,
    control_tx: Sender<Control>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    stopping: AtomicBool,
}

impl CommandGate {
    /// Subscribe to the adapter's link events and start the supervisor
    pub fn start(
        config: FlightConfig,
        flight: Arc<FlightStateMachine>,
        telemetry: Arc<TelemetryIngest>,
        adapter: Arc<dyn FlightAdapter>,
    ) -> Result<Self> {
        let (ack_tx, ack_rx) = unbounded();
        let (link_tx, link_rx) = unbounded();
        let (control_tx, control_rx) = unbounded();

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&adapter),
            Arc::clone(&flight),
            ack_tx,
            config.confirmation_timeout(),
        ));

        let subscription = adapter.subscribe_telemetry(link_tx)?;

        let supervisor = Supervisor {
            dispatcher: Arc::clone(&dispatcher),
            flight: Arc::clone(&flight),
            telemetry: Arc::clone(&telemetry),
            link_stale: config.link_stale(),
            tick: config.supervisor_tick(),
        };
        let handle = thread::Builder::new()
            .name("flight-supervisor".to_string())
            .spawn(move || supervisor.run(link_rx, ack_rx, control_rx))
            .map_err(|e| Error::ThreadSpawn(e.to_string()))?;

        log::info!(
            "Command gate started (confirmation timeout {}ms)",
            config.confirmation_timeout_ms
        );

        Ok(Self {
            config,
            flight,
            telemetry,
            dispatcher,
            subscription: Mutex::new(Some(subscription)),
            control_tx,
            supervisor: Mutex::new(Some(handle)),
            stopping: AtomicBool::new(false),
        })
    }

    pub fn take_off(&self, completion: Completion) -> Dispatch {
        self.maneuver(Maneuver::TakeOff, VehicleCommand::TakeOff, completion)
    }

    /// Land. Any ongoing movement is stopped first.
    pub fn land(&self, completion: Completion) -> Dispatch {
        self.maneuver(Maneuver::Land, VehicleCommand::Land, completion)
    }

    pub fn return_to_home(&self, completion: Completion) -> Dispatch {
        self.maneuver(
            Maneuver::ReturnToHome,
            VehicleCommand::ReturnToHome,
            completion,
        )
    }

    pub fn move_up(&self, distance_m: f32, completion: Completion) -> Dispatch {
        self.translate(Direction::Up, distance_m, completion)
    }

    pub fn move_down(&self, distance_m: f32, completion: Completion) -> Dispatch {
        self.translate(Direction::Down, distance_m, completion)
    }

    pub fn move_forward(&self, distance_m: f32, completion: Completion) -> Dispatch {
        self.translate(Direction::Forward, distance_m, completion)
    }

    pub fn move_backward(&self, distance_m: f32, completion: Completion) -> Dispatch {
        self.translate(Direction::Backward, distance_m, completion)
    }

    pub fn move_left(&self, distance_m: f32, completion: Completion) -> Dispatch {
        self.translate(Direction::Left, distance_m, completion)
    }

    pub fn move_right(&self, distance_m: f32, completion: Completion) -> Dispatch {
        self.translate(Direction::Right, distance_m, completion)
    }

    pub fn rotate_left(&self, angle_deg: f32, completion: Completion) -> Dispatch {
        self.rotate(Rotation::Left, angle_deg, completion)
    }

    pub fn rotate_right(&self, angle_deg: f32, completion: Completion) -> Dispatch {
        self.rotate(Rotation::Right, angle_deg, completion)
    }

    /// Zero all stick inputs. No flight state precondition.
    pub fn stop_movement(&self, completion: Completion) -> Dispatch {
        if let Err(rejection) = self.check_ready() {
            return rejection;
        }
        self.dispatcher.cancel_safety_stop();
        self.dispatcher.dispatch(VehicleCommand::StopMovement, None, completion);
        Dispatch::Pending
    }

    /// Accepted in every state, even without a connected product. The
    /// state becomes `EmergencyStop` before the command reaches hardware.
    pub fn emergency_stop(&self, completion: Completion) -> Dispatch {
        log::warn!("Emergency stop requested");
        self.dispatcher.cancel_safety_stop();
        let _ = self.flight.apply(FlightEvent::EmergencyStop);
        self.dispatcher.dispatch(VehicleCommand::EmergencyStop, None, completion);
        Dispatch::Pending
    }

    pub fn take_photo(&self, completion: Completion) -> Dispatch {
        self.camera(VehicleCommand::TakePhoto, completion)
    }

    pub fn start_recording(&self, completion: Completion) -> Dispatch {
        self.camera(VehicleCommand::StartRecording, completion)
    }

    pub fn stop_recording(&self, completion: Completion) -> Dispatch {
        self.camera(VehicleCommand::StopRecording, completion)
    }

    /// Leave `EmergencyStop` or `Error`. The new state follows the live
    /// vehicle status, or `Disconnected` when telemetry is not flowing.
    pub fn reset_emergency(&self) -> std::result::Result<Transition, FlightState> {
        let link = if self.telemetry.is_stale(self.config.link_stale()) {
            None
        } else {
            self.telemetry.vehicle_status()
        };
        self.flight.apply(FlightEvent::Reset { link })
    }

    pub fn is_stopped(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Commands dispatched and not yet resolved
    pub fn pending_commands(&self) -> usize {
        self.dispatcher.pending_count()
    }

    /// Cancel the telemetry subscription, stop the supervisor and fail
    /// every unresolved command. Idempotent.
    pub fn stop(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("Stopping command gate");

        if let Some(subscription) = self.subscription.lock().take() {
            subscription.cancel();
        }

        self.dispatcher.shut_down();
        let _ = self.control_tx.send(Control::Shutdown);
        if let Some(handle) = self.supervisor.lock().take() {
            if handle.join().is_err() {
                log::error!("Flight supervisor panicked");
            }
        }

        self.telemetry.mark_link_lost();
        let _ = self.flight.apply(FlightEvent::LinkLost);
        self.dispatcher.abort_all(GATE_STOPPED);
        log::info!("Command gate stopped");
    }

    fn maneuver(
        &self,
        maneuver: Maneuver,
        command: VehicleCommand,
        completion: Completion,
    ) -> Dispatch {
        if let Err(rejection) = self.check_ready() {
            return rejection;
        }
        if let Err(state) = self.flight.apply(FlightEvent::Requested(maneuver)) {
            log::debug!("{} requested in state {}", command.name(), state);
            return rejected(maneuver.rejection_message());
        }

        if maneuver == Maneuver::Land {
            self.dispatcher.cancel_safety_stop();
            self.dispatcher.dispatch(
                VehicleCommand::StopMovement,
                None,
                Box::new(|outcome| {
                    if !outcome.success {
                        log::warn!("Pre-landing stop failed: {:?}", outcome.message);
                    }
                }),
            );
        }

        self.dispatcher.dispatch(command, Some(maneuver), completion);
        Dispatch::Pending
    }

    fn translate(&self, direction: Direction, distance_m: f32, completion: Completion) -> Dispatch {
        if !(distance_m.is_finite() && distance_m > 0.0) {
            return rejected("invalid distance");
        }
        self.movement(
            VehicleCommand::Move {
                direction,
                distance_m,
            },
            completion,
        )
    }

    fn rotate(&self, rotation: Rotation, angle_deg: f32, completion: Completion) -> Dispatch {
        if !(angle_deg.is_finite() && angle_deg > 0.0) {
            return rejected("invalid angle");
        }
        self.movement(
            VehicleCommand::Rotate {
                rotation,
                angle_deg,
            },
            completion,
        )
    }

    fn movement(&self, command: VehicleCommand, completion: Completion) -> Dispatch {
        if let Err(rejection) = self.check_airborne() {
            return rejection;
        }
        self.dispatcher.dispatch(command, None, completion);
        // Re-armed by every movement, so only the last one is followed by a stop
        self.dispatcher.arm_safety_stop(self.config.movement_safety_stop());
        Dispatch::Pending
    }

    fn camera(&self, command: VehicleCommand, completion: Completion) -> Dispatch {
        if let Err(rejection) = self.check_ready() {
            return rejection;
        }
        self.dispatcher.dispatch(command, None, completion);
        Dispatch::Pending
    }

    fn check_ready(&self) -> std::result::Result<(), Dispatch> {
        if self.is_stopped() || self.dispatcher.is_stopped() {
            return Err(rejected(GATE_STOPPED));
        }
        if !self.dispatcher.product_connected() {
            return Err(rejected(NO_PRODUCT));
        }
        Ok(())
    }

    fn check_airborne(&self) -> std::result::Result<(), Dispatch> {
        self.check_ready()?;
        if !self.flight.current().is_airborne() {
            return Err(rejected(NOT_AIRBORNE));
        }
        Ok(())
    }
}

fn rejected(message: &str) -> Dispatch {
    log::warn!("Command rejected: {}", message);
    Dispatch::Rejected(CommandOutcome::rejected(message))
}

impl Drop for CommandGate {
    fn drop(&mut self) {
        self.stop();
    }
}
