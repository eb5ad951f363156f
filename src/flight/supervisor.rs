//! Flight supervisor thread
//!
//! Single consumer of everything that arrives from the hardware side:
//!
//! ```text
//!  FlightAdapter ──LinkEvent──┐
//!  Ack handles ──Acknowledgement──┼──▶ flight-supervisor ──▶ FlightStateMachine
//!  CommandGate ──Shutdown─────┘          │                 TelemetryIngest
//!                                        └─ tick: confirmation deadlines,
//!                                           telemetry staleness, safety stop
//! ```
//!
//! Running all of it on one thread keeps acknowledgement handling, timeouts
//! and link-loss decisions in a single order.

use super::dispatch::Dispatcher;
use super::state_machine::{FlightEvent, FlightStateMachine};
use super::telemetry::TelemetryIngest;
use crate::core::adapter::Acknowledgement;
use crate::core::types::{FlightState, LinkEvent, VehicleCommand};
use crate::error::Error;
use crossbeam_channel::{Receiver, never, select};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Control messages from the gate
pub(crate) enum Control {
    Shutdown,
}

pub(crate) struct Supervisor {
    pub dispatcher: Arc<Dispatcher>,
    pub flight: Arc<FlightStateMachine>,
    pub telemetry: Arc<TelemetryIngest>,
    pub link_stale: Duration,
    pub tick: Duration,
}

impl Supervisor {
    pub fn run(
        self,
        link_rx: Receiver<LinkEvent>,
        ack_rx: Receiver<Acknowledgement>,
        control_rx: Receiver<Control>,
    ) {
        log::debug!("Flight supervisor started");
        let mut link_open = true;

        loop {
            let link = if link_open { link_rx.clone() } else { never() };

            select! {
                recv(control_rx) -> msg => match msg {
                    Ok(Control::Shutdown) | Err(_) => break,
                },
                recv(ack_rx) -> msg => {
                    if let Ok(ack) = msg {
                        self.dispatcher.acknowledge(ack);
                    }
                },
                recv(link) -> msg => match msg {
                    Ok(event) => self.handle_link_event(event),
                    Err(_) => {
                        log::debug!("Telemetry subscription closed");
                        link_open = false;
                    }
                },
                default(self.tick) => {},
            }

            self.check_deadlines(Instant::now());
        }

        log::debug!("Flight supervisor stopped");
    }

    fn handle_link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => log::info!("Flight product connected"),
            LinkEvent::Telemetry(sample) => {
                self.telemetry.ingest(&sample);
                let _ = self.flight.apply(FlightEvent::LinkUp(sample.status));
            }
            LinkEvent::Disconnected => self.link_lost("adapter reported disconnect"),
            LinkEvent::Fault(reason) => {
                log::error!("Flight controller fault: {}", reason);
                let _ = self.flight.apply(FlightEvent::Fault);
            }
        }
    }

    fn check_deadlines(&self, now: Instant) {
        self.dispatcher.expire(now);

        if self.dispatcher.take_due_safety_stop(now) {
            log::debug!("Movement safety stop");
            self.dispatcher.dispatch(
                VehicleCommand::StopMovement,
                None,
                Box::new(|outcome| {
                    if !outcome.success {
                        log::warn!("Safety stop not confirmed: {:?}", outcome.message);
                    }
                }),
            );
        }

        if self.flight.current() != FlightState::Disconnected
            && self.telemetry.is_stale(self.link_stale)
        {
            self.link_lost("telemetry stale");
        }
    }

    fn link_lost(&self, cause: &str) {
        log::warn!("{} ({})", Error::LinkLost, cause);
        self.telemetry.mark_link_lost();
        let _ = self.flight.apply(FlightEvent::LinkLost);
        self.dispatcher.abort_all(&Error::LinkLost.to_string());
    }
}
