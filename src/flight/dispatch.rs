//! In-flight command table
//!
//! Every accepted command gets a ticket and an entry holding its completion
//! and confirmation deadline. An entry is removed exactly once (by its
//! acknowledgement, its deadline, a link loss or gate shutdown), and only
//! the remover runs the completion. That is what makes outcome delivery
//! at-most-once even when a late acknowledgement races a timeout.
//!
//! Completions always run outside the table lock, after any flight state
//! transition the outcome implies has been applied.

use super::state_machine::{FlightEvent, FlightStateMachine, Maneuver};
use crate::core::adapter::{Ack, Acknowledgement, FlightAdapter};
use crate::core::types::{CommandOutcome, Completion, VehicleCommand};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Message delivered to commands still pending at shutdown
pub(crate) const GATE_STOPPED: &str = "command gate stopped";

/// Message delivered to commands that were never acknowledged
pub(crate) const CONFIRMATION_TIMEOUT: &str = "confirmation timeout";

struct InFlight {
    command: VehicleCommand,
    maneuver: Option<Maneuver>,
    completion: Completion,
    deadline: Instant,
}

#[derive(Default)]
struct Table {
    inflight: HashMap<u64, InFlight>,
    /// When the armed movement safety stop fires, if any
    safety_stop_at: Option<Instant>,
    stopped: bool,
}

/// How an in-flight entry ended
enum Resolution {
    Acknowledged(Result<(), String>),
    TimedOut,
    Aborted(String),
}

/// Shared dispatch path used by the gate and its supervisor
pub(crate) struct Dispatcher {
    adapter: Arc<dyn FlightAdapter>,
    flight: Arc<FlightStateMachine>,
    table: Mutex<Table>,
    ack_tx: Sender<Acknowledgement>,
    next_ticket: AtomicU64,
    confirmation_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        adapter: Arc<dyn FlightAdapter>,
        flight: Arc<FlightStateMachine>,
        ack_tx: Sender<Acknowledgement>,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            adapter,
            flight,
            table: Mutex::new(Table::default()),
            ack_tx,
            next_ticket: AtomicU64::new(1),
            confirmation_timeout,
        }
    }

    pub fn product_connected(&self) -> bool {
        self.adapter.product_connected()
    }

    pub fn is_stopped(&self) -> bool {
        self.table.lock().stopped
    }

    /// Register and forward `command`. The completion receives the outcome
    /// exactly once.
    pub fn dispatch(
        &self,
        command: VehicleCommand,
        maneuver: Option<Maneuver>,
        completion: Completion,
    ) {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let name = command.name();
        {
            let mut table = self.table.lock();
            if table.stopped {
                drop(table);
                // Emergency stop still reaches the hardware after shutdown
                if command == VehicleCommand::EmergencyStop {
                    let (tx, _rx) = crossbeam_channel::bounded(1);
                    self.adapter.send_command(command, Ack::new(ticket, tx));
                }
                completion(CommandOutcome::failed(GATE_STOPPED));
                return;
            }
            table.inflight.insert(
                ticket,
                InFlight {
                    command: command.clone(),
                    maneuver,
                    completion,
                    deadline: Instant::now() + self.confirmation_timeout,
                },
            );
        }

        log::debug!("Dispatching {} (ticket {})", name, ticket);
        self.adapter.send_command(command, Ack::new(ticket, self.ack_tx.clone()));
    }

    /// Handle a hardware acknowledgement
    pub fn acknowledge(&self, ack: Acknowledgement) {
        let entry = self.table.lock().inflight.remove(&ack.ticket);
        match entry {
            Some(entry) => self.finish(entry, Resolution::Acknowledged(ack.result)),
            None => log::debug!("Discarding late acknowledgement for ticket {}", ack.ticket),
        }
    }

    /// Fail every entry whose deadline has passed
    pub fn expire(&self, now: Instant) {
        let expired: Vec<InFlight> = {
            let mut table = self.table.lock();
            let due: Vec<u64> = table
                .inflight
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .map(|(ticket, _)| *ticket)
                .collect();
            due.iter()
                .filter_map(|ticket| table.inflight.remove(ticket))
                .collect()
        };

        for entry in expired {
            self.finish(entry, Resolution::TimedOut);
        }
    }

    /// Fail every pending entry with `reason`, leaving the gate running
    pub fn abort_all(&self, reason: &str) {
        let drained: Vec<InFlight> = {
            let mut table = self.table.lock();
            table.safety_stop_at = None;
            table.inflight.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            self.finish(entry, Resolution::Aborted(reason.to_string()));
        }
    }

    /// Refuse further dispatches. Returns false if already shut down.
    pub fn shut_down(&self) -> bool {
        let mut table = self.table.lock();
        let first = !table.stopped;
        table.stopped = true;
        table.safety_stop_at = None;
        first
    }

    pub fn arm_safety_stop(&self, after: Duration) {
        self.table.lock().safety_stop_at = Some(Instant::now() + after);
    }

    pub fn cancel_safety_stop(&self) {
        self.table.lock().safety_stop_at = None;
    }

    /// Disarm and report the safety stop if it is due
    pub fn take_due_safety_stop(&self, now: Instant) -> bool {
        let mut table = self.table.lock();
        match table.safety_stop_at {
            Some(at) if at <= now => {
                table.safety_stop_at = None;
                true
            }
            _ => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.table.lock().inflight.len()
    }

    fn finish(&self, entry: InFlight, resolution: Resolution) {
        let name = entry.command.name();

        if let Some(maneuver) = entry.maneuver {
            let event = match &resolution {
                Resolution::Acknowledged(Ok(())) => Some(FlightEvent::Confirmed(maneuver)),
                Resolution::Acknowledged(Err(_)) => Some(FlightEvent::Failed(maneuver)),
                Resolution::TimedOut => Some(FlightEvent::TimedOut(maneuver)),
                // Link loss and shutdown set the state themselves
                Resolution::Aborted(_) => None,
            };
            if let Some(event) = event {
                let _ = self.flight.apply(event);
            }
        }

        let outcome = match resolution {
            Resolution::Acknowledged(Ok(())) => {
                log::info!("{} confirmed", name);
                CommandOutcome::succeeded()
            }
            Resolution::Acknowledged(Err(reason)) => {
                log::error!("{} failed: {}", name, reason);
                CommandOutcome::failed(reason)
            }
            Resolution::TimedOut => {
                log::error!("{} not confirmed in time", name);
                CommandOutcome::failed(CONFIRMATION_TIMEOUT)
            }
            Resolution::Aborted(reason) => {
                log::warn!("{} aborted: {}", name, reason);
                CommandOutcome::failed(reason)
            }
        };

        (entry.completion)(outcome);
    }
}
