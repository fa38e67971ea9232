//! Drive controller: conditioning, change gate and safety stop in one owner
//!
//! The controller is plain state mutated through `feed`, `release` and
//! `tick`. It never touches a clock itself; the drive loop decides when
//! `tick` runs.
//!
//! `last_sent` tracks what is on the wire. Anything that reaches the wire
//! outside the gate (burst stops, the reverse symbol) must be folded back
//! in, otherwise the gate would hold against a command the vehicle no
//! longer follows.

use rumqttc::QoS;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::command::{Command, CommandMode, DigitalCommand};
use super::conditioner::{AxisPair, ConditionerSettings, SignalConditioner};
use super::link::Link;
use super::publisher::{evaluate, CommandPublisher, GateDecision, GateSettings, PublishOutcome};
use super::safety_stop::SafetyStop;
use super::{DriveEvent, DriveSettings, DriveSnapshot};

pub struct DriveController<L: Link> {
    conditioner: SignalConditioner,
    gate: GateSettings,
    publisher: CommandPublisher<L>,
    safety_stop: SafetyStop<L>,
    burst_stops: mpsc::UnboundedReceiver<PublishOutcome>,
    // Reverse requested, goes out on the next tick
    reverse_pending: bool,
    // Last command on the wire is R, last_sent does not describe it
    reverse_on_wire: bool,
    commands_sent: u64,
    commands_dropped: u64,
    ticks: u64,
}

impl<L: Link> DriveController<L> {
    pub fn new(settings: &DriveSettings, link: Arc<L>) -> Self {
        let conditioner = SignalConditioner::new(ConditionerSettings {
            smoothing_alpha: settings.smoothing_alpha,
            deadzone: settings.deadzone,
            quantize_step: settings.quantize_step,
        });
        let gate = GateSettings {
            min_delta: settings.min_delta,
            mode: settings.mode,
        };
        let publisher = CommandPublisher::new(link, settings.topic.clone(), settings.mode);
        let (burst_sender, burst_stops) = mpsc::unbounded_channel();
        let safety_stop = SafetyStop::new(
            publisher.clone(),
            settings.stop_burst_count,
            Duration::from_millis(settings.tick_interval_ms),
            burst_sender,
        );

        Self {
            conditioner,
            gate,
            publisher,
            safety_stop,
            burst_stops,
            reverse_pending: false,
            reverse_on_wire: false,
            commands_sent: 0,
            commands_dropped: 0,
            ticks: 0,
        }
    }

    pub fn handle_event(&mut self, event: DriveEvent) {
        match event {
            DriveEvent::Active { dx, dy } => self.feed(AxisPair::from_screen_vector(dx, dy)),
            DriveEvent::Released => self.release(),
            DriveEvent::Reverse => self.reverse(),
        }
    }

    /// Records the latest sample. Publishing happens on the next tick.
    pub fn feed(&mut self, axes: AxisPair) {
        if !self.conditioner.is_dragging() {
            debug!("Drag started");
        }
        self.conditioner.feed(axes);
    }

    /// Stops the vehicle now: zero state, immediate stop, redundant burst.
    pub fn release(&mut self) {
        self.conditioner.release();
        self.reverse_pending = false;
        let outcome = self.safety_stop.trigger();
        self.count(outcome);
        // Only a stop that actually went out may clear last_sent
        if outcome == PublishOutcome::Sent {
            self.stop_on_wire();
        }
    }

    /// Queues the reverse symbol for the next tick. Only meaningful for the
    /// digital payload.
    pub fn reverse(&mut self) {
        if self.gate.mode != CommandMode::Digital {
            debug!("Reverse ignored in analog mode");
            return;
        }
        if self.reverse_pending {
            debug!("Reverse already queued");
        }
        self.reverse_pending = true;
    }

    /// Waits for the outcome of the next follow-up stop of a running burst.
    pub async fn next_burst_stop(&mut self) -> Option<PublishOutcome> {
        self.burst_stops.recv().await
    }

    /// Accounts for a follow-up stop issued by a burst.
    pub fn burst_stop_published(&mut self, outcome: PublishOutcome) {
        self.count(outcome);
        if outcome != PublishOutcome::Sent {
            return;
        }
        if self.conditioner.is_dragging() && !self.conditioner.last_sent().is_zero() {
            info!("Burst stop overrode motion, target goes out again on the next tick");
        }
        self.stop_on_wire();
    }

    /// One periodic conditioning and publish step. Publishes at most one
    /// command.
    pub fn tick(&mut self) {
        self.ticks += 1;
        self.absorb_burst_stops();

        let dragging = self.conditioner.is_dragging();
        let candidate = if dragging {
            self.conditioner.condition()
        } else {
            AxisPair::ZERO
        };

        if self.reverse_pending {
            self.reverse_pending = false;
            let outcome = self
                .publisher
                .publish(Command::Digital(DigitalCommand::Reverse), QoS::AtMostOnce);
            self.count(outcome);
            if outcome == PublishOutcome::Sent {
                self.reverse_on_wire = true;
            }
            return;
        }

        let decision = if self.reverse_on_wire {
            // R is momentary, re-assert the stick target
            if dragging {
                GateDecision::Send(candidate)
            } else {
                GateDecision::Stop
            }
        } else {
            evaluate(&self.gate, dragging, candidate, self.conditioner.last_sent())
        };

        match decision {
            GateDecision::Hold => {}
            GateDecision::Send(axes) => {
                let outcome = self.publisher.publish_axes(axes);
                self.count(outcome);
                if outcome == PublishOutcome::Sent {
                    self.conditioner.mark_sent(axes);
                    self.reverse_on_wire = false;
                }
            }
            GateDecision::Stop => {
                info!("Released with motion outstanding, sending stop");
                let outcome = self.publisher.publish_stop();
                self.count(outcome);
                if outcome == PublishOutcome::Sent {
                    self.stop_on_wire();
                }
            }
        }
    }

    /// Final stop if anything could still be moving, then waits for all
    /// outstanding bursts.
    pub async fn shutdown(&mut self) {
        self.absorb_burst_stops();
        if self.conditioner.is_dragging()
            || !self.conditioner.last_sent().is_zero()
            || self.reverse_on_wire
        {
            warn!("Shutting down while in motion, forcing stop");
            self.release();
        }
        let pending = self.safety_stop.pending();
        if pending > 0 {
            info!("Waiting for {} stop burst(s) to complete", pending);
        }
        self.safety_stop.drain().await;
        self.absorb_burst_stops();
    }

    pub fn snapshot(&self) -> DriveSnapshot {
        DriveSnapshot {
            raw: self.conditioner.raw(),
            smoothed: self.conditioner.smoothed(),
            last_sent: self.conditioner.last_sent(),
            dragging: self.conditioner.is_dragging(),
            link_connected: self.publisher.is_connected(),
            commands_sent: self.commands_sent,
            commands_dropped: self.commands_dropped,
            ticks: self.ticks,
        }
    }

    fn absorb_burst_stops(&mut self) {
        while let Ok(outcome) = self.burst_stops.try_recv() {
            self.burst_stop_published(outcome);
        }
    }

    fn stop_on_wire(&mut self) {
        self.conditioner.mark_sent(AxisPair::ZERO);
        self.reverse_on_wire = false;
    }

    fn count(&mut self, outcome: PublishOutcome) {
        match outcome {
            PublishOutcome::Sent => self.commands_sent += 1,
            PublishOutcome::Dropped => self.commands_dropped += 1,
        }
    }
}
