//! Change-gated publishing
//!
//! Decides per tick whether the conditioned candidate is worth sending and
//! hands the resulting command to the link. Commands are dropped, never
//! queued, while the link is down.

use rumqttc::QoS;
use std::sync::Arc;
use tracing::{debug, warn};

use super::command::{qos_for, Command, CommandMode, DigitalCommand};
use super::conditioner::AxisPair;
use super::link::Link;

/// What the gate decided for one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
    /// Nothing worth sending
    Hold,
    /// Send this pair as a motion update
    Send(AxisPair),
    /// Input is released but the last transmitted command still moves
    Stop,
}

#[derive(Clone, Debug)]
pub struct GateSettings {
    pub min_delta: f32,
    pub mode: CommandMode,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            min_delta: 0.05,
            mode: CommandMode::Analog,
        }
    }
}

/// Pure gate rule, no I/O
pub fn evaluate(
    settings: &GateSettings,
    dragging: bool,
    candidate: AxisPair,
    last_sent: AxisPair,
) -> GateDecision {
    if !dragging {
        return if last_sent.is_zero() {
            GateDecision::Hold
        } else {
            GateDecision::Stop
        };
    }

    let changed = match settings.mode {
        CommandMode::Analog => exceeds_delta(candidate, last_sent, settings.min_delta),
        CommandMode::Digital => {
            DigitalCommand::from_axes(candidate) != DigitalCommand::from_axes(last_sent)
        }
    };

    if changed {
        GateDecision::Send(candidate)
    } else {
        GateDecision::Hold
    }
}

pub fn exceeds_delta(candidate: AxisPair, last_sent: AxisPair, min_delta: f32) -> bool {
    // Tolerance keeps a delta of exactly min_delta from losing to f32 noise
    candidate.max_delta(&last_sent) >= min_delta - f32::EPSILON
}

/// Outcome of handing a command to the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Sent,
    Dropped,
}

/// Sends commands on one topic through a shared link
pub struct CommandPublisher<L: Link> {
    link: Arc<L>,
    topic: String,
    mode: CommandMode,
}

impl<L: Link> Clone for CommandPublisher<L> {
    fn clone(&self) -> Self {
        Self {
            link: self.link.clone(),
            topic: self.topic.clone(),
            mode: self.mode,
        }
    }
}

impl<L: Link> CommandPublisher<L> {
    pub fn new(link: Arc<L>, topic: String, mode: CommandMode) -> Self {
        Self { link, topic, mode }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn publish_axes(&self, axes: AxisPair) -> PublishOutcome {
        let command = Command::from_axes(self.mode, axes);
        self.publish(command, qos_for(&command))
    }

    pub fn publish_stop(&self) -> PublishOutcome {
        self.publish(Command::stop(self.mode), QoS::AtLeastOnce)
    }

    pub fn publish(&self, command: Command, qos: QoS) -> PublishOutcome {
        if !self.link.is_connected() {
            warn!("Link down, dropping command: {}", command);
            return PublishOutcome::Dropped;
        }

        match self.link.publish(&self.topic, command.encode(), qos) {
            Ok(()) => {
                debug!("Published {} ({:?}) on {}", command, qos, self.topic);
                PublishOutcome::Sent
            }
            Err(e) => {
                warn!("Failed to publish {}: {}", command, e);
                PublishOutcome::Dropped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::link::testing::RecordingLink;

    fn analog() -> GateSettings {
        GateSettings::default()
    }

    #[test]
    fn test_delta_gating() {
        let last = AxisPair::new(0.20, 0.0);
        assert_eq!(
            evaluate(&analog(), true, AxisPair::new(0.23, 0.0), last),
            GateDecision::Hold
        );
        assert_eq!(
            evaluate(&analog(), true, AxisPair::new(0.30, 0.0), last),
            GateDecision::Send(AxisPair::new(0.30, 0.0))
        );
    }

    #[test]
    fn test_delta_uses_largest_axis() {
        let last = AxisPair::new(0.5, 0.5);
        let candidate = AxisPair::new(0.52, 0.4);
        assert!(exceeds_delta(candidate, last, 0.05));
        assert!(!exceeds_delta(AxisPair::new(0.52, 0.52), last, 0.05));
    }

    #[test]
    fn test_released_sends_single_stop() {
        assert_eq!(
            evaluate(&analog(), false, AxisPair::ZERO, AxisPair::new(0.4, 0.0)),
            GateDecision::Stop
        );
        assert_eq!(
            evaluate(&analog(), false, AxisPair::ZERO, AxisPair::ZERO),
            GateDecision::Hold
        );
    }

    #[test]
    fn test_digital_gate_compares_symbols() {
        let settings = GateSettings {
            min_delta: 0.05,
            mode: CommandMode::Digital,
        };
        let last = AxisPair::new(0.4, 0.0);
        // Still "forward", no matter how much throttle changed
        assert_eq!(
            evaluate(&settings, true, AxisPair::new(0.9, 0.1), last),
            GateDecision::Hold
        );
        assert_eq!(
            evaluate(&settings, true, AxisPair::new(0.1, 0.6), last),
            GateDecision::Send(AxisPair::new(0.1, 0.6))
        );
    }

    #[test]
    fn test_publisher_drops_when_disconnected() {
        let link = Arc::new(RecordingLink::new(false));
        let publisher =
            CommandPublisher::new(link.clone(), "Car/Control".to_string(), CommandMode::Analog);

        assert_eq!(
            publisher.publish_axes(AxisPair::new(0.5, 0.0)),
            PublishOutcome::Dropped
        );
        assert!(link.published().is_empty());

        link.set_connected(true);
        assert_eq!(publisher.publish_stop(), PublishOutcome::Sent);
        let sent = link.published();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, "Car/Control");
        assert_eq!(sent[0].qos, QoS::AtLeastOnce);
        assert_eq!(sent[0].text(), r#"{"throttle":0.0,"steer":0.0}"#);
    }
}
