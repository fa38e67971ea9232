//! Wire-level drive commands
//!
//! Commands are immutable snapshots of the absolute target state. Every
//! payload carries the full axis values, never an increment, so a lost or
//! reordered message cannot compound.
//!
//! ```text
//! Analog:  {"throttle":0.3,"steer":-0.1}
//! Digital: W | A | S | D | R | STOP
//! ```

use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::conditioner::AxisPair;

/// Payload format the pipeline publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandMode {
    #[default]
    Analog,
    Digital,
}

impl FromStr for CommandMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "analog" => Ok(CommandMode::Analog),
            "digital" => Ok(CommandMode::Digital),
            other => Err(format!("unknown command mode: {}", other)),
        }
    }
}

/// Throttle/steer pair as transmitted
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct AnalogCommand {
    pub throttle: f32,
    pub steer: f32,
}

impl AnalogCommand {
    pub const STOP: AnalogCommand = AnalogCommand {
        throttle: 0.0,
        steer: 0.0,
    };

    /// Builds a command from conditioned axis values, clamped to [-1, 1]
    /// and rounded to two decimals.
    pub fn from_axes(axes: AxisPair) -> Self {
        Self {
            throttle: round_centi(axes.throttle),
            steer: round_centi(axes.steer),
        }
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// Discrete command symbols of the digital variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigitalCommand {
    Forward,
    Left,
    Back,
    Right,
    Reverse,
    Stop,
}

impl DigitalCommand {
    pub fn token(&self) -> &'static str {
        match self {
            DigitalCommand::Forward => "W",
            DigitalCommand::Left => "A",
            DigitalCommand::Back => "S",
            DigitalCommand::Right => "D",
            DigitalCommand::Reverse => "R",
            DigitalCommand::Stop => "STOP",
        }
    }

    /// Collapses a quantized axis pair onto the dominant direction.
    /// Ties between the axes go to throttle.
    pub fn from_axes(axes: AxisPair) -> Self {
        if axes.is_zero() {
            return DigitalCommand::Stop;
        }

        if axes.throttle.abs() >= axes.steer.abs() {
            if axes.throttle > 0.0 {
                DigitalCommand::Forward
            } else {
                DigitalCommand::Back
            }
        } else if axes.steer > 0.0 {
            DigitalCommand::Right
        } else {
            DigitalCommand::Left
        }
    }
}

impl fmt::Display for DigitalCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for DigitalCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "W" => Ok(DigitalCommand::Forward),
            "A" => Ok(DigitalCommand::Left),
            "S" => Ok(DigitalCommand::Back),
            "D" => Ok(DigitalCommand::Right),
            "R" => Ok(DigitalCommand::Reverse),
            "STOP" => Ok(DigitalCommand::Stop),
            other => Err(format!("unknown digital command: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Analog(AnalogCommand),
    Digital(DigitalCommand),
}

impl Command {
    pub fn from_axes(mode: CommandMode, axes: AxisPair) -> Self {
        match mode {
            CommandMode::Analog => Command::Analog(AnalogCommand::from_axes(axes)),
            CommandMode::Digital => Command::Digital(DigitalCommand::from_axes(axes)),
        }
    }

    pub fn stop(mode: CommandMode) -> Self {
        match mode {
            CommandMode::Analog => Command::Analog(AnalogCommand::STOP),
            CommandMode::Digital => Command::Digital(DigitalCommand::Stop),
        }
    }

    pub fn is_stop(&self) -> bool {
        match self {
            Command::Analog(cmd) => cmd.throttle == 0.0 && cmd.steer == 0.0,
            Command::Digital(cmd) => *cmd == DigitalCommand::Stop,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            // Two plain f32 fields cannot fail to serialize
            Command::Analog(cmd) => serde_json::to_vec(cmd).unwrap_or_default(),
            Command::Digital(cmd) => cmd.token().as_bytes().to_vec(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Command::Analog(cmd) => {
                write!(f, "throttle={:.2} steer={:.2}", cmd.throttle, cmd.steer)
            }
            Command::Digital(cmd) => write!(f, "{}", cmd),
        }
    }
}

/// Delivery guarantee for a command: stop commands must arrive, motion
/// updates are superseded by the next tick anyway.
pub fn qos_for(command: &Command) -> QoS {
    if command.is_stop() {
        QoS::AtLeastOnce
    } else {
        QoS::AtMostOnce
    }
}

fn round_centi(value: f32) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    let rounded = (value.clamp(-1.0, 1.0) * 100.0).round() / 100.0;
    // Avoid "-0.0" on the wire
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analog_payload_is_compact_json_with_two_decimals() {
        let cmd = Command::from_axes(CommandMode::Analog, AxisPair::new(0.3, -0.1));
        let payload = String::from_utf8(cmd.encode()).unwrap();
        assert_eq!(payload, r#"{"throttle":0.3,"steer":-0.1}"#);

        let odd = AnalogCommand::from_axes(AxisPair::new(0.456, -0.004));
        assert_eq!(odd.throttle, 0.46);
        assert_eq!(odd.steer, 0.0);
        assert!(!String::from_utf8(Command::Analog(odd).encode())
            .unwrap()
            .contains("-0"));
    }

    #[test]
    fn test_analog_payload_parses_by_field_name() {
        let parsed = AnalogCommand::from_payload(br#"{"steer":0.5,"throttle":-1.0}"#).unwrap();
        assert_eq!(parsed.throttle, -1.0);
        assert_eq!(parsed.steer, 0.5);
    }

    #[test]
    fn test_digital_tokens() {
        let all = [
            (DigitalCommand::Forward, "W"),
            (DigitalCommand::Left, "A"),
            (DigitalCommand::Back, "S"),
            (DigitalCommand::Right, "D"),
            (DigitalCommand::Reverse, "R"),
            (DigitalCommand::Stop, "STOP"),
        ];
        for (cmd, token) in all {
            assert_eq!(Command::Digital(cmd).encode(), token.as_bytes());
            assert_eq!(token.parse::<DigitalCommand>().unwrap(), cmd);
        }
        assert!("X".parse::<DigitalCommand>().is_err());
    }

    #[test]
    fn test_digital_dominant_axis() {
        assert_eq!(DigitalCommand::from_axes(AxisPair::new(0.0, 0.0)), DigitalCommand::Stop);
        assert_eq!(DigitalCommand::from_axes(AxisPair::new(0.6, 0.2)), DigitalCommand::Forward);
        assert_eq!(DigitalCommand::from_axes(AxisPair::new(-0.6, 0.2)), DigitalCommand::Back);
        assert_eq!(DigitalCommand::from_axes(AxisPair::new(0.1, 0.5)), DigitalCommand::Right);
        assert_eq!(DigitalCommand::from_axes(AxisPair::new(0.1, -0.5)), DigitalCommand::Left);
        assert_eq!(DigitalCommand::from_axes(AxisPair::new(0.5, -0.5)), DigitalCommand::Forward);
    }

    #[test]
    fn test_stop_commands_use_at_least_once() {
        assert_eq!(qos_for(&Command::stop(CommandMode::Analog)), QoS::AtLeastOnce);
        assert_eq!(qos_for(&Command::stop(CommandMode::Digital)), QoS::AtLeastOnce);
        let moving = Command::from_axes(CommandMode::Analog, AxisPair::new(0.2, 0.0));
        assert_eq!(qos_for(&moving), QoS::AtMostOnce);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("Digital".parse::<CommandMode>().unwrap(), CommandMode::Digital);
        assert_eq!("analog".parse::<CommandMode>().unwrap(), CommandMode::Analog);
        assert!("hybrid".parse::<CommandMode>().is_err());
    }
}
