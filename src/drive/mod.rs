//! Drive pipeline: joystick samples in, throttle/steer commands out
//!
//! 1. [`conditioner`] - EMA smoothing, deadzone and quantization
//! 2. [`publisher`] - change gate and QoS selection
//! 3. [`safety_stop`] - stop burst on release
//! 4. [`controller`] - owner of all pipeline state
//! 5. [`drive_handle`] - the single task that drives the controller
//!
//! # Architecture
//!
//! ```text
//! Sampler ──[DriveEvent]──► DriveLoop ──► Link ──► broker
//!                              ▲   │
//!                         interval  └──► watch<DriveSnapshot>
//! ```
//!
//! All axis state is owned by the drive loop task. The sampler only sends
//! events; nothing else can write `raw`, `smoothed` or `last_sent`.

pub mod command;
pub mod conditioner;
pub mod controller;
pub mod drive_handle;
pub mod link;
pub mod publisher;
pub mod safety_stop;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use command::CommandMode;
pub use conditioner::AxisPair;
pub use drive_handle::DriveHandle;
pub use link::{Link, LinkError};

/// Input events from the sampler
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriveEvent {
    /// Pointer held at (dx, dy), screen convention: up is negative dy
    Active { dx: f32, dy: f32 },
    Released,
    /// Digital reverse request
    Reverse,
}

/// Tuning of the drive pipeline
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DriveSettings {
    /// Topic every command is published on
    pub topic: String,

    /// Analog JSON pair or digital symbol
    pub mode: CommandMode,

    /// Period of the conditioning/publish tick. Also the stop burst spacing.
    pub tick_interval_ms: u64,

    /// EMA coefficient in (0, 1); higher reacts faster, lower filters more
    pub smoothing_alpha: f32,

    /// Conditioned magnitudes below this are sent as zero
    pub deadzone: f32,

    /// Quantization granularity of transmitted values
    pub quantize_step: f32,

    /// Minimum per-axis change against the last transmitted command
    pub min_delta: f32,

    /// Total stop commands per release, including the immediate one
    pub stop_burst_count: u32,
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            topic: "Car/Control".to_string(),
            mode: CommandMode::Analog,
            tick_interval_ms: 80,
            smoothing_alpha: 0.35,
            deadzone: 0.10,
            quantize_step: 0.10,
            min_delta: 0.05,
            stop_burst_count: 3,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("Invalid drive setting: {0}")]
    InvalidSetting(String),

    #[error("Drive loop terminated: {0}")]
    LoopTerminated(String),
}

impl DriveSettings {
    pub fn validate(&self) -> Result<(), DriveError> {
        if self.topic.trim().is_empty() {
            return Err(DriveError::InvalidSetting("topic must not be empty".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(DriveError::InvalidSetting(
                "tick_interval_ms must be positive".into(),
            ));
        }
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha < 1.0) {
            return Err(DriveError::InvalidSetting(format!(
                "smoothing_alpha must be in (0, 1), got {}",
                self.smoothing_alpha
            )));
        }
        if !(0.0..1.0).contains(&self.deadzone) {
            return Err(DriveError::InvalidSetting(format!(
                "deadzone must be in [0, 1), got {}",
                self.deadzone
            )));
        }
        if !(self.quantize_step > 0.0 && self.quantize_step <= 1.0) {
            return Err(DriveError::InvalidSetting(format!(
                "quantize_step must be in (0, 1], got {}",
                self.quantize_step
            )));
        }
        if !(self.min_delta >= 0.0) {
            return Err(DriveError::InvalidSetting(format!(
                "min_delta must not be negative, got {}",
                self.min_delta
            )));
        }
        if self.stop_burst_count == 0 {
            return Err(DriveError::InvalidSetting(
                "stop_burst_count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Read-only view of the pipeline taken after every event and tick
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DriveSnapshot {
    pub raw: AxisPair,
    pub smoothed: AxisPair,
    pub last_sent: AxisPair,
    pub dragging: bool,
    pub link_connected: bool,
    pub commands_sent: u64,
    pub commands_dropped: u64,
    pub ticks: u64,
}

impl fmt::Display for DriveSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} raw:({:.2},{:.2}) sent:({:.2},{:.2}) link:{} tx:{} dropped:{}",
            if self.dragging { "DRIVE" } else { "IDLE" },
            self.raw.throttle,
            self.raw.steer,
            self.last_sent.throttle,
            self.last_sent.steer,
            if self.link_connected { "up" } else { "down" },
            self.commands_sent,
            self.commands_dropped
        )
    }
}
