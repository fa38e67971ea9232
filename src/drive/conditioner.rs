//! Signal conditioning: smoothing, deadzone and quantization per axis
//!
//! ```text
//! raw ──► EMA ──► deadzone ──► quantize ──► candidate
//!          │
//!       smoothed (kept, never deadzoned)
//! ```

use tracing::debug;

/// One value per control axis. Throttle is positive forward, steer is
/// positive right.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AxisPair {
    pub throttle: f32,
    pub steer: f32,
}

impl AxisPair {
    pub const ZERO: AxisPair = AxisPair {
        throttle: 0.0,
        steer: 0.0,
    };

    pub fn new(throttle: f32, steer: f32) -> Self {
        Self { throttle, steer }
    }

    /// Converts a sampler vector (screen convention, up = negative dy)
    /// into throttle/steer. Out-of-range or non-finite input is clamped.
    pub fn from_screen_vector(dx: f32, dy: f32) -> Self {
        Self {
            throttle: clamp_unit(-dy),
            steer: clamp_unit(dx),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.throttle == 0.0 && self.steer == 0.0
    }

    /// Largest per-axis distance to `other`
    pub fn max_delta(&self, other: &AxisPair) -> f32 {
        (self.throttle - other.throttle)
            .abs()
            .max((self.steer - other.steer).abs())
    }
}

/// State of a single control axis.
///
/// `raw` is written by the sampler side (`feed`), `smoothed` and
/// `last_sent` only by the tick. All three stay within [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AxisState {
    pub raw: f32,
    pub smoothed: f32,
    pub last_sent: f32,
}

impl AxisState {
    fn reset(&mut self) {
        self.raw = 0.0;
        self.smoothed = 0.0;
    }
}

#[derive(Clone, Debug)]
pub struct ConditionerSettings {
    pub smoothing_alpha: f32,
    pub deadzone: f32,
    pub quantize_step: f32,
}

impl Default for ConditionerSettings {
    fn default() -> Self {
        Self {
            smoothing_alpha: 0.35,
            deadzone: 0.10,
            quantize_step: 0.10,
        }
    }
}

/// Stateful conditioning pipeline for the throttle and steer axes
#[derive(Debug)]
pub struct SignalConditioner {
    settings: ConditionerSettings,
    throttle: AxisState,
    steer: AxisState,
    dragging: bool,
}

impl SignalConditioner {
    pub fn new(settings: ConditionerSettings) -> Self {
        Self {
            settings,
            throttle: AxisState::default(),
            steer: AxisState::default(),
            dragging: false,
        }
    }

    /// Stores the latest sample. Never publishes.
    pub fn feed(&mut self, axes: AxisPair) {
        self.throttle.raw = clamp_unit(axes.throttle);
        self.steer.raw = clamp_unit(axes.steer);
        self.dragging = true;
    }

    /// Drops all motion state immediately, no decay.
    pub fn release(&mut self) {
        self.throttle.reset();
        self.steer.reset();
        self.dragging = false;
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    /// Advances the EMA by one tick and returns the quantized candidate.
    pub fn condition(&mut self) -> AxisPair {
        let alpha = self.settings.smoothing_alpha;
        let candidate = AxisPair {
            throttle: condition_axis(&mut self.throttle, alpha, &self.settings),
            steer: condition_axis(&mut self.steer, alpha, &self.settings),
        };
        debug!(
            "Conditioned raw=({:.3},{:.3}) smoothed=({:.3},{:.3}) -> ({:.2},{:.2})",
            self.throttle.raw,
            self.steer.raw,
            self.throttle.smoothed,
            self.steer.smoothed,
            candidate.throttle,
            candidate.steer
        );
        candidate
    }

    pub fn last_sent(&self) -> AxisPair {
        AxisPair::new(self.throttle.last_sent, self.steer.last_sent)
    }

    /// Both axes are updated together so the change gate never compares
    /// against a half-applied pair.
    pub fn mark_sent(&mut self, sent: AxisPair) {
        self.throttle.last_sent = clamp_unit(sent.throttle);
        self.steer.last_sent = clamp_unit(sent.steer);
    }

    pub fn raw(&self) -> AxisPair {
        AxisPair::new(self.throttle.raw, self.steer.raw)
    }

    pub fn smoothed(&self) -> AxisPair {
        AxisPair::new(self.throttle.smoothed, self.steer.smoothed)
    }
}

fn condition_axis(axis: &mut AxisState, alpha: f32, settings: &ConditionerSettings) -> f32 {
    axis.smoothed = clamp_unit(axis.smoothed + alpha * (axis.raw - axis.smoothed));
    quantize(
        apply_deadzone(axis.smoothed, settings.deadzone),
        settings.quantize_step,
    )
}

/// Values strictly inside the deadzone become exactly zero. Unlike the
/// gamepad collector there is no rescaling; quantization follows.
pub fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    if value.abs() < deadzone {
        0.0
    } else {
        value
    }
}

/// Rounds to the nearest multiple of `step` (half away from zero) and
/// clamps to [-1, 1]. Symmetric in sign.
pub fn quantize(value: f32, step: f32) -> f32 {
    if value.is_nan() || step <= 0.0 {
        return 0.0;
    }
    let levels = (value / step).round();
    let quantized = clamp_unit(levels * step);
    if quantized == 0.0 {
        0.0
    } else {
        quantized
    }
}

pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}
