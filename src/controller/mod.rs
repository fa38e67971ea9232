//! Input sampler: gamepad left stick as the 2-axis pointing device
//!
//! ```text
//! Gamepad ──► EventCollector ──[DriveEvent]──► drive loop
//!             (blocking thread)
//! ```
//!
//! The collector only reports samples and releases. It never conditions or
//! publishes anything itself.

pub mod event_collector;

pub use event_collector::{CollectorError, CollectorHandle, CollectorSettings, StickTracker};
