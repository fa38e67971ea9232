use gilrs::{Axis, Button, Event, EventType, Gamepad, GamepadId, Gilrs};
use serde::{Deserialize, Serialize};
use statum::{machine, state};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::drive::DriveEvent;

// Collector settings
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct CollectorSettings {
    /// Sleep between gilrs polls
    pub poll_interval_ms: u64,
    /// Stick magnitude below which the stick counts as let go
    pub release_threshold: f32,
    /// Capacity of the event channel towards the drive loop
    pub event_buffer: usize,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2,
            release_threshold: 0.05,
            event_buffer: 64,
        }
    }
}

// Collector errors
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Failed to initialize collector: {0}")]
    InitializationError(String),

    #[error("Failed to send event: {0}")]
    EventSendError(String),
}

/// Turns per-axis stick updates into active/released events.
///
/// Output uses screen convention: pushing the stick up yields negative dy.
#[derive(Debug, Clone)]
pub struct StickTracker {
    x: f32,
    y: f32,
    active: bool,
    release_threshold: f32,
}

impl StickTracker {
    pub fn new(release_threshold: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            active: false,
            release_threshold,
        }
    }

    /// `x` right-positive, `y` up-positive as reported by gilrs
    pub fn update(&mut self, x: Option<f32>, y: Option<f32>) -> Option<DriveEvent> {
        if let Some(x) = x {
            self.x = x;
        }
        if let Some(y) = y {
            self.y = y;
        }

        let magnitude = self.x.abs().max(self.y.abs());
        if magnitude >= self.release_threshold {
            self.active = true;
            Some(DriveEvent::Active {
                dx: self.x,
                dy: -self.y,
            })
        } else if self.active {
            self.active = false;
            Some(DriveEvent::Released)
        } else {
            None
        }
    }

    /// Gamepad vanished: release if the stick was held.
    pub fn disconnect(&mut self) -> Option<DriveEvent> {
        self.x = 0.0;
        self.y = 0.0;
        if self.active {
            self.active = false;
            Some(DriveEvent::Released)
        } else {
            None
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// Hands events to the drive loop without blocking on motion samples.
///
/// gilrs only reports changes, so a sample skipped on a full channel may be
/// the last one before the stick is held still. The newest skipped sample
/// is kept and offered again on the next poll.
#[derive(Debug)]
pub struct SampleForwarder {
    sender: mpsc::Sender<DriveEvent>,
    held: Option<DriveEvent>,
}

impl SampleForwarder {
    pub fn new(sender: mpsc::Sender<DriveEvent>) -> Self {
        Self { sender, held: None }
    }

    pub fn forward(&mut self, event: DriveEvent) -> Result<(), CollectorError> {
        match event {
            DriveEvent::Released => {
                // A stale sample must not arrive after the release
                self.held = None;
                info!("Stick released");
                self.sender
                    .blocking_send(event)
                    .map_err(|e| CollectorError::EventSendError(e.to_string()))
            }
            DriveEvent::Active { .. } => {
                self.held = self.offer(event)?;
                if self.held.is_some() {
                    debug!("Drive loop busy, holding latest sample");
                }
                Ok(())
            }
            DriveEvent::Reverse => {
                if self.offer(event)?.is_some() {
                    warn!("Drive loop busy, reverse request dropped");
                }
                Ok(())
            }
        }
    }

    /// Retries the held sample, if any.
    pub fn flush(&mut self) -> Result<(), CollectorError> {
        if let Some(sample) = self.held.take() {
            self.held = self.offer(sample)?;
        }
        Ok(())
    }

    pub fn has_held_sample(&self) -> bool {
        self.held.is_some()
    }

    fn offer(&self, event: DriveEvent) -> Result<Option<DriveEvent>, CollectorError> {
        match self.sender.try_send(event) {
            Ok(()) => Ok(None),
            Err(mpsc::error::TrySendError::Full(event)) => Ok(Some(event)),
            Err(e) => Err(CollectorError::EventSendError(e.to_string())),
        }
    }
}

// Define collector states using statum's state macro
#[state]
#[derive(Debug, Clone)]
pub enum CollectionState {
    Initializing,
    Collecting,
}

#[machine]
pub struct EventCollector<S: CollectionState> {
    // Gilrs context
    gilrs: Gilrs,

    // Active gamepad
    active_gamepad: Option<GamepadId>,

    // Collector settings
    settings: CollectorSettings,

    // Channel towards the drive loop
    forwarder: SampleForwarder,

    // Left stick state
    stick: StickTracker,
}

impl EventCollector<Initializing> {
    pub fn create(
        settings: CollectorSettings,
        event_sender: mpsc::Sender<DriveEvent>,
    ) -> Result<Self, CollectorError> {
        debug!("Creating Event Collector with settings: {:?}", settings);

        info!("Initializing gilrs controller interface");
        let gilrs = Gilrs::new().map_err(|e| {
            error!("Failed to initialize gilrs: {}", e);
            CollectorError::InitializationError(e.to_string())
        })?;

        let stick = StickTracker::new(settings.release_threshold);
        let forwarder = SampleForwarder::new(event_sender);
        Ok(Self::new(gilrs, None, settings, forwarder, stick))
    }

    // Pick a gamepad and transition to Collecting state
    pub fn initialize(mut self) -> EventCollector<Collecting> {
        let gamepads: Vec<(GamepadId, Gamepad<'_>)> = self.gilrs.gamepads().collect();

        if gamepads.is_empty() {
            warn!("No gamepad connected, waiting for one");
        } else {
            info!("Found {} gamepads:", gamepads.len());
            for (idx, (id, gamepad)) in gamepads.iter().enumerate() {
                info!("  [{}] ID: {}, Name: {}", idx, id, gamepad.name());
            }
            let (id, gamepad) = &gamepads[0];
            self.active_gamepad = Some(*id);
            info!("Selected gamepad: {} ({})", gamepad.name(), id);
        }

        info!("Event Collector initialized, transitioning to Collecting state");
        self.transition()
    }
}

impl EventCollector<Collecting> {
    /// Drains pending gilrs events. Blocking; run on a blocking thread.
    pub fn collect_pending(&mut self) -> Result<(), CollectorError> {
        self.forwarder.flush()?;

        while let Some(Event { id, event, .. }) = self.gilrs.next_event() {
            if let EventType::Connected = event {
                if self.active_gamepad.is_none() {
                    info!("Gamepad {} connected, selecting it", id);
                    self.active_gamepad = Some(id);
                }
                continue;
            }

            if self.active_gamepad != Some(id) {
                debug!("Skipping event from non-active gamepad: {:?}", id);
                continue;
            }

            if let Some(drive_event) = self.convert_gilrs_event(id, event) {
                self.forwarder.forward(drive_event)?;
            }
        }
        Ok(())
    }

    pub fn run_collection_loop(
        &mut self,
        shutdown: CancellationToken,
    ) -> Result<(), CollectorError> {
        info!("Starting Event Collector loop");
        let poll_interval = std::time::Duration::from_millis(self.settings.poll_interval_ms);

        while !shutdown.is_cancelled() {
            self.collect_pending()?;
            std::thread::sleep(poll_interval);
        }

        info!("Event Collector stopped");
        Ok(())
    }

    fn convert_gilrs_event(&mut self, id: GamepadId, event: EventType) -> Option<DriveEvent> {
        match event {
            EventType::AxisChanged(Axis::LeftStickX, value, _) => {
                self.stick.update(Some(value), None)
            }
            EventType::AxisChanged(Axis::LeftStickY, value, _) => {
                self.stick.update(None, Some(value))
            }
            EventType::ButtonPressed(Button::East, _) => {
                info!("Reverse requested");
                Some(DriveEvent::Reverse)
            }
            EventType::Disconnected => {
                warn!("Gamepad {} disconnected", id);
                self.active_gamepad = None;
                self.stick.disconnect()
            }
            _ => None,
        }
    }
}

/// Running gamepad collector
pub struct CollectorHandle {
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), CollectorError>>,
}

impl CollectorHandle {
    /// Runs the collector on a blocking thread. gilrs is created on that
    /// thread and never leaves it.
    pub fn spawn(settings: CollectorSettings, event_sender: mpsc::Sender<DriveEvent>) -> Self {
        info!("Spawning Event Collector with settings: {:?}", settings);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let task = tokio::task::spawn_blocking(move || {
            let collector = EventCollector::create(settings, event_sender)?;
            let result = collector.initialize().run_collection_loop(token);
            if let Err(e) = &result {
                error!("Collector terminated with error: {}", e);
            }
            result
        });

        Self { shutdown, task }
    }

    pub async fn shutdown(self) -> Result<(), CollectorError> {
        self.shutdown.cancel();
        self.task
            .await
            .map_err(|e| CollectorError::InitializationError(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stick_up_is_negative_dy() {
        let mut stick = StickTracker::new(0.05);
        assert_eq!(
            stick.update(None, Some(1.0)),
            Some(DriveEvent::Active { dx: 0.0, dy: -1.0 })
        );
        assert_eq!(
            stick.update(Some(0.5), None),
            Some(DriveEvent::Active { dx: 0.5, dy: -1.0 })
        );
    }

    #[test]
    fn test_release_emitted_once() {
        let mut stick = StickTracker::new(0.05);
        assert_eq!(stick.update(Some(0.02), None), None);

        stick.update(Some(0.8), Some(0.0));
        assert!(stick.is_active());

        assert_eq!(stick.update(Some(0.01), Some(0.0)), Some(DriveEvent::Released));
        assert_eq!(stick.update(Some(0.0), Some(0.02)), None);
        assert!(!stick.is_active());
    }

    #[test]
    fn test_skipped_sample_is_resent_on_flush() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut forwarder = SampleForwarder::new(tx);

        forwarder.forward(DriveEvent::Active { dx: 0.1, dy: 0.0 }).unwrap();
        forwarder.forward(DriveEvent::Active { dx: 0.5, dy: 0.0 }).unwrap();
        // Only the newest skipped sample is kept
        forwarder.forward(DriveEvent::Active { dx: 0.9, dy: 0.0 }).unwrap();
        assert!(forwarder.has_held_sample());

        // Stick held still: no new gilrs events, only the poll
        forwarder.flush().unwrap();
        assert!(forwarder.has_held_sample());

        assert_eq!(rx.try_recv().ok(), Some(DriveEvent::Active { dx: 0.1, dy: 0.0 }));
        forwarder.flush().unwrap();
        assert!(!forwarder.has_held_sample());
        assert_eq!(rx.try_recv().ok(), Some(DriveEvent::Active { dx: 0.9, dy: 0.0 }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_release_discards_held_sample() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut forwarder = SampleForwarder::new(tx);

        forwarder.forward(DriveEvent::Active { dx: 0.0, dy: -1.0 }).unwrap();
        forwarder.forward(DriveEvent::Active { dx: 0.0, dy: -0.8 }).unwrap();
        assert!(forwarder.has_held_sample());
        rx.try_recv().unwrap();

        forwarder.forward(DriveEvent::Released).unwrap();
        assert!(!forwarder.has_held_sample());
        forwarder.flush().unwrap();
        assert_eq!(rx.try_recv().ok(), Some(DriveEvent::Released));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_disconnect_releases_only_when_active() {
        let mut stick = StickTracker::new(0.05);
        assert_eq!(stick.disconnect(), None);

        stick.update(Some(-0.7), None);
        assert_eq!(stick.disconnect(), Some(DriveEvent::Released));
        assert_eq!(stick.update(None, None), None);
    }
}
