//! Drive loop task and its public handle
//!
//! One tokio task owns the [`DriveController`] and multiplexes four
//! sources: shutdown, the periodic tick, stop burst notices and sampler
//! events, polled in that order. Because every
//! mutation happens inside this task, the single-writer split of the axis
//! state holds without any locking.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::controller::DriveController;
use super::link::Link;
use super::{DriveError, DriveEvent, DriveSettings, DriveSnapshot};

pub struct DriveHandle {
    snapshot_receiver: watch::Receiver<DriveSnapshot>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl DriveHandle {
    /// Spawns the drive loop. Settings must already be validated.
    pub fn spawn<L: Link>(
        settings: DriveSettings,
        link: Arc<L>,
        events: mpsc::Receiver<DriveEvent>,
    ) -> Self {
        info!("Spawning drive loop with settings: {:?}", settings);

        let controller = DriveController::new(&settings, link);
        let (snapshot_sender, snapshot_receiver) = watch::channel(controller.snapshot());
        let shutdown = CancellationToken::new();

        let loop_shutdown = shutdown.clone();
        let interval = Duration::from_millis(settings.tick_interval_ms);
        let task = tokio::spawn(async move {
            run_drive_loop(controller, events, snapshot_sender, interval, loop_shutdown).await;
            info!("Drive loop finished");
        });

        Self {
            snapshot_receiver,
            shutdown,
            task,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DriveSnapshot> {
        self.snapshot_receiver.clone()
    }

    /// Cancels the tick, issues a final stop if needed and waits for
    /// outstanding stop bursts.
    pub async fn shutdown(self) -> Result<(), DriveError> {
        info!("Shutting down drive loop");
        self.shutdown.cancel();
        self.task
            .await
            .map_err(|e| DriveError::LoopTerminated(e.to_string()))
    }
}

async fn run_drive_loop<L: Link>(
    mut controller: DriveController<L>,
    mut events: mpsc::Receiver<DriveEvent>,
    snapshot_sender: watch::Sender<DriveSnapshot>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    info!("Starting drive loop with {}ms tick", interval.as_millis());
    let mut ticker = tokio::time::interval(interval);
    // A late tick is skipped, never replayed in a burst
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut input_open = true;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("Drive loop cancelled");
                break;
            }
            // Ahead of events so a sampler backlog cannot starve the tick
            _ = ticker.tick() => controller.tick(),
            Some(outcome) = controller.next_burst_stop() => {
                controller.burst_stop_published(outcome);
            }
            event = events.recv(), if input_open => match event {
                Some(event) => controller.handle_event(event),
                None => {
                    warn!("Input channel closed, releasing");
                    input_open = false;
                    controller.release();
                }
            },
        }

        if snapshot_sender.send(controller.snapshot()).is_err() {
            debug!("No snapshot subscribers left");
        }
    }

    controller.shutdown().await;
    if snapshot_sender.send(controller.snapshot()).is_err() {
        error!("Final drive snapshot could not be delivered");
    }
}
