//! Safety stop: immediate zero command plus a redundant burst
//!
//! ```text
//! release ──► STOP (now) ──► STOP (+T) ──► STOP (+2T)
//!             │              └──── independent task ────┘
//!             └─ issued synchronously by the drive loop
//! ```
//!
//! The follow-up commands run on their own timer chain, tracked separately
//! from the periodic tick so that cancelling the tick never cuts a burst
//! short. No acknowledgment is awaited; the burst is fixed size.
//!
//! Every follow-up reports its outcome on the notice channel so the drive
//! loop can account for a stop that landed after newer motion.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use super::link::Link;
use super::publisher::{CommandPublisher, PublishOutcome};

pub struct SafetyStop<L: Link> {
    publisher: CommandPublisher<L>,
    burst_count: u32,
    spacing: Duration,
    bursts: TaskTracker,
    notices: mpsc::UnboundedSender<PublishOutcome>,
}

impl<L: Link> SafetyStop<L> {
    pub fn new(
        publisher: CommandPublisher<L>,
        burst_count: u32,
        spacing: Duration,
        notices: mpsc::UnboundedSender<PublishOutcome>,
    ) -> Self {
        Self {
            publisher,
            burst_count,
            spacing,
            bursts: TaskTracker::new(),
            notices,
        }
    }

    /// Publishes the first stop immediately and schedules the rest of the
    /// burst. Returns the outcome of the immediate publish.
    pub fn trigger(&self) -> PublishOutcome {
        let outcome = self.publisher.publish_stop();
        info!("Safety stop triggered, immediate stop {:?}", outcome);

        let follow_ups = self.burst_count.saturating_sub(1);
        if follow_ups > 0 {
            let publisher = self.publisher.clone();
            let spacing = self.spacing;
            let notices = self.notices.clone();
            self.bursts.spawn(async move {
                for n in 1..=follow_ups {
                    tokio::time::sleep(spacing).await;
                    let outcome = publisher.publish_stop();
                    debug!("Stop burst {}/{}: {:?}", n, follow_ups, outcome);
                    if notices.send(outcome).is_err() {
                        debug!("Drive loop gone, burst notice discarded");
                    }
                }
            });
        }

        outcome
    }

    /// Number of bursts still running
    pub fn pending(&self) -> usize {
        self.bursts.len()
    }

    /// Waits until every outstanding burst has completed.
    pub async fn drain(&self) {
        self.bursts.close();
        self.bursts.wait().await;
        self.bursts.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::command::CommandMode;
    use crate::drive::link::testing::RecordingLink;
    use rumqttc::QoS;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn safety_stop(
        link: Arc<RecordingLink>,
        count: u32,
    ) -> (SafetyStop<RecordingLink>, mpsc::UnboundedReceiver<PublishOutcome>) {
        let publisher = CommandPublisher::new(link, "Car/Control".to_string(), CommandMode::Analog);
        let (tx, rx) = mpsc::unbounded_channel();
        (SafetyStop::new(publisher, count, Duration::from_millis(80), tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_sends_three_stops_within_two_ticks() {
        let link = Arc::new(RecordingLink::new(true));
        let (stop, mut notices) = safety_stop(link.clone(), 3);
        let start = Instant::now();

        assert_eq!(stop.trigger(), PublishOutcome::Sent);
        assert_eq!(link.published().len(), 1);

        stop.drain().await;
        let sent = link.published();
        assert_eq!(sent.len(), 3);
        for msg in &sent {
            assert_eq!(msg.qos, QoS::AtLeastOnce);
            assert_eq!(msg.text(), r#"{"throttle":0.0,"steer":0.0}"#);
        }
        assert!(sent[2].at - start <= Duration::from_millis(160));
        assert_eq!(sent[1].at - sent[0].at, Duration::from_millis(80));

        // Only the follow-ups are reported, the immediate stop is the caller's
        assert_eq!(notices.try_recv().ok(), Some(PublishOutcome::Sent));
        assert_eq!(notices.try_recv().ok(), Some(PublishOutcome::Sent));
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_command_burst_spawns_nothing() {
        let link = Arc::new(RecordingLink::new(true));
        let (stop, mut notices) = safety_stop(link.clone(), 1);
        stop.trigger();
        assert_eq!(stop.pending(), 0);
        stop.drain().await;
        assert_eq!(link.published().len(), 1);
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_skips_while_disconnected_and_resumes() {
        let link = Arc::new(RecordingLink::new(false));
        let (stop, mut notices) = safety_stop(link.clone(), 3);

        assert_eq!(stop.trigger(), PublishOutcome::Dropped);
        tokio::time::sleep(Duration::from_millis(100)).await;
        link.set_connected(true);
        stop.drain().await;

        // Only the last burst command found the link up
        assert_eq!(link.published().len(), 1);
        assert_eq!(notices.try_recv().ok(), Some(PublishOutcome::Dropped));
        assert_eq!(notices.try_recv().ok(), Some(PublishOutcome::Sent));
    }
}
