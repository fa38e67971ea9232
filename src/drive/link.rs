//! Capability the drive pipeline needs from the transport
//!
//! The pipeline never owns the connection. It only asks whether the link is
//! up and hands over payloads without waiting for delivery.

use rumqttc::QoS;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Link not connected")]
    NotConnected,

    #[error("Publish request rejected: {0}")]
    PublishRejected(String),
}

pub trait Link: Send + Sync + 'static {
    fn is_connected(&self) -> bool;

    /// Fire-and-forget publish. Must not block on network I/O.
    fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), LinkError>;
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Debug, Clone)]
    pub struct Published {
        pub topic: String,
        pub payload: Vec<u8>,
        pub qos: QoS,
        pub at: Instant,
    }

    impl Published {
        pub fn text(&self) -> String {
            String::from_utf8_lossy(&self.payload).into_owned()
        }
    }

    /// In-memory link that records everything handed to it
    #[derive(Debug)]
    pub struct RecordingLink {
        connected: AtomicBool,
        published: Mutex<Vec<Published>>,
    }

    impl RecordingLink {
        pub fn new(connected: bool) -> Self {
            Self {
                connected: AtomicBool::new(connected),
                published: Mutex::new(Vec::new()),
            }
        }

        pub fn set_connected(&self, connected: bool) {
            self.connected.store(connected, Ordering::SeqCst);
        }

        pub fn published(&self) -> Vec<Published> {
            self.published.lock().unwrap().clone()
        }

        pub fn clear(&self) {
            self.published.lock().unwrap().clear();
        }
    }

    impl Link for RecordingLink {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), LinkError> {
            if !self.is_connected() {
                return Err(LinkError::NotConnected);
            }
            self.published.lock().unwrap().push(Published {
                topic: topic.to_string(),
                payload,
                qos,
                at: Instant::now(),
            });
            Ok(())
        }
    }
}
