use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::message_manager::PublishRecord;
use crate::drive::{Link, LinkError};

/// How long a shutdown keeps polling so queued stop commands reach the broker
const FLUSH_TIMEOUT: Duration = Duration::from_millis(500);
const MAX_ERROR_MESSAGES: usize = 10;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Initial connect never succeeded
    Failed,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct MQTTStatus {
    pub connection_state: ConnectionState,
    pub error_messages: Vec<String>,
    pub messages_sent: usize,
    pub last_message: Option<PublishRecord>,
    pub last_activity: Option<chrono::DateTime<chrono::Local>>,
}

impl MQTTStatus {
    fn push_error(&mut self, message: String) {
        if self.error_messages.len() >= MAX_ERROR_MESSAGES {
            self.error_messages.remove(0);
        }
        self.error_messages.push(message);
    }
}

/// Publishing side of the broker connection, shared with the drive loop
pub struct MqttLink {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    status: watch::Sender<MQTTStatus>,
}

impl Link for MqttLink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }

        let record = PublishRecord::from_publish(topic, &payload, qos);
        // try_publish only enqueues; the event loop task does the I/O
        self.client
            .try_publish(topic, qos, false, payload)
            .map_err(|e| LinkError::PublishRejected(e.to_string()))?;

        self.status.send_modify(|status| {
            status.messages_sent += 1;
            status.last_message = Some(record);
            status.last_activity = Some(chrono::Local::now());
        });
        Ok(())
    }
}

/// Owns the event loop task of the broker connection
pub struct MqttHandler {
    status_receiver: watch::Receiver<MQTTStatus>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl MqttHandler {
    /// Starts connecting in the background. Connection problems are only
    /// reported through the status channel, never as an error here.
    pub fn spawn(config: MqttConfig) -> (Self, Arc<MqttLink>) {
        info!(
            "Starting MQTT session to {}:{} as {}",
            config.host, config.port, config.client_id
        );

        let mut mqtt_options =
            MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        mqtt_options
            .set_keep_alive(config.keep_alive())
            // No session replay of old motion commands after reconnect
            .set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(mqtt_options, config.request_capacity.max(1));

        let (status_sender, status_receiver) = watch::channel(MQTTStatus::default());
        let connected = Arc::new(AtomicBool::new(false));
        let link = Arc::new(MqttLink {
            client: client.clone(),
            connected: connected.clone(),
            status: status_sender.clone(),
        });

        let shutdown = CancellationToken::new();
        let session = LinkSession {
            client,
            eventloop,
            connected,
            status: status_sender,
            reconnect_delay: config.reconnect_delay(),
            ever_connected: false,
        };
        let task = tokio::spawn(session.run(shutdown.clone()));

        (
            Self {
                status_receiver,
                shutdown,
                task,
            },
            link,
        )
    }

    pub fn subscribe(&self) -> watch::Receiver<MQTTStatus> {
        self.status_receiver.clone()
    }

    /// Disconnects after flushing what is already queued.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            error!("MQTT task terminated abnormally: {}", e);
        }
    }
}

struct LinkSession {
    client: AsyncClient,
    eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    status: watch::Sender<MQTTStatus>,
    reconnect_delay: Duration,
    ever_connected: bool,
}

impl LinkSession {
    async fn run(mut self, shutdown: CancellationToken) {
        self.set_state(ConnectionState::Connecting);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = self.eventloop.poll() => match event {
                    Ok(event) => self.handle_event(event),
                    Err(e) => {
                        self.handle_error(e.to_string());
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(self.reconnect_delay) => {}
                        }
                        self.set_state(if self.ever_connected {
                            ConnectionState::Reconnecting
                        } else {
                            ConnectionState::Connecting
                        });
                    }
                },
            }
        }

        self.flush_and_disconnect().await;
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    info!("MQTT connected");
                    self.ever_connected = true;
                    self.set_state(ConnectionState::Connected);
                } else {
                    self.handle_error(format!("Connection refused: {:?}", ack.code));
                }
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Broker closed the session");
                self.set_state(ConnectionState::Disconnected);
            }
            Event::Incoming(Packet::PubAck(ack)) => {
                debug!("PubAck for packet {}", ack.pkid);
            }
            other => debug!("MQTT event: {:?}", other),
        }
    }

    fn handle_error(&mut self, message: String) {
        let state = if self.ever_connected {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Failed
        };
        warn!("MQTT connection error ({:?}): {}", state, message);
        self.set_state(state);
        self.status.send_modify(|status| status.push_error(message));
    }

    fn set_state(&self, state: ConnectionState) {
        self.connected
            .store(state == ConnectionState::Connected, Ordering::Release);
        self.status.send_if_modified(|status| {
            if status.connection_state == state {
                return false;
            }
            info!(
                "MQTT state: {:?} -> {:?}",
                status.connection_state, state
            );
            status.connection_state = state;
            true
        });
    }

    async fn flush_and_disconnect(&mut self) {
        if !self.connected.load(Ordering::Acquire) {
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        info!("Disconnecting from broker");
        if let Err(e) = self.client.try_disconnect() {
            warn!("Failed to queue disconnect: {}", e);
        }

        // Drive the event loop until the disconnect went out
        let flush = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => break,
                    Ok(event) => debug!("Flushing: {:?}", event),
                    Err(e) => {
                        debug!("Event loop closed during flush: {}", e);
                        break;
                    }
                }
            }
        };
        if tokio::time::timeout(FLUSH_TIMEOUT, flush).await.is_err() {
            warn!("Flush timed out after {}ms", FLUSH_TIMEOUT.as_millis());
        }
        self.set_state(ConnectionState::Disconnected);
    }
}
