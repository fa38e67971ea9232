use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Broker connection parameters for the link session
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Capacity of the client request queue; publishes beyond it are dropped
    pub request_capacity: usize,
    pub reconnect_delay_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "teledrive".to_string(),
            keep_alive_secs: 5,
            request_capacity: 10,
            reconnect_delay_ms: 1000,
        }
    }
}

impl MqttConfig {
    /// Applies a `host` or `host:port` override
    pub fn apply_broker(&mut self, broker: &str) -> Result<(), String> {
        let server_comps: Vec<&str> = broker.split(':').collect();
        match server_comps.as_slice() {
            [host] if !host.is_empty() => {
                self.host = host.to_string();
                Ok(())
            }
            [host, port] if !host.is_empty() => {
                self.port = port
                    .parse()
                    .map_err(|e| format!("invalid broker port '{}': {}", port, e))?;
                self.host = host.to_string();
                Ok(())
            }
            _ => Err(format!("invalid broker address: {}", broker)),
        }
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
