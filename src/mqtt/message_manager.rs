use chrono::NaiveDateTime;
use rumqttc::QoS;
use std::fmt;

/// Last command handed to the broker connection, kept for status display
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishRecord {
    topic: String,
    content: String,
    qos: QoS,
    timestamp: NaiveDateTime,
}

impl fmt::Display for PublishRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} [{:?}] {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.topic,
            self.qos,
            self.content
        )
    }
}

impl PublishRecord {
    pub fn from_publish(topic: &str, payload: &[u8], qos: QoS) -> Self {
        PublishRecord {
            topic: topic.to_string(),
            content: String::from_utf8_lossy(payload).into_owned(),
            qos,
            timestamp: chrono::Local::now().naive_local(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_renders_payload() {
        let record = PublishRecord::from_publish("Car/Control", b"STOP", QoS::AtLeastOnce);
        assert_eq!(record.topic(), "Car/Control");
        assert_eq!(record.content(), "STOP");
        assert!(record.to_string().ends_with("Car/Control [AtLeastOnce] STOP"));
    }
}
