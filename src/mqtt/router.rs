//! Inbound message routing
//!
//! Every message is logged raw as `[topic] payload`. Messages on the sensor
//! topic are additionally decoded; a decode failure is logged and the message
//! is dropped without touching connection state. Other topics are inert.

use super::event_log::LogSink;
use super::message_manager::{MQTTMessage, SensorReading};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct MessageRouter {
    sensor_topic: String,
}

impl MessageRouter {
    pub fn new(sensor_topic: impl Into<String>) -> Self {
        Self {
            sensor_topic: sensor_topic.into(),
        }
    }

    pub fn sensor_topic(&self) -> &str {
        &self.sensor_topic
    }

    /// Logs the message and returns the decoded reading for sensor-topic payloads
    pub fn route(&self, message: &MQTTMessage, log: &mut dyn LogSink) -> Option<SensorReading> {
        let content = message.content();
        log.info(format!("[{}] {}", message.topic, content));

        if message.topic != self.sensor_topic {
            debug!("No structured handler for topic {}", message.topic);
            return None;
        }

        match SensorReading::decode(&message.payload) {
            Ok(reading) => Some(reading),
            Err(e) => {
                log.error(format!("Malformed sensor payload ({}): {}", e, content));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::event_log::{EventLog, LogLevel};

    fn msg(topic: &str, payload: &str) -> MQTTMessage {
        MQTTMessage::from_topic(topic.to_string(), payload.as_bytes().to_vec())
    }

    #[test]
    fn sensor_payload_is_decoded_and_logged_raw() {
        let router = MessageRouter::new("esp32/sensor");
        let mut log = EventLog::default();

        let reading = router.route(&msg("esp32/sensor", r#"{"do": 6.1}"#), &mut log);
        assert_eq!(reading.and_then(|r| r.dissolved_oxygen), Some(6.1));
        assert_eq!(log.len(), 1);
        assert_eq!(
            log.entries().next().map(|e| e.text.as_str()),
            Some(r#"[esp32/sensor] {"do": 6.1}"#)
        );
    }

    #[test]
    fn malformed_sensor_payload_logs_exactly_one_error() {
        let router = MessageRouter::new("esp32/sensor");
        let mut log = EventLog::default();

        assert!(router.route(&msg("esp32/sensor", "oops{"), &mut log).is_none());
        let errors = log.entries().filter(|e| e.level == LogLevel::Error).count();
        assert_eq!(errors, 1);
        assert!(log.entries().any(|e| e.text.contains("oops{")));
    }

    #[test]
    fn other_topics_are_logged_only() {
        let router = MessageRouter::new("esp32/sensor");
        let mut log = EventLog::default();

        assert!(router
            .route(&msg("esp32/threshold_response", "ok"), &mut log)
            .is_none());
        assert!(router.route(&msg("some/unknown", "{}"), &mut log).is_none());
        assert_eq!(log.len(), 2);
        assert!(log.entries().all(|e| e.level == LogLevel::Info));
    }
}
