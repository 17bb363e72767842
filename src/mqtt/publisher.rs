//! Outbound command publishing
//!
//! Fails closed: without a transport, or while the transport reports itself
//! disconnected, nothing is sent and `false` comes back with a log line.

use super::error::PublishError;
use super::event_log::LogSink;
use std::time::Duration;
use tracing::debug;

/// The transport capabilities the publisher needs
pub trait CommandTransport {
    fn is_connected(&self) -> bool;

    /// Publishes and blocks up to `timeout` for the broker's acknowledgment.
    ///
    /// The wait is synchronous on the caller's thread. Called from the UI
    /// task it pauses the tick, so no link events are drained until the ack
    /// arrives or `timeout` passes; keep `ack_timeout` short.
    fn publish_confirmed(
        &self,
        topic: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(), PublishError>;
}

#[derive(Debug, Clone)]
pub struct CommandPublisher {
    ack_timeout: Duration,
}

impl CommandPublisher {
    pub fn new(ack_timeout: Duration) -> Self {
        Self { ack_timeout }
    }

    pub fn publish(
        &self,
        transport: Option<&dyn CommandTransport>,
        topic: &str,
        payload: &str,
        log: &mut dyn LogSink,
    ) -> bool {
        let Some(transport) = transport else {
            let err = PublishError::NotInitialized;
            log.error(format!("Cannot send command (code {}): {}", err.code(), err));
            return false;
        };
        if !transport.is_connected() {
            let err = PublishError::NotConnected;
            log.error(format!("Cannot send command (code {}): {}", err.code(), err));
            return false;
        }

        debug!("Publishing {} bytes to {}", payload.len(), topic);
        match transport.publish_confirmed(topic, payload.as_bytes(), self.ack_timeout) {
            Ok(()) => {
                log.info(format!("Sent: {}", payload));
                true
            }
            Err(e) => {
                log.error(format!("Send failed (code {}): {}", e.code(), e));
                false
            }
        }
    }
}
