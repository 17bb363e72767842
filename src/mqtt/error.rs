//! Error types and failure classification for the MQTT link
//!
//! Configuration errors surface once from [`MqttHandler::initialize`](super::mqtt_handler::MqttHandler::initialize).
//! Transport and protocol errors never leave the worker thread as errors; they are
//! classified into a [`FailureCause`] and drive the reconnection policy instead.

use rumqttc::{ConnectReturnCode, ConnectionError};
use std::fmt;
use std::io;
use thiserror::Error;

/// Errors raised while setting up or starting the broker link
#[derive(Debug, Error)]
pub enum MqttError {
    /// Invalid broker address, credentials or policy values
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A worker thread is still alive; the start request is rejected, not queued
    #[error("Connection attempt already in progress")]
    AlreadyConnecting,

    /// The reconnection policy refused the start request
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    /// Spawning the background transport thread failed
    #[error("Worker error: {0}")]
    Worker(String),
}

/// Invalid lifecycle requests against the reconnection policy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("cannot start while {0}")]
    NotStartable(super::reconnect::LinkState),
}

/// Outbound publish failures
///
/// Every variant carries a stable numeric code so the log line reads the same
/// regardless of which layer rejected the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("transport not initialized")]
    NotInitialized,

    #[error("not connected to broker")]
    NotConnected,

    #[error("client rejected publish: {0}")]
    Rejected(String),

    #[error("no delivery acknowledgment within {0} ms")]
    Timeout(u64),

    #[error("connection lost before acknowledgment")]
    ConnectionLost,
}

impl PublishError {
    pub fn code(&self) -> u8 {
        match self {
            PublishError::NotInitialized => 1,
            PublishError::NotConnected => 2,
            PublishError::Rejected(_) => 3,
            PublishError::Timeout(_) => 4,
            PublishError::ConnectionLost => 5,
        }
    }
}

/// Malformed inbound sensor payload
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("malformed sensor payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("sensor payload is not a JSON object")]
    NotAnObject,
}

/// Invalid user command input
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("threshold input is not a number: {0:?}")]
    InvalidThreshold(String),

    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Human-readable classification of a failed attempt or abnormal drop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    CredentialsRejected,
    NotAuthorized,
    ProtocolRejected,
    ClientIdRejected,
    BrokerUnavailable,
    TlsHandshakeFailed,
    NetworkTimeout,
    ConnectionRefused,
    NetworkError,
    ProtocolError,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureCause::CredentialsRejected => "credentials rejected",
            FailureCause::NotAuthorized => "not authorized",
            FailureCause::ProtocolRejected => "protocol version rejected",
            FailureCause::ClientIdRejected => "client id rejected",
            FailureCause::BrokerUnavailable => "broker unavailable",
            FailureCause::TlsHandshakeFailed => "TLS handshake failed",
            FailureCause::NetworkTimeout => "network timeout",
            FailureCause::ConnectionRefused => "connection refused",
            FailureCause::NetworkError => "network error",
            FailureCause::ProtocolError => "protocol error",
        };
        f.write_str(text)
    }
}

impl FailureCause {
    /// Maps a non-success CONNACK return code to its cause and numeric code
    pub fn from_return_code(code: ConnectReturnCode) -> (Self, Option<u8>) {
        match code {
            ConnectReturnCode::Success => (FailureCause::ProtocolError, Some(0)),
            ConnectReturnCode::RefusedProtocolVersion => (FailureCause::ProtocolRejected, Some(1)),
            ConnectReturnCode::BadClientId => (FailureCause::ClientIdRejected, Some(2)),
            ConnectReturnCode::ServiceUnavailable => (FailureCause::BrokerUnavailable, Some(3)),
            ConnectReturnCode::BadUserNamePassword => (FailureCause::CredentialsRejected, Some(4)),
            ConnectReturnCode::NotAuthorized => (FailureCause::NotAuthorized, Some(5)),
        }
    }

    /// Classifies a transport error reported by the event loop
    pub fn classify(error: &ConnectionError) -> (Self, Option<u8>) {
        match error {
            ConnectionError::ConnectionRefused(code) => Self::from_return_code(*code),
            ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => {
                (FailureCause::NetworkTimeout, None)
            }
            ConnectionError::Io(e) => (Self::from_io(e), None),
            ConnectionError::Tls(_) => (FailureCause::TlsHandshakeFailed, None),
            _ => (FailureCause::ProtocolError, None),
        }
    }

    fn from_io(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::ConnectionRefused => FailureCause::ConnectionRefused,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => FailureCause::NetworkTimeout,
            // rustls surfaces handshake failures as InvalidData
            io::ErrorKind::InvalidData => FailureCause::TlsHandshakeFailed,
            _ => FailureCause::NetworkError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_handshake_keeps_return_code() {
        let err = ConnectionError::ConnectionRefused(ConnectReturnCode::BadUserNamePassword);
        assert_eq!(
            FailureCause::classify(&err),
            (FailureCause::CredentialsRejected, Some(4))
        );
        assert_eq!(
            FailureCause::CredentialsRejected.to_string(),
            "credentials rejected"
        );
    }

    #[test]
    fn io_errors_are_classified_by_kind() {
        let refused = ConnectionError::Io(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(
            FailureCause::classify(&refused),
            (FailureCause::ConnectionRefused, None)
        );

        let timeout = ConnectionError::Io(io::Error::from(io::ErrorKind::TimedOut));
        assert_eq!(
            FailureCause::classify(&timeout).0,
            FailureCause::NetworkTimeout
        );
        assert_eq!(
            FailureCause::classify(&ConnectionError::NetworkTimeout).0,
            FailureCause::NetworkTimeout
        );
    }

    #[test]
    fn publish_error_codes_are_distinct() {
        let codes = [
            PublishError::NotInitialized.code(),
            PublishError::NotConnected.code(),
            PublishError::Rejected(String::new()).code(),
            PublishError::Timeout(0).code(),
            PublishError::ConnectionLost.code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
