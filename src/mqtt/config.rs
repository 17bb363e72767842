use super::error::MqttError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SECURE_PORT: u16 = 8883;

/// Certificate policy for the broker connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TlsMode {
    /// Certificate chain and hostname are validated against the system roots
    #[default]
    Verify,
    /// Lab/test deployments only: any server certificate and hostname is accepted
    SkipVerify,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topics {
    pub sensor: String,
    pub threshold_response: String,
    pub switch: String,
    pub threshold: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            sensor: "esp32/sensor".to_string(),
            threshold_response: "esp32/threshold_response".to_string(),
            switch: "esp32/switch".to_string(),
            threshold: "esp32/threshold".to_string(),
        }
    }
}

/// Immutable broker connection settings, built once at startup
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub tls: TlsMode,
    pub keep_alive: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
    pub ack_timeout: Duration,
    pub topics: Topics,
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<(), MqttError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(MqttError::Configuration("broker host is empty".into()));
        }
        if host.contains(char::is_whitespace) || host.contains("://") {
            return Err(MqttError::Configuration(format!(
                "malformed broker host: {:?}",
                self.host
            )));
        }
        if self.port == 0 {
            return Err(MqttError::Configuration("broker port must not be 0".into()));
        }
        if self.client_id.trim().is_empty() {
            return Err(MqttError::Configuration("client id is empty".into()));
        }
        if self.username.is_empty() && !self.password.is_empty() {
            return Err(MqttError::Configuration(
                "password given without a username".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(MqttError::Configuration(
                "max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.host.trim(), self.port)
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> ConnectionConfig {
    ConnectionConfig {
        host: "127.0.0.1".to_string(),
        port: 1,
        username: "esp32".to_string(),
        password: "secret".to_string(),
        client_id: "aquamon-test".to_string(),
        tls: TlsMode::SkipVerify,
        keep_alive: Duration::from_secs(60),
        max_attempts: 3,
        backoff: Duration::from_secs(5),
        ack_timeout: Duration::from_millis(200),
        topics: Topics::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_sane_config() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn rejects_malformed_values() {
        let mut cfg = test_config();
        cfg.host = "mqtts://broker".into();
        assert!(matches!(cfg.validate(), Err(MqttError::Configuration(_))));

        let mut cfg = test_config();
        cfg.port = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = test_config();
        cfg.username.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = test_config();
        cfg.max_attempts = 0;
        assert!(cfg.validate().is_err());
    }
}
