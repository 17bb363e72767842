use super::error::{CommandError, PayloadError};
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

const PREVIEW_LEN: usize = 40;

/// Raw inbound message as handed from the transport worker to the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MQTTMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub timestamp: NaiveDateTime,
}

impl fmt::Display for MQTTMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let content = self.content();
        let preview: String = content.chars().take(PREVIEW_LEN).collect();
        write!(f, "{} - {}", self.timestamp, preview)
    }
}

impl MQTTMessage {
    pub fn from_topic(topic: String, payload: Vec<u8>) -> Self {
        MQTTMessage {
            topic,
            payload,
            timestamp: Local::now().naive_local(),
        }
    }

    /// Payload as text, with invalid UTF-8 replaced
    pub fn content(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// One decoded sensor message; every field is optional
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct SensorReading {
    #[serde(rename = "do", default, deserialize_with = "lenient_number")]
    pub dissolved_oxygen: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub ph: Option<f64>,
    #[serde(rename = "temp", default, deserialize_with = "lenient_number")]
    pub temperature: Option<f64>,
}

impl SensorReading {
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let text = std::str::from_utf8(payload)?;
        let value: serde_json::Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(PayloadError::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Fields present in `newer` replace ours, absent ones are kept
    pub fn merge(&mut self, newer: &SensorReading) {
        if newer.dissolved_oxygen.is_some() {
            self.dissolved_oxygen = newer.dissolved_oxygen;
        }
        if newer.ph.is_some() {
            self.ph = newer.ph;
        }
        if newer.temperature.is_some() {
            self.temperature = newer.temperature;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dissolved_oxygen.is_none() && self.ph.is_none() && self.temperature.is_none()
    }
}

// Firmware builds differ in whether they quote the numbers.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(f64),
        Text(String),
    }

    match Option::<NumberOrText>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrText::Number(n)) => Ok(Some(n)),
        Some(NumberOrText::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("not a number: {:?}", s))),
    }
}

/// Relay switch command, sent as a plain token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchCommand {
    On,
    Off,
}

impl SwitchCommand {
    pub fn payload(&self) -> &'static str {
        match self {
            SwitchCommand::On => "yes",
            SwitchCommand::Off => "no",
        }
    }
}

/// Dissolved-oxygen alarm thresholds, sent as a JSON object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThresholdCommand {
    pub max_do: String,
    pub min_do: String,
    pub timestamp: String,
}

impl ThresholdCommand {
    /// Validates both inputs as numbers and stamps the current local time.
    /// The values travel as the text the user typed.
    pub fn from_input(max: &str, min: &str) -> Result<Self, CommandError> {
        let max = max.trim();
        let min = min.trim();
        for value in [max, min] {
            if value.parse::<f64>().is_err() {
                return Err(CommandError::InvalidThreshold(value.to_string()));
            }
        }
        Ok(Self {
            max_do: max.to_string(),
            min_do: min.to_string(),
            timestamp: Local::now()
                .naive_local()
                .format("%Y-%m-%d %H:%M:%S%.6f")
                .to_string(),
        })
    }

    pub fn to_payload(&self) -> Result<String, CommandError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_any_subset_and_ignores_unknown_fields() {
        let r = SensorReading::decode(br#"{"do": 7.25, "rssi": -60}"#).unwrap();
        assert_eq!(r.dissolved_oxygen, Some(7.25));
        assert_eq!(r.ph, None);
        assert_eq!(r.temperature, None);

        let r = SensorReading::decode(br#"{"ph": "6.9", "temp": 25.5, "do": null}"#).unwrap();
        assert_eq!(r.ph, Some(6.9));
        assert_eq!(r.temperature, Some(25.5));
        assert_eq!(r.dissolved_oxygen, None);
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(SensorReading::decode(b"not json").is_err());
        assert!(SensorReading::decode(b"[1, 2]").is_err());
        assert!(SensorReading::decode(br#"{"ph": "acidic"}"#).is_err());
        assert!(SensorReading::decode(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn merge_keeps_absent_fields() {
        let mut latest = SensorReading {
            dissolved_oxygen: Some(7.0),
            ph: Some(7.1),
            temperature: Some(20.0),
        };
        latest.merge(&SensorReading {
            ph: Some(6.5),
            ..Default::default()
        });
        assert_eq!(latest.dissolved_oxygen, Some(7.0));
        assert_eq!(latest.ph, Some(6.5));
    }

    #[test]
    fn threshold_payload_has_expected_keys() {
        let cmd = ThresholdCommand::from_input(" 8.5", "4").unwrap();
        let value: serde_json::Value = serde_json::from_str(&cmd.to_payload().unwrap()).unwrap();
        assert_eq!(value["max_do"], "8.5");
        assert_eq!(value["min_do"], "4");
        assert!(value["timestamp"].is_string());

        assert!(matches!(
            ThresholdCommand::from_input("high", "4"),
            Err(CommandError::InvalidThreshold(v)) if v == "high"
        ));
    }

    #[test]
    fn switch_tokens() {
        assert_eq!(SwitchCommand::On.payload(), "yes");
        assert_eq!(SwitchCommand::Off.payload(), "no");
    }

    #[test]
    fn display_preview_handles_short_content() {
        let msg = MQTTMessage::from_topic("t".into(), b"hi".to_vec());
        assert!(msg.to_string().ends_with("hi"));
    }
}
