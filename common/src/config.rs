use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required config field `{0}`")]
    MissingField(&'static str),
}

/// Pub/sub telemetry backend (Channel B).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub server: String,
    pub token: String,
    pub device_label: String,
    pub topic: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            token: String::new(),
            device_label: "ESP32-Sensor".to_string(),
            topic: String::new(),
        }
    }
}

/// Document-store ingestion backend (Channel A).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    pub url: String,
    pub key: String,
}

/// Process-wide configuration, read once at startup. The JSON wire shape
/// keeps the two backend sections under `mqtt` and `api`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(rename = "mqtt")]
    pub broker: BrokerConfig,
    #[serde(rename = "api")]
    pub ingest: IngestConfig,
}

impl NodeConfig {
    /// Startup gate: the node refuses to run without the fields both
    /// channels need. The API key may be empty (open ingestion endpoints).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.server.trim().is_empty() {
            return Err(ConfigError::MissingField("mqtt.server"));
        }
        if self.broker.token.trim().is_empty() {
            return Err(ConfigError::MissingField("mqtt.token"));
        }
        if self.broker.topic.trim().is_empty() {
            return Err(ConfigError::MissingField("mqtt.topic"));
        }
        if self.ingest.url.trim().is_empty() {
            return Err(ConfigError::MissingField("api.url"));
        }
        Ok(())
    }

    /// Identifier stamped into ingestion payloads.
    pub fn device_label(&self) -> &str {
        if self.broker.device_label.is_empty() {
            "ESP32-Sensor"
        } else {
            &self.broker.device_label
        }
    }
}

/// Persisted network credentials. Written only by the provisioning server;
/// read at startup and on each reconnect attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

impl WifiCredentials {
    /// Absent or empty credentials are a valid state meaning "must
    /// provision".
    pub fn is_provisioned(&self) -> bool {
        !self.ssid.trim().is_empty() && !self.password.trim().is_empty()
    }
}
