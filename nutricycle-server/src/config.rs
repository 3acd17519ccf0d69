//! Node configuration: defaults, config file, environment

use nutricycle_cns::{AnnounceConfig, BrokerConfig, ControlConfig};
use nutricycle_core::DEFAULT_QUEUE_CAPACITY;
use nutricycle_eye::VisionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid environment variable {0}: {1}")]
    Env(String, String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl HttpConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Everything one detection node needs at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identity used in events, announces and command checks
    pub machine_id: Option<String>,
    pub vision: VisionConfig,
    pub broker: BrokerConfig,
    pub announce: AnnounceConfig,
    pub control: ControlConfig,
    pub http: HttpConfig,
    pub queue_capacity: usize,
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            machine_id: None,
            vision: VisionConfig::default(),
            broker: BrokerConfig::default(),
            announce: AnnounceConfig::default(),
            control: ControlConfig::default(),
            http: HttpConfig::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Parse JSON, TOML or YAML, whichever accepts the text first.
    pub fn from_str(text: &str) -> Result<Self, ConfigError> {
        let json_err = match serde_json::from_str(text) {
            Ok(config) => return Ok(config),
            Err(e) => e,
        };
        let toml_err = match toml::from_str(text) {
            Ok(config) => return Ok(config),
            Err(e) => e,
        };
        match serde_yaml::from_str(text) {
            Ok(config) => Ok(config),
            Err(yaml_err) => Err(ConfigError::Parse(format!(
                "not JSON ({}), TOML ({}) or YAML ({})",
                json_err,
                toml_err.message(),
                yaml_err
            ))),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_str(&text)
    }

    /// Overlay `NUTRICYCLE_*` variables from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(std::env::vars())
    }

    pub fn apply_vars<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix("NUTRICYCLE_") else {
                continue;
            };
            match name {
                "MACHINE_ID" => self.machine_id = Some(value),
                "SOURCE" => self.vision.source = value,
                "MODEL" => self.vision.model_path = value.into(),
                "BACKEND" => self.vision.backend = parse_env(&key, &value)?,
                "DETECTOR_BINARY" => self.vision.detector_binary = value.into(),
                "CONF" => self.vision.confidence_threshold = parse_env(&key, &value)?,
                "FLIP" => self.vision.flip = parse_env(&key, &value)?,
                "TARGET_SIZE" => self.vision.target_size = parse_env(&key, &value)?,
                "HOST" => self.http.host = value,
                "PORT" => self.http.port = parse_env(&key, &value)?,
                "ANNOUNCE_SERVER" => self.announce.server = Some(value),
                "ANNOUNCE_INTERVAL" => self.announce.interval_secs = parse_env(&key, &value)?,
                "PUBLIC_URL" => self.announce.public_url = Some(value),
                "MQTT_BROKER" => self.broker.host = Some(value),
                "MQTT_PORT" => self.broker.port = parse_env(&key, &value)?,
                "MQTT_TOPIC" => self.broker.topics.detections = value,
                "MQTT_ESP_TOPIC" => self.broker.topics.alert = value,
                "MQTT_USERNAME" => self.broker.username = Some(value),
                "MQTT_PASSWORD" => self.broker.password = Some(value),
                "MQTT_QOS" => self.broker.qos = parse_env(&key, &value)?,
                "CONTROL_TOKEN" => self.control.token = Some(value),
                "QUEUE_CAPACITY" => self.queue_capacity = parse_env(&key, &value)?,
                "LOG_LEVEL" => self.log_level = value,
                _ => {}
            }
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if let Some(id) = &self.machine_id {
            if id.trim().is_empty() {
                return Err("Machine ID must not be blank".to_string());
            }
        }
        if self.queue_capacity == 0 {
            return Err("Queue capacity must be greater than 0".to_string());
        }
        if self.http.port == 0 {
            return Err("HTTP port must be non-zero".to_string());
        }
        self.vision.validate()?;
        self.broker.validate()?;
        self.announce.validate()?;
        self.control.validate()?;
        Ok(())
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::Env(key.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nutricycle_eye::{BackendKind, FlipMode};

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_config_default() {
        let config = NodeConfig::default();
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.http.host, "0.0.0.0");
        assert_eq!(config.queue_capacity, 32);
        assert_eq!(config.vision.confidence_threshold, 0.5);
        assert_eq!(config.announce.interval_secs, 60);
        assert_eq!(config.broker.port, 1883);
        assert!(config.machine_id.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_json() {
        let config = NodeConfig::from_str(
            r#"{"machine_id": "bin-1", "http": {"port": 9000}, "vision": {"flip": "180"}}"#,
        )
        .unwrap();
        assert_eq!(config.machine_id.as_deref(), Some("bin-1"));
        assert_eq!(config.http.port, 9000);
        assert_eq!(config.vision.flip, FlipMode::Rotate180);
        assert_eq!(config.vision.target_size, 320);
    }

    #[test]
    fn test_config_from_toml() {
        let config = NodeConfig::from_str(
            r#"
machine_id = "bin-2"
queue_capacity = 8

[broker]
host = "broker.local"

[broker.topics]
alert = "plant/esp"

[vision]
backend = "onnx"
"#,
        )
        .unwrap();
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.broker.host.as_deref(), Some("broker.local"));
        assert_eq!(config.broker.topics.alert, "plant/esp");
        assert_eq!(config.broker.topics.detections, "nutricycle/detections");
        assert_eq!(config.vision.backend, BackendKind::Onnx);
    }

    #[test]
    fn test_config_from_yaml() {
        let config = NodeConfig::from_str(
            "machine_id: bin-3\ncontrol:\n  token: s3cret\nannounce:\n  server: http://central/announce\n",
        )
        .unwrap();
        assert_eq!(config.machine_id.as_deref(), Some("bin-3"));
        assert_eq!(config.control.token.as_deref(), Some("s3cret"));
        assert_eq!(config.announce.server.as_deref(), Some("http://central/announce"));
    }

    #[test]
    fn test_config_parse_error() {
        assert!(matches!(
            NodeConfig::from_str("machine_id: [unclosed"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overlay() {
        let mut config = NodeConfig::default();
        config
            .apply_vars(vars(&[
                ("NUTRICYCLE_MACHINE_ID", "A"),
                ("NUTRICYCLE_PORT", "8181"),
                ("NUTRICYCLE_MQTT_BROKER", "10.0.0.5"),
                ("NUTRICYCLE_FLIP", "vertical"),
                ("NUTRICYCLE_CONF", "0.35"),
                ("PATH", "/usr/bin"),
            ]))
            .unwrap();
        assert_eq!(config.machine_id.as_deref(), Some("A"));
        assert_eq!(config.http.port, 8181);
        assert_eq!(config.broker.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(config.vision.flip, FlipMode::Vertical);
        assert!((config.vision.confidence_threshold - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_env_overlay_rejects_bad_number() {
        let mut config = NodeConfig::default();
        match config.apply_vars(vars(&[("NUTRICYCLE_PORT", "eighty")])) {
            Err(ConfigError::Env(key, _)) => assert_eq!(key, "NUTRICYCLE_PORT"),
            _ => panic!("Expected Env error"),
        }
    }

    #[test]
    fn test_config_validation_queue_capacity() {
        let mut config = NodeConfig::default();
        config.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_nested() {
        let mut config = NodeConfig::default();
        config.vision.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.broker.qos = 7;
        assert!(config.validate().is_err());
    }
}
