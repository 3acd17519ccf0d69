//! Configuration for nutricycle-cns

use serde::{Deserialize, Serialize};

/// Topic names used on the broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TopicConfig {
    /// Full detection events
    pub detections: String,
    /// Compact alerts for the actuator controller
    pub alert: String,
    /// Operator commands; falls back to `alert` when unset
    pub command: Option<String>,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            detections: "nutricycle/detections".to_string(),
            alert: "nutricycle/esp32".to_string(),
            command: None,
        }
    }
}

impl TopicConfig {
    pub fn command_topic(&self) -> &str {
        self.command.as_deref().unwrap_or(&self.alert)
    }
}

/// MQTT broker connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker host; no broker is used when unset
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Publish QoS (0, 1 or 2)
    pub qos: u8,
    pub keep_alive_secs: u64,
    /// How long startup waits for the first ConnAck
    pub connect_timeout_ms: u64,
    pub topics: TopicConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 1883,
            username: None,
            password: None,
            qos: 1,
            keep_alive_secs: 30,
            connect_timeout_ms: 5_000,
            topics: TopicConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.qos > 2 {
            return Err("MQTT QoS must be 0, 1 or 2".to_string());
        }
        if self.port == 0 {
            return Err("MQTT port must be non-zero".to_string());
        }
        if self.keep_alive_secs == 0 {
            return Err("Keep-alive must be greater than 0".to_string());
        }
        if self.password.is_some() && self.username.is_none() {
            return Err("MQTT password given without a username".to_string());
        }
        for topic in [&self.topics.detections, &self.topics.alert] {
            if topic.is_empty() || topic.contains('#') || topic.contains('+') {
                return Err(format!("Invalid publish topic: '{}'", topic));
            }
        }
        Ok(())
    }
}

/// Periodic self-registration with the discovery service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnnounceConfig {
    /// Discovery endpoint receiving the POST; announcing is off when unset
    pub server: Option<String>,
    pub interval_secs: u64,
    /// Externally reachable video URL; discovered from the tunnel API when unset
    pub public_url: Option<String>,
    pub tunnel_api: String,
    pub discovery_timeout_ms: u64,
    pub post_timeout_ms: u64,
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self {
            server: None,
            interval_secs: 60,
            public_url: None,
            tunnel_api: "http://127.0.0.1:4040/api/tunnels".to_string(),
            discovery_timeout_ms: 2_000,
            post_timeout_ms: 5_000,
        }
    }
}

impl AnnounceConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_secs == 0 {
            return Err("Announce interval must be greater than 0".to_string());
        }
        if let Some(server) = &self.server {
            if !(server.starts_with("http://") || server.starts_with("https://")) {
                return Err(format!("Announce server must be an http(s) URL: {}", server));
            }
        }
        if self.discovery_timeout_ms == 0 || self.post_timeout_ms == 0 {
            return Err("Announce timeouts must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Command endpoint access control
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    /// Shared secret expected as `Authorization: Bearer <token>`
    pub token: Option<String>,
}

impl ControlConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if let Some(token) = &self.token {
            if token.trim().is_empty() {
                return Err("Control token must not be blank".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let broker = BrokerConfig::default();
        assert!(broker.host.is_none());
        assert_eq!(broker.port, 1883);
        assert_eq!(broker.qos, 1);
        assert_eq!(broker.topics.detections, "nutricycle/detections");
        assert_eq!(broker.topics.alert, "nutricycle/esp32");
        assert_eq!(broker.topics.command_topic(), "nutricycle/esp32");
        assert!(broker.validate().is_ok());

        let announce = AnnounceConfig::default();
        assert_eq!(announce.interval_secs, 60);
        assert_eq!(announce.tunnel_api, "http://127.0.0.1:4040/api/tunnels");
        assert!(announce.validate().is_ok());

        assert!(ControlConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_qos() {
        let mut config = BrokerConfig::default();
        config.qos = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_wildcard_topic() {
        let mut config = BrokerConfig::default();
        config.topics.detections = "nutricycle/#".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_password_without_user() {
        let mut config = BrokerConfig::default();
        config.password = Some("secret".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_announce() {
        let mut config = AnnounceConfig::default();
        config.interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AnnounceConfig::default();
        config.server = Some("ftp://central".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_blank_token() {
        let config = ControlConfig {
            token: Some("  ".to_string()),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_command_topic_override() {
        let topics = TopicConfig {
            command: Some("nutricycle/cmd".to_string()),
            ..TopicConfig::default()
        };
        assert_eq!(topics.command_topic(), "nutricycle/cmd");
    }
}
