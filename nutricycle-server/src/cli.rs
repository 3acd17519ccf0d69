//! Command-line flags; they override config file and environment

use crate::config::NodeConfig;
use clap::Parser;
use nutricycle_eye::{BackendKind, FlipMode};
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(name = "nutricycle-server", version, about = "NutriCycle foreign-object detection node")]
pub struct Cli {
    /// Config file (TOML, JSON or YAML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Model base path (.param/.bin) or .onnx file
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Detector backend: binary or onnx
    #[arg(long)]
    pub backend: Option<BackendKind>,

    /// Detector executable for the binary backend
    #[arg(long)]
    pub detector_binary: Option<PathBuf>,

    /// Camera index, video file or image directory
    #[arg(long)]
    pub source: Option<String>,

    /// Confidence threshold
    #[arg(long)]
    pub conf: Option<f32>,

    /// Orientation fix: none, vertical, horizontal or 180
    #[arg(long)]
    pub flip: Option<FlipMode>,

    /// Model input size in pixels
    #[arg(long)]
    pub target_size: Option<u32>,

    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    /// Discovery endpoint that receives announce POSTs
    #[arg(long)]
    pub announce_server: Option<String>,

    #[arg(long)]
    pub machine_id: Option<String>,

    /// Seconds between announces
    #[arg(long)]
    pub announce_interval: Option<u64>,

    /// Public video URL; discovered from the tunnel API when omitted
    #[arg(long)]
    pub public_url: Option<String>,

    #[arg(long)]
    pub mqtt_broker: Option<String>,

    #[arg(long)]
    pub mqtt_port: Option<u16>,

    /// Topic for full detection events
    #[arg(long)]
    pub mqtt_topic: Option<String>,

    /// Topic for actuator alerts and commands
    #[arg(long)]
    pub mqtt_esp_topic: Option<String>,

    #[arg(long)]
    pub mqtt_username: Option<String>,

    #[arg(long)]
    pub mqtt_password: Option<String>,

    #[arg(long)]
    pub mqtt_qos: Option<u8>,

    /// Bearer token required on /control
    #[arg(long)]
    pub control_token: Option<String>,

    #[arg(long)]
    pub queue_capacity: Option<usize>,

    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    /// Overlay every flag that was given.
    pub fn apply(&self, config: &mut NodeConfig) {
        if let Some(v) = &self.model {
            config.vision.model_path = v.clone();
        }
        if let Some(v) = self.backend {
            config.vision.backend = v;
        }
        if let Some(v) = &self.detector_binary {
            config.vision.detector_binary = v.clone();
        }
        if let Some(v) = &self.source {
            config.vision.source = v.clone();
        }
        if let Some(v) = self.conf {
            config.vision.confidence_threshold = v;
        }
        if let Some(v) = self.flip {
            config.vision.flip = v;
        }
        if let Some(v) = self.target_size {
            config.vision.target_size = v;
        }
        if let Some(v) = &self.host {
            config.http.host = v.clone();
        }
        if let Some(v) = self.port {
            config.http.port = v;
        }
        if let Some(v) = &self.announce_server {
            config.announce.server = Some(v.clone());
        }
        if let Some(v) = &self.machine_id {
            config.machine_id = Some(v.clone());
        }
        if let Some(v) = self.announce_interval {
            config.announce.interval_secs = v;
        }
        if let Some(v) = &self.public_url {
            config.announce.public_url = Some(v.clone());
        }
        if let Some(v) = &self.mqtt_broker {
            config.broker.host = Some(v.clone());
        }
        if let Some(v) = self.mqtt_port {
            config.broker.port = v;
        }
        if let Some(v) = &self.mqtt_topic {
            config.broker.topics.detections = v.clone();
        }
        if let Some(v) = &self.mqtt_esp_topic {
            config.broker.topics.alert = v.clone();
        }
        if let Some(v) = &self.mqtt_username {
            config.broker.username = Some(v.clone());
        }
        if let Some(v) = &self.mqtt_password {
            config.broker.password = Some(v.clone());
        }
        if let Some(v) = self.mqtt_qos {
            config.broker.qos = v;
        }
        if let Some(v) = &self.control_token {
            config.control.token = Some(v.clone());
        }
        if let Some(v) = self.queue_capacity {
            config.queue_capacity = v;
        }
        if let Some(v) = &self.log_level {
            config.log_level = v.clone();
        }
    }

    /// defaults -> file -> environment -> flags
    pub fn load_config(&self) -> Result<NodeConfig, crate::config::ConfigError> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_file(path)?,
            None => NodeConfig::default(),
        };
        config.apply_env()?;
        self.apply(&mut config);
        config
            .validate()
            .map_err(crate::config::ConfigError::Invalid)?;
        Ok(config)
    }
}
