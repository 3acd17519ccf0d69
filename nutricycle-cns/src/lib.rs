//! nutricycle-cns: messaging side of the NutriCycle node
//!
//! Provides:
//! - MQTT broker connection with background reconnect
//! - Event broadcaster draining the detection queue onto the broker
//! - Authenticated command channel forwarding operator commands
//! - Periodic announce of the public video URL to a discovery server

pub mod error;
pub mod config;
pub mod broker;
pub mod broadcaster;
pub mod command;
pub mod announce;

pub use error::CnsError;
pub use config::{AnnounceConfig, BrokerConfig, ControlConfig, TopicConfig};
pub use broker::{client_id, qos_from_level, Broker, MqttBroker};
pub use broadcaster::{BroadcastSnapshot, BroadcastStats, EventBroadcaster};
pub use command::{bearer_token, CommandChannel, CommandError};
pub use announce::{AnnounceLoop, AnnounceOutcome};
