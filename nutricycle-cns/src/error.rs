//! Error types for nutricycle-cns

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CnsError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Broker not connected")]
    NotConnected,

    #[error("Announce error: {0}")]
    Announce(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<nutricycle_core::Error> for CnsError {
    fn from(err: nutricycle_core::Error) -> Self {
        CnsError::Serialization(format!("Core error: {}", err))
    }
}

impl From<CnsError> for nutricycle_core::Error {
    fn from(err: CnsError) -> Self {
        nutricycle_core::Error::Messaging(err.to_string())
    }
}

impl From<reqwest::Error> for CnsError {
    fn from(err: reqwest::Error) -> Self {
        CnsError::Announce(err.to_string())
    }
}

impl From<rumqttc::ClientError> for CnsError {
    fn from(err: rumqttc::ClientError) -> Self {
        CnsError::Publish(err.to_string())
    }
}
