//! Validation and forwarding of operator commands

use crate::broker::Broker;
use bytes::Bytes;
use nutricycle_core::{CommandKind, ControlCommand, ControlRequest};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Caller-visible reasons a command was not forwarded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Invalid JSON payload: {0}")]
    BadPayload(String),

    #[error("Missing Authorization")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Machine ID mismatch")]
    WrongDevice,

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("MQTT client not connected")]
    BrokerUnavailable,

    #[error("MQTT publish failed: {0}")]
    PublishFailed(String),
}

impl CommandError {
    /// HTTP status reported to the caller
    pub fn status_code(&self) -> u16 {
        match self {
            CommandError::BadPayload(_) => 400,
            CommandError::Unauthorized => 401,
            CommandError::Forbidden => 403,
            CommandError::WrongDevice => 404,
            CommandError::InvalidCommand(_) => 400,
            CommandError::BrokerUnavailable => 503,
            CommandError::PublishFailed(_) => 500,
        }
    }
}

/// Extract the token from an `Authorization: Bearer <token>` value.
/// The scheme is matched case-insensitively and the token is trimmed.
pub fn bearer_token(header: &str) -> Option<&str> {
    let scheme = header.get(..7)?;
    if !scheme.eq_ignore_ascii_case("bearer ") {
        return None;
    }
    let token = header.get(7..)?.trim();
    if token.is_empty() || token.chars().any(|c| c.is_control()) {
        return None;
    }
    Some(token)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Stateless command handler bound to this node's identity.
pub struct CommandChannel {
    machine_id: Option<String>,
    token: Option<String>,
    broker: Option<Arc<dyn Broker>>,
    topic: String,
}

impl CommandChannel {
    pub fn new(
        machine_id: Option<String>,
        token: Option<String>,
        broker: Option<Arc<dyn Broker>>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            machine_id,
            token,
            broker,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Check payload, target device, bearer token and command, in that order.
    pub fn validate(
        &self,
        body: &[u8],
        authorization: Option<&str>,
    ) -> Result<ControlCommand, CommandError> {
        let request: ControlRequest =
            serde_json::from_slice(body).map_err(|e| CommandError::BadPayload(e.to_string()))?;

        let machine_id = match (&self.machine_id, &request.machine_id) {
            (Some(ours), Some(theirs)) if ours == theirs => ours.clone(),
            _ => return Err(CommandError::WrongDevice),
        };

        if let Some(expected) = &self.token {
            let header = authorization.ok_or(CommandError::Unauthorized)?;
            let token = bearer_token(header).ok_or(CommandError::Unauthorized)?;
            if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
                return Err(CommandError::Forbidden);
            }
        }

        let raw = request.command.unwrap_or_default();
        let command = raw
            .parse::<CommandKind>()
            .map_err(|_| CommandError::InvalidCommand(raw.clone()))?;

        Ok(ControlCommand::new(machine_id, command))
    }

    /// Validate and forward to the actuator topic.
    pub async fn handle(
        &self,
        body: &[u8],
        authorization: Option<&str>,
    ) -> Result<ControlCommand, CommandError> {
        let command = match self.validate(body, authorization) {
            Ok(command) => command,
            Err(e) => {
                warn!("Rejected control request: {}", e);
                return Err(e);
            }
        };

        let broker = match &self.broker {
            Some(broker) if broker.is_connected() => broker,
            _ => {
                warn!("MQTT client not connected, dropping '{}' command", command.command);
                return Err(CommandError::BrokerUnavailable);
            }
        };

        let payload = command
            .to_json()
            .map_err(|e| CommandError::PublishFailed(e.to_string()))?;
        if let Err(e) = broker.publish(&self.topic, Bytes::from(payload)).await {
            error!("MQTT publish failed: {}", e);
            return Err(CommandError::PublishFailed(e.to_string()));
        }

        info!("Forwarded control '{}' via MQTT on topic {}", command.command, self.topic);
        Ok(command)
    }
}
