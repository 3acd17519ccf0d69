//! Operator commands accepted over the control endpoint

use crate::event::unix_seconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Closed set of actuator commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Start,
    Stop,
    Pause,
    Reset,
}

impl CommandKind {
    pub const ALL: [CommandKind; 4] = [
        CommandKind::Start,
        CommandKind::Stop,
        CommandKind::Pause,
        CommandKind::Reset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Start => "start",
            CommandKind::Stop => "stop",
            CommandKind::Pause => "pause",
            CommandKind::Reset => "reset",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = String;

    /// Exact lowercase match only.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(CommandKind::Start),
            "stop" => Ok(CommandKind::Stop),
            "pause" => Ok(CommandKind::Pause),
            "reset" => Ok(CommandKind::Reset),
            other => Err(format!("unsupported command: {}", other)),
        }
    }
}

/// Request body as received. Fields stay loose so that validation can report
/// a specific reason instead of a generic parse failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlRequest {
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
}

/// A validated command, ready to forward to the actuator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlCommand {
    pub machine_id: String,
    pub command: CommandKind,
    #[serde(rename = "timestamp", serialize_with = "serialize_unix_seconds")]
    pub issued_at: DateTime<Utc>,
}

impl ControlCommand {
    pub fn new(machine_id: impl Into<String>, command: CommandKind) -> Self {
        Self {
            machine_id: machine_id.into(),
            command,
            issued_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn serialize_unix_seconds<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(unix_seconds(ts))
}
