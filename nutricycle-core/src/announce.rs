use crate::event::unix_seconds;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Self-registration message posted to the discovery service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnouncePayload {
    pub machine_id: String,
    pub video_url: String,
    pub timestamp: f64,
}

impl AnnouncePayload {
    pub fn now(machine_id: impl Into<String>, video_url: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            video_url: video_url.into(),
            timestamp: unix_seconds(&Utc::now()),
        }
    }
}
