//! Detection events and their broker wire format

use crate::detection::Detection;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Seconds since the Unix epoch as a float, the timestamp format every
/// outbound message uses.
pub fn unix_seconds(ts: &DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}

/// Summary of one pipeline pass that produced at least one detection.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    pub timestamp: DateTime<Utc>,
    pub frame_id: u64,
    pub width: u32,
    pub height: u32,
    pub detections: Vec<Detection>,
    pub machine_id: Option<String>,
}

impl DetectionEvent {
    /// Returns `None` for an empty detection list: empty passes never become events.
    pub fn from_pass(
        frame_id: u64,
        width: u32,
        height: u32,
        detections: Vec<Detection>,
        machine_id: Option<String>,
    ) -> Option<Self> {
        if detections.is_empty() {
            return None;
        }
        Some(Self {
            timestamp: Utc::now(),
            frame_id,
            width,
            height,
            detections,
            machine_id,
        })
    }

    pub fn to_message(&self) -> EventMessage<'_> {
        EventMessage {
            timestamp: unix_seconds(&self.timestamp),
            frame_id: self.frame_id,
            width: self.width,
            height: self.height,
            detections: self
                .detections
                .iter()
                .map(|d| DetectionRecord {
                    cls: d.class_id,
                    name: &d.class_name,
                    conf: d.confidence,
                    xyxy: [d.bbox.to_xyxy()],
                })
                .collect(),
            machine_id: self.machine_id.as_deref(),
        }
    }

    /// Full event payload for the detections topic.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_message())?)
    }

    /// Compact payload for the actuator alert topic.
    pub fn alert_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&AlertMessage {
            machine_id: self.machine_id.as_deref(),
            alert: true,
        })?)
    }
}

#[derive(Debug, Serialize)]
pub struct EventMessage<'a> {
    pub timestamp: f64,
    pub frame_id: u64,
    pub width: u32,
    pub height: u32,
    pub detections: Vec<DetectionRecord<'a>>,
    pub machine_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct DetectionRecord<'a> {
    pub cls: usize,
    pub name: &'a str,
    pub conf: f32,
    pub xyxy: [[f32; 4]; 1],
}

#[derive(Debug, Serialize)]
pub struct AlertMessage<'a> {
    pub machine_id: Option<&'a str>,
    pub alert: bool,
}
