//! Configuration for nutricycle-eye

use crate::frame::FlipMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which detector backend drives inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// External detector executable, one process per frame
    Binary,
    /// ONNX Runtime session loaded once at startup
    Onnx,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" | "ncnn" => Ok(BackendKind::Binary),
            "onnx" => Ok(BackendKind::Onnx),
            other => Err(format!("Unknown backend: {}", other)),
        }
    }
}

/// Vision pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Camera index ("0") or path to a video file / image directory
    pub source: String,
    /// Orientation fix applied to every captured frame
    pub flip: FlipMode,
    /// Requested capture resolution (width, height)
    pub resolution: (u32, u32),
    /// Nominal frame rate used for pacing
    pub frame_rate: u32,
    pub backend: BackendKind,
    /// Model base path (binary backend) or `.onnx` file
    pub model_path: PathBuf,
    /// Detector executable for the binary backend
    pub detector_binary: PathBuf,
    /// Minimum class score for a detection to be reported
    pub confidence_threshold: f32,
    /// Square model input edge in pixels
    pub target_size: u32,
    /// Hard limit for one out-of-process inference
    pub backend_timeout_ms: u64,
    /// Class id -> label, index is the id
    pub class_names: Vec<String>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            source: "0".to_string(),
            flip: FlipMode::None,
            resolution: (640, 480),
            frame_rate: 30,
            backend: BackendKind::Binary,
            model_path: PathBuf::from("models/best"),
            detector_binary: PathBuf::from("ncnn/bin/yolo_ncnn"),
            confidence_threshold: 0.5,
            target_size: 320,
            backend_timeout_ms: 5_000,
            class_names: vec!["foreign_object".to_string()],
        }
    }
}

impl VisionConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.source.trim().is_empty() {
            return Err("Source must not be empty".to_string());
        }

        if self.frame_rate == 0 || self.frame_rate > 120 {
            return Err("Frame rate must be between 1 and 120".to_string());
        }

        if self.resolution.0 == 0 || self.resolution.1 == 0 {
            return Err("Resolution must be non-zero".to_string());
        }

        if self.resolution.0 > 7680 || self.resolution.1 > 4320 {
            return Err("Resolution too large (max 8K)".to_string());
        }

        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err("Confidence threshold must be between 0 and 1".to_string());
        }

        if self.target_size < 32 || self.target_size > 2048 {
            return Err("Target size must be between 32 and 2048".to_string());
        }

        if self.backend_timeout_ms == 0 {
            return Err("Backend timeout must be non-zero".to_string());
        }

        Ok(())
    }
}
