//! Out-of-process detector: one executable run per frame
//!
//! The executable is called as `<binary> <param> <weights> <image> <threshold>`
//! and prints `{"detections": [{"x","y","w","h","conf","cls"}, ...]}` with
//! center-form boxes in input-image pixels.

use crate::error::VisionError;
use crate::frame::Frame;
use crate::models::{DetectorBackend, ModelFiles};
use async_trait::async_trait;
use image::ImageFormat;
use nutricycle_core::{BoundingBox, ClassTable, Detection};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct BinaryOutput {
    #[serde(default)]
    detections: Vec<BinaryDetection>,
}

#[derive(Debug, Deserialize)]
struct BinaryDetection {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    conf: f32,
    cls: usize,
}

pub struct ExternalBinaryBackend {
    binary: PathBuf,
    files: ModelFiles,
    timeout: Duration,
    classes: ClassTable,
}

impl ExternalBinaryBackend {
    /// Fails if the executable or either model file is missing.
    pub fn new(
        binary: &Path,
        files: ModelFiles,
        timeout: Duration,
        classes: ClassTable,
    ) -> Result<Self, VisionError> {
        if !binary.is_file() {
            return Err(VisionError::Model(format!(
                "Detector binary not found: {}",
                binary.display()
            )));
        }
        files.check()?;

        info!(
            "Binary detector ready: {} (model {})",
            binary.display(),
            files.param.display()
        );

        Ok(Self {
            binary: binary.to_path_buf(),
            files,
            timeout,
            classes,
        })
    }

    async fn write_temp_image(&self, frame: &Frame) -> Result<tempfile::NamedTempFile, VisionError> {
        let image = frame.image.clone();
        tokio::task::spawn_blocking(move || -> Result<tempfile::NamedTempFile, VisionError> {
            let file = tempfile::Builder::new()
                .prefix("nutricycle-")
                .suffix(".jpg")
                .tempfile()?;
            image.save_with_format(file.path(), ImageFormat::Jpeg)?;
            Ok(file)
        })
        .await
        .map_err(|e| VisionError::Processing(format!("Image write task failed: {}", e)))?
    }
}

/// Parse detector stdout, keeping only detections that reach `threshold`.
pub fn parse_output(
    stdout: &[u8],
    threshold: f32,
    classes: &ClassTable,
) -> Result<Vec<Detection>, VisionError> {
    let parsed: BinaryOutput = serde_json::from_slice(stdout).map_err(|e| {
        VisionError::Backend(format!(
            "Unparsable detector output ({}): {}",
            e,
            String::from_utf8_lossy(stdout).chars().take(200).collect::<String>()
        ))
    })?;

    Ok(parsed
        .detections
        .into_iter()
        .filter(|d| d.conf >= threshold)
        .map(|d| Detection::new(d.cls, d.conf, BoundingBox::new(d.x, d.y, d.w, d.h), classes))
        .collect())
}

#[async_trait]
impl DetectorBackend for ExternalBinaryBackend {
    async fn infer(&self, frame: &Frame, threshold: f32) -> Result<Vec<Detection>, VisionError> {
        let image_file = self.write_temp_image(frame).await?;

        let mut command = Command::new(&self.binary);
        command
            .arg(&self.files.param)
            .arg(&self.files.weights)
            .arg(image_file.path())
            .arg(threshold.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result?,
            Err(_) => return Err(VisionError::Timeout(self.timeout.as_millis() as u64)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VisionError::Backend(format!(
                "Detector exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let detections = parse_output(&output.stdout, threshold, &self.classes)?;
        debug!("Frame {}: {} detections", frame.sequence, detections.len());
        Ok(detections)
    }

    fn name(&self) -> &str {
        "binary"
    }
}
