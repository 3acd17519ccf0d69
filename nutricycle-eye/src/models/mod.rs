//! Detector backends

pub mod binary;
pub mod engine;
#[cfg(feature = "onnx")]
pub mod onnx;

use crate::config::{BackendKind, VisionConfig};
use crate::error::VisionError;
use crate::frame::Frame;
use async_trait::async_trait;
use nutricycle_core::{ClassTable, Detection};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub use binary::ExternalBinaryBackend;
pub use engine::{InProcessBackend, InferenceEngine};

/// Produces detections for one frame. Implementations must not modify the
/// frame and must only return detections at or above `threshold`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DetectorBackend: Send + Sync {
    async fn infer(&self, frame: &Frame, threshold: f32) -> Result<Vec<Detection>, VisionError>;

    /// Get backend name
    fn name(&self) -> &str;
}

/// Run inference, logging a failure and degrading it to no detections.
pub async fn infer_or_empty(
    backend: &dyn DetectorBackend,
    frame: &Frame,
    threshold: f32,
) -> Vec<Detection> {
    match backend.infer(frame, threshold).await {
        Ok(detections) => detections,
        Err(e) => {
            warn!("{} backend failure on frame {}: {}", backend.name(), frame.sequence, e);
            Vec::new()
        }
    }
}

/// Param/weights pair of an NCNN-style model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub param: PathBuf,
    pub weights: PathBuf,
}

impl ModelFiles {
    /// Accepts `model`, `model.param` or `model.bin` and derives both files.
    pub fn from_base(path: &Path) -> Self {
        let base = match path.extension().and_then(|e| e.to_str()) {
            Some("param") | Some("bin") => path.with_extension(""),
            _ => path.to_path_buf(),
        };
        Self {
            param: append_extension(&base, "param"),
            weights: append_extension(&base, "bin"),
        }
    }

    pub fn check(&self) -> Result<(), VisionError> {
        for file in [&self.param, &self.weights] {
            if !file.is_file() {
                return Err(VisionError::Model(format!(
                    "Model file not found: {}",
                    file.display()
                )));
            }
        }
        Ok(())
    }
}

fn append_extension(base: &Path, ext: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Build the configured backend. Missing model files are fatal.
pub fn create_backend(
    config: &VisionConfig,
    classes: ClassTable,
) -> Result<Arc<dyn DetectorBackend>, VisionError> {
    match config.backend {
        BackendKind::Binary => {
            let backend = ExternalBinaryBackend::new(
                &config.detector_binary,
                ModelFiles::from_base(&config.model_path),
                Duration::from_millis(config.backend_timeout_ms),
                classes,
            )?;
            Ok(Arc::new(backend))
        }
        #[cfg(feature = "onnx")]
        BackendKind::Onnx => {
            let engine = onnx::OnnxEngine::load(&config.model_path, config.target_size)?;
            Ok(Arc::new(InProcessBackend::new(engine, classes)))
        }
        #[cfg(not(feature = "onnx"))]
        BackendKind::Onnx => Err(VisionError::Model(
            "ONNX backend needs the `onnx` feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_files_from_base() {
        let expected = ModelFiles {
            param: PathBuf::from("models/best.param"),
            weights: PathBuf::from("models/best.bin"),
        };
        assert_eq!(ModelFiles::from_base(Path::new("models/best")), expected);
        assert_eq!(ModelFiles::from_base(Path::new("models/best.param")), expected);
        assert_eq!(ModelFiles::from_base(Path::new("models/best.bin")), expected);
    }

    #[test]
    fn test_model_files_keep_dotted_base() {
        let files = ModelFiles::from_base(Path::new("models/yolov8n-int8"));
        assert_eq!(files.param, PathBuf::from("models/yolov8n-int8.param"));

        let files = ModelFiles::from_base(Path::new("models/v1.2"));
        assert_eq!(files.weights, PathBuf::from("models/v1.2.bin"));
    }

    #[test]
    fn test_missing_model_files_are_fatal() {
        let files = ModelFiles::from_base(Path::new("/nonexistent/model"));
        match files.check() {
            Err(err) => assert!(err.is_fatal()),
            Ok(()) => panic!("Expected Model error"),
        }
    }

    #[tokio::test]
    async fn test_infer_or_empty_swallows_failure() {
        let mut backend = MockDetectorBackend::new();
        backend
            .expect_infer()
            .returning(|_, _| Err(VisionError::Timeout(5_000)));
        backend.expect_name().return_const("mock".to_string());

        let frame = Frame::blank(4, 4, 0);
        assert!(infer_or_empty(&backend, &frame, 0.5).await.is_empty());
    }
}
