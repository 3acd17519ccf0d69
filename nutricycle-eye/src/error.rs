//! Error types for nutricycle-eye

use nutricycle_core::Error as CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Backend failure: {0}")]
    Backend(String),

    #[error("Backend timed out after {0} ms")]
    Timeout(u64),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ONNX Runtime error: {0}")]
    Ort(String),

    #[error("OpenCV error: {0}")]
    OpenCv(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl VisionError {
    /// Errors that must abort startup rather than degrade a single frame.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VisionError::SourceUnavailable(_) | VisionError::Model(_) | VisionError::Config(_)
        )
    }
}

impl From<VisionError> for CoreError {
    fn from(err: VisionError) -> Self {
        CoreError::Vision(err.to_string())
    }
}

#[cfg(feature = "camera")]
impl From<opencv::Error> for VisionError {
    fn from(err: opencv::Error) -> Self {
        VisionError::OpenCv(err.message)
    }
}

#[cfg(feature = "onnx")]
impl From<ort::Error> for VisionError {
    fn from(err: ort::Error) -> Self {
        VisionError::Ort(err.to_string())
    }
}
