//! nutricycle-eye: vision side of the NutriCycle detection node
//!
//! Captures frames from a camera, video file or image directory, runs them
//! through a detector backend (external binary or in-process engine), draws
//! the results, and turns non-empty results into detection events.

pub mod camera;
pub mod config;
pub mod error;
pub mod frame;
pub mod models;
pub mod processing;
pub mod producer;

pub use camera::{CaptureDevice, Captured, FrameSource, ImageSequenceDevice, SourceSpec};
pub use config::{BackendKind, VisionConfig};
pub use error::VisionError;
pub use frame::{FlipMode, Frame};
pub use models::{create_backend, DetectorBackend, ExternalBinaryBackend, ModelFiles};
pub use producer::{
    AnnotatedFrame, FrameSink, ProducerConfig, ProducerReport, ProducerSnapshot, ProducerStats,
    StopReason, StreamProducer,
};
