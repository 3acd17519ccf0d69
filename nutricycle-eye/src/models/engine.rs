//! In-process inference: letterbox, forward pass, decode

use crate::error::VisionError;
use crate::frame::Frame;
use crate::models::DetectorBackend;
use crate::processing::decoder::{decode, RawTensor};
use crate::processing::letterbox::Letterbox;
use async_trait::async_trait;
use image::RgbImage;
use nutricycle_core::{ClassTable, Detection};
use std::sync::Arc;

/// A loaded model with a fixed square input. `forward` is blocking and
/// receives a `[1, 3, S, S]` RGB tensor scaled to 0..1.
pub trait InferenceEngine: Send + Sync + 'static {
    fn input_size(&self) -> u32;

    fn forward(&self, input: &[f32]) -> Result<RawTensor, VisionError>;
}

/// Planar RGB, normalized to 0..1.
pub fn to_chw_tensor(image: &RgbImage) -> Vec<f32> {
    let (w, h) = image.dimensions();
    let plane = (w * h) as usize;
    let mut tensor = vec![0.0f32; plane * 3];
    for (i, pixel) in image.pixels().enumerate() {
        for c in 0..3 {
            tensor[c * plane + i] = pixel.0[c] as f32 / 255.0;
        }
    }
    tensor
}

pub struct InProcessBackend<E: InferenceEngine> {
    engine: Arc<E>,
    classes: ClassTable,
}

impl<E: InferenceEngine> InProcessBackend<E> {
    pub fn new(engine: E, classes: ClassTable) -> Self {
        Self {
            engine: Arc::new(engine),
            classes,
        }
    }
}

#[async_trait]
impl<E: InferenceEngine> DetectorBackend for InProcessBackend<E> {
    async fn infer(&self, frame: &Frame, threshold: f32) -> Result<Vec<Detection>, VisionError> {
        let engine = self.engine.clone();
        let classes = self.classes.clone();
        let image = frame.image.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<Detection>, VisionError> {
            let (w, h) = image.dimensions();
            let letterbox = Letterbox::compute(w, h, engine.input_size());
            let input = to_chw_tensor(&letterbox.apply(&image));
            let raw = engine.forward(&input)?;
            Ok(decode(&raw, threshold, &letterbox, &classes))
        })
        .await
        .map_err(|e| VisionError::Processing(format!("Inference task failed: {}", e)))?
    }

    fn name(&self) -> &str {
        "in-process"
    }
}
