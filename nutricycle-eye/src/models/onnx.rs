//! ONNX Runtime engine for YOLOv8-style exports

use crate::error::VisionError;
use crate::models::engine::InferenceEngine;
use crate::processing::decoder::{RawTensor, TensorLayout};
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info};

/// Session loaded once at startup. Output is `[1, 4 + C, N]`.
pub struct OnnxEngine {
    session: Mutex<Session>,
    input_size: u32,
}

impl OnnxEngine {
    pub fn load(model_path: &Path, input_size: u32) -> Result<Self, VisionError> {
        if !model_path.is_file() {
            return Err(VisionError::Model(format!(
                "Model file not found: {}",
                model_path.display()
            )));
        }

        let session = Session::builder()
            .and_then(|builder| builder.commit_from_file(model_path))
            .map_err(|e| VisionError::Model(format!("Failed to load ONNX model: {}", e)))?;

        info!("ONNX model loaded from {:?} ({}x{})", model_path, input_size, input_size);

        Ok(Self {
            session: Mutex::new(session),
            input_size,
        })
    }
}

impl InferenceEngine for OnnxEngine {
    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn forward(&self, input: &[f32]) -> Result<RawTensor, VisionError> {
        let size = self.input_size as usize;
        let tensor = Tensor::from_array(([1usize, 3, size, size], input.to_vec()))?;

        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![tensor])?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        debug!("ONNX output shape: {:?}", shape);

        if shape.len() != 3 {
            return Err(VisionError::Ort(format!(
                "Expected a rank-3 output, got {:?}",
                shape
            )));
        }
        let channels = shape[1] as usize;
        let proposals = shape[2] as usize;
        RawTensor::new(data.to_vec(), proposals, channels, TensorLayout::ChannelMajor)
    }
}
