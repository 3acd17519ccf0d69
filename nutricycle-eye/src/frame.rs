//! Captured frames and orientation transforms

use chrono::{DateTime, Utc};
use image::{imageops, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Immutable RGB snapshot. The pixel buffer is shared, never mutated.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: Arc<RgbImage>,
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image: Arc::new(image),
            sequence,
            captured_at: Utc::now(),
        }
    }

    /// Black frame used to keep the output alive when a live read fails.
    pub fn blank(width: u32, height: u32, sequence: u64) -> Self {
        Self::new(RgbImage::from_pixel(width, height, Rgb([0, 0, 0])), sequence)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlipMode {
    #[default]
    #[serde(rename = "none")]
    None,
    /// Upside-down
    #[serde(rename = "vertical")]
    Vertical,
    /// Mirror
    #[serde(rename = "horizontal")]
    Horizontal,
    #[serde(rename = "180")]
    Rotate180,
}

impl FlipMode {
    pub fn apply(&self, image: RgbImage) -> RgbImage {
        match self {
            FlipMode::None => image,
            FlipMode::Vertical => imageops::flip_vertical(&image),
            FlipMode::Horizontal => imageops::flip_horizontal(&image),
            FlipMode::Rotate180 => imageops::rotate180(&image),
        }
    }
}

impl FromStr for FlipMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(FlipMode::None),
            "vertical" => Ok(FlipMode::Vertical),
            "horizontal" => Ok(FlipMode::Horizontal),
            "180" => Ok(FlipMode::Rotate180),
            other => Err(format!(
                "Unknown flip mode '{}' (expected none, vertical, horizontal or 180)",
                other
            )),
        }
    }
}
