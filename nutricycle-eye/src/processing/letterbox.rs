//! Aspect-preserving resize onto a square model canvas

use image::{imageops, Rgb, RgbImage};
use nutricycle_core::BoundingBox;

/// Canvas fill value for the padded area, per channel.
pub const PAD_VALUE: u8 = 114;

/// Geometry of one letterbox transform, computed per frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: u32,
    pub pad_y: u32,
    pub resized_w: u32,
    pub resized_h: u32,
    pub target_size: u32,
}

impl Letterbox {
    pub fn compute(width: u32, height: u32, target_size: u32) -> Self {
        let scale = (target_size as f32 / width.max(1) as f32)
            .min(target_size as f32 / height.max(1) as f32);
        let resized_w = ((width as f32 * scale).round() as u32).clamp(1, target_size);
        let resized_h = ((height as f32 * scale).round() as u32).clamp(1, target_size);

        Self {
            scale,
            pad_x: (target_size - resized_w) / 2,
            pad_y: (target_size - resized_h) / 2,
            resized_w,
            resized_h,
            target_size,
        }
    }

    /// Resize `image` and center it on a gray `target_size` square.
    pub fn apply(&self, image: &RgbImage) -> RgbImage {
        let resized = imageops::resize(
            image,
            self.resized_w,
            self.resized_h,
            imageops::FilterType::Triangle,
        );
        let mut canvas = RgbImage::from_pixel(
            self.target_size,
            self.target_size,
            Rgb([PAD_VALUE, PAD_VALUE, PAD_VALUE]),
        );
        imageops::replace(&mut canvas, &resized, self.pad_x as i64, self.pad_y as i64);
        canvas
    }

    /// Map a center-form box from model input space to original-frame pixels.
    pub fn to_original(&self, cx: f32, cy: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox::new(
            (cx - self.pad_x as f32) / self.scale,
            (cy - self.pad_y as f32) / self.scale,
            w / self.scale,
            h / self.scale,
        )
    }

    pub fn to_model(&self, bbox: &BoundingBox) -> (f32, f32, f32, f32) {
        (
            bbox.cx * self.scale + self.pad_x as f32,
            bbox.cy * self.scale + self.pad_y as f32,
            bbox.w * self.scale,
            bbox.h * self.scale,
        )
    }
}
