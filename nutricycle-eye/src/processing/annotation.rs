//! Box, label and FPS overlays drawn onto a copy of the frame

use crate::frame::Frame;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use nutricycle_core::Detection;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_TEXT: Rgb<u8> = Rgb([0, 0, 0]);
const INFO_BG: Rgb<u8> = Rgb([0, 0, 0]);
const GLYPH_W: i32 = 5;
const GLYPH_H: i32 = 7;
const ADVANCE: i32 = 6;

/// Readout drawn in the top-left corner.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OverlayStats {
    pub fps: f32,
    pub inference_ms: u64,
}

impl OverlayStats {
    pub fn text(&self) -> String {
        format!("FPS: {:.1} | Inference: {}ms", self.fps, self.inference_ms)
    }
}

pub fn label_text(detection: &Detection) -> String {
    format!("{} {:.2}", detection.class_name, detection.confidence)
}

/// Draw detections and the stats readout. The frame itself is left untouched.
pub fn annotate(frame: &Frame, detections: &[Detection], stats: &OverlayStats) -> RgbImage {
    let mut canvas = frame.image.as_ref().clone();
    let (width, height) = canvas.dimensions();
    if width == 0 || height == 0 {
        return canvas;
    }
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;

    for det in detections {
        let [x1, y1, x2, y2] = det.bbox.to_xyxy();
        let left = x1.clamp(0.0, max_x).round() as i32;
        let top = y1.clamp(0.0, max_y).round() as i32;
        let right = x2.clamp(0.0, max_x).round() as i32;
        let bottom = y2.clamp(0.0, max_y).round() as i32;

        // 2px outline
        for inset in 0..2 {
            let w = right - left - 2 * inset + 1;
            let h = bottom - top - 2 * inset + 1;
            if w > 0 && h > 0 {
                draw_hollow_rect_mut(
                    &mut canvas,
                    Rect::at(left + inset, top + inset).of_size(w as u32, h as u32),
                    BOX_COLOR,
                );
            }
        }

        let text = label_text(det);
        let bar_w = text_width(&text, 1) + 4;
        let bar_y = (top - GLYPH_H - 4).max(0);
        draw_filled_rect_mut(
            &mut canvas,
            Rect::at(left, bar_y).of_size(bar_w as u32, (GLYPH_H + 4) as u32),
            BOX_COLOR,
        );
        draw_text(&mut canvas, left + 2, bar_y + 2, &text, 1, LABEL_TEXT);
    }

    let info = stats.text();
    draw_filled_rect_mut(
        &mut canvas,
        Rect::at(6, 6).of_size((text_width(&info, 2) + 8) as u32, (GLYPH_H * 2 + 8) as u32),
        INFO_BG,
    );
    draw_text(&mut canvas, 10, 10, &info, 2, BOX_COLOR);

    canvas
}

fn text_width(text: &str, scale: i32) -> i32 {
    text.chars().count() as i32 * ADVANCE * scale
}

/// Render `text` with the built-in 5x7 font, each bit a `scale`-sized block.
pub fn draw_text(image: &mut RgbImage, x: i32, y: i32, text: &str, scale: i32, color: Rgb<u8>) {
    let (width, height) = (image.width() as i32, image.height() as i32);
    let mut pen_x = x;

    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..GLYPH_W {
                    if (pattern >> (GLYPH_W - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    for dy in 0..scale {
                        for dx in 0..scale {
                            let px = pen_x + col * scale + dx;
                            let py = y + row as i32 * scale + dy;
                            if px >= 0 && px < width && py >= 0 && py < height {
                                image.put_pixel(px as u32, py as u32, color);
                            }
                        }
                    }
                }
            }
        }
        pen_x += ADVANCE * scale;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let bits = match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x1E, 0x10, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x1E, 0x10, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x0E, 0x01, 0x01, 0x11, 0x0E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1E, 0x01, 0x01, 0x0E, 0x01, 0x01, 0x1E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x06, 0x06],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '|' => [0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '%' => [0x11, 0x12, 0x04, 0x08, 0x12, 0x11, 0x00],
        ' ' => [0x00; 7],
        _ => return None,
    };
    Some(bits)
}
