//! Frame processing: letterbox geometry, output decoding and overlays

pub mod letterbox;
pub mod decoder;
pub mod annotation;

pub use letterbox::Letterbox;
pub use decoder::{decode, RawTensor, TensorLayout};
pub use annotation::{annotate, OverlayStats};
