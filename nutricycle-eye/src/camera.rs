//! Frame capture from live devices, video files and image directories

use crate::config::VisionConfig;
use crate::error::VisionError;
use crate::frame::{FlipMode, Frame};
use image::{imageops, RgbImage};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const DEFAULT_FPS: f64 = 30.0;

/// Blocking capture handle. Callers on the async runtime must drive it
/// through `spawn_blocking`.
pub trait CaptureDevice: Send {
    /// Next raw frame, `Ok(None)` once a file source is exhausted.
    fn read(&mut self) -> Result<Option<RgbImage>, VisionError>;

    /// Live devices recover from read errors; file sources do not.
    fn is_live(&self) -> bool;

    fn resolution(&self) -> (u32, u32);

    fn nominal_fps(&self) -> f64;

    fn describe(&self) -> String;
}

/// Parsed form of the `--source` argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Device(i32),
    ImageDir(PathBuf),
    VideoFile(PathBuf),
}

impl SourceSpec {
    pub fn parse(source: &str) -> Self {
        let source = source.trim();
        if !source.is_empty() && source.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(index) = source.parse::<i32>() {
                return SourceSpec::Device(index);
            }
        }
        let path = PathBuf::from(source);
        if path.is_dir() {
            SourceSpec::ImageDir(path)
        } else {
            SourceSpec::VideoFile(path)
        }
    }
}

/// Sorted still images played back as a file source.
pub struct ImageSequenceDevice {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    resolution: (u32, u32),
    fps: f64,
}

impl ImageSequenceDevice {
    pub fn open(dir: &Path, fps: f64) -> Result<Self, VisionError> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            VisionError::SourceUnavailable(format!("Cannot read {}: {}", dir.display(), e))
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image_file(path))
            .collect();
        files.sort();

        let first = files.first().ok_or_else(|| {
            VisionError::SourceUnavailable(format!("No images found in {}", dir.display()))
        })?;
        let resolution = image::image_dimensions(first).map_err(|e| {
            VisionError::SourceUnavailable(format!("Cannot read {}: {}", first.display(), e))
        })?;

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            cursor: 0,
            resolution,
            fps: if fps > 0.0 { fps } else { DEFAULT_FPS },
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

impl CaptureDevice for ImageSequenceDevice {
    fn read(&mut self) -> Result<Option<RgbImage>, VisionError> {
        let Some(path) = self.files.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;

        let image = image::open(path)?.to_rgb8();
        let (w, h) = self.resolution;
        if image.dimensions() != (w, h) {
            debug!("Resizing {} to {}x{}", path.display(), w, h);
            return Ok(Some(imageops::resize(&image, w, h, imageops::FilterType::Triangle)));
        }
        Ok(Some(image))
    }

    fn is_live(&self) -> bool {
        false
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    fn nominal_fps(&self) -> f64 {
        self.fps
    }

    fn describe(&self) -> String {
        format!("image sequence {} ({} frames)", self.dir.display(), self.files.len())
    }
}

#[cfg(feature = "camera")]
pub use self::opencv_device::VideoCaptureDevice;

#[cfg(feature = "camera")]
mod opencv_device {
    use super::{CaptureDevice, DEFAULT_FPS};
    use crate::error::VisionError;
    use image::RgbImage;
    use opencv::{
        core::Mat,
        imgproc,
        prelude::*,
        videoio::{VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH},
    };
    use std::path::Path;

    /// OpenCV capture for USB cameras and video files
    pub struct VideoCaptureDevice {
        capture: VideoCapture,
        live: bool,
        label: String,
        resolution: (u32, u32),
        fps: f64,
    }

    impl VideoCaptureDevice {
        pub fn open_device(index: i32, requested: (u32, u32)) -> Result<Self, VisionError> {
            let mut capture = VideoCapture::new(index, CAP_ANY).map_err(|e| {
                VisionError::SourceUnavailable(format!("Failed to open camera {}: {}", index, e))
            })?;
            if !capture.is_opened()? {
                return Err(VisionError::SourceUnavailable(format!(
                    "Camera {} failed to open",
                    index
                )));
            }

            capture.set(CAP_PROP_FRAME_WIDTH, requested.0 as f64)?;
            capture.set(CAP_PROP_FRAME_HEIGHT, requested.1 as f64)?;

            Self::finish(capture, true, format!("camera {}", index), requested)
        }

        pub fn open_file(path: &Path, fallback: (u32, u32)) -> Result<Self, VisionError> {
            let name = path.to_string_lossy().to_string();
            let capture = VideoCapture::from_file(&name, CAP_ANY).map_err(|e| {
                VisionError::SourceUnavailable(format!("Failed to open {}: {}", name, e))
            })?;
            if !capture.is_opened()? {
                return Err(VisionError::SourceUnavailable(format!(
                    "Video file {} failed to open",
                    name
                )));
            }

            Self::finish(capture, false, format!("video file {}", name), fallback)
        }

        fn finish(
            capture: VideoCapture,
            live: bool,
            label: String,
            fallback: (u32, u32),
        ) -> Result<Self, VisionError> {
            let width = capture.get(CAP_PROP_FRAME_WIDTH)? as u32;
            let height = capture.get(CAP_PROP_FRAME_HEIGHT)? as u32;
            let fps = capture.get(CAP_PROP_FPS)?;

            Ok(Self {
                capture,
                live,
                label,
                resolution: if width > 0 && height > 0 {
                    (width, height)
                } else {
                    fallback
                },
                fps: if fps > 0.0 { fps } else { DEFAULT_FPS },
            })
        }
    }

    impl CaptureDevice for VideoCaptureDevice {
        fn read(&mut self) -> Result<Option<RgbImage>, VisionError> {
            let mut bgr = Mat::default();
            let ok = self.capture.read(&mut bgr)?;
            if !ok || bgr.empty() {
                if self.live {
                    return Err(VisionError::Camera(format!("Read failed on {}", self.label)));
                }
                return Ok(None);
            }

            let mut rgb = Mat::default();
            imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

            let (w, h) = (rgb.cols() as u32, rgb.rows() as u32);
            let bytes = rgb.data_bytes()?.to_vec();
            RgbImage::from_raw(w, h, bytes)
                .map(Some)
                .ok_or_else(|| VisionError::Camera("Frame buffer size mismatch".to_string()))
        }

        fn is_live(&self) -> bool {
            self.live
        }

        fn resolution(&self) -> (u32, u32) {
            self.resolution
        }

        fn nominal_fps(&self) -> f64 {
            self.fps
        }

        fn describe(&self) -> String {
            self.label.clone()
        }
    }
}

/// Open the capture device described by `spec`.
pub fn open_device(
    spec: &SourceSpec,
    resolution: (u32, u32),
    fps: f64,
) -> Result<Box<dyn CaptureDevice>, VisionError> {
    match spec {
        SourceSpec::ImageDir(dir) => Ok(Box::new(ImageSequenceDevice::open(dir, fps)?)),
        #[cfg(feature = "camera")]
        SourceSpec::Device(index) => Ok(Box::new(VideoCaptureDevice::open_device(*index, resolution)?)),
        #[cfg(feature = "camera")]
        SourceSpec::VideoFile(path) => {
            if !path.exists() {
                return Err(VisionError::SourceUnavailable(format!(
                    "Video file not found: {}",
                    path.display()
                )));
            }
            Ok(Box::new(VideoCaptureDevice::open_file(path, resolution)?))
        }
        #[cfg(not(feature = "camera"))]
        other => {
            let _ = resolution;
            Err(VisionError::SourceUnavailable(format!(
                "{:?} needs the `camera` feature (OpenCV capture)",
                other
            )))
        }
    }
}

pub enum Captured {
    Frame(Frame),
    EndOfStream,
}

/// Capture handle plus orientation fix and sequence numbering.
pub struct FrameSource {
    device: Box<dyn CaptureDevice>,
    flip: FlipMode,
    next_seq: u64,
}

impl FrameSource {
    /// Open the configured source. An unopenable device is fatal.
    pub fn open(config: &VisionConfig) -> Result<Self, VisionError> {
        let spec = SourceSpec::parse(&config.source);
        let device = open_device(&spec, config.resolution, config.frame_rate as f64)?;
        let (w, h) = device.resolution();
        info!(
            "Opened {} at {}x{} ({:.1} fps)",
            device.describe(),
            w,
            h,
            device.nominal_fps()
        );
        Ok(Self::from_device(device, config.flip))
    }

    pub fn from_device(device: Box<dyn CaptureDevice>, flip: FlipMode) -> Self {
        Self {
            device,
            flip,
            next_seq: 0,
        }
    }

    /// Blocking read of the next frame, already flipped.
    pub fn next_frame(&mut self) -> Result<Captured, VisionError> {
        match self.device.read()? {
            Some(raw) => {
                let image = self.flip.apply(raw);
                Ok(Captured::Frame(Frame::new(image, self.take_seq())))
            }
            None => Ok(Captured::EndOfStream),
        }
    }

    /// Placeholder at the source resolution, consuming a sequence number.
    pub fn blank_frame(&mut self) -> Frame {
        let (w, h) = self.device.resolution();
        let seq = self.take_seq();
        Frame::blank(w, h, seq)
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub fn is_live(&self) -> bool {
        self.device.is_live()
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.device.resolution()
    }

    pub fn nominal_fps(&self) -> f64 {
        self.device.nominal_fps()
    }

    pub fn describe(&self) -> String {
        self.device.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn write_png(dir: &Path, name: &str, w: u32, h: u32, color: [u8; 3]) {
        RgbImage::from_pixel(w, h, Rgb(color))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_source_spec_parse() {
        assert_eq!(SourceSpec::parse("0"), SourceSpec::Device(0));
        assert_eq!(SourceSpec::parse(" 2 "), SourceSpec::Device(2));
        assert_eq!(
            SourceSpec::parse("clip.mp4"),
            SourceSpec::VideoFile(PathBuf::from("clip.mp4"))
        );

        let dir = tempfile::tempdir().unwrap();
        let spec = SourceSpec::parse(dir.path().to_str().unwrap());
        assert_eq!(spec, SourceSpec::ImageDir(dir.path().to_path_buf()));
    }

    #[test]
    fn test_image_sequence_order_and_end() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "b.png", 8, 6, [0, 255, 0]);
        write_png(dir.path(), "a.png", 8, 6, [255, 0, 0]);
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let device = ImageSequenceDevice::open(dir.path(), 10.0).unwrap();
        assert_eq!(device.len(), 2);
        let mut source = FrameSource::from_device(Box::new(device), FlipMode::None);

        assert!(!source.is_live());
        assert_eq!(source.resolution(), (8, 6));
        match source.next_frame().unwrap() {
            Captured::Frame(frame) => {
                assert_eq!(frame.sequence, 0);
                assert_eq!(frame.image.get_pixel(0, 0).0, [255, 0, 0]);
            }
            Captured::EndOfStream => panic!("Expected frame"),
        }
        match source.next_frame().unwrap() {
            Captured::Frame(frame) => assert_eq!(frame.sequence, 1),
            Captured::EndOfStream => panic!("Expected frame"),
        }
        assert!(matches!(source.next_frame().unwrap(), Captured::EndOfStream));
    }

    #[test]
    fn test_mismatched_image_is_resized() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "00.png", 8, 6, [1, 1, 1]);
        write_png(dir.path(), "01.png", 16, 4, [1, 1, 1]);

        let mut device = ImageSequenceDevice::open(dir.path(), 30.0).unwrap();
        device.read().unwrap();
        let second = device.read().unwrap().unwrap();
        assert_eq!(second.dimensions(), (8, 6));
    }

    #[test]
    fn test_flip_applied_before_return() {
        let dir = tempfile::tempdir().unwrap();
        let mut img = RgbImage::new(4, 4);
        img.put_pixel(0, 0, Rgb([255, 255, 255]));
        img.save(dir.path().join("frame.png")).unwrap();

        let device = ImageSequenceDevice::open(dir.path(), 30.0).unwrap();
        let mut source = FrameSource::from_device(Box::new(device), FlipMode::Rotate180);
        match source.next_frame().unwrap() {
            Captured::Frame(frame) => {
                assert_eq!(frame.image.get_pixel(3, 3).0, [255, 255, 255]);
                assert_eq!(frame.image.get_pixel(0, 0).0, [0, 0, 0]);
            }
            Captured::EndOfStream => panic!("Expected frame"),
        }
    }

    #[test]
    fn test_empty_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        match ImageSequenceDevice::open(dir.path(), 30.0) {
            Err(VisionError::SourceUnavailable(_)) => {}
            _ => panic!("Expected SourceUnavailable"),
        }
    }

    #[cfg(not(feature = "camera"))]
    #[test]
    fn test_device_without_camera_feature_is_unavailable() {
        let config = VisionConfig::default();
        match FrameSource::open(&config) {
            Err(err) => assert!(err.is_fatal()),
            Ok(_) => panic!("Expected SourceUnavailable"),
        }
    }

    #[test]
    fn test_blank_frame_consumes_sequence() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "a.png", 8, 6, [9, 9, 9]);
        let device = ImageSequenceDevice::open(dir.path(), 30.0).unwrap();
        let mut source = FrameSource::from_device(Box::new(device), FlipMode::None);

        let blank = source.blank_frame();
        assert_eq!((blank.sequence, blank.width(), blank.height()), (0, 8, 6));
        match source.next_frame().unwrap() {
            Captured::Frame(frame) => assert_eq!(frame.sequence, 1),
            Captured::EndOfStream => panic!("Expected frame"),
        }
    }
}
