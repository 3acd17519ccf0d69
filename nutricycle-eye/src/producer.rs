//! Per-frame pipeline: capture, infer, annotate, emit

use crate::camera::{Captured, FrameSource};
use crate::error::VisionError;
use crate::frame::Frame;
use crate::models::{infer_or_empty, DetectorBackend};
use crate::processing::annotation::{annotate, OverlayStats};
use image::RgbImage;
use nutricycle_core::{DetectionEvent, EventQueue};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Annotated output handed to the video transport.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub image: Arc<RgbImage>,
    pub sequence: u64,
    pub detections: usize,
}

/// Receiver of annotated frames. Must not block.
pub trait FrameSink: Send + Sync {
    fn publish(&self, frame: AnnotatedFrame);
}

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub threshold: f32,
    pub machine_id: Option<String>,
    /// Nominal source rate, shown until the first FPS window completes
    pub nominal_fps: f64,
    /// Minimum time per pass; `None` runs as fast as capture allows
    pub pace: Option<Duration>,
}

impl ProducerConfig {
    /// Every source is paced to `nominal_fps`. A healthy live device blocks
    /// in `read` for about one interval, so the sleep only kicks in when
    /// capture fails fast.
    pub fn for_source(
        source: &FrameSource,
        threshold: f32,
        machine_id: Option<String>,
    ) -> Self {
        let nominal_fps = source.nominal_fps();
        let pace = if nominal_fps > 0.0 && nominal_fps.is_finite() {
            Some(Duration::from_secs_f64(1.0 / nominal_fps))
        } else {
            None
        };
        Self {
            threshold,
            machine_id,
            nominal_fps,
            pace,
        }
    }
}

/// Rolling one-second frame counter.
#[derive(Debug)]
pub struct FpsMeter {
    window_start: Instant,
    frames: u32,
    last_fps: Option<f32>,
}

impl FpsMeter {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
            last_fps: None,
        }
    }

    /// Count a frame. Returns the achieved rate when a window closes.
    pub fn tick(&mut self, now: Instant) -> Option<f32> {
        self.frames += 1;
        let elapsed = now.duration_since(self.window_start);
        if elapsed < Duration::from_secs(1) {
            return None;
        }
        let fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.window_start = now;
        self.last_fps = Some(fps);
        Some(fps)
    }

    pub fn last_fps(&self) -> Option<f32> {
        self.last_fps
    }
}

#[derive(Debug, Default)]
pub struct ProducerStats {
    frames: AtomicU64,
    events: AtomicU64,
    blank_frames: AtomicU64,
    last_fps_milli: AtomicU64,
    last_inference_ms: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProducerSnapshot {
    pub frames: u64,
    pub events: u64,
    pub blank_frames: u64,
    pub last_fps: f64,
    pub last_inference_ms: u64,
}

impl ProducerStats {
    pub fn snapshot(&self) -> ProducerSnapshot {
        ProducerSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            blank_frames: self.blank_frames.load(Ordering::Relaxed),
            last_fps: self.last_fps_milli.load(Ordering::Relaxed) as f64 / 1000.0,
            last_inference_ms: self.last_inference_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    Stopped,
    SourceFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProducerReport {
    pub reason: StopReason,
    pub stats: ProducerSnapshot,
}

#[derive(Debug)]
pub enum PassOutcome {
    Continue,
    Finished(StopReason),
}

pub struct StreamProducer {
    source: Arc<Mutex<FrameSource>>,
    live: bool,
    backend: Arc<dyn DetectorBackend>,
    sink: Arc<dyn FrameSink>,
    queue: Arc<EventQueue<DetectionEvent>>,
    config: ProducerConfig,
    stats: Arc<ProducerStats>,
}

impl StreamProducer {
    pub fn new(
        source: FrameSource,
        backend: Arc<dyn DetectorBackend>,
        sink: Arc<dyn FrameSink>,
        queue: Arc<EventQueue<DetectionEvent>>,
        config: ProducerConfig,
    ) -> Self {
        let live = source.is_live();
        Self {
            source: Arc::new(Mutex::new(source)),
            live,
            backend,
            sink,
            queue,
            config,
            stats: Arc::new(ProducerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ProducerStats> {
        self.stats.clone()
    }

    async fn capture(&self) -> Result<Captured, VisionError> {
        let source = self.source.clone();
        tokio::task::spawn_blocking(move || source.lock().next_frame())
            .await
            .map_err(|e| VisionError::Camera(format!("Capture task failed: {}", e)))?
    }

    /// One CAPTURE -> INFER -> ANNOTATE -> EMIT pass.
    pub async fn step(&self, meter: &mut FpsMeter) -> PassOutcome {
        let frame: Frame = match self.capture().await {
            Ok(Captured::Frame(frame)) => frame,
            Ok(Captured::EndOfStream) => return PassOutcome::Finished(StopReason::EndOfStream),
            Err(e) if self.live => {
                warn!("Capture failed, sending blank frame: {}", e);
                self.stats.blank_frames.fetch_add(1, Ordering::Relaxed);
                self.source.lock().blank_frame()
            }
            Err(e) => return PassOutcome::Finished(StopReason::SourceFailed(e.to_string())),
        };

        if frame.sequence == 0 {
            info!("First frame produced ({}x{})", frame.width(), frame.height());
        }

        let started = Instant::now();
        let detections = infer_or_empty(self.backend.as_ref(), &frame, self.config.threshold).await;
        let inference_ms = started.elapsed().as_millis() as u64;
        self.stats.last_inference_ms.store(inference_ms, Ordering::Relaxed);

        let overlay = OverlayStats {
            fps: meter
                .last_fps()
                .unwrap_or(self.config.nominal_fps as f32),
            inference_ms,
        };
        let annotated = annotate(&frame, &detections, &overlay);
        let count = detections.len();

        if let Some(event) = DetectionEvent::from_pass(
            frame.sequence,
            frame.width(),
            frame.height(),
            detections,
            self.config.machine_id.clone(),
        ) {
            debug!("Frame {}: {} detections queued", frame.sequence, count);
            self.queue.enqueue(event);
            self.stats.events.fetch_add(1, Ordering::Relaxed);
        }

        self.sink.publish(AnnotatedFrame {
            image: Arc::new(annotated),
            sequence: frame.sequence,
            detections: count,
        });
        self.stats.frames.fetch_add(1, Ordering::Relaxed);

        if let Some(fps) = meter.tick(Instant::now()) {
            self.stats
                .last_fps_milli
                .store((fps * 1000.0) as u64, Ordering::Relaxed);
            info!("FPS: {:.1} | Inference: {}ms", fps, inference_ms);
        }

        PassOutcome::Continue
    }

    /// Loop until end of stream, a source failure, or `stop` flips to true.
    /// The event queue is shut down on exit.
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> ProducerReport {
        info!(
            "Stream producer started ({} backend, threshold {})",
            self.backend.name(),
            self.config.threshold
        );
        let mut meter = FpsMeter::new(Instant::now());

        let reason = loop {
            if *stop.borrow() {
                break StopReason::Stopped;
            }
            let started = Instant::now();

            let outcome = tokio::select! {
                _ = stop.changed() => break StopReason::Stopped,
                outcome = self.step(&mut meter) => outcome,
            };
            if let PassOutcome::Finished(reason) = outcome {
                break reason;
            }

            if let Some(interval) = self.config.pace {
                let elapsed = started.elapsed();
                if elapsed < interval {
                    tokio::select! {
                        _ = stop.changed() => break StopReason::Stopped,
                        _ = tokio::time::sleep(interval - elapsed) => {}
                    }
                }
            }
        };

        self.queue.shutdown();
        let stats = self.stats.snapshot();
        match &reason {
            StopReason::SourceFailed(msg) => warn!("Stream producer stopped, source failed: {}", msg),
            other => info!(
                "Stream producer stopped ({:?}) after {} frames, {} events",
                other, stats.frames, stats.events
            ),
        }

        ProducerReport { reason, stats }
    }
}
