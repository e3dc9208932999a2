//! Host-facing guidance session.
//!
//! `ObstacleGuide` ties the pieces together: it owns the inference backend,
//! runs at most one camera stream session that keeps the frame cache fresh,
//! and answers on-demand guidance requests against the latest cached frame.
//!
//! Ingestion runs on the stream reader thread. Detection runs synchronously
//! on the caller's thread and blocks for as long as inference takes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

use crate::config::{validate_threshold, GuideConfig};
use crate::detect::{decode, prepare_input, Detection, InferenceBackend};
use crate::frame::FrameCache;
use crate::guidance::{self, GuidanceResult};
use crate::ingest::{Esp32Stream, StreamEvent, StreamHandle, StreamSink};

/// Notifications delivered to the host while a stream session runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuideEvent {
    /// First frame of the session has been decoded and cached.
    StreamConnected,
    /// The session failed and has ended.
    StreamError(String),
}

/// Synchronous rejection of a guidance request.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("model not loaded")]
    ModelNotLoaded,
    #[error("no valid frame available")]
    NoFrame,
    #[error("invalid confidence threshold {0}")]
    InvalidThreshold(f32),
    #[error("detection error: {0:#}")]
    Inference(anyhow::Error),
}

pub struct ObstacleGuide {
    config: GuideConfig,
    cache: Arc<FrameCache>,
    backend: Option<Box<dyn InferenceBackend>>,
    stream: Option<StreamHandle>,
    // Per-session gate for cache writes. Replaced on every start.
    accepting: Arc<AtomicBool>,
}

impl ObstacleGuide {
    pub fn new(config: GuideConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cache: Arc::new(FrameCache::new()),
            backend: None,
            stream: None,
            accepting: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &GuideConfig {
        &self.config
    }

    pub fn frame_cache(&self) -> &Arc<FrameCache> {
        &self.cache
    }

    /// Install an inference backend, replacing any loaded one.
    pub fn load_model(&mut self, mut backend: Box<dyn InferenceBackend>) -> Result<()> {
        let expected = self.config.detection.input_size;
        let size = backend.input_size();
        if size != expected {
            return Err(anyhow!(
                "backend {} expects {size}x{size} input, configured input size is {expected}",
                backend.name()
            ));
        }
        backend
            .warm_up()
            .with_context(|| format!("warm up {} backend", backend.name()))?;
        log::info!(
            "model loaded ({} backend, {} classes, {}x{} input)",
            backend.name(),
            backend.class_count(),
            expected,
            expected
        );
        self.backend = Some(backend);
        Ok(())
    }

    /// Load the ONNX model named by `detection.model_path`.
    #[cfg(feature = "backend-tract")]
    pub fn load_model_from_config(&mut self) -> Result<()> {
        let detection = &self.config.detection;
        let path = detection
            .model_path
            .clone()
            .ok_or_else(|| anyhow!("no model path configured"))?;
        let backend = crate::detect::TractBackend::new(
            &path,
            detection.input_size,
            detection.tensor_layout,
        )?;
        self.load_model(Box::new(backend))
    }

    pub fn is_model_loaded(&self) -> bool {
        self.backend.is_some()
    }

    /// Release the backend and forget the cached frame.
    pub fn unload_model(&mut self) {
        if let Some(backend) = self.backend.take() {
            log::info!("model unloaded ({} backend)", backend.name());
        }
        self.cache.invalidate();
    }

    /// Start a stream session, stopping any session already running.
    ///
    /// Connection failures arrive later as [`GuideEvent::StreamError`].
    pub fn start_stream(&mut self, events: Option<Sender<GuideEvent>>) -> Result<()> {
        self.stop_stream();

        let accepting = Arc::new(AtomicBool::new(true));
        let sink = CacheSink {
            cache: self.cache.clone(),
            accepting: accepting.clone(),
            events,
            announced: false,
        };
        let handle = Esp32Stream::new(self.config.stream.clone()).start(sink)?;
        self.accepting = accepting;
        self.stream = Some(handle);
        Ok(())
    }

    /// Stop the session and clear the cache. Does not wait for the reader
    /// thread. Safe to call when nothing is running.
    pub fn stop_stream(&mut self) {
        self.accepting.store(false, Ordering::SeqCst);
        if let Some(handle) = self.stream.take() {
            handle.stop();
            log::info!("stream stopped");
        }
        self.cache.invalidate();
    }

    /// True while a session is running and has not failed.
    pub fn is_streaming(&self) -> bool {
        self.stream
            .as_ref()
            .map_or(false, |handle| handle.is_running())
    }

    /// Run the guidance pipeline on the latest cached frame.
    ///
    /// `threshold` overrides the configured confidence threshold.
    pub fn detect_from_stream(
        &mut self,
        threshold: Option<f32>,
    ) -> Result<Option<GuidanceResult>, DetectError> {
        let threshold = self.resolve_threshold(threshold)?;
        if self.backend.is_none() {
            return Err(DetectError::ModelNotLoaded);
        }
        let frame = self.cache.snapshot().ok_or(DetectError::NoFrame)?;
        log::debug!(
            "running detection on frame #{} ({}x{})",
            frame.sequence,
            frame.width(),
            frame.height()
        );
        let detections = self.run_detector(frame.image(), threshold)?;
        Ok(guidance::select(&detections, self.config.detection.input_size))
    }

    /// Run the guidance pipeline on a caller-supplied image.
    pub fn detect_frame(
        &mut self,
        image: &RgbImage,
        threshold: Option<f32>,
    ) -> Result<Option<GuidanceResult>, DetectError> {
        let detections = self.detections(image, threshold)?;
        Ok(guidance::select(&detections, self.config.detection.input_size))
    }

    /// Every detection above the threshold, before selection.
    pub fn detections(
        &mut self,
        image: &RgbImage,
        threshold: Option<f32>,
    ) -> Result<Vec<Detection>, DetectError> {
        let threshold = self.resolve_threshold(threshold)?;
        self.run_detector(image, threshold)
    }

    fn resolve_threshold(&self, threshold: Option<f32>) -> Result<f32, DetectError> {
        let threshold = threshold.unwrap_or(self.config.detection.confidence_threshold);
        validate_threshold(threshold).map_err(|_| DetectError::InvalidThreshold(threshold))?;
        Ok(threshold)
    }

    fn run_detector(&mut self, image: &RgbImage, threshold: f32) -> Result<Vec<Detection>, DetectError> {
        let detection = &self.config.detection;
        let backend = self.backend.as_mut().ok_or(DetectError::ModelNotLoaded)?;
        let input = prepare_input(image, detection.input_size, detection.channel_order);
        let tensor = backend.infer(&input).map_err(DetectError::Inference)?;
        let detections = decode(&tensor, threshold, detection.input_size);
        log::debug!(
            "{} detections at threshold {} from {} anchors",
            detections.len(),
            threshold,
            tensor.anchors()
        );
        Ok(detections)
    }
}

impl Drop for ObstacleGuide {
    fn drop(&mut self) {
        self.stop_stream();
    }
}

/// Stream sink that keeps the frame cache current and reports to the host.
struct CacheSink {
    cache: Arc<FrameCache>,
    accepting: Arc<AtomicBool>,
    events: Option<Sender<GuideEvent>>,
    announced: bool,
}

impl CacheSink {
    fn notify(&self, event: GuideEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

impl StreamSink for CacheSink {
    fn on_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Connected => log::debug!("stream body started"),
            StreamEvent::FrameReady(frame) => {
                let sequence = frame.sequence;
                if !self.cache.store_while(frame, &self.accepting) {
                    log::debug!("discarding frame #{} after stop", sequence);
                    return;
                }
                if !self.announced {
                    self.announced = true;
                    log::info!("stream connected, first frame cached");
                    self.notify(GuideEvent::StreamConnected);
                }
            }
            StreamEvent::Error(message) => {
                log::error!("{}", message);
                self.notify(GuideEvent::StreamError(message));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectionTensor, StubBackend, CLASS_COUNT};
    use crate::frame::DecodedFrame;
    use std::sync::mpsc;

    const S: u32 = 32;

    fn config() -> GuideConfig {
        let mut config = GuideConfig::default();
        config.detection.input_size = S;
        config
    }

    /// One anchor: a 0.5x0.5 box centered in the frame, person at 0.9 x 0.9.
    fn person_tensor() -> DetectionTensor {
        let mut data = vec![0.0; 5 + CLASS_COUNT];
        data[..5].copy_from_slice(&[0.5, 0.5, 0.5, 0.5, 0.9]);
        data[5] = 0.9;
        DetectionTensor::new(data, CLASS_COUNT, 1).unwrap()
    }

    fn sink(cache: &Arc<FrameCache>, events: Sender<GuideEvent>) -> (CacheSink, Arc<AtomicBool>) {
        let accepting = Arc::new(AtomicBool::new(true));
        let sink = CacheSink {
            cache: cache.clone(),
            accepting: accepting.clone(),
            events: Some(events),
            announced: false,
        };
        (sink, accepting)
    }

    fn frame(sequence: u64) -> DecodedFrame {
        DecodedFrame::new(RgbImage::new(8, 8), sequence)
    }

    #[test]
    fn rejection_messages_are_descriptive() {
        assert_eq!(DetectError::ModelNotLoaded.to_string(), "model not loaded");
        assert_eq!(DetectError::NoFrame.to_string(), "no valid frame available");
        let err = DetectError::Inference(anyhow!("boom").context("run model"));
        assert_eq!(err.to_string(), "detection error: run model: boom");
    }

    #[test]
    fn detect_without_model_is_rejected() {
        let mut guide = ObstacleGuide::new(config()).unwrap();
        guide.frame_cache().store(frame(1));
        assert!(matches!(
            guide.detect_from_stream(None),
            Err(DetectError::ModelNotLoaded)
        ));
    }

    #[test]
    fn detect_without_frame_is_rejected() {
        let mut guide = ObstacleGuide::new(config()).unwrap();
        guide
            .load_model(Box::new(StubBackend::new(S, person_tensor())))
            .unwrap();
        assert!(matches!(
            guide.detect_from_stream(None),
            Err(DetectError::NoFrame)
        ));
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let mut guide = ObstacleGuide::new(config()).unwrap();
        assert!(matches!(
            guide.detect_from_stream(Some(1.5)),
            Err(DetectError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn backend_with_wrong_input_size_is_refused() {
        let mut guide = ObstacleGuide::new(config()).unwrap();
        let err = guide
            .load_model(Box::new(StubBackend::new(S * 2, person_tensor())))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "backend stub expects 64x64 input, configured input size is 32"
        );
        assert!(!guide.is_model_loaded());
    }

    #[test]
    fn cached_frame_yields_guidance() {
        let mut guide = ObstacleGuide::new(config()).unwrap();
        guide
            .load_model(Box::new(StubBackend::new(S, person_tensor())))
            .unwrap();
        guide.frame_cache().store(frame(7));

        let result = guide.detect_from_stream(None).unwrap().unwrap();
        assert_eq!(result.class_name, "person");
        assert_eq!(result.direction, crate::guidance::Direction::Ahead);
        assert!((result.confidence - 0.81).abs() < 1e-6);

        // 0.81 does not reach a 0.9 override.
        assert_eq!(guide.detect_from_stream(Some(0.9)).unwrap(), None);
    }

    #[test]
    fn detect_frame_runs_on_supplied_image() {
        let mut guide = ObstacleGuide::new(config()).unwrap();
        let image = RgbImage::new(48, 40);
        assert!(matches!(
            guide.detect_frame(&image, None),
            Err(DetectError::ModelNotLoaded)
        ));

        guide
            .load_model(Box::new(StubBackend::new(S, person_tensor())))
            .unwrap();
        let result = guide.detect_frame(&image, None).unwrap().unwrap();
        assert_eq!(result.class_name, "person");
        assert_eq!(result.phrase(), "person, close, ahead");
        // The cache is not consulted.
        assert!(!guide.frame_cache().has_frame());
        assert_eq!(guide.detect_frame(&image, Some(0.9)).unwrap(), None);
    }

    #[test]
    fn unload_drops_model_and_frame() {
        let mut guide = ObstacleGuide::new(config()).unwrap();
        guide
            .load_model(Box::new(StubBackend::silent(S, 4).unwrap()))
            .unwrap();
        guide.frame_cache().store(frame(1));
        guide.unload_model();
        assert!(!guide.is_model_loaded());
        assert!(!guide.frame_cache().has_frame());
    }

    #[test]
    fn stop_without_session_is_harmless() {
        let mut guide = ObstacleGuide::new(config()).unwrap();
        guide.stop_stream();
        guide.stop_stream();
        assert!(!guide.is_streaming());
    }

    #[test]
    fn sink_announces_connection_on_first_frame_only() {
        let cache = Arc::new(FrameCache::new());
        let (tx, rx) = mpsc::channel();
        let (mut sink, _accepting) = sink(&cache, tx);

        sink.on_event(StreamEvent::Connected);
        assert!(rx.try_recv().is_err());

        sink.on_event(StreamEvent::FrameReady(frame(1)));
        sink.on_event(StreamEvent::FrameReady(frame(2)));
        assert_eq!(rx.try_recv().unwrap(), GuideEvent::StreamConnected);
        assert!(rx.try_recv().is_err());
        assert_eq!(cache.latest_sequence(), Some(2));
    }

    #[test]
    fn sink_forwards_errors() {
        let cache = Arc::new(FrameCache::new());
        let (tx, rx) = mpsc::channel();
        let (mut sink, _accepting) = sink(&cache, tx);
        sink.on_event(StreamEvent::Error("Stream error: reset".into()));
        assert_eq!(
            rx.try_recv().unwrap(),
            GuideEvent::StreamError("Stream error: reset".into())
        );
    }

    #[test]
    fn sink_drops_frames_after_stop() {
        let cache = Arc::new(FrameCache::new());
        let (tx, rx) = mpsc::channel();
        let (mut sink, accepting) = sink(&cache, tx);

        accepting.store(false, Ordering::SeqCst);
        sink.on_event(StreamEvent::FrameReady(frame(1)));
        assert!(!cache.has_frame());
        assert!(rx.try_recv().is_err());
    }
}
