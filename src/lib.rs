//! WalkSense obstacle guidance core
//!
//! This crate turns a live MJPEG camera feed into short spoken-style obstacle
//! reports ("person, very close, ahead") for a walking aid.
//!
//! # Architecture
//!
//! Two execution contexts share exactly one resource, the frame cache:
//!
//! 1. **Ingestion**: a dedicated reader thread connects to the camera,
//!    splits the byte stream into JPEG frames, decodes them and keeps the
//!    newest one in the cache.
//! 2. **Guidance**: on demand, the caller snapshots the cache, runs the
//!    detector, decodes the output tensor and selects the single largest
//!    obstacle.
//!
//! # Module Structure
//!
//! - `config`: Stream and detection settings (file + env)
//! - `ingest`: MJPEG frame extractor and the camera stream session
//! - `frame`: Decoded frames and the single-slot frame cache
//! - `detect`: Inference backends, preprocessing and tensor decoding
//! - `guidance`: Distance/direction buckets and obstacle selection
//! - `guide`: `ObstacleGuide`, the host-facing session

pub mod config;
pub mod detect;
pub mod frame;
pub mod guidance;
pub mod guide;
pub mod ingest;

pub use config::{ChannelOrder, DetectionSettings, GuideConfig, StreamSettings, TensorLayout};
pub use detect::{BoundingBox, Detection, DetectionTensor, InferenceBackend, StubBackend};
pub use frame::{DecodedFrame, FrameCache};
pub use guidance::{select, Direction, DistanceBucket, GuidanceResult};
pub use guide::{DetectError, GuideEvent, ObstacleGuide};
pub use ingest::{Esp32Stream, FrameExtractor, StreamEvent, StreamHandle, StreamSink, StreamStats};
