use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::ingest::mjpeg::DEFAULT_MAX_FRAME_SIZE;

const DEFAULT_STREAM_HOST: &str = "172.20.129.172";
const DEFAULT_STREAM_PORT: u16 = 81;
const DEFAULT_STREAM_PATH: &str = "/stream";
const DEFAULT_READ_BUFFER_SIZE: usize = 4096;
const DEFAULT_MAX_HEADER_BYTES: usize = 16 * 1024;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.6;

/// Edge length of the square model input, in pixels.
pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// Order in which pixel components are written into the model input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Memory layout of the model input tensor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[1, S, S, 3]`, channels interleaved per pixel.
    #[default]
    Nhwc,
    /// `[1, 3, S, S]`, one plane per channel.
    Nchw,
}

#[derive(Debug, Deserialize, Default)]
struct GuideConfigFile {
    stream: Option<StreamConfigFile>,
    detection: Option<DetectionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
    max_frame_size: Option<usize>,
    read_buffer_size: Option<usize>,
    max_header_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    input_size: Option<u32>,
    confidence_threshold: Option<f32>,
    channel_order: Option<ChannelOrder>,
    tensor_layout: Option<TensorLayout>,
    model_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuideConfig {
    pub stream: StreamSettings,
    pub detection: DetectionSettings,
}

/// Where the camera lives and how its byte stream is consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    pub host: String,
    pub port: u16,
    pub path: String,
    /// Largest JPEG frame accepted from the stream, in bytes.
    pub max_frame_size: usize,
    /// Size of the socket read window.
    pub read_buffer_size: usize,
    /// Largest HTTP response header block tolerated before the body.
    pub max_header_bytes: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub channel_order: ChannelOrder,
    pub tensor_layout: TensorLayout,
    pub model_path: Option<PathBuf>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_STREAM_HOST.to_string(),
            port: DEFAULT_STREAM_PORT,
            path: DEFAULT_STREAM_PATH.to_string(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
        }
    }
}

impl StreamSettings {
    /// Build settings from an `http://host[:port]/path` URL.
    pub fn from_url(raw: &str) -> Result<Self> {
        let mut settings = Self::default();
        settings.apply_url(raw)?;
        Ok(settings)
    }

    /// Point at the camera named by `raw`, keeping the buffer limits.
    pub fn apply_url(&mut self, raw: &str) -> Result<()> {
        let url = Url::parse(raw).with_context(|| format!("parse stream url '{}'", raw))?;
        if url.scheme() != "http" {
            return Err(anyhow!(
                "unsupported stream scheme '{}'; expected http",
                url.scheme()
            ));
        }
        self.host = url
            .host_str()
            .ok_or_else(|| anyhow!("stream url missing host"))?
            .to_string();
        self.port = url.port_or_known_default().unwrap_or(DEFAULT_STREAM_PORT);
        self.path = url.path().to_string();
        Ok(())
    }

    /// `host:port`, as used for the socket connect and the `Host` header.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn url(&self) -> String {
        format!("http://{}{}", self.authority(), self.path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("stream host must not be empty"));
        }
        if !self.path.starts_with('/') {
            return Err(anyhow!("stream path must start with '/'"));
        }
        if self.max_frame_size < 4 {
            return Err(anyhow!("max_frame_size must be at least 4 bytes"));
        }
        if self.read_buffer_size == 0 {
            return Err(anyhow!("read_buffer_size must be greater than zero"));
        }
        if self.max_header_bytes < 4 {
            return Err(anyhow!("max_header_bytes must be at least 4 bytes"));
        }
        Ok(())
    }
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            channel_order: ChannelOrder::default(),
            tensor_layout: TensorLayout::default(),
            model_path: None,
        }
    }
}

impl DetectionSettings {
    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 {
            return Err(anyhow!("input_size must be greater than zero"));
        }
        validate_threshold(self.confidence_threshold)
    }
}

/// Thresholds are compared against products of probabilities.
pub fn validate_threshold(threshold: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(anyhow!(
            "confidence threshold must be within [0, 1], got {}",
            threshold
        ));
    }
    Ok(())
}

impl GuideConfig {
    /// Load defaults, then the JSON file named by `WALKSENSE_CONFIG`, then
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("WALKSENSE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: GuideConfigFile) -> Result<Self> {
        let mut stream = StreamSettings::default();
        if let Some(file_stream) = file.stream {
            if let Some(url) = file_stream.url.as_deref() {
                stream.apply_url(url)?;
            }
            if let Some(host) = file_stream.host {
                stream.host = host;
            }
            if let Some(port) = file_stream.port {
                stream.port = port;
            }
            if let Some(path) = file_stream.path {
                stream.path = path;
            }
            stream.max_frame_size = file_stream.max_frame_size.unwrap_or(stream.max_frame_size);
            stream.read_buffer_size = file_stream
                .read_buffer_size
                .unwrap_or(stream.read_buffer_size);
            stream.max_header_bytes = file_stream
                .max_header_bytes
                .unwrap_or(stream.max_header_bytes);
        }

        let defaults = DetectionSettings::default();
        let detection = match file.detection {
            Some(d) => DetectionSettings {
                input_size: d.input_size.unwrap_or(defaults.input_size),
                confidence_threshold: d
                    .confidence_threshold
                    .unwrap_or(defaults.confidence_threshold),
                channel_order: d.channel_order.unwrap_or(defaults.channel_order),
                tensor_layout: d.tensor_layout.unwrap_or(defaults.tensor_layout),
                model_path: d.model_path,
            },
            None => defaults,
        };

        Ok(Self { stream, detection })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("WALKSENSE_STREAM_URL") {
            if !url.trim().is_empty() {
                self.stream.apply_url(url.trim())?;
            }
        }
        if let Ok(max) = std::env::var("WALKSENSE_MAX_FRAME_BYTES") {
            self.stream.max_frame_size = max.trim().parse().map_err(|_| {
                anyhow!("WALKSENSE_MAX_FRAME_BYTES must be an integer number of bytes")
            })?;
        }
        if let Ok(confidence) = std::env::var("WALKSENSE_CONFIDENCE") {
            self.detection.confidence_threshold = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("WALKSENSE_CONFIDENCE must be a number"))?;
        }
        if let Ok(path) = std::env::var("WALKSENSE_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detection.model_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.stream.validate()?;
        self.detection.validate()
    }
}

fn read_config_file(path: &Path) -> Result<GuideConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
