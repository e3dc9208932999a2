//! walksense - live obstacle guidance from an ESP32 MJPEG camera
//!
//! Connects to the camera stream, keeps the newest frame cached, and on a
//! fixed interval runs the detector and prints one JSON guidance report per
//! line on stdout. Stream faults are logged and the session is restarted
//! after a delay. Ctrl-C stops cleanly.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use walksense::{DetectError, GuideConfig, GuideEvent, ObstacleGuide};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Announce the nearest obstacle seen by a walking-aid camera"
)]
struct Args {
    /// Camera stream URL, e.g. http://172.20.129.172:81/stream.
    #[arg(long)]
    url: Option<String>,

    /// ONNX detector to load (requires the backend-tract feature).
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Confidence threshold override in [0, 1].
    #[arg(long)]
    confidence: Option<f32>,

    /// Milliseconds between guidance requests.
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Delay before reconnecting after a stream fault.
    #[arg(long, default_value_t = 2)]
    reconnect_delay_secs: u64,

    /// Print the spoken phrase instead of JSON.
    #[arg(long)]
    phrase: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = GuideConfig::load()?;
    if let Some(url) = args.url.as_deref() {
        config.stream.apply_url(url)?;
    }
    if let Some(model) = args.model.clone() {
        config.detection.model_path = Some(model);
    }
    if let Some(confidence) = args.confidence {
        config.detection.confidence_threshold = confidence;
    }

    let mut guide = ObstacleGuide::new(config)?;
    load_model(&mut guide)?;

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("set Ctrl-C handler")?;

    let (event_tx, event_rx) = mpsc::channel();
    log::info!("walksense streaming from {}", guide.config().stream.url());
    guide.start_stream(Some(event_tx.clone()))?;

    let interval = Duration::from_millis(args.interval_ms.max(1));
    let reconnect_delay = Duration::from_secs(args.reconnect_delay_secs);
    let mut reconnect_at: Option<Instant> = None;
    let mut reports = 0u64;

    loop {
        match stop_rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        while let Ok(event) = event_rx.try_recv() {
            match event {
                GuideEvent::StreamConnected => log::info!("camera connected"),
                GuideEvent::StreamError(message) => {
                    log::warn!(
                        "{}; reconnecting in {}s",
                        message,
                        reconnect_delay.as_secs()
                    );
                    reconnect_at = Some(Instant::now() + reconnect_delay);
                }
            }
        }

        if let Some(at) = reconnect_at {
            if Instant::now() >= at {
                reconnect_at = None;
                guide.start_stream(Some(event_tx.clone()))?;
            }
            continue;
        }

        if !guide.is_model_loaded() {
            continue;
        }
        match guide.detect_from_stream(None) {
            Ok(Some(report)) => {
                reports += 1;
                if args.phrase {
                    println!("{}", report.phrase());
                } else {
                    println!("{}", serde_json::to_string(&report)?);
                }
            }
            Ok(None) => log::debug!("no obstacle above threshold"),
            Err(DetectError::NoFrame) => log::debug!("waiting for first frame"),
            Err(err) => log::warn!("guidance request failed: {}", err),
        }
    }

    log::info!("shutdown signal received, stopping stream...");
    guide.stop_stream();
    log::info!("walksense stopped after {} reports", reports);
    Ok(())
}

#[cfg(feature = "backend-tract")]
fn load_model(guide: &mut ObstacleGuide) -> Result<()> {
    if guide.config().detection.model_path.is_none() {
        log::warn!("no model configured; streaming without guidance");
        return Ok(());
    }
    guide.load_model_from_config()
}

#[cfg(not(feature = "backend-tract"))]
fn load_model(guide: &mut ObstacleGuide) -> Result<()> {
    if let Some(path) = &guide.config().detection.model_path {
        log::warn!(
            "built without backend-tract; ignoring model {} and streaming without guidance",
            path.display()
        );
    }
    Ok(())
}
