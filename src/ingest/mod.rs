//! Camera stream ingestion.
//!
//! - `mjpeg`: pure byte-level frame extractor (no I/O).
//! - `esp32`: socket reader for the camera's MJPEG endpoint. Runs on its own
//!   thread, feeds the extractor, decodes completed frames and reports to a
//!   [`StreamSink`].
//!
//! Events are delivered on the reader thread. A sink that needs to hand work
//! to another thread does so explicitly, e.g. through a channel or the
//! [`FrameCache`](crate::frame::FrameCache).

pub mod esp32;
pub mod mjpeg;

use std::sync::mpsc::Sender;

use crate::frame::DecodedFrame;

pub use esp32::{Esp32Stream, StreamHandle, StreamStats};
pub use mjpeg::{ExtractorState, ExtractorStats, FrameExtractor};

/// Events published by a stream session, in order.
#[derive(Debug)]
pub enum StreamEvent {
    /// Response header block consumed; body parsing begins.
    Connected,
    /// One decoded image per completed MJPEG frame.
    FrameReady(DecodedFrame),
    /// Unrecoverable fault while the session was meant to be running.
    /// Sent at most once per session, and always last.
    Error(String),
}

/// Receiver of stream events. Called on the stream reader thread.
pub trait StreamSink: Send + 'static {
    fn on_event(&mut self, event: StreamEvent);
}

impl StreamSink for Sender<StreamEvent> {
    fn on_event(&mut self, event: StreamEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.send(event);
    }
}
