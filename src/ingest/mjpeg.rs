//! MJPEG frame extractor.
//!
//! A byte-driven state machine that pulls complete JPEG images out of an
//! unframed byte stream. The only framing is the JPEG start-of-image
//! (`FF D8`) and end-of-image (`FF D9`) markers embedded in the data, so the
//! extractor keeps its state across calls and can be fed chunks of any size,
//! including one byte at a time.
//!
//! The extractor performs no I/O and never fails: bytes that do not form a
//! marker are either skipped (while seeking) or accumulated (inside a frame).

/// JPEG marker prefix.
pub const MARKER_PREFIX: u8 = 0xFF;
/// Start-of-image marker code.
pub const SOI: u8 = 0xD8;
/// End-of-image marker code.
pub const EOI: u8 = 0xD9;

/// Default cap on the size of a single assembled frame, in bytes.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 100_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractorState {
    SeekingStart,
    InFrame,
}

/// Counters kept by a [`FrameExtractor`] over its lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtractorStats {
    pub bytes_seen: u64,
    pub frames_emitted: u64,
    pub frames_dropped_oversize: u64,
    pub resyncs: u64,
}

pub struct FrameExtractor {
    state: ExtractorState,
    prev: Option<u8>,
    frame: Vec<u8>,
    max_frame_size: usize,
    stats: ExtractorStats,
}

impl FrameExtractor {
    /// Create an extractor that drops frames longer than `max_frame_size` bytes.
    ///
    /// The cap is raised to 4 bytes if smaller, the size of the shortest
    /// possible frame (`FF D8 FF D9`).
    pub fn new(max_frame_size: usize) -> Self {
        let max_frame_size = max_frame_size.max(4);
        Self {
            state: ExtractorState::SeekingStart,
            prev: None,
            frame: Vec::with_capacity(max_frame_size.min(64 * 1024)),
            max_frame_size,
            stats: ExtractorStats::default(),
        }
    }

    pub fn state(&self) -> ExtractorState {
        self.state
    }

    pub fn stats(&self) -> ExtractorStats {
        self.stats
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Bytes of the frame currently being assembled (empty while seeking).
    pub fn pending_len(&self) -> usize {
        self.frame.len()
    }

    /// Process one byte. Returns the complete frame when `byte` closes one.
    pub fn feed(&mut self, byte: u8) -> Option<Vec<u8>> {
        self.stats.bytes_seen += 1;
        let at_marker = self.prev == Some(MARKER_PREFIX);
        self.prev = Some(byte);

        match self.state {
            ExtractorState::SeekingStart => {
                if at_marker && byte == SOI {
                    self.begin_frame();
                }
                None
            }
            ExtractorState::InFrame => {
                if at_marker && byte == SOI {
                    // A fresh SOI inside a frame means the previous image was
                    // truncated on the wire; start over from this marker.
                    log::debug!(
                        "mjpeg: start marker inside frame after {} bytes, resyncing",
                        self.frame.len()
                    );
                    self.stats.resyncs += 1;
                    self.begin_frame();
                    return None;
                }

                if self.frame.len() >= self.max_frame_size {
                    log::warn!(
                        "mjpeg: frame exceeded {} bytes, dropping",
                        self.max_frame_size
                    );
                    self.stats.frames_dropped_oversize += 1;
                    self.reset();
                    return None;
                }

                self.frame.push(byte);

                if at_marker && byte == EOI {
                    self.stats.frames_emitted += 1;
                    let frame = std::mem::take(&mut self.frame);
                    self.reset();
                    return Some(frame);
                }
                None
            }
        }
    }

    /// Process a chunk, handing every completed frame to `on_frame` in order.
    ///
    /// Returns the number of frames completed by this chunk.
    pub fn feed_chunk<F>(&mut self, chunk: &[u8], mut on_frame: F) -> usize
    where
        F: FnMut(Vec<u8>),
    {
        let mut completed = 0;
        for &byte in chunk {
            if let Some(frame) = self.feed(byte) {
                completed += 1;
                on_frame(frame);
            }
        }
        completed
    }

    /// Process a chunk and collect the completed frames.
    pub fn extract(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        self.feed_chunk(chunk, |frame| frames.push(frame));
        frames
    }

    fn begin_frame(&mut self) {
        self.frame.clear();
        self.frame.push(MARKER_PREFIX);
        self.frame.push(SOI);
        self.state = ExtractorState::InFrame;
    }

    /// Abandon any partial frame and go back to seeking. The previous-byte
    /// tracker is kept so a marker split across the reset is still seen.
    fn reset(&mut self) {
        self.frame.clear();
        self.state = ExtractorState::SeekingStart;
    }
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}
