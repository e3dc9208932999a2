//! Decoded frames and the latest-frame cache.
//!
//! - `DecodedFrame`: an owned RGB image decoded from one MJPEG frame.
//! - `FrameCache`: single-slot cell holding the most recent frame. The stream
//!   reader stores into it; the guidance pipeline takes snapshots from it.
//!
//! The slot is never exposed. Callers only get `store`, `snapshot` and
//! `invalidate`, all of which run under one mutex, and a snapshot is an
//! independent copy that can be used after the lock is released.

use anyhow::{Context, Result};
use image::{GenericImageView, RgbImage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// An owned, decoded RGB frame.
#[derive(Clone, Debug)]
pub struct DecodedFrame {
    image: RgbImage,
    /// Position of this frame in its stream session (1-based).
    pub sequence: u64,
    /// When the frame finished decoding.
    pub decoded_at: Instant,
}

impl DecodedFrame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            decoded_at: Instant::now(),
        }
    }

    /// Decode a complete JPEG (or any format the `image` crate was built with).
    pub fn decode(bytes: &[u8], sequence: u64) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("decode frame")?;
        let (width, height) = image.dimensions();
        log::trace!("decoded frame #{} ({}x{})", sequence, width, height);
        Ok(Self::new(image.into_rgb8(), sequence))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

/// Single-slot cache for the most recently decoded frame.
///
/// `store` may be called once per decoded frame (tens per second) while
/// `snapshot` runs on demand from another thread.
#[derive(Debug, Default)]
pub struct FrameCache {
    slot: Mutex<Option<DecodedFrame>>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held frame. The superseded frame is dropped after the
    /// lock is released.
    pub fn store(&self, frame: DecodedFrame) {
        let previous = self.lock().replace(frame);
        drop(previous);
    }

    /// Store `frame` only if `active` is still set, checked under the lock.
    ///
    /// Paired with clearing the flag before `invalidate`, this guarantees a
    /// frame decoded just before a stop cannot land after the cache was
    /// cleared. Returns whether the frame was stored.
    pub fn store_while(&self, frame: DecodedFrame, active: &AtomicBool) -> bool {
        let mut slot = self.lock();
        if !active.load(Ordering::SeqCst) {
            return false;
        }
        let previous = slot.replace(frame);
        drop(slot);
        drop(previous);
        true
    }

    /// Copy of the current frame, or `None` if nothing is cached.
    pub fn snapshot(&self) -> Option<DecodedFrame> {
        self.lock().clone()
    }

    /// Drop the held frame, if any. Returns true when a frame was cleared.
    pub fn invalidate(&self) -> bool {
        let previous = self.lock().take();
        previous.is_some()
    }

    pub fn has_frame(&self) -> bool {
        self.lock().is_some()
    }

    /// Sequence number of the held frame without copying it.
    pub fn latest_sequence(&self) -> Option<u64> {
        self.lock().as_ref().map(|frame| frame.sequence)
    }

    // A panic while holding the lock cannot leave the slot half-written:
    // every mutation is a single `replace`/`take` of the whole value.
    fn lock(&self) -> MutexGuard<'_, Option<DecodedFrame>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
