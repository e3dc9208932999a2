//! ESP32 camera stream reader.
//!
//! The camera serves MJPEG as a long-lived HTTP response. This reader does
//! not speak HTTP beyond the minimum: it writes one request, discards the
//! response header block byte-for-byte up to the first blank line, then
//! treats every following byte as raw MJPEG with no interpretation of
//! status, headers or chunk framing.
//!
//! Each session runs on a dedicated thread that blocks on the socket. Stopping
//! a session clears the `running` flag and shuts the socket down, which
//! unblocks the read. A failure observed after a stop request is treated as
//! intentional termination and is not reported.

use anyhow::{anyhow, bail, Context, Result};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use super::mjpeg::{ExtractorStats, FrameExtractor};
use super::{StreamEvent, StreamSink};
use crate::config::StreamSettings;
use crate::frame::DecodedFrame;

const HEADER_TERMINATOR: u32 = u32::from_be_bytes(*b"\r\n\r\n");
const FRAME_LOG_INTERVAL: u64 = 30;

/// Statistics for one stream session.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamStats {
    pub bytes_read: u64,
    pub frames_decoded: u64,
    pub decode_failures: u64,
    pub extractor: ExtractorStats,
}

/// Connection parameters for the camera's MJPEG endpoint.
#[derive(Clone, Debug)]
pub struct Esp32Stream {
    settings: StreamSettings,
}

impl Esp32Stream {
    pub fn new(settings: StreamSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// The request written once when the connection opens.
    pub fn request(&self) -> String {
        format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: keep-alive\r\n\r\n",
            self.settings.path,
            self.settings.authority()
        )
    }

    /// Start a session on a new thread. Connection errors are reported to
    /// `sink` as [`StreamEvent::Error`], not returned here.
    pub fn start<S: StreamSink>(&self, sink: S) -> Result<StreamHandle> {
        self.settings.validate()?;

        let running = Arc::new(AtomicBool::new(true));
        let socket: Arc<Mutex<Option<TcpStream>>> = Arc::new(Mutex::new(None));
        let session = Session {
            settings: self.settings.clone(),
            request: self.request(),
            running: running.clone(),
            socket: socket.clone(),
        };

        let join = std::thread::Builder::new()
            .name("mjpeg-stream-reader".into())
            .spawn(move || session.run(sink))
            .context("spawn stream reader thread")?;

        Ok(StreamHandle {
            running,
            socket,
            join: Some(join),
        })
    }
}

/// Owner-side handle to a running session.
///
/// Dropping the handle stops the session without waiting for the thread.
#[derive(Debug)]
pub struct StreamHandle {
    running: Arc<AtomicBool>,
    socket: Arc<Mutex<Option<TcpStream>>>,
    join: Option<JoinHandle<StreamStats>>,
}

impl StreamHandle {
    /// Request termination. Safe to call any number of times.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            log::debug!("stream stop requested");
        }
        if let Some(stream) = lock_socket(&self.socket).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Wait for the reader thread to exit and return its statistics.
    pub fn join(mut self) -> Result<StreamStats> {
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("stream reader thread panicked")),
            None => Ok(StreamStats::default()),
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Session {
    settings: StreamSettings,
    request: String,
    running: Arc<AtomicBool>,
    socket: Arc<Mutex<Option<TcpStream>>>,
}

impl Session {
    fn run<S: StreamSink>(self, mut sink: S) -> StreamStats {
        let mut stats = StreamStats::default();
        log::info!("opening stream connection to {}", self.settings.url());

        let result = self.connect_and_pump(&mut sink, &mut stats);
        match result {
            Ok(()) => log::debug!("stream loop exited"),
            Err(err) if self.running.load(Ordering::SeqCst) => {
                log::error!("stream error: {:#}", err);
                sink.on_event(StreamEvent::Error(format!("Stream error: {:#}", err)));
            }
            Err(err) => log::debug!("stream stopped intentionally ({:#})", err),
        }

        self.running.store(false, Ordering::SeqCst);
        if let Some(stream) = lock_socket(&self.socket).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        log::info!(
            "stream closed: {} frames decoded, {} undecodable, {} oversize, {} bytes",
            stats.frames_decoded,
            stats.decode_failures,
            stats.extractor.frames_dropped_oversize,
            stats.bytes_read
        );
        stats
    }

    fn connect_and_pump<S: StreamSink>(&self, sink: &mut S, stats: &mut StreamStats) -> Result<()> {
        let authority = self.settings.authority();
        let stream = TcpStream::connect(&authority)
            .with_context(|| format!("connect to {}", authority))?;
        stream
            .set_read_timeout(None)
            .context("clear socket read timeout")?;

        {
            // Publish a clone for `stop`, unless a stop already happened
            // while we were connecting.
            let mut slot = lock_socket(&self.socket);
            if !self.running.load(Ordering::SeqCst) {
                let _ = stream.shutdown(Shutdown::Both);
                return Ok(());
            }
            *slot = Some(stream.try_clone().context("clone stream socket")?);
        }

        (&stream)
            .write_all(self.request.as_bytes())
            .context("send stream request")?;
        (&stream).flush().context("flush stream request")?;
        log::debug!("stream request sent");

        let mut reader = BufReader::with_capacity(self.settings.read_buffer_size, stream);
        let header_len = skip_response_headers(&mut reader, self.settings.max_header_bytes)?;
        log::info!("headers skipped ({} bytes), starting MJPEG parse", header_len);
        sink.on_event(StreamEvent::Connected);

        pump_frames(&mut reader, &self.settings, &self.running, sink, stats)
    }
}

fn lock_socket(socket: &Mutex<Option<TcpStream>>) -> MutexGuard<'_, Option<TcpStream>> {
    socket.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Consume bytes up to and including the first `\r\n\r\n`.
///
/// Returns the number of bytes consumed.
pub(crate) fn skip_response_headers<R: Read>(reader: &mut R, max_header_bytes: usize) -> Result<usize> {
    let mut window: u32 = 0;
    let mut consumed = 0usize;
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => bail!("stream closed before response headers completed"),
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err).context("read response headers"),
        }
        consumed += 1;
        window = (window << 8) | u32::from(byte[0]);
        if consumed >= 4 && window == HEADER_TERMINATOR {
            return Ok(consumed);
        }
        if consumed >= max_header_bytes {
            bail!(
                "response header block exceeded {} bytes",
                max_header_bytes
            );
        }
    }
}

/// Read the body until stopped or failed, emitting one event per decoded frame.
pub(crate) fn pump_frames<R, S>(
    reader: &mut R,
    settings: &StreamSettings,
    running: &AtomicBool,
    sink: &mut S,
    stats: &mut StreamStats,
) -> Result<()>
where
    R: Read,
    S: StreamSink + ?Sized,
{
    let mut extractor = FrameExtractor::new(settings.max_frame_size);
    let mut window = vec![0u8; settings.read_buffer_size];

    let result = loop {
        if !running.load(Ordering::SeqCst) {
            break Ok(());
        }
        let read = match reader.read(&mut window) {
            Ok(0) => break Err(anyhow!("stream ended by server")),
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => break Err(anyhow::Error::new(err).context("read mjpeg stream")),
        };
        stats.bytes_read += read as u64;

        extractor.feed_chunk(&window[..read], |jpeg| {
            match DecodedFrame::decode(&jpeg, stats.frames_decoded + 1) {
                Ok(frame) => {
                    stats.frames_decoded += 1;
                    if stats.frames_decoded % FRAME_LOG_INTERVAL == 0 {
                        log::debug!("{} frames received", stats.frames_decoded);
                    }
                    sink.on_event(StreamEvent::FrameReady(frame));
                }
                Err(err) => {
                    stats.decode_failures += 1;
                    log::warn!("failed to decode frame, size: {} ({:#})", jpeg.len(), err);
                }
            }
        });
    };

    stats.extractor = extractor.stats();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::mpsc;

    fn encoded_jpeg(shade: u8) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(16, 8, image::Rgb([shade, shade, shade]));
        let mut bytes = Vec::new();
        image::codecs::jpeg::JpegEncoder::new(&mut bytes)
            .encode_image(&img)
            .unwrap();
        bytes
    }

    fn settings() -> StreamSettings {
        StreamSettings {
            host: "camera.test".to_string(),
            port: 81,
            read_buffer_size: 7,
            ..StreamSettings::default()
        }
    }

    #[test]
    fn request_has_exact_wire_format() {
        let stream = Esp32Stream::new(settings());
        assert_eq!(
            stream.request(),
            "GET /stream HTTP/1.1\r\nHost: camera.test:81\r\nConnection: keep-alive\r\n\r\n"
        );
    }

    #[test]
    fn header_skip_stops_at_first_blank_line() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace\r\n\r\nBODY\r\n\r\n";
        let mut cursor = Cursor::new(&raw[..]);
        let consumed = skip_response_headers(&mut cursor, 1024).unwrap();
        assert_eq!(consumed, raw.len() - b"BODY\r\n\r\n".len());
        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"BODY\r\n\r\n");
    }

    #[test]
    fn header_skip_fails_on_early_eof() {
        let mut cursor = Cursor::new(&b"HTTP/1.1 200 OK\r\n"[..]);
        let err = skip_response_headers(&mut cursor, 1024).unwrap_err();
        assert!(err.to_string().contains("before response headers completed"));
    }

    #[test]
    fn header_skip_enforces_cap() {
        let raw = vec![b'a'; 100];
        let mut cursor = Cursor::new(raw);
        assert!(skip_response_headers(&mut cursor, 32).is_err());
    }

    #[test]
    fn pump_emits_decoded_frames_and_skips_undecodable() {
        let good_a = encoded_jpeg(10);
        let good_b = encoded_jpeg(200);
        let mut body = Vec::new();
        body.extend(&good_a);
        body.extend([0xFF, 0xD8, 0x00, 0x01, 0xFF, 0xD9]); // marker-valid, not a JPEG
        body.extend(&good_b);

        let (tx, rx) = mpsc::channel();
        let mut sink = tx;
        let running = AtomicBool::new(true);
        let mut stats = StreamStats::default();
        let result = pump_frames(
            &mut Cursor::new(body),
            &settings(),
            &running,
            &mut sink,
            &mut stats,
        );
        drop(sink);

        // Cursor EOF looks like the server hanging up.
        assert!(result.unwrap_err().to_string().contains("ended by server"));
        assert_eq!(stats.frames_decoded, 2);
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.extractor.frames_emitted, 3);

        let sequences: Vec<u64> = rx
            .iter()
            .map(|event| match event {
                StreamEvent::FrameReady(frame) => frame.sequence,
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[test]
    fn pump_returns_immediately_when_not_running() {
        let (tx, rx) = mpsc::channel();
        let mut sink = tx;
        let running = AtomicBool::new(false);
        let mut stats = StreamStats::default();
        pump_frames(
            &mut Cursor::new(encoded_jpeg(1)),
            &settings(),
            &running,
            &mut sink,
            &mut stats,
        )
        .unwrap();
        drop(sink);
        assert_eq!(stats.bytes_read, 0);
        assert!(rx.iter().next().is_none());
    }
}
