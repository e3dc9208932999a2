//! mjpeg_split - split a captured MJPEG body into numbered JPEG files
//!
//! Feeds a raw byte dump (for example `curl http://cam:81/stream > dump.mjpeg`)
//! through the same frame extractor the live reader uses. Leading HTTP headers
//! and multipart boundaries are skipped as ordinary non-frame bytes.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::PathBuf;

use walksense::ingest::mjpeg::DEFAULT_MAX_FRAME_SIZE;
use walksense::FrameExtractor;

#[derive(Parser, Debug)]
#[command(author, version, about = "Split a captured MJPEG byte stream into JPEG files")]
struct Args {
    /// Captured stream bytes. Reads stdin when omitted.
    #[arg(long, value_name = "PATH")]
    input: Option<PathBuf>,

    /// Directory that receives frame_00001.jpg, frame_00002.jpg, ...
    #[arg(long, value_name = "DIR", default_value = "frames")]
    out_dir: PathBuf,

    /// Largest frame kept, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,

    /// Count frames without writing them.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut input: Box<dyn Read> = match &args.input {
        Some(path) => Box::new(
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => Box::new(io::stdin().lock()),
    };

    if !args.dry_run {
        fs::create_dir_all(&args.out_dir)
            .with_context(|| format!("failed to create {}", args.out_dir.display()))?;
    }

    let mut extractor = FrameExtractor::new(args.max_frame_size);
    let mut buf = vec![0u8; 64 * 1024];
    let mut written = 0u64;
    let mut write_error = None;

    loop {
        let n = input.read(&mut buf).context("read input")?;
        if n == 0 {
            break;
        }
        extractor.feed_chunk(&buf[..n], |frame| {
            if write_error.is_some() {
                return;
            }
            written += 1;
            if args.dry_run {
                return;
            }
            let path = args.out_dir.join(format!("frame_{:05}.jpg", written));
            if let Err(err) = fs::write(&path, &frame) {
                write_error = Some(
                    anyhow::Error::new(err).context(format!("failed to write {}", path.display())),
                );
            }
        });
        if let Some(err) = write_error.take() {
            return Err(err);
        }
    }

    let stats = extractor.stats();
    if extractor.pending_len() > 0 {
        log::warn!(
            "input ended inside a frame; {} trailing bytes discarded",
            extractor.pending_len()
        );
    }
    log::info!(
        "{} frames extracted from {} bytes ({} oversize dropped, {} resyncs)",
        stats.frames_emitted,
        stats.bytes_seen,
        stats.frames_dropped_oversize,
        stats.resyncs
    );
    if !args.dry_run {
        log::info!("wrote {} files to {}", written, args.out_dir.display());
    }
    Ok(())
}
