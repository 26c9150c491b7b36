//! reelfix media - frame sources and sinks backed by FFmpeg.
//!
//! This crate handles:
//! - Stream probing with `ffprobe`
//! - Decoding to packed RGB frames (ffmpeg-sidecar)
//! - Encoding packed RGB frames by piping into an `ffmpeg` child process
//! - Re-muxing the original audio track onto a processed clip
//! - An in-memory backend for tests and dry runs

pub mod backend;
pub mod decoder;
pub mod export;
pub mod memory;
pub mod probe;
pub mod remux;

use reelfix_core::{FrameBuffer, FrameRate, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use backend::FfmpegBackend;
pub use decoder::VideoDecoder;
pub use export::{ExportFormat, FfmpegSink, VideoCodec};
pub use memory::{MemoryBackend, SyntheticClip};
pub use probe::MediaProbe;
pub use remux::AudioRemux;

/// Stream properties of an opened source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    /// Rate as reported by the container; may be missing (zero).
    pub frame_rate: FrameRate,
    /// Total number of decodable frames, best effort.
    pub frame_count: u64,
}

impl SourceInfo {
    /// Frames per second, or `fallback` when the container reports none.
    pub fn fps_or(&self, fallback: f64) -> f64 {
        self.frame_rate.fps_or(fallback)
    }
}

/// Sequential reader of decoded frames with frame-index seeking.
pub trait FrameSource {
    fn info(&self) -> &SourceInfo;

    /// Position the reader so the next `read_frame` returns `frame_index`.
    fn seek(&mut self, frame_index: u64) -> Result<()>;

    /// The next frame, or `None` at end of stream.
    fn read_frame(&mut self) -> Result<Option<FrameBuffer>>;
}

/// Sequential writer of frames into an encoded file.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &FrameBuffer) -> Result<()>;

    /// Flush and close the output. Further writes are errors.
    fn finish(&mut self) -> Result<()>;

    fn frames_written(&self) -> u64;
}

/// Factory for sources and sinks.
pub trait MediaBackend {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>>;

    /// Open a sink producing `format.width x format.height` frames at
    /// `format.frame_rate`.
    fn open_sink(&self, path: &Path, format: &ExportFormat) -> Result<Box<dyn FrameSink>>;
}
