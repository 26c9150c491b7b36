//! In-memory media backend: synthetic sources and capturing sinks.
//!
//! Sources are generated on the fly from a [`SyntheticClip`] description, so
//! long clips cost nothing until read. Sinks record every frame written to
//! them; a finished output can be reopened as a source.

use crate::export::ExportFormat;
use crate::{FrameSink, FrameSource, MediaBackend, SourceInfo};
use parking_lot::Mutex;
use reelfix_core::{FrameBuffer, FrameRate, PixelFormat, ReelError, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const BLOCK: i64 = 16;

/// Description of a generated clip: a blocky textured scene, optionally
/// shaken by a per-frame integer offset.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticClip {
    pub width: u32,
    pub height: u32,
    /// Frame count reported by [`SourceInfo`].
    pub frame_count: u64,
    pub frame_rate: FrameRate,
    /// Maximum per-frame shake, in whole pixels.
    pub jitter: u32,
    pub seed: u64,
    /// Frames that can actually be decoded, if fewer than `frame_count`.
    pub readable_frames: Option<u64>,
}

impl SyntheticClip {
    pub fn new(width: u32, height: u32, frame_count: u64, frame_rate: FrameRate) -> Self {
        Self {
            width,
            height,
            frame_count,
            frame_rate,
            jitter: 0,
            seed: 1,
            readable_frames: None,
        }
    }

    pub fn with_jitter(mut self, jitter: u32, seed: u64) -> Self {
        self.jitter = jitter;
        self.seed = seed;
        self
    }

    /// Make the stream end early, after `frames` decodable frames.
    pub fn with_readable_frames(mut self, frames: u64) -> Self {
        self.readable_frames = Some(frames);
        self
    }

    pub fn info(&self) -> SourceInfo {
        SourceInfo {
            width: self.width,
            height: self.height,
            frame_rate: self.frame_rate,
            frame_count: self.frame_count,
        }
    }

    fn readable(&self) -> u64 {
        self.readable_frames.unwrap_or(self.frame_count).min(self.frame_count)
    }

    /// Camera offset of frame `index`.
    pub fn offset(&self, index: u64) -> (i64, i64) {
        if self.jitter == 0 {
            return (0, 0);
        }
        let span = 2 * self.jitter as u64 + 1;
        let mut h = self
            .seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(index.wrapping_mul(1442695040888963407));
        h ^= h >> 29;
        let dx = (h % span) as i64 - self.jitter as i64;
        let dy = ((h >> 32) % span) as i64 - self.jitter as i64;
        (dx, dy)
    }

    /// Render frame `index`. Its index is stamped into the first two pixels.
    pub fn render(&self, index: u64) -> FrameBuffer {
        let mut frame = FrameBuffer::new(self.width, self.height, PixelFormat::Rgb8);
        let (ox, oy) = self.offset(index);
        for y in 0..self.height {
            let sy = y as i64 - oy;
            let row = frame.row_mut(y);
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                let sx = x as i64 - ox;
                let bx = sx.div_euclid(BLOCK) as u64;
                let by = sy.div_euclid(BLOCK) as u64;
                let h = (bx.wrapping_mul(73_856_093) ^ by.wrapping_mul(19_349_663))
                    .wrapping_mul(2_654_435_761);
                px[0] = (h >> 24) as u8;
                px[1] = (h >> 32) as u8;
                px[2] = (h >> 40) as u8;
            }
        }
        stamp_index(&mut frame, index);
        frame
    }

    /// Recover the index stamped by [`SyntheticClip::render`].
    pub fn stamped_index(frame: &FrameBuffer) -> Option<u64> {
        if frame.width < 2 || frame.height < 1 || frame.format != PixelFormat::Rgb8 {
            return None;
        }
        let lo = frame.pixel(0, 0)[0] as u64;
        let hi = frame.pixel(1, 0)[0] as u64;
        Some((hi << 8) | lo)
    }
}

fn stamp_index(frame: &mut FrameBuffer, index: u64) {
    if frame.width < 2 || frame.height < 1 {
        return;
    }
    let row = frame.row_mut(0);
    row[0..3].fill((index & 0xff) as u8);
    row[3..6].fill(((index >> 8) & 0xff) as u8);
}

/// Frames captured by a sink.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub format: ExportFormat,
    pub frames: Vec<FrameBuffer>,
    pub finished: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    clips: HashMap<PathBuf, SyntheticClip>,
    outputs: HashMap<PathBuf, CapturedOutput>,
    failing_sinks: HashSet<PathBuf>,
    /// Sinks whose encoder dies after accepting this many frames.
    write_limits: HashMap<PathBuf, u64>,
}

/// Backend that generates sources and captures sinks in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    open_sources: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `clip` when `path` is opened.
    pub fn add_clip(&self, path: impl Into<PathBuf>, clip: SyntheticClip) {
        self.state.lock().clips.insert(path.into(), clip);
    }

    /// Make opening a sink at `path` fail.
    pub fn fail_sink(&self, path: impl Into<PathBuf>) {
        self.state.lock().failing_sinks.insert(path.into());
    }

    /// Let a sink at `path` open but reject every frame after the first
    /// `accepted`.
    pub fn fail_writes_after(&self, path: impl Into<PathBuf>, accepted: u64) {
        self.state.lock().write_limits.insert(path.into(), accepted);
    }

    /// What was written to `path`, if a sink was opened there.
    pub fn output(&self, path: &Path) -> Option<CapturedOutput> {
        self.state.lock().outputs.get(path).cloned()
    }

    pub fn output_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.state.lock().outputs.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Sources opened and not yet dropped.
    pub fn open_source_count(&self) -> usize {
        self.open_sources.load(Ordering::SeqCst)
    }
}

enum Frames {
    Synthetic(SyntheticClip),
    Captured(Arc<Vec<FrameBuffer>>),
}

struct MemorySource {
    info: SourceInfo,
    frames: Frames,
    next: u64,
    live: Arc<AtomicUsize>,
}

impl FrameSource for MemorySource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn seek(&mut self, frame_index: u64) -> Result<()> {
        if frame_index >= self.info.frame_count {
            return Err(ReelError::InvalidParameter(format!(
                "Frame {} out of range (0-{})",
                frame_index,
                self.info.frame_count.saturating_sub(1)
            )));
        }
        self.next = frame_index;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<FrameBuffer>> {
        let frame = match &self.frames {
            Frames::Synthetic(clip) => {
                (self.next < clip.readable()).then(|| clip.render(self.next))
            }
            Frames::Captured(frames) => frames.get(self.next as usize).cloned(),
        };
        if frame.is_some() {
            self.next += 1;
        }
        Ok(frame)
    }
}

impl Drop for MemorySource {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MemorySink {
    path: PathBuf,
    format: ExportFormat,
    state: Arc<Mutex<MemoryState>>,
    written: u64,
    limit: Option<u64>,
    finished: bool,
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, frame: &FrameBuffer) -> Result<()> {
        if self.finished {
            return Err(ReelError::Encoder("Sink already finished".into()));
        }
        if frame.width != self.format.width || frame.height != self.format.height {
            return Err(ReelError::InvalidParameter(format!(
                "Sink expects {}x{} frames, got {}x{}",
                self.format.width, self.format.height, frame.width, frame.height
            )));
        }
        if self.limit.is_some_and(|limit| self.written >= limit) {
            return Err(ReelError::Encoder(format!(
                "Encoder for {} exited after {} frames",
                self.path.display(),
                self.written
            )));
        }
        let mut state = self.state.lock();
        let output = state.outputs.entry(self.path.clone()).or_default();
        output.frames.push(frame.clone());
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        if let Some(output) = self.state.lock().outputs.get_mut(&self.path) {
            output.finished = true;
        }
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.written
    }
}

impl MediaBackend for MemoryBackend {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        let state = self.state.lock();
        let (info, frames) = if let Some(clip) = state.clips.get(path) {
            (clip.info(), Frames::Synthetic(clip.clone()))
        } else if let Some(output) = state.outputs.get(path).filter(|o| o.finished) {
            let info = SourceInfo {
                width: output.format.width,
                height: output.format.height,
                frame_rate: output.format.frame_rate,
                frame_count: output.frames.len() as u64,
            };
            (info, Frames::Captured(Arc::new(output.frames.clone())))
        } else {
            return Err(ReelError::NotFound(format!(
                "File not found: {}",
                path.display()
            )));
        };
        self.open_sources.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySource {
            info,
            frames,
            next: 0,
            live: Arc::clone(&self.open_sources),
        }))
    }

    fn open_sink(&self, path: &Path, format: &ExportFormat) -> Result<Box<dyn FrameSink>> {
        let mut state = self.state.lock();
        if state.failing_sinks.contains(path) {
            return Err(ReelError::Encoder(format!(
                "Could not open writer for: {}",
                path.display()
            )));
        }
        state.outputs.insert(
            path.to_path_buf(),
            CapturedOutput {
                format: format.clone(),
                frames: Vec::new(),
                finished: false,
            },
        );
        Ok(Box::new(MemorySink {
            path: path.to_path_buf(),
            format: format.clone(),
            state: Arc::clone(&self.state),
            written: 0,
            limit: state.write_limits.get(path).copied(),
            finished: false,
        }))
    }
}
