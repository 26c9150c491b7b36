//! Video decoder using FFmpeg via ffmpeg-sidecar.

use crate::probe::MediaProbe;
use crate::{FrameSource, SourceInfo};
use ffmpeg_sidecar::child::FfmpegChild;
use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel};
use ffmpeg_sidecar::iter::FfmpegIterator;
use reelfix_core::{FrameBuffer, PixelFormat, ReelError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

struct DecodeProcess {
    child: FfmpegChild,
    events: FfmpegIterator,
}

impl DecodeProcess {
    fn shutdown(&mut self) {
        // Killing an already exited child is not an error worth reporting.
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Decodes packed RGB frames from a video file.
///
/// FFmpeg runs as a child process writing `rawvideo` to stdout. Seeking
/// restarts the process with a `trim` filter so the first frame produced is
/// exactly the requested index.
pub struct VideoDecoder {
    path: PathBuf,
    ffmpeg: PathBuf,
    info: SourceInfo,
    /// Index of the frame the next read returns.
    next_frame: u64,
    process: Option<DecodeProcess>,
    finished: bool,
}

impl VideoDecoder {
    /// Open a video file for decoding with the `ffmpeg` and `ffprobe` found
    /// on `PATH`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(Path::new("ffmpeg"), Path::new("ffprobe"), path)
    }

    /// Open a video file using the given tool executables.
    pub fn open_with<P: AsRef<Path>>(ffmpeg: &Path, ffprobe: &Path, path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), ffmpeg = %ffmpeg.display(), "opening video file");
        let probe = MediaProbe::probe_with(ffprobe, path)?;
        let mut decoder = Self {
            path: path.to_path_buf(),
            ffmpeg: ffmpeg.to_path_buf(),
            info: probe.source_info(),
            next_frame: 0,
            process: None,
            finished: false,
        };
        decoder.spawn_at(0)?;
        Ok(decoder)
    }

    fn spawn_at(&mut self, frame_index: u64) -> Result<()> {
        self.stop();
        let path = self.path.to_string_lossy().into_owned();
        let mut command = FfmpegCommand::new_with_path(&self.ffmpeg);
        command.hide_banner().input(path).args(["-map", "0:v:0", "-an"]);
        if frame_index > 0 {
            command.args([
                "-vf".to_string(),
                format!("trim=start_frame={frame_index},setpts=PTS-STARTPTS"),
            ]);
        }
        command.rawvideo();

        let mut child = command
            .spawn()
            .map_err(|e| ReelError::Decoder(format!("Failed to spawn ffmpeg: {e}")))?;
        let events = child
            .iter()
            .map_err(|e| ReelError::Decoder(format!("Failed to read ffmpeg output: {e}")))?;
        debug!(frame = frame_index, "decoder started");

        self.process = Some(DecodeProcess { child, events });
        self.next_frame = frame_index;
        self.finished = false;
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.shutdown();
        }
    }
}

impl FrameSource for VideoDecoder {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn seek(&mut self, frame_index: u64) -> Result<()> {
        if self.info.frame_count > 0 && frame_index >= self.info.frame_count {
            return Err(ReelError::InvalidParameter(format!(
                "Frame {} out of range (0-{})",
                frame_index,
                self.info.frame_count - 1
            )));
        }
        if frame_index == self.next_frame && self.process.is_some() && !self.finished {
            return Ok(());
        }
        self.spawn_at(frame_index)
    }

    fn read_frame(&mut self) -> Result<Option<FrameBuffer>> {
        if self.finished {
            return Ok(None);
        }
        let Some(process) = self.process.as_mut() else {
            return Ok(None);
        };
        loop {
            match process.events.next() {
                Some(FfmpegEvent::OutputFrame(frame)) => {
                    let buffer =
                        FrameBuffer::from_raw(frame.width, frame.height, PixelFormat::Rgb8, frame.data)?;
                    self.next_frame += 1;
                    return Ok(Some(buffer));
                }
                Some(FfmpegEvent::Log(LogLevel::Error | LogLevel::Fatal, msg)) => {
                    warn!(path = %self.path.display(), "ffmpeg: {msg}");
                }
                Some(FfmpegEvent::Error(msg)) => {
                    warn!(path = %self.path.display(), "decoder error: {msg}");
                }
                Some(FfmpegEvent::Done) | None => {
                    self.finished = true;
                    return Ok(None);
                }
                Some(_) => {}
            }
        }
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        self.stop();
    }
}
