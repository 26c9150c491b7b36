//! Encoding frames to video files.
//!
//! Frames are piped as `rawvideo` into an FFmpeg child process which encodes
//! and muxes them.

use crate::FrameSink;
use reelfix_core::{FrameBuffer, FrameRate, PixelFormat, ReelError, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;
use tracing::{debug, warn};

// ── Format presets ──────────────────────────────────────────────

/// Video codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// MPEG-4 Part 2 (`mp4v`), available in every FFmpeg build.
    #[default]
    Mpeg4,
    H264,
    H265,
    ProRes422,
}

impl VideoCodec {
    /// FFmpeg encoder name.
    pub fn ffmpeg_encoder(self) -> &'static str {
        match self {
            Self::Mpeg4 => "mpeg4",
            Self::H264 => "libx264",
            Self::H265 => "libx265",
            Self::ProRes422 => "prores_ks",
        }
    }

    /// File extension for this codec.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mpeg4 | Self::H264 | Self::H265 => "mp4",
            Self::ProRes422 => "mov",
        }
    }
}

/// Export format configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportFormat {
    pub video_codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    /// CRF value for H.264/H.265 (0-51, lower = better).
    pub crf: Option<u32>,
    /// Fixed quantizer for MPEG-4 (1-31, lower = better).
    pub qscale: Option<u32>,
    /// Output pixel format.
    pub pixel_format: String,
}

impl Default for ExportFormat {
    fn default() -> Self {
        Self {
            video_codec: VideoCodec::Mpeg4,
            width: 0,
            height: 0,
            frame_rate: FrameRate::FPS_30,
            crf: None,
            qscale: Some(3),
            pixel_format: "yuv420p".into(),
        }
    }
}

impl ExportFormat {
    /// This format resized to a clip's dimensions and rate.
    pub fn for_clip(&self, width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            frame_rate: FrameRate::from_fps_f64(fps),
            ..self.clone()
        }
    }

    /// Build the FFmpeg command arguments for writing to `output`.
    pub fn ffmpeg_args(&self, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pixel_format".into(),
            PixelFormat::Rgb8.ffmpeg_name().into(),
            "-video_size".into(),
            format!("{}x{}", self.width, self.height),
            "-framerate".into(),
            format!(
                "{}/{}",
                self.frame_rate.numerator,
                self.frame_rate.denominator.max(1)
            ),
            "-i".into(),
            "pipe:0".into(),
            "-c:v".into(),
            self.video_codec.ffmpeg_encoder().into(),
        ];

        match self.video_codec {
            VideoCodec::Mpeg4 => {
                if let Some(q) = self.qscale {
                    args.extend(["-q:v".into(), q.to_string()]);
                }
            }
            VideoCodec::H264 | VideoCodec::H265 => {
                if let Some(crf) = self.crf {
                    args.extend(["-crf".into(), crf.to_string()]);
                }
            }
            VideoCodec::ProRes422 => args.extend(["-profile:v".into(), "2".into()]),
        }

        args.extend(["-pix_fmt".into(), self.pixel_format.clone()]);
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

// ── Encoder process ─────────────────────────────────────────────

/// Frame sink that pipes RGB frames into `ffmpeg`.
///
/// The encoder's stderr is drained on a background thread and attached to
/// the error when a write or the final flush fails.
pub struct FfmpegSink {
    path: PathBuf,
    format: ExportFormat,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
    frames_written: u64,
    finished: bool,
}

impl FfmpegSink {
    /// Spawn the encoder. `ffmpeg` is the executable to run.
    pub fn create(ffmpeg: &Path, path: &Path, format: &ExportFormat) -> Result<Self> {
        if format.width == 0 || format.height == 0 {
            return Err(ReelError::InvalidParameter(format!(
                "Cannot encode {}x{} frames",
                format.width, format.height
            )));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                return Err(ReelError::NotFound(format!(
                    "Output directory does not exist: {}",
                    parent.display()
                )));
            }
        }

        let args = format.ffmpeg_args(path);
        debug!(?args, "spawning encoder");
        let mut child = Command::new(ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ReelError::Encoder(format!("Failed to spawn ffmpeg: {e}")))?;

        let stdin = match child.stdin.take() {
            Some(stdin) => stdin,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ReelError::Encoder("Failed to open ffmpeg stdin".into()));
            }
        };

        let stderr = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut log = Vec::new();
                let _ = pipe.read_to_end(&mut log);
                String::from_utf8_lossy(&log).into_owned()
            })
        });

        Ok(Self {
            path: path.to_path_buf(),
            format: format.clone(),
            child,
            stdin: Some(stdin),
            stderr,
            frames_written: 0,
            finished: false,
        })
    }

    fn take_log(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default()
    }

    /// Stop the encoder after `what` went wrong and report why it failed.
    fn failure(&mut self, what: String) -> ReelError {
        self.finished = true;
        drop(self.stdin.take());
        let status = match self.child.wait() {
            Ok(status) => status.to_string(),
            Err(e) => format!("not reaped: {e}"),
        };
        let log = self.take_log();
        let log = log.trim();
        if log.is_empty() {
            ReelError::Encoder(format!("{what}; ffmpeg {status}"))
        } else {
            ReelError::Encoder(format!("{what}; ffmpeg {status}: {log}"))
        }
    }
}

impl FrameSink for FfmpegSink {
    fn write_frame(&mut self, frame: &FrameBuffer) -> Result<()> {
        if frame.width != self.format.width
            || frame.height != self.format.height
            || frame.format != PixelFormat::Rgb8
        {
            return Err(ReelError::InvalidParameter(format!(
                "Encoder expects {}x{} RGB frames, got {}x{} {:?}",
                self.format.width, self.format.height, frame.width, frame.height, frame.format
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ReelError::Encoder("Encoder already finished".into()))?;
        if let Err(e) = stdin.write_all(&frame.data) {
            return Err(self.failure(format!("Failed to write frame {}: {e}", self.frames_written)));
        }
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        // Close stdin to signal end-of-stream
        drop(self.stdin.take());

        let status = self
            .child
            .wait()
            .map_err(|e| ReelError::Encoder(format!("Failed to wait for ffmpeg: {e}")))?;
        if !status.success() {
            return Err(self.failure("Encoding did not complete".into()));
        }
        let log = self.take_log();
        if !log.trim().is_empty() {
            debug!(path = %self.path.display(), "ffmpeg: {}", log.trim());
        }
        debug!(path = %self.path.display(), frames = self.frames_written, "encoder finished");
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if !self.finished {
            warn!(path = %self.path.display(), "encoder dropped before finish, killing it");
            drop(self.stdin.take());
            let _ = self.child.kill();
            let _ = self.child.wait();
            self.take_log();
        }
    }
}
