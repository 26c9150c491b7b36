//! Re-muxing a window of the original audio onto a processed clip.

use reelfix_core::{ReelError, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

/// Copies the processed video stream and the matching audio segment of the
/// original file into a new container.
#[derive(Debug, Clone)]
pub struct AudioRemux {
    ffmpeg: PathBuf,
}

impl AudioRemux {
    /// Use the given `ffmpeg` executable.
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    /// Find `ffmpeg` on `PATH`.
    pub fn locate() -> Option<Self> {
        which::which("ffmpeg").ok().map(Self::new)
    }

    /// Arguments for muxing `processed`'s video with the audio of `original`
    /// cut to `[start_s, end_s]`.
    pub fn merge_args(
        original: &Path,
        processed: &Path,
        output: &Path,
        start_s: f64,
        end_s: Option<f64>,
    ) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-loglevel".into(), "error".into()];
        if start_s > 0.0 {
            args.extend(["-ss".into(), format!("{start_s:.3}")]);
        }
        if let Some(end) = end_s.filter(|&e| e > start_s) {
            args.extend(["-t".into(), format!("{:.3}", end - start_s)]);
        }
        args.extend(["-i".into(), original.to_string_lossy().into_owned()]);
        args.extend(["-i".into(), processed.to_string_lossy().into_owned()]);
        args.extend(
            [
                "-map", "1:v:0", "-map", "0:a:0?", "-c:v", "copy", "-c:a", "aac", "-shortest",
            ]
            .map(String::from),
        );
        args.push(output.to_string_lossy().into_owned());
        args
    }

    /// Write `output` with the processed video and the original's audio window.
    pub fn merge_window(
        &self,
        original: &Path,
        processed: &Path,
        output: &Path,
        start_s: f64,
        end_s: Option<f64>,
    ) -> Result<()> {
        let args = Self::merge_args(original, processed, output, start_s, end_s);
        debug!(?args, "remuxing audio");
        let out = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| ReelError::Tool(format!("Failed to run ffmpeg: {e}")))?;
        if !out.status.success() {
            return Err(ReelError::Tool(format!(
                "ffmpeg audio merge failed ({}): {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(())
    }

    /// Replace the silent `processed` file with a version carrying the
    /// original's audio. On failure `processed` is left untouched.
    pub fn replace_with_audio(
        &self,
        original: &Path,
        processed: &Path,
        start_s: f64,
        end_s: Option<f64>,
    ) -> Result<()> {
        let temp = with_audio_path(processed);
        if let Err(e) = self.merge_window(original, processed, &temp, start_s, end_s) {
            let _ = std::fs::remove_file(&temp);
            return Err(e);
        }
        std::fs::rename(&temp, processed).map_err(|e| {
            warn!(path = %temp.display(), "could not replace silent output: {e}");
            ReelError::Io(e)
        })?;
        info!(path = %processed.display(), "audio merged");
        Ok(())
    }
}

/// Sibling path used for the intermediate remuxed file.
pub fn with_audio_path(processed: &Path) -> PathBuf {
    let stem = processed
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = processed
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mp4".into());
    processed.with_file_name(format!("{stem}_aud.{ext}"))
}
