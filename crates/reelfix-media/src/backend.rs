//! Media backend driving the external FFmpeg tools.

use crate::decoder::VideoDecoder;
use crate::export::{ExportFormat, FfmpegSink};
use crate::{FrameSink, FrameSource, MediaBackend};
use reelfix_core::{ReelError, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Decodes with ffmpeg-sidecar and encodes through a piped `ffmpeg` process.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegBackend {
    /// Look up `ffmpeg` and `ffprobe` on `PATH`.
    pub fn locate() -> Result<Self> {
        let ffmpeg = which::which("ffmpeg")
            .map_err(|_| ReelError::Tool("ffmpeg not found on PATH".into()))?;
        let ffprobe = which::which("ffprobe")
            .map_err(|_| ReelError::Tool("ffprobe not found on PATH".into()))?;
        info!(ffmpeg = %ffmpeg.display(), ffprobe = %ffprobe.display(), "using system ffmpeg");
        Ok(Self { ffmpeg, ffprobe })
    }

    /// Use this `ffmpeg` executable and the `ffprobe` beside it.
    pub fn with_ffmpeg(ffmpeg: impl Into<PathBuf>) -> Self {
        let ffmpeg = ffmpeg.into();
        let ffprobe = sibling_ffprobe(&ffmpeg);
        Self { ffmpeg, ffprobe }
    }
}

/// `ffprobe` in the same directory as `ffmpeg`, keeping any extension.
fn sibling_ffprobe(ffmpeg: &Path) -> PathBuf {
    let name = match ffmpeg.extension() {
        Some(ext) => format!("ffprobe.{}", ext.to_string_lossy()),
        None => "ffprobe".to_string(),
    };
    ffmpeg.with_file_name(name)
}

impl MediaBackend for FfmpegBackend {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(VideoDecoder::open_with(&self.ffmpeg, &self.ffprobe, path)?))
    }

    fn open_sink(&self, path: &Path, format: &ExportFormat) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(FfmpegSink::create(&self.ffmpeg, path, format)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffprobe_sits_beside_ffmpeg() {
        let backend = FfmpegBackend::with_ffmpeg("/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(backend.ffprobe, PathBuf::from("/opt/ffmpeg/bin/ffprobe"));
        let backend = FfmpegBackend::with_ffmpeg(r"tools/ffmpeg.exe");
        assert_eq!(backend.ffprobe, PathBuf::from("tools/ffprobe.exe"));
        assert_eq!(sibling_ffprobe(Path::new("ffmpeg")), PathBuf::from("ffprobe"));
    }

    #[test]
    fn test_sources_are_probed_with_configured_tool() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let backend = FfmpegBackend::with_ffmpeg("/nonexistent/reelfix-tools/ffmpeg");
        let err = match backend.open_source(file.path()) {
            Ok(_) => panic!("open should fail without the tools"),
            Err(e) => e,
        };
        match err {
            ReelError::Tool(msg) => assert!(msg.contains("/nonexistent/reelfix-tools/ffprobe"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
