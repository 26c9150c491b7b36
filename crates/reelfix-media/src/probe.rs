//! Media file probing to get stream metadata without a full decode.

use crate::SourceInfo;
use reelfix_core::{FrameRate, ReelError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Properties of the first video stream of a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaProbe {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub frame_count: u64,
    /// Stream duration in seconds, when reported.
    pub duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    nb_read_packets: Option<String>,
    duration: Option<String>,
}

impl MediaProbe {
    /// Probe a media file with the `ffprobe` on `PATH`.
    pub fn probe<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::probe_with(Path::new("ffprobe"), path)
    }

    /// Probe a media file with the given `ffprobe` executable.
    pub fn probe_with<P: AsRef<Path>>(ffprobe: &Path, path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ReelError::NotFound(format!(
                "File not found: {}",
                path.display()
            )));
        }

        let output = Command::new(ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-count_packets",
                "-show_entries",
                "stream=width,height,r_frame_rate,avg_frame_rate,nb_frames,nb_read_packets,duration",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ReelError::Tool(format!("ffprobe not found: {}", ffprobe.display()))
                }
                _ => ReelError::Io(e),
            })?;

        if !output.status.success() {
            return Err(ReelError::Media(format!(
                "ffprobe failed on {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Self::from_json(path, &String::from_utf8_lossy(&output.stdout))
    }

    /// Interpret `ffprobe -of json` output.
    pub fn from_json(path: &Path, json: &str) -> Result<Self> {
        let parsed: FfprobeOutput =
            serde_json::from_str(json).map_err(|e| ReelError::Serialization(e.to_string()))?;
        let stream = parsed.streams.into_iter().next().ok_or_else(|| {
            ReelError::UnsupportedFormat(format!("No video stream in {}", path.display()))
        })?;

        let (width, height) = match (stream.width, stream.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => {
                return Err(ReelError::UnsupportedFormat(format!(
                    "Video stream of {} has no dimensions",
                    path.display()
                )))
            }
        };

        let parse_rate = |s: &Option<String>| s.as_deref().and_then(|r| FrameRate::parse(r).ok());
        let frame_rate = parse_rate(&stream.avg_frame_rate)
            .filter(|r| r.is_plausible())
            .or_else(|| parse_rate(&stream.r_frame_rate))
            .unwrap_or(FrameRate::new(0, 0));

        let duration = stream
            .duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0);
        let count_of = |s: &Option<String>| {
            s.as_deref()
                .and_then(|n| n.parse::<u64>().ok())
                .filter(|&n| n > 0)
        };
        let frame_count = count_of(&stream.nb_frames)
            .or_else(|| count_of(&stream.nb_read_packets))
            .or_else(|| {
                let fps = frame_rate.to_fps_f64();
                duration
                    .filter(|_| frame_rate.is_plausible())
                    .map(|d| (d * fps).round() as u64)
            })
            .unwrap_or(0);

        debug!(
            path = %path.display(),
            width,
            height,
            %frame_rate,
            frame_count,
            "probed"
        );
        Ok(Self {
            path: path.to_path_buf(),
            width,
            height,
            frame_rate,
            frame_count,
            duration,
        })
    }

    pub fn source_info(&self) -> SourceInfo {
        SourceInfo {
            width: self.width,
            height: self.height,
            frame_rate: self.frame_rate,
            frame_count: self.frame_count,
        }
    }
}
