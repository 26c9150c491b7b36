//! Frame rates and frame-window resolution.
//!
//! Containers report frame rates as rationals (`30000/1001`); processing works
//! in frame indices, so everything a caller asks for in seconds is resolved to
//! an inclusive frame range once, up front.

use crate::error::{ReelError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rate used when a container reports no usable frame rate.
pub const DEFAULT_FPS: f64 = 30.0;

/// Rates at or below this are treated as missing.
pub const MIN_PLAUSIBLE_FPS: f64 = 1e-3;

/// Frame rate as a rational number (e.g., 24000/1001 for 23.976 fps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    /// Numerator (e.g., 24000)
    pub numerator: u32,
    /// Denominator (e.g., 1001)
    pub denominator: u32,
}

impl FrameRate {
    /// Create a new frame rate.
    #[inline]
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Approximate a floating-point rate with a millisecond-precision rational.
    pub fn from_fps_f64(fps: f64) -> Self {
        if (fps - fps.round()).abs() < 1e-9 && fps >= 0.0 {
            return Self::new(fps.round() as u32, 1);
        }
        Self::new((fps.max(0.0) * 1000.0).round() as u32, 1000)
    }

    /// Parse FFmpeg's `num/den` notation (a bare number is accepted too).
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let bad = || ReelError::InvalidParameter(format!("Bad frame rate '{}'", s));
        match s.split_once('/') {
            Some((n, d)) => {
                let n = n.trim().parse::<u32>().map_err(|_| bad())?;
                let d = d.trim().parse::<u32>().map_err(|_| bad())?;
                Ok(Self::new(n, d))
            }
            None => s.parse::<f64>().map(Self::from_fps_f64).map_err(|_| bad()),
        }
    }

    /// Convert to frames per second as f64. A zero denominator yields 0.
    #[inline]
    pub fn to_fps_f64(self) -> f64 {
        if self.denominator == 0 {
            return 0.0;
        }
        self.numerator as f64 / self.denominator as f64
    }

    /// Whether the rate is usable for timing.
    pub fn is_plausible(self) -> bool {
        self.to_fps_f64() > MIN_PLAUSIBLE_FPS
    }

    /// The rate in fps, or `fallback` when the reported rate is missing.
    pub fn fps_or(self, fallback: f64) -> f64 {
        if self.is_plausible() {
            self.to_fps_f64()
        } else {
            fallback
        }
    }

    pub const FPS_24: Self = Self::new(24, 1);
    pub const FPS_25: Self = Self::new(25, 1);
    pub const FPS_29_97: Self = Self::new(30000, 1001);
    pub const FPS_30: Self = Self::new(30, 1);
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::FPS_30
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fps = self.to_fps_f64();
        if (fps - fps.round()).abs() < 0.001 {
            write!(f, "{} fps", fps.round() as u32)
        } else {
            write!(f, "{:.3} fps", fps)
        }
    }
}

/// An inclusive frame range within a source, with the rate used to resolve it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameWindow {
    pub start_frame: u64,
    pub end_frame: u64,
    pub fps: f64,
}

impl FrameWindow {
    /// Resolve a requested `[start_s, end_s]` range against a source with
    /// `total_frames` frames.
    ///
    /// `end_s == None` runs to the last frame. A collapsed or inverted request
    /// is widened to about one second of frames, clamped to the source.
    pub fn resolve(total_frames: u64, fps: f64, start_s: f64, end_s: Option<f64>) -> Result<Self> {
        if total_frames == 0 {
            return Err(ReelError::EmptyWindow("source has no frames".into()));
        }
        if fps.is_nan() || fps <= MIN_PLAUSIBLE_FPS {
            return Err(ReelError::InvalidParameter(format!("frame rate {fps} is not usable")));
        }
        let last = total_frames - 1;
        let to_frame = |seconds: f64| -> u64 {
            let f = (seconds * fps).round();
            if f.is_nan() || f <= 0.0 {
                0
            } else {
                (f as u64).min(last)
            }
        };

        let start_frame = to_frame(start_s);
        let mut end_frame = match end_s {
            Some(e) => to_frame(e).max(start_frame),
            None => last,
        };
        if end_frame <= start_frame {
            let one_second = (fps.floor() as u64).max(1);
            end_frame = start_frame.saturating_add(one_second).min(last);
        }

        Ok(Self {
            start_frame,
            end_frame,
            fps,
        })
    }

    /// Number of frames in the window.
    #[inline]
    pub fn len(&self) -> u64 {
        self.end_frame - self.start_frame + 1
    }

    /// A window always contains at least one frame.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Start of the window in seconds.
    pub fn start_seconds(&self) -> f64 {
        self.start_frame as f64 / self.fps
    }

    /// Last frame of the window in seconds.
    pub fn end_seconds(&self) -> f64 {
        self.end_frame as f64 / self.fps
    }

    /// Shrink the window so it ends at `end_frame` (never before the start).
    pub fn truncated(self, end_frame: u64) -> Self {
        Self {
            end_frame: end_frame.clamp(self.start_frame, self.end_frame),
            ..self
        }
    }
}

impl fmt::Display for FrameWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frames {}..={} ({:.3}s-{:.3}s)",
            self.start_frame,
            self.end_frame,
            self.start_seconds(),
            self.end_seconds()
        )
    }
}
