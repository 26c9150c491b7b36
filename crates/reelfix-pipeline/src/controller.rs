//! Windowed pipeline controller: resolve a time window, estimate motion over
//! it, then compensate, enhance and encode it.

use crate::ClipError;
use reelfix_core::{FrameWindow, Transform, DEFAULT_FPS};
use reelfix_effects::{compensate, EnhancementParams};
use reelfix_media::{ExportFormat, FrameSource, MediaBackend};
use reelfix_tracking::{smooth_trajectory, GrayImage, MotionAccumulator, MotionParams};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Which operations to run on a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClipFlags {
    pub stabilize: bool,
    pub denoise: bool,
    pub sharpen: bool,
}

impl ClipFlags {
    /// Read flags from free-form enhancement names such as `"Stabilize"` or
    /// `"denoising"`.
    pub fn from_enhancements<S: AsRef<str>>(names: &[S]) -> Self {
        let has = |needle: &str| {
            names
                .iter()
                .any(|n| n.as_ref().to_lowercase().contains(needle))
        };
        Self {
            stabilize: has("stabil"),
            denoise: has("denois"),
            sharpen: has("sharpen"),
        }
    }

    /// Short label used in output file names.
    pub fn tag(&self) -> String {
        let parts: Vec<&str> = [
            (self.stabilize, "stab"),
            (self.denoise, "denoise"),
            (self.sharpen, "sharp"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect();
        if parts.is_empty() {
            "copy".into()
        } else {
            parts.join("_")
        }
    }
}

/// Requested time window, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WindowRequest {
    pub start_s: f64,
    /// `None` runs to the end of the source.
    pub end_s: Option<f64>,
}

impl WindowRequest {
    pub fn new(start_s: f64, end_s: Option<f64>) -> Self {
        Self { start_s, end_s }
    }
}

/// Tunables shared by every clip.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub motion: MotionParams,
    pub smoothing_radius: usize,
    pub enhancement: EnhancementParams,
    /// Rate assumed when the source reports none.
    pub fps_fallback: f64,
    pub export: ExportFormat,
    /// Log progress every this many frames.
    pub progress_interval: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            motion: MotionParams::default(),
            smoothing_radius: 30,
            enhancement: EnhancementParams::default(),
            fps_fallback: DEFAULT_FPS,
            export: ExportFormat::default(),
            progress_interval: 50,
        }
    }
}

/// A successfully written clip.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedClip {
    pub fps: f64,
    /// The frames actually written.
    pub window: FrameWindow,
    pub frames_written: u64,
}

impl ProcessedClip {
    pub fn start_used(&self) -> f64 {
        self.window.start_seconds()
    }

    pub fn end_used(&self) -> f64 {
        self.window.end_seconds()
    }
}

/// Outcome of [`Controller::process`], successful or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClipResult {
    pub ok: bool,
    pub fps: f64,
    pub start_used: f64,
    pub end_used: f64,
    pub frames_written: u64,
    pub error: Option<String>,
}

/// What is known about a clip so far; survives a failure part way through.
#[derive(Debug, Default)]
struct ClipReport {
    fps: f64,
    window: Option<FrameWindow>,
    frames_written: u64,
}

/// Runs the two-pass window pipeline for one clip at a time.
#[derive(Debug, Clone, Default)]
pub struct Controller {
    pub settings: ControllerSettings,
}

impl Controller {
    pub fn new(settings: ControllerSettings) -> Self {
        Self { settings }
    }

    /// Process a clip, capturing any failure in the returned result.
    pub fn process(
        &self,
        backend: &dyn MediaBackend,
        source_path: &Path,
        sink_path: &Path,
        request: WindowRequest,
        flags: ClipFlags,
    ) -> ClipResult {
        let mut report = ClipReport::default();
        let outcome = self.run(backend, source_path, sink_path, request, flags, &mut report);
        let (start_used, end_used) = report
            .window
            .map(|w| (w.start_seconds(), w.end_seconds()))
            .unwrap_or((request.start_s, request.end_s.unwrap_or(request.start_s)));
        let error = match outcome {
            Ok(()) => None,
            Err(e) => {
                error!("{e}");
                Some(e.to_string())
            }
        };
        ClipResult {
            ok: error.is_none(),
            fps: report.fps,
            start_used,
            end_used,
            frames_written: report.frames_written,
            error,
        }
    }

    /// Process a clip, returning the window actually written.
    pub fn try_process(
        &self,
        backend: &dyn MediaBackend,
        source_path: &Path,
        sink_path: &Path,
        request: WindowRequest,
        flags: ClipFlags,
    ) -> Result<ProcessedClip, ClipError> {
        let mut report = ClipReport::default();
        self.run(backend, source_path, sink_path, request, flags, &mut report)?;
        let window = report.window.ok_or_else(|| ClipError::EmptyWindow {
            path: source_path.to_path_buf(),
            detail: "no window resolved".into(),
        })?;
        Ok(ProcessedClip {
            fps: report.fps,
            window,
            frames_written: report.frames_written,
        })
    }

    fn run(
        &self,
        backend: &dyn MediaBackend,
        source_path: &Path,
        sink_path: &Path,
        request: WindowRequest,
        flags: ClipFlags,
        report: &mut ClipReport,
    ) -> Result<(), ClipError> {
        let stream_err = |source| ClipError::Stream {
            path: source_path.to_path_buf(),
            source,
        };

        // Open & resolve
        let mut source = backend
            .open_source(source_path)
            .map_err(|source| ClipError::SourceOpen {
                path: source_path.to_path_buf(),
                source,
            })?;
        let info = *source.info();
        let fps = info.fps_or(self.settings.fps_fallback);
        report.fps = fps;
        let mut window = FrameWindow::resolve(info.frame_count, fps, request.start_s, request.end_s)
            .map_err(|e| ClipError::EmptyWindow {
                path: source_path.to_path_buf(),
                detail: e.to_string(),
            })?;
        report.window = Some(window);
        info!(
            source = %source_path.display(),
            %window,
            stabilize = flags.stabilize,
            denoise = flags.denoise,
            sharpen = flags.sharpen,
            "processing clip"
        );

        // Pass A: motion over the window
        let compensation: Vec<Transform> = if flags.stabilize {
            let (transforms, seen) = self.estimate_motion(source.as_mut(), window, source_path)?;
            if seen < window.len() {
                warn!(
                    source = %source_path.display(),
                    expected = window.len(),
                    read = seen,
                    "stream ended early, truncating window"
                );
                window = window.truncated(window.start_frame + seen - 1);
                report.window = Some(window);
            }
            let corrections = smooth_trajectory(&transforms, self.settings.smoothing_radius);
            // Removing the raw step leaves smoothed minus actual trajectory,
            // which is the shift that moves frame k onto the smoothed path.
            corrections
                .iter()
                .zip(&transforms)
                .map(|(&correction, &raw)| correction - raw)
                .collect()
        } else {
            Vec::new()
        };

        // Pass B: compensate, enhance, write
        source.seek(window.start_frame).map_err(stream_err)?;
        let format = self.settings.export.for_clip(info.width, info.height, fps);
        let mut sink = match backend.open_sink(sink_path, &format) {
            Ok(sink) => sink,
            Err(e) => {
                drop(source);
                return Err(ClipError::SinkOpen {
                    path: sink_path.to_path_buf(),
                    source: e,
                });
            }
        };

        let total = window.len();
        for k in 0..total {
            let frame = match source.read_frame() {
                Ok(Some(frame)) => frame,
                other => {
                    if let Err(e) = other {
                        warn!(source = %source_path.display(), "decode failed: {e}");
                    }
                    if k == 0 {
                        return Err(ClipError::EmptyWindow {
                            path: source_path.to_path_buf(),
                            detail: format!("frame {} could not be read", window.start_frame),
                        });
                    }
                    warn!(
                        source = %source_path.display(),
                        written = k,
                        expected = total,
                        "stream ended early"
                    );
                    window = window.truncated(window.start_frame + k - 1);
                    report.window = Some(window);
                    break;
                }
            };

            let correction = if !flags.stabilize {
                None
            } else if k == 0 {
                Some(Transform::IDENTITY)
            } else {
                compensation.get(k as usize - 1).copied()
            };
            let frame = match correction {
                Some(t) => compensate(&frame, t, info.width, info.height),
                None => frame,
            };
            let frame = self
                .settings
                .enhancement
                .apply(frame, flags.denoise, flags.sharpen)
                .map_err(stream_err)?;
            if let Err(e) = sink.write_frame(&frame) {
                // An encoder that takes no frame at all never really opened.
                if sink.frames_written() == 0 {
                    drop(source);
                    return Err(ClipError::SinkOpen {
                        path: sink_path.to_path_buf(),
                        source: e,
                    });
                }
                return Err(stream_err(e));
            }
            report.frames_written += 1;

            let n = k + 1;
            if n % self.settings.progress_interval.max(1) == 0 || n == total {
                info!(source = %source_path.display(), done = n, total, "frames processed");
            }
        }

        sink.finish().map_err(stream_err)?;
        debug!(
            sink = %sink_path.display(),
            frames = report.frames_written,
            "clip written"
        );
        Ok(())
    }

    /// Pass A. Returns the raw transforms and the number of frames read.
    fn estimate_motion(
        &self,
        source: &mut dyn FrameSource,
        window: FrameWindow,
        source_path: &Path,
    ) -> Result<(Vec<Transform>, u64), ClipError> {
        source.seek(window.start_frame).map_err(|e| ClipError::Stream {
            path: source_path.to_path_buf(),
            source: e,
        })?;
        let mut accumulator = MotionAccumulator::new(self.settings.motion);
        for _ in 0..window.len() {
            match source.read_frame() {
                Ok(Some(frame)) => accumulator.push(GrayImage::from_frame(&frame)),
                Ok(None) => break,
                Err(e) => {
                    warn!(source = %source_path.display(), "decode failed: {e}");
                    break;
                }
            }
        }
        let seen = accumulator.frames_seen() as u64;
        if seen == 0 {
            return Err(ClipError::EmptyWindow {
                path: source_path.to_path_buf(),
                detail: format!("frame {} could not be read", window.start_frame),
            });
        }
        debug!(frames = seen, "motion estimated");
        Ok((accumulator.finish(), seen))
    }
}
