//! Batch jobs: match films to files, name outputs and run clips in order.

use crate::config::{JobSpec, RestoreConfig};
use crate::controller::{ClipFlags, ClipResult, Controller, WindowRequest};
use crate::metrics::{compute_video_metrics, MetricsParams, QualityMetrics};
use reelfix_core::{ReelError, Result};
use reelfix_media::{AudioRemux, MediaBackend, VideoCodec};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mov", "mkv"];

/// Parse `mm:ss` or `hh:mm:ss` into seconds. Blank input means "not given".
pub fn parse_timecode(text: &str) -> Result<Option<f64>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let bad = || ReelError::InvalidParameter(format!("Bad timecode '{text}'. Use mm:ss or hh:mm:ss"));
    let parts: Vec<&str> = text.split(':').map(str::trim).collect();
    if !(2..=3).contains(&parts.len()) {
        return Err(bad());
    }
    let (units, secs) = parts.split_at(parts.len() - 1);
    let mut total = 0.0;
    for unit in units {
        let v: u64 = unit.parse().map_err(|_| bad())?;
        total = total * 60.0 + v as f64;
    }
    let s: f64 = secs[0].parse().map_err(|_| bad())?;
    if !s.is_finite() || s < 0.0 {
        return Err(bad());
    }
    Ok(Some(total * 60.0 + s))
}

/// Video files directly inside `dir`, sorted by path.
pub fn discover_videos(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ReelError::NotFound(format!("Video folder not found: {}", dir.display()))
        } else {
            ReelError::Io(e)
        }
    })?;
    let mut videos = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_video = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if is_video && path.is_file() {
            videos.push(path);
        }
    }
    videos.sort();
    Ok(videos)
}

/// First video whose stem contains the query, or is contained by it,
/// ignoring case and repeated whitespace.
pub fn match_film<'a>(videos: &'a [PathBuf], query: &str) -> Option<&'a PathBuf> {
    let query = query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    if query.is_empty() {
        return None;
    }
    videos.iter().find(|path| {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        !stem.is_empty() && (stem.contains(&query) || query.contains(&stem))
    })
}

/// `83.4` -> `1m23s`.
pub fn timecode_tag(seconds: f64) -> String {
    let whole = seconds.max(0.0).floor() as u64;
    format!("{}m{:02}s", whole / 60, whole % 60)
}

/// `{stem}_{start}-{end|"end"}_{tag}.{ext}`, the extension matching `codec`.
pub fn output_name(
    stem: &str,
    start_s: Option<f64>,
    end_s: Option<f64>,
    flags: ClipFlags,
    codec: VideoCodec,
) -> String {
    let start = timecode_tag(start_s.unwrap_or(0.0));
    let end = end_s.map_or_else(|| "end".to_string(), timecode_tag);
    format!("{stem}_{start}-{end}_{}.{}", flags.tag(), codec.extension())
}

/// A job with its file, output and window worked out.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedJob {
    pub source: PathBuf,
    pub output: PathBuf,
    pub request: WindowRequest,
    pub flags: ClipFlags,
}

impl ResolvedJob {
    /// Where the unstabilized comparison clip goes.
    pub fn reference_output(&self) -> PathBuf {
        let stem = self
            .output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = self
            .output
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mp4".into());
        self.output.with_file_name(format!("{stem}_ref.{ext}"))
    }
}

pub fn resolve_job(
    job: &JobSpec,
    videos: &[PathBuf],
    output_dir: &Path,
    codec: VideoCodec,
) -> Result<ResolvedJob> {
    let start_s = job.start.as_deref().map(parse_timecode).transpose()?.flatten();
    let end_s = job.end.as_deref().map(parse_timecode).transpose()?.flatten();
    let source = match_film(videos, &job.film).ok_or_else(|| {
        ReelError::NotFound(format!("Could not match film '{}' to a video file", job.film))
    })?;
    let flags = ClipFlags::from_enhancements(&job.enhancements);
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(ResolvedJob {
        source: source.clone(),
        output: output_dir.join(output_name(&stem, start_s, end_s, flags, codec)),
        request: WindowRequest::new(start_s.unwrap_or(0.0), end_s),
        flags,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    /// Not attempted: bad timecode or no matching file.
    Skipped { reason: String },
    Failed { reason: String },
}

/// What happened to one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    pub film: String,
    pub status: JobStatus,
    pub output: Option<PathBuf>,
    pub clip: Option<ClipResult>,
    pub audio_merged: bool,
    pub metrics: Option<QualityMetrics>,
}

impl JobOutcome {
    fn skipped(film: &str, reason: String) -> Self {
        Self {
            film: film.to_string(),
            status: JobStatus::Skipped { reason },
            output: None,
            clip: None,
            audio_merged: false,
            metrics: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Runs a list of jobs one after another. A failing job never stops the batch.
pub struct JobRunner<'a> {
    backend: &'a dyn MediaBackend,
    controller: Controller,
    remux: Option<AudioRemux>,
    metrics: MetricsParams,
    codec: VideoCodec,
}

impl<'a> JobRunner<'a> {
    pub fn new(backend: &'a dyn MediaBackend, config: &RestoreConfig) -> Self {
        Self {
            backend,
            controller: Controller::new(config.controller_settings()),
            remux: None,
            metrics: config.metrics,
            codec: config.export.video_codec,
        }
    }

    /// Merge the source audio onto each finished clip with `remux`.
    pub fn with_remux(mut self, remux: Option<AudioRemux>) -> Self {
        self.remux = remux;
        self
    }

    /// Discover the videos, create the output folder and run every job.
    pub fn run(&self, config: &RestoreConfig) -> Result<Vec<JobOutcome>> {
        if config.jobs.is_empty() {
            warn!("no jobs configured");
            return Ok(Vec::new());
        }
        let videos = discover_videos(&config.video_folder)?;
        if videos.is_empty() {
            warn!(folder = %config.video_folder.display(), "no videos found");
            return Ok(Vec::new());
        }
        std::fs::create_dir_all(&config.output_folder)?;
        let outcomes = self.run_with_videos(&config.jobs, &videos, &config.output_folder);
        let done = outcomes.iter().filter(|o| o.is_completed()).count();
        info!(completed = done, total = outcomes.len(), output = %config.output_folder.display(), "batch finished");
        Ok(outcomes)
    }

    pub fn run_with_videos(&self, jobs: &[JobSpec], videos: &[PathBuf], output_dir: &Path) -> Vec<JobOutcome> {
        jobs.iter()
            .map(|job| match resolve_job(job, videos, output_dir, self.codec) {
                Ok(resolved) => self.run_job(&job.film, &resolved, job.compare),
                Err(e) => {
                    warn!(film = %job.film, "skipping job: {e}");
                    JobOutcome::skipped(&job.film, e.to_string())
                }
            })
            .collect()
    }

    fn run_job(&self, film: &str, job: &ResolvedJob, compare: bool) -> JobOutcome {
        info!(
            source = %job.source.display(),
            start = %timecode_tag(job.request.start_s),
            end = %job.request.end_s.map_or_else(|| "end".to_string(), timecode_tag),
            effects = %job.flags.tag(),
            "starting job"
        );
        let clip = self
            .controller
            .process(self.backend, &job.source, &job.output, job.request, job.flags);
        let mut outcome = JobOutcome {
            film: film.to_string(),
            status: JobStatus::Completed,
            output: Some(job.output.clone()),
            clip: Some(clip.clone()),
            audio_merged: false,
            metrics: None,
        };
        if !clip.ok {
            outcome.status = JobStatus::Failed {
                reason: clip.error.unwrap_or_else(|| "unknown error".into()),
            };
            return outcome;
        }

        if compare {
            outcome.metrics = self.compare(job);
        }

        if let Some(remux) = &self.remux {
            match remux.replace_with_audio(&job.source, &job.output, clip.start_used, Some(clip.end_used)) {
                Ok(()) => outcome.audio_merged = true,
                Err(e) => warn!(output = %job.output.display(), "audio merge skipped: {e}"),
            }
        }
        outcome
    }

    /// Render the same window without stabilization and score the pair.
    fn compare(&self, job: &ResolvedJob) -> Option<QualityMetrics> {
        let reference = job.reference_output();
        let flags = ClipFlags {
            stabilize: false,
            ..job.flags
        };
        let clip = self
            .controller
            .process(self.backend, &job.source, &reference, job.request, flags);
        if !clip.ok {
            error!(reference = %reference.display(), "reference render failed, no metrics");
            return None;
        }
        let metrics = compute_video_metrics(self.backend, &reference, &job.output, &self.metrics);
        info!(
            frames = metrics.frames,
            ssim = metrics.ssim,
            mse = metrics.mse,
            "stabilized vs reference"
        );
        Some(metrics)
    }
}
