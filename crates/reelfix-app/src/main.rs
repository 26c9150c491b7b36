//! reelfix - archival film clip restoration
//!
//! Runs the configured batch of jobs, or a single ad-hoc job, against the
//! videos in a folder.

use anyhow::{bail, Context, Result};
use clap::Parser;
use reelfix_media::{AudioRemux, FfmpegBackend};
use reelfix_pipeline::{JobRunner, JobSpec, JobStatus, RestoreConfig};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "reelfix")]
#[command(about = "Stabilize, denoise and sharpen windows of archival film clips")]
struct Cli {
    /// JSON run configuration; defaults apply to anything it leaves out.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Folder searched for source videos.
    #[arg(long)]
    videos: Option<PathBuf>,

    /// Folder processed clips are written to.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Run only this film instead of the configured jobs.
    #[arg(long)]
    film: Option<String>,

    /// Window start (mm:ss or hh:mm:ss), for --film.
    #[arg(long, requires = "film")]
    start: Option<String>,

    /// Window end (mm:ss or hh:mm:ss), for --film.
    #[arg(long, requires = "film")]
    end: Option<String>,

    /// Enhancements for --film: stabilize, denoise, sharpen.
    #[arg(short, long = "enhance", requires = "film")]
    enhancements: Vec<String>,

    /// Also score the result against an unstabilized render, for --film.
    #[arg(long, requires = "film")]
    compare: bool,

    /// ffmpeg executable to use instead of the one on PATH.
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// Leave the processed clips silent.
    #[arg(long)]
    no_audio: bool,

    /// Write the job outcomes as JSON to this file.
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Log per-frame detail.
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) -> Result<()> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<RestoreConfig> {
    let mut config = match &cli.config {
        Some(path) => RestoreConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RestoreConfig::default(),
    };
    if let Some(dir) = &cli.videos {
        config.video_folder = dir.clone();
    }
    if let Some(dir) = &cli.output {
        config.output_folder = dir.clone();
    }
    if let Some(film) = &cli.film {
        config.jobs = vec![JobSpec {
            film: film.clone(),
            start: cli.start.clone(),
            end: cli.end.clone(),
            enhancements: cli.enhancements.clone(),
            compare: cli.compare,
        }];
    }
    if cli.no_audio {
        config.merge_audio = false;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config = load_config(&cli)?;
    if config.jobs.is_empty() {
        bail!("no jobs: pass --film or a config with a \"jobs\" list");
    }
    info!(
        jobs = config.jobs.len(),
        videos = %config.video_folder.display(),
        output = %config.output_folder.display(),
        "reelfix starting"
    );

    let backend = match &cli.ffmpeg {
        Some(path) => FfmpegBackend::with_ffmpeg(path),
        None => FfmpegBackend::locate().context("ffmpeg and ffprobe are required")?,
    };
    let remux = if config.merge_audio {
        let remux = match &cli.ffmpeg {
            Some(path) => Some(AudioRemux::new(path)),
            None => AudioRemux::locate(),
        };
        if remux.is_none() {
            warn!("ffmpeg not found, clips will be silent");
        }
        remux
    } else {
        None
    };

    let runner = JobRunner::new(&backend, &config).with_remux(remux);
    let outcomes = runner.run(&config)?;

    for outcome in &outcomes {
        match &outcome.status {
            JobStatus::Completed => {
                let path = outcome.output.as_ref().map(|p| p.display().to_string()).unwrap_or_default();
                match &outcome.metrics {
                    Some(m) => info!(film = %outcome.film, %path, ssim = m.ssim, mse = m.mse, "done"),
                    None => info!(film = %outcome.film, %path, "done"),
                }
            }
            JobStatus::Skipped { reason } => warn!(film = %outcome.film, "skipped: {reason}"),
            JobStatus::Failed { reason } => warn!(film = %outcome.film, "failed: {reason}"),
        }
    }

    if let Some(path) = &cli.summary {
        let json = serde_json::to_string_pretty(&outcomes)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    }

    info!("Done. Check the '{}' folder.", config.output_folder.display());
    Ok(())
}
