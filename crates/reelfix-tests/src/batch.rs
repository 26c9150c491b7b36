//! Integration tests for batch job runs.
//!
//! Exercises reelfix-pipeline's job runner, configuration and metrics over
//! reelfix-media's in-memory backend.

use reelfix_core::FrameRate;
use reelfix_media::{MemoryBackend, SyntheticClip};
use reelfix_pipeline::{JobRunner, JobSpec, JobStatus, RestoreConfig};
use std::path::{Path, PathBuf};

// ── Helpers ────────────────────────────────────────────────────

fn job(film: &str, start: &str, end: &str, enhancements: &[&str]) -> JobSpec {
    JobSpec {
        film: film.into(),
        start: Some(start.into()),
        end: Some(end.into()),
        enhancements: enhancements.iter().map(|s| s.to_string()).collect(),
        compare: false,
    }
}

fn library() -> (MemoryBackend, Vec<PathBuf>) {
    let backend = MemoryBackend::new();
    let videos = vec![
        PathBuf::from("videos/Nix Film.mp4"),
        PathBuf::from("videos/Zapruder Film.mov"),
    ];
    backend.add_clip(&videos[0], SyntheticClip::new(64, 48, 300, FrameRate::FPS_30));
    backend.add_clip(
        &videos[1],
        SyntheticClip::new(96, 80, 120, FrameRate::FPS_24).with_jitter(2, 3),
    );
    (backend, videos)
}

// ── Job runs ───────────────────────────────────────────────────

#[test]
fn batch_survives_failures() {
    let (backend, videos) = library();
    backend.fail_sink("out/Nix Film_0m00s-0m01s_copy.mp4");
    let jobs = [
        job("nix film", "0:00", "0:01", &[]),
        job("Bronson", "0:00", "0:01", &[]),
        job("nix", "0:1x", "0:02", &[]),
        job("nix", "0:02", "0:05", &["Sharpen"]),
    ];
    let runner = JobRunner::new(&backend, &RestoreConfig::default());
    let outcomes = runner.run_with_videos(&jobs, &videos, Path::new("out"));

    assert!(matches!(outcomes[0].status, JobStatus::Failed { .. }));
    assert!(matches!(outcomes[1].status, JobStatus::Skipped { .. }));
    assert!(matches!(outcomes[2].status, JobStatus::Skipped { .. }));
    assert!(outcomes[3].is_completed());
    assert_eq!(
        outcomes[3].output.as_deref(),
        Some(Path::new("out/Nix Film_0m02s-0m05s_sharp.mp4"))
    );
    assert_eq!(outcomes[3].clip.as_ref().unwrap().frames_written, 91);
    assert_eq!(backend.open_source_count(), 0);
}

#[test]
fn compare_scores_against_unstabilized_reference() {
    let (backend, videos) = library();
    let mut zapruder = job("zapruder", "0:01", "0:02", &["stabilize"]);
    zapruder.compare = true;
    let mut config = RestoreConfig::default();
    config.metrics.crop_border = 10;
    let runner = JobRunner::new(&backend, &config);
    let outcomes = runner.run_with_videos(&[zapruder], &videos, Path::new("out"));

    let outcome = &outcomes[0];
    assert!(outcome.is_completed(), "{:?}", outcome.status);
    let metrics = outcome.metrics.unwrap();
    assert_eq!(metrics.frames, 25);
    assert!(metrics.ssim.is_finite() && metrics.ssim <= 1.0);
    assert!(metrics.mse >= 0.0);
    assert!(backend
        .output(Path::new("out/Zapruder Film_0m01s-0m02s_stab_ref.mp4"))
        .is_some());
}

#[test]
fn run_discovers_videos_and_creates_output_folder() {
    let dir = tempfile::tempdir().unwrap();
    let videos = dir.path().join("videos");
    std::fs::create_dir(&videos).unwrap();
    let source = videos.join("Muchmore.avi");
    std::fs::write(&source, b"").unwrap();
    std::fs::write(videos.join("notes.txt"), b"").unwrap();

    let backend = MemoryBackend::new();
    backend.add_clip(&source, SyntheticClip::new(48, 32, 90, FrameRate::FPS_30));

    let mut config = RestoreConfig {
        video_folder: videos,
        output_folder: dir.path().join("processed"),
        jobs: vec![job("muchmore", "0:01", "", &["denoise"])],
        ..Default::default()
    };
    config.enhancement.denoise.template_window = 3;
    config.enhancement.denoise.search_window = 5;

    let outcomes = JobRunner::new(&backend, &config).run(&config).unwrap();
    assert!(config.output_folder.is_dir());
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_completed());
    let output = config.output_folder.join("Muchmore_0m01s-end_denoise.mp4");
    assert_eq!(outcomes[0].output.as_ref(), Some(&output));
    assert_eq!(backend.output(&output).unwrap().frames.len(), 60);
    assert!(!outcomes[0].audio_merged);
}

#[test]
fn empty_video_folder_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = RestoreConfig {
        video_folder: dir.path().to_path_buf(),
        output_folder: dir.path().join("processed"),
        jobs: vec![job("anything", "0:00", "0:01", &[])],
        ..Default::default()
    };
    let backend = MemoryBackend::new();
    let outcomes = JobRunner::new(&backend, &config).run(&config).unwrap();
    assert!(outcomes.is_empty());
}

#[test]
fn demo_config_parses() {
    let text = include_str!("../../../demos/restore.json");
    let config = RestoreConfig::from_json(text).unwrap();
    assert_eq!(config.jobs.len(), 5);
    assert!(config.jobs.iter().all(|j| !j.film.is_empty()));
}
