//! Integration tests for window resolution and the copy path.
//!
//! Exercises reelfix-pipeline's controller against reelfix-media's
//! in-memory backend.

use reelfix_core::FrameRate;
use reelfix_media::{MemoryBackend, SyntheticClip};
use reelfix_pipeline::{ClipError, ClipFlags, Controller, WindowRequest};
use std::path::Path;

// ── Helpers ────────────────────────────────────────────────────

const SRC: &str = "videos/reel.mp4";
const OUT: &str = "out/reel.mp4";

fn reel() -> SyntheticClip {
    SyntheticClip::new(64, 48, 300, FrameRate::FPS_30)
}

fn backend(clip: SyntheticClip) -> MemoryBackend {
    let backend = MemoryBackend::new();
    backend.add_clip(SRC, clip);
    backend
}

fn copy(backend: &MemoryBackend, start_s: f64, end_s: Option<f64>) -> reelfix_pipeline::ClipResult {
    Controller::default().process(
        backend,
        Path::new(SRC),
        Path::new(OUT),
        WindowRequest::new(start_s, end_s),
        ClipFlags::default(),
    )
}

fn written_indices(backend: &MemoryBackend) -> Vec<u64> {
    backend
        .output(Path::new(OUT))
        .unwrap()
        .frames
        .iter()
        .map(|f| SyntheticClip::stamped_index(f).unwrap())
        .collect()
}

// ── Window resolution ──────────────────────────────────────────

#[test]
fn two_to_five_seconds_is_91_frames() {
    let backend = backend(reel());
    let result = copy(&backend, 2.0, Some(5.0));
    assert!(result.ok, "{:?}", result.error);
    assert_eq!(result.fps, 30.0);
    assert_eq!(result.start_used, 2.0);
    assert_eq!(result.end_used, 5.0);
    assert_eq!(result.frames_written, 91);
    assert_eq!(written_indices(&backend), (60..=150).collect::<Vec<_>>());
}

#[test]
fn collapsed_window_widens_to_one_second() {
    let backend = backend(reel());
    let result = copy(&backend, 5.0, Some(5.0));
    assert!(result.ok);
    assert_eq!(result.frames_written, 31);
    assert_eq!(written_indices(&backend), (150..=180).collect::<Vec<_>>());
}

#[test]
fn open_end_runs_to_last_frame() {
    let backend = backend(reel());
    let result = copy(&backend, 9.0, None);
    assert_eq!(result.frames_written, 30);
    assert_eq!(written_indices(&backend).last(), Some(&299));
}

#[test]
fn window_past_end_clamps_to_last_frame() {
    let backend = backend(reel());
    let result = copy(&backend, 60.0, Some(70.0));
    assert!(result.ok);
    assert_eq!(result.frames_written, 1);
    assert_eq!(written_indices(&backend), vec![299]);
}

#[test]
fn copy_is_bit_exact() {
    let clip = reel();
    let backend = backend(clip.clone());
    copy(&backend, 1.0, Some(1.5));
    let out = backend.output(Path::new(OUT)).unwrap();
    assert!(out.finished);
    assert_eq!(out.format.frame_rate, FrameRate::FPS_30);
    for (k, frame) in out.frames.iter().enumerate() {
        assert_eq!(frame, &clip.render(30 + k as u64));
    }
}

// ── Failures ───────────────────────────────────────────────────

#[test]
fn missing_source_writes_nothing() {
    let backend = MemoryBackend::new();
    let err = Controller::default()
        .try_process(
            &backend,
            Path::new(SRC),
            Path::new(OUT),
            WindowRequest::default(),
            ClipFlags::default(),
        )
        .unwrap_err();
    assert!(matches!(err, ClipError::SourceOpen { .. }));
    assert!(backend.output_paths().is_empty());
}

#[test]
fn sink_failure_releases_source() {
    let backend = backend(reel());
    backend.fail_sink(OUT);
    let err = Controller::default()
        .try_process(
            &backend,
            Path::new(SRC),
            Path::new(OUT),
            WindowRequest::new(2.0, Some(5.0)),
            ClipFlags {
                stabilize: true,
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, ClipError::SinkOpen { .. }));
    assert_eq!(backend.open_source_count(), 0);
}

#[test]
fn early_end_of_stream_truncates() {
    let backend = backend(reel().with_readable_frames(100));
    let result = copy(&backend, 2.0, Some(5.0));
    assert!(result.ok);
    assert_eq!(result.frames_written, 40);
    assert_eq!(result.start_used, 2.0);
    assert!((result.end_used - 99.0 / 30.0).abs() < 1e-12);
    assert_eq!(written_indices(&backend).last(), Some(&99));
    assert_eq!(backend.open_source_count(), 0);
}

#[test]
fn window_beyond_readable_frames_is_empty() {
    let backend = backend(reel().with_readable_frames(50));
    let err = Controller::default()
        .try_process(
            &backend,
            Path::new(SRC),
            Path::new(OUT),
            WindowRequest::new(2.0, Some(5.0)),
            ClipFlags::default(),
        )
        .unwrap_err();
    assert!(matches!(err, ClipError::EmptyWindow { .. }));
}
