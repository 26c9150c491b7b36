//! Integration tests for motion estimation and compensation.
//!
//! Exercises reelfix-tracking's estimator and smoother together with
//! reelfix-effects' warp, on synthetic shaken footage from reelfix-media.

use reelfix_core::{FrameBuffer, FrameRate, Transform};
use reelfix_effects::compensate;
use reelfix_media::{MemoryBackend, SyntheticClip};
use reelfix_pipeline::{ClipFlags, Controller, WindowRequest};
use reelfix_tracking::{smooth_trajectory, GrayImage, MotionEstimator, MotionParams};
use std::path::Path;

// ── Helpers ────────────────────────────────────────────────────

fn shaken() -> SyntheticClip {
    SyntheticClip::new(192, 144, 24, FrameRate::FPS_24).with_jitter(3, 11)
}

/// Mean squared frame-to-frame translation as seen by the estimator.
fn shake_energy(frames: &[FrameBuffer]) -> f64 {
    let estimator = MotionEstimator::new(MotionParams::default());
    let grays: Vec<GrayImage> = frames.iter().map(GrayImage::from_frame).collect();
    let steps = estimator.estimate_sequence(&grays);
    steps.iter().map(|t| t.dx * t.dx + t.dy * t.dy).sum::<f64>() / steps.len() as f64
}

fn stabilize_flags() -> ClipFlags {
    ClipFlags {
        stabilize: true,
        ..Default::default()
    }
}

// ── Estimation ─────────────────────────────────────────────────

#[test]
fn estimator_recovers_synthetic_shake() {
    let clip = shaken();
    let estimator = MotionEstimator::new(MotionParams::default());
    for k in 1..6 {
        let prev = GrayImage::from_frame(&clip.render(k - 1));
        let curr = GrayImage::from_frame(&clip.render(k));
        let t = estimator.estimate(&prev, &curr);
        let (px, py) = clip.offset(k - 1);
        let (cx, cy) = clip.offset(k);
        assert!((t.dx - (cx - px) as f64).abs() < 0.5, "frame {k}: {t:?}");
        assert!((t.dy - (cy - py) as f64).abs() < 0.5, "frame {k}: {t:?}");
        assert!(t.da.abs() < 0.01);
    }
}

#[test]
fn compensating_the_estimate_realigns_frames() {
    let clip = shaken();
    let estimator = MotionEstimator::new(MotionParams::default());
    let prev = clip.render(3);
    let curr = clip.render(4);
    let t = estimator.estimate(&GrayImage::from_frame(&prev), &GrayImage::from_frame(&curr));
    // The shake is whole pixels, so the rounded inverse realigns exactly.
    let inverse = Transform::new(-t.dx.round(), -t.dy.round(), 0.0);
    let aligned = compensate(&curr, inverse, clip.width, clip.height);
    // Interior only, away from replicated borders and the index stamp.
    for y in 16..clip.height - 16 {
        for x in 16..clip.width - 16 {
            assert_eq!(aligned.pixel(x, y), prev.pixel(x, y), "({x}, {y})");
        }
    }
}

#[test]
fn smoothing_keeps_one_correction_per_transition() {
    let clip = shaken();
    let estimator = MotionEstimator::new(MotionParams::default());
    let frames: Vec<GrayImage> = (0..12).map(|k| GrayImage::from_frame(&clip.render(k))).collect();
    let raw = estimator.estimate_sequence(&frames);
    assert_eq!(raw.len(), 11);
    let corrections = smooth_trajectory(&raw, 30);
    assert_eq!(corrections.len(), 11);
    assert!(corrections.iter().all(|c| c.dx.is_finite() && c.dy.is_finite() && c.da.is_finite()));
}

// ── Pipeline ───────────────────────────────────────────────────

#[test]
fn stabilized_window_writes_every_frame() {
    let clip = shaken();
    let backend = MemoryBackend::new();
    backend.add_clip("shaky.mp4", clip.clone());
    let processed = Controller::default()
        .try_process(
            &backend,
            Path::new("shaky.mp4"),
            Path::new("steady.mp4"),
            WindowRequest::new(0.0, None),
            stabilize_flags(),
        )
        .unwrap();
    assert_eq!(processed.frames_written, 24);
    assert_eq!(processed.fps, 24.0);
    let out = backend.output(Path::new("steady.mp4")).unwrap();
    assert_eq!(out.frames.len(), 24);
    assert!(out.frames.iter().all(|f| (f.width, f.height) == (192, 144)));
    // The first frame gets the identity correction.
    assert_eq!(out.frames[0], clip.render(0));
    assert_ne!(out.frames[5], clip.render(5));
}

#[test]
fn stabilized_output_is_steadier_than_input() {
    let clip = SyntheticClip::new(192, 144, 48, FrameRate::FPS_24).with_jitter(3, 11);
    let backend = MemoryBackend::new();
    backend.add_clip("shaky.mp4", clip.clone());
    Controller::default()
        .try_process(
            &backend,
            Path::new("shaky.mp4"),
            Path::new("steady.mp4"),
            WindowRequest::default(),
            stabilize_flags(),
        )
        .unwrap();
    let input: Vec<FrameBuffer> = (0..48).map(|k| clip.render(k)).collect();
    let output = backend.output(Path::new("steady.mp4")).unwrap().frames;
    assert_eq!(output.len(), 48);

    let before = shake_energy(&input);
    let after = shake_energy(&output);
    assert!(before > 4.0, "input too steady to compare: {before}");
    assert!(after < before / 4.0, "before {before}, after {after}");
}

#[test]
fn early_end_during_motion_pass_truncates() {
    let backend = MemoryBackend::new();
    backend.add_clip(
        "shaky.mp4",
        SyntheticClip::new(128, 96, 120, FrameRate::FPS_24)
            .with_jitter(2, 5)
            .with_readable_frames(30),
    );
    let processed = Controller::default()
        .try_process(
            &backend,
            Path::new("shaky.mp4"),
            Path::new("steady.mp4"),
            WindowRequest::new(0.5, Some(3.0)),
            stabilize_flags(),
        )
        .unwrap();
    assert_eq!(processed.window.start_frame, 12);
    assert_eq!(processed.window.end_frame, 29);
    assert_eq!(processed.frames_written, 18);
    assert_eq!(backend.open_source_count(), 0);
}

#[test]
fn static_footage_passes_through_unchanged() {
    let clip = SyntheticClip::new(128, 96, 10, FrameRate::FPS_25);
    let backend = MemoryBackend::new();
    backend.add_clip("still.mp4", clip.clone());
    Controller::default()
        .try_process(
            &backend,
            Path::new("still.mp4"),
            Path::new("out.mp4"),
            WindowRequest::default(),
            stabilize_flags(),
        )
        .unwrap();
    let out = backend.output(Path::new("out.mp4")).unwrap();
    // Frames differ only in the stamped index, so every correction is at
    // most a rounding error away from the identity.
    for (k, frame) in out.frames.iter().enumerate() {
        let src = clip.render(k as u64);
        let diff: u64 = frame
            .data
            .iter()
            .zip(&src.data)
            .map(|(&a, &b)| (a as i64 - b as i64).unsigned_abs())
            .sum();
        assert!((diff as f64 / src.data.len() as f64) < 0.5, "frame {k}");
    }
}
