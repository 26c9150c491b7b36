//! Frame-to-frame motion estimation and trajectory smoothing.

use crate::features::{good_features_to_track, FeatureParams};
use crate::flow::{SparseFlow, TrackerParams};
use crate::pyramid::GrayImage;
use crate::similarity::{estimate_partial_affine, RansacParams};
use reelfix_core::Transform;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Parameters for [`MotionEstimator`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionParams {
    pub features: FeatureParams,
    pub tracker: TrackerParams,
    pub ransac: RansacParams,
    /// Below this many corners or surviving tracks the estimate is identity.
    pub min_features: usize,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            features: FeatureParams::default(),
            tracker: TrackerParams::default(),
            ransac: RansacParams::default(),
            min_features: 10,
        }
    }
}

/// Estimates the similarity motion between consecutive grayscale frames.
#[derive(Debug, Clone, Default)]
pub struct MotionEstimator {
    pub params: MotionParams,
}

impl MotionEstimator {
    pub fn new(params: MotionParams) -> Self {
        Self { params }
    }

    /// Motion mapping `prev` onto `curr`.
    ///
    /// Never fails: too few corners, too few surviving tracks or a failed fit
    /// all yield [`Transform::IDENTITY`].
    pub fn estimate(&self, prev: &GrayImage, curr: &GrayImage) -> Transform {
        if prev.width != curr.width || prev.height != curr.height {
            debug!("frame size changed, assuming no motion");
            return Transform::IDENTITY;
        }
        let min_features = self.params.min_features.max(2);

        let corners = good_features_to_track(prev, &self.params.features);
        if corners.len() < min_features {
            debug!(corners = corners.len(), "too few corners, assuming no motion");
            return Transform::IDENTITY;
        }

        let (src, dst) = SparseFlow::new(self.params.tracker).correspondences(prev, curr, &corners);
        if src.len() < min_features {
            debug!(tracked = src.len(), "too few tracked points, assuming no motion");
            return Transform::IDENTITY;
        }

        match estimate_partial_affine(&src, &dst, &self.params.ransac) {
            Some(fit) => Transform::from_affine(&fit.matrix),
            None => {
                debug!("similarity fit failed, assuming no motion");
                Transform::IDENTITY
            }
        }
    }

    /// One transform per consecutive pair: `frames.len() - 1` entries.
    pub fn estimate_sequence(&self, frames: &[GrayImage]) -> Vec<Transform> {
        frames
            .windows(2)
            .map(|pair| self.estimate(&pair[0], &pair[1]))
            .collect()
    }
}

/// Incremental form of [`MotionEstimator::estimate_sequence`]: feed frames
/// one at a time, keeping only the previous one.
#[derive(Debug)]
pub struct MotionAccumulator {
    estimator: MotionEstimator,
    prev: Option<GrayImage>,
    transforms: Vec<Transform>,
}

impl MotionAccumulator {
    pub fn new(params: MotionParams) -> Self {
        Self {
            estimator: MotionEstimator::new(params),
            prev: None,
            transforms: Vec::new(),
        }
    }

    /// Add the next frame. Every frame after the first appends one transform.
    pub fn push(&mut self, gray: GrayImage) {
        if let Some(prev) = &self.prev {
            let t = self.estimator.estimate(prev, &gray);
            debug!(index = self.transforms.len() + 1, dx = t.dx, dy = t.dy, da = t.da, "motion");
            self.transforms.push(t);
        }
        self.prev = Some(gray);
    }

    /// Frames seen so far.
    pub fn frames_seen(&self) -> usize {
        if self.prev.is_some() {
            self.transforms.len() + 1
        } else {
            0
        }
    }

    pub fn finish(self) -> Vec<Transform> {
        self.transforms
    }
}

/// Per-channel (structure of arrays) view of a transform sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MotionData {
    pub dx: Vec<f64>,
    pub dy: Vec<f64>,
    pub rotation: Vec<f64>,
}

impl MotionData {
    pub fn from_transforms(transforms: &[Transform]) -> Self {
        Self {
            dx: transforms.iter().map(|t| t.dx).collect(),
            dy: transforms.iter().map(|t| t.dy).collect(),
            rotation: transforms.iter().map(|t| t.da).collect(),
        }
    }

    pub fn to_transforms(&self) -> Vec<Transform> {
        (0..self.len())
            .map(|i| Transform::new(self.dx[i], self.dy[i], self.rotation[i]))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.dx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dx.is_empty()
    }

    /// Running sum of every channel: the camera trajectory.
    pub fn cumulative(&self) -> Self {
        Self {
            dx: cumsum(&self.dx),
            dy: cumsum(&self.dy),
            rotation: cumsum(&self.rotation),
        }
    }

    /// Moving average of every channel.
    pub fn smoothed(&self, radius: usize) -> Self {
        Self {
            dx: moving_average(&self.dx, radius),
            dy: moving_average(&self.dy, radius),
            rotation: moving_average(&self.rotation, radius),
        }
    }
}

fn cumsum(values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .scan(0.0, |acc, v| {
            *acc += v;
            Some(*acc)
        })
        .collect()
}

/// Index into a sequence of length `n` after mirror reflection about the end
/// samples (which are not repeated). Offsets beyond one period keep
/// reflecting.
fn reflect_index(i: i64, n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let period = 2 * (n as i64 - 1);
    let m = i.rem_euclid(period);
    if m >= n as i64 {
        (period - m) as usize
    } else {
        m as usize
    }
}

/// Centered moving average of width `2 * radius + 1`, reflect-padded at both
/// ends. Output has the same length as the input; `radius == 0` copies.
pub fn moving_average(curve: &[f64], radius: usize) -> Vec<f64> {
    if radius == 0 || curve.is_empty() {
        return curve.to_vec();
    }
    let n = curve.len();
    let r = radius as i64;
    let window = (2 * radius + 1) as f64;
    let padded: Vec<f64> = (-r..n as i64 + r)
        .map(|i| curve[reflect_index(i, n)])
        .collect();

    let mut out = Vec::with_capacity(n);
    let mut sum: f64 = padded[..2 * radius + 1].iter().sum();
    out.push(sum / window);
    for i in 1..n {
        sum += padded[i + 2 * radius] - padded[i - 1];
        out.push(sum / window);
    }
    out
}

/// Corrective transforms: each raw transform plus the offset between the
/// smoothed and the raw trajectory at that point.
pub fn smooth_trajectory(transforms: &[Transform], radius: usize) -> Vec<Transform> {
    if radius == 0 {
        return transforms.to_vec();
    }
    let raw = MotionData::from_transforms(transforms);
    let trajectory = raw.cumulative();
    let smoothed = trajectory.smoothed(radius);
    (0..raw.len())
        .map(|i| {
            Transform::new(
                raw.dx[i] + smoothed.dx[i] - trajectory.dx[i],
                raw.dy[i] + smoothed.dy[i] - trajectory.dy[i],
                raw.rotation[i] + smoothed.rotation[i] - trajectory.rotation[i],
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Blocky pseudo-random scene, evaluated at any (shifted) position.
    fn scene(width: u32, height: u32, shift_x: i32, shift_y: i32) -> GrayImage {
        let mut img = GrayImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let sx = x as i32 - shift_x;
                let sy = y as i32 - shift_y;
                let bx = sx.div_euclid(12) as u32;
                let by = sy.div_euclid(12) as u32;
                let h = bx.wrapping_mul(73_856_093) ^ by.wrapping_mul(19_349_663);
                let h = h.wrapping_mul(2_654_435_761) >> 24;
                img.set(x, y, h as f32 / 255.0);
            }
        }
        img
    }

    #[test]
    fn test_moving_average_reflect() {
        let out = moving_average(&[1.0, 2.0, 3.0], 1);
        // Padded: [2, 1, 2, 3, 2]
        let expected = [5.0 / 3.0, 2.0, 7.0 / 3.0];
        for (a, b) in out.iter().zip(expected) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_reflect_index_keeps_reflecting() {
        let idx: Vec<usize> = (-4..7).map(|i| reflect_index(i, 3)).collect();
        assert_eq!(idx, vec![0, 1, 2, 1, 0, 1, 2, 1, 0, 1, 2]);
        assert_eq!(reflect_index(-5, 1), 0);
    }

    #[test]
    fn test_moving_average_long_radius() {
        let out = moving_average(&[4.0, 8.0], 5);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|v| v.is_finite()));
        assert_eq!(moving_average(&[7.0], 3), vec![7.0]);
    }

    #[test]
    fn test_zero_radius_is_identity() {
        let t = vec![Transform::new(1.0, -2.0, 0.1), Transform::new(-0.5, 3.0, -0.2)];
        assert_eq!(smooth_trajectory(&t, 0), t);
        assert!(smooth_trajectory(&[], 30).is_empty());
    }

    #[test]
    fn test_constant_motion_is_kept() {
        // A uniform pan has a linear trajectory that the average leaves alone
        // away from the ends.
        let t = vec![Transform::new(2.0, 0.0, 0.0); 40];
        let s = smooth_trajectory(&t, 3);
        for c in &s[3..37] {
            assert!((c.dx - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_jitter_is_reduced() {
        let t: Vec<Transform> = (0..60)
            .map(|i| Transform::new(if i % 2 == 0 { 3.0 } else { -3.0 }, 0.0, 0.0))
            .collect();
        let corrected = smooth_trajectory(&t, 5);
        let traj = MotionData::from_transforms(&t).cumulative();
        // Trajectory the corrections steer towards.
        let steered: Vec<f64> = (0..t.len())
            .map(|i| traj.dx[i] + corrected[i].dx - t[i].dx)
            .collect();
        let range = |v: &[f64]| {
            let lo = v.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            hi - lo
        };
        assert!((range(&traj.dx) - 3.0).abs() < 1e-9);
        assert!(range(&steered) < 0.5);
    }

    #[test]
    fn test_featureless_frames_give_identity() {
        let flat = GrayImage::new(64, 48);
        let est = MotionEstimator::default();
        assert_eq!(est.estimate(&flat, &flat), Transform::IDENTITY);
    }

    #[test]
    fn test_translation_is_recovered() {
        let prev = scene(240, 180, 0, 0);
        let curr = scene(240, 180, 3, -2);
        let t = MotionEstimator::default().estimate(&prev, &curr);
        assert!((t.dx - 3.0).abs() < 0.5, "dx = {}", t.dx);
        assert!((t.dy + 2.0).abs() < 0.5, "dy = {}", t.dy);
        assert!(t.da.abs() < 0.01, "da = {}", t.da);
    }

    #[test]
    fn test_accumulator_matches_sequence() {
        let frames = vec![scene(120, 96, 0, 0), scene(120, 96, 1, 0), scene(120, 96, 1, 1)];
        let est = MotionEstimator::default();
        let expected = est.estimate_sequence(&frames);
        let mut acc = MotionAccumulator::new(MotionParams::default());
        assert_eq!(acc.frames_seen(), 0);
        for f in frames {
            acc.push(f);
        }
        assert_eq!(acc.frames_seen(), 3);
        assert_eq!(acc.finish(), expected);
    }

    #[test]
    fn test_motion_data_round_trip() {
        let t = vec![Transform::new(1.0, 2.0, 0.5), Transform::new(3.0, 4.0, -0.5)];
        let data = MotionData::from_transforms(&t);
        assert_eq!(data.cumulative().dx, vec![1.0, 4.0]);
        assert_eq!(data.to_transforms(), t);
        assert!(MotionData::from_transforms(&[]).is_empty());
    }

    proptest! {
        #[test]
        fn smoothing_preserves_length(
            raw in proptest::collection::vec((-10.0f64..10.0, -10.0f64..10.0, -0.1f64..0.1), 0..80),
            radius in 0usize..40,
        ) {
            let t: Vec<Transform> = raw.iter().map(|&(a, b, c)| Transform::new(a, b, c)).collect();
            let s = smooth_trajectory(&t, radius);
            prop_assert_eq!(s.len(), t.len());
            prop_assert!(s.iter().all(|c| c.dx.is_finite() && c.dy.is_finite() && c.da.is_finite()));
        }
    }
}
