//! Sparse pyramidal Lucas-Kanade optical flow.
//!
//! Each feature is tracked independently from the coarsest pyramid level down
//! to full resolution. At every level the 2x2 structure tensor of the
//! feature's window in the previous frame is inverted once, then the
//! displacement is refined by Newton steps against the current frame.

use crate::pyramid::{GrayImage, ImagePyramid};
use glam::Vec2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Lucas-Kanade tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerParams {
    /// Side of the square integration window, in pixels.
    pub window_size: u32,
    /// Number of pyramid levels, including full resolution.
    pub pyramid_levels: u32,
    pub max_iterations: u32,
    /// Stop refining once a step is shorter than this (pixels).
    pub epsilon: f32,
    /// Features whose window has a smaller mean minimum eigenvalue are dropped.
    pub min_eigen_threshold: f32,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            window_size: 21,
            pyramid_levels: 3,
            max_iterations: 30,
            epsilon: 0.01,
            min_eigen_threshold: 1e-7,
        }
    }
}

/// Window samples and gradients of one feature at one level.
struct Template {
    samples: Vec<(Vec2, f32, Vec2)>,
    inv: [f32; 3],
}

impl Template {
    /// `None` when the window has too little texture to invert.
    fn capture(img: &GrayImage, center: Vec2, half: i32, min_eig: f32) -> Option<Self> {
        let area = ((2 * half + 1) * (2 * half + 1)) as f32;
        let mut samples = Vec::with_capacity(area as usize);
        let (mut gxx, mut gxy, mut gyy) = (0.0f32, 0.0f32, 0.0f32);
        for oy in -half..=half {
            for ox in -half..=half {
                let offset = Vec2::new(ox as f32, oy as f32);
                let p = center + offset;
                let grad = Vec2::new(
                    img.sample(p.x + 1.0, p.y) - img.sample(p.x - 1.0, p.y),
                    img.sample(p.x, p.y + 1.0) - img.sample(p.x, p.y - 1.0),
                ) * 0.5;
                gxx += grad.x * grad.x;
                gxy += grad.x * grad.y;
                gyy += grad.y * grad.y;
                samples.push((offset, img.sample(p.x, p.y), grad));
            }
        }
        let det = gxx * gyy - gxy * gxy;
        let smallest = 0.5 * (gxx + gyy - ((gxx - gyy).powi(2) + 4.0 * gxy * gxy).sqrt());
        if det.abs() < 1e-12 || smallest / area < min_eig {
            return None;
        }
        Some(Self {
            samples,
            inv: [gyy / det, -gxy / det, gxx / det],
        })
    }

    /// Refine `guess` (displacement at this level) against `img`.
    fn refine(&self, img: &GrayImage, center: Vec2, mut guess: Vec2, params: &TrackerParams) -> Option<Vec2> {
        let eps2 = params.epsilon * params.epsilon;
        for _ in 0..params.max_iterations {
            let mut b = Vec2::ZERO;
            for &(offset, value, grad) in &self.samples {
                let p = center + offset + guess;
                b += grad * (img.sample(p.x, p.y) - value);
            }
            let [a, c, d] = self.inv;
            let step = Vec2::new(a * b.x + c * b.y, c * b.x + d * b.y);
            guess -= step;
            if !guess.is_finite() {
                return None;
            }
            if step.length_squared() < eps2 {
                break;
            }
        }
        Some(guess)
    }
}

/// Tracks feature points from one frame into the next.
#[derive(Debug, Clone, Copy, Default)]
pub struct SparseFlow {
    pub params: TrackerParams,
}

impl SparseFlow {
    pub fn new(params: TrackerParams) -> Self {
        Self { params }
    }

    /// New position of each point in `curr`, or `None` where tracking failed.
    pub fn track(&self, prev: &GrayImage, curr: &GrayImage, points: &[[f32; 2]]) -> Vec<Option<[f32; 2]>> {
        let prev_pyr = ImagePyramid::build(prev, self.params.pyramid_levels);
        let curr_pyr = ImagePyramid::build(curr, self.params.pyramid_levels);
        self.track_pyramids(&prev_pyr, &curr_pyr, points)
    }

    pub fn track_pyramids(
        &self,
        prev: &ImagePyramid,
        curr: &ImagePyramid,
        points: &[[f32; 2]],
    ) -> Vec<Option<[f32; 2]>> {
        let Some(base) = curr.levels.first() else {
            return vec![None; points.len()];
        };
        points
            .par_iter()
            .map(|&[x, y]| {
                let moved = self.track_point(prev, curr, Vec2::new(x, y))?;
                base.contains(moved.x, moved.y).then_some([moved.x, moved.y])
            })
            .collect()
    }

    /// Matched `(prev, curr)` positions of the points that survived tracking.
    pub fn correspondences(
        &self,
        prev: &GrayImage,
        curr: &GrayImage,
        points: &[[f32; 2]],
    ) -> (Vec<[f32; 2]>, Vec<[f32; 2]>) {
        points
            .iter()
            .zip(self.track(prev, curr, points))
            .filter_map(|(&p, q)| q.map(|q| (p, q)))
            .unzip()
    }

    fn track_point(&self, prev: &ImagePyramid, curr: &ImagePyramid, at: Vec2) -> Option<Vec2> {
        let levels = prev.levels.len().min(curr.levels.len());
        let half = (self.params.window_size / 2) as i32;
        let mut guess = Vec2::ZERO;
        for level in (0..levels).rev() {
            let center = at / (1u32 << level) as f32;
            match Template::capture(&prev.levels[level], center, half, self.params.min_eigen_threshold) {
                Some(template) => {
                    guess = template.refine(&curr.levels[level], center, guess, &self.params)?;
                }
                // Texture may only show at finer levels; carry the guess down.
                None if level > 0 => {}
                None => return None,
            }
            if level > 0 {
                guess *= 2.0;
            }
        }
        Some(at + guess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(cx: f32, cy: f32) -> GrayImage {
        let mut img = GrayImage::new(96, 96);
        for y in 0..96u32 {
            for x in 0..96u32 {
                let d2 = (x as f32 - cx).powi(2) + (y as f32 - cy).powi(2);
                img.set(x, y, (-d2 / 60.0).exp());
            }
        }
        img
    }

    fn checkerboard(size: u32, cell: u32) -> GrayImage {
        let mut img = GrayImage::new(size, size);
        for y in 0..size {
            for x in 0..size {
                let v = (x / cell + y / cell) % 2;
                img.set(x, y, v as f32);
            }
        }
        img
    }

    #[test]
    fn test_stationary_point() {
        let img = checkerboard(64, 4);
        let flow = SparseFlow::new(TrackerParams {
            pyramid_levels: 1,
            ..Default::default()
        });
        let out = flow.track(&img, &img, &[[32.0, 32.0]]);
        let [x, y] = out[0].unwrap();
        assert!((x - 32.0).abs() < 0.1 && (y - 32.0).abs() < 0.1);
    }

    #[test]
    fn test_translated_blob() {
        let flow = SparseFlow::default();
        let out = flow.track(&blob(40.0, 44.0), &blob(43.0, 42.0), &[[40.0, 44.0]]);
        let [x, y] = out[0].unwrap();
        assert!((x - 43.0).abs() < 0.3, "x = {x}");
        assert!((y - 42.0).abs() < 0.3, "y = {y}");
    }

    #[test]
    fn test_flat_region_is_dropped() {
        let img = GrayImage::new(64, 64);
        let flow = SparseFlow::default();
        assert_eq!(flow.track(&img, &img, &[[32.0, 32.0]]), vec![None]);
        let (src, dst) = flow.correspondences(&img, &img, &[[32.0, 32.0]]);
        assert!(src.is_empty() && dst.is_empty());
    }

    #[test]
    fn test_correspondences_keep_order() {
        let prev = checkerboard(96, 8);
        let curr = checkerboard(96, 8);
        let points = [[20.0, 20.0], [48.0, 40.0], [70.0, 64.0]];
        let (src, dst) = SparseFlow::default().correspondences(&prev, &curr, &points);
        assert_eq!(src, points.to_vec());
        for (p, q) in src.iter().zip(&dst) {
            assert!((p[0] - q[0]).abs() < 0.1 && (p[1] - q[1]).abs() < 0.1);
        }
    }
}
