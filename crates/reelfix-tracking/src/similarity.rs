//! Robust 4-DOF similarity (rotation, uniform scale, translation) fitting.
//!
//! The model is the partial affine `[[a, -b, tx], [b, a, ty]]`: two point
//! pairs determine it, so RANSAC draws minimal samples of two.

use glam::{DAffine2, DMat2, DVec2};
use serde::{Deserialize, Serialize};

/// RANSAC parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    /// Maximum reprojection error for an inlier, in pixels.
    pub threshold: f64,
    pub max_iterations: u32,
    /// Desired probability of drawing at least one all-inlier sample.
    pub confidence: f64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            max_iterations: 2000,
            confidence: 0.99,
        }
    }
}

/// A fitted model and the number of correspondences supporting it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityFit {
    pub matrix: DAffine2,
    pub inliers: usize,
}

/// Least-squares similarity mapping `src` onto `dst`.
///
/// Returns `None` for fewer than two pairs or when the source points coincide.
pub fn fit_partial_affine(src: &[DVec2], dst: &[DVec2]) -> Option<DAffine2> {
    let n = src.len();
    if n < 2 || n != dst.len() {
        return None;
    }
    let inv_n = 1.0 / n as f64;
    let src_mean = src.iter().copied().sum::<DVec2>() * inv_n;
    let dst_mean = dst.iter().copied().sum::<DVec2>() * inv_n;

    let mut spp = 0.0;
    let mut sa = 0.0;
    let mut sb = 0.0;
    for (p, q) in src.iter().zip(dst) {
        let p = *p - src_mean;
        let q = *q - dst_mean;
        spp += p.length_squared();
        sa += p.x * q.x + p.y * q.y;
        sb += p.x * q.y - p.y * q.x;
    }
    if spp < 1e-12 {
        return None;
    }
    let a = sa / spp;
    let b = sb / spp;
    let matrix2 = DMat2::from_cols(DVec2::new(a, b), DVec2::new(-b, a));
    let translation = dst_mean - matrix2 * src_mean;
    if !(a.is_finite() && b.is_finite() && translation.is_finite()) {
        return None;
    }
    Some(DAffine2 {
        matrix2,
        translation,
    })
}

fn inlier_mask(m: &DAffine2, src: &[DVec2], dst: &[DVec2], threshold_sq: f64) -> Vec<bool> {
    src.iter()
        .zip(dst)
        .map(|(p, q)| m.transform_point2(*p).distance_squared(*q) < threshold_sq)
        .collect()
}

/// Number of iterations needed to hit `confidence` given an inlier ratio.
fn adaptive_iterations(confidence: f64, inlier_ratio: f64, cap: u32) -> u32 {
    let good_sample = inlier_ratio * inlier_ratio;
    if good_sample >= 1.0 {
        return 1;
    }
    if good_sample <= 0.0 {
        return cap;
    }
    let needed = (1.0 - confidence).ln() / (1.0 - good_sample).ln();
    if needed.is_finite() {
        (needed.ceil().max(1.0) as u32).min(cap)
    } else {
        cap
    }
}

/// RANSAC similarity estimation followed by a least-squares refit on the
/// consensus set.
pub fn estimate_partial_affine(
    src: &[[f32; 2]],
    dst: &[[f32; 2]],
    params: &RansacParams,
) -> Option<SimilarityFit> {
    if src.len() < 2 || src.len() != dst.len() {
        return None;
    }
    let src: Vec<DVec2> = src.iter().map(|p| DVec2::new(p[0] as f64, p[1] as f64)).collect();
    let dst: Vec<DVec2> = dst.iter().map(|p| DVec2::new(p[0] as f64, p[1] as f64)).collect();
    let n = src.len();
    let threshold_sq = params.threshold * params.threshold;

    let mut best_mask: Option<Vec<bool>> = None;
    let mut best_inliers = 0usize;
    let mut seed = 12345u64;
    let mut next_index = |n: usize| {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        (seed >> 33) as usize % n
    };

    let mut iterations = params.max_iterations.max(1);
    let mut iter = 0;
    while iter < iterations {
        iter += 1;
        let i = next_index(n);
        let mut j = next_index(n);
        if i == j {
            j = (j + 1) % n;
        }
        if src[i].distance_squared(src[j]) < 1e-6 {
            continue;
        }
        let Some(m) = fit_partial_affine(&[src[i], src[j]], &[dst[i], dst[j]]) else {
            continue;
        };
        let mask = inlier_mask(&m, &src, &dst, threshold_sq);
        let count = mask.iter().filter(|&&v| v).count();
        if count > best_inliers {
            best_inliers = count;
            best_mask = Some(mask);
            iterations = adaptive_iterations(
                params.confidence,
                count as f64 / n as f64,
                params.max_iterations.max(1),
            )
            .max(iter);
        }
    }

    let mask = best_mask?;
    if best_inliers < 2 {
        return None;
    }
    let (s, d): (Vec<DVec2>, Vec<DVec2>) =
        (0..n).filter(|&k| mask[k]).map(|k| (src[k], dst[k])).unzip();
    let matrix = fit_partial_affine(&s, &d)?;
    let inliers = inlier_mask(&matrix, &src, &dst, threshold_sq)
        .into_iter()
        .filter(|&v| v)
        .count();
    Some(SimilarityFit { matrix, inliers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelfix_core::Transform;

    fn grid_points() -> Vec<[f32; 2]> {
        let mut pts = Vec::new();
        for y in 0..6 {
            for x in 0..6 {
                pts.push([20.0 + x as f32 * 30.0, 15.0 + y as f32 * 25.0]);
            }
        }
        pts
    }

    fn apply(t: Transform, pts: &[[f32; 2]]) -> Vec<[f32; 2]> {
        let m = t.to_affine();
        pts.iter()
            .map(|p| {
                let q = m.transform_point2(DVec2::new(p[0] as f64, p[1] as f64));
                [q.x as f32, q.y as f32]
            })
            .collect()
    }

    #[test]
    fn test_exact_fit_recovers_transform() {
        let src = grid_points();
        let truth = Transform::new(4.0, -3.0, 0.05);
        let dst = apply(truth, &src);
        let fit = estimate_partial_affine(&src, &dst, &RansacParams::default()).unwrap();
        let est = Transform::from_affine(&fit.matrix);
        assert_eq!(fit.inliers, src.len());
        assert!((est.dx - 4.0).abs() < 1e-3);
        assert!((est.dy + 3.0).abs() < 1e-3);
        assert!((est.da - 0.05).abs() < 1e-5);
    }

    #[test]
    fn test_outliers_are_rejected() {
        let src = grid_points();
        let truth = Transform::new(-2.0, 1.5, -0.02);
        let mut dst = apply(truth, &src);
        for (k, p) in dst.iter_mut().enumerate().step_by(5) {
            p[0] += 40.0 + k as f32;
            p[1] -= 25.0;
        }
        let fit = estimate_partial_affine(&src, &dst, &RansacParams::default()).unwrap();
        let est = Transform::from_affine(&fit.matrix);
        assert_eq!(fit.inliers, src.len() - src.len().div_ceil(5));
        assert!((est.dx + 2.0).abs() < 1e-2);
        assert!((est.dy - 1.5).abs() < 1e-2);
        assert!((est.da + 0.02).abs() < 1e-4);
    }

    #[test]
    fn test_degenerate_input() {
        let same = vec![[5.0, 5.0]; 12];
        assert!(estimate_partial_affine(&same, &same, &RansacParams::default()).is_none());
        assert!(estimate_partial_affine(&[[1.0, 1.0]], &[[2.0, 2.0]], &RansacParams::default()).is_none());
    }

    #[test]
    fn test_adaptive_iterations() {
        assert_eq!(adaptive_iterations(0.99, 1.0, 2000), 1);
        assert_eq!(adaptive_iterations(0.99, 0.0, 2000), 2000);
        let n = adaptive_iterations(0.99, 0.5, 2000);
        assert!(n > 10 && n < 30);
    }
}
