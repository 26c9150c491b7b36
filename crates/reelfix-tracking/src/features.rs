//! Shi-Tomasi corner detection ("good features to track").

use crate::pyramid::{sobel_gradients, GrayImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Corner detector parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureParams {
    /// Upper bound on returned corners.
    pub max_corners: usize,
    /// Minimum accepted response relative to the strongest corner.
    pub quality_level: f32,
    /// Minimum Euclidean distance between returned corners, in pixels.
    pub min_distance: f32,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            max_corners: 300,
            quality_level: 0.01,
            min_distance: 30.0,
        }
    }
}

/// Minimum eigenvalue of the 3x3-summed structure tensor at every pixel.
pub fn min_eigen_response(img: &GrayImage) -> Vec<f32> {
    let (w, h) = (img.width as usize, img.height as usize);
    let (ix, iy) = sobel_gradients(img);
    let mut response = vec![0.0f32; w * h];

    response.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        for (x, out) in row.iter_mut().enumerate() {
            let (mut a, mut b, mut c) = (0.0f32, 0.0f32, 0.0f32);
            for dy in -1i32..=1 {
                let yy = (y as i32 + dy).clamp(0, h as i32 - 1) as usize;
                for dx in -1i32..=1 {
                    let xx = (x as i32 + dx).clamp(0, w as i32 - 1) as usize;
                    let gx = ix[yy * w + xx];
                    let gy = iy[yy * w + xx];
                    a += gx * gx;
                    b += gx * gy;
                    c += gy * gy;
                }
            }
            let half_trace = (a + c) * 0.5;
            let diff = (a - c) * 0.5;
            *out = half_trace - (diff * diff + b * b).sqrt();
        }
    });
    response
}

/// Detect up to `max_corners` strong corners, strongest first.
///
/// Candidates must reach `quality_level` times the best response and be a
/// 3x3 local maximum; accepted corners are kept at least `min_distance` apart.
pub fn good_features_to_track(img: &GrayImage, params: &FeatureParams) -> Vec<[f32; 2]> {
    let (w, h) = (img.width as usize, img.height as usize);
    if w < 3 || h < 3 || params.max_corners == 0 {
        return Vec::new();
    }
    let response = min_eigen_response(img);
    let max_response = response.iter().copied().fold(0.0f32, f32::max);
    if max_response <= f32::EPSILON {
        return Vec::new();
    }
    let threshold = max_response * params.quality_level;

    let mut candidates: Vec<(f32, usize, usize)> = Vec::new();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let v = response[y * w + x];
            if v < threshold {
                continue;
            }
            let is_peak = (-1i32..=1).all(|dy| {
                (-1i32..=1).all(|dx| {
                    let n = (y as i32 + dy) as usize * w + (x as i32 + dx) as usize;
                    response[n] <= v
                })
            });
            if is_peak {
                candidates.push((v, x, y));
            }
        }
    }
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.2.cmp(&b.2)).then(a.1.cmp(&b.1)));

    let min_dist = params.min_distance.max(0.0);
    if min_dist < 1.0 {
        return candidates
            .into_iter()
            .take(params.max_corners)
            .map(|(_, x, y)| [x as f32, y as f32])
            .collect();
    }

    // Bucket accepted corners on a grid so each distance check only looks at
    // the neighboring cells.
    let cell = min_dist;
    let grid_w = (w as f32 / cell).ceil() as usize + 1;
    let grid_h = (h as f32 / cell).ceil() as usize + 1;
    let mut grid: Vec<Vec<[f32; 2]>> = vec![Vec::new(); grid_w * grid_h];
    let min_dist_sq = min_dist * min_dist;
    let mut corners = Vec::new();

    for (_, x, y) in candidates {
        let p = [x as f32, y as f32];
        let cx = (p[0] / cell) as usize;
        let cy = (p[1] / cell) as usize;
        let mut free = true;
        'scan: for gy in cy.saturating_sub(1)..=(cy + 1).min(grid_h - 1) {
            for gx in cx.saturating_sub(1)..=(cx + 1).min(grid_w - 1) {
                for q in &grid[gy * grid_w + gx] {
                    let (ddx, ddy) = (q[0] - p[0], q[1] - p[1]);
                    if ddx * ddx + ddy * ddy < min_dist_sq {
                        free = false;
                        break 'scan;
                    }
                }
            }
        }
        if free {
            grid[cy * grid_w + cx].push(p);
            corners.push(p);
            if corners.len() >= params.max_corners {
                break;
            }
        }
    }
    corners
}
