//! Frame-by-frame quality scores between two clips (SSIM and MSE).

use reelfix_core::{FrameBuffer, PixelFormat, PixelRect};
use reelfix_media::{FrameSource, MediaBackend};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

const SSIM_WIN: usize = 7;
const SSIM_K1: f64 = 0.01;
const SSIM_K2: f64 = 0.03;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsParams {
    /// Pixels dropped from each edge before scoring, to ignore warp borders.
    pub crop_border: u32,
    /// Compare at most this many frames.
    pub max_frames: Option<u64>,
}

impl Default for MetricsParams {
    fn default() -> Self {
        Self {
            crop_border: 20,
            max_frames: None,
        }
    }
}

/// Averages over the compared frames. Scores are NaN when nothing was compared.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub frames: u64,
    pub ssim: f64,
    pub mse: f64,
}

impl QualityMetrics {
    pub fn empty() -> Self {
        Self {
            frames: 0,
            ssim: f64::NAN,
            mse: f64::NAN,
        }
    }
}

/// Luma of an RGB frame as a single-channel frame.
pub fn to_gray(frame: &FrameBuffer) -> FrameBuffer {
    match frame.format {
        PixelFormat::Gray8 => frame.clone(),
        PixelFormat::Rgb8 => {
            let mut out = FrameBuffer::new(frame.width, frame.height, PixelFormat::Gray8);
            for (dst, px) in out.data.iter_mut().zip(frame.data.chunks_exact(3)) {
                let y = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
                *dst = (y + 0.5).min(255.0) as u8;
            }
            out
        }
    }
}

/// Resize by averaging the source area under each destination pixel.
pub fn resize_area(frame: &FrameBuffer, width: u32, height: u32) -> FrameBuffer {
    if frame.width == width && frame.height == height {
        return frame.clone();
    }
    let mut out = FrameBuffer::new(width, height, frame.format);
    if width == 0 || height == 0 || frame.width == 0 || frame.height == 0 {
        return out;
    }
    let channels = frame.channels();
    let xs = spans(frame.width, width);
    let ys = spans(frame.height, height);
    let mut acc = vec![0.0f64; channels];
    for (dy, yspan) in ys.iter().enumerate() {
        let row = out.row_mut(dy as u32);
        for (dx, xspan) in xs.iter().enumerate() {
            acc.fill(0.0);
            let mut total = 0.0;
            for &(sy, wy) in yspan {
                let src_row = frame.row(sy);
                for &(sx, wx) in xspan {
                    let w = wx * wy;
                    total += w;
                    let px = &src_row[sx as usize * channels..(sx as usize + 1) * channels];
                    for (a, &v) in acc.iter_mut().zip(px) {
                        *a += w * v as f64;
                    }
                }
            }
            for (c, a) in acc.iter().enumerate() {
                row[dx * channels + c] = (a / total + 0.5).clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}

/// For each destination index, the source indices it covers and their overlap.
fn spans(src: u32, dst: u32) -> Vec<Vec<(u32, f64)>> {
    let scale = src as f64 / dst as f64;
    (0..dst)
        .map(|d| {
            let lo = d as f64 * scale;
            let hi = lo + scale;
            let first = lo.floor() as u32;
            let last = (hi.ceil() as u32).min(src);
            (first..last)
                .filter_map(|s| {
                    let overlap = (hi.min(s as f64 + 1.0) - lo.max(s as f64)).max(0.0);
                    (overlap > 1e-9).then_some((s, overlap))
                })
                .collect()
        })
        .collect()
}

/// Summed-area table with a zero first row and column.
fn integral(width: usize, height: usize, value: impl Fn(usize) -> f64) -> Vec<f64> {
    let iw = width + 1;
    let mut table = vec![0.0f64; iw * (height + 1)];
    for y in 0..height {
        let mut run = 0.0;
        for x in 0..width {
            run += value(y * width + x);
            table[(y + 1) * iw + x + 1] = table[y * iw + x + 1] + run;
        }
    }
    table
}

/// Mean structural similarity of two same-sized gray images over every full
/// 7x7 window. `data_range` of zero means "derive from `a`".
pub fn ssim_gray(a: &FrameBuffer, b: &FrameBuffer, data_range: f64) -> f64 {
    let (w, h) = (a.width as usize, a.height as usize);
    if w < SSIM_WIN || h < SSIM_WIN || !a.same_shape(b) {
        return f64::NAN;
    }
    let range = if data_range > 0.0 { data_range } else { gray_range(a) };
    let x = |i: usize| a.data[i] as f64;
    let y = |i: usize| b.data[i] as f64;
    let sx = integral(w, h, x);
    let sy = integral(w, h, y);
    let sxx = integral(w, h, |i| x(i) * x(i));
    let syy = integral(w, h, |i| y(i) * y(i));
    let sxy = integral(w, h, |i| x(i) * y(i));

    let np = (SSIM_WIN * SSIM_WIN) as f64;
    let cov_norm = np / (np - 1.0);
    let c1 = (SSIM_K1 * range).powi(2);
    let c2 = (SSIM_K2 * range).powi(2);
    let iw = w + 1;
    let window = |t: &[f64], x0: usize, y0: usize| {
        let (x1, y1) = (x0 + SSIM_WIN, y0 + SSIM_WIN);
        (t[y1 * iw + x1] - t[y0 * iw + x1] - t[y1 * iw + x0] + t[y0 * iw + x0]) / np
    };

    let mut total = 0.0;
    let mut count = 0usize;
    for y0 in 0..=h - SSIM_WIN {
        for x0 in 0..=w - SSIM_WIN {
            let ux = window(&sx, x0, y0);
            let uy = window(&sy, x0, y0);
            let vx = cov_norm * (window(&sxx, x0, y0) - ux * ux);
            let vy = cov_norm * (window(&syy, x0, y0) - uy * uy);
            let vxy = cov_norm * (window(&sxy, x0, y0) - ux * uy);
            let num = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let den = (ux * ux + uy * uy + c1) * (vx + vy + c2);
            total += num / den;
            count += 1;
        }
    }
    total / count as f64
}

/// Mean squared difference of two same-sized gray images.
pub fn mse_gray(a: &FrameBuffer, b: &FrameBuffer) -> f64 {
    if !a.same_shape(b) || a.data.is_empty() {
        return f64::NAN;
    }
    let sum: f64 = a
        .data
        .iter()
        .zip(&b.data)
        .map(|(&p, &q)| (p as f64 - q as f64).powi(2))
        .sum();
    sum / a.data.len() as f64
}

/// `max - min` of a gray image, or 255 when it is flat.
fn gray_range(frame: &FrameBuffer) -> f64 {
    let max = frame.data.iter().copied().max().unwrap_or(0);
    let min = frame.data.iter().copied().min().unwrap_or(0);
    if max > min {
        (max - min) as f64
    } else {
        255.0
    }
}

fn prepare(frame: &FrameBuffer, width: u32, height: u32, border: u32) -> FrameBuffer {
    let resized = resize_area(frame, width, height);
    let cropped = if border > 0 {
        resized.crop(PixelRect::inset(width, height, border))
    } else {
        resized
    };
    to_gray(&cropped)
}

/// Score `test` against `reference`, frame by frame from the start of both.
pub fn compute_video_metrics(
    backend: &dyn MediaBackend,
    reference: &Path,
    test: &Path,
    params: &MetricsParams,
) -> QualityMetrics {
    let open = |path: &Path| -> Option<Box<dyn FrameSource>> {
        backend
            .open_source(path)
            .map_err(|e| warn!(path = %path.display(), "cannot open for metrics: {e}"))
            .ok()
    };
    let (Some(mut ref_src), Some(mut test_src)) = (open(reference), open(test)) else {
        return QualityMetrics::empty();
    };

    let (ri, ti) = (*ref_src.info(), *test_src.info());
    let width = ri.width.min(ti.width);
    let height = ri.height.min(ti.height);
    let mut limit = ri.frame_count.min(ti.frame_count);
    if let Some(max) = params.max_frames {
        limit = limit.min(max);
    }

    let mut ssim_sum = 0.0;
    let mut mse_sum = 0.0;
    let mut frames = 0u64;
    while frames < limit {
        let (Ok(Some(r)), Ok(Some(t))) = (ref_src.read_frame(), test_src.read_frame()) else {
            break;
        };
        let g1 = prepare(&r, width, height, params.crop_border);
        let g2 = prepare(&t, width, height, params.crop_border);
        ssim_sum += ssim_gray(&g1, &g2, gray_range(&g1));
        mse_sum += mse_gray(&g1, &g2);
        frames += 1;
    }

    if frames == 0 {
        return QualityMetrics::empty();
    }
    let metrics = QualityMetrics {
        frames,
        ssim: ssim_sum / frames as f64,
        mse: mse_sum / frames as f64,
    };
    debug!(?metrics, "metrics computed");
    metrics
}
