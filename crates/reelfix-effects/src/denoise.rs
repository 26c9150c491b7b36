//! Non-local means denoising of color frames.
//!
//! The frame is split into luma and chroma (full-range BT.601 YCbCr). Luma is
//! filtered on its own with strength `h`; both chroma planes are filtered
//! together with `h_color`, sharing their patch weights.

use rayon::prelude::*;
use reelfix_core::{FrameBuffer, PixelFormat, ReelError, Result};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Non-local means parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseParams {
    /// Filter strength for luminance.
    pub h: f32,
    /// Filter strength for the color components.
    pub h_color: f32,
    /// Side of the patch compared between pixels (odd).
    pub template_window: u32,
    /// Side of the neighbourhood searched for similar patches (odd).
    pub search_window: u32,
}

impl Default for DenoiseParams {
    fn default() -> Self {
        Self {
            h: 10.0,
            h_color: 10.0,
            template_window: 7,
            search_window: 21,
        }
    }
}

impl DenoiseParams {
    pub fn validate(&self) -> Result<()> {
        if self.template_window % 2 == 0 || self.search_window % 2 == 0 {
            return Err(ReelError::InvalidParameter(format!(
                "denoise windows must be odd, got template {} search {}",
                self.template_window, self.search_window
            )));
        }
        if !(self.h > 0.0 && self.h_color > 0.0) {
            return Err(ReelError::InvalidParameter(
                "denoise strengths must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// A stack of same-sized planes padded by replicating their edges.
struct PaddedPlanes {
    planes: Vec<Vec<f32>>,
    width: usize,
    pad: usize,
}

impl PaddedPlanes {
    fn new(src: &[&[f32]], width: usize, height: usize, pad: usize) -> Self {
        let pw = width + 2 * pad;
        let ph = height + 2 * pad;
        let planes = src
            .iter()
            .map(|plane| {
                let mut out = vec![0.0f32; pw * ph];
                for py in 0..ph {
                    let y = py.saturating_sub(pad).min(height - 1);
                    for px in 0..pw {
                        let x = px.saturating_sub(pad).min(width - 1);
                        out[py * pw + px] = plane[y * width + x];
                    }
                }
                out
            })
            .collect();
        Self {
            planes,
            width: pw,
            pad,
        }
    }
}

/// Filter a group of planes that share patch weights.
fn nl_means(
    src: &[&[f32]],
    width: usize,
    height: usize,
    h: f32,
    template_window: u32,
    search_window: u32,
) -> Vec<Vec<f32>> {
    let channels = src.len();
    let tr = (template_window / 2) as usize;
    let sr = (search_window / 2) as usize;
    let padded = PaddedPlanes::new(src, width, height, tr + sr);
    let pw = padded.width;

    // Region of the padded image covered by every template: the image plus
    // `tr` on each side, starting at `sr` in padded coordinates.
    let rw = width + 2 * tr;
    let rh = height + 2 * tr;
    let base = padded.pad - tr;
    let inv_norm = 1.0 / ((2 * tr + 1).pow(2) * channels) as f64;
    let inv_h2 = 1.0 / (h as f64 * h as f64);

    // Per pixel: one weighted sum per channel, then the weight total.
    let stride = channels + 1;
    let mut acc = vec![0.0f64; width * height * stride];
    let mut integral = vec![0.0f64; (rw + 1) * (rh + 1)];
    let mut diff = vec![0.0f64; rw * rh];

    for oy in -(sr as isize)..=sr as isize {
        for ox in -(sr as isize)..=sr as isize {
            diff.par_chunks_mut(rw).enumerate().for_each(|(ry, row)| {
                let py = base + ry;
                let qy = (py as isize + oy) as usize;
                for (rx, d) in row.iter_mut().enumerate() {
                    let px = base + rx;
                    let qx = (px as isize + ox) as usize;
                    let mut sum = 0.0f64;
                    for plane in &padded.planes {
                        let e = (plane[py * pw + px] - plane[qy * pw + qx]) as f64;
                        sum += e * e;
                    }
                    *d = sum;
                }
            });

            let iw = rw + 1;
            for ry in 0..rh {
                let mut run = 0.0f64;
                for rx in 0..rw {
                    run += diff[ry * rw + rx];
                    integral[(ry + 1) * iw + rx + 1] = integral[ry * iw + rx + 1] + run;
                }
            }

            let integral = &integral;
            let planes = &padded.planes;
            let span = 2 * tr + 1;
            acc.par_chunks_mut(width * stride)
                .enumerate()
                .for_each(|(y, row)| {
                    let qy = (padded.pad + y) as isize + oy;
                    for x in 0..width {
                        // Template around (x, y) in region coordinates spans
                        // [x, x + span) x [y, y + span).
                        let ssd = integral[(y + span) * iw + x + span]
                            - integral[y * iw + x + span]
                            - integral[(y + span) * iw + x]
                            + integral[y * iw + x];
                        let w = (-(ssd.max(0.0) * inv_norm) * inv_h2).exp();
                        let qx = (padded.pad + x) as isize + ox;
                        let q = qy as usize * pw + qx as usize;
                        let cell = &mut row[x * stride..(x + 1) * stride];
                        for (c, plane) in planes.iter().enumerate() {
                            cell[c] += w * plane[q] as f64;
                        }
                        cell[channels] += w;
                    }
                });
        }
    }

    let mut out = vec![vec![0.0f32; width * height]; channels];
    for (i, cell) in acc.chunks_exact(stride).enumerate() {
        let wsum = cell[channels];
        for c in 0..channels {
            out[c][i] = (cell[c] / wsum) as f32;
        }
    }
    out
}

fn to_ycbcr(frame: &FrameBuffer) -> [Vec<f32>; 3] {
    let n = frame.width as usize * frame.height as usize;
    let mut y = Vec::with_capacity(n);
    let mut cb = Vec::with_capacity(n);
    let mut cr = Vec::with_capacity(n);
    for px in frame.data.chunks_exact(3) {
        let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
        y.push(0.299 * r + 0.587 * g + 0.114 * b);
        cb.push(128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b);
        cr.push(128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b);
    }
    [y, cb, cr]
}

fn from_ycbcr(y: &[f32], cb: &[f32], cr: &[f32], width: u32, height: u32) -> FrameBuffer {
    let mut frame = FrameBuffer::new(width, height, PixelFormat::Rgb8);
    let to_u8 = |v: f32| (v + 0.5).clamp(0.0, 255.0) as u8;
    for (i, px) in frame.data.chunks_exact_mut(3).enumerate() {
        let (l, u, v) = (y[i], cb[i] - 128.0, cr[i] - 128.0);
        px[0] = to_u8(l + 1.402 * v);
        px[1] = to_u8(l - 0.344_136 * u - 0.714_136 * v);
        px[2] = to_u8(l + 1.772 * u);
    }
    frame
}

/// Denoise a color frame with non-local means.
pub fn denoise_colored(frame: &FrameBuffer, params: &DenoiseParams) -> Result<FrameBuffer> {
    params.validate()?;
    let (w, h) = (frame.width as usize, frame.height as usize);
    if w == 0 || h == 0 {
        return Ok(frame.clone());
    }
    match frame.format {
        PixelFormat::Gray8 => {
            let plane: Vec<f32> = frame.data.iter().map(|&v| v as f32).collect();
            let out = nl_means(&[&plane], w, h, params.h, params.template_window, params.search_window);
            let data = out[0].iter().map(|&v| (v + 0.5).clamp(0.0, 255.0) as u8).collect();
            FrameBuffer::from_raw(frame.width, frame.height, PixelFormat::Gray8, data)
        }
        PixelFormat::Rgb8 => {
            let [y, cb, cr] = to_ycbcr(frame);
            trace!(width = w, height = h, "denoising luma");
            let luma = nl_means(&[&y], w, h, params.h, params.template_window, params.search_window);
            trace!(width = w, height = h, "denoising chroma");
            let chroma = nl_means(
                &[&cb, &cr],
                w,
                h,
                params.h_color,
                params.template_window,
                params.search_window,
            );
            Ok(from_ycbcr(&luma[0], &chroma[0], &chroma[1], frame.width, frame.height))
        }
    }
}
