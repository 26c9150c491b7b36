//! 3x3 convolution sharpening.

use rayon::prelude::*;
use reelfix_core::FrameBuffer;
use serde::{Deserialize, Serialize};

/// A 3x3 convolution kernel, row-major.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SharpenKernel(pub [[f32; 3]; 3]);

impl Default for SharpenKernel {
    fn default() -> Self {
        Self([[0.0, -1.0, 0.0], [-1.0, 5.0, -1.0], [0.0, -1.0, 0.0]])
    }
}

impl SharpenKernel {
    pub fn sum(&self) -> f32 {
        self.0.iter().flatten().sum()
    }
}

/// Mirror `i` into `[0, n)` without repeating the edge sample
/// (`gfedcb|abcdefgh|gfedcba`).
#[inline]
fn reflect_101(i: i64, n: i64) -> usize {
    if n == 1 {
        return 0;
    }
    let mut i = i;
    while i < 0 || i >= n {
        i = if i < 0 { -i } else { 2 * (n - 1) - i };
    }
    i as usize
}

/// Convolve every channel of `frame` with `kernel`, rounding and saturating
/// the result.
pub fn sharpen(frame: &FrameBuffer, kernel: &SharpenKernel) -> FrameBuffer {
    let mut out = FrameBuffer::new(frame.width, frame.height, frame.format);
    if frame.width == 0 || frame.height == 0 {
        return out;
    }
    let (w, h) = (frame.width as i64, frame.height as i64);
    let channels = frame.channels();
    let stride = frame.stride();
    let src = &frame.data;
    let k = kernel.0;

    out.data.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        let rows = [-1i64, 0, 1].map(|dy| reflect_101(y as i64 + dy, h) * stride);
        for x in 0..w {
            let cols = [-1i64, 0, 1].map(|dx| reflect_101(x + dx, w) * channels);
            for c in 0..channels {
                let mut acc = 0.0f32;
                for (ky, &ro) in rows.iter().enumerate() {
                    for (kx, &co) in cols.iter().enumerate() {
                        acc += k[ky][kx] * src[ro + co + c] as f32;
                    }
                }
                row[x as usize * channels + c] = acc.round().clamp(0.0, 255.0) as u8;
            }
        }
    });
    out
}
