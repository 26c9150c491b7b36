//! Motion compensation: warping a frame by a similarity transform.

use glam::DVec2;
use rayon::prelude::*;
use reelfix_core::{FrameBuffer, Transform};

/// Warp `frame` by `transform` into a `width x height` frame.
///
/// The transform is the forward mapping from source to destination; each
/// destination pixel samples the source at the inverse-mapped position with
/// bilinear interpolation. Positions outside the source take the nearest edge
/// pixel.
pub fn compensate(frame: &FrameBuffer, transform: Transform, width: u32, height: u32) -> FrameBuffer {
    if transform.is_identity() && frame.width == width && frame.height == height {
        return frame.clone();
    }
    let mut out = FrameBuffer::new(width, height, frame.format);
    if width == 0 || height == 0 || frame.width == 0 || frame.height == 0 {
        return out;
    }

    let inverse = transform.to_affine().inverse();
    let channels = frame.channels();
    let src_w = frame.width as i64;
    let src_h = frame.height as i64;
    let src_stride = frame.stride();
    let src = &frame.data;
    let dst_stride = out.stride();

    out.data
        .par_chunks_mut(dst_stride)
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..width as usize {
                let p = inverse.transform_point2(DVec2::new(x as f64, y as f64));
                let x0 = p.x.floor();
                let y0 = p.y.floor();
                let fx = p.x - x0;
                let fy = p.y - y0;
                let (x0, y0) = (x0 as i64, y0 as i64);
                let xa = x0.clamp(0, src_w - 1) as usize;
                let xb = (x0 + 1).clamp(0, src_w - 1) as usize;
                let ya = y0.clamp(0, src_h - 1) as usize;
                let yb = (y0 + 1).clamp(0, src_h - 1) as usize;

                let i00 = ya * src_stride + xa * channels;
                let i10 = ya * src_stride + xb * channels;
                let i01 = yb * src_stride + xa * channels;
                let i11 = yb * src_stride + xb * channels;
                let dst = &mut row[x * channels..(x + 1) * channels];
                for (c, out_px) in dst.iter_mut().enumerate() {
                    let top = src[i00 + c] as f64 * (1.0 - fx) + src[i10 + c] as f64 * fx;
                    let bottom = src[i01 + c] as f64 * (1.0 - fx) + src[i11 + c] as f64 * fx;
                    let v = top * (1.0 - fy) + bottom * fy;
                    *out_px = (v + 0.5).clamp(0.0, 255.0) as u8;
                }
            }
        });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelfix_core::PixelFormat;

    fn gradient(w: u32, h: u32) -> FrameBuffer {
        let mut f = FrameBuffer::new(w, h, PixelFormat::Rgb8);
        for y in 0..h {
            for (x, px) in f.row_mut(y).chunks_exact_mut(3).enumerate() {
                px[0] = (x * 10) as u8;
                px[1] = (y * 10) as u8;
                px[2] = 128;
            }
        }
        f
    }

    #[test]
    fn test_identity_is_exact() {
        let f = FrameBuffer::test_pattern(40, 30);
        assert_eq!(compensate(&f, Transform::IDENTITY, 40, 30), f);
    }

    #[test]
    fn test_zero_rotation_integer_shift() {
        let f = gradient(8, 6);
        let out = compensate(&f, Transform::new(2.0, 1.0, 0.0), 8, 6);
        // dst(x, y) = src(x - 2, y - 1)
        assert_eq!(out.pixel(5, 4), f.pixel(3, 3));
        assert_eq!(out.pixel(2, 1), f.pixel(0, 0));
    }

    #[test]
    fn test_border_replicates_edge() {
        let f = gradient(8, 6);
        let out = compensate(&f, Transform::new(3.0, 0.0, 0.0), 8, 6);
        for x in 0..3 {
            assert_eq!(out.pixel(x, 2), f.pixel(0, 2));
        }
        let out = compensate(&f, Transform::new(0.0, -2.0, 0.0), 8, 6);
        assert_eq!(out.pixel(4, 5), f.pixel(4, 5));
        assert_eq!(out.pixel(4, 4), f.pixel(4, 5));
    }

    #[test]
    fn test_half_pixel_shift_interpolates() {
        let f = gradient(8, 6);
        let out = compensate(&f, Transform::new(0.5, 0.0, 0.0), 8, 6);
        // Halfway between 30 and 40.
        assert_eq!(out.pixel(4, 0)[0], 35);
    }

    #[test]
    fn test_rotation_keeps_shape_and_center() {
        let f = FrameBuffer::filled(32, 24, [90, 10, 200]);
        let out = compensate(&f, Transform::new(0.0, 0.0, 0.3), 32, 24);
        assert_eq!((out.width, out.height), (32, 24));
        assert_eq!(out, f);
    }
}
