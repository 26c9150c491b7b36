//! Grayscale working images and Gaussian pyramids for the tracker.

use reelfix_core::{FrameBuffer, PixelFormat};

/// Luma plane with samples in `[0, 1]`, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayImage {
    pub data: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

impl GrayImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: vec![0.0; width as usize * height as usize],
            width,
            height,
        }
    }

    /// Luma of a decoded frame (BT.601 weights for RGB).
    pub fn from_frame(frame: &FrameBuffer) -> Self {
        let data = match frame.format {
            PixelFormat::Rgb8 => frame
                .data
                .chunks_exact(3)
                .map(|px| (0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32) / 255.0)
                .collect(),
            PixelFormat::Gray8 => frame.data.iter().map(|&v| v as f32 / 255.0).collect(),
        };
        Self {
            data,
            width: frame.width,
            height: frame.height,
        }
    }

    /// Sample with coordinates clamped to the image.
    #[inline]
    pub fn get(&self, x: i32, y: i32) -> f32 {
        let x = x.clamp(0, self.width as i32 - 1) as usize;
        let y = y.clamp(0, self.height as i32 - 1) as usize;
        self.data[y * self.width as usize + x]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, val: f32) {
        if x < self.width && y < self.height {
            self.data[(y * self.width + x) as usize] = val;
        }
    }

    /// Bilinear sample at a sub-pixel position; edges replicate.
    #[inline]
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = (x - x0, y - y0);
        let (xi, yi) = (x0 as i32, y0 as i32);
        let a = self.get(xi, yi) + (self.get(xi + 1, yi) - self.get(xi, yi)) * fx;
        let b = self.get(xi, yi + 1) + (self.get(xi + 1, yi + 1) - self.get(xi, yi + 1)) * fx;
        a + (b - a) * fy
    }

    #[inline]
    pub fn contains(&self, x: f32, y: f32) -> bool {
        (0.0..=(self.width as f32 - 1.0)).contains(&x) && (0.0..=(self.height as f32 - 1.0)).contains(&y)
    }

    /// Blur with the 5-tap binomial kernel and keep every other sample.
    fn pyr_down(&self) -> Self {
        const TAPS: [f32; 5] = [1.0, 4.0, 6.0, 4.0, 1.0];

        // Horizontal pass at full height, half width.
        let nw = self.width.div_ceil(2);
        let mut rows = GrayImage::new(nw, self.height);
        for y in 0..self.height as i32 {
            for x in 0..nw as i32 {
                let sx = 2 * x;
                let v: f32 = TAPS
                    .iter()
                    .enumerate()
                    .map(|(i, t)| t * self.get(sx + i as i32 - 2, y))
                    .sum();
                rows.set(x as u32, y as u32, v / 16.0);
            }
        }

        let nh = self.height.div_ceil(2);
        let mut out = GrayImage::new(nw, nh);
        for y in 0..nh as i32 {
            let sy = 2 * y;
            for x in 0..nw as i32 {
                let v: f32 = TAPS
                    .iter()
                    .enumerate()
                    .map(|(i, t)| t * rows.get(x, sy + i as i32 - 2))
                    .sum();
                out.set(x as u32, y as u32, v / 16.0);
            }
        }
        out
    }
}

/// Coarse-to-fine stack of images, full resolution first.
#[derive(Debug, Clone)]
pub struct ImagePyramid {
    pub levels: Vec<GrayImage>,
}

impl ImagePyramid {
    /// Up to `num_levels` levels; stops early once a level would drop below
    /// 16 pixels on a side.
    pub fn build(gray: &GrayImage, num_levels: u32) -> Self {
        let mut levels = vec![gray.clone()];
        while levels.len() < num_levels.max(1) as usize {
            let Some(top) = levels.last() else { break };
            if top.width < 16 || top.height < 16 {
                break;
            }
            let next = top.pyr_down();
            levels.push(next);
        }
        Self { levels }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Horizontal and vertical Sobel responses, edges replicated.
pub fn sobel_gradients(img: &GrayImage) -> (Vec<f32>, Vec<f32>) {
    let (w, h) = (img.width as i32, img.height as i32);
    let mut gx = Vec::with_capacity(img.data.len());
    let mut gy = Vec::with_capacity(img.data.len());
    for y in 0..h {
        for x in 0..w {
            let p = |dx: i32, dy: i32| img.get(x + dx, y + dy);
            gx.push(p(1, -1) + 2.0 * p(1, 0) + p(1, 1) - p(-1, -1) - 2.0 * p(-1, 0) - p(-1, 1));
            gy.push(p(-1, 1) + 2.0 * p(0, 1) + p(1, 1) - p(-1, -1) - 2.0 * p(0, -1) - p(1, -1));
        }
    }
    (gx, gy)
}
