//! reelfix effects - CPU frame filters.
//!
//! Provides motion compensation (affine warp), non-local means denoising and
//! 3x3 sharpening.

pub mod denoise;
pub mod sharpen;
pub mod warp;

pub use denoise::{denoise_colored, DenoiseParams};
pub use sharpen::{sharpen, SharpenKernel};
pub use warp::compensate;

use reelfix_core::{FrameBuffer, Result};
use serde::{Deserialize, Serialize};

/// Settings for the post-stabilization enhancement chain.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancementParams {
    pub denoise: DenoiseParams,
    pub sharpen_kernel: SharpenKernel,
}

impl EnhancementParams {
    /// Denoise then sharpen, each only if requested. With neither requested
    /// the frame is returned as is.
    pub fn apply(&self, frame: FrameBuffer, do_denoise: bool, do_sharpen: bool) -> Result<FrameBuffer> {
        let mut out = frame;
        if do_denoise {
            out = denoise_colored(&out, &self.denoise)?;
        }
        if do_sharpen {
            out = sharpen(&out, &self.sharpen_kernel);
        }
        Ok(out)
    }
}
