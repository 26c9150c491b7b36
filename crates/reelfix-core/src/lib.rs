//! Reelfix Core - Foundation types for archival film restoration
//!
//! This crate provides the fundamental types used throughout reelfix:
//! - Frame buffers and pixel formats
//! - Similarity motion transforms
//! - Frame rates and frame-window resolution
//! - The shared error type

pub mod error;
pub mod frame;
pub mod geometry;
pub mod time;

pub use error::{ReelError, Result};
pub use frame::{FrameBuffer, PixelFormat};
pub use geometry::{PixelRect, Transform};
pub use time::{FrameRate, FrameWindow, DEFAULT_FPS, MIN_PLAUSIBLE_FPS};
