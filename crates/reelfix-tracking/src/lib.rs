//! reelfix tracking - motion estimation and trajectory smoothing.

pub mod features;
pub mod flow;
pub mod pyramid;
pub mod similarity;
pub mod stabilize;

pub use features::{good_features_to_track, FeatureParams};
pub use flow::{SparseFlow, TrackerParams};
pub use pyramid::{sobel_gradients, GrayImage, ImagePyramid};
pub use similarity::{estimate_partial_affine, fit_partial_affine, RansacParams, SimilarityFit};
pub use stabilize::{
    moving_average, smooth_trajectory, MotionAccumulator, MotionData, MotionEstimator,
    MotionParams,
};
