//! reelfix pipeline - windowed clip processing and batch jobs.
//!
//! A clip is processed in two passes over a resolved frame window: the first
//! estimates and smooths camera motion, the second compensates, enhances and
//! encodes every frame.

pub mod config;
pub mod controller;
pub mod jobs;
pub mod metrics;

use reelfix_core::ReelError;
use std::path::PathBuf;
use thiserror::Error;

pub use config::{JobSpec, RestoreConfig};
pub use controller::{
    ClipFlags, ClipResult, Controller, ControllerSettings, ProcessedClip, WindowRequest,
};
pub use jobs::{JobOutcome, JobRunner, JobStatus, ResolvedJob};
pub use metrics::{compute_video_metrics, MetricsParams, QualityMetrics};

/// Why a single clip could not be produced.
#[derive(Error, Debug)]
pub enum ClipError {
    #[error("could not open source {path}: {source}")]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: ReelError,
    },

    #[error("no frames to read in {path}: {detail}")]
    EmptyWindow { path: PathBuf, detail: String },

    #[error("could not open writer for {path}: {source}")]
    SinkOpen {
        path: PathBuf,
        #[source]
        source: ReelError,
    },

    #[error("processing {path} failed: {source}")]
    Stream {
        path: PathBuf,
        #[source]
        source: ReelError,
    },
}
