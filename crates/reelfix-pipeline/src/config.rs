//! Restoration run configuration, loaded from JSON.

use crate::controller::ControllerSettings;
use crate::metrics::MetricsParams;
use reelfix_core::{ReelError, Result, DEFAULT_FPS};
use reelfix_effects::EnhancementParams;
use reelfix_media::ExportFormat;
use reelfix_tracking::MotionParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One clip to produce: a film, a time window and the operations to run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSpec {
    /// Film name, matched loosely against the file names in the video folder.
    pub film: String,
    /// `mm:ss` or `hh:mm:ss`; blank or missing starts at the beginning.
    pub start: Option<String>,
    /// `mm:ss` or `hh:mm:ss`; blank or missing runs to the end.
    pub end: Option<String>,
    /// Free-form names such as `"stabilize"`, `"denoise"`, `"sharpen"`.
    pub enhancements: Vec<String>,
    /// Also render an unstabilized reference and score the pair.
    pub compare: bool,
}

/// Everything a batch run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    pub video_folder: PathBuf,
    pub output_folder: PathBuf,
    pub smoothing_radius: usize,
    pub motion: MotionParams,
    pub enhancement: EnhancementParams,
    pub fps_fallback: f64,
    pub export: ExportFormat,
    /// Copy the source's audio onto each finished clip when ffmpeg is available.
    pub merge_audio: bool,
    pub metrics: MetricsParams,
    pub jobs: Vec<JobSpec>,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            video_folder: PathBuf::from("videos"),
            output_folder: PathBuf::from("processed_videos"),
            smoothing_radius: 30,
            motion: MotionParams::default(),
            enhancement: EnhancementParams::default(),
            fps_fallback: DEFAULT_FPS,
            export: ExportFormat::default(),
            merge_audio: true,
            metrics: MetricsParams::default(),
            jobs: Vec::new(),
        }
    }
}

impl RestoreConfig {
    /// Read a config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ReelError::NotFound(format!("Config not found: {}", path.display()))
            } else {
                ReelError::Io(e)
            }
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| ReelError::Serialization(format!("Bad config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.enhancement.denoise.validate()?;
        if !(self.fps_fallback > 0.0) {
            return Err(ReelError::InvalidParameter(format!(
                "fps_fallback must be positive, got {}",
                self.fps_fallback
            )));
        }
        Ok(())
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            motion: self.motion,
            smoothing_radius: self.smoothing_radius,
            enhancement: self.enhancement,
            fps_fallback: self.fps_fallback,
            export: self.export.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RestoreConfig::default();
        assert_eq!(config.video_folder, PathBuf::from("videos"));
        assert_eq!(config.output_folder, PathBuf::from("processed_videos"));
        assert_eq!(config.smoothing_radius, 30);
        assert_eq!(config.enhancement.denoise.h, 10.0);
        assert_eq!(config.enhancement.denoise.search_window, 21);
        assert!(config.merge_audio);
        assert_eq!(config.metrics.crop_border, 20);
    }

    #[test]
    fn test_partial_json() {
        let config = RestoreConfig::from_json(
            r#"{
                "video_folder": "archive",
                "smoothing_radius": 12,
                "jobs": [
                    { "film": "Zapruder", "start": "0:02", "end": "0:05",
                      "enhancements": ["Stabilize", "denoise"] },
                    { "film": "Nix", "compare": true }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.video_folder, PathBuf::from("archive"));
        assert_eq!(config.output_folder, PathBuf::from("processed_videos"));
        assert_eq!(config.controller_settings().smoothing_radius, 12);
        assert_eq!(config.jobs.len(), 2);
        assert_eq!(config.jobs[0].end.as_deref(), Some("0:05"));
        assert_eq!(config.jobs[1].start, None);
        assert!(config.jobs[1].compare);
        assert!(config.jobs[1].enhancements.is_empty());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "fps_fallback": 25.0, "merge_audio": false }}"#).unwrap();
        let config = RestoreConfig::load(file.path()).unwrap();
        assert_eq!(config.fps_fallback, 25.0);
        assert!(!config.merge_audio);
        assert_eq!(config.controller_settings().fps_fallback, 25.0);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = RestoreConfig::load(dir.path().join("nope.json"));
        assert!(matches!(missing, Err(ReelError::NotFound(_))));
        assert!(matches!(
            RestoreConfig::from_json("{ not json"),
            Err(ReelError::Serialization(_))
        ));
        let bad = RestoreConfig::from_json(
            r#"{ "enhancement": { "denoise": { "template_window": 4 } } }"#,
        );
        assert!(matches!(bad, Err(ReelError::InvalidParameter(_))));
    }
}
