use anyhow::{Context, Result};
use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collect::global_variables::{
    DEFAULT_BUFFER_DISTANCE, DEFAULT_BUFFER_SEGMENTS, DEFAULT_POLL_INTERVAL_SECS,
    PDOK_BGT_CUSTOM_URL,
};
use crate::collect::pdok::DownloadFormat;
use crate::error::BgtError;
use crate::geometric::bgt_layer::OutputFormat;
use crate::geometric::clip::ClipMode;
use crate::geometric::linearize::{DEFAULT_ARC_STEP_DEGREES, MIN_ARC_STEP_DEGREES};

/// Settings of a BGT download run.
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// buffer_distance = 50.0
/// clip_mode = "bbox"
/// output_format = "gpkg"
/// poll_timeout_secs = 900
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BgtConfig {
    /// Custom download endpoint; status and download links are resolved against it
    pub api_url: String,
    pub format: DownloadFormat,
    pub poll_interval_secs: u64,
    /// Give up waiting for the download request after this many seconds
    pub poll_timeout_secs: Option<u64>,
    /// Limit on each API call (submit, status)
    pub request_timeout_secs: u64,
    /// Limit on fetching the archive, unbounded by default
    pub download_timeout_secs: Option<u64>,
    /// Buffer around the area of interest, in metres (RD New)
    pub buffer_distance: f64,
    /// Segments per quarter circle of the buffer
    pub buffer_segments: i32,
    pub clip_mode: ClipMode,
    pub output_format: OutputFormat,
    /// Directory for the downloaded archive and the extracted GML.
    /// A temporary directory is used when not set.
    pub work_dir: Option<PathBuf>,
    /// Keep the temporary work directory after the run
    pub keep_downloads: bool,
    /// Maximum angle between two stroked vertices of a GML arc
    pub arc_step_degrees: f64,
}

impl Default for BgtConfig {
    fn default() -> Self {
        BgtConfig {
            api_url: PDOK_BGT_CUSTOM_URL.to_string(),
            format: DownloadFormat::default(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            poll_timeout_secs: None,
            request_timeout_secs: 300,
            download_timeout_secs: None,
            buffer_distance: DEFAULT_BUFFER_DISTANCE,
            buffer_segments: DEFAULT_BUFFER_SEGMENTS,
            clip_mode: ClipMode::default(),
            output_format: OutputFormat::default(),
            work_dir: None,
            keep_downloads: false,
            arc_step_degrees: DEFAULT_ARC_STEP_DEGREES,
        }
    }
}

impl BgtConfig {
    /// Load a configuration file (format taken from the extension, usually TOML)
    pub fn from_file(path: &Path) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path))
            .build()
            .with_context(|| format!("Failed to read configuration file {:?}", path))?;
        let bgt_config: BgtConfig = config
            .try_deserialize()
            .with_context(|| format!("Invalid configuration in {:?}", path))?;
        bgt_config.validate()?;
        Ok(bgt_config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.buffer_distance.is_finite() || self.buffer_distance < 0.0 {
            return Err(BgtError::InvalidUserInput(format!(
                "buffer_distance must be a non-negative number, got {}",
                self.buffer_distance
            ))
            .into());
        }
        if self.buffer_segments < 1 {
            return Err(BgtError::InvalidUserInput(format!(
                "buffer_segments must be at least 1, got {}",
                self.buffer_segments
            ))
            .into());
        }
        if self.poll_interval_secs == 0 {
            return Err(
                BgtError::InvalidUserInput("poll_interval_secs must be > 0".to_string()).into(),
            );
        }
        if self.request_timeout_secs == 0 || self.download_timeout_secs == Some(0) {
            return Err(BgtError::InvalidUserInput(
                "request_timeout_secs and download_timeout_secs must be > 0".to_string(),
            )
            .into());
        }
        if !(MIN_ARC_STEP_DEGREES..=90.0).contains(&self.arc_step_degrees) {
            return Err(BgtError::InvalidUserInput(format!(
                "arc_step_degrees must lie between {} and 90, got {}",
                MIN_ARC_STEP_DEGREES,
                self.arc_step_degrees
            ))
            .into());
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_timeout(&self) -> Option<Duration> {
        self.poll_timeout_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_timeout(&self) -> Option<Duration> {
        self.download_timeout_secs.map(Duration::from_secs)
    }
}
