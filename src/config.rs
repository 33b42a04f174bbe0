//! Dasher configuration

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{DashError, Result};
use crate::frame::{MediaKind, TrackId};
use crate::segment::MAX_SEGMENT_BYTES;
use crate::segmenter::SegmenterConfig;

/// Ticks per second used for video timestamps
pub const DASH_VIDEO_TIME_BASE: u32 = 12800;

/// Segmenting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Target segment duration in whole seconds
    pub duration_secs: u64,

    /// Time base of video tracks (ticks per second)
    pub video_time_base: u32,

    /// Time base of audio tracks (ticks per second)
    pub audio_time_base: u32,

    /// Capacity of each segment buffer in bytes
    pub max_segment_bytes: usize,

    /// Arrival drift, in frames, tolerated before a resync
    pub drift_tolerance_frames: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            duration_secs: 2,
            video_time_base: DASH_VIDEO_TIME_BASE,
            audio_time_base: DASH_VIDEO_TIME_BASE,
            max_segment_bytes: MAX_SEGMENT_BYTES,
            drift_tolerance_frames: 4,
        }
    }
}

/// Manifest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestConfig {
    /// minBufferTime advertised in the MPD, in seconds
    pub min_buffer_time_secs: u64,

    /// Timeline entries kept per representation
    pub max_segments_in_mpd: usize,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            min_buffer_time_secs: 2,
            max_segments_in_mpd: 5,
        }
    }
}

/// Runtime configuration of a dasher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DasherConfig {
    /// Output folder for segments and manifest
    pub folder: PathBuf,

    /// Prefix of every file written
    pub base_name: String,

    /// Segment configuration
    pub segment: SegmentConfig,

    /// Manifest configuration
    pub manifest: ManifestConfig,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log output format (pretty, json)
    pub log_format: String,
}

impl Default for DasherConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("dash"),
            base_name: "stream".to_string(),
            segment: SegmentConfig::default(),
            manifest: ManifestConfig::default(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

fn base_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+$").ok())
        .as_ref()
}

/// Check that `name` can be used as a file name prefix
pub fn validate_base_name(name: &str) -> Result<()> {
    match base_name_pattern() {
        Some(pattern) if pattern.is_match(name) => Ok(()),
        _ => Err(DashError::Config(format!("invalid base name {:?}", name))),
    }
}

impl DasherConfig {
    /// Reject values the dasher cannot work with
    pub fn validate(&self) -> Result<()> {
        validate_base_name(&self.base_name)?;
        if self.segment.duration_secs == 0 {
            return Err(DashError::Config("segment duration must be at least 1 second".into()));
        }
        if self.segment.video_time_base == 0 || self.segment.audio_time_base == 0 {
            return Err(DashError::Config("time base must be non-zero".into()));
        }
        if self.segment.max_segment_bytes == 0 {
            return Err(DashError::Config("segment buffers need a non-zero capacity".into()));
        }
        Ok(())
    }

    /// Time base used for tracks of `kind`
    pub fn time_base(&self, kind: MediaKind) -> u32 {
        match kind {
            MediaKind::Video => self.segment.video_time_base,
            MediaKind::Audio => self.segment.audio_time_base,
        }
    }

    /// Segmenter parameters for a new track
    pub fn segmenter_config(&self, track_id: TrackId, kind: MediaKind) -> SegmenterConfig {
        SegmenterConfig {
            track_id,
            segment_duration_secs: self.segment.duration_secs,
            time_base: self.time_base(kind),
            drift_tolerance_frames: self.segment.drift_tolerance_frames,
            bitrate: 0,
        }
    }

    /// Path of the manifest file
    pub fn mpd_path(&self) -> PathBuf {
        self.folder.join(format!("{}.mpd", self.base_name))
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: DasherConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }
}
