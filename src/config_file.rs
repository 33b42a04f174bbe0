//! Configuration file support
//!
//! Loads dasher configuration from TOML files. Only the output section is
//! mandatory; everything else falls back to `DasherConfig::default()`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{DasherConfig, ManifestConfig, SegmentConfig};

/// Configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Output settings
    pub output: OutputSettings,
    /// Segment settings
    pub segment: Option<SegmentSettings>,
    /// Manifest settings
    pub manifest: Option<ManifestSettings>,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Folder receiving segments and the MPD
    pub folder: PathBuf,
    /// File name prefix
    pub base_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentSettings {
    /// Target segment duration in seconds
    pub duration_secs: u64,
    /// Video time base
    pub video_time_base: Option<u32>,
    /// Audio time base
    pub audio_time_base: Option<u32>,
    /// Segment buffer capacity in bytes
    pub max_segment_bytes: Option<usize>,
    /// Drift tolerance in frames
    pub drift_tolerance_frames: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestSettings {
    /// minBufferTime in seconds
    pub min_buffer_time_secs: Option<u64>,
    /// Sliding window of timeline entries
    pub max_segments_in_mpd: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: Option<String>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ConfigFile = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Generate default configuration file
    pub fn default_config() -> Self {
        let defaults = DasherConfig::default();
        Self {
            output: OutputSettings {
                folder: defaults.folder,
                base_name: defaults.base_name,
            },
            segment: Some(SegmentSettings {
                duration_secs: defaults.segment.duration_secs,
                video_time_base: Some(defaults.segment.video_time_base),
                audio_time_base: Some(defaults.segment.audio_time_base),
                max_segment_bytes: Some(defaults.segment.max_segment_bytes),
                drift_tolerance_frames: Some(defaults.segment.drift_tolerance_frames),
            }),
            manifest: Some(ManifestSettings {
                min_buffer_time_secs: Some(defaults.manifest.min_buffer_time_secs),
                max_segments_in_mpd: Some(defaults.manifest.max_segments_in_mpd),
            }),
            logging: Some(LoggingSettings {
                level: defaults.log_level,
                format: Some(defaults.log_format),
            }),
        }
    }

    /// Convert to DasherConfig
    pub fn into_dasher_config(self) -> DasherConfig {
        let defaults = DasherConfig::default();
        let segment = match self.segment {
            Some(s) => SegmentConfig {
                duration_secs: s.duration_secs,
                video_time_base: s.video_time_base.unwrap_or(defaults.segment.video_time_base),
                audio_time_base: s.audio_time_base.unwrap_or(defaults.segment.audio_time_base),
                max_segment_bytes: s
                    .max_segment_bytes
                    .unwrap_or(defaults.segment.max_segment_bytes),
                drift_tolerance_frames: s
                    .drift_tolerance_frames
                    .unwrap_or(defaults.segment.drift_tolerance_frames),
            },
            None => defaults.segment,
        };
        let manifest = match self.manifest {
            Some(m) => ManifestConfig {
                min_buffer_time_secs: m
                    .min_buffer_time_secs
                    .unwrap_or(defaults.manifest.min_buffer_time_secs),
                max_segments_in_mpd: m
                    .max_segments_in_mpd
                    .unwrap_or(defaults.manifest.max_segments_in_mpd),
            },
            None => defaults.manifest,
        };
        let (log_level, log_format) = match self.logging {
            Some(l) => (l.level, l.format.unwrap_or(defaults.log_format)),
            None => (defaults.log_level, defaults.log_format),
        };

        DasherConfig {
            folder: self.output.folder,
            base_name: self.output.base_name,
            segment,
            manifest,
            log_level,
            log_format,
        }
    }
}

/// Generate default configuration file at the specified path
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigFile::default_config();
    config.to_file(path)?;
    Ok(())
}
