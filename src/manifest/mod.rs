//! Manifest collaborator
//!
//! The dasher announces representations and published segments through
//! `ManifestSink`; `MpdManager` turns them into a live MPD on disk.

pub mod mpd;

use std::path::PathBuf;

use crate::error::Result;
use crate::frame::MediaKind;

pub use mpd::MpdManager;

/// One encoded variant of a track as declared in the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Representation {
    /// Adaptation set id ("0" video, "1" audio)
    pub adaptation_set: String,
    pub id: String,
    pub kind: MediaKind,
    /// RFC 6381 codec string
    pub codec: String,
    /// Bits per second
    pub bitrate: u32,
    /// Timescale of `$Time$` values and durations
    pub time_base: u32,
    /// e.g. `live_$RepresentationID$_$Time$.m4v`
    pub media_template: String,
    /// e.g. `live_$RepresentationID$_init.m4v`
    pub init_template: String,
}

/// Receiver of manifest updates
pub trait ManifestSink: Send {
    fn add_representation(&mut self, representation: Representation);

    /// Returns false when the representation was not known
    fn remove_representation(&mut self, set: &str, id: &str) -> bool;

    fn set_bitrate(&mut self, set: &str, id: &str, bps: u32) -> bool;

    fn set_codec(&mut self, set: &str, id: &str, codec: &str) -> bool;

    /// Append a published segment to the representation's timeline
    fn add_segment(&mut self, set: &str, id: &str, timestamp: u64, duration: u64);

    /// Point the manifest at a new file and segment duration
    fn relocate(&mut self, path: PathBuf, segment_duration_secs: u64);

    /// Persist the current manifest
    fn write(&mut self) -> Result<()>;
}
