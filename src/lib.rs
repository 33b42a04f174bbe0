//! Live DASH segmenter
//!
//! Turns continuous streams of encoded audio (AAC) and video (H.264) frames
//! into fragmented MP4 init and media segments with drift-free timing, and
//! keeps several tracks aligned on a common timeline while publishing them
//! next to a live MPD.

pub mod config;
pub mod config_file;
pub mod dasher;
pub mod error;
pub mod frame;
pub mod logging;
pub mod manifest;
pub mod segment;
pub mod segmenter;
pub mod service;

#[cfg(test)]
mod integration;

pub use config::DasherConfig;
pub use dasher::{CycleReport, Dasher};
pub use error::{DashError, Result};
pub use frame::{AudioFrame, Frame, MediaKind, TrackId, VideoFrame};
pub use segment::SegmentBuffer;
pub use segmenter::{Segmenter, SegmenterConfig, SegmenterState};
