//! Encoded frames handed to the segmenters by the upstream pipeline.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifier of an upstream reader; doubles as the representation id.
pub type TrackId = u32;

/// Media kind of a track or frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// Audio codecs the box writer knows how to describe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    /// AAC, raw access units or ADTS framed
    Aac,
}

/// Video codecs the box writer knows how to describe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    /// H.264/AVC, Annex-B access units
    H264,
}

/// One encoded audio frame
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub pts: Duration,
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel carried by this frame (1024 for AAC-LC)
    pub samples: u32,
    pub data: Bytes,
}

/// One encoded video access unit
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub pts: Duration,
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

/// A frame as delivered by a reader
#[derive(Debug, Clone)]
pub enum Frame {
    Audio(AudioFrame),
    Video(VideoFrame),
}

impl Frame {
    pub fn kind(&self) -> MediaKind {
        match self {
            Frame::Audio(_) => MediaKind::Audio,
            Frame::Video(_) => MediaKind::Video,
        }
    }

    pub fn pts(&self) -> Duration {
        match self {
            Frame::Audio(a) => a.pts,
            Frame::Video(v) => v.pts,
        }
    }

    pub fn data(&self) -> &Bytes {
        match self {
            Frame::Audio(a) => &a.data,
            Frame::Video(v) => &v.data,
        }
    }
}

impl AudioFrame {
    /// AAC frame with the usual 1024 samples per channel
    pub fn aac(pts: Duration, sample_rate: u32, channels: u16, data: Bytes) -> Self {
        Self {
            pts,
            codec: AudioCodec::Aac,
            sample_rate,
            channels,
            samples: 1024,
            data,
        }
    }
}

impl VideoFrame {
    pub fn h264(pts: Duration, width: u32, height: u32, data: Bytes) -> Self {
        Self {
            pts,
            codec: VideoCodec::H264,
            width,
            height,
            data,
        }
    }
}

impl From<AudioFrame> for Frame {
    fn from(frame: AudioFrame) -> Self {
        Frame::Audio(frame)
    }
}

impl From<VideoFrame> for Frame {
    fn from(frame: VideoFrame) -> Self {
        Frame::Video(frame)
    }
}
