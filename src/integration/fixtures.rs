//! Test fixtures
//!
//! Synthetic AAC and H.264 frames with just enough structure for the
//! segmenters: ADTS headers, SPS/PPS/IDR/non-IDR NAL units.

use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;

use crate::config::DasherConfig;
use crate::frame::{AudioFrame, Frame, VideoFrame};
use crate::segmenter::SegmenterConfig;

pub const AUDIO_TRACK: u32 = 1;
pub const VIDEO_TRACK: u32 = 2;

/// 1024 samples at 48 kHz, rounded down to whole microseconds
pub const AAC_FRAME_MICROS: u64 = 21_333;
/// Offset of the first audio frame on the reader clock
pub const AUDIO_START_MICROS: u64 = 1_000;

/// 25 fps
pub const VIDEO_FRAME_MILLIS: u64 = 40;

/// Reference output of a 48 kHz stereo audio track with the default
/// configuration: the init segment, the first 94-frame fragment and the
/// 47-frame trailing fragment flushed on removal
pub const GOLDEN_AUDIO_INIT: &[u8] = include_bytes!("golden/audio_init.m4a");
pub const GOLDEN_AUDIO_FIRST: &[u8] = include_bytes!("golden/audio_1_0.m4a");
pub const GOLDEN_AUDIO_TRAILING: &[u8] = include_bytes!("golden/audio_2_25662.m4a");

/// Baseline profile, level 3.0
const SPS: &[u8] = &[0x67, 0x42, 0xC0, 0x1E, 0xD9, 0x00, 0xA0, 0x47, 0xFE, 0xC8];
const PPS: &[u8] = &[0x68, 0xCE, 0x38, 0x80];

pub fn audio_config() -> SegmenterConfig {
    SegmenterConfig {
        track_id: AUDIO_TRACK,
        bitrate: 128_000,
        ..Default::default()
    }
}

pub fn video_config() -> SegmenterConfig {
    SegmenterConfig {
        track_id: VIDEO_TRACK,
        bitrate: 1_000_000,
        ..Default::default()
    }
}

/// Dasher configuration writing into `folder`
pub fn dasher_config(folder: &std::path::Path) -> DasherConfig {
    DasherConfig {
        folder: folder.to_path_buf(),
        base_name: "test".to_string(),
        ..Default::default()
    }
}

/// Raw (un-framed) AAC access unit, 48 kHz stereo
pub fn raw_aac_frame(pts: Duration) -> Frame {
    AudioFrame::aac(pts, 48000, 2, Bytes::from_static(&[0x21, 0x10, 0x04, 0x60, 0x8C, 0x1C])).into()
}

/// Audio frame number `n` of a 48 kHz stream starting at 1 ms
pub fn aac_frame_at(n: u64) -> Frame {
    raw_aac_frame(Duration::from_micros(AUDIO_START_MICROS + n * AAC_FRAME_MICROS))
}

/// ADTS-framed AAC-LC frame without CRC
pub fn adts_frame(sample_rate: u32, channels: u8, payload: &[u8]) -> Bytes {
    let index: u8 = match sample_rate {
        96000 => 0,
        88200 => 1,
        64000 => 2,
        48000 => 3,
        44100 => 4,
        32000 => 5,
        24000 => 6,
        22050 => 7,
        16000 => 8,
        _ => panic!("fixture does not cover {} Hz", sample_rate),
    };
    let frame_len = 7 + payload.len();
    let mut out = BytesMut::with_capacity(frame_len);
    out.put_u8(0xFF);
    out.put_u8(0xF1);
    out.put_u8((1 << 6) | (index << 2) | (channels >> 2));
    out.put_u8(((channels & 0x03) << 6) | ((frame_len >> 11) as u8 & 0x03));
    out.put_u8((frame_len >> 3) as u8);
    out.put_u8((((frame_len & 0x07) as u8) << 5) | 0x1F);
    out.put_u8(0xFC);
    out.put_slice(payload);
    out.freeze()
}

/// Annex-B access unit: SPS + PPS + IDR slice, or a single non-IDR slice
pub fn h264_frame(key: bool) -> Bytes {
    let mut out = BytesMut::new();
    if key {
        out.put_slice(&[0, 0, 0, 1]);
        out.put_slice(SPS);
        out.put_slice(&[0, 0, 0, 1]);
        out.put_slice(PPS);
        out.put_slice(&[0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00, 0x33, 0xFF]);
    } else {
        out.put_slice(&[0, 0, 0, 1, 0x41, 0x9A, 0x02, 0x0C, 0x0F]);
    }
    out.freeze()
}

/// Annex-B unit carrying only SPS and PPS
pub fn h264_parameter_sets() -> Bytes {
    let mut out = BytesMut::new();
    out.put_slice(&[0, 0, 0, 1]);
    out.put_slice(SPS);
    out.put_slice(&[0, 0, 0, 1]);
    out.put_slice(PPS);
    out.freeze()
}

/// Video frame number `n` of a 25 fps stream starting at `start`,
/// with an IDR every `gop` frames
pub fn video_frame_at(start: Duration, n: u64, gop: u64) -> Frame {
    let pts = start + Duration::from_millis(n * VIDEO_FRAME_MILLIS);
    VideoFrame::h264(pts, 640, 360, h264_frame(n % gop == 0)).into()
}
