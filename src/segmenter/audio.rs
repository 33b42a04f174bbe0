//! AAC audio segmenter
//!
//! Samples are placed on a sample-count timeline (`expected_pts`), so every
//! fragment duration is an exact multiple of the frame duration and arrival
//! jitter never leaks into the media timeline.

use bytes::Bytes;
use std::time::Duration;

use super::{PendingSample, SegmenterConfig, SegmenterCore};
use crate::error::{DashError, Result};
use crate::frame::{AudioFrame, MediaKind};
use crate::segment::{Sample, SampleEntry, SegmentBuffer, TrackDescription};

/// MPEG-4 sampling frequency table (ISO/IEC 14496-3, 1.6.3.4)
const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// AAC-LC audio object type
const AOT_AAC_LC: u8 = 2;

/// Fields of an ADTS header that matter for the AudioSpecificConfig
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    pub object_type: u8,
    pub sampling_index: u8,
    pub channel_config: u8,
    pub header_len: usize,
    pub frame_len: usize,
}

impl AdtsHeader {
    /// Parse an ADTS header at the start of `data`. `Ok(None)` when the data
    /// does not start with the ADTS syncword (raw AAC).
    pub fn parse(data: &[u8]) -> Result<Option<Self>> {
        if data.len() < 2 || data[0] != 0xFF || (data[1] & 0xF0) != 0xF0 {
            return Ok(None);
        }
        if data.len() < 7 {
            return Err(DashError::InvalidBitstream(format!(
                "truncated ADTS header ({} bytes)",
                data.len()
            )));
        }
        let protection_absent = data[1] & 0x01 == 1;
        let header_len = if protection_absent { 7 } else { 9 };
        if data.len() < header_len {
            return Err(DashError::InvalidBitstream(
                "truncated ADTS header with CRC".to_string(),
            ));
        }
        let frame_len = (((data[3] & 0x03) as usize) << 11)
            | ((data[4] as usize) << 3)
            | ((data[5] as usize) >> 5);
        let sampling_index = (data[2] >> 2) & 0x0F;
        if sampling_index as usize >= SAMPLE_RATES.len() {
            return Err(DashError::InvalidBitstream(format!(
                "reserved ADTS sampling index {}",
                sampling_index
            )));
        }
        if frame_len < header_len {
            return Err(DashError::InvalidBitstream(format!(
                "ADTS frame length {} shorter than header",
                frame_len
            )));
        }
        Ok(Some(Self {
            object_type: ((data[2] >> 6) & 0x03) + 1,
            sampling_index,
            channel_config: ((data[2] & 0x01) << 2) | (data[3] >> 6),
            header_len,
            frame_len,
        }))
    }

    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATES[self.sampling_index as usize]
    }
}

/// Build a 2-byte (or 5-byte for non-standard rates) AudioSpecificConfig
pub fn audio_specific_config(object_type: u8, sample_rate: u32, channels: u16) -> Vec<u8> {
    let channel_config = (channels.min(7)) as u32;
    match SAMPLE_RATES.iter().position(|&r| r == sample_rate) {
        Some(index) => {
            let bits: u16 = ((object_type as u16 & 0x1F) << 11)
                | ((index as u16) << 7)
                | ((channel_config as u16) << 3);
            bits.to_be_bytes().to_vec()
        }
        None => {
            // escape index 0xF followed by an explicit 24-bit rate
            let bits: u64 = ((object_type as u64 & 0x1F) << 35)
                | (0xF << 31)
                | ((sample_rate as u64 & 0xFF_FFFF) << 7)
                | ((channel_config as u64) << 3);
            bits.to_be_bytes()[3..].to_vec()
        }
    }
}

/// Segmenter for AAC tracks
#[derive(Debug)]
pub struct AudioSegmenter {
    pub(crate) core: SegmenterCore,
    sample_rate: u32,
    channels: u16,
    samples: u32,
    last_pts: Duration,
    adts: Option<AdtsHeader>,
}

impl AudioSegmenter {
    pub fn new(config: &SegmenterConfig) -> Self {
        Self {
            core: SegmenterCore::new(MediaKind::Audio, config),
            sample_rate: 0,
            channels: 0,
            samples: 0,
            last_pts: Duration::ZERO,
            adts: None,
        }
    }

    pub(crate) fn manage_frame(&mut self, frame: &AudioFrame) -> Result<bool> {
        if frame.data.is_empty() {
            return Err(DashError::InvalidBitstream("empty audio frame".to_string()));
        }
        let adts = AdtsHeader::parse(&frame.data)?;
        let payload = match adts {
            Some(h) => frame.data.slice(h.header_len..h.frame_len.min(frame.data.len())),
            None => frame.data.clone(),
        };

        let (_, discontinuity) = self.core.accept_pts(frame.pts);
        if discontinuity && !self.core.fragment.is_empty() {
            self.core.resync_pending = true;
        }

        self.sample_rate = match (frame.sample_rate, adts) {
            (0, Some(h)) => h.sample_rate(),
            (rate, _) => rate,
        };
        self.channels = match (frame.channels, adts) {
            (0, Some(h)) => h.channel_config as u16,
            (channels, _) => channels,
        };
        self.samples = frame.samples;
        self.last_pts = frame.pts;
        if adts.is_some() {
            self.adts = adts;
        }

        let start = self.core.expected_pts;
        Ok(self.core.stage(PendingSample {
            start,
            data: payload,
            is_sync: true,
        }))
    }

    pub(crate) fn update_config(&mut self) -> Result<()> {
        if self.last_pts.is_zero() {
            return Err(DashError::NotReady("no presentation timestamp yet"));
        }
        if self.samples == 0 {
            return Err(DashError::NotReady("no sample count yet"));
        }
        if self.sample_rate == 0 {
            return Err(DashError::NotReady("no sample rate yet"));
        }
        let frame_duration =
            self.samples as u64 * self.core.time_base as u64 / self.sample_rate as u64;
        if frame_duration == 0 {
            return Err(DashError::NotReady("frame shorter than one tick"));
        }
        self.core.frame_duration = frame_duration;
        self.core.mark_configured();
        Ok(())
    }

    /// Refresh the codec metadata and describe the track for the init segment
    pub(crate) fn update_metadata(&mut self) -> Result<TrackDescription> {
        let asc = match self.adts {
            Some(h) => audio_specific_config(h.object_type, h.sample_rate(), h.channel_config as u16),
            None => audio_specific_config(AOT_AAC_LC, self.sample_rate, self.channels),
        };
        self.core.metadata = asc.clone();
        Ok(TrackDescription {
            track_id: super::FMP4_TRACK_ID,
            timescale: self.core.time_base,
            entry: SampleEntry::Aac {
                channels: self.channels,
                sample_rate: self.sample_rate,
                audio_specific_config: asc,
                bitrate: self.core.bitrate,
            },
        })
    }

    pub(crate) fn generate_segment(&mut self, buffer: &mut SegmentBuffer) -> Result<bool> {
        self.core.ensure_configured()?;
        let Some(pending) = self.core.current.take() else {
            return Ok(false);
        };

        let mut cut = Ok(false);
        if self.core.resync_pending && self.core.fragment.is_empty() {
            self.core.resync_pending = false;
        }
        if self.core.resync_pending {
            if buffer.is_empty() {
                self.core.resync_pending = false;
                cut = self.core.finalize(buffer);
            } else if self.core.bridge_gap(pending.start) {
                self.core.resync_pending = false;
            } else {
                // backwards jump: cut as soon as the buffer is published
                tracing::debug!(
                    "Track {}: resync cut deferred until the held fragment is published",
                    self.core.track_id
                );
            }
        }

        self.append(pending);

        let mut completed = cut?;
        if !completed && self.core.threshold_reached() {
            if buffer.is_empty() {
                completed = self.core.finalize(buffer)?;
            } else {
                tracing::debug!(
                    "Track {}: threshold reached but previous fragment unpublished, deferring",
                    self.core.track_id
                );
            }
        }
        Ok(completed)
    }

    pub(crate) fn absorb_pending(&mut self) {
        if let Some(pending) = self.core.current.take() {
            self.append(pending);
        }
    }

    fn append(&mut self, pending: PendingSample) {
        let sample = Sample {
            duration: self.core.sample_duration(),
            is_sync: true,
            data: pending.data,
        };
        self.core.push_sample(pending.start, sample);
    }

    pub(crate) fn codec_string(&self) -> String {
        let object_type = self.adts.map(|h| h.object_type).unwrap_or(AOT_AAC_LC);
        format!("mp4a.40.{}", object_type)
    }
}

/// Split an ADTS elementary stream into frames
pub fn split_adts(data: &Bytes) -> Result<Vec<Bytes>> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let header = AdtsHeader::parse(&data[pos..])?.ok_or_else(|| {
            DashError::InvalidBitstream(format!("missing ADTS syncword at offset {}", pos))
        })?;
        let end = pos + header.frame_len;
        if end > data.len() {
            tracing::warn!("Dropping truncated trailing ADTS frame at offset {}", pos);
            break;
        }
        frames.push(data.slice(pos..end));
        pos = end;
    }
    Ok(frames)
}
