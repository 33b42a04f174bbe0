//! H.264 video segmenter
//!
//! Fragments may only start on an IDR access unit. Once the target duration
//! is reached the cut is deferred to the next IDR, so a fragment can run
//! longer than the target but always decodes on its own.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::VecDeque;

use super::{PendingSample, SegmenterConfig, SegmenterCore};
use crate::error::{DashError, Result};
use crate::frame::{MediaKind, VideoFrame};
use crate::segment::{Sample, SampleEntry, SegmentBuffer, TrackDescription};

const NAL_SLICE: u8 = 1;
const NAL_IDR: u8 = 5;
const NAL_SEI: u8 = 6;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;
const NAL_AUD: u8 = 9;

/// Frames kept while waiting for configuration
const MAX_PREROLL: usize = 256;

/// Codec string used before an SPS has been seen (Constrained Baseline 3.0)
pub const DEFAULT_AVC_CODEC: &str = "avc1.42c01e";

/// Split an Annex-B byte stream into NAL units (start codes removed)
pub fn split_annexb(data: &Bytes) -> Vec<Bytes> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut nals = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let mut end = match starts.get(n + 1) {
            Some(next) => next - 3,
            None => data.len(),
        };
        // zero bytes before a start code belong to the 4-byte form
        while end > start && data[end - 1] == 0 {
            end -= 1;
        }
        if end > start {
            nals.push(data.slice(start..end));
        }
    }
    nals
}

/// Group the NAL units of an Annex-B stream into access units, each
/// re-emitted with 4-byte start codes.
pub fn split_access_units(data: &Bytes) -> Vec<Bytes> {
    let mut units = Vec::new();
    let mut current: Vec<Bytes> = Vec::new();
    let mut seen_vcl = false;

    let mut flush = |current: &mut Vec<Bytes>| {
        if current.is_empty() {
            return;
        }
        let mut au = BytesMut::new();
        for nal in current.drain(..) {
            au.put_u32(1);
            au.put_slice(&nal);
        }
        units.push(au.freeze());
    };

    for nal in split_annexb(data) {
        let nal_type = nal[0] & 0x1F;
        let starts_new = match nal_type {
            NAL_AUD => true,
            NAL_SPS | NAL_PPS | NAL_SEI => seen_vcl,
            // first_mb_in_slice == 0 is coded as a single '1' bit
            NAL_SLICE | NAL_IDR => seen_vcl && nal.len() > 1 && nal[1] & 0x80 != 0,
            _ => false,
        };
        if starts_new {
            flush(&mut current);
            seen_vcl = false;
        }
        if nal_type == NAL_SLICE || nal_type == NAL_IDR {
            seen_vcl = true;
        }
        current.push(nal);
    }
    flush(&mut current);
    units
}

/// Segmenter for H.264 tracks
#[derive(Debug)]
pub struct VideoSegmenter {
    pub(crate) core: SegmenterCore,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    width: u32,
    height: u32,
    last_ticks: Option<u64>,
    prev_ticks: Option<u64>,
    /// Frames managed before configuration succeeded
    preroll: VecDeque<PendingSample>,
    /// Actual start (ticks) of the last sample in the open fragment
    last_sample_start: u64,
}

impl VideoSegmenter {
    pub fn new(config: &SegmenterConfig) -> Self {
        Self {
            core: SegmenterCore::new(MediaKind::Video, config),
            sps: None,
            pps: None,
            width: 0,
            height: 0,
            last_ticks: None,
            prev_ticks: None,
            preroll: VecDeque::new(),
            last_sample_start: 0,
        }
    }

    pub(crate) fn manage_frame(&mut self, frame: &VideoFrame) -> Result<bool> {
        let nals = split_annexb(&frame.data);
        if nals.is_empty() {
            return Err(DashError::InvalidBitstream(
                "no Annex-B start code in video frame".to_string(),
            ));
        }

        let mut sample = BytesMut::with_capacity(frame.data.len() + 4 * nals.len());
        let mut is_key = false;
        let mut sps = None;
        let mut pps = None;
        for nal in nals {
            match nal[0] & 0x1F {
                NAL_SPS => sps = Some(nal),
                NAL_PPS => pps = Some(nal),
                NAL_AUD => {}
                nal_type => {
                    if nal_type == NAL_IDR {
                        is_key = true;
                    }
                    sample.put_u32(nal.len() as u32);
                    sample.put_slice(&nal);
                }
            }
        }

        if let Some(sps) = sps {
            if self.core.init_generated && self.sps.as_ref() != Some(&sps) {
                tracing::warn!("Track {}: SPS changed mid-stream", self.core.track_id);
            }
            self.sps = Some(sps);
        }
        if let Some(pps) = pps {
            self.pps = Some(pps);
        }
        if sample.is_empty() {
            tracing::debug!(
                "Track {}: access unit carried parameter sets only",
                self.core.track_id
            );
            return Ok(false);
        }

        let (actual, _) = self.core.accept_pts(frame.pts);
        if frame.width > 0 && frame.height > 0 {
            self.width = frame.width;
            self.height = frame.height;
        }
        self.prev_ticks = self.last_ticks;
        self.last_ticks = Some(actual);

        if !self.core.configured {
            if let Some(unconsumed) = self.core.current.take() {
                if self.preroll.len() >= MAX_PREROLL {
                    self.preroll.pop_front();
                }
                self.preroll.push_back(unconsumed);
            }
        }
        Ok(self.core.stage(PendingSample {
            start: actual,
            data: sample.freeze(),
            is_sync: is_key,
        }))
    }

    pub(crate) fn update_config(&mut self) -> Result<()> {
        if self.sps.is_none() {
            return Err(DashError::NotReady("waiting for SPS"));
        }
        if self.pps.is_none() {
            return Err(DashError::NotReady("waiting for PPS"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(DashError::NotReady("unknown picture size"));
        }
        let (Some(last), Some(prev)) = (self.last_ticks, self.prev_ticks) else {
            return Err(DashError::NotReady("need two frames to derive frame duration"));
        };
        if last > prev {
            self.core.frame_duration = last - prev;
        }
        if self.core.frame_duration == 0 {
            return Err(DashError::NotReady("frame timestamps do not advance"));
        }
        self.core.mark_configured();
        Ok(())
    }

    pub(crate) fn update_metadata(&mut self) -> Result<TrackDescription> {
        let (Some(sps), Some(pps)) = (&self.sps, &self.pps) else {
            return Err(DashError::NotReady("parameter sets missing"));
        };
        let mut metadata = Vec::with_capacity(4 + sps.len() + pps.len());
        metadata.extend_from_slice(&(sps.len() as u16).to_be_bytes());
        metadata.extend_from_slice(sps);
        metadata.extend_from_slice(&(pps.len() as u16).to_be_bytes());
        metadata.extend_from_slice(pps);
        self.core.metadata = metadata;

        Ok(TrackDescription {
            track_id: super::FMP4_TRACK_ID,
            timescale: self.core.time_base,
            entry: SampleEntry::Avc {
                width: self.width.min(u16::MAX as u32) as u16,
                height: self.height.min(u16::MAX as u32) as u16,
                sps: sps.to_vec(),
                pps: pps.to_vec(),
            },
        })
    }

    pub(crate) fn generate_segment(&mut self, buffer: &mut SegmentBuffer) -> Result<bool> {
        self.core.ensure_configured()?;
        let mut queue = std::mem::take(&mut self.preroll);
        queue.extend(self.core.current.take());

        let mut completed = false;
        let mut failure = None;
        for pending in queue {
            match self.append_frame(pending, buffer) {
                Ok(done) => completed |= done,
                Err(e) => failure = Some(e),
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(completed),
        }
    }

    pub(crate) fn absorb_pending(&mut self) {
        let mut queue = std::mem::take(&mut self.preroll);
        queue.extend(self.core.current.take());
        for pending in queue {
            if self.core.fragment.is_empty() && !pending.is_sync {
                continue;
            }
            self.close_last_sample(pending.start);
            self.push(pending);
        }
    }

    fn append_frame(&mut self, pending: PendingSample, buffer: &mut SegmentBuffer) -> Result<bool> {
        if self.core.fragment.is_empty() && !pending.is_sync {
            tracing::debug!(
                "Track {}: dropping frame at {} ticks while waiting for an IDR",
                self.core.track_id,
                pending.start
            );
            return Ok(false);
        }

        self.close_last_sample(pending.start);
        let cut = if pending.is_sync && self.core.threshold_reached() {
            if buffer.is_empty() {
                self.core.finalize(buffer)
            } else {
                tracing::debug!(
                    "Track {}: IDR boundary but previous fragment unpublished, deferring",
                    self.core.track_id
                );
                Ok(false)
            }
        } else {
            Ok(false)
        };
        self.push(pending);
        cut
    }

    fn push(&mut self, pending: PendingSample) {
        self.last_sample_start = pending.start;
        let sample = Sample {
            duration: self.core.sample_duration(),
            is_sync: pending.is_sync,
            data: pending.data,
        };
        self.core.push_sample(pending.start, sample);
    }

    /// Replace the provisional duration of the last buffered sample with the
    /// real distance to the next frame.
    fn close_last_sample(&mut self, next_start: u64) {
        let frame_duration = self.core.frame_duration;
        let tolerance = frame_duration * self.core.drift_tolerance_frames;
        let delta = next_start.saturating_sub(self.last_sample_start);
        let duration = if delta == 0 {
            tracing::warn!(
                "Track {}: non-increasing video timestamp at {} ticks",
                self.core.track_id,
                next_start
            );
            frame_duration
        } else if delta > tolerance {
            tracing::warn!(
                "Track {}: {} tick gap in video timestamps, capping sample duration",
                self.core.track_id,
                delta
            );
            frame_duration
        } else {
            delta
        };

        let core = &mut self.core;
        if let Some(last) = core.fragment.last_mut() {
            core.fragment_duration = core.fragment_duration - last.duration as u64 + duration;
            last.duration = duration.min(u32::MAX as u64) as u32;
        }
    }

    pub(crate) fn codec_string(&self) -> String {
        match &self.sps {
            Some(sps) if sps.len() >= 4 => {
                format!("avc1.{:02x}{:02x}{:02x}", sps[1], sps[2], sps[3])
            }
            _ => DEFAULT_AVC_CODEC.to_string(),
        }
    }
}
