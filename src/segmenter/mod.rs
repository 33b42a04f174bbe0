//! Per-track segmenters
//!
//! A segmenter consumes the frames of one track, derives their timing in
//! time-base ticks, decides where fragments end and hands finished fragments
//! to the fMP4 box writer. The two variants only differ in their boundary
//! policy: audio cuts on the duration threshold alone, video additionally
//! waits for the next IDR access unit.
//!
//! Expected call order per frame (see `Dasher::process_cycle`):
//! `manage_frame` → `update_config` → `generate_init_segment` → `generate_segment`.

pub mod audio;
pub mod video;

use bytes::Bytes;
use serde::Serialize;
use std::time::Duration;

use crate::error::{DashError, Result};
use crate::frame::{Frame, MediaKind, TrackId};
use crate::segment::{build_init_segment, build_media_segment, Sample, SegmentBuffer, TrackDescription};

pub use audio::AudioSegmenter;
pub use video::VideoSegmenter;

/// Track id written into every fMP4 file; each file carries a single track.
pub const FMP4_TRACK_ID: u32 = 1;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Convert a nanosecond delta into time-base ticks (truncating).
pub fn nanos_to_ticks(nanos: u128, time_base: u32) -> u64 {
    (nanos * time_base as u128 / NANOS_PER_SEC) as u64
}

/// Convert time-base ticks back into nanoseconds (truncating).
pub fn ticks_to_nanos(ticks: u64, time_base: u32) -> u128 {
    if time_base == 0 {
        return 0;
    }
    ticks as u128 * NANOS_PER_SEC / time_base as u128
}

/// Static parameters of one segmenter
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    pub track_id: TrackId,
    /// Target fragment duration in whole seconds
    pub segment_duration_secs: u64,
    /// Ticks per second for every timestamp of the track
    pub time_base: u32,
    /// Arrival drift, in frame durations, tolerated before resynchronizing
    pub drift_tolerance_frames: u64,
    /// Declared bitrate in bits per second
    pub bitrate: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            track_id: 0,
            segment_duration_secs: 2,
            time_base: 12800,
            drift_tolerance_frames: 4,
            bitrate: 0,
        }
    }
}

/// Lifecycle of a segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmenterState {
    /// No frame seen yet
    Uninitialized,
    /// Frames arriving, timing not derivable yet
    Configuring,
    /// Timing derived, nothing buffered
    Ready,
    /// Samples buffered in the open fragment
    Accumulating,
    /// A fragment was just finalized
    Boundary,
    /// Trailing fragment flushed at teardown
    Finishing,
}

/// A managed frame not yet appended to the open fragment
#[derive(Debug, Clone)]
pub(crate) struct PendingSample {
    /// Sample start in ticks relative to the track offset
    pub start: u64,
    pub data: Bytes,
    pub is_sync: bool,
}

/// State shared by both segmenter variants
#[derive(Debug)]
pub(crate) struct SegmenterCore {
    pub kind: MediaKind,
    pub track_id: TrackId,
    pub segment_duration_secs: u64,
    pub time_base: u32,
    pub segment_duration_in_ticks: u64,
    pub timestamp_offset: Option<Duration>,
    /// Zero of the tick timeline; the track's own first pts when unset
    pub timeline_origin: Option<Duration>,
    pub frame_duration: u64,
    pub expected_pts: u64,
    pub metadata: Vec<u8>,
    pub bitrate: u32,
    pub drift_tolerance_frames: u64,
    pub configured: bool,
    pub init_generated: bool,
    pub resync_pending: bool,
    /// Sequence number of the next fragment, starts at 1
    pub sequence_number: u32,
    pub current: Option<PendingSample>,
    pub fragment: Vec<Sample>,
    pub fragment_start: u64,
    pub fragment_duration: u64,
    pub state: SegmenterState,
}

impl SegmenterCore {
    pub fn new(kind: MediaKind, config: &SegmenterConfig) -> Self {
        Self {
            kind,
            track_id: config.track_id,
            segment_duration_secs: config.segment_duration_secs,
            time_base: config.time_base,
            segment_duration_in_ticks: config.segment_duration_secs * config.time_base as u64,
            timestamp_offset: None,
            timeline_origin: None,
            frame_duration: 0,
            expected_pts: 0,
            metadata: Vec::new(),
            bitrate: config.bitrate,
            drift_tolerance_frames: config.drift_tolerance_frames.max(1),
            configured: false,
            init_generated: false,
            resync_pending: false,
            sequence_number: 1,
            current: None,
            fragment: Vec::new(),
            fragment_start: 0,
            fragment_duration: 0,
            state: SegmenterState::Uninitialized,
        }
    }

    /// Ticks elapsed between the timeline origin and `pts`
    pub fn ticks_since_origin(&self, pts: Duration) -> u64 {
        let Some(origin) = self.timeline_origin.or(self.timestamp_offset) else {
            return 0;
        };
        match pts.checked_sub(origin) {
            Some(delta) => nanos_to_ticks(delta.as_nanos(), self.time_base),
            None => {
                tracing::warn!(
                    "Track {}: frame pts {:?} precedes timeline origin {:?}",
                    self.track_id,
                    pts,
                    origin
                );
                0
            }
        }
    }

    /// Fix the offset on the first accepted frame and return the frame's ticks.
    /// Also advances `expected_pts`; returns true when the arrival drifted
    /// beyond tolerance and the expected timeline was resynchronized.
    pub fn accept_pts(&mut self, pts: Duration) -> (u64, bool) {
        let first = self.timestamp_offset.is_none();
        if first {
            self.timestamp_offset = Some(pts);
            self.state = SegmenterState::Configuring;
            tracing::debug!("Track {}: timestamp offset set to {:?}", self.track_id, pts);
            if let Some(origin) = self.timeline_origin.filter(|&origin| origin > pts) {
                tracing::warn!(
                    "Track {}: first pts {:?} precedes timeline origin {:?}, rebasing",
                    self.track_id,
                    pts,
                    origin
                );
                self.timeline_origin = Some(pts);
            }
        }
        let actual = self.ticks_since_origin(pts);

        if first || self.frame_duration == 0 {
            self.expected_pts = actual;
            return (actual, false);
        }

        self.expected_pts += self.frame_duration;
        let drift = actual.abs_diff(self.expected_pts);
        if drift > self.frame_duration * self.drift_tolerance_frames {
            tracing::warn!(
                "Track {}: timestamp discontinuity (expected {} ticks, got {}), resyncing",
                self.track_id,
                self.expected_pts,
                actual
            );
            self.expected_pts = actual;
            return (actual, true);
        }
        (actual, false)
    }

    /// Stage a managed frame; returns true when no earlier frame was left unconsumed
    pub fn stage(&mut self, pending: PendingSample) -> bool {
        let is_new = self.current.is_none();
        if !is_new {
            tracing::debug!(
                "Track {}: replacing a managed frame that was never appended",
                self.track_id
            );
        }
        self.current = Some(pending);
        is_new
    }

    pub fn mark_configured(&mut self) {
        if !self.configured {
            self.configured = true;
            tracing::info!(
                "Track {} ({}): configured, frame duration {} ticks @ {} ticks/s",
                self.track_id,
                self.kind,
                self.frame_duration,
                self.time_base
            );
        }
        if matches!(
            self.state,
            SegmenterState::Uninitialized | SegmenterState::Configuring
        ) {
            self.state = SegmenterState::Ready;
        }
    }

    pub fn ensure_configured(&self) -> Result<()> {
        if self.configured {
            Ok(())
        } else {
            Err(DashError::NotConfigured)
        }
    }

    pub fn sample_duration(&self) -> u32 {
        self.frame_duration.min(u32::MAX as u64) as u32
    }

    pub fn push_sample(&mut self, start: u64, sample: Sample) {
        if self.fragment.is_empty() {
            self.fragment_start = start;
            self.fragment_duration = 0;
        }
        self.fragment_duration += sample.duration as u64;
        self.fragment.push(sample);
        self.state = SegmenterState::Accumulating;
    }

    /// Stretch the last buffered sample so the open fragment ends at
    /// `next_start`. Returns false when there is nothing to stretch or the
    /// timeline moved backwards.
    pub fn bridge_gap(&mut self, next_start: u64) -> bool {
        let end = self.fragment_start + self.fragment_duration;
        let Some(last) = self.fragment.last_mut() else {
            return false;
        };
        if next_start <= end {
            return false;
        }
        let gap = next_start - end;
        let Ok(duration) = u32::try_from(last.duration as u64 + gap) else {
            return false;
        };
        last.duration = duration;
        self.fragment_duration += gap;
        tracing::debug!(
            "Track {}: {} tick gap kept inside the open fragment",
            self.track_id,
            gap
        );
        true
    }

    pub fn threshold_reached(&self) -> bool {
        !self.fragment.is_empty() && self.fragment_duration >= self.segment_duration_in_ticks
    }

    /// Serialize the open fragment into `buffer`. The fragment is consumed
    /// even when the buffer rejects it; that window is lost.
    pub fn finalize(&mut self, buffer: &mut SegmentBuffer) -> Result<bool> {
        if self.fragment.is_empty() {
            return Ok(false);
        }
        let start = self.fragment_start;
        let duration = self.fragment_duration;
        let sample_count = self.fragment.len();
        let bytes = build_media_segment(FMP4_TRACK_ID, self.sequence_number, start, &self.fragment);
        self.reset_fragment();

        buffer.fill(&bytes)?;
        buffer.set_sequence_number(self.sequence_number);
        buffer.set_timestamp(start);
        buffer.set_duration(duration);
        tracing::debug!(
            "Track {}: fragment #{} ready, ts={} dur={} samples={} bytes={}",
            self.track_id,
            self.sequence_number,
            start,
            duration,
            sample_count,
            bytes.len()
        );
        self.sequence_number += 1;
        self.state = SegmenterState::Boundary;
        Ok(true)
    }

    pub fn write_init(&mut self, buffer: &mut SegmentBuffer, track: &TrackDescription) -> Result<bool> {
        let bytes = build_init_segment(track);
        buffer.fill(&bytes)?;
        buffer.set_sequence_number(0);
        buffer.set_timestamp(0);
        buffer.set_duration(0);
        self.init_generated = true;
        tracing::debug!(
            "Track {}: init segment ready ({} bytes)",
            self.track_id,
            bytes.len()
        );
        Ok(true)
    }

    pub fn reset_fragment(&mut self) {
        self.fragment.clear();
        self.fragment_start = 0;
        self.fragment_duration = 0;
    }

    pub fn flush(&mut self) {
        let dropped = self.fragment.len();
        self.reset_fragment();
        self.current = None;
        self.resync_pending = false;
        self.init_generated = false;
        self.state = if self.configured {
            SegmenterState::Ready
        } else if self.timestamp_offset.is_some() {
            SegmenterState::Configuring
        } else {
            SegmenterState::Uninitialized
        };
        tracing::info!(
            "Track {}: context flushed, {} buffered samples dropped",
            self.track_id,
            dropped
        );
    }
}

/// Closed set of segmenter variants
#[derive(Debug)]
pub enum Segmenter {
    Audio(AudioSegmenter),
    Video(VideoSegmenter),
}

impl Segmenter {
    pub fn new(kind: MediaKind, config: &SegmenterConfig) -> Self {
        match kind {
            MediaKind::Audio => Segmenter::Audio(AudioSegmenter::new(config)),
            MediaKind::Video => Segmenter::Video(VideoSegmenter::new(config)),
        }
    }

    fn core(&self) -> &SegmenterCore {
        match self {
            Segmenter::Audio(s) => &s.core,
            Segmenter::Video(s) => &s.core,
        }
    }

    fn core_mut(&mut self) -> &mut SegmenterCore {
        match self {
            Segmenter::Audio(s) => &mut s.core,
            Segmenter::Video(s) => &mut s.core,
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.core().kind
    }

    /// Accept `frame` if it matches this segmenter's media kind.
    /// `Ok(true)` means the frame is new, i.e. the previously managed one was
    /// already appended by `generate_segment`.
    pub fn manage_frame(&mut self, frame: &Frame) -> Result<bool> {
        match (self, frame) {
            (Segmenter::Audio(s), Frame::Audio(f)) => s.manage_frame(f),
            (Segmenter::Video(s), Frame::Video(f)) => s.manage_frame(f),
            (s, f) => Err(DashError::WrongFrameKind {
                expected: s.kind(),
                actual: f.kind(),
            }),
        }
    }

    /// Derive per-frame timing from the most recently managed frame.
    pub fn update_config(&mut self) -> Result<()> {
        match self {
            Segmenter::Audio(s) => s.update_config(),
            Segmenter::Video(s) => s.update_config(),
        }
    }

    /// Write the init segment into `buffer` the first time it is possible.
    /// Returns `Ok(false)` once it has already been produced.
    pub fn generate_init_segment(&mut self, buffer: &mut SegmentBuffer) -> Result<bool> {
        self.core().ensure_configured()?;
        if self.core().init_generated {
            return Ok(false);
        }
        let track = match self {
            Segmenter::Audio(s) => s.update_metadata()?,
            Segmenter::Video(s) => s.update_metadata()?,
        };
        self.core_mut().write_init(buffer, &track)
    }

    /// Append the managed frame; returns true when a fragment was completed
    /// into `buffer`. A buffer still holding an unpublished fragment defers
    /// the cut to a later call.
    pub fn generate_segment(&mut self, buffer: &mut SegmentBuffer) -> Result<bool> {
        match self {
            Segmenter::Audio(s) => s.generate_segment(buffer),
            Segmenter::Video(s) => s.generate_segment(buffer),
        }
    }

    /// Emit whatever is buffered, even below the target duration.
    pub fn finish_segment(&mut self, buffer: &mut SegmentBuffer) -> Result<bool> {
        if !buffer.is_empty() {
            return Err(DashError::InvariantViolation(format!(
                "track {}: finish requested while a fragment awaits publication",
                self.core().track_id
            )));
        }
        match self {
            Segmenter::Audio(s) => s.absorb_pending(),
            Segmenter::Video(s) => s.absorb_pending(),
        }
        let core = self.core_mut();
        let flushed = core.finalize(buffer)?;
        core.state = SegmenterState::Finishing;
        Ok(flushed)
    }

    /// Drop the open fragment and allow a new init segment.
    pub fn flush_context(&mut self) {
        self.core_mut().flush();
    }

    pub fn state(&self) -> SegmenterState {
        self.core().state
    }

    pub fn track_id(&self) -> TrackId {
        self.core().track_id
    }

    pub fn frame_duration(&self) -> u64 {
        self.core().frame_duration
    }

    pub fn time_base(&self) -> u32 {
        self.core().time_base
    }

    pub fn timestamp_offset(&self) -> Option<Duration> {
        self.core().timestamp_offset
    }

    /// Instant that tick 0 stands for
    pub fn timeline_origin(&self) -> Option<Duration> {
        let core = self.core();
        core.timeline_origin.or(core.timestamp_offset)
    }

    /// Count ticks from `origin` instead of the first accepted pts. Only
    /// honoured before the first frame; later calls are ignored.
    pub fn set_timeline_origin(&mut self, origin: Duration) -> bool {
        let core = self.core_mut();
        if core.timestamp_offset.is_some() || core.timeline_origin.is_some() {
            return false;
        }
        core.timeline_origin = Some(origin);
        true
    }

    pub fn segment_duration_in_ticks(&self) -> u64 {
        self.core().segment_duration_in_ticks
    }

    pub fn segment_duration_secs(&self) -> u64 {
        self.core().segment_duration_secs
    }

    /// Ticks currently buffered in the open fragment
    pub fn buffered_duration(&self) -> u64 {
        self.core().fragment_duration
    }

    pub fn is_configured(&self) -> bool {
        self.core().configured
    }

    /// Codec configuration bytes written into the last init segment
    pub fn metadata(&self) -> &[u8] {
        &self.core().metadata
    }

    /// Bitrate in bits per second
    pub fn bitrate(&self) -> u32 {
        self.core().bitrate
    }

    pub fn set_bitrate(&mut self, bps: u32) {
        self.core_mut().bitrate = bps;
    }

    /// RFC 6381 codec string for the manifest
    pub fn codec_string(&self) -> String {
        match self {
            Segmenter::Audio(s) => s.codec_string(),
            Segmenter::Video(s) => s.codec_string(),
        }
    }
}
