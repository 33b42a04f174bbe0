//! Cross-track publication gate
//!
//! Video windows always publish. Once every active video track has published
//! its first window the common origin is known, and audio windows starting
//! before it are dropped so all representations begin at the same instant.
//! Until then audio is held. Without video, or after a forced drain, audio
//! publishes immediately.

use std::collections::BTreeSet;

use crate::frame::{MediaKind, TrackId};

/// Decision for one ready window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Publish,
    Hold,
    Discard,
}

/// A completed fragment placed on the process timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub track: TrackId,
    pub kind: MediaKind,
    /// Nanoseconds since the process start offset
    pub start_ns: u128,
    pub end_ns: u128,
}

#[derive(Debug, Default)]
pub struct TimelineSync {
    video_tracks: BTreeSet<TrackId>,
    started: BTreeSet<TrackId>,
    origin_ns: Option<u128>,
    audio_only: bool,
}

impl TimelineSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_track(&mut self, track: TrackId, kind: MediaKind) {
        if kind == MediaKind::Video {
            self.video_tracks.insert(track);
        }
    }

    pub fn remove_track(&mut self, track: TrackId) {
        self.video_tracks.remove(&track);
        self.started.remove(&track);
    }

    /// True once every active video track has published a window
    pub fn video_started(&self) -> bool {
        !self.video_tracks.is_empty() && self.video_tracks.is_subset(&self.started)
    }

    pub fn origin_ns(&self) -> Option<u128> {
        self.origin_ns
    }

    pub fn is_audio_only(&self) -> bool {
        self.audio_only
    }

    /// Stop gating audio on video
    pub fn force_audio_only(&mut self) {
        self.audio_only = true;
    }

    /// Part of `window` lying at or after the common origin
    pub fn overlap_ns(&self, window: &Window) -> u128 {
        match self.origin_ns {
            Some(origin) => window.end_ns.saturating_sub(window.start_ns.max(origin)),
            None => 0,
        }
    }

    pub fn decide(&mut self, window: &Window) -> Gate {
        match window.kind {
            MediaKind::Video => {
                if self.started.insert(window.track) {
                    let origin = self.origin_ns.map_or(window.start_ns, |o| o.max(window.start_ns));
                    self.origin_ns = Some(origin);
                    if self.video_started() {
                        tracing::info!("Video started, common origin at {} ns", origin);
                    }
                }
                Gate::Publish
            }
            MediaKind::Audio => {
                if self.audio_only || self.video_tracks.is_empty() {
                    return Gate::Publish;
                }
                if !self.video_started() {
                    return Gate::Hold;
                }
                match self.origin_ns {
                    Some(origin) if window.start_ns < origin => Gate::Discard,
                    _ => Gate::Publish,
                }
            }
        }
    }
}
