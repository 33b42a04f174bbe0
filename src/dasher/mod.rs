//! Multi-track orchestrator
//!
//! `Dasher` owns one registry entry per track (segmenter plus its init and
//! media buffers), feeds each cycle's frames through the segmenters, gates
//! finished fragments through `TimelineSync`, writes them to disk and keeps
//! the manifest up to date.

pub mod control;
pub mod naming;
pub mod sync;

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{validate_base_name, DasherConfig};
use crate::error::{DashError, Result};
use crate::frame::{Frame, MediaKind, TrackId};
use crate::manifest::{ManifestSink, MpdManager, Representation};
use crate::segment::SegmentBuffer;
use crate::segmenter::{ticks_to_nanos, Segmenter};

pub use control::ControlEvent;
pub use sync::{Gate, TimelineSync, Window};

/// Registry entry of one track
#[derive(Debug)]
pub struct TrackEntry {
    segmenter: Segmenter,
    init: SegmentBuffer,
    media: SegmentBuffer,
}

impl TrackEntry {
    pub fn segmenter(&self) -> &Segmenter {
        &self.segmenter
    }

    /// True while a finished fragment awaits publication
    pub fn is_holding(&self) -> bool {
        !self.media.is_empty()
    }
}

/// Outcome of one `process_cycle`
#[derive(Debug, Default, Clone, Serialize)]
pub struct CycleReport {
    pub init_written: Vec<PathBuf>,
    pub published: Vec<PathBuf>,
    pub held: Vec<TrackId>,
    pub discarded: Vec<TrackId>,
    pub errors: Vec<(TrackId, String)>,
    pub manifest_error: Option<String>,
}

pub struct Dasher {
    config: DasherConfig,
    tracks: BTreeMap<TrackId, TrackEntry>,
    manifest: Box<dyn ManifestSink>,
    sync: TimelineSync,
    /// First pts seen by any track; tick 0 of every segmenter
    process_start: Option<Duration>,
}

impl Dasher {
    pub fn new(config: DasherConfig, manifest: Box<dyn ManifestSink>) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.folder)?;
        tracing::info!(
            "Dasher writing to {} as {:?}, {} s segments",
            config.folder.display(),
            config.base_name,
            config.segment.duration_secs
        );
        Ok(Self {
            config,
            tracks: BTreeMap::new(),
            manifest,
            sync: TimelineSync::new(),
            process_start: None,
        })
    }

    /// Dasher announcing to an `MpdManager` at `<folder>/<base_name>.mpd`
    pub fn with_mpd(config: DasherConfig) -> Result<Self> {
        let mpd = MpdManager::new(config.mpd_path(), config.segment.duration_secs, &config.manifest);
        Self::new(config, Box::new(mpd))
    }

    pub fn config(&self) -> &DasherConfig {
        &self.config
    }

    pub fn track(&self, id: TrackId) -> Option<&TrackEntry> {
        self.tracks.get(&id)
    }

    pub fn track_ids(&self) -> Vec<TrackId> {
        self.tracks.keys().copied().collect()
    }

    pub fn timeline(&self) -> &TimelineSync {
        &self.sync
    }

    pub fn add_track(&mut self, id: TrackId, kind: MediaKind) -> Result<()> {
        if self.tracks.contains_key(&id) {
            return Err(DashError::TrackExists(id));
        }
        let mut segmenter = Segmenter::new(kind, &self.config.segmenter_config(id, kind));
        if let Some(start) = self.process_start {
            segmenter.set_timeline_origin(start);
        }
        let capacity = self.config.segment.max_segment_bytes;
        let representation = self.representation(id, kind);
        self.manifest.add_representation(representation);
        self.sync.add_track(id, kind);
        self.tracks.insert(
            id,
            TrackEntry {
                segmenter,
                init: SegmentBuffer::new(capacity),
                media: SegmentBuffer::new(capacity),
            },
        );
        tracing::info!("Track {} ({}) added", id, kind);
        Ok(())
    }

    /// Flush the trailing fragment of `id` and drop the track
    pub fn remove_track(&mut self, id: TrackId) -> Result<()> {
        let Some(mut entry) = self.tracks.remove(&id) else {
            return Err(DashError::UnknownTrack(id));
        };
        self.sync.remove_track(id);
        let kind = entry.segmenter.kind();

        if entry.is_holding() {
            if let Err(e) = publish_media(&self.config, self.manifest.as_mut(), id, &mut entry) {
                tracing::error!("Track {}: failed to publish held fragment: {}", id, e);
            }
        }
        match entry.segmenter.finish_segment(&mut entry.media) {
            Ok(true) => {
                if let Err(e) = publish_media(&self.config, self.manifest.as_mut(), id, &mut entry) {
                    tracing::error!("Track {}: failed to publish trailing fragment: {}", id, e);
                }
            }
            Ok(false) => {}
            Err(e) => tracing::warn!("Track {}: trailing fragment lost: {}", id, e),
        }

        self.manifest
            .remove_representation(naming::adaptation_set(kind), &id.to_string());
        if let Err(e) = self.manifest.write() {
            tracing::error!("Manifest write failed: {}", e);
        }
        tracing::info!("Track {} ({}) removed", id, kind);
        Ok(())
    }

    /// Run one frame per track through its segmenter, then publish, hold or
    /// discard every completed fragment.
    pub fn process_cycle(&mut self, frames: &BTreeMap<TrackId, Frame>) -> CycleReport {
        let mut report = CycleReport::default();

        if self.process_start.is_none() {
            self.process_start = frames
                .iter()
                .filter(|(id, _)| self.tracks.contains_key(*id))
                .map(|(_, frame)| frame.pts())
                .min();
            // every track counts ticks from the same instant
            if let Some(start) = self.process_start {
                tracing::debug!("Process timeline starts at {:?}", start);
                for entry in self.tracks.values_mut() {
                    entry.segmenter.set_timeline_origin(start);
                }
            }
        }

        for (&id, frame) in frames {
            let Some(entry) = self.tracks.get_mut(&id) else {
                report.errors.push((id, DashError::UnknownTrack(id).to_string()));
                continue;
            };
            if let Err(e) = step(&self.config, self.manifest.as_mut(), id, entry, frame, &mut report) {
                if e.is_recoverable() {
                    tracing::warn!("Track {}: {}", id, e);
                } else {
                    tracing::error!("Track {}: {}", id, e);
                }
                report.errors.push((id, e.to_string()));
            }
        }

        // video first so a window completing this cycle sets the origin
        // before audio windows are judged against it
        let mut ready: Vec<(MediaKind, TrackId)> = self
            .tracks
            .iter()
            .filter(|(_, entry)| entry.is_holding())
            .map(|(&id, entry)| (entry.segmenter.kind(), id))
            .collect();
        ready.sort_by_key(|&(kind, id)| (kind != MediaKind::Video, id));

        let mut published = false;
        for (_, id) in ready {
            let Some(window) = self.window(id) else {
                continue;
            };
            let gate = self.sync.decide(&window);
            let Some(entry) = self.tracks.get_mut(&id) else {
                continue;
            };
            match gate {
                Gate::Publish => {
                    match publish_media(&self.config, self.manifest.as_mut(), id, entry) {
                        Ok(path) => {
                            report.published.push(path);
                            published = true;
                        }
                        Err(e) => {
                            tracing::error!("Track {}: segment write failed: {}", id, e);
                            report.errors.push((id, e.to_string()));
                        }
                    }
                }
                Gate::Hold => {
                    tracing::debug!("Track {}: holding fragment until video starts", id);
                    report.held.push(id);
                }
                Gate::Discard => {
                    tracing::warn!(
                        "Track {}: discarding fragment starting before the common origin ({} ns past it lost)",
                        id,
                        self.sync.overlap_ns(&window)
                    );
                    entry.media.clear();
                    report.discarded.push(id);
                }
            }
        }

        if published {
            if let Err(e) = self.manifest.write() {
                tracing::error!("Manifest write failed: {}", e);
                report.manifest_error = Some(e.to_string());
            }
        }
        report
    }

    /// Place the ready fragment of `id` on the process timeline
    fn window(&self, id: TrackId) -> Option<Window> {
        let entry = self.tracks.get(&id)?;
        let segmenter = &entry.segmenter;
        let origin = segmenter.timeline_origin()?;
        let base = origin
            .checked_sub(self.process_start.unwrap_or(origin))
            .unwrap_or_default()
            .as_nanos();
        let time_base = segmenter.time_base();
        let start_ns = base + ticks_to_nanos(entry.media.timestamp(), time_base);
        Some(Window {
            track: id,
            kind: segmenter.kind(),
            start_ns,
            end_ns: start_ns + ticks_to_nanos(entry.media.duration(), time_base),
        })
    }

    /// Publish every held audio fragment and flush what the audio segmenters
    /// buffered; from now on audio is no longer gated on video.
    pub fn force_audio_drain(&mut self) -> Result<usize> {
        self.sync.force_audio_only();
        let mut written = 0;

        for (&id, entry) in self.tracks.iter_mut() {
            if entry.segmenter.kind() != MediaKind::Audio {
                continue;
            }
            if entry.is_holding() {
                match publish_media(&self.config, self.manifest.as_mut(), id, entry) {
                    Ok(_) => written += 1,
                    Err(e) => tracing::error!("Track {}: segment write failed: {}", id, e),
                }
            }
            match entry.segmenter.finish_segment(&mut entry.media) {
                Ok(true) => match publish_media(&self.config, self.manifest.as_mut(), id, entry) {
                    Ok(_) => written += 1,
                    Err(e) => tracing::error!("Track {}: segment write failed: {}", id, e),
                },
                Ok(false) => {}
                Err(e) => tracing::warn!("Track {}: drain failed: {}", id, e),
            }
        }

        tracing::info!("Audio drained, {} fragments written", written);
        if written > 0 {
            self.manifest.write()?;
        }
        Ok(written)
    }

    /// Update the declared bitrate of a track (kbit/s)
    pub fn set_bitrate(&mut self, id: TrackId, kbps: u32) -> Result<()> {
        let entry = self.tracks.get_mut(&id).ok_or(DashError::UnknownTrack(id))?;
        let bps = kbps.saturating_mul(1000);
        entry.segmenter.set_bitrate(bps);
        let set = naming::adaptation_set(entry.segmenter.kind());
        self.manifest.set_bitrate(set, &id.to_string(), bps);
        tracing::debug!("Track {}: bitrate set to {} bps", id, bps);
        Ok(())
    }

    /// Change output location and segment duration; only allowed while no
    /// track is registered.
    pub fn configure(&mut self, folder: &Path, base_name: &str, segment_duration_secs: u64) -> Result<()> {
        if !self.tracks.is_empty() {
            return Err(DashError::InvariantViolation(format!(
                "cannot reconfigure with {} active tracks",
                self.tracks.len()
            )));
        }
        validate_base_name(base_name)?;
        if segment_duration_secs == 0 {
            return Err(DashError::Config("segment duration must be at least 1 second".into()));
        }
        std::fs::create_dir_all(folder)?;

        self.config.folder = folder.to_path_buf();
        self.config.base_name = base_name.to_string();
        self.config.segment.duration_secs = segment_duration_secs;
        self.manifest.relocate(self.config.mpd_path(), segment_duration_secs);
        self.sync = TimelineSync::new();
        self.process_start = None;
        tracing::info!(
            "Reconfigured: {} as {:?}, {} s segments",
            folder.display(),
            base_name,
            segment_duration_secs
        );
        Ok(())
    }

    /// Snapshot for the control plane
    pub fn state(&self) -> Value {
        let tracks: Vec<Value> = self
            .tracks
            .iter()
            .map(|(id, entry)| {
                let s = &entry.segmenter;
                json!({
                    "id": id,
                    "kind": s.kind(),
                    "state": s.state(),
                    "bitrate": s.bitrate(),
                    "codec": s.codec_string(),
                    "timeBase": s.time_base(),
                    "frameDuration": s.frame_duration(),
                    "holding": entry.is_holding(),
                })
            })
            .collect();
        json!({
            "folder": self.config.folder,
            "baseName": self.config.base_name,
            "mpdPath": self.config.mpd_path(),
            "segDurInSec": self.config.segment.duration_secs,
            "videoStarted": self.sync.video_started(),
            "audioOnly": self.sync.is_audio_only(),
            "tracks": tracks,
        })
    }

    /// Remove every track, flushing trailing fragments, and write the final manifest
    pub fn shutdown(&mut self) -> Result<()> {
        for id in self.track_ids() {
            if let Err(e) = self.remove_track(id) {
                tracing::warn!("Track {}: {}", id, e);
            }
        }
        self.manifest.write()?;
        tracing::info!("Dasher shut down");
        Ok(())
    }

    /// Apply a control-plane event and build the reply
    pub fn handle_event(&mut self, event: &Value) -> Value {
        let result = ControlEvent::parse(event).and_then(|event| self.apply(event));
        if let Err(e) = &result {
            tracing::warn!("Control event rejected: {}", e);
        }
        control::reply(&result)
    }

    pub fn apply(&mut self, event: ControlEvent) -> Result<()> {
        tracing::debug!("Control event: {:?}", event);
        match event {
            ControlEvent::Configure {
                folder,
                base_name,
                seg_dur_in_sec,
            } => self.configure(&folder, &base_name, seg_dur_in_sec),
            ControlEvent::AddSegmenter { id, kind } => self.add_track(id, kind),
            ControlEvent::RemoveSegmenter { id } => self.remove_track(id),
            ControlEvent::SetBitrate { id, bitrate } => self.set_bitrate(id, bitrate),
        }
    }

    fn representation(&self, id: TrackId, kind: MediaKind) -> Representation {
        let ext = naming::extension(kind);
        Representation {
            adaptation_set: naming::adaptation_set(kind).to_string(),
            id: id.to_string(),
            kind,
            codec: naming::default_codec(kind).to_string(),
            bitrate: 0,
            time_base: self.config.time_base(kind),
            media_template: naming::media_template(&self.config.base_name, ext),
            init_template: naming::init_template(&self.config.base_name, ext),
        }
    }
}

/// Drive one frame through a segmenter: manage, configure, init, segment
fn step(
    config: &DasherConfig,
    manifest: &mut dyn ManifestSink,
    id: TrackId,
    entry: &mut TrackEntry,
    frame: &Frame,
    report: &mut CycleReport,
) -> Result<()> {
    entry.segmenter.manage_frame(frame)?;
    match entry.segmenter.update_config() {
        Ok(()) => {}
        Err(DashError::NotReady(reason)) => {
            tracing::debug!("Track {}: not configured yet ({})", id, reason);
            return Ok(());
        }
        Err(e) => return Err(e),
    }

    if entry.segmenter.generate_init_segment(&mut entry.init)? {
        let kind = entry.segmenter.kind();
        let path = naming::init_segment_name(&config.folder, &config.base_name, id, naming::extension(kind));
        let written = entry.init.write_to_disk(&path);
        entry.init.clear();
        if let Err(e) = written {
            // allow the init segment to be produced again next cycle
            entry.segmenter.flush_context();
            return Err(e);
        }
        manifest.set_codec(naming::adaptation_set(kind), &id.to_string(), &entry.segmenter.codec_string());
        tracing::info!("Track {}: init segment written to {}", id, path.display());
        report.init_written.push(path);
    }

    entry.segmenter.generate_segment(&mut entry.media)?;
    Ok(())
}

/// Write the media buffer of `entry` under its canonical name and announce it
fn publish_media(
    config: &DasherConfig,
    manifest: &mut dyn ManifestSink,
    id: TrackId,
    entry: &mut TrackEntry,
) -> Result<PathBuf> {
    let kind = entry.segmenter.kind();
    let timestamp = entry.media.timestamp();
    let duration = entry.media.duration();
    let path = naming::segment_name(
        &config.folder,
        &config.base_name,
        id,
        timestamp,
        naming::extension(kind),
    );
    let written = entry.media.write_to_disk(&path);
    entry.media.clear();
    written?;

    manifest.add_segment(naming::adaptation_set(kind), &id.to_string(), timestamp, duration);
    tracing::info!(
        "Track {}: segment written to {} (ts={} dur={})",
        id,
        path.display(),
        timestamp,
        duration
    );
    Ok(path)
}
