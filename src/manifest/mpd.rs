//! Live MPD writer
//!
//! Produces a dynamic MPD with one SegmentTemplate + SegmentTimeline per
//! representation. The timeline is a sliding window of the most recent
//! segments.

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use super::{ManifestSink, Representation};
use crate::config::ManifestConfig;
use crate::error::{DashError, Result};
use crate::frame::MediaKind;

#[derive(Debug)]
struct Entry {
    representation: Representation,
    /// (timestamp, duration) in the representation's time base
    timeline: VecDeque<(u64, u64)>,
}

/// Manifest writer for `<folder>/<base_name>.mpd`
#[derive(Debug)]
pub struct MpdManager {
    path: PathBuf,
    segment_duration_secs: u64,
    min_buffer_time_secs: u64,
    max_segments: usize,
    availability_start: DateTime<Utc>,
    sets: BTreeMap<String, BTreeMap<String, Entry>>,
}

impl MpdManager {
    pub fn new(path: impl Into<PathBuf>, segment_duration_secs: u64, config: &ManifestConfig) -> Self {
        Self {
            path: path.into(),
            segment_duration_secs,
            min_buffer_time_secs: config.min_buffer_time_secs,
            max_segments: config.max_segments_in_mpd,
            availability_start: Utc::now(),
            sets: BTreeMap::new(),
        }
    }

    pub fn with_availability_start(mut self, start: DateTime<Utc>) -> Self {
        self.availability_start = start;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of timeline entries of a representation
    pub fn timeline_len(&self, set: &str, id: &str) -> usize {
        self.entry(set, id).map(|e| e.timeline.len()).unwrap_or(0)
    }

    fn entry(&self, set: &str, id: &str) -> Option<&Entry> {
        self.sets.get(set).and_then(|reprs| reprs.get(id))
    }

    fn entry_mut(&mut self, set: &str, id: &str) -> Option<&mut Entry> {
        self.sets.get_mut(set).and_then(|reprs| reprs.get_mut(id))
    }

    /// Render the MPD document
    pub fn render(&self, publish_time: DateTime<Utc>) -> String {
        let mut output = String::new();

        output.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        output.push_str("<MPD xmlns=\"urn:mpeg:dash:schema:mpd:2011\"");
        output.push_str(" profiles=\"urn:mpeg:dash:profile:isoff-live:2011\" type=\"dynamic\"");
        output.push_str(&format!(
            " availabilityStartTime=\"{}\"",
            self.availability_start.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        output.push_str(&format!(
            " publishTime=\"{}\"",
            publish_time.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        output.push_str(&format!(
            " minimumUpdatePeriod=\"PT{}S\"",
            self.segment_duration_secs
        ));
        output.push_str(&format!(" minBufferTime=\"PT{}S\"", self.min_buffer_time_secs));
        if self.max_segments > 0 {
            output.push_str(&format!(
                " timeShiftBufferDepth=\"PT{}S\"",
                self.max_segments as u64 * self.segment_duration_secs
            ));
        }
        output.push_str(">\n");
        output.push_str("  <Period id=\"0\" start=\"PT0S\">\n");

        for (set_id, reprs) in &self.sets {
            let Some(first) = reprs.values().next() else {
                continue;
            };
            let content_type = match first.representation.kind {
                MediaKind::Video => "video",
                MediaKind::Audio => "audio",
            };
            output.push_str(&format!(
                "    <AdaptationSet id=\"{}\" contentType=\"{}\" mimeType=\"{}/mp4\" segmentAlignment=\"true\" startWithSAP=\"1\">\n",
                set_id, content_type, content_type
            ));

            for entry in reprs.values() {
                let repr = &entry.representation;
                output.push_str(&format!(
                    "      <Representation id=\"{}\" codecs=\"{}\" bandwidth=\"{}\">\n",
                    repr.id, repr.codec, repr.bitrate
                ));
                output.push_str(&format!(
                    "        <SegmentTemplate timescale=\"{}\" initialization=\"{}\" media=\"{}\">\n",
                    repr.time_base, repr.init_template, repr.media_template
                ));
                output.push_str("          <SegmentTimeline>\n");
                for (timestamp, duration) in &entry.timeline {
                    output.push_str(&format!(
                        "            <S t=\"{}\" d=\"{}\"/>\n",
                        timestamp, duration
                    ));
                }
                output.push_str("          </SegmentTimeline>\n");
                output.push_str("        </SegmentTemplate>\n");
                output.push_str("      </Representation>\n");
            }
            output.push_str("    </AdaptationSet>\n");
        }

        output.push_str("  </Period>\n");
        output.push_str("</MPD>\n");
        output
    }
}

impl MpdManager {
    /// Write through a temporary file so readers never see a partial MPD
    fn replace_file(&self, content: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("mpd.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)
    }
}

impl ManifestSink for MpdManager {
    fn add_representation(&mut self, representation: Representation) {
        tracing::debug!(
            "MPD: adding representation {} to set {}",
            representation.id,
            representation.adaptation_set
        );
        let set = self
            .sets
            .entry(representation.adaptation_set.clone())
            .or_default();
        set.insert(
            representation.id.clone(),
            Entry {
                representation,
                timeline: VecDeque::new(),
            },
        );
    }

    fn remove_representation(&mut self, set: &str, id: &str) -> bool {
        let Some(reprs) = self.sets.get_mut(set) else {
            return false;
        };
        let removed = reprs.remove(id).is_some();
        if reprs.is_empty() {
            self.sets.remove(set);
        }
        removed
    }

    fn set_bitrate(&mut self, set: &str, id: &str, bps: u32) -> bool {
        match self.entry_mut(set, id) {
            Some(entry) => {
                entry.representation.bitrate = bps;
                true
            }
            None => false,
        }
    }

    fn set_codec(&mut self, set: &str, id: &str, codec: &str) -> bool {
        match self.entry_mut(set, id) {
            Some(entry) => {
                entry.representation.codec = codec.to_string();
                true
            }
            None => false,
        }
    }

    fn add_segment(&mut self, set: &str, id: &str, timestamp: u64, duration: u64) {
        let max_segments = self.max_segments;
        let Some(entry) = self.entry_mut(set, id) else {
            tracing::warn!("MPD: segment for unknown representation {}/{}", set, id);
            return;
        };
        entry.timeline.push_back((timestamp, duration));
        while max_segments > 0 && entry.timeline.len() > max_segments {
            entry.timeline.pop_front();
        }
    }

    fn relocate(&mut self, path: PathBuf, segment_duration_secs: u64) {
        self.path = path;
        self.segment_duration_secs = segment_duration_secs;
    }

    fn write(&mut self) -> Result<()> {
        let content = self.render(Utc::now());
        self.replace_file(&content)
            .map_err(|e| DashError::Manifest(format!("cannot write {}: {}", self.path.display(), e)))?;
        tracing::debug!("MPD written to {}", self.path.display());
        Ok(())
    }
}
