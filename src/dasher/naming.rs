//! Output file naming
//!
//! Media: `<base_path>/<base_name>_<repr_id>_<timestamp>.<ext>`
//! Init:  `<base_path>/<base_name>_<repr_id>_init.<ext>`

use std::path::{Path, PathBuf};

use crate::frame::{MediaKind, TrackId};

pub const VIDEO_ADAPTATION_SET: &str = "0";
pub const AUDIO_ADAPTATION_SET: &str = "1";

pub const VIDEO_CODEC: &str = "avc1.42c01e";
pub const AUDIO_CODEC: &str = "mp4a.40.2";

pub const VIDEO_EXT: &str = "m4v";
pub const AUDIO_EXT: &str = "m4a";

pub fn extension(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Video => VIDEO_EXT,
        MediaKind::Audio => AUDIO_EXT,
    }
}

pub fn adaptation_set(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Video => VIDEO_ADAPTATION_SET,
        MediaKind::Audio => AUDIO_ADAPTATION_SET,
    }
}

/// Codec announced before the stream itself tells otherwise
pub fn default_codec(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Video => VIDEO_CODEC,
        MediaKind::Audio => AUDIO_CODEC,
    }
}

pub fn segment_name(
    base_path: &Path,
    base_name: &str,
    repr_id: TrackId,
    timestamp: u64,
    ext: &str,
) -> PathBuf {
    base_path.join(format!("{}_{}_{}.{}", base_name, repr_id, timestamp, ext))
}

pub fn init_segment_name(base_path: &Path, base_name: &str, repr_id: TrackId, ext: &str) -> PathBuf {
    base_path.join(format!("{}_{}_init.{}", base_name, repr_id, ext))
}

/// `$RepresentationID$`/`$Time$` template matching `segment_name`
pub fn media_template(base_name: &str, ext: &str) -> String {
    format!("{}_$RepresentationID$_$Time$.{}", base_name, ext)
}

/// Template matching `init_segment_name`
pub fn init_template(base_name: &str, ext: &str) -> String {
    format!("{}_$RepresentationID$_init.{}", base_name, ext)
}
