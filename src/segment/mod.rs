//! Segment storage and fMP4 serialization
//!
//! `buffer` holds finished segment bytes, `fmp4` turns codec metadata and
//! samples into ISO-BMFF boxes, `isobmff` inspects them.

pub mod buffer;
pub mod fmp4;
pub mod isobmff;

pub use buffer::{SegmentBuffer, MAX_SEGMENT_BYTES};
pub use fmp4::{build_init_segment, build_media_segment, Sample, SampleEntry, TrackDescription};
