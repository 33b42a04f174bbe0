//! Fixed-capacity segment buffer
//!
//! One buffer is allocated per (track, role) and recycled with `clear()`
//! after every write, so steady-state segmenting never reallocates.

use std::path::Path;

use crate::error::{DashError, Result};

/// Default capacity of a segment buffer (8 MiB)
pub const MAX_SEGMENT_BYTES: usize = 8 * 1024 * 1024;

/// Segment bytes plus the metadata needed to name and announce them
#[derive(Debug)]
pub struct SegmentBuffer {
    data: Box<[u8]>,
    data_length: usize,
    sequence_number: u32,
    /// Window start in time-base ticks, relative to the track offset
    timestamp: u64,
    /// Window duration in time-base ticks
    duration: u64,
}

impl SegmentBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            data_length: 0,
            sequence_number: 0,
            timestamp: 0,
            duration: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Valid bytes of the segment
    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_length]
    }

    /// The whole backing storage; callers commit with `set_data_length`
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn data_length(&self) -> usize {
        self.data_length
    }

    pub fn set_data_length(&mut self, len: usize) -> Result<()> {
        if len > self.capacity() {
            return Err(DashError::BufferOverflow {
                len,
                capacity: self.capacity(),
            });
        }
        self.data_length = len;
        Ok(())
    }

    /// Copy `bytes` into the buffer, replacing its contents
    pub fn fill(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.capacity() {
            return Err(DashError::BufferOverflow {
                len: bytes.len(),
                capacity: self.capacity(),
            });
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.data_length = bytes.len();
        Ok(())
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    pub fn set_sequence_number(&mut self, seq: u32) {
        self.sequence_number = seq;
    }

    pub fn increment_sequence_number(&mut self) {
        self.sequence_number += 1;
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, ts: u64) {
        self.timestamp = ts;
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn set_duration(&mut self, duration: u64) {
        self.duration = duration;
    }

    /// Write the valid bytes to `path`. The buffer is left untouched either way.
    pub fn write_to_disk<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), self.data())?;
        tracing::debug!(
            "Wrote {} bytes (seq={}, ts={}) to {}",
            self.data_length,
            self.sequence_number,
            self.timestamp,
            path.as_ref().display()
        );
        Ok(())
    }

    pub fn clear(&mut self) {
        self.data_length = 0;
        self.sequence_number = 0;
        self.timestamp = 0;
        self.duration = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.data_length == 0 && self.sequence_number == 0 && self.timestamp == 0
    }
}

impl Default for SegmentBuffer {
    fn default() -> Self {
        Self::new(MAX_SEGMENT_BYTES)
    }
}
