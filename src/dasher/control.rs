//! Control-plane events
//!
//! Events arrive as JSON objects tagged by `"action"`:
//!
//! ```json
//! {"action": "addSegmenter", "id": 1, "kind": "audio"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;

use crate::error::{DashError, Result};
use crate::frame::{MediaKind, TrackId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlEvent {
    Configure {
        folder: PathBuf,
        #[serde(rename = "baseName")]
        base_name: String,
        #[serde(rename = "segDurInSec")]
        seg_dur_in_sec: u64,
    },
    AddSegmenter {
        id: TrackId,
        kind: MediaKind,
    },
    RemoveSegmenter {
        id: TrackId,
    },
    /// Bitrate in kbit/s
    SetBitrate {
        id: TrackId,
        bitrate: u32,
    },
}

impl ControlEvent {
    pub fn parse(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(|e| DashError::InvalidEvent(e.to_string()))
    }
}

/// `{"error": null}` on success, `{"error": "<message>"}` otherwise
pub fn reply(result: &Result<()>) -> Value {
    match result {
        Ok(()) => json!({ "error": null }),
        Err(e) => json!({ "error": e.to_string() }),
    }
}
