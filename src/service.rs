//! Async front-end for a `Dasher`
//!
//! The dasher lives inside a single tokio task; callers talk to it through
//! a cloneable `DasherHandle`. Commands are queued on an mpsc channel and
//! answered over oneshot channels, so cycles and control events are
//! serialized by construction.

use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::dasher::{CycleReport, Dasher};
use crate::error::{DashError, Result};
use crate::frame::{Frame, TrackId};

const COMMAND_QUEUE: usize = 64;

/// Requests understood by the service task
#[derive(Debug)]
pub enum Command {
    Cycle {
        frames: BTreeMap<TrackId, Frame>,
        reply: oneshot::Sender<CycleReport>,
    },
    Control {
        event: Value,
        reply: oneshot::Sender<Value>,
    },
    DrainAudio {
        reply: oneshot::Sender<Result<usize>>,
    },
    State {
        reply: oneshot::Sender<Value>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<()>>,
    },
}

#[derive(Debug, Clone)]
pub struct DasherHandle {
    tx: mpsc::Sender<Command>,
}

/// Move `dasher` into its own task
pub fn spawn(dasher: Dasher) -> (DasherHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let task = tokio::spawn(run(dasher, rx));
    (DasherHandle { tx }, task)
}

async fn run(mut dasher: Dasher, mut rx: mpsc::Receiver<Command>) {
    tracing::debug!("Dasher service started");
    while let Some(command) = rx.recv().await {
        match command {
            Command::Cycle { frames, reply } => {
                let _ = reply.send(dasher.process_cycle(&frames));
            }
            Command::Control { event, reply } => {
                let _ = reply.send(dasher.handle_event(&event));
            }
            Command::DrainAudio { reply } => {
                let _ = reply.send(dasher.force_audio_drain());
            }
            Command::State { reply } => {
                let _ = reply.send(dasher.state());
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(dasher.shutdown());
                return;
            }
        }
    }

    // every handle dropped without an explicit shutdown
    if let Err(e) = dasher.shutdown() {
        tracing::error!("Dasher shutdown failed: {}", e);
    }
}

impl DasherHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| DashError::ServiceStopped)?;
        response.await.map_err(|_| DashError::ServiceStopped)
    }

    pub async fn cycle(&self, frames: BTreeMap<TrackId, Frame>) -> Result<CycleReport> {
        self.request(|reply| Command::Cycle { frames, reply }).await
    }

    /// Apply a JSON control event; the reply is `{"error": ...}`
    pub async fn control(&self, event: Value) -> Result<Value> {
        self.request(|reply| Command::Control { event, reply }).await
    }

    pub async fn drain_audio(&self) -> Result<usize> {
        self.request(|reply| Command::DrainAudio { reply }).await?
    }

    pub async fn state(&self) -> Result<Value> {
        self.request(|reply| Command::State { reply }).await
    }

    /// Flush every track and stop the task
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::fixtures::{aac_frame_at, dasher_config, AUDIO_TRACK};
    use serde_json::json;

    #[tokio::test]
    async fn test_service_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let dasher = Dasher::with_mpd(dasher_config(dir.path())).unwrap();
        let (handle, task) = spawn(dasher);

        let reply = handle
            .control(json!({"action": "addSegmenter", "id": AUDIO_TRACK, "kind": "audio"}))
            .await
            .unwrap();
        assert_eq!(reply, json!({"error": null}));

        let mut published = 0;
        for n in 0..100 {
            let frames = BTreeMap::from([(AUDIO_TRACK, aac_frame_at(n))]);
            published += handle.cycle(frames).await.unwrap().published.len();
        }
        assert_eq!(published, 1);

        let state = handle.state().await.unwrap();
        assert_eq!(state["tracks"][0]["kind"], "audio");

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(matches!(handle.state().await, Err(DashError::ServiceStopped)));
        assert!(dir.path().join("test.mpd").exists());
    }
}
