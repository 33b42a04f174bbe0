//! DASH segmenter command line
//!
//! Segments an ADTS audio file and/or an Annex-B H.264 file into a live-style
//! DASH output folder, stamping frames with synthetic timestamps.

use bytes::Bytes;
use clap::Parser;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use dash_segmenter::config::DasherConfig;
use dash_segmenter::config_file::{generate_default_config, ConfigFile};
use dash_segmenter::segmenter::audio::{split_adts, AdtsHeader};
use dash_segmenter::segmenter::video::split_access_units;
use dash_segmenter::{logging, service, AudioFrame, Dasher, Frame, TrackId, VideoFrame};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "dasher";

const AUDIO_TRACK: TrackId = 1;
const VIDEO_TRACK: TrackId = 2;

/// First synthetic timestamp; zero would read as "no pts yet"
const STREAM_START: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write a default configuration file to this path and exit
    #[arg(long)]
    write_default_config: Option<PathBuf>,

    /// ADTS AAC input
    #[arg(short, long)]
    audio: Option<PathBuf>,

    /// Annex-B H.264 input
    #[arg(short, long)]
    video: Option<PathBuf>,

    /// Frame rate of the video input
    #[arg(long, default_value_t = 25.0)]
    fps: f64,

    /// Picture width of the video input
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Picture height of the video input
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Output folder (overrides the config file)
    #[arg(short, long)]
    folder: Option<PathBuf>,

    /// Output base name (overrides the config file)
    #[arg(short, long)]
    base_name: Option<String>,

    /// Segment duration in seconds (overrides the config file)
    #[arg(short, long)]
    segment_duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(path) = &args.write_default_config {
        generate_default_config(path)?;
        println!("Default configuration written to {}", path.display());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => ConfigFile::from_file(path)?.into_dasher_config(),
        None => DasherConfig::default(),
    };
    if let Some(folder) = &args.folder {
        config.folder = folder.clone();
    }
    if let Some(base_name) = &args.base_name {
        config.base_name = base_name.clone();
    }
    if let Some(secs) = args.segment_duration {
        config.segment.duration_secs = secs;
    }

    logging::init(&config.log_level, &config.log_format);
    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    config.validate()?;

    let audio = match &args.audio {
        Some(path) => audio_frames(Bytes::from(tokio::fs::read(path).await?))?,
        None => Vec::new(),
    };
    let video = match &args.video {
        Some(path) => video_frames(Bytes::from(tokio::fs::read(path).await?), &args)?,
        None => Vec::new(),
    };
    if audio.is_empty() && video.is_empty() {
        return Err("nothing to segment: pass --audio and/or --video".into());
    }
    tracing::info!("{} audio frames, {} video frames", audio.len(), video.len());

    let dasher = Dasher::with_mpd(config)?;
    let (handle, task) = service::spawn(dasher);

    for (id, kind, present) in [
        (VIDEO_TRACK, "video", !video.is_empty()),
        (AUDIO_TRACK, "audio", !audio.is_empty()),
    ] {
        if !present {
            continue;
        }
        let reply = handle
            .control(json!({ "action": "addSegmenter", "id": id, "kind": kind }))
            .await?;
        if !reply["error"].is_null() {
            return Err(format!("cannot add track {}: {}", id, reply["error"]).into());
        }
    }

    // feed frames in presentation order, one per cycle
    let mut audio = audio.into_iter().peekable();
    let mut video = video.into_iter().peekable();
    let mut published = 0;
    loop {
        let take_audio = match (audio.peek(), video.peek()) {
            (Some(a), Some(v)) => a.pts() <= v.pts(),
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_audio {
            audio.next().map(|f| (AUDIO_TRACK, f))
        } else {
            video.next().map(|f| (VIDEO_TRACK, f))
        };
        let Some((id, frame)) = next else {
            break;
        };
        let report = handle.cycle(BTreeMap::from([(id, frame)])).await?;
        published += report.published.len();
        for (track, error) in &report.errors {
            tracing::debug!("Track {}: {}", track, error);
        }
    }

    handle.shutdown().await?;
    task.await?;
    tracing::info!("Done, {} segments published during streaming", published);
    Ok(())
}

/// Split an ADTS stream and stamp each frame from its sample count
fn audio_frames(data: Bytes) -> dash_segmenter::Result<Vec<Frame>> {
    let frames = split_adts(&data)?;
    let Some(first) = frames.first() else {
        return Ok(Vec::new());
    };
    let Some(header) = AdtsHeader::parse(first)? else {
        return Ok(Vec::new());
    };
    let sample_rate = header.sample_rate();
    let channels = header.channel_config as u16;

    Ok(frames
        .into_iter()
        .enumerate()
        .map(|(n, data)| {
            let nanos = n as u128 * 1024 * 1_000_000_000 / sample_rate as u128;
            let pts = STREAM_START + Duration::from_nanos(nanos as u64);
            AudioFrame::aac(pts, sample_rate, channels, data).into()
        })
        .collect())
}

/// Split an Annex-B stream into access units and stamp them at `--fps`
fn video_frames(data: Bytes, args: &Args) -> Result<Vec<Frame>, Box<dyn std::error::Error>> {
    if !(args.fps > 0.0) {
        return Err(format!("invalid frame rate {}", args.fps).into());
    }
    Ok(split_access_units(&data)
        .into_iter()
        .enumerate()
        .map(|(n, unit)| {
            let pts = STREAM_START + Duration::from_secs_f64(n as f64 / args.fps);
            VideoFrame::h264(pts, args.width, args.height, unit).into()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "dasher",
            "--audio",
            "in.aac",
            "--segment-duration",
            "4",
            "--base-name",
            "live",
        ])
        .unwrap();
        assert_eq!(args.audio, Some(PathBuf::from("in.aac")));
        assert_eq!(args.segment_duration, Some(4));
        assert_eq!(args.fps, 25.0);
    }

    #[test]
    fn test_audio_frames_are_stamped_by_sample_count() {
        let mut stream = Vec::new();
        for _ in 0..3 {
            // 48 kHz stereo AAC-LC, 7-byte header + 2-byte payload
            stream.extend_from_slice(&[0xFF, 0xF1, 0x4C, 0x80, 0x01, 0x3F, 0xFC, 0x21, 0x10]);
        }
        let frames = audio_frames(Bytes::from(stream)).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].pts(), STREAM_START);
        assert_eq!(frames[2].pts(), STREAM_START + Duration::from_nanos(2 * 21_333_333));
    }
}
