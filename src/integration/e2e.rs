//! End-to-end tests
//!
//! Frames go in through `Dasher::process_cycle`; assertions are made on the
//! files that come out.

use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::dasher::{CycleReport, Dasher};
use crate::frame::{Frame, MediaKind, TrackId};
use crate::integration::fixtures::{
    aac_frame_at, audio_config, dasher_config, video_frame_at, AUDIO_START_MICROS, AUDIO_TRACK,
    GOLDEN_AUDIO_FIRST, GOLDEN_AUDIO_INIT, GOLDEN_AUDIO_TRAILING, VIDEO_TRACK,
};
use crate::segment::isobmff::{find_box, read_u32, read_u64, top_level_types, CONTAINER_BOXES};
use crate::segment::SegmentBuffer;
use crate::segmenter::{ticks_to_nanos, Segmenter, SegmenterState};

fn cycle(dasher: &mut Dasher, id: TrackId, frame: Frame) -> CycleReport {
    dasher.process_cycle(&BTreeMap::from([(id, frame)]))
}

fn sample_count(segment: &[u8]) -> u32 {
    let trun = find_box(segment, b"trun", CONTAINER_BOXES).unwrap();
    read_u32(trun, 4).unwrap()
}

fn decode_time(segment: &[u8]) -> u64 {
    let tfdt = find_box(segment, b"tfdt", CONTAINER_BOXES).unwrap();
    read_u64(tfdt, 4).unwrap()
}

/// Feed `frames` audio frames into a fresh audio-only dasher writing to `dir`
fn run_audio(dir: &Path, frames: u64) -> (Dasher, Vec<CycleReport>) {
    let mut dasher = Dasher::with_mpd(dasher_config(dir)).unwrap();
    dasher.add_track(AUDIO_TRACK, MediaKind::Audio).unwrap();
    let reports = (0..frames)
        .map(|n| cycle(&mut dasher, AUDIO_TRACK, aac_frame_at(n)))
        .collect();
    (dasher, reports)
}

#[test]
fn test_audio_end_to_end() {
    let dir = tempfile::TempDir::new().unwrap();
    let (dasher, reports) = run_audio(dir.path(), 94);

    let segmenter = dasher.track(AUDIO_TRACK).unwrap().segmenter();
    assert_eq!(segmenter.frame_duration(), 273);
    assert_eq!(segmenter.timestamp_offset(), Some(Duration::from_micros(1_000)));

    let init_path = dir.path().join("test_1_init.m4a");
    let media_path = dir.path().join("test_1_0.m4a");
    assert_eq!(reports[0].init_written, vec![init_path.clone()]);
    assert!(reports[..93].iter().all(|r| r.published.is_empty()));
    assert_eq!(reports[93].published, vec![media_path.clone()]);

    let init = std::fs::read(&init_path).unwrap();
    assert_eq!(top_level_types(&init), vec![*b"ftyp", *b"moov"]);

    let media = std::fs::read(&media_path).unwrap();
    assert_eq!(top_level_types(&media), vec![*b"styp", *b"moof", *b"mdat"]);
    assert_eq!(sample_count(&media), 94);
    assert_eq!(decode_time(&media), 0);
    let mfhd = find_box(&media, b"mfhd", CONTAINER_BOXES).unwrap();
    assert_eq!(read_u32(mfhd, 4), Some(1));

    let mpd = std::fs::read_to_string(dir.path().join("test.mpd")).unwrap();
    assert!(mpd.contains("<S t=\"0\" d=\"25662\"/>"));
    assert!(mpd.contains("codecs=\"mp4a.40.2\""));
}

#[test]
fn test_output_matches_reference_bytes() {
    let dir = tempfile::TempDir::new().unwrap();
    let (mut dasher, _) = run_audio(dir.path(), 94 + 47);
    dasher.remove_track(AUDIO_TRACK).unwrap();

    for (name, golden) in [
        ("test_1_init.m4a", GOLDEN_AUDIO_INIT),
        ("test_1_0.m4a", GOLDEN_AUDIO_FIRST),
        ("test_1_25662.m4a", GOLDEN_AUDIO_TRAILING),
    ] {
        let written = std::fs::read(dir.path().join(name)).unwrap();
        assert_eq!(written, golden, "{} differs from the reference bytes", name);
    }
}

#[test]
fn test_trailing_fragment_on_removal() {
    let dir = tempfile::TempDir::new().unwrap();
    let (mut dasher, _) = run_audio(dir.path(), 94 + 47);

    dasher.remove_track(AUDIO_TRACK).unwrap();
    assert!(dasher.track(AUDIO_TRACK).is_none());

    let trailing = std::fs::read(dir.path().join("test_1_25662.m4a")).unwrap();
    assert_eq!(sample_count(&trailing), 47);
    assert_eq!(decode_time(&trailing), 25662);
    let mfhd = find_box(&trailing, b"mfhd", CONTAINER_BOXES).unwrap();
    assert_eq!(read_u32(mfhd, 4), Some(2));

    assert!(matches!(
        dasher.remove_track(AUDIO_TRACK),
        Err(crate::DashError::UnknownTrack(AUDIO_TRACK))
    ));
}

#[test]
fn test_segmenter_threshold_and_finish() {
    let mut seg = Segmenter::new(MediaKind::Audio, &audio_config());
    let mut init = SegmentBuffer::new(1 << 16);
    let mut media = SegmentBuffer::new(1 << 20);

    let mut completed_at = Vec::new();
    for n in 0..(94 + 47) {
        seg.manage_frame(&aac_frame_at(n)).unwrap();
        seg.update_config().unwrap();
        if n == 0 {
            assert!(seg.generate_init_segment(&mut init).unwrap());
        } else {
            assert!(!seg.generate_init_segment(&mut init).unwrap());
        }
        if seg.generate_segment(&mut media).unwrap() {
            completed_at.push(n);
            assert_eq!(media.duration(), 25662);
            assert_eq!(media.timestamp(), 0);
            assert_eq!(seg.buffered_duration(), 0);
            media.clear();
        }
    }
    assert_eq!(completed_at, vec![93]);
    assert_eq!(seg.buffered_duration(), 47 * 273);

    assert!(seg.finish_segment(&mut media).unwrap());
    assert!(media.duration() < 25600);
    assert_eq!(media.timestamp(), 25662);
    assert_eq!(seg.state(), SegmenterState::Finishing);
    media.clear();
    assert!(!seg.finish_segment(&mut media).unwrap());
}

#[test]
fn test_init_regenerated_after_flush() {
    let mut seg = Segmenter::new(MediaKind::Audio, &audio_config());
    let mut first = SegmentBuffer::new(1 << 16);
    let mut second = SegmentBuffer::new(1 << 16);

    assert!(matches!(
        seg.generate_init_segment(&mut first),
        Err(crate::DashError::NotConfigured)
    ));
    seg.manage_frame(&aac_frame_at(0)).unwrap();
    seg.update_config().unwrap();
    assert!(seg.generate_init_segment(&mut first).unwrap());
    assert!(!seg.generate_init_segment(&mut second).unwrap());

    seg.flush_context();
    assert!(seg.generate_init_segment(&mut second).unwrap());
    assert_eq!(first.data(), second.data());
    assert_eq!(seg.metadata(), &[0x11, 0x90]);
}

/// Audio from 1 ms, video (IDR every second) from `video_start`, fed in pts order
fn interleaved(audio_frames: u64, video_start: Duration, video_frames: u64) -> Vec<(TrackId, Frame)> {
    let mut frames: Vec<(TrackId, Frame)> = (0..audio_frames)
        .map(|n| (AUDIO_TRACK, aac_frame_at(n)))
        .chain((0..video_frames).map(|n| (VIDEO_TRACK, video_frame_at(video_start, n, 25))))
        .collect();
    frames.sort_by_key(|(_, frame)| frame.pts());
    frames
}

#[test]
fn test_audio_aligned_to_video_origin() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut dasher = Dasher::with_mpd(dasher_config(dir.path())).unwrap();
    dasher.add_track(VIDEO_TRACK, MediaKind::Video).unwrap();
    dasher.add_track(AUDIO_TRACK, MediaKind::Audio).unwrap();

    let mut held = 0;
    let mut discarded = Vec::new();
    for (id, frame) in interleaved(200, Duration::from_millis(500), 90) {
        let report = cycle(&mut dasher, id, frame);
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        held += report.held.len();
        discarded.extend(report.discarded);
    }

    assert!(held > 0);
    assert_eq!(discarded, vec![AUDIO_TRACK]);
    assert!(dasher.timeline().video_started());
    // video starts 499 ms into the process timeline, 6387.2 ticks truncated
    assert_eq!(dasher.timeline().origin_ns(), Some(ticks_to_nanos(6387, 12800)));

    assert!(dir.path().join("test_2_init.m4v").exists());
    assert!(dir.path().join("test_2_6387.m4v").exists());
    assert!(!dir.path().join("test_1_0.m4a").exists());
    assert!(dir.path().join("test_1_25662.m4a").exists());

    let video = std::fs::read(dir.path().join("test_2_6387.m4v")).unwrap();
    assert_eq!(sample_count(&video), 50);
    assert_eq!(decode_time(&video), 6387);
    let mpd = std::fs::read_to_string(dir.path().join("test.mpd")).unwrap();
    assert!(mpd.contains("codecs=\"avc1.42c01e\""));
}

#[test]
fn test_tracks_share_one_timeline() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut dasher = Dasher::with_mpd(dasher_config(dir.path())).unwrap();
    dasher.add_track(VIDEO_TRACK, MediaKind::Video).unwrap();
    dasher.add_track(AUDIO_TRACK, MediaKind::Audio).unwrap();

    // video starts one second after audio
    for (id, frame) in interleaved(200, Duration::from_millis(1001), 100) {
        let report = cycle(&mut dasher, id, frame);
        assert!(report.errors.is_empty(), "{:?}", report.errors);
    }

    let audio = dasher.track(AUDIO_TRACK).unwrap().segmenter();
    let video = dasher.track(VIDEO_TRACK).unwrap().segmenter();
    let start = Duration::from_micros(AUDIO_START_MICROS);
    assert_eq!(audio.timeline_origin(), Some(start));
    assert_eq!(video.timeline_origin(), Some(start));
    assert_eq!(video.timestamp_offset(), Some(Duration::from_millis(1001)));

    // both decode times count from the first audio frame
    let video_seg = std::fs::read(dir.path().join("test_2_12800.m4v")).unwrap();
    assert_eq!(decode_time(&video_seg), 12800);
    let audio_seg = std::fs::read(dir.path().join("test_1_25662.m4a")).unwrap();
    assert_eq!(decode_time(&audio_seg), 25662);

    let mpd = std::fs::read_to_string(dir.path().join("test.mpd")).unwrap();
    assert!(mpd.contains("<S t=\"12800\" d=\"25600\"/>"), "{}", mpd);
    assert!(mpd.contains("<S t=\"25662\" d=\"25662\"/>"), "{}", mpd);

    // the gap between the first published video and audio samples survives
    // in the manifest to within one audio frame
    let video_pts = Duration::from_millis(1001);
    let audio_pts = aac_frame_at(94).pts();
    let real_gap = (audio_pts - video_pts).as_nanos();
    let mpd_gap = ticks_to_nanos(25662 - 12800, 12800);
    assert!(real_gap.abs_diff(mpd_gap) < ticks_to_nanos(273, 12800));
}

#[test]
fn test_force_audio_drain() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut dasher = Dasher::with_mpd(dasher_config(dir.path())).unwrap();
    dasher.add_track(VIDEO_TRACK, MediaKind::Video).unwrap();
    dasher.add_track(AUDIO_TRACK, MediaKind::Audio).unwrap();

    for n in 0..100 {
        let report = cycle(&mut dasher, AUDIO_TRACK, aac_frame_at(n));
        assert!(report.published.is_empty());
    }
    assert!(dasher.track(AUDIO_TRACK).unwrap().is_holding());

    // the held window plus the six frames buffered behind it
    assert_eq!(dasher.force_audio_drain().unwrap(), 2);
    assert!(dasher.timeline().is_audio_only());
    assert!(dir.path().join("test_1_0.m4a").exists());
    let trailing = std::fs::read(dir.path().join("test_1_25662.m4a")).unwrap();
    assert_eq!(sample_count(&trailing), 6);

    // audio is no longer gated on video
    let mut published = Vec::new();
    for n in 100..(100 + 94) {
        published.extend(cycle(&mut dasher, AUDIO_TRACK, aac_frame_at(n)).published);
    }
    assert_eq!(published, vec![dir.path().join(format!("test_1_{}.m4a", 100 * 273))]);
}

#[test]
fn test_frame_errors_stay_per_track() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut dasher = Dasher::with_mpd(dasher_config(dir.path())).unwrap();
    dasher.add_track(AUDIO_TRACK, MediaKind::Audio).unwrap();
    dasher.add_track(VIDEO_TRACK, MediaKind::Video).unwrap();

    // audio frame handed to the video track, plus a frame for an unknown track
    let frames = BTreeMap::from([
        (AUDIO_TRACK, aac_frame_at(0)),
        (VIDEO_TRACK, aac_frame_at(0)),
        (9, aac_frame_at(0)),
    ]);
    let report = dasher.process_cycle(&frames);
    let failed: Vec<TrackId> = report.errors.iter().map(|(id, _)| *id).collect();
    assert_eq!(failed, vec![VIDEO_TRACK, 9]);
    assert_eq!(report.init_written.len(), 1);

    let video = dasher.track(VIDEO_TRACK).unwrap().segmenter();
    assert_eq!(video.timestamp_offset(), None);
    assert_eq!(video.state(), SegmenterState::Uninitialized);
}

#[test]
fn test_control_events() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut dasher = Dasher::with_mpd(dasher_config(dir.path())).unwrap();
    let ok = json!({"error": null});

    let other = dir.path().join("other");
    let reply = dasher.handle_event(&json!({
        "action": "configure",
        "folder": other,
        "baseName": "cam",
        "segDurInSec": 4
    }));
    assert_eq!(reply, ok);
    assert_eq!(dasher.config().mpd_path(), other.join("cam.mpd"));

    assert_eq!(
        dasher.handle_event(&json!({"action": "addSegmenter", "id": 1, "kind": "audio"})),
        ok
    );
    let dup = dasher.handle_event(&json!({"action": "addSegmenter", "id": 1, "kind": "video"}));
    assert_eq!(dup, json!({"error": "Track already exists: 1"}));

    let busy = dasher.handle_event(&json!({
        "action": "configure",
        "folder": dir.path(),
        "baseName": "again",
        "segDurInSec": 2
    }));
    assert!(busy["error"].is_string());
    assert_eq!(dasher.config().base_name, "cam");

    let malformed = dasher.handle_event(&json!({"action": "setBitrate", "id": 1}));
    assert!(malformed["error"].is_string());
    assert_eq!(dasher.track(1).unwrap().segmenter().bitrate(), 0);

    assert_eq!(
        dasher.handle_event(&json!({"action": "setBitrate", "id": 1, "bitrate": 96})),
        ok
    );
    let state = dasher.state();
    assert_eq!(state["tracks"][0]["bitrate"], 96_000);
    assert_eq!(state["segDurInSec"], 4);

    assert_eq!(dasher.handle_event(&json!({"action": "removeSegmenter", "id": 1})), ok);
    let missing = dasher.handle_event(&json!({"action": "removeSegmenter", "id": 1}));
    assert_eq!(missing, json!({"error": "Unknown track: 1"}));
    assert!(dasher.track_ids().is_empty());
}

#[test]
fn test_shutdown_flushes_everything() {
    let dir = tempfile::TempDir::new().unwrap();
    let (mut dasher, _) = run_audio(dir.path(), 10);
    dasher.shutdown().unwrap();

    assert!(dasher.track_ids().is_empty());
    let trailing = std::fs::read(dir.path().join("test_1_0.m4a")).unwrap();
    assert_eq!(sample_count(&trailing), 10);
    let mpd = std::fs::read_to_string(dir.path().join("test.mpd")).unwrap();
    assert!(!mpd.contains("AdaptationSet"));
}
