//! Fragmented MP4 box writer
//!
//! Builds the `ftyp+moov` initialization segment and `styp+moof+mdat` media
//! segments for a single track. Output depends only on the inputs (no
//! creation times), so identical metadata always yields identical bytes.

use bytes::{BufMut, Bytes, BytesMut};

/// Codec-specific part of the `stsd` sample entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleEntry {
    /// `mp4a` + `esds` carrying an AudioSpecificConfig
    Aac {
        channels: u16,
        sample_rate: u32,
        audio_specific_config: Vec<u8>,
        bitrate: u32,
    },
    /// `avc1` + `avcC` carrying one SPS and one PPS
    Avc {
        width: u16,
        height: u16,
        sps: Vec<u8>,
        pps: Vec<u8>,
    },
}

/// Everything the init segment needs to know about a track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackDescription {
    pub track_id: u32,
    pub timescale: u32,
    pub entry: SampleEntry,
}

/// One media sample inside a fragment
#[derive(Debug, Clone)]
pub struct Sample {
    /// Duration in time-base ticks
    pub duration: u32,
    pub is_sync: bool,
    pub data: Bytes,
}

const SAMPLE_FLAGS_SYNC: u32 = 0x0200_0000;
const SAMPLE_FLAGS_NON_SYNC: u32 = 0x0101_0000;

const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x02_0000;
const TRUN_DATA_OFFSET: u32 = 0x00_0001;
const TRUN_SAMPLE_DURATION: u32 = 0x00_0100;
const TRUN_SAMPLE_SIZE: u32 = 0x00_0200;
const TRUN_SAMPLE_FLAGS: u32 = 0x00_0400;

/// ISO-639-2 "und" packed into 15 bits
const LANGUAGE_UND: u16 = 0x55C4;

/// Build `ftyp` + `moov` (with `mvex`) for `track`
pub fn build_init_segment(track: &TrackDescription) -> Bytes {
    let mut buf = BytesMut::with_capacity(1024);

    write_box(&mut buf, b"ftyp", |b| {
        b.put_slice(b"iso5");
        b.put_u32(512);
        b.put_slice(b"iso5");
        b.put_slice(b"iso6");
        b.put_slice(b"dash");
        b.put_slice(b"mp41");
        if matches!(track.entry, SampleEntry::Avc { .. }) {
            b.put_slice(b"avc1");
        }
    });

    write_box(&mut buf, b"moov", |b| {
        write_mvhd(b, track.timescale, track.track_id + 1);
        write_box(b, b"trak", |b| {
            write_tkhd(b, track);
            write_box(b, b"mdia", |b| {
                write_full_box(b, b"mdhd", 0, 0, |b| {
                    b.put_u32(0); // creation_time
                    b.put_u32(0); // modification_time
                    b.put_u32(track.timescale);
                    b.put_u32(0); // duration
                    b.put_u16(LANGUAGE_UND);
                    b.put_u16(0);
                });
                let (handler, name): (&[u8; 4], &[u8]) = match track.entry {
                    SampleEntry::Aac { .. } => (b"soun", b"SoundHandler\0"),
                    SampleEntry::Avc { .. } => (b"vide", b"VideoHandler\0"),
                };
                write_full_box(b, b"hdlr", 0, 0, |b| {
                    b.put_u32(0); // pre_defined
                    b.put_slice(handler);
                    b.put_bytes(0, 12);
                    b.put_slice(name);
                });
                write_box(b, b"minf", |b| {
                    match track.entry {
                        SampleEntry::Aac { .. } => write_full_box(b, b"smhd", 0, 0, |b| {
                            b.put_u16(0); // balance
                            b.put_u16(0);
                        }),
                        SampleEntry::Avc { .. } => write_full_box(b, b"vmhd", 0, 1, |b| {
                            b.put_bytes(0, 8); // graphicsmode + opcolor
                        }),
                    }
                    write_box(b, b"dinf", |b| {
                        write_full_box(b, b"dref", 0, 0, |b| {
                            b.put_u32(1);
                            write_full_box(b, b"url ", 0, 1, |_| {});
                        });
                    });
                    write_box(b, b"stbl", |b| {
                        write_full_box(b, b"stsd", 0, 0, |b| {
                            b.put_u32(1);
                            write_sample_entry(b, &track.entry);
                        });
                        write_full_box(b, b"stts", 0, 0, |b| b.put_u32(0));
                        write_full_box(b, b"stsc", 0, 0, |b| b.put_u32(0));
                        write_full_box(b, b"stsz", 0, 0, |b| {
                            b.put_u32(0);
                            b.put_u32(0);
                        });
                        write_full_box(b, b"stco", 0, 0, |b| b.put_u32(0));
                    });
                });
            });
        });
        write_box(b, b"mvex", |b| {
            write_full_box(b, b"trex", 0, 0, |b| {
                b.put_u32(track.track_id);
                b.put_u32(1); // default_sample_description_index
                b.put_u32(0); // default_sample_duration
                b.put_u32(0); // default_sample_size
                b.put_u32(0); // default_sample_flags
            });
        });
    });

    buf.freeze()
}

/// Build `styp` + `moof` + `mdat` holding `samples`
///
/// * `sequence_number` - `mfhd` sequence, strictly increasing per track
/// * `base_media_decode_time` - `tfdt` of the first sample, in ticks
pub fn build_media_segment(
    track_id: u32,
    sequence_number: u32,
    base_media_decode_time: u64,
    samples: &[Sample],
) -> Bytes {
    let payload_len: usize = samples.iter().map(|s| s.data.len()).sum();
    let mut buf = BytesMut::with_capacity(256 + samples.len() * 12 + payload_len);

    write_box(&mut buf, b"styp", |b| {
        b.put_slice(b"msdh");
        b.put_u32(0);
        b.put_slice(b"msdh");
        b.put_slice(b"dash");
    });

    let moof_start = buf.len();
    let mut data_offset_pos = 0;
    write_box(&mut buf, b"moof", |b| {
        write_full_box(b, b"mfhd", 0, 0, |b| b.put_u32(sequence_number));
        write_box(b, b"traf", |b| {
            write_full_box(b, b"tfhd", 0, TFHD_DEFAULT_BASE_IS_MOOF, |b| {
                b.put_u32(track_id);
            });
            write_full_box(b, b"tfdt", 1, 0, |b| b.put_u64(base_media_decode_time));
            let flags =
                TRUN_DATA_OFFSET | TRUN_SAMPLE_DURATION | TRUN_SAMPLE_SIZE | TRUN_SAMPLE_FLAGS;
            write_full_box(b, b"trun", 0, flags, |b| {
                b.put_u32(samples.len() as u32);
                data_offset_pos = b.len();
                b.put_u32(0); // patched below
                for sample in samples {
                    b.put_u32(sample.duration);
                    b.put_u32(sample.data.len() as u32);
                    b.put_u32(if sample.is_sync {
                        SAMPLE_FLAGS_SYNC
                    } else {
                        SAMPLE_FLAGS_NON_SYNC
                    });
                }
            });
        });
    });

    // data_offset is relative to the start of moof and points past the mdat header
    let data_offset = (buf.len() - moof_start + 8) as u32;
    buf[data_offset_pos..data_offset_pos + 4].copy_from_slice(&data_offset.to_be_bytes());

    buf.put_u32((8 + payload_len) as u32);
    buf.put_slice(b"mdat");
    for sample in samples {
        buf.put_slice(&sample.data);
    }

    buf.freeze()
}

fn write_mvhd(b: &mut BytesMut, timescale: u32, next_track_id: u32) {
    write_full_box(b, b"mvhd", 0, 0, |b| {
        b.put_u32(0); // creation_time
        b.put_u32(0); // modification_time
        b.put_u32(timescale);
        b.put_u32(0); // duration
        b.put_u32(0x0001_0000); // rate 1.0
        b.put_u16(0x0100); // volume 1.0
        b.put_bytes(0, 10);
        write_unity_matrix(b);
        b.put_bytes(0, 24); // pre_defined
        b.put_u32(next_track_id);
    });
}

fn write_tkhd(b: &mut BytesMut, track: &TrackDescription) {
    // enabled | in_movie | in_preview
    write_full_box(b, b"tkhd", 0, 0x0000_0007, |b| {
        b.put_u32(0); // creation_time
        b.put_u32(0); // modification_time
        b.put_u32(track.track_id);
        b.put_u32(0);
        b.put_u32(0); // duration
        b.put_bytes(0, 8);
        b.put_u16(0); // layer
        b.put_u16(0); // alternate_group
        match track.entry {
            SampleEntry::Aac { .. } => b.put_u16(0x0100),
            SampleEntry::Avc { .. } => b.put_u16(0),
        }
        b.put_u16(0);
        write_unity_matrix(b);
        let (width, height) = match track.entry {
            SampleEntry::Aac { .. } => (0u32, 0u32),
            SampleEntry::Avc { width, height, .. } => (width as u32, height as u32),
        };
        b.put_u32(width << 16);
        b.put_u32(height << 16);
    });
}

fn write_unity_matrix(b: &mut BytesMut) {
    for v in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        b.put_u32(v);
    }
}

fn write_sample_entry(b: &mut BytesMut, entry: &SampleEntry) {
    match entry {
        SampleEntry::Aac {
            channels,
            sample_rate,
            audio_specific_config,
            bitrate,
        } => write_box(b, b"mp4a", |b| {
            b.put_bytes(0, 6);
            b.put_u16(1); // data_reference_index
            b.put_bytes(0, 8);
            b.put_u16(*channels);
            b.put_u16(16); // samplesize
            b.put_u32(0);
            // 16.16 fixed point; rates above 65535 do not fit and are clamped
            b.put_u32((*sample_rate).min(0xFFFF) << 16);
            write_full_box(b, b"esds", 0, 0, |b| {
                write_es_descriptor(b, audio_specific_config, *bitrate);
            });
        }),
        SampleEntry::Avc {
            width,
            height,
            sps,
            pps,
        } => write_box(b, b"avc1", |b| {
            b.put_bytes(0, 6);
            b.put_u16(1); // data_reference_index
            b.put_bytes(0, 16); // pre_defined + reserved
            b.put_u16(*width);
            b.put_u16(*height);
            b.put_u32(0x0048_0000); // 72 dpi
            b.put_u32(0x0048_0000);
            b.put_u32(0);
            b.put_u16(1); // frame_count
            b.put_bytes(0, 32); // compressorname
            b.put_u16(0x0018); // depth
            b.put_i16(-1);
            write_box(b, b"avcC", |b| {
                b.put_u8(1); // configurationVersion
                b.put_u8(sps.get(1).copied().unwrap_or(0)); // profile
                b.put_u8(sps.get(2).copied().unwrap_or(0)); // compatibility
                b.put_u8(sps.get(3).copied().unwrap_or(0)); // level
                b.put_u8(0xFF); // 4-byte NAL lengths
                b.put_u8(0xE1); // one SPS
                b.put_u16(sps.len() as u16);
                b.put_slice(sps);
                b.put_u8(1); // one PPS
                b.put_u16(pps.len() as u16);
                b.put_slice(pps);
            });
        }),
    }
}

fn write_es_descriptor(b: &mut BytesMut, asc: &[u8], bitrate: u32) {
    let dec_specific_len = asc.len();
    let dec_config_len = 13 + 2 + dec_specific_len;
    let sl_config_len = 1;
    let es_len = 3 + (2 + dec_config_len) + (2 + sl_config_len);

    b.put_u8(0x03); // ES_Descriptor
    b.put_u8(es_len as u8);
    b.put_u16(1); // ES_ID
    b.put_u8(0);

    b.put_u8(0x04); // DecoderConfigDescriptor
    b.put_u8(dec_config_len as u8);
    b.put_u8(0x40); // Audio ISO/IEC 14496-3
    b.put_u8(0x15); // audio stream
    b.put_bytes(0, 3); // bufferSizeDB
    b.put_u32(bitrate); // maxBitrate
    b.put_u32(bitrate); // avgBitrate

    b.put_u8(0x05); // DecoderSpecificInfo
    b.put_u8(dec_specific_len as u8);
    b.put_slice(asc);

    b.put_u8(0x06); // SLConfigDescriptor
    b.put_u8(sl_config_len as u8);
    b.put_u8(0x02);
}

fn write_box<F: FnOnce(&mut BytesMut)>(buf: &mut BytesMut, typ: &[u8; 4], body: F) {
    let start = buf.len();
    buf.put_u32(0);
    buf.put_slice(typ);
    body(buf);
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

fn write_full_box<F: FnOnce(&mut BytesMut)>(
    buf: &mut BytesMut,
    typ: &[u8; 4],
    version: u8,
    flags: u32,
    body: F,
) {
    write_box(buf, typ, |b| {
        b.put_u32(((version as u32) << 24) | (flags & 0x00FF_FFFF));
        body(b);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::isobmff::{find_box, read_u32, read_u64, top_level_types, CONTAINER_BOXES};

    fn aac_track() -> TrackDescription {
        TrackDescription {
            track_id: 1,
            timescale: 12800,
            entry: SampleEntry::Aac {
                channels: 2,
                sample_rate: 48000,
                audio_specific_config: vec![0x11, 0x90],
                bitrate: 128_000,
            },
        }
    }

    fn avc_track() -> TrackDescription {
        TrackDescription {
            track_id: 1,
            timescale: 12800,
            entry: SampleEntry::Avc {
                width: 640,
                height: 360,
                sps: vec![0x67, 0x42, 0xC0, 0x1E, 0xAA],
                pps: vec![0x68, 0xCE, 0x3C, 0x80],
            },
        }
    }

    #[test]
    fn test_init_segment_layout() {
        let init = build_init_segment(&aac_track());
        assert_eq!(top_level_types(&init), vec![*b"ftyp", *b"moov"]);
        let mdhd = find_box(&init, b"mdhd", CONTAINER_BOXES).unwrap();
        assert_eq!(read_u32(mdhd, 12), Some(12800));
        assert!(find_box(&init, b"esds", CONTAINER_BOXES).is_some());
        assert!(find_box(&init, b"trex", CONTAINER_BOXES).is_some());
    }

    #[test]
    fn test_init_segment_is_deterministic() {
        assert_eq!(build_init_segment(&aac_track()), build_init_segment(&aac_track()));
    }

    #[test]
    fn test_avc_init_carries_parameter_sets() {
        let init = build_init_segment(&avc_track());
        let avcc = find_box(&init, b"avcC", CONTAINER_BOXES).unwrap();
        assert_eq!(avcc[1], 0x42);
        assert_eq!(avcc[3], 0x1E);
        assert_eq!(&avcc[8..13], &[0x67, 0x42, 0xC0, 0x1E, 0xAA]);
        let tkhd = find_box(&init, b"tkhd", CONTAINER_BOXES).unwrap();
        assert_eq!(read_u32(tkhd, 76), Some(640 << 16));
    }

    #[test]
    fn test_media_segment_layout() {
        let samples = vec![
            Sample {
                duration: 273,
                is_sync: true,
                data: Bytes::from_static(&[1, 2, 3]),
            },
            Sample {
                duration: 273,
                is_sync: true,
                data: Bytes::from_static(&[4, 5]),
            },
        ];
        let seg = build_media_segment(1, 7, 25662, &samples);
        assert_eq!(top_level_types(&seg), vec![*b"styp", *b"moof", *b"mdat"]);

        let mfhd = find_box(&seg, b"mfhd", CONTAINER_BOXES).unwrap();
        assert_eq!(read_u32(mfhd, 4), Some(7));
        let tfdt = find_box(&seg, b"tfdt", CONTAINER_BOXES).unwrap();
        assert_eq!(read_u64(tfdt, 4), Some(25662));
        let trun = find_box(&seg, b"trun", CONTAINER_BOXES).unwrap();
        assert_eq!(read_u32(trun, 4), Some(2));

        // data_offset must land on the first mdat payload byte
        let moof_pos = seg.windows(4).position(|w| w == b"moof").unwrap() - 4;
        let data_offset = read_u32(trun, 8).unwrap() as usize;
        assert_eq!(&seg[moof_pos + data_offset..], &[1, 2, 3, 4, 5]);
    }
}
