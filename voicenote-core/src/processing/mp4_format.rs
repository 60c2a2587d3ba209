//! MPEG-4 (ISO-BMFF) box serialization for a single AAC audio track.
//!
//! Produces the boxes an `.m4a` needs:
//!
//! ```text
//! ftyp
//! mdat  (64-bit size, patched on finalize)
//! moov
//! ├── mvhd
//! └── trak
//!     ├── tkhd
//!     └── mdia
//!         ├── mdhd
//!         ├── hdlr  (soun)
//!         └── minf
//!             ├── smhd
//!             ├── dinf/dref/url
//!             └── stbl
//!                 ├── stsd/mp4a/esds
//!                 ├── stts
//!                 ├── stsc
//!                 ├── stsz
//!                 └── stco | co64
//! ```
//!
//! All samples live in one chunk that starts right after the mdat header.

use crate::models::audio_models::OutputFormat;

/// `ftyp` size in bytes.
pub const FTYP_SIZE: usize = 28;

/// mdat header with a 64-bit largesize field.
pub const MDAT_HEADER_SIZE: usize = 16;

/// Movie-level timescale (milliseconds).
const MOVIE_TIMESCALE: u32 = 1000;

/// MPEG-4 sampling-frequency table (ISO/IEC 14496-3, 1.6.3.4).
pub const SAMPLING_FREQUENCIES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

const AAC_LC_OBJECT_TYPE: u8 = 2;

const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

pub fn sampling_frequency_index(sample_rate: u32) -> Option<u8> {
    SAMPLING_FREQUENCIES
        .iter()
        .position(|&rate| rate == sample_rate)
        .map(|index| index as u8)
}

/// Two-byte AAC-LC AudioSpecificConfig.
pub fn audio_specific_config(sample_rate: u32, channel_count: u16) -> Option<[u8; 2]> {
    let freq_index = sampling_frequency_index(sample_rate)?;
    let channels = channel_count as u8 & 0x0f;
    Some([
        (AAC_LC_OBJECT_TYPE << 3) | (freq_index >> 1),
        ((freq_index & 1) << 7) | (channels << 3),
    ])
}

/// Per-sample bookkeeping gathered while units are appended to mdat.
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    pub sizes: Vec<u32>,
    /// Durations in media timescale units (the sample rate).
    pub durations: Vec<u32>,
    /// File offset of the first sample.
    pub chunk_offset: u64,
}

impl SampleTable {
    pub fn media_duration(&self) -> u64 {
        self.durations.iter().map(|&d| d as u64).sum()
    }

    /// Run-length encode durations into `(sample_count, sample_delta)` pairs.
    pub fn time_to_sample(&self) -> Vec<(u32, u32)> {
        let mut runs: Vec<(u32, u32)> = Vec::new();
        for &delta in &self.durations {
            match runs.last_mut() {
                Some((count, last)) if *last == delta => *count += 1,
                _ => runs.push((1, delta)),
            }
        }
        runs
    }
}

/// `ftyp` declaring an M4A audio file.
pub fn generate_ftyp() -> Vec<u8> {
    let mut out = Vec::with_capacity(FTYP_SIZE);
    write_box(&mut out, b"ftyp", |b| {
        b.extend_from_slice(b"M4A ");
        b.extend_from_slice(&0u32.to_be_bytes());
        b.extend_from_slice(b"M4A ");
        b.extend_from_slice(b"mp42");
        b.extend_from_slice(b"isom");
    });
    out
}

/// mdat header whose size is patched once the payload length is known.
pub fn generate_mdat_header(payload_size: u64) -> [u8; MDAT_HEADER_SIZE] {
    let mut header = [0u8; MDAT_HEADER_SIZE];
    header[0..4].copy_from_slice(&1u32.to_be_bytes());
    header[4..8].copy_from_slice(b"mdat");
    header[8..16].copy_from_slice(&(payload_size + MDAT_HEADER_SIZE as u64).to_be_bytes());
    header
}

/// Build the complete `moov` box for one audio track.
pub fn generate_moov(format: &OutputFormat, table: &SampleTable, track_id: u32) -> Vec<u8> {
    let media_duration = table.media_duration();
    let movie_duration = media_duration * MOVIE_TIMESCALE as u64 / format.sample_rate.max(1) as u64;

    let mut out = Vec::new();
    write_box(&mut out, b"moov", |moov| {
        write_full_box(moov, b"mvhd", 0, 0, |b| {
            b.extend_from_slice(&0u32.to_be_bytes()); // creation_time
            b.extend_from_slice(&0u32.to_be_bytes()); // modification_time
            b.extend_from_slice(&MOVIE_TIMESCALE.to_be_bytes());
            b.extend_from_slice(&clamp_u32(movie_duration).to_be_bytes());
            b.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate 1.0
            b.extend_from_slice(&0x0100u16.to_be_bytes()); // volume 1.0
            b.extend_from_slice(&[0u8; 10]);
            write_matrix(b);
            b.extend_from_slice(&[0u8; 24]); // pre_defined
            b.extend_from_slice(&(track_id + 1).to_be_bytes()); // next_track_ID
        });
        write_box(moov, b"trak", |trak| {
            write_full_box(trak, b"tkhd", 0, 0x000007, |b| {
                b.extend_from_slice(&0u32.to_be_bytes());
                b.extend_from_slice(&0u32.to_be_bytes());
                b.extend_from_slice(&track_id.to_be_bytes());
                b.extend_from_slice(&0u32.to_be_bytes());
                b.extend_from_slice(&clamp_u32(movie_duration).to_be_bytes());
                b.extend_from_slice(&[0u8; 8]);
                b.extend_from_slice(&0u16.to_be_bytes()); // layer
                b.extend_from_slice(&1u16.to_be_bytes()); // alternate_group
                b.extend_from_slice(&0x0100u16.to_be_bytes()); // volume
                b.extend_from_slice(&0u16.to_be_bytes());
                write_matrix(b);
                b.extend_from_slice(&0u32.to_be_bytes()); // width
                b.extend_from_slice(&0u32.to_be_bytes()); // height
            });
            write_box(trak, b"mdia", |mdia| {
                write_full_box(mdia, b"mdhd", 0, 0, |b| {
                    b.extend_from_slice(&0u32.to_be_bytes());
                    b.extend_from_slice(&0u32.to_be_bytes());
                    b.extend_from_slice(&format.sample_rate.to_be_bytes());
                    b.extend_from_slice(&clamp_u32(media_duration).to_be_bytes());
                    b.extend_from_slice(&0x55c4u16.to_be_bytes()); // "und"
                    b.extend_from_slice(&0u16.to_be_bytes());
                });
                write_full_box(mdia, b"hdlr", 0, 0, |b| {
                    b.extend_from_slice(&0u32.to_be_bytes());
                    b.extend_from_slice(b"soun");
                    b.extend_from_slice(&[0u8; 12]);
                    b.extend_from_slice(b"SoundHandler\0");
                });
                write_box(mdia, b"minf", |minf| {
                    write_full_box(minf, b"smhd", 0, 0, |b| {
                        b.extend_from_slice(&0u16.to_be_bytes()); // balance
                        b.extend_from_slice(&0u16.to_be_bytes());
                    });
                    write_box(minf, b"dinf", |dinf| {
                        write_full_box(dinf, b"dref", 0, 0, |b| {
                            b.extend_from_slice(&1u32.to_be_bytes());
                            // Media data lives in this file.
                            write_full_box(b, b"url ", 0, 1, |_| {});
                        });
                    });
                    write_stbl(minf, format, table);
                });
            });
        });
    });
    out
}

fn write_stbl(out: &mut Vec<u8>, format: &OutputFormat, table: &SampleTable) {
    write_box(out, b"stbl", |stbl| {
        write_full_box(stbl, b"stsd", 0, 0, |b| {
            b.extend_from_slice(&1u32.to_be_bytes());
            write_mp4a(b, format);
        });
        write_full_box(stbl, b"stts", 0, 0, |b| {
            let runs = table.time_to_sample();
            b.extend_from_slice(&(runs.len() as u32).to_be_bytes());
            for (count, delta) in runs {
                b.extend_from_slice(&count.to_be_bytes());
                b.extend_from_slice(&delta.to_be_bytes());
            }
        });
        let sample_count = table.sizes.len() as u32;
        write_full_box(stbl, b"stsc", 0, 0, |b| {
            if sample_count == 0 {
                b.extend_from_slice(&0u32.to_be_bytes());
            } else {
                b.extend_from_slice(&1u32.to_be_bytes());
                b.extend_from_slice(&1u32.to_be_bytes()); // first_chunk
                b.extend_from_slice(&sample_count.to_be_bytes());
                b.extend_from_slice(&1u32.to_be_bytes()); // sample_description_index
            }
        });
        write_full_box(stbl, b"stsz", 0, 0, |b| {
            b.extend_from_slice(&0u32.to_be_bytes()); // sizes vary
            b.extend_from_slice(&sample_count.to_be_bytes());
            for size in &table.sizes {
                b.extend_from_slice(&size.to_be_bytes());
            }
        });
        let chunk_count = u32::from(sample_count > 0);
        if table.chunk_offset > u32::MAX as u64 {
            write_full_box(stbl, b"co64", 0, 0, |b| {
                b.extend_from_slice(&chunk_count.to_be_bytes());
                if chunk_count > 0 {
                    b.extend_from_slice(&table.chunk_offset.to_be_bytes());
                }
            });
        } else {
            write_full_box(stbl, b"stco", 0, 0, |b| {
                b.extend_from_slice(&chunk_count.to_be_bytes());
                if chunk_count > 0 {
                    b.extend_from_slice(&(table.chunk_offset as u32).to_be_bytes());
                }
            });
        }
    });
}

fn write_mp4a(out: &mut Vec<u8>, format: &OutputFormat) {
    write_box(out, b"mp4a", |b| {
        b.extend_from_slice(&[0u8; 6]);
        b.extend_from_slice(&1u16.to_be_bytes()); // data_reference_index
        b.extend_from_slice(&[0u8; 8]);
        b.extend_from_slice(&format.channel_count.to_be_bytes());
        b.extend_from_slice(&16u16.to_be_bytes()); // samplesize
        b.extend_from_slice(&0u16.to_be_bytes());
        b.extend_from_slice(&0u16.to_be_bytes());
        // 16.16 fixed point; rates above 65535 saturate as other muxers do.
        b.extend_from_slice(&(format.sample_rate.min(0xffff) << 16).to_be_bytes());
        write_esds(b, format);
    });
}

fn write_esds(out: &mut Vec<u8>, format: &OutputFormat) {
    let mut decoder_specific = Vec::new();
    write_descriptor(&mut decoder_specific, 0x05, &format.codec_config);

    let mut decoder_config = Vec::new();
    decoder_config.push(0x40); // MPEG-4 audio
    decoder_config.push((0x05 << 2) | 1); // audio stream
    decoder_config.extend_from_slice(&[0x00, 0x18, 0x00]); // bufferSizeDB
    decoder_config.extend_from_slice(&format.bitrate_bps.to_be_bytes()); // maxBitrate
    decoder_config.extend_from_slice(&format.bitrate_bps.to_be_bytes()); // avgBitrate
    decoder_config.extend_from_slice(&decoder_specific);

    let mut es = Vec::new();
    es.extend_from_slice(&0u16.to_be_bytes()); // ES_ID
    es.push(0);
    write_descriptor(&mut es, 0x04, &decoder_config);
    write_descriptor(&mut es, 0x06, &[0x02]); // SLConfig: predefined MP4

    write_full_box(out, b"esds", 0, 0, |b| write_descriptor(b, 0x03, &es));
}

fn write_descriptor(out: &mut Vec<u8>, tag: u8, body: &[u8]) {
    out.push(tag);
    let len = body.len();
    let mut groups = Vec::with_capacity(4);
    let mut remaining = len;
    loop {
        groups.push((remaining & 0x7f) as u8);
        remaining >>= 7;
        if remaining == 0 {
            break;
        }
    }
    for (i, group) in groups.iter().rev().enumerate() {
        let more = if i + 1 < groups.len() { 0x80 } else { 0 };
        out.push(group | more);
    }
    out.extend_from_slice(body);
}

fn write_matrix(out: &mut Vec<u8>) {
    for value in UNITY_MATRIX {
        out.extend_from_slice(&value.to_be_bytes());
    }
}

fn write_box(out: &mut Vec<u8>, kind: &[u8; 4], body: impl FnOnce(&mut Vec<u8>)) {
    let start = out.len();
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(kind);
    body(out);
    let size = (out.len() - start) as u32;
    out[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

fn write_full_box(out: &mut Vec<u8>, kind: &[u8; 4], version: u8, flags: u32, body: impl FnOnce(&mut Vec<u8>)) {
    write_box(out, kind, |b| {
        b.push(version);
        b.extend_from_slice(&flags.to_be_bytes()[1..]);
        body(b);
    });
}

fn clamp_u32(value: u64) -> u32 {
    value.min(u32::MAX as u64) as u32
}

/// Summary of an `.m4a` read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct M4aSummary {
    pub track_count: usize,
    pub timescale: u32,
    pub media_duration: u64,
    pub sample_count: u32,
    pub channel_count: u16,
}

impl M4aSummary {
    pub fn duration_secs(&self) -> f64 {
        self.media_duration as f64 / self.timescale.max(1) as f64
    }
}

/// Iterate the boxes directly contained in `data` as `(kind, body)` pairs.
pub fn child_boxes(data: &[u8]) -> impl Iterator<Item = ([u8; 4], &[u8])> {
    let mut pos = 0usize;
    std::iter::from_fn(move || {
        if pos + 8 > data.len() {
            return None;
        }
        let size32 = u32::from_be_bytes(data[pos..pos + 4].try_into().ok()?) as u64;
        let kind: [u8; 4] = data[pos + 4..pos + 8].try_into().ok()?;
        let (header, size) = match size32 {
            1 => {
                let large = u64::from_be_bytes(data.get(pos + 8..pos + 16)?.try_into().ok()?);
                (16usize, large)
            }
            0 => (8usize, (data.len() - pos) as u64),
            n => (8usize, n),
        };
        let end = pos.checked_add(usize::try_from(size).ok()?)?;
        if size < header as u64 || end > data.len() {
            return None;
        }
        let body = &data[pos + header..end];
        pos = end;
        Some((kind, body))
    })
}

fn find_child<'a>(data: &'a [u8], kind: &[u8; 4]) -> Option<&'a [u8]> {
    child_boxes(data).find(|(k, _)| k == kind).map(|(_, body)| body)
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_be_bytes(data.get(offset..offset + 4)?.try_into().ok()?))
}

/// Parse the `moov` of a finished file.
pub fn probe(file: &[u8]) -> Result<M4aSummary, String> {
    let moov = find_child(file, b"moov").ok_or("missing moov box")?;
    let traks: Vec<&[u8]> = child_boxes(moov)
        .filter(|(k, _)| k == b"trak")
        .map(|(_, body)| body)
        .collect();
    let trak = traks.first().ok_or("no tracks")?;
    let mdia = find_child(trak, b"mdia").ok_or("missing mdia box")?;
    let mdhd = find_child(mdia, b"mdhd").ok_or("missing mdhd box")?;
    // version/flags(4) creation(4) modification(4) timescale(4) duration(4)
    let timescale = read_u32(mdhd, 12).ok_or("short mdhd")?;
    let media_duration = read_u32(mdhd, 16).ok_or("short mdhd")? as u64;
    let stbl = find_child(mdia, b"minf")
        .and_then(|minf| find_child(minf, b"stbl"))
        .ok_or("missing stbl box")?;
    let stsz = find_child(stbl, b"stsz").ok_or("missing stsz box")?;
    let sample_count = read_u32(stsz, 8).ok_or("short stsz")?;
    let stsd = find_child(stbl, b"stsd").ok_or("missing stsd box")?;
    // stsd: version/flags(4) entry_count(4), then the mp4a entry box.
    let mp4a = stsd.get(8..).and_then(|entries| find_child(entries, b"mp4a")).ok_or("missing mp4a entry")?;
    let channel_count = mp4a
        .get(16..18)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or("short mp4a entry")?;

    Ok(M4aSummary {
        track_count: traks.len(),
        timescale,
        media_duration,
        sample_count,
        channel_count,
    })
}
