//! RIFF/WAVE demuxer: the flat-chunk sibling of the MP4 tree walk.
//!
//! Same header/resync contracts, one implicit audio track. The whole
//! `data` chunk is exposed as a single sample; PCM has no framing worth
//! indexing below that.

use std::io::{Read, Seek};

use tracing::{debug, trace, warn};

use crate::cursor::BitCursor;
use crate::error::DemuxError;
use crate::fourcc::{fourcc, fourcc_string};
use crate::registry::{
    AudioInfo, CancelToken, Codec, ContainerKind, MediaRegistry, SampleEntry, SampleKind,
    TrackIndex, TrackKind,
};
use crate::resync::resync_to;
use crate::riff::{parse_chunk_header, parse_list_header, RiffChunk, FCC_RIFF, FCC_WAVE};

const FCC_FMT: u32 = fourcc(b"fmt ");
const FCC_FACT: u32 = fourcc(b"fact");
const FCC_DATA: u32 = fourcc(b"data");
const FCC_CUE: u32 = fourcc(b"cue ");

// Registered wave format tags.
const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_ADPCM: u16 = 0x0002;
const WAVE_FORMAT_ALAW: u16 = 0x0006;
const WAVE_FORMAT_MULAW: u16 = 0x0007;
const WAVE_FORMAT_DTS_MS: u16 = 0x0008;
const WAVE_FORMAT_MP1: u16 = 0x0050;
const WAVE_FORMAT_MP3: u16 = 0x0055;
const WAVE_FORMAT_AAC: u16 = 0x00FF;
const WAVE_FORMAT_WMA1: u16 = 0x0160;
const WAVE_FORMAT_WMA2: u16 = 0x0161;
const WAVE_FORMAT_WMAP: u16 = 0x0162;
const WAVE_FORMAT_WMAL: u16 = 0x0163;
const WAVE_FORMAT_AC3: u16 = 0x2000;
const WAVE_FORMAT_DTS: u16 = 0x2001;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

#[derive(Debug, Default)]
struct WaveFmt {
    format_tag: u16,
    channels: u16,
    samples_per_sec: u32,
    avg_bytes_per_sec: u32,
    block_align: u16,
    bits_per_sample: u16,
    valid_bits_per_sample: u16,
    channel_mask: u32,
    sub_format: [u8; 16],
}

#[derive(Debug, Default)]
struct Wave {
    fmt: WaveFmt,
    /// Per-sample length from the fact chunk, when present.
    fact_sample_length: u32,
    data_offset: u64,
    data_size: u32,
}

fn codec_for(format_tag: u16) -> Codec {
    match format_tag {
        WAVE_FORMAT_PCM | WAVE_FORMAT_EXTENSIBLE => Codec::Lpcm,
        WAVE_FORMAT_ADPCM => Codec::AdPcm,
        WAVE_FORMAT_ALAW | WAVE_FORMAT_MULAW => Codec::LogPcm,
        WAVE_FORMAT_MP1 => Codec::MpegL1,
        WAVE_FORMAT_MP3 => Codec::MpegL3,
        WAVE_FORMAT_AAC => Codec::Aac,
        WAVE_FORMAT_AC3 => Codec::Ac3,
        WAVE_FORMAT_DTS | WAVE_FORMAT_DTS_MS => Codec::Dts,
        WAVE_FORMAT_WMA1 | WAVE_FORMAT_WMA2 | WAVE_FORMAT_WMAP | WAVE_FORMAT_WMAL => Codec::Wma,
        other => Codec::Unknown(other as u32),
    }
}

/// Parse a whole RIFF/WAVE file into a single-track registry.
pub fn parse<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    cancel: &CancelToken,
) -> Result<MediaRegistry, DemuxError> {
    let riff = parse_list_header(cursor)?;
    if riff.dw_list != FCC_RIFF || riff.dw_fourcc != FCC_WAVE {
        return Err(DemuxError::MalformedHeader("not a RIFF/WAVE file"));
    }

    let mut wave = Wave::default();
    let limit = riff.offset_end.min(cursor.total_size());

    while !cancel.is_cancelled() && cursor.current_byte_offset() + 8 <= limit {
        let chunk = parse_chunk_header(cursor)?;
        match chunk.dw_fourcc {
            FCC_FMT => parse_fmt(cursor, &chunk, &mut wave)?,
            FCC_FACT => parse_fact(cursor, &chunk, &mut wave)?,
            FCC_DATA => parse_data(cursor, &chunk, &mut wave)?,
            FCC_CUE => {
                trace!(size = chunk.dw_size, "cue chunk");
            }
            other => {
                debug!(tag = %fourcc_string(other), "skipping chunk");
            }
        }
        resync_to(cursor, Some(riff.offset_end), chunk.offset_end)?;
    }

    build_registry(&wave)
}

fn parse_fmt<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    chunk: &RiffChunk,
    wave: &mut Wave,
) -> Result<(), DemuxError> {
    if chunk.dw_size < 16 {
        warn!(size = chunk.dw_size, "fmt chunk too short");
        return Ok(());
    }

    wave.fmt.format_tag = cursor.read_u16_le()?;
    wave.fmt.channels = cursor.read_u16_le()?;
    wave.fmt.samples_per_sec = cursor.read_u32_le()?;
    wave.fmt.avg_bytes_per_sec = cursor.read_u32_le()?;
    wave.fmt.block_align = cursor.read_u16_le()?;
    wave.fmt.bits_per_sample = cursor.read_u16_le()?;

    if chunk.dw_size >= 18 {
        let cb_size = cursor.read_u16_le()?;
        match wave.fmt.format_tag {
            WAVE_FORMAT_EXTENSIBLE if cb_size >= 22 => {
                wave.fmt.valid_bits_per_sample = cursor.read_u16_le()?;
                wave.fmt.channel_mask = cursor.read_u32_le()?;
                cursor.read_bytes(&mut wave.fmt.sub_format)?;
            }
            WAVE_FORMAT_MP1 if cb_size >= 22 => {
                let layer = cursor.read_u16_le()?;
                let bitrate = cursor.read_u32_le()?;
                let _mode = cursor.read_u16_le()?;
                let _mode_ext = cursor.read_u16_le()?;
                let _emphasis = cursor.read_u16_le()?;
                let _flags = cursor.read_u16_le()?;
                let _pts_low = cursor.read_u32_le()?;
                let _pts_high = cursor.read_u32_le()?;
                trace!(layer, bitrate, "mpeg audio extension");
            }
            WAVE_FORMAT_MP3 if cb_size >= 12 => {
                let _id = cursor.read_u16_le()?;
                let _flags = cursor.read_u32_le()?;
                let block_size = cursor.read_u16_le()?;
                let _frames_per_block = cursor.read_u16_le()?;
                let _codec_delay = cursor.read_u16_le()?;
                trace!(block_size, "mp3 extension");
            }
            _ => {
                // Extension bytes we do not model; the resync after the
                // chunk eats them.
            }
        }
    }

    trace!(
        format_tag = wave.fmt.format_tag,
        channels = wave.fmt.channels,
        rate = wave.fmt.samples_per_sec,
        bits = wave.fmt.bits_per_sample,
        "fmt"
    );
    Ok(())
}

fn parse_fact<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    chunk: &RiffChunk,
    wave: &mut Wave,
) -> Result<(), DemuxError> {
    if chunk.dw_size < 4 {
        warn!(size = chunk.dw_size, "fact chunk too short");
        return Ok(());
    }
    wave.fact_sample_length = cursor.read_u32_le()?;
    trace!(sample_length = wave.fact_sample_length, "fact");
    Ok(())
}

fn parse_data<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    chunk: &RiffChunk,
    wave: &mut Wave,
) -> Result<(), DemuxError> {
    wave.data_offset = cursor.current_byte_offset();
    wave.data_size = chunk.dw_size;
    trace!(offset = wave.data_offset, size = wave.data_size, "data");
    Ok(())
}

fn build_registry(wave: &Wave) -> Result<MediaRegistry, DemuxError> {
    if wave.data_size == 0 {
        return Err(DemuxError::NoTracksProduced);
    }

    let fmt = &wave.fmt;

    // Fact-chunk sample count is authoritative when present; otherwise
    // fall back to the byte rate.
    let duration_ns: i64 = if wave.fact_sample_length > 0 && fmt.samples_per_sec > 0 {
        ((wave.fact_sample_length as i128 * 1_000_000_000) / fmt.samples_per_sec as i128) as i64
    } else if fmt.avg_bytes_per_sec > 0 {
        ((wave.data_size as i128 * 1_000_000_000) / fmt.avg_bytes_per_sec as i128) as i64
    } else {
        0
    };

    let track = TrackIndex {
        id: 0,
        kind: TrackKind::Audio,
        codec: codec_for(fmt.format_tag),
        duration_ns,
        stream_size: wave.data_size as u64,
        bitrate_avg: fmt
            .samples_per_sec
            .saturating_mul(fmt.bits_per_sample as u32)
            .saturating_mul(fmt.channels as u32),
        audio: Some(AudioInfo {
            channel_count: fmt.channels,
            sample_rate: fmt.samples_per_sec,
            bits_per_sample: fmt.bits_per_sample,
        }),
        samples: vec![SampleEntry {
            kind: SampleKind::Sample,
            byte_offset: wave.data_offset,
            byte_size: wave.data_size,
            dts_ns: 0,
            pts_ns: 0,
        }],
        ..Default::default()
    };

    Ok(MediaRegistry {
        container: ContainerKind::Wave,
        duration_ns,
        creation_time_ns: 0,
        modification_time_ns: 0,
        tracks: vec![track],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn pcm_wave() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&44u32.to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // PCM
        out.extend_from_slice(&2u16.to_le_bytes()); // channels
        out.extend_from_slice(&44100u32.to_le_bytes());
        out.extend_from_slice(&176400u32.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes()); // block align
        out.extend_from_slice(&16u16.to_le_bytes()); // bits
        out.extend_from_slice(b"data");
        out.extend_from_slice(&8u32.to_le_bytes());
        out.extend_from_slice(&[0u8; 8]);
        out
    }

    #[test]
    fn indexes_a_pcm_file_as_one_sample() {
        let mut cursor = BitCursor::new(Cursor::new(pcm_wave())).expect("cursor");
        let registry = parse(&mut cursor, &CancelToken::new()).expect("registry");

        assert_eq!(registry.container, ContainerKind::Wave);
        assert_eq!(registry.tracks.len(), 1);
        let track = &registry.tracks[0];
        assert_eq!(track.kind, TrackKind::Audio);
        assert_eq!(track.codec, Codec::Lpcm);
        assert_eq!(track.samples.len(), 1);
        assert_eq!(track.samples[0].byte_offset, 44);
        assert_eq!(track.samples[0].byte_size, 8);
        assert_eq!(track.stream_size, 8);
        let audio = track.audio.expect("audio info");
        assert_eq!(audio.channel_count, 2);
        assert_eq!(audio.sample_rate, 44100);
    }

    #[test]
    fn fact_chunk_drives_the_duration() {
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&50u32.to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&0x55u16.to_le_bytes()); // MP3
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&48000u32.to_le_bytes());
        out.extend_from_slice(&16000u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(b"fact");
        out.extend_from_slice(&4u32.to_le_bytes());
        out.extend_from_slice(&96000u32.to_le_bytes()); // two seconds
        out.extend_from_slice(b"data");
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&[0u8; 2]);

        let mut cursor = BitCursor::new(Cursor::new(out)).expect("cursor");
        let registry = parse(&mut cursor, &CancelToken::new()).expect("registry");
        assert_eq!(registry.tracks[0].codec, Codec::MpegL3);
        assert_eq!(registry.duration_ns, 2_000_000_000);
    }

    #[test]
    fn a_file_without_data_yields_no_tracks() {
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&4u32.to_le_bytes());
        out.extend_from_slice(b"WAVE");

        let mut cursor = BitCursor::new(Cursor::new(out)).expect("cursor");
        assert!(matches!(
            parse(&mut cursor, &CancelToken::new()),
            Err(DemuxError::NoTracksProduced)
        ));
    }
}
