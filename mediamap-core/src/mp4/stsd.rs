//! Sample description parsing: codec identification, fixed audio/video
//! fields, and the nested codec-configuration boxes.

use std::io::{Read, Seek};

use tracing::{debug, trace, warn};

use crate::cursor::BitCursor;
use crate::error::DemuxError;
use crate::fourcc::{fourcc, fourcc_string};
use crate::mp4::header::{parse_box_header, read_fullbox, BoxHeader};
use crate::mp4::track::{Mp4Track, ParameterSet};
use crate::mp4::{box_kind, BoxKind};
use crate::registry::{Codec, ColorMatrix, TrackKind};
use crate::resync::resync_to;

// Sample-entry fourccs.
const FCC_AVC1: u32 = fourcc(b"avc1");
const FCC_AVC3: u32 = fourcc(b"avc3");
const FCC_HVC1: u32 = fourcc(b"hvc1");
const FCC_HEV1: u32 = fourcc(b"hev1");
const FCC_MP4V: u32 = fourcc(b"mp4v");
const FCC_CFHD: u32 = fourcc(b"CFHD");
const FCC_VP09: u32 = fourcc(b"vp09");
const FCC_AV01: u32 = fourcc(b"av01");

const FCC_MP4A: u32 = fourcc(b"mp4a");
const FCC_AC3: u32 = fourcc(b"ac-3");
const FCC_EC3: u32 = fourcc(b"ec-3");
const FCC_AC4: u32 = fourcc(b"ac-4");
const FCC_ALAC: u32 = fourcc(b"alac");
const FCC_FLAC: u32 = fourcc(b"fLaC");
const FCC_OPUS: u32 = fourcc(b"Opus");
const FCC_MP3: u32 = fourcc(b".mp3");
const FCC_SOWT: u32 = fourcc(b"sowt");
const FCC_TWOS: u32 = fourcc(b"twos");
const FCC_LPCM: u32 = fourcc(b"lpcm");
const FCC_ULAW: u32 = fourcc(b"ulaw");
const FCC_ALAW: u32 = fourcc(b"alaw");
const FCC_IMA4: u32 = fourcc(b"ima4");

fn video_codec_for(tag: u32) -> Codec {
    match tag {
        FCC_AVC1 | FCC_AVC3 => Codec::H264,
        FCC_HVC1 | FCC_HEV1 => Codec::H265,
        FCC_MP4V => Codec::Mpeg4Asp,
        FCC_CFHD => Codec::CineForm,
        FCC_VP09 => Codec::Vp9,
        FCC_AV01 => Codec::Av1,
        other => Codec::Unknown(other),
    }
}

fn audio_codec_for(tag: u32) -> Codec {
    match tag {
        FCC_MP4A => Codec::Aac,
        FCC_AC3 => Codec::Ac3,
        FCC_EC3 => Codec::Eac3,
        FCC_AC4 => Codec::Ac4,
        FCC_ALAC => Codec::Alac,
        FCC_FLAC => Codec::Flac,
        FCC_OPUS => Codec::Opus,
        FCC_MP3 => Codec::MpegL3,
        FCC_SOWT | FCC_TWOS | FCC_LPCM => Codec::Lpcm,
        FCC_ULAW | FCC_ALAW => Codec::LogPcm,
        FCC_IMA4 => Codec::AdPcm,
        other => Codec::Unknown(other),
    }
}

/// Sample Description box: selects the codec from the nested sample
/// entry's own type tag, then reads the category-specific fixed fields
/// and any codec-configuration children. Only the first description
/// entry is indexed.
pub(crate) fn parse_stsd<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    header: &mut BoxHeader,
    track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    read_fullbox(cursor, header)?;
    let entry_count = cursor.read_u32()?;
    if entry_count > 1 {
        debug!(entry_count, "multiple sample descriptions, indexing the first");
    }
    if entry_count == 0 {
        return Ok(());
    }

    let entry = parse_box_header(cursor)?;
    track.fcc = entry.box_type;

    // SampleEntry prefix shared by every category.
    cursor.skip_bytes(6)?; // reserved
    let _data_reference_index = cursor.read_u16()?;

    match track.handler {
        TrackKind::Audio => {
            track.codec = audio_codec_for(entry.box_type);
            if matches!(track.codec, Codec::Unknown(_)) {
                warn!(entry = %fourcc_string(entry.box_type), "unknown audio sample entry");
            }

            cursor.skip_bytes(8)?; // reserved
            track.channel_count = cursor.read_u16()?;
            track.sample_size_bits = cursor.read_u16()?;
            cursor.skip_bytes(4)?; // pre_defined + reserved
            track.sample_rate_hz = cursor.read_u32()? >> 16; // 16.16 fixed

            trace!(
                channels = track.channel_count,
                bits = track.sample_size_bits,
                rate = track.sample_rate_hz,
                "audio sample entry"
            );
        }
        TrackKind::Video => {
            track.codec = video_codec_for(entry.box_type);
            if matches!(track.codec, Codec::Unknown(_)) {
                warn!(entry = %fourcc_string(entry.box_type), "unknown video sample entry");
            }

            cursor.skip_bytes(16)?; // pre_defined + reserved
            track.width = cursor.read_u16()? as u32;
            track.height = cursor.read_u16()? as u32;
            let _horizresolution = cursor.read_u32()?;
            let _vertresolution = cursor.read_u32()?;
            cursor.skip_bytes(4)?; // reserved
            let _frame_count = cursor.read_u16()?;
            track.compressor = read_compressor_name(cursor)?;
            track.color_depth = cursor.read_u16()?;
            cursor.skip_bytes(2)?; // pre_defined

            trace!(
                width = track.width,
                height = track.height,
                depth = track.color_depth,
                "video sample entry"
            );

            // Codec configuration children live inside the sample entry.
            while cursor.current_byte_offset() < entry.offset_end {
                let mut child = parse_box_header(cursor)?;
                match box_kind(child.box_type) {
                    BoxKind::Avcc => parse_avcc(cursor, &mut child, track)?,
                    BoxKind::Hvcc => parse_hvcc(cursor, &mut child, track)?,
                    BoxKind::Btrt => parse_btrt(cursor, &mut child, track)?,
                    BoxKind::Clap => parse_clap(cursor, &mut child, track)?,
                    BoxKind::Colr => parse_colr(cursor, &mut child, track)?,
                    BoxKind::Fiel => parse_fiel(cursor, &mut child, track)?,
                    BoxKind::Gama => parse_gama(cursor, &mut child, track)?,
                    BoxKind::Pasp => parse_pasp(cursor, &mut child, track)?,
                    _ => {
                        debug!(tag = %fourcc_string(child.box_type), "skipping sample entry child");
                    }
                }
                resync_to(cursor, Some(entry.offset_end), child.offset_end)?;
            }
        }
        _ => {
            // Text, timecode, hint, meta: nothing beyond the codec tag.
            track.codec = Codec::Unknown(entry.box_type);
        }
    }

    Ok(())
}

/// 31-byte Pascal-style compressor name from the visual sample entry.
fn read_compressor_name<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
) -> Result<Option<String>, DemuxError> {
    let declared = cursor.read_u8()? as usize;
    let mut raw = [0u8; 31];
    cursor.read_bytes(&mut raw)?;
    let len = declared.min(31);
    if len == 0 {
        return Ok(None);
    }
    let name = String::from_utf8_lossy(&raw[..len])
        .trim_end_matches('\0')
        .to_string();
    Ok((!name.is_empty()).then_some(name))
}

/// AVC decoder configuration: records the file position and length of
/// each sequence and picture parameter set without copying the bytes.
/// These become pseudo-samples ahead of the real ones.
fn parse_avcc<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    _header: &mut BoxHeader,
    track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    track.codec = Codec::H264;

    let _configuration_version = cursor.read_u8()?;
    let _profile_indication = cursor.read_u8()?;
    let _profile_compatibility = cursor.read_u8()?;
    let _level_indication = cursor.read_u8()?;
    cursor.read_bits(6)?; // reserved
    let _length_size_minus_one = cursor.read_bits(2)?;
    cursor.read_bits(3)?; // reserved

    let sps_count = cursor.read_bits(5)? as usize;
    track.sps = Vec::with_capacity(sps_count);
    for _ in 0..sps_count {
        let size = cursor.read_u16()? as u32;
        let offset = cursor.current_byte_offset();
        cursor.skip_bytes(size as u64)?;
        track.sps.push(ParameterSet { offset, size });
    }

    let pps_count = cursor.read_u8()? as usize;
    track.pps = Vec::with_capacity(pps_count);
    for _ in 0..pps_count {
        let size = cursor.read_u16()? as u32;
        let offset = cursor.current_byte_offset();
        cursor.skip_bytes(size as u64)?;
        track.pps.push(ParameterSet { offset, size });
    }

    trace!(
        sps = track.sps.len(),
        pps = track.pps.len(),
        "avc configuration"
    );
    Ok(())
}

/// HEVC decoder configuration. The parameter-set arrays are left in
/// place; recognizing the box is enough to pin the codec.
fn parse_hvcc<R: Read + Seek>(
    _cursor: &mut BitCursor<R>,
    _header: &mut BoxHeader,
    track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    track.codec = Codec::H265;
    Ok(())
}

fn parse_btrt<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    _header: &mut BoxHeader,
    track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    let _buffer_size_db = cursor.read_u32()?;
    track.bitrate_max = cursor.read_u32()?;
    track.bitrate_avg = cursor.read_u32()?;
    Ok(())
}

fn parse_clap<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    _header: &mut BoxHeader,
    _track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    let width_n = cursor.read_u32()?;
    let width_d = cursor.read_u32()?;
    let height_n = cursor.read_u32()?;
    let height_d = cursor.read_u32()?;
    cursor.skip_bytes(16)?; // horizontal/vertical offsets
    trace!(width_n, width_d, height_n, height_d, "clean aperture");
    Ok(())
}

const COLOUR_NCLC: u32 = fourcc(b"nclc");
const COLOUR_NCLX: u32 = fourcc(b"nclx");

fn parse_colr<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    _header: &mut BoxHeader,
    track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    let colour_type = cursor.read_u32()?;
    if colour_type == COLOUR_NCLC || colour_type == COLOUR_NCLX {
        let _primaries = cursor.read_u16()?;
        let _transfer = cursor.read_u16()?;
        let matrix = cursor.read_u16()?;
        track.color_range = cursor.read_u16()?;
        track.color_matrix = match matrix {
            1 => ColorMatrix::Bt709,
            6 => ColorMatrix::Bt601,
            7 => ColorMatrix::Smpte240m,
            _ => ColorMatrix::Unknown,
        };
    }
    // ICC profile variants (rICC/prof) carry nothing we index.
    Ok(())
}

fn parse_fiel<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    _header: &mut BoxHeader,
    _track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    let fields = cursor.read_u8()?;
    let detail = cursor.read_u8()?;
    trace!(fields, detail, "field order");
    Ok(())
}

fn parse_gama<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    _header: &mut BoxHeader,
    _track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    let gamma = cursor.read_u32()?; // 16.16 fixed
    trace!(gamma, "gamma");
    Ok(())
}

fn parse_pasp<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    _header: &mut BoxHeader,
    track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    track.par_h = cursor.read_u32()?;
    track.par_v = cursor.read_u32()?;
    Ok(())
}
