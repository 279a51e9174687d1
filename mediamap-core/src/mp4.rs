//! ISO Base Media (MP4/MOV) demuxer.
//!
//! Recursive descent over the box tree: every level reads a header,
//! dispatches on the box type, then resynchronizes to the header's
//! declared end before touching the next sibling. Unknown boxes are never
//! an error; they keep their header and lose their content.

pub mod header;
pub mod indexer;
pub mod stbl;
pub mod stsd;
pub mod track;

use std::collections::HashMap;
use std::io::{Read, Seek};

use once_cell::sync::Lazy;
use tracing::{debug, trace, warn};

use crate::cursor::BitCursor;
use crate::error::DemuxError;
use crate::fourcc::{fourcc, fourcc_string};
use crate::mp4::header::{parse_box_header, read_fullbox, BoxHeader};
use crate::mp4::track::Mp4Track;
use crate::registry::{CancelToken, ContainerKind, MediaRegistry, TrackKind};
use crate::resync::resync_to;

// ============================================================================
// Box types
// ============================================================================

pub(crate) const BOX_FTYP: u32 = fourcc(b"ftyp");
pub(crate) const BOX_PDIN: u32 = fourcc(b"pdin");
pub(crate) const BOX_MOOV: u32 = fourcc(b"moov");
pub(crate) const BOX_MOOF: u32 = fourcc(b"moof");
pub(crate) const BOX_MVHD: u32 = fourcc(b"mvhd");
pub(crate) const BOX_IODS: u32 = fourcc(b"iods");
pub(crate) const BOX_TRAK: u32 = fourcc(b"trak");
pub(crate) const BOX_TKHD: u32 = fourcc(b"tkhd");
pub(crate) const BOX_EDTS: u32 = fourcc(b"edts");
pub(crate) const BOX_ELST: u32 = fourcc(b"elst");
pub(crate) const BOX_MDIA: u32 = fourcc(b"mdia");
pub(crate) const BOX_MDHD: u32 = fourcc(b"mdhd");
pub(crate) const BOX_HDLR: u32 = fourcc(b"hdlr");
pub(crate) const BOX_MINF: u32 = fourcc(b"minf");
pub(crate) const BOX_DINF: u32 = fourcc(b"dinf");
pub(crate) const BOX_STBL: u32 = fourcc(b"stbl");
pub(crate) const BOX_STSD: u32 = fourcc(b"stsd");
pub(crate) const BOX_STTS: u32 = fourcc(b"stts");
pub(crate) const BOX_CTTS: u32 = fourcc(b"ctts");
pub(crate) const BOX_STSS: u32 = fourcc(b"stss");
pub(crate) const BOX_STSC: u32 = fourcc(b"stsc");
pub(crate) const BOX_STSZ: u32 = fourcc(b"stsz");
pub(crate) const BOX_STZ2: u32 = fourcc(b"stz2");
pub(crate) const BOX_STCO: u32 = fourcc(b"stco");
pub(crate) const BOX_CO64: u32 = fourcc(b"co64");
pub(crate) const BOX_MDAT: u32 = fourcc(b"mdat");
pub(crate) const BOX_FREE: u32 = fourcc(b"free");
pub(crate) const BOX_SIDX: u32 = fourcc(b"sidx");
pub(crate) const BOX_UDTA: u32 = fourcc(b"udta");
pub(crate) const BOX_AVCC: u32 = fourcc(b"avcC");
pub(crate) const BOX_HVCC: u32 = fourcc(b"hvcC");
pub(crate) const BOX_BTRT: u32 = fourcc(b"btrt");
pub(crate) const BOX_CLAP: u32 = fourcc(b"clap");
pub(crate) const BOX_COLR: u32 = fourcc(b"colr");
pub(crate) const BOX_FIEL: u32 = fourcc(b"fiel");
pub(crate) const BOX_GAMA: u32 = fourcc(b"gama");
pub(crate) const BOX_PASP: u32 = fourcc(b"pasp");

// Handler types
const HANDLER_VIDE: u32 = fourcc(b"vide");
const HANDLER_SOUN: u32 = fourcc(b"soun");
const HANDLER_TEXT: u32 = fourcc(b"text");
const HANDLER_SUBT: u32 = fourcc(b"subt");
const HANDLER_SBTL: u32 = fourcc(b"sbtl");
const HANDLER_TMCD: u32 = fourcc(b"tmcd");
const HANDLER_HINT: u32 = fourcc(b"hint");
const HANDLER_META: u32 = fourcc(b"meta");

const MAX_COMPATIBLE_BRANDS: u64 = 64;
const MAX_HANDLER_NAME: u64 = 512;

/// Typed dispatch over known box types. Anything not in the table takes
/// the skip path with its header preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BoxKind {
    Ftyp,
    Pdin,
    Moov,
    Moof,
    Mvhd,
    Iods,
    Trak,
    Tkhd,
    Edts,
    Elst,
    Mdia,
    Mdhd,
    Hdlr,
    Minf,
    Dinf,
    Stbl,
    Stsd,
    Stts,
    Ctts,
    Stss,
    Stsc,
    Stsz,
    Stz2,
    Stco,
    Co64,
    Mdat,
    Free,
    Sidx,
    Udta,
    Avcc,
    Hvcc,
    Btrt,
    Clap,
    Colr,
    Fiel,
    Gama,
    Pasp,
    Unrecognized,
}

static BOX_KINDS: Lazy<HashMap<u32, BoxKind>> = Lazy::new(|| {
    HashMap::from([
        (BOX_FTYP, BoxKind::Ftyp),
        (BOX_PDIN, BoxKind::Pdin),
        (BOX_MOOV, BoxKind::Moov),
        (BOX_MOOF, BoxKind::Moof),
        (BOX_MVHD, BoxKind::Mvhd),
        (BOX_IODS, BoxKind::Iods),
        (BOX_TRAK, BoxKind::Trak),
        (BOX_TKHD, BoxKind::Tkhd),
        (BOX_EDTS, BoxKind::Edts),
        (BOX_ELST, BoxKind::Elst),
        (BOX_MDIA, BoxKind::Mdia),
        (BOX_MDHD, BoxKind::Mdhd),
        (BOX_HDLR, BoxKind::Hdlr),
        (BOX_MINF, BoxKind::Minf),
        (BOX_DINF, BoxKind::Dinf),
        (BOX_STBL, BoxKind::Stbl),
        (BOX_STSD, BoxKind::Stsd),
        (BOX_STTS, BoxKind::Stts),
        (BOX_CTTS, BoxKind::Ctts),
        (BOX_STSS, BoxKind::Stss),
        (BOX_STSC, BoxKind::Stsc),
        (BOX_STSZ, BoxKind::Stsz),
        (BOX_STZ2, BoxKind::Stz2),
        (BOX_STCO, BoxKind::Stco),
        (BOX_CO64, BoxKind::Co64),
        (BOX_MDAT, BoxKind::Mdat),
        (BOX_FREE, BoxKind::Free),
        (BOX_SIDX, BoxKind::Sidx),
        (BOX_UDTA, BoxKind::Udta),
        (BOX_AVCC, BoxKind::Avcc),
        (BOX_HVCC, BoxKind::Hvcc),
        (BOX_BTRT, BoxKind::Btrt),
        (BOX_CLAP, BoxKind::Clap),
        (BOX_COLR, BoxKind::Colr),
        (BOX_FIEL, BoxKind::Fiel),
        (BOX_GAMA, BoxKind::Gama),
        (BOX_PASP, BoxKind::Pasp),
    ])
});

pub(crate) fn box_kind(tag: u32) -> BoxKind {
    BOX_KINDS.get(&tag).copied().unwrap_or(BoxKind::Unrecognized)
}

// ============================================================================
// File-level accumulator
// ============================================================================

#[derive(Debug, Default)]
struct Mp4Meta {
    major_brand: u32,
    creation_time: u64,
    modification_time: u64,
    timescale: u32,
    duration: u64,
    next_track_id: u32,
}

// ============================================================================
// Tree walk
// ============================================================================

/// Parse a whole MP4-family file into a registry of indexed tracks.
pub fn parse<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    cancel: &CancelToken,
) -> Result<MediaRegistry, DemuxError> {
    let mut meta = Mp4Meta::default();
    let mut tracks: Vec<Mp4Track> = Vec::new();
    let mut failed_tracks: Vec<u32> = Vec::new();

    while !cancel.is_cancelled() && cursor.current_byte_offset() < cursor.total_size() {
        let mut box_header = parse_box_header(cursor)?;
        match box_kind(box_header.box_type) {
            BoxKind::Ftyp => parse_ftyp(cursor, &box_header, &mut meta)?,
            BoxKind::Pdin => parse_pdin(cursor, &mut box_header)?,
            BoxKind::Moov => parse_moov(
                cursor,
                &box_header,
                &mut meta,
                &mut tracks,
                &mut failed_tracks,
                cancel,
            )?,
            BoxKind::Mdat => {
                // Sample payloads; the index points into this box, the
                // parser itself never reads it.
                trace!(
                    offset = box_header.offset_start,
                    size = box_header.size,
                    "mdat"
                );
            }
            _ => skip_box(&box_header),
        }
        resync_to(cursor, None, box_header.offset_end)?;
    }

    build_registry(&meta, &tracks, &failed_tracks)
}

fn skip_box(box_header: &BoxHeader) {
    debug!(
        tag = %fourcc_string(box_header.box_type),
        offset = box_header.offset_start,
        size = box_header.size,
        "skipping box"
    );
}

fn parse_ftyp<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    box_header: &BoxHeader,
    meta: &mut Mp4Meta,
) -> Result<(), DemuxError> {
    meta.major_brand = cursor.read_u32()?;
    let minor_version = cursor.read_u32()?;

    let brand_count = box_header.size.saturating_sub(16) / 4;
    if brand_count > MAX_COMPATIBLE_BRANDS {
        return Err(DemuxError::ResourceExhausted(brand_count));
    }
    let mut compatible_brands = Vec::with_capacity(brand_count as usize);
    for _ in 0..brand_count {
        compatible_brands.push(cursor.read_u32()?);
    }

    trace!(
        major = %fourcc_string(meta.major_brand),
        minor_version,
        brands = compatible_brands.len(),
        "ftyp"
    );
    Ok(())
}

fn parse_pdin<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    box_header: &mut BoxHeader,
) -> Result<(), DemuxError> {
    read_fullbox(cursor, box_header)?;

    let pairs = box_header
        .offset_end
        .saturating_sub(cursor.current_byte_offset())
        / 8;
    for _ in 0..pairs {
        let rate = cursor.read_u32()?;
        let initial_delay = cursor.read_u32()?;
        trace!(rate, initial_delay, "pdin pair");
    }
    Ok(())
}

fn parse_moov<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    moov: &BoxHeader,
    meta: &mut Mp4Meta,
    tracks: &mut Vec<Mp4Track>,
    failed_tracks: &mut Vec<u32>,
    cancel: &CancelToken,
) -> Result<(), DemuxError> {
    while !cancel.is_cancelled() && cursor.current_byte_offset() < moov.offset_end {
        let mut box_header = parse_box_header(cursor)?;
        match box_kind(box_header.box_type) {
            BoxKind::Mvhd => parse_mvhd(cursor, &mut box_header, meta)?,
            BoxKind::Iods => read_fullbox(cursor, &mut box_header)?,
            BoxKind::Trak => {
                let handle = tracks.len() as u32;
                let mut track = Mp4Track::new(handle);
                match parse_trak(cursor, &box_header, &mut track, cancel) {
                    Ok(()) => tracks.push(track),
                    // A table too large to build loses the track, not
                    // the file.
                    Err(DemuxError::ResourceExhausted(entries)) => {
                        warn!(handle, entries, "dropping track with oversized table");
                        failed_tracks.push(handle);
                    }
                    Err(other) => return Err(other),
                }
            }
            _ => skip_box(&box_header),
        }
        resync_to(cursor, Some(moov.offset_end), box_header.offset_end)?;
    }
    Ok(())
}

fn parse_mvhd<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    box_header: &mut BoxHeader,
    meta: &mut Mp4Meta,
) -> Result<(), DemuxError> {
    read_fullbox(cursor, box_header)?;

    match box_header.version {
        1 => {
            meta.creation_time = cursor.read_u64()?;
            meta.modification_time = cursor.read_u64()?;
            meta.timescale = cursor.read_u32()?;
            meta.duration = cursor.read_u64()?;
        }
        0 => {
            meta.creation_time = cursor.read_u32()? as u64;
            meta.modification_time = cursor.read_u32()? as u64;
            meta.timescale = cursor.read_u32()?;
            meta.duration = cursor.read_u32()? as u64;
        }
        version => {
            return Err(DemuxError::UnsupportedVariant {
                kind: "movie header",
                version,
            })
        }
    }

    let _rate = cursor.read_u32()?;
    let _volume = cursor.read_u16()?;
    cursor.skip_bytes(2)?; // reserved
    cursor.skip_bytes(8)?; // reserved
    cursor.skip_bytes(36)?; // matrix
    cursor.skip_bytes(24)?; // pre_defined
    meta.next_track_id = cursor.read_u32()?;

    trace!(
        timescale = meta.timescale,
        duration = meta.duration,
        next_track_id = meta.next_track_id,
        "mvhd"
    );
    Ok(())
}

fn parse_trak<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    trak: &BoxHeader,
    track: &mut Mp4Track,
    cancel: &CancelToken,
) -> Result<(), DemuxError> {
    while !cancel.is_cancelled() && cursor.current_byte_offset() < trak.offset_end {
        let mut box_header = parse_box_header(cursor)?;
        match box_kind(box_header.box_type) {
            BoxKind::Tkhd => parse_tkhd(cursor, &mut box_header, track)?,
            BoxKind::Edts => parse_edts(cursor, &box_header, track)?,
            BoxKind::Mdia => parse_mdia(cursor, &box_header, track)?,
            _ => skip_box(&box_header),
        }
        resync_to(cursor, Some(trak.offset_end), box_header.offset_end)?;
    }
    Ok(())
}

fn parse_tkhd<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    box_header: &mut BoxHeader,
    track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    read_fullbox(cursor, box_header)?;

    match box_header.version {
        1 => {
            track.creation_time = cursor.read_u64()?;
            track.modification_time = cursor.read_u64()?;
            track.id = cursor.read_u32()?;
            cursor.skip_bytes(4)?; // reserved
            track.duration = cursor.read_u64()?;
        }
        0 => {
            track.creation_time = cursor.read_u32()? as u64;
            track.modification_time = cursor.read_u32()? as u64;
            track.id = cursor.read_u32()?;
            cursor.skip_bytes(4)?; // reserved
            track.duration = cursor.read_u32()? as u64;
        }
        version => {
            return Err(DemuxError::UnsupportedVariant {
                kind: "track header",
                version,
            })
        }
    }

    cursor.skip_bytes(8)?; // reserved
    let _layer = cursor.read_u16()?;
    let _alternate_group = cursor.read_u16()?;
    let _volume = cursor.read_u16()?;
    cursor.skip_bytes(2)?; // reserved
    cursor.skip_bytes(36)?; // matrix
    let _width = cursor.read_u32()?; // 16.16, presentation size only
    let _height = cursor.read_u32()?;

    trace!(id = track.id, duration = track.duration, "tkhd");
    Ok(())
}

fn parse_edts<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    edts: &BoxHeader,
    track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    while cursor.current_byte_offset() < edts.offset_end {
        let mut box_header = parse_box_header(cursor)?;
        match box_kind(box_header.box_type) {
            BoxKind::Elst => parse_elst(cursor, &mut box_header, track)?,
            _ => skip_box(&box_header),
        }
        resync_to(cursor, Some(edts.offset_end), box_header.offset_end)?;
    }
    Ok(())
}

fn parse_elst<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    box_header: &mut BoxHeader,
    track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    read_fullbox(cursor, box_header)?;

    let entries = cursor.read_u32()?;
    for i in 0..entries {
        let (segment_duration, media_time) = if box_header.version == 1 {
            (cursor.read_u64()?, cursor.read_u64()? as i64)
        } else {
            (cursor.read_u32()? as u64, cursor.read_u32()? as i32 as i64)
        };
        let _media_rate = cursor.read_u32()?;

        // The first media time is all the indexer needs (frame-rate
        // fallback for progressive files).
        if i == 0 {
            track.media_time = media_time;
        }
        trace!(segment_duration, media_time, "elst entry");
    }
    Ok(())
}

fn parse_mdia<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    mdia: &BoxHeader,
    track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    while cursor.current_byte_offset() < mdia.offset_end {
        let mut box_header = parse_box_header(cursor)?;
        match box_kind(box_header.box_type) {
            BoxKind::Mdhd => parse_mdhd(cursor, &mut box_header, track)?,
            BoxKind::Hdlr => parse_hdlr(cursor, &mut box_header, track)?,
            BoxKind::Minf => parse_minf(cursor, &box_header, track)?,
            _ => skip_box(&box_header),
        }
        resync_to(cursor, Some(mdia.offset_end), box_header.offset_end)?;
    }
    Ok(())
}

fn parse_mdhd<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    box_header: &mut BoxHeader,
    track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    read_fullbox(cursor, box_header)?;

    match box_header.version {
        1 => {
            track.creation_time = cursor.read_u64()?;
            track.modification_time = cursor.read_u64()?;
            track.timescale = cursor.read_u32()?;
            track.duration = cursor.read_u64()?;
        }
        0 => {
            track.creation_time = cursor.read_u32()? as u64;
            track.modification_time = cursor.read_u32()? as u64;
            track.timescale = cursor.read_u32()?;
            track.duration = cursor.read_u32()? as u64;
        }
        version => {
            return Err(DemuxError::UnsupportedVariant {
                kind: "media header",
                version,
            })
        }
    }

    cursor.read_bit()?; // pad
    // ISO-639-2/T language, each letter packed as (ascii - 0x60).
    let mut language = String::with_capacity(3);
    for _ in 0..3 {
        language.push((cursor.read_bits(5)? as u8 + 0x60) as char);
    }
    track.language = Some(language);
    cursor.skip_bytes(2)?; // pre_defined

    trace!(
        timescale = track.timescale,
        duration = track.duration,
        language = track.language.as_deref().unwrap_or(""),
        "mdhd"
    );
    Ok(())
}

fn parse_hdlr<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    box_header: &mut BoxHeader,
    track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    read_fullbox(cursor, box_header)?;

    let _pre_defined = cursor.read_u32()?;
    let handler_type = cursor.read_u32()?;
    track.handler = match handler_type {
        HANDLER_VIDE => TrackKind::Video,
        HANDLER_SOUN => TrackKind::Audio,
        HANDLER_TEXT | HANDLER_SUBT | HANDLER_SBTL => TrackKind::Text,
        HANDLER_TMCD => TrackKind::Timecode,
        HANDLER_HINT => TrackKind::Hint,
        HANDLER_META => TrackKind::Meta,
        _ => TrackKind::Other,
    };
    cursor.skip_bytes(12)?; // reserved

    // Trailing handler name. MOV-style files redundantly encode its
    // length in a leading byte; prefer that byte only when it agrees
    // with the remaining record size.
    let remaining = box_header
        .offset_end
        .saturating_sub(cursor.current_byte_offset());
    if remaining > 0 {
        let leading = cursor.read_u8()? as u64;
        let name_len = if remaining == leading + 1 {
            leading
        } else {
            cursor.rewind_bits(8)?;
            remaining
        };
        if name_len > MAX_HANDLER_NAME {
            return Err(DemuxError::ResourceExhausted(name_len));
        }
        let mut raw = vec![0u8; name_len as usize];
        cursor.read_bytes(&mut raw)?;
        let name = String::from_utf8_lossy(&raw).trim_matches('\0').to_string();
        if !name.is_empty() {
            track.name = Some(name);
        }
    }

    trace!(
        handler = %fourcc_string(handler_type),
        name = track.name.as_deref().unwrap_or(""),
        "hdlr"
    );
    Ok(())
}

fn parse_minf<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    minf: &BoxHeader,
    track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    while cursor.current_byte_offset() < minf.offset_end {
        let box_header = parse_box_header(cursor)?;
        match box_kind(box_header.box_type) {
            BoxKind::Stbl => parse_stbl(cursor, &box_header, track)?,
            _ => skip_box(&box_header),
        }
        resync_to(cursor, Some(minf.offset_end), box_header.offset_end)?;
    }
    Ok(())
}

fn parse_stbl<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    stbl_header: &BoxHeader,
    track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    while cursor.current_byte_offset() < stbl_header.offset_end {
        let mut box_header = parse_box_header(cursor)?;
        match box_kind(box_header.box_type) {
            BoxKind::Stsd => stsd::parse_stsd(cursor, &mut box_header, track)?,
            BoxKind::Stts => stbl::parse_stts(cursor, &mut box_header, track)?,
            BoxKind::Ctts => stbl::parse_ctts(cursor, &mut box_header, track)?,
            BoxKind::Stss => stbl::parse_stss(cursor, &mut box_header, track)?,
            BoxKind::Stsc => stbl::parse_stsc(cursor, &mut box_header, track)?,
            BoxKind::Stsz | BoxKind::Stz2 => stbl::parse_stsz(cursor, &mut box_header, track)?,
            BoxKind::Stco | BoxKind::Co64 => stbl::parse_stco(cursor, &mut box_header, track)?,
            _ => skip_box(&box_header),
        }
        resync_to(cursor, Some(stbl_header.offset_end), box_header.offset_end)?;
    }
    Ok(())
}

// ============================================================================
// Registry assembly
// ============================================================================

fn build_registry(
    meta: &Mp4Meta,
    tracks: &[Mp4Track],
    failed_tracks: &[u32],
) -> Result<MediaRegistry, DemuxError> {
    if tracks.is_empty() && failed_tracks.is_empty() {
        return Err(DemuxError::NoTracksProduced);
    }

    let mut indexed = Vec::with_capacity(tracks.len());
    for track in tracks {
        match indexer::build_index(track) {
            Ok(index) => indexed.push(index),
            Err(error) if error.is_track_local() => {
                warn!(track = track.id, %error, "track indexing failed");
            }
            Err(error) => return Err(error),
        }
    }
    if indexed.is_empty() {
        return Err(DemuxError::NoTracksProduced);
    }

    let ns = |value: u64| -> i64 {
        if meta.timescale == 0 {
            0
        } else {
            ((value as i128 * 1_000_000_000) / meta.timescale as i128) as i64
        }
    };

    Ok(MediaRegistry {
        container: ContainerKind::Mp4,
        duration_ns: ns(meta.duration),
        creation_time_ns: ns(meta.creation_time),
        modification_time_ns: ns(meta.modification_time),
        tracks: indexed,
    })
}
