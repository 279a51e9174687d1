//! Sample-table box parsers: the per-track tables the indexer joins.
//!
//! Every box here is a full box carrying an entry count followed by a
//! fixed-shape array. Declared counts beyond `MAX_TABLE_ENTRIES` are
//! rejected outright instead of being silently truncated.

use std::io::{Read, Seek};

use tracing::trace;

use crate::cursor::BitCursor;
use crate::error::DemuxError;
use crate::mp4::header::{read_fullbox, BoxHeader};
use crate::mp4::track::{ChunkRun, Mp4Track, SampleSizes};
use crate::mp4::{BOX_CO64, BOX_STSZ};

/// Sane upper bound for any single table. Sixteen million entries is far
/// beyond real files and keeps a hostile count from allocating the world.
pub(crate) const MAX_TABLE_ENTRIES: u32 = 1 << 24;

fn checked_entry_count<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
) -> Result<u32, DemuxError> {
    let count = cursor.read_u32()?;
    if count > MAX_TABLE_ENTRIES {
        return Err(DemuxError::ResourceExhausted(count as u64));
    }
    Ok(count)
}

/// Decoding time to sample: (sample_count, sample_delta) runs.
pub(crate) fn parse_stts<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    header: &mut BoxHeader,
    track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    read_fullbox(cursor, header)?;

    let entry_count = checked_entry_count(cursor)?;
    track.stts = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        let sample_count = cursor.read_u32()?;
        let sample_delta = cursor.read_u32()?;
        track.stts.push((sample_count, sample_delta));
    }

    trace!(entries = entry_count, "stts");
    Ok(())
}

/// Composition time to sample: offsets between decode and presentation
/// time. Signed once version 1 requests it, unsigned otherwise.
pub(crate) fn parse_ctts<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    header: &mut BoxHeader,
    track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    read_fullbox(cursor, header)?;

    let entry_count = checked_entry_count(cursor)?;
    track.ctts = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        let sample_count = cursor.read_u32()?;
        let raw = cursor.read_u32()?;
        let offset = if header.version == 1 {
            raw as i32 as i64
        } else {
            raw as i64
        };
        track.ctts.push((sample_count, offset));
    }

    trace!(entries = entry_count, version = header.version, "ctts");
    Ok(())
}

/// Sync sample table: ascending 1-based numbers of random-access points.
/// An absent table means every sample is a sync point.
pub(crate) fn parse_stss<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    header: &mut BoxHeader,
    track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    read_fullbox(cursor, header)?;

    let entry_count = checked_entry_count(cursor)?;
    track.stss = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        track.stss.push(cursor.read_u32()?);
    }

    trace!(entries = entry_count, "stss");
    Ok(())
}

/// Sample to chunk: (first_chunk, samples_per_chunk, description_index)
/// runs, strictly increasing in first_chunk.
pub(crate) fn parse_stsc<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    header: &mut BoxHeader,
    track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    read_fullbox(cursor, header)?;

    let entry_count = checked_entry_count(cursor)?;
    track.stsc = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        track.stsc.push(ChunkRun {
            first_chunk: cursor.read_u32()?,
            samples_per_chunk: cursor.read_u32()?,
            description_index: cursor.read_u32()?,
        });
    }

    trace!(entries = entry_count, "stsc");
    Ok(())
}

/// Sample sizes, stsz and stz2 variants. stsz carries either one constant
/// size or a 32-bit entry per sample; stz2 packs entries into 4/8/16-bit
/// fields.
pub(crate) fn parse_stsz<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    header: &mut BoxHeader,
    track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    read_fullbox(cursor, header)?;

    let (constant_size, field_size) = if header.box_type == BOX_STSZ {
        (cursor.read_u32()?, 32u32)
    } else {
        cursor.skip_bits(24)?;
        let field_size = cursor.read_u8()? as u32;
        if !matches!(field_size, 4 | 8 | 16 | 32) {
            return Err(DemuxError::UnsupportedVariant {
                kind: "compact sample size",
                version: field_size as u8,
            });
        }
        (0, field_size)
    };

    let sample_count = checked_entry_count(cursor)?;
    track.sample_count = sample_count;

    if constant_size == 0 {
        let mut sizes = Vec::with_capacity(sample_count as usize);
        for _ in 0..sample_count {
            sizes.push(cursor.read_bits(field_size)? as u32);
        }
        track.sizes = SampleSizes::PerSample(sizes);
    } else {
        track.sizes = SampleSizes::Constant(constant_size);
    }

    trace!(samples = sample_count, constant_size, "stsz");
    Ok(())
}

/// Chunk offsets, 32-bit (stco) or 64-bit (co64) source width, always
/// normalized to 64-bit.
pub(crate) fn parse_stco<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    header: &mut BoxHeader,
    track: &mut Mp4Track,
) -> Result<(), DemuxError> {
    read_fullbox(cursor, header)?;

    let entry_count = checked_entry_count(cursor)?;
    track.chunk_offsets = Vec::with_capacity(entry_count as usize);
    if header.box_type == BOX_CO64 {
        for _ in 0..entry_count {
            track.chunk_offsets.push(cursor.read_u64()?);
        }
    } else {
        for _ in 0..entry_count {
            track.chunk_offsets.push(cursor.read_u32()? as u64);
        }
    }

    trace!(entries = entry_count, "chunk offsets");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fourcc::fourcc;
    use std::io::Cursor;

    fn cursor(data: &[u8]) -> BitCursor<Cursor<Vec<u8>>> {
        BitCursor::new(Cursor::new(data.to_vec())).expect("cursor")
    }

    fn header_of(box_type: &[u8; 4]) -> BoxHeader {
        BoxHeader {
            offset_start: 0,
            size: 0,
            box_type: fourcc(box_type),
            usertype: None,
            offset_end: 0,
            version: 0,
            flags: 0,
        }
    }

    #[test]
    fn parses_time_to_sample_runs() {
        let mut data = vec![0, 0, 0, 0]; // version + flags
        data.extend_from_slice(&2u32.to_be_bytes());
        data.extend_from_slice(&3u32.to_be_bytes());
        data.extend_from_slice(&1000u32.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&500u32.to_be_bytes());

        let mut c = cursor(&data);
        let mut track = Mp4Track::new(0);
        let mut header = header_of(b"stts");
        parse_stts(&mut c, &mut header, &mut track).expect("stts");
        assert_eq!(track.stts, vec![(3, 1000), (1, 500)]);
    }

    #[test]
    fn signed_composition_offsets_under_version_one() {
        let mut data = vec![1, 0, 0, 0]; // version 1
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&2u32.to_be_bytes());
        data.extend_from_slice(&(-200i32 as u32).to_be_bytes());

        let mut c = cursor(&data);
        let mut track = Mp4Track::new(0);
        let mut header = header_of(b"ctts");
        parse_ctts(&mut c, &mut header, &mut track).expect("ctts");
        assert_eq!(track.ctts, vec![(2, -200)]);
    }

    #[test]
    fn constant_sample_size_shortcut() {
        let mut data = vec![0, 0, 0, 0];
        data.extend_from_slice(&512u32.to_be_bytes()); // constant size
        data.extend_from_slice(&8u32.to_be_bytes()); // sample count

        let mut c = cursor(&data);
        let mut track = Mp4Track::new(0);
        let mut header = header_of(b"stsz");
        parse_stsz(&mut c, &mut header, &mut track).expect("stsz");
        assert_eq!(track.sample_count, 8);
        assert_eq!(track.sizes, SampleSizes::Constant(512));
    }

    #[test]
    fn compact_sizes_with_nibble_fields() {
        let mut data = vec![0, 0, 0, 0];
        data.extend_from_slice(&[0, 0, 0]); // reserved
        data.push(4); // field size
        data.extend_from_slice(&3u32.to_be_bytes()); // sample count
        data.push(0x12); // sizes 1, 2
        data.push(0x30); // size 3, pad

        let mut c = cursor(&data);
        let mut track = Mp4Track::new(0);
        let mut header = header_of(b"stz2");
        parse_stsz(&mut c, &mut header, &mut track).expect("stz2");
        assert_eq!(track.sizes, SampleSizes::PerSample(vec![1, 2, 3]));
    }

    #[test]
    fn wide_chunk_offsets_are_normalized() {
        let mut data = vec![0, 0, 0, 0];
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&0x0001_0000_0000u64.to_be_bytes());

        let mut c = cursor(&data);
        let mut track = Mp4Track::new(0);
        let mut header = header_of(b"co64");
        parse_stco(&mut c, &mut header, &mut track).expect("co64");
        assert_eq!(track.chunk_offsets, vec![0x0001_0000_0000]);
    }

    #[test]
    fn rejects_absurd_entry_counts() {
        let mut data = vec![0, 0, 0, 0];
        data.extend_from_slice(&u32::MAX.to_be_bytes());

        let mut c = cursor(&data);
        let mut track = Mp4Track::new(0);
        let mut header = header_of(b"stco");
        assert!(matches!(
            parse_stco(&mut c, &mut header, &mut track),
            Err(DemuxError::ResourceExhausted(_))
        ));
    }
}
