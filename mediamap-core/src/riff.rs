//! RIFF list/chunk headers, shared by the WAVE demuxer.
//!
//! RIFF is little-endian native: fourccs are matched on their on-disk
//! byte order and sizes go through the cursor's byte-order-flip helpers.
//! Chunks are padded to even sizes; the declared end offset includes the
//! pad byte so resynchronization lands on the next chunk.

use std::io::{Read, Seek};

use crate::cursor::BitCursor;
use crate::error::DemuxError;
use crate::fourcc::fourcc;

pub const FCC_RIFF: u32 = fourcc(b"RIFF");
pub const FCC_LIST: u32 = fourcc(b"LIST");
pub const FCC_WAVE: u32 = fourcc(b"WAVE");

/// A RIFF list: `RIFF`/`LIST` tag, little-endian size, form type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiffList {
    pub offset_start: u64,
    pub dw_list: u32,
    pub dw_size: u32,
    pub dw_fourcc: u32,
    pub offset_end: u64,
}

/// A plain chunk: fourcc plus little-endian content size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiffChunk {
    pub offset_start: u64,
    pub dw_fourcc: u32,
    pub dw_size: u32,
    pub offset_end: u64,
}

pub fn parse_list_header<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
) -> Result<RiffList, DemuxError> {
    let offset_start = cursor.current_byte_offset();
    if cursor.total_size().saturating_sub(offset_start) < 12 {
        return Err(DemuxError::MalformedHeader("truncated list header"));
    }

    let dw_list = cursor.read_u32()?;
    let dw_size = cursor.read_u32_le()?;
    let dw_fourcc = cursor.read_u32()?;

    Ok(RiffList {
        offset_start,
        dw_list,
        dw_size,
        dw_fourcc,
        // The size covers everything after the size field itself.
        offset_end: offset_start.saturating_add(8).saturating_add(dw_size as u64),
    })
}

pub fn parse_chunk_header<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
) -> Result<RiffChunk, DemuxError> {
    let offset_start = cursor.current_byte_offset();
    if cursor.total_size().saturating_sub(offset_start) < 8 {
        return Err(DemuxError::MalformedHeader("truncated chunk header"));
    }

    let dw_fourcc = cursor.read_u32()?;
    let dw_size = cursor.read_u32_le()?;
    // Odd-sized chunks carry one pad byte that belongs to the chunk.
    let padded = dw_size as u64 + (dw_size as u64 & 1);

    Ok(RiffChunk {
        offset_start,
        dw_fourcc,
        dw_size,
        offset_end: offset_start.saturating_add(8).saturating_add(padded),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn cursor(data: &[u8]) -> BitCursor<Cursor<Vec<u8>>> {
        BitCursor::new(Cursor::new(data.to_vec())).expect("cursor")
    }

    #[test]
    fn parses_riff_wave_list() {
        let mut data = b"RIFF\x24\x00\x00\x00WAVE".to_vec();
        data.resize(44, 0);
        let mut c = cursor(&data);
        let list = parse_list_header(&mut c).expect("list");
        assert_eq!(list.dw_list, FCC_RIFF);
        assert_eq!(list.dw_fourcc, FCC_WAVE);
        assert_eq!(list.dw_size, 0x24);
        assert_eq!(list.offset_end, 44);
    }

    #[test]
    fn chunk_sizes_are_little_endian() {
        let mut data = b"fmt \x10\x00\x00\x00".to_vec();
        data.resize(24, 0);
        let mut c = cursor(&data);
        let chunk = parse_chunk_header(&mut c).expect("chunk");
        assert_eq!(chunk.dw_fourcc, fourcc(b"fmt "));
        assert_eq!(chunk.dw_size, 16);
        assert_eq!(chunk.offset_end, 24);
    }

    #[test]
    fn odd_chunks_include_their_pad_byte() {
        let mut data = b"data\x05\x00\x00\x00".to_vec();
        data.resize(14, 0);
        let mut c = cursor(&data);
        let chunk = parse_chunk_header(&mut c).expect("chunk");
        assert_eq!(chunk.dw_size, 5);
        assert_eq!(chunk.offset_end, 14);
    }

    #[test]
    fn rejects_truncated_chunk_header() {
        let mut c = cursor(b"dat");
        assert!(matches!(
            parse_chunk_header(&mut c),
            Err(DemuxError::MalformedHeader(_))
        ));
    }
}
