//! ISO-BMFF box header parsing.

use std::io::{Read, Seek};

use crate::cursor::BitCursor;
use crate::error::DemuxError;
use crate::fourcc::fourcc;

pub const BOX_UUID: u32 = fourcc(b"uuid");

/// The shared shape of every box: offsets computed at parse time, before
/// any resynchronization clamp. `version`/`flags` belong to "full box"
/// variants and are filled in by the content parsers that need them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub offset_start: u64,
    pub size: u64,
    pub box_type: u32,
    pub usertype: Option<[u8; 16]>,
    pub offset_end: u64,
    pub version: u8,
    pub flags: u32,
}

/// Read a box header: 32-bit size, fourcc type, optional 64-bit large
/// size, optional 16-byte extended type. A size of 0 extends the box to
/// the end of the file. Sizes inconsistent with the parent or the file
/// are NOT rejected here; the resynchronizer absorbs those.
pub fn parse_box_header<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
) -> Result<BoxHeader, DemuxError> {
    let offset_start = cursor.current_byte_offset();
    if cursor.total_size().saturating_sub(offset_start) < 8 {
        return Err(DemuxError::MalformedHeader("truncated box header"));
    }

    let raw_size = cursor.read_u32()? as u64;
    let box_type = cursor.read_u32()?;

    let size = if raw_size == 0 {
        // The box runs to the end of the file.
        cursor.total_size() - offset_start
    } else if raw_size == 1 {
        // A 64-bit size follows the box type.
        if cursor.total_size().saturating_sub(cursor.current_byte_offset()) < 8 {
            return Err(DemuxError::MalformedHeader("truncated large box size"));
        }
        cursor.read_u64()?
    } else {
        raw_size
    };

    let usertype = if box_type == BOX_UUID {
        if cursor.total_size().saturating_sub(cursor.current_byte_offset()) < 16 {
            return Err(DemuxError::MalformedHeader("truncated uuid box type"));
        }
        let mut uuid = [0u8; 16];
        cursor.read_bytes(&mut uuid)?;
        Some(uuid)
    } else {
        None
    };

    Ok(BoxHeader {
        offset_start,
        size,
        box_type,
        usertype,
        offset_end: offset_start.saturating_add(size),
        version: 0,
        flags: 0,
    })
}

/// Read the version byte and 24-bit flags a full box carries as its first
/// content bytes.
pub fn read_fullbox<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    header: &mut BoxHeader,
) -> Result<(), DemuxError> {
    header.version = cursor.read_u8()?;
    header.flags = cursor.read_bits(24)? as u32;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn cursor(data: &[u8]) -> BitCursor<Cursor<Vec<u8>>> {
        BitCursor::new(Cursor::new(data.to_vec())).expect("cursor")
    }

    #[test]
    fn parses_basic_box_header() {
        let mut c = cursor(b"\x00\x00\x00\x10ftyp\x00\x00\x00\x00\x00\x00\x00\x00");
        let header = parse_box_header(&mut c).expect("header");
        assert_eq!(header.size, 16);
        assert_eq!(header.box_type, fourcc(b"ftyp"));
        assert_eq!(header.offset_start, 0);
        assert_eq!(header.offset_end, 16);
    }

    #[test]
    fn parses_extended_box_header() {
        let mut data = b"\x00\x00\x00\x01mdat\x00\x00\x00\x00\x00\x00\x00\x20".to_vec();
        data.resize(32, 0);
        let mut c = cursor(&data);
        let header = parse_box_header(&mut c).expect("header");
        assert_eq!(header.size, 32);
        assert_eq!(header.box_type, fourcc(b"mdat"));
        assert_eq!(header.offset_end, 32);
        assert_eq!(c.current_byte_offset(), 16);
    }

    #[test]
    fn zero_size_extends_to_file_end() {
        let mut data = b"\x00\x00\x00\x00mdat".to_vec();
        data.resize(40, 0);
        let mut c = cursor(&data);
        let header = parse_box_header(&mut c).expect("header");
        assert_eq!(header.size, 40);
        assert_eq!(header.offset_end, 40);
    }

    #[test]
    fn reads_extended_type() {
        let mut data = b"\x00\x00\x00\x18uuid".to_vec();
        data.extend_from_slice(&[0xAB; 16]);
        let mut c = cursor(&data);
        let header = parse_box_header(&mut c).expect("header");
        assert_eq!(header.usertype, Some([0xAB; 16]));
        assert_eq!(c.current_byte_offset(), 24);
    }

    #[test]
    fn rejects_truncated_header() {
        let mut c = cursor(b"\x00\x00\x00\x10fty");
        assert!(matches!(
            parse_box_header(&mut c),
            Err(DemuxError::MalformedHeader(_))
        ));
    }
}
