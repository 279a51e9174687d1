//! Cursor resynchronization after a record's content has been parsed.
//!
//! Record sizes in the wild are frequently zero, truncated, or overshoot a
//! corrupt parent. After each record, the tree walk forces the cursor to
//! the record's declared end, clamped against the parent's end and the
//! file size, so the next sibling is always picked up at the right byte no
//! matter how badly the content parser under- or over-consumed.

use std::io::{Read, Seek};

use tracing::warn;

use crate::cursor::BitCursor;
use crate::error::DemuxError;

/// Move the cursor to `record_end`, clamped to `parent_end` (when the
/// parent's own end is inside the file) or to the file size otherwise.
/// A target at or past the end of the file parks the cursor exactly at
/// the file end; the enclosing walk then sees "no more data" and stops.
pub fn resync_to<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
    parent_end: Option<u64>,
    record_end: u64,
) -> Result<(), DemuxError> {
    let pos = cursor.current_byte_offset();
    if pos == record_end {
        return Ok(());
    }

    let file_size = cursor.total_size();
    let mut target = record_end;

    match parent_end {
        Some(parent_end) if parent_end < file_size => {
            if target > parent_end {
                warn!(
                    record_end,
                    parent_end, "record overshoots its parent, clamping"
                );
                target = parent_end;
            }
        }
        // No parent, or a parent whose own end is broken.
        _ => {
            if target > file_size {
                warn!(record_end, file_size, "record overshoots the file, clamping");
                target = file_size;
            }
        }
    }

    if target >= file_size {
        return cursor.goto_byte_offset(file_size);
    }

    if pos < target {
        cursor.skip_bits((target - pos) * 8)
    } else if pos > target {
        cursor.rewind_bits((pos - target) * 8)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn cursor(len: usize) -> BitCursor<Cursor<Vec<u8>>> {
        BitCursor::new(Cursor::new(vec![0u8; len])).expect("cursor")
    }

    #[test]
    fn skips_forward_to_the_declared_end() {
        let mut c = cursor(100);
        c.goto_byte_offset(10).unwrap();
        resync_to(&mut c, None, 40).unwrap();
        assert_eq!(c.current_byte_offset(), 40);
    }

    #[test]
    fn rewinds_when_the_parser_over_consumed() {
        let mut c = cursor(100);
        c.goto_byte_offset(60).unwrap();
        resync_to(&mut c, None, 40).unwrap();
        assert_eq!(c.current_byte_offset(), 40);
    }

    #[test]
    fn is_idempotent() {
        let mut c = cursor(100);
        c.goto_byte_offset(5).unwrap();
        resync_to(&mut c, None, 30).unwrap();
        resync_to(&mut c, None, 30).unwrap();
        assert_eq!(c.current_byte_offset(), 30);
    }

    #[test]
    fn clamps_to_a_valid_parent() {
        let mut c = cursor(100);
        c.goto_byte_offset(10).unwrap();
        // Record claims to end past its parent; the parent wins.
        resync_to(&mut c, Some(50), 80).unwrap();
        assert_eq!(c.current_byte_offset(), 50);
    }

    #[test]
    fn ignores_a_parent_that_overshoots_the_file() {
        let mut c = cursor(100);
        c.goto_byte_offset(10).unwrap();
        // Broken parent end (past the file): clamp against the file only.
        resync_to(&mut c, Some(500), 120).unwrap();
        assert_eq!(c.current_byte_offset(), 100);
    }

    #[test]
    fn parks_at_file_end_without_out_of_bounds() {
        // A final record declaring size 0 extends to the file end; the
        // cursor must land exactly there and not error.
        let mut c = cursor(64);
        c.goto_byte_offset(32).unwrap();
        resync_to(&mut c, None, 64).unwrap();
        assert_eq!(c.current_byte_offset(), 64);
    }
}
