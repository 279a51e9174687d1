//! Four-character code helpers.
//!
//! Box/chunk types are stored as big-endian u32 values so they can be
//! matched against the constant tables in the demuxers.

/// Pack a four-character tag into its big-endian u32 form.
pub const fn fourcc(tag: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*tag)
}

/// Render a fourcc for log output. Non-printable tags fall back to hex.
pub fn fourcc_string(tag: u32) -> String {
    let bytes = tag.to_be_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        bytes.iter().map(|&b| b as char).collect()
    } else {
        format!("0x{tag:08X}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_big_endian() {
        assert_eq!(fourcc(b"ftyp"), 0x66747970);
        assert_eq!(fourcc(b"moov"), 0x6D6F6F76);
    }

    #[test]
    fn renders_printable_tags() {
        assert_eq!(fourcc_string(fourcc(b"avc1")), "avc1");
        assert_eq!(fourcc_string(fourcc(b"fmt ")), "fmt ");
    }

    #[test]
    fn renders_binary_tags_as_hex() {
        assert_eq!(fourcc_string(0x00000001), "0x00000001");
    }
}
