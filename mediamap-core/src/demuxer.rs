//! Universal demuxer facade for supported containers.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use serde_json::json;
use tracing::debug;

use crate::cursor::BitCursor;
use crate::error::DemuxError;
use crate::fourcc::fourcc;
use crate::registry::{CancelToken, ContainerKind, MediaRegistry};
use crate::{mp4, wave};

const FCC_FTYP: u32 = fourcc(b"ftyp");
const FCC_MOOV: u32 = fourcc(b"moov");
const FCC_MDAT: u32 = fourcc(b"mdat");
const FCC_FREE: u32 = fourcc(b"free");
const FCC_WIDE: u32 = fourcc(b"wide");
const FCC_SKIP: u32 = fourcc(b"skip");
const FCC_RIFF: u32 = fourcc(b"RIFF");
const FCC_WAVE: u32 = fourcc(b"WAVE");

/// Identify the container from the first twelve bytes, leaving the
/// cursor back at the start. Extensions lie; signatures do not.
pub fn sniff_container<R: Read + Seek>(
    cursor: &mut BitCursor<R>,
) -> Result<Option<ContainerKind>, DemuxError> {
    if cursor.total_size() < 12 {
        return Ok(None);
    }

    let first = cursor.read_u32()?;
    let second = cursor.read_u32()?;
    let third = cursor.read_u32()?;
    cursor.goto_byte_offset(0)?;

    let kind = if first == FCC_RIFF && third == FCC_WAVE {
        Some(ContainerKind::Wave)
    } else if matches!(
        second,
        FCC_FTYP | FCC_MOOV | FCC_MDAT | FCC_FREE | FCC_WIDE | FCC_SKIP
    ) {
        Some(ContainerKind::Mp4)
    } else {
        None
    };
    Ok(kind)
}

/// Parse any supported container from a seekable byte source.
pub fn parse_reader<R: Read + Seek>(
    reader: R,
    cancel: &CancelToken,
) -> Result<MediaRegistry, DemuxError> {
    let mut cursor = BitCursor::new(reader)?;
    match sniff_container(&mut cursor)? {
        Some(ContainerKind::Mp4) => {
            debug!("parsing ISO-BMFF container");
            mp4::parse(&mut cursor, cancel)
        }
        Some(ContainerKind::Wave) => {
            debug!("parsing RIFF/WAVE container");
            wave::parse(&mut cursor, cancel)
        }
        None => Err(DemuxError::MalformedHeader(
            "unrecognized container signature",
        )),
    }
}

/// Parse a file from disk. Independent calls share nothing; run as many
/// in parallel as you like.
pub fn parse_file(path: impl AsRef<Path>) -> Result<MediaRegistry, DemuxError> {
    let file = File::open(path.as_ref())?;
    parse_reader(BufReader::new(file), &CancelToken::new())
}

/// Parse a file and summarize the result as JSON, for callers that only
/// want a report.
pub fn probe_file(path: impl AsRef<Path>) -> Result<serde_json::Value, DemuxError> {
    let registry = parse_file(path)?;
    let tracks: Vec<serde_json::Value> = registry
        .tracks
        .iter()
        .map(|track| {
            json!({
                "id": track.id,
                "kind": track.kind,
                "codec": track.codec,
                "language": track.language,
                "duration_ns": track.duration_ns,
                "stream_size": track.stream_size,
                "sample_count": track.samples.len(),
                "sync_sample_count": track.sync_sample_count,
                "video": track.video,
                "audio": track.audio,
            })
        })
        .collect();

    Ok(json!({
        "container": registry.container,
        "duration_ns": registry.duration_ns,
        "tracks": tracks,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sniff(data: &[u8]) -> Option<ContainerKind> {
        let mut padded = data.to_vec();
        padded.resize(padded.len().max(12), 0);
        let mut cursor = BitCursor::new(Cursor::new(padded)).expect("cursor");
        sniff_container(&mut cursor).expect("sniff")
    }

    #[test]
    fn recognizes_mp4_signatures() {
        assert_eq!(sniff(b"\x00\x00\x00\x18ftypisom"), Some(ContainerKind::Mp4));
        assert_eq!(sniff(b"\x00\x00\x01\x00moov\x00\x00\x00\x00"), Some(ContainerKind::Mp4));
    }

    #[test]
    fn recognizes_wave_signatures() {
        assert_eq!(sniff(b"RIFF\x24\x00\x00\x00WAVE"), Some(ContainerKind::Wave));
    }

    #[test]
    fn rejects_unknown_signatures() {
        assert_eq!(sniff(b"MThd\x00\x00\x00\x06\x00\x01\x00\x01"), None);
        assert_eq!(sniff(b"RIFF\x24\x00\x00\x00AVI "), None);
    }

    #[test]
    fn sniffing_rewinds_the_cursor() {
        let mut data = b"\x00\x00\x00\x18ftypisom".to_vec();
        data.resize(24, 0);
        let mut cursor = BitCursor::new(Cursor::new(data)).expect("cursor");
        sniff_container(&mut cursor).expect("sniff");
        assert_eq!(cursor.current_byte_offset(), 0);
    }
}
