//! Demuxer error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("Read past end of data at byte offset {0}")]
    OutOfBounds(u64),
    #[error("Malformed record header: {0}")]
    MalformedHeader(&'static str),
    #[error("Refusing oversized table ({0} entries)")]
    ResourceExhausted(u64),
    #[error("Inconsistent sample table: {0}")]
    InconsistentTable(&'static str),
    #[error("Unsupported {kind} variant (version {version})")]
    UnsupportedVariant { kind: &'static str, version: u8 },
    #[error("No tracks produced")]
    NoTracksProduced,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DemuxError {
    /// True when the failure only concerns the track being indexed, not
    /// the file as a whole.
    pub fn is_track_local(&self) -> bool {
        matches!(self, DemuxError::InconsistentTable(_))
    }
}
