//! Output model: per-track sample indices plus file-level metadata.
//!
//! A `MediaRegistry` is the sole surface handed to consumers. They walk
//! `TrackIndex::samples`, fetch `byte_offset..byte_offset + byte_size`
//! windows from the same byte source, and interpret the payload according
//! to `codec`. Nothing here requires re-parsing the container.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerKind {
    Mp4,
    Wave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackKind {
    Video,
    Audio,
    Text,
    Timecode,
    Meta,
    Hint,
    Other,
}

impl Default for TrackKind {
    fn default() -> Self {
        TrackKind::Other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Codec {
    // Video
    H264,
    H265,
    Mpeg4Asp,
    CineForm,
    Vp9,
    Av1,
    // Audio
    Aac,
    Ac3,
    Ac4,
    Eac3,
    Alac,
    Flac,
    Opus,
    MpegL1,
    MpegL2,
    MpegL3,
    Dts,
    Wma,
    // Uncompressed / PCM family
    Lpcm,
    LogPcm,
    Dpcm,
    AdPcm,
    // Anything else, keeping the raw tag for reporting
    Unknown(u32),
}

impl Default for Codec {
    fn default() -> Self {
        Codec::Unknown(0)
    }
}

impl Codec {
    /// PCM-family codecs whose container-declared constant sample size is
    /// known to be unreliable (see the indexer's size reconstruction).
    pub fn is_pcm_family(&self) -> bool {
        matches!(
            self,
            Codec::Lpcm | Codec::LogPcm | Codec::Dpcm | Codec::AdPcm
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorMatrix {
    Bt601,
    Bt709,
    Smpte240m,
    Unknown,
}

impl Default for ColorMatrix {
    fn default() -> Self {
        ColorMatrix::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleKind {
    /// Out-of-band codec configuration exposed as a pseudo-sample.
    ParameterSet,
    /// Random-access point.
    KeySample,
    Sample,
    Text,
    Other,
}

/// One indexed sample. Parameter-set pseudo-samples carry sentinel (-1)
/// timestamps and precede the real samples of their track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleEntry {
    pub kind: SampleKind,
    pub byte_offset: u64,
    pub byte_size: u32,
    pub dts_ns: i64,
    pub pts_ns: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub color_depth: u16,
    pub color_matrix: ColorMatrix,
    pub color_range: u16,
    pub par_h: u32,
    pub par_v: u32,
    pub frame_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub channel_count: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

/// Finished index for one elementary stream. Built once by the indexer,
/// immutable afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackIndex {
    pub id: u32,
    pub kind: TrackKind,
    pub codec: Codec,
    pub language: Option<String>,
    pub title: Option<String>,
    pub encoder: Option<String>,
    pub duration_ns: i64,
    pub creation_time_ns: i64,
    pub modification_time_ns: i64,
    pub stream_size: u64,
    pub sync_sample_count: u32,
    pub bitrate_max: u32,
    pub bitrate_avg: u32,
    /// Set when the track declared a zero timescale and timestamp
    /// normalization was skipped.
    pub unreliable_timing: bool,
    pub video: Option<VideoInfo>,
    pub audio: Option<AudioInfo>,
    pub samples: Vec<SampleEntry>,
}

/// Everything extracted from one file: per-track indices plus file-level
/// metadata, all timestamps normalized to nanoseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRegistry {
    pub container: ContainerKind,
    pub duration_ns: i64,
    pub creation_time_ns: i64,
    pub modification_time_ns: i64,
    pub tracks: Vec<TrackIndex>,
}

/// Cooperative cancellation, checked between sibling records. Cloned
/// tokens share the same flag; independent parses use independent tokens.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_shared_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn pcm_family_covers_the_unreliable_size_codecs() {
        assert!(Codec::Lpcm.is_pcm_family());
        assert!(Codec::AdPcm.is_pcm_family());
        assert!(!Codec::Aac.is_pcm_family());
        assert!(!Codec::Unknown(0).is_pcm_family());
    }
}
