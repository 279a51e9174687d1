//! # mediamap-core
//!
//! Pure Rust media container demultiplexer and sample indexer.
//!
//! Feed it an MP4-family or RIFF/WAVE file and get back, per elementary
//! stream, a flat time-ordered index of samples (byte offset, byte size,
//! decode/presentation timestamps, semantic kind) plus normalized stream
//! metadata. Decoders and front-ends consume the index; they never
//! re-parse the container.

// ============================================================================
// Parsing primitives
// ============================================================================
pub mod cursor;
pub mod error;
pub mod fourcc;
pub mod resync;

// ============================================================================
// Container demuxers
// ============================================================================
pub mod mp4;
pub mod riff;
pub mod wave;

// ============================================================================
// Output model & facade
// ============================================================================
pub mod demuxer;
pub mod registry;

pub use demuxer::{parse_file, parse_reader, probe_file, sniff_container};
pub use error::DemuxError;
pub use registry::{
    AudioInfo, CancelToken, Codec, ColorMatrix, ContainerKind, MediaRegistry, SampleEntry,
    SampleKind, TrackIndex, TrackKind, VideoInfo,
};
