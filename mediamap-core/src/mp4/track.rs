//! Raw per-track tables, extracted from the sample-table boxes in file
//! order and never reordered. The indexer joins them afterwards.

use crate::registry::{Codec, ColorMatrix, TrackKind};

/// Out-of-band codec configuration blob located inside the container
/// (offset + size only, the bytes are never copied).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterSet {
    pub offset: u64,
    pub size: u32,
}

/// Sample sizes come either as one constant (constant-bitrate shortcut)
/// or one entry per sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleSizes {
    Constant(u32),
    PerSample(Vec<u32>),
}

impl Default for SampleSizes {
    fn default() -> Self {
        SampleSizes::Constant(0)
    }
}

/// One run of the sample-to-chunk table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRun {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub description_index: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Mp4Track {
    pub id: u32,
    pub handler: TrackKind,
    pub fcc: u32,
    pub codec: Codec,
    pub name: Option<String>,
    pub compressor: Option<String>,
    pub language: Option<String>,

    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    /// First edit-list media time; frame-rate fallback for progressive
    /// files with zero indexed samples.
    pub media_time: i64,

    // Video scalars
    pub width: u32,
    pub height: u32,
    pub color_depth: u16,
    pub color_matrix: ColorMatrix,
    pub color_range: u16,
    pub par_h: u32,
    pub par_v: u32,
    pub bitrate_max: u32,
    pub bitrate_avg: u32,

    // Audio scalars
    pub channel_count: u16,
    pub sample_size_bits: u16,
    pub sample_rate_hz: u32,

    // Parameter sets (sequence-level, then picture-level)
    pub sps: Vec<ParameterSet>,
    pub pps: Vec<ParameterSet>,

    // Sample tables, one vector per box, in file order
    pub stts: Vec<(u32, u32)>,
    pub ctts: Vec<(u32, i64)>,
    pub stss: Vec<u32>,
    pub stsc: Vec<ChunkRun>,
    pub sample_count: u32,
    pub sizes: SampleSizes,
    pub chunk_offsets: Vec<u64>,
}

impl Mp4Track {
    pub fn new(id: u32) -> Self {
        Mp4Track {
            id,
            ..Default::default()
        }
    }

    pub fn parameter_set_count(&self) -> usize {
        self.sps.len() + self.pps.len()
    }
}
