//! Table join: turns a track's raw sample tables into one flat,
//! time-ordered sample index.
//!
//! The passes below build on each other and must run in this order:
//! kinds and sizes first, then decode times, presentation times, byte
//! offsets, nanosecond normalization, and finally the aggregate metadata.
//! A failure here marks only this track as failed; sibling tracks are
//! unaffected.

use tracing::{trace, warn};

use crate::error::DemuxError;
use crate::mp4::track::{Mp4Track, SampleSizes};
use crate::registry::{
    AudioInfo, SampleEntry, SampleKind, TrackIndex, TrackKind, VideoInfo,
};

const NS_PER_SEC: i64 = 1_000_000_000;

/// Sentinel timestamp carried by parameter-set pseudo-samples.
const NO_TIMESTAMP: i64 = -1;

fn scale_to_ns(value: i64, timescale: u32) -> i64 {
    ((value as i128 * NS_PER_SEC as i128) / timescale as i128) as i64
}

pub(crate) fn build_index(track: &Mp4Track) -> Result<TrackIndex, DemuxError> {
    let ps_count = track.parameter_set_count();
    let sample_count = track.sample_count as usize;

    // Kind and size assignment ------------------------------------------

    let constant_size = match &track.sizes {
        SampleSizes::Constant(size) => {
            let mut size = *size;
            // The container's own constant-size field is unreliable for
            // PCM-family tracks that declare one byte per sample; the
            // real sample is one full frame across all channels.
            if size == 1 && track.codec.is_pcm_family() {
                size = track.channel_count as u32 * (track.sample_size_bits as u32 / 8);
                trace!(size, "reconstructed PCM sample size");
            }
            Some(size)
        }
        SampleSizes::PerSample(sizes) => {
            if sizes.len() != sample_count {
                return Err(DemuxError::InconsistentTable(
                    "sample size table length does not match the sample count",
                ));
            }
            None
        }
    };

    let mut samples = Vec::with_capacity(ps_count + sample_count);
    for ps in track.sps.iter().chain(track.pps.iter()) {
        samples.push(SampleEntry {
            kind: SampleKind::ParameterSet,
            byte_offset: ps.offset,
            byte_size: ps.size,
            dts_ns: NO_TIMESTAMP,
            pts_ns: NO_TIMESTAMP,
        });
    }

    for i in 0..sample_count {
        let kind = match track.handler {
            TrackKind::Video => {
                // No sync table means every sample is a random-access
                // point.
                if track.stss.is_empty()
                    || track.stss.binary_search(&(i as u32 + 1)).is_ok()
                {
                    SampleKind::KeySample
                } else {
                    SampleKind::Sample
                }
            }
            TrackKind::Audio => SampleKind::Sample,
            TrackKind::Text => SampleKind::Text,
            _ => SampleKind::Other,
        };
        let byte_size = match &track.sizes {
            SampleSizes::PerSample(sizes) => sizes[i],
            SampleSizes::Constant(_) => constant_size.unwrap_or(0),
        };
        samples.push(SampleEntry {
            kind,
            byte_offset: 0,
            byte_size,
            dts_ns: 0,
            pts_ns: 0,
        });
    }

    // Decode timestamps, in timescale units for now ---------------------

    let mut idx = ps_count;
    let mut dts: i64 = 0;
    'stts: for &(run, delta) in &track.stts {
        for _ in 0..run {
            if idx >= samples.len() {
                break 'stts;
            }
            samples[idx].dts_ns = dts;
            dts += delta as i64;
            idx += 1;
        }
    }
    if idx < samples.len() {
        // Short stts coverage: keep ticking with the last known delta
        // rather than leaving the tail stuck at zero.
        warn!(
            covered = idx - ps_count,
            declared = sample_count,
            "time-to-sample runs cover fewer samples than declared"
        );
        let delta = track.stts.last().map(|&(_, d)| d as i64).unwrap_or(0);
        while idx < samples.len() {
            samples[idx].dts_ns = dts;
            dts += delta;
            idx += 1;
        }
    }

    // Presentation timestamps -------------------------------------------

    if track.ctts.is_empty() {
        for sample in &mut samples[ps_count..] {
            sample.pts_ns = sample.dts_ns;
        }
    } else {
        let mut idx = ps_count;
        'ctts: for &(run, offset) in &track.ctts {
            for _ in 0..run {
                if idx >= samples.len() {
                    break 'ctts;
                }
                samples[idx].pts_ns = samples[idx].dts_ns + offset;
                idx += 1;
            }
        }
        while idx < samples.len() {
            samples[idx].pts_ns = samples[idx].dts_ns;
            idx += 1;
        }
    }

    // Byte offsets: expand the sample-to-chunk runs over the chunk
    // offset table. Only the first sample of a chunk comes from the
    // table; the rest are previous offset + previous size. ---------------

    let mut idx = ps_count;
    let mut chunk = 0usize;
    for (i, run) in track.stsc.iter().enumerate() {
        let chunk_span = if i + 1 < track.stsc.len() {
            let next_first = track.stsc[i + 1].first_chunk;
            if next_first <= run.first_chunk {
                return Err(DemuxError::InconsistentTable(
                    "sample-to-chunk first_chunk must strictly increase",
                ));
            }
            (next_first - run.first_chunk) as usize
        } else {
            // The last run's literal count is a known off-by-one hazard
            // in the wild; infer it as "all remaining chunk offsets".
            track.chunk_offsets.len().saturating_sub(chunk)
        };

        for _ in 0..chunk_span {
            if idx >= samples.len() {
                break;
            }
            let Some(&chunk_start) = track.chunk_offsets.get(chunk) else {
                return Err(DemuxError::InconsistentTable(
                    "chunk index runs past the chunk offset table",
                ));
            };
            let mut offset = chunk_start;
            for _ in 0..run.samples_per_chunk {
                if idx >= samples.len() {
                    break;
                }
                samples[idx].byte_offset = offset;
                offset += samples[idx].byte_size as u64;
                idx += 1;
            }
            chunk += 1;
        }
        if idx >= samples.len() {
            break;
        }
    }
    if idx < samples.len() {
        return Err(DemuxError::InconsistentTable(
            "samples left without a chunk mapping",
        ));
    }

    // Nanosecond normalization ------------------------------------------

    let unreliable_timing = track.timescale == 0;
    if unreliable_timing {
        warn!(track = track.id, "zero timescale, timestamps left unscaled");
    } else {
        for sample in &mut samples[ps_count..] {
            sample.dts_ns = scale_to_ns(sample.dts_ns, track.timescale);
            sample.pts_ns = scale_to_ns(sample.pts_ns, track.timescale);
        }
    }

    // Aggregate metadata ------------------------------------------------

    let stream_size: u64 = samples[ps_count..]
        .iter()
        .map(|sample| sample.byte_size as u64)
        .sum();

    let (duration_ns, creation_time_ns, modification_time_ns) = if unreliable_timing {
        (0, 0, 0)
    } else {
        (
            scale_to_ns(track.duration as i64, track.timescale),
            scale_to_ns(track.creation_time as i64, track.timescale),
            scale_to_ns(track.modification_time as i64, track.timescale),
        )
    };

    let frame_rate = if track.timescale == 0 {
        0.0
    } else if sample_count > 0 && track.duration > 0 {
        track.timescale as f64 * sample_count as f64 / track.duration as f64
    } else if track.media_time > 0 {
        // Progressive-download files index zero samples up front; the
        // edit-list media time is the only rate hint left.
        track.timescale as f64 / track.media_time as f64
    } else {
        0.0
    };

    let sync_sample_count = if track.handler == TrackKind::Video {
        if track.stss.is_empty() {
            sample_count as u32
        } else {
            track.stss.len() as u32
        }
    } else {
        0
    };

    let video = (track.handler == TrackKind::Video).then(|| VideoInfo {
        width: track.width,
        height: track.height,
        color_depth: track.color_depth,
        color_matrix: track.color_matrix,
        color_range: track.color_range,
        par_h: if track.par_h > 0 && track.par_v > 0 {
            track.par_h
        } else {
            1
        },
        par_v: if track.par_h > 0 && track.par_v > 0 {
            track.par_v
        } else {
            1
        },
        frame_rate,
    });
    let audio = (track.handler == TrackKind::Audio).then(|| AudioInfo {
        channel_count: track.channel_count,
        sample_rate: track.sample_rate_hz,
        bits_per_sample: track.sample_size_bits,
    });

    Ok(TrackIndex {
        id: track.id,
        kind: track.handler,
        codec: track.codec,
        language: track.language.clone(),
        title: track.name.clone(),
        encoder: track.compressor.clone(),
        duration_ns,
        creation_time_ns,
        modification_time_ns,
        stream_size,
        sync_sample_count,
        bitrate_max: track.bitrate_max,
        bitrate_avg: track.bitrate_avg,
        unreliable_timing,
        video,
        audio,
        samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::track::ChunkRun;
    use crate::registry::Codec;

    fn run(first_chunk: u32, samples_per_chunk: u32) -> ChunkRun {
        ChunkRun {
            first_chunk,
            samples_per_chunk,
            description_index: 1,
        }
    }

    fn video_track(sample_count: u32) -> Mp4Track {
        let mut track = Mp4Track::new(1);
        track.handler = TrackKind::Video;
        track.codec = Codec::H264;
        track.timescale = 3000;
        track.sample_count = sample_count;
        track
    }

    #[test]
    fn expands_decode_times_and_normalizes_to_nanoseconds() {
        let mut track = video_track(3);
        track.stts = vec![(3, 1000)];
        track.sizes = SampleSizes::Constant(10);
        track.stsc = vec![run(1, 3)];
        track.chunk_offsets = vec![100];

        let index = build_index(&track).expect("index");
        let dts: Vec<i64> = index.samples.iter().map(|s| s.dts_ns).collect();
        assert_eq!(dts, vec![0, 333333333, 666666666]);
        // No composition offsets: presentation equals decode.
        assert!(index.samples.iter().all(|s| s.pts_ns == s.dts_ns));
    }

    #[test]
    fn joins_chunk_offsets_and_sizes() {
        let mut track = video_track(4);
        track.stts = vec![(4, 100)];
        track.sizes = SampleSizes::PerSample(vec![100, 150, 200, 120]);
        track.stsc = vec![run(1, 2)];
        track.chunk_offsets = vec![500, 900];

        let index = build_index(&track).expect("index");
        let offsets: Vec<u64> = index.samples.iter().map(|s| s.byte_offset).collect();
        assert_eq!(offsets, vec![500, 600, 900, 1050]);
        assert_eq!(index.stream_size, 100 + 150 + 200 + 120);
    }

    #[test]
    fn sync_table_marks_key_samples() {
        let mut track = video_track(3);
        track.stts = vec![(3, 100)];
        track.sizes = SampleSizes::Constant(10);
        track.stsc = vec![run(1, 3)];
        track.chunk_offsets = vec![0];
        track.stss = vec![1, 3];

        let index = build_index(&track).expect("index");
        let kinds: Vec<SampleKind> = index.samples.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SampleKind::KeySample,
                SampleKind::Sample,
                SampleKind::KeySample
            ]
        );
        assert_eq!(index.sync_sample_count, 2);
    }

    #[test]
    fn missing_sync_table_makes_every_sample_a_key() {
        let mut track = video_track(3);
        track.stts = vec![(3, 100)];
        track.sizes = SampleSizes::Constant(10);
        track.stsc = vec![run(1, 3)];
        track.chunk_offsets = vec![0];

        let index = build_index(&track).expect("index");
        assert!(index
            .samples
            .iter()
            .all(|s| s.kind == SampleKind::KeySample));
        assert_eq!(index.sync_sample_count, 3);
    }

    #[test]
    fn reconstructs_pcm_sample_sizes() {
        let mut track = Mp4Track::new(2);
        track.handler = TrackKind::Audio;
        track.codec = Codec::Lpcm;
        track.timescale = 48000;
        track.sample_count = 2;
        track.channel_count = 2;
        track.sample_size_bits = 16;
        track.sizes = SampleSizes::Constant(1);
        track.stts = vec![(2, 1)];
        track.stsc = vec![run(1, 2)];
        track.chunk_offsets = vec![64];

        let index = build_index(&track).expect("index");
        assert!(index.samples.iter().all(|s| s.byte_size == 4));
        assert_eq!(index.samples[1].byte_offset, 68);
    }

    #[test]
    fn applies_signed_composition_offsets() {
        let mut track = video_track(3);
        track.stts = vec![(3, 1000)];
        track.ctts = vec![(1, 2000), (2, -1000)];
        track.sizes = SampleSizes::Constant(10);
        track.stsc = vec![run(1, 3)];
        track.chunk_offsets = vec![0];

        let index = build_index(&track).expect("index");
        let pts: Vec<i64> = index.samples.iter().map(|s| s.pts_ns).collect();
        // (dts + offset) scaled by 1e9 / 3000.
        assert_eq!(pts, vec![666666666, 0, 333333333]);
    }

    #[test]
    fn short_chunk_offset_table_fails_the_track() {
        let mut track = video_track(4);
        track.stts = vec![(4, 100)];
        track.sizes = SampleSizes::Constant(10);
        track.stsc = vec![run(1, 2), run(3, 2)];
        track.chunk_offsets = vec![500];

        assert!(matches!(
            build_index(&track),
            Err(DemuxError::InconsistentTable(_))
        ));
    }

    #[test]
    fn parameter_sets_precede_samples_with_sentinel_timestamps() {
        use crate::mp4::track::ParameterSet;

        let mut track = video_track(2);
        track.stts = vec![(2, 100)];
        track.sizes = SampleSizes::Constant(10);
        track.stsc = vec![run(1, 2)];
        track.chunk_offsets = vec![300];
        track.sps = vec![ParameterSet {
            offset: 40,
            size: 12,
        }];
        track.pps = vec![ParameterSet { offset: 54, size: 4 }];

        let index = build_index(&track).expect("index");
        assert_eq!(index.samples.len(), 4);
        assert_eq!(index.samples[0].kind, SampleKind::ParameterSet);
        assert_eq!(index.samples[0].byte_offset, 40);
        assert_eq!(index.samples[0].dts_ns, -1);
        assert_eq!(index.samples[1].byte_offset, 54);
        assert_eq!(index.samples[2].kind, SampleKind::KeySample);
        assert_eq!(index.samples[2].byte_offset, 300);
        // Stream size counts real samples only.
        assert_eq!(index.stream_size, 20);
    }

    #[test]
    fn zero_timescale_is_flagged_not_divided() {
        let mut track = video_track(1);
        track.timescale = 0;
        track.stts = vec![(1, 100)];
        track.sizes = SampleSizes::Constant(10);
        track.stsc = vec![run(1, 1)];
        track.chunk_offsets = vec![0];

        let index = build_index(&track).expect("index");
        assert!(index.unreliable_timing);
        assert_eq!(index.samples[0].dts_ns, 0);
    }

    #[test]
    fn decode_times_are_monotonic() {
        let mut track = video_track(6);
        track.stts = vec![(2, 100), (4, 50)];
        track.sizes = SampleSizes::Constant(10);
        track.stsc = vec![run(1, 6)];
        track.chunk_offsets = vec![0];

        let index = build_index(&track).expect("index");
        let dts: Vec<i64> = index.samples.iter().map(|s| s.dts_ns).collect();
        for pair in dts.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }
}
