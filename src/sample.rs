use tracing::debug;

use crate::bitstream::NalFraming;
use crate::mp4::{Track, TrackCodec};
use crate::Error;

/// Sample classification inside a [`SampleMap`].
///
/// `Sps`/`Pps` entries are pseudo-samples materialized from the track's
/// avcC configuration; they address the parameter-set bytes inside the
/// file and are decoded before any slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Sps,
    Pps,
    /// Sync sample (random access point).
    Idr,
    /// Non-sync video sample.
    Slice,
    Other,
}

/// One contiguous encoded access unit: a byte region of the input file
/// plus its timing in track-timescale units.
#[derive(Debug, Clone)]
pub struct Sample {
    pub kind: SampleKind,
    pub offset: u64,
    pub size: u32,
    pub pts: i64,
    pub dts: i64,
}

/// Decode-ordered sample sequence for one elementary stream.
#[derive(Debug, Clone)]
pub struct SampleMap {
    pub samples: Vec<Sample>,
    pub track_id: u32,
    pub timescale: u32,
    /// NAL framing of regular (non-pseudo) samples.
    pub framing: NalFraming,
}

impl SampleMap {
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn idr_count(&self) -> usize {
        self.samples
            .iter()
            .filter(|s| s.kind == SampleKind::Idr)
            .count()
    }

    pub fn idr_indices(&self) -> Vec<usize> {
        self.samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind == SampleKind::Idr)
            .map(|(i, _)| i)
            .collect()
    }

    /// Materialize the decode-order sample map of one track: chunk walk
    /// via stsc over stco/co64, sizes via stsz/stz2, timing from
    /// stts/ctts, sync flags from stss, and avcC parameter sets
    /// prepended as pseudo-samples.
    pub fn from_track(track: &Track) -> Result<SampleMap, Error> {
        let tables = &track.tables;
        let sample_count = tables.sample_sizes.len();

        let offsets = resolve_sample_offsets(track)?;
        let (dts, pts) = resolve_sample_timing(track);

        // stss carries 1-based sample numbers; absence means every
        // sample is a random access point.
        let is_sync: Box<dyn Fn(usize) -> bool> = match &tables.stss {
            Some(numbers) => {
                let set: std::collections::HashSet<u32> = numbers.iter().copied().collect();
                Box::new(move |i| set.contains(&(i as u32 + 1)))
            }
            None => Box::new(|_| true),
        };

        let mut samples = Vec::with_capacity(sample_count + 8);

        let framing = match &track.codec {
            TrackCodec::Avc {
                length_size,
                sps,
                pps,
                ..
            } => {
                for blob in sps {
                    samples.push(Sample {
                        kind: SampleKind::Sps,
                        offset: blob.offset,
                        size: blob.size,
                        pts: 0,
                        dts: 0,
                    });
                }
                for blob in pps {
                    samples.push(Sample {
                        kind: SampleKind::Pps,
                        offset: blob.offset,
                        size: blob.size,
                        pts: 0,
                        dts: 0,
                    });
                }
                NalFraming::LengthPrefixed(*length_size)
            }
            TrackCodec::Other(_) => NalFraming::AnnexB,
        };

        for i in 0..sample_count {
            samples.push(Sample {
                kind: if is_sync(i) {
                    SampleKind::Idr
                } else {
                    SampleKind::Slice
                },
                offset: offsets[i],
                size: tables.sample_sizes[i],
                pts: pts[i],
                dts: dts[i],
            });
        }

        let map = SampleMap {
            samples,
            track_id: track.track_id,
            timescale: track.timescale,
            framing,
        };
        debug!(
            target: "keysnap::sample",
            track_id = track.track_id,
            samples = map.sample_count(),
            idr = map.idr_count(),
            "sample map materialized"
        );
        Ok(map)
    }
}

/// Turn stsc + stco + stsz into per-sample absolute file offsets.
fn resolve_sample_offsets(track: &Track) -> Result<Vec<u64>, Error> {
    let tables = &track.tables;

    // Expand chunk -> samples_per_chunk using stsc runs; chunks are
    // 1-based in stsc.
    let mut chunk_samples: Vec<u32> = vec![0; tables.chunk_offsets.len()];
    for i in 0..tables.stsc.len() {
        let cur = &tables.stsc[i];
        let next_first = tables
            .stsc
            .get(i + 1)
            .map(|e| e.first_chunk)
            .unwrap_or(tables.chunk_offsets.len() as u32 + 1);

        for chunk_number in cur.first_chunk..next_first {
            let idx = (chunk_number.saturating_sub(1)) as usize;
            if idx < chunk_samples.len() {
                chunk_samples[idx] = cur.samples_per_chunk;
            }
        }
    }

    // Repair gaps from out-of-order stsc runs by carrying the previous
    // non-zero run forward, so every chunk still gets walked.
    let mut last = 0u32;
    for v in &mut chunk_samples {
        if *v == 0 {
            *v = last;
        } else {
            last = *v;
        }
    }

    let mut offsets = Vec::with_capacity(tables.sample_sizes.len());
    let mut sample_index = 0usize;
    for (chunk_i, &chunk_off) in tables.chunk_offsets.iter().enumerate() {
        let mut off = chunk_off;
        for _ in 0..chunk_samples[chunk_i] {
            if sample_index >= tables.sample_sizes.len() {
                break;
            }
            offsets.push(off);
            off += tables.sample_sizes[sample_index] as u64;
            sample_index += 1;
        }
    }

    if offsets.len() != tables.sample_sizes.len() {
        return Err(Error::InconsistentSampleTables {
            sample_sizes: tables.sample_sizes.len(),
            sample_offsets: offsets.len(),
            chunk_offsets: tables.chunk_offsets.len(),
        });
    }

    Ok(offsets)
}

/// Accumulate stts decode deltas into per-sample dts, then apply ctts
/// composition offsets for pts.
fn resolve_sample_timing(track: &Track) -> (Vec<i64>, Vec<i64>) {
    let tables = &track.tables;
    let n = tables.sample_sizes.len();

    let mut dts = Vec::with_capacity(n);
    let mut t = 0i64;
    'outer: for &(count, delta) in &tables.stts {
        for _ in 0..count {
            if dts.len() == n {
                break 'outer;
            }
            dts.push(t);
            t += delta as i64;
        }
    }
    // A short stts table leaves the tail at the last accumulated time.
    while dts.len() < n {
        dts.push(t);
    }

    let mut pts = dts.clone();
    let mut i = 0usize;
    'ct: for &(count, offset) in &tables.ctts {
        for _ in 0..count {
            if i == n {
                break 'ct;
            }
            pts[i] = dts[i] + offset as i64;
            i += 1;
        }
    }

    (dts, pts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::{SampleTables, StscEntry};

    fn video_track(tables: SampleTables) -> Track {
        Track {
            track_id: 1,
            handler: *b"vide",
            timescale: 90_000,
            duration: 900_000,
            width: 320,
            height: 240,
            codec: TrackCodec::Other(*b"test"),
            tables,
        }
    }

    fn basic_tables() -> SampleTables {
        SampleTables {
            sample_sizes: vec![10, 20, 30, 40, 50],
            chunk_offsets: vec![1000, 2000],
            stsc: vec![
                StscEntry {
                    first_chunk: 1,
                    samples_per_chunk: 3,
                    sample_description_index: 1,
                },
                StscEntry {
                    first_chunk: 2,
                    samples_per_chunk: 2,
                    sample_description_index: 1,
                },
            ],
            stts: vec![(5, 3000)],
            ctts: vec![],
            stss: Some(vec![1, 4]),
        }
    }

    #[test]
    fn offsets_follow_chunk_walk() {
        let map = SampleMap::from_track(&video_track(basic_tables())).unwrap();
        let offsets: Vec<u64> = map.samples.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![1000, 1010, 1030, 2000, 2040]);
    }

    #[test]
    fn sync_samples_marked_idr() {
        let map = SampleMap::from_track(&video_track(basic_tables())).unwrap();
        let kinds: Vec<SampleKind> = map.samples.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SampleKind::Idr,
                SampleKind::Slice,
                SampleKind::Slice,
                SampleKind::Idr,
                SampleKind::Slice,
            ]
        );
        assert_eq!(map.idr_count(), 2);
        assert!(map.idr_count() <= map.sample_count());
    }

    #[test]
    fn missing_stss_means_all_sync() {
        let mut tables = basic_tables();
        tables.stss = None;
        let map = SampleMap::from_track(&video_track(tables)).unwrap();
        assert_eq!(map.idr_count(), 5);
    }

    #[test]
    fn timing_from_stts_and_ctts() {
        let mut tables = basic_tables();
        tables.stts = vec![(2, 1000), (3, 500)];
        tables.ctts = vec![(1, 0), (4, 200)];
        let map = SampleMap::from_track(&video_track(tables)).unwrap();
        let dts: Vec<i64> = map.samples.iter().map(|s| s.dts).collect();
        let pts: Vec<i64> = map.samples.iter().map(|s| s.pts).collect();
        assert_eq!(dts, vec![0, 1000, 2000, 2500, 3000]);
        assert_eq!(pts, vec![0, 1200, 2200, 2700, 3200]);
    }

    #[test]
    fn inconsistent_tables_rejected() {
        let mut tables = basic_tables();
        tables.chunk_offsets = vec![1000];
        let err = SampleMap::from_track(&video_track(tables));
        assert!(matches!(err, Err(Error::InconsistentSampleTables { .. })));
    }
}
