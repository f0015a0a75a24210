use tracing::debug;

use crate::sample::{SampleKind, SampleMap};

/// How the requested keyframes are picked from the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    /// Take IDR samples as they come, no pruning.
    Unfiltered,
    /// Prune, then take the first survivors in decode order.
    Ordered,
    /// Prune, then spread the picks evenly across the survivors.
    Distributed,
}

/// Fraction of the IDR population cut from each border before selection.
const BORDER_CUT: f64 = 0.03;
/// Divisor applied to the mean IDR payload to get the size threshold.
const SIZE_THRESHOLD_DIVISOR: f64 = 1.66;

/// Reduce a sample map to the parameter-set samples plus up to
/// `picture_number` IDR samples chosen per `mode`.
///
/// Consumes the input map and returns the replacement together with the
/// number of pictures actually retained (the request clamped to what
/// the stream offers). Undersized IDRs and the first/last few percent
/// are pruned first so grey lead-in and fade-out frames don't become
/// thumbnails.
pub fn filter_idr(
    map: SampleMap,
    picture_number: usize,
    mode: ExtractionMode,
) -> (SampleMap, usize) {
    let idr_indices = map.idr_indices();
    let idr_count = idr_indices.len();

    if idr_count == 0 {
        return (map, 0);
    }

    let picture_number = picture_number.min(idr_count);
    if mode == ExtractionMode::Unfiltered {
        return (map, picture_number);
    }
    // A request covering every IDR leaves nothing to choose between;
    // pruning would only eat into frames the caller asked for.
    if picture_number == idr_count {
        return (map, picture_number);
    }

    // Mean IDR payload sets the "too small to be a real picture" bar.
    let total: u64 = idr_indices.iter().map(|&i| map.samples[i].size as u64).sum();
    let threshold = total as f64 / idr_count as f64 / SIZE_THRESHOLD_DIVISOR;

    let border = ((BORDER_CUT * idr_count as f64).ceil()) as usize;
    let survivors: Vec<usize> = idr_indices
        .iter()
        .enumerate()
        .filter(|&(ord, _)| ord >= border && ord < idr_count.saturating_sub(border))
        .map(|(_, &i)| i)
        .filter(|&i| map.samples[i].size as f64 > threshold)
        .collect();

    let surviving = survivors.len();
    let picture_number = picture_number.min(surviving);

    debug!(
        target: "keysnap::filter",
        idr_count,
        surviving,
        picture_number,
        threshold,
        "idr selection"
    );

    let picked: Vec<usize> = match mode {
        ExtractionMode::Unfiltered => unreachable!(),
        // A single distributed pick has no spacing to compute; fall back
        // to taking the first survivor.
        ExtractionMode::Ordered | ExtractionMode::Distributed if picture_number <= 1 => {
            survivors.iter().copied().take(picture_number).collect()
        }
        ExtractionMode::Ordered => survivors.iter().copied().take(picture_number).collect(),
        ExtractionMode::Distributed => {
            let jump = surviving / (picture_number - 1);
            (0..picture_number)
                .map(|i| survivors[(i * jump).min(surviving - 1)])
                .collect()
        }
    };

    let samples = map
        .samples
        .iter()
        .enumerate()
        .filter(|(i, s)| {
            matches!(s.kind, SampleKind::Sps | SampleKind::Pps) || picked.contains(i)
        })
        .map(|(_, s)| s.clone())
        .collect();

    let filtered = SampleMap { samples, ..map };
    (filtered, picture_number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::NalFraming;
    use crate::sample::Sample;

    fn map_with_idr_sizes(sizes: &[u32]) -> SampleMap {
        let mut samples = vec![
            Sample {
                kind: SampleKind::Sps,
                offset: 0,
                size: 20,
                pts: 0,
                dts: 0,
            },
            Sample {
                kind: SampleKind::Pps,
                offset: 20,
                size: 6,
                pts: 0,
                dts: 0,
            },
        ];
        let mut offset = 1000u64;
        for (i, &size) in sizes.iter().enumerate() {
            samples.push(Sample {
                kind: SampleKind::Idr,
                offset,
                size,
                pts: i as i64 * 3000,
                dts: i as i64 * 3000,
            });
            offset += size as u64;
        }
        SampleMap {
            samples,
            track_id: 1,
            timescale: 90_000,
            framing: NalFraming::LengthPrefixed(4),
        }
    }

    #[test]
    fn empty_idr_set_yields_zero() {
        let map = map_with_idr_sizes(&[]);
        let (filtered, n) = filter_idr(map, 3, ExtractionMode::Distributed);
        assert_eq!(n, 0);
        assert_eq!(filtered.idr_count(), 0);
    }

    #[test]
    fn unfiltered_leaves_map_untouched() {
        let map = map_with_idr_sizes(&[100, 100, 100]);
        let before = map.sample_count();
        let (filtered, n) = filter_idr(map, 2, ExtractionMode::Unfiltered);
        assert_eq!(n, 2);
        assert_eq!(filtered.sample_count(), before);
    }

    #[test]
    fn request_clamped_to_idr_count() {
        let map = map_with_idr_sizes(&[100, 100, 100]);
        let (_, n) = filter_idr(map, 99, ExtractionMode::Unfiltered);
        assert_eq!(n, 3);
    }

    #[test]
    fn undersized_idr_pruned() {
        // Nine healthy keyframes and one runt; mean 90.1, threshold ~54.
        let mut sizes = vec![100u32; 9];
        sizes.push(1);
        let map = map_with_idr_sizes(&sizes);
        let (filtered, n) = filter_idr(map, 5, ExtractionMode::Ordered);
        assert_eq!(n, 5);
        assert_eq!(filtered.idr_count(), 5);
        assert!(filtered
            .samples
            .iter()
            .filter(|s| s.kind == SampleKind::Idr)
            .all(|s| s.size == 100));
    }

    #[test]
    fn ordered_picks_are_strictly_increasing() {
        let map = map_with_idr_sizes(&[100; 50]);
        let (filtered, n) = filter_idr(map, 10, ExtractionMode::Ordered);
        assert_eq!(n, 10);
        let offsets: Vec<u64> = filtered
            .samples
            .iter()
            .filter(|s| s.kind == SampleKind::Idr)
            .map(|s| s.offset)
            .collect();
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn border_cut_and_distribution() {
        let map = map_with_idr_sizes(&[100; 100]);
        let (filtered, n) = filter_idr(map, 10, ExtractionMode::Distributed);
        assert_eq!(n, 10);
        let picked: Vec<i64> = filtered
            .samples
            .iter()
            .filter(|s| s.kind == SampleKind::Idr)
            .map(|s| s.dts / 3000)
            .collect();
        assert_eq!(picked.len(), 10);
        // ceil(3% of 100) = 3 cut from each border; jump = 94 / 9 = 10.
        assert_eq!(picked[0], 3);
        assert_eq!(picked[9], 93);
        assert!(picked.iter().all(|&ord| (3..97).contains(&ord)));
        assert!(picked.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn distributed_single_pick_falls_back_to_ordered() {
        let map = map_with_idr_sizes(&[100; 40]);
        let (filtered, n) = filter_idr(map, 1, ExtractionMode::Distributed);
        assert_eq!(n, 1);
        assert_eq!(filtered.idr_count(), 1);
        // First survivor after the border cut of ceil(1.2) = 2.
        let idr = filtered
            .samples
            .iter()
            .find(|s| s.kind == SampleKind::Idr)
            .unwrap();
        assert_eq!(idr.dts / 3000, 2);
    }

    #[test]
    fn parameter_sets_survive_filtering() {
        let map = map_with_idr_sizes(&[100; 20]);
        let (filtered, _) = filter_idr(map, 4, ExtractionMode::Distributed);
        assert_eq!(filtered.samples[0].kind, SampleKind::Sps);
        assert_eq!(filtered.samples[1].kind, SampleKind::Pps);
    }
}
