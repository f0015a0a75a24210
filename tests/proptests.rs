use proptest::prelude::*;

use keysnap::{
    filter_idr, BitReader, ExtractionMode, NalFraming, Sample, SampleKind, SampleMap,
};

// Test-side Exp-Golomb encoder; the crate only ever decodes.
fn encode_ue(value: u32, bits: &mut Vec<bool>) {
    let code = value as u64 + 1;
    let width = 64 - code.leading_zeros();
    for _ in 0..width - 1 {
        bits.push(false);
    }
    for i in (0..width).rev() {
        bits.push((code >> i) & 1 != 0);
    }
}

fn encode_se(value: i32, bits: &mut Vec<bool>) {
    let code = if value == 0 {
        0
    } else if value > 0 {
        value as u32 * 2 - 1
    } else {
        value.unsigned_abs() * 2
    };
    encode_ue(code, bits);
}

fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (7 - i % 8);
        }
    }
    bytes
}

fn idr_map(sizes: &[u32]) -> SampleMap {
    let mut samples = vec![Sample {
        kind: SampleKind::Sps,
        offset: 0,
        size: 16,
        pts: 0,
        dts: 0,
    }];
    let mut offset = 100u64;
    for (i, &size) in sizes.iter().enumerate() {
        samples.push(Sample {
            kind: SampleKind::Idr,
            offset,
            size: size.max(1),
            pts: i as i64,
            dts: i as i64,
        });
        offset += size.max(1) as u64;
    }
    SampleMap {
        samples,
        track_id: 1,
        timescale: 90_000,
        framing: NalFraming::LengthPrefixed(4),
    }
}

proptest! {
    #[test]
    fn ue_round_trips(values in prop::collection::vec(0u32..100_000, 1..32)) {
        let mut bits = Vec::new();
        for &v in &values {
            encode_ue(v, &mut bits);
        }
        bits.push(true); // stop bit keeps trailing zeros readable

        let bytes = pack_bits(&bits);
        let mut reader = BitReader::new(&bytes);
        for &v in &values {
            prop_assert_eq!(reader.ue().unwrap(), v);
        }
    }

    #[test]
    fn se_round_trips(values in prop::collection::vec(-50_000i32..50_000, 1..32)) {
        let mut bits = Vec::new();
        for &v in &values {
            encode_se(v, &mut bits);
        }
        bits.push(true);

        let bytes = pack_bits(&bits);
        let mut reader = BitReader::new(&bytes);
        for &v in &values {
            prop_assert_eq!(reader.se().unwrap(), v);
        }
    }

    #[test]
    fn bit_reader_never_panics_on_garbage(data in prop::collection::vec(any::<u8>(), 0..64)) {
        let mut reader = BitReader::new(&data);
        // Drain via ue until an error or the buffer runs dry.
        for _ in 0..1000 {
            if reader.ue().is_err() {
                break;
            }
        }
    }

    #[test]
    fn filter_retains_exactly_what_it_reports(
        sizes in prop::collection::vec(1u32..100_000, 0..200),
        request in 0usize..50,
        mode_sel in 0u8..3,
    ) {
        let mode = match mode_sel {
            0 => ExtractionMode::Unfiltered,
            1 => ExtractionMode::Ordered,
            _ => ExtractionMode::Distributed,
        };
        let map = idr_map(&sizes);
        let idr_before = map.idr_count();

        let (filtered, n) = filter_idr(map, request, mode);

        prop_assert!(n <= request.min(idr_before));
        if mode != ExtractionMode::Unfiltered {
            prop_assert_eq!(filtered.idr_count(), n);
        }
        // Parameter-set samples always survive.
        prop_assert_eq!(
            filtered.samples.iter().filter(|s| s.kind == SampleKind::Sps).count(),
            1
        );
    }

    #[test]
    fn filter_selection_is_monotone(
        sizes in prop::collection::vec(1u32..100_000, 2..200),
        request in 1usize..50,
        mode_sel in 0u8..2,
    ) {
        let mode = if mode_sel == 0 {
            ExtractionMode::Ordered
        } else {
            ExtractionMode::Distributed
        };
        let (filtered, _) = filter_idr(idr_map(&sizes), request, mode);
        let picks: Vec<i64> = filtered
            .samples
            .iter()
            .filter(|s| s.kind == SampleKind::Idr)
            .map(|s| s.dts)
            .collect();
        prop_assert!(picks.windows(2).all(|w| w[0] < w[1]));
    }
}
