//! In-memory MP4 authoring helpers for the pipeline tests.
//!
//! Produces minimal but structurally valid ISO-BMFF files: `ftyp`,
//! a single-chunk `mdat`, and a `moov` with one AVC video track whose
//! sample tables point back into the mdat payload.

/// Hand-assembled 320x240 baseline SPS: id 0, 4-bit frame_num,
/// pic_order_cnt_type 2, frame_mbs_only.
pub const SPS_NAL: [u8; 8] = [0x67, 0x42, 0x00, 0x1E, 0xDA, 0x05, 0x07, 0xE4];

/// CAVLC PPS: id 0 referencing SPS 0, pic_init_qp 26.
pub const PPS_NAL: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];

/// IDR slice whose header parses against `SPS_NAL`/`PPS_NAL`:
/// I slice, pps 0, frame_num 0, idr_pic_id 0, qp delta 0.
pub const IDR_NAL: [u8; 4] = [0x65, 0x88, 0x84, 0xC0];

/// IDR slice referencing pps id 2, which nothing ever defines.
pub const IDR_NAL_DANGLING_PPS: [u8; 4] = [0x65, 0x88, 0x61, 0x30];

/// A NAL with the forbidden_zero_bit set; never parses.
pub const BROKEN_NAL: [u8; 2] = [0xFF, 0x00];

/// Non-IDR slice NAL (unsupported by the decoder subset).
pub const NON_IDR_NAL: [u8; 3] = [0x41, 0x9A, 0x00];

/// One video sample: its NAL payloads plus whether stss marks it sync.
pub struct SampleSpec {
    pub nals: Vec<Vec<u8>>,
    pub sync: bool,
}

impl SampleSpec {
    pub fn idr() -> Self {
        SampleSpec {
            nals: vec![IDR_NAL.to_vec()],
            sync: true,
        }
    }

    /// An IDR sample padded to a specific total payload size so the
    /// filter's size threshold can be steered.
    pub fn idr_with_size(total: usize) -> Self {
        let mut nal = IDR_NAL.to_vec();
        let body = total.saturating_sub(4 + nal.len());
        nal.extend(std::iter::repeat(0xA5).take(body));
        SampleSpec {
            nals: vec![nal],
            sync: true,
        }
    }

    pub fn non_idr() -> Self {
        SampleSpec {
            nals: vec![NON_IDR_NAL.to_vec()],
            sync: false,
        }
    }

    pub fn broken_sync() -> Self {
        SampleSpec {
            nals: vec![BROKEN_NAL.to_vec()],
            sync: true,
        }
    }
}

pub struct Mp4Builder {
    samples: Vec<SampleSpec>,
    sps: Vec<Vec<u8>>,
    pps: Vec<Vec<u8>>,
    timescale: u32,
    sample_delta: u32,
}

impl Mp4Builder {
    pub fn new() -> Self {
        Mp4Builder {
            samples: Vec::new(),
            sps: vec![SPS_NAL.to_vec()],
            pps: vec![PPS_NAL.to_vec()],
            timescale: 90_000,
            sample_delta: 3_000,
        }
    }

    pub fn without_parameter_sets(mut self) -> Self {
        self.sps.clear();
        self.pps.clear();
        self
    }

    pub fn push(mut self, sample: SampleSpec) -> Self {
        self.samples.push(sample);
        self
    }

    pub fn push_many(mut self, count: usize, f: impl Fn() -> SampleSpec) -> Self {
        for _ in 0..count {
            self.samples.push(f());
        }
        self
    }

    /// Serialize to `ftyp | mdat | moov` file bytes.
    pub fn build(self) -> Vec<u8> {
        let mut file = Vec::new();

        // ftyp: major brand + minor version.
        let mut ftyp = Vec::new();
        ftyp.extend_from_slice(b"isom");
        ftyp.extend_from_slice(&0u32.to_be_bytes());
        file.extend_from_slice(&boxed(b"ftyp", &ftyp));

        // mdat: length-prefixed NALs per sample, one chunk.
        let mut sample_sizes: Vec<u32> = Vec::new();
        let mut mdat_payload = Vec::new();
        for sample in &self.samples {
            let before = mdat_payload.len();
            for nal in &sample.nals {
                mdat_payload.extend_from_slice(&(nal.len() as u32).to_be_bytes());
                mdat_payload.extend_from_slice(nal);
            }
            sample_sizes.push((mdat_payload.len() - before) as u32);
        }
        let chunk_offset = (file.len() + 8) as u32;
        file.extend_from_slice(&boxed(b"mdat", &mdat_payload));

        // moov with a single video trak.
        let stbl = boxed(b"stbl", &self.build_stbl(&sample_sizes, chunk_offset));
        let minf = boxed(b"minf", &stbl);
        let mdia = boxed(b"mdia", &[mdhd(self.timescale, self.duration()), hdlr(), minf].concat());
        let trak = boxed(b"trak", &[tkhd(1), mdia].concat());
        file.extend_from_slice(&boxed(b"moov", &trak));

        file
    }

    fn duration(&self) -> u32 {
        self.samples.len() as u32 * self.sample_delta
    }

    fn build_stbl(&self, sample_sizes: &[u32], chunk_offset: u32) -> Vec<u8> {
        let n = sample_sizes.len() as u32;

        let stsd = boxed(b"stsd", &{
            let mut p = full_box_payload();
            p.extend_from_slice(&1u32.to_be_bytes()); // entry_count
            p.extend_from_slice(&avc1_entry(&self.sps, &self.pps));
            p
        });

        let stts = boxed(b"stts", &{
            let mut p = full_box_payload();
            p.extend_from_slice(&1u32.to_be_bytes());
            p.extend_from_slice(&n.to_be_bytes());
            p.extend_from_slice(&self.sample_delta.to_be_bytes());
            p
        });

        let stsc = boxed(b"stsc", &{
            let mut p = full_box_payload();
            p.extend_from_slice(&1u32.to_be_bytes());
            p.extend_from_slice(&1u32.to_be_bytes()); // first_chunk
            p.extend_from_slice(&n.to_be_bytes()); // samples_per_chunk
            p.extend_from_slice(&1u32.to_be_bytes()); // sample_description_index
            p
        });

        let stsz = boxed(b"stsz", &{
            let mut p = full_box_payload();
            p.extend_from_slice(&0u32.to_be_bytes()); // per-sample sizes follow
            p.extend_from_slice(&n.to_be_bytes());
            for &s in sample_sizes {
                p.extend_from_slice(&s.to_be_bytes());
            }
            p
        });

        let stco = boxed(b"stco", &{
            let mut p = full_box_payload();
            p.extend_from_slice(&1u32.to_be_bytes());
            p.extend_from_slice(&chunk_offset.to_be_bytes());
            p
        });

        let stss = boxed(b"stss", &{
            let syncs: Vec<u32> = self
                .samples
                .iter()
                .enumerate()
                .filter(|(_, s)| s.sync)
                .map(|(i, _)| i as u32 + 1)
                .collect();
            let mut p = full_box_payload();
            p.extend_from_slice(&(syncs.len() as u32).to_be_bytes());
            for s in syncs {
                p.extend_from_slice(&s.to_be_bytes());
            }
            p
        });

        [stsd, stts, stsc, stsz, stco, stss].concat()
    }
}

fn boxed(typ: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut b = Vec::with_capacity(payload.len() + 8);
    b.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
    b.extend_from_slice(typ);
    b.extend_from_slice(payload);
    b
}

fn full_box_payload() -> Vec<u8> {
    vec![0, 0, 0, 0] // version + flags
}

fn tkhd(track_id: u32) -> Vec<u8> {
    let mut p = full_box_payload();
    p.extend_from_slice(&[0u8; 8]); // creation + modification
    p.extend_from_slice(&track_id.to_be_bytes());
    p.extend_from_slice(&[0u8; 68]); // remainder of the v0 layout
    boxed(b"tkhd", &p)
}

fn mdhd(timescale: u32, duration: u32) -> Vec<u8> {
    let mut p = full_box_payload();
    p.extend_from_slice(&[0u8; 8]); // creation + modification
    p.extend_from_slice(&timescale.to_be_bytes());
    p.extend_from_slice(&duration.to_be_bytes());
    p.extend_from_slice(&[0u8; 4]); // language + pre_defined
    boxed(b"mdhd", &p)
}

fn hdlr() -> Vec<u8> {
    let mut p = full_box_payload();
    p.extend_from_slice(&[0u8; 4]); // pre_defined
    p.extend_from_slice(b"vide");
    p.extend_from_slice(&[0u8; 12]); // reserved
    p.push(0); // empty name
    boxed(b"hdlr", &p)
}

fn avc1_entry(sps: &[Vec<u8>], pps: &[Vec<u8>]) -> Vec<u8> {
    let mut entry = Vec::new();
    entry.extend_from_slice(&[0u8; 6]); // reserved
    entry.extend_from_slice(&1u16.to_be_bytes()); // data_reference_index
    entry.extend_from_slice(&[0u8; 70]); // rest of VisualSampleEntry
    entry.extend_from_slice(&avcc(sps, pps));
    boxed(b"avc1", &entry)
}

fn avcc(sps: &[Vec<u8>], pps: &[Vec<u8>]) -> Vec<u8> {
    let mut p = Vec::new();
    p.push(1); // configurationVersion
    p.push(66); // AVCProfileIndication
    p.push(0); // profile_compatibility
    p.push(30); // AVCLevelIndication
    p.push(0xFC | 0b11); // lengthSizeMinusOne = 3
    p.push(0xE0 | sps.len() as u8);
    for nal in sps {
        p.extend_from_slice(&(nal.len() as u16).to_be_bytes());
        p.extend_from_slice(nal);
    }
    p.push(pps.len() as u8);
    for nal in pps {
        p.extend_from_slice(&(nal.len() as u16).to_be_bytes());
        p.extend_from_slice(nal);
    }
    boxed(b"avcC", &p)
}
