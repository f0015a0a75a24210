use std::io::{Read, Seek};

use tracing::{debug, warn};

use crate::bitstream::{strip_emulation_prevention, SampleFeeder};
use crate::nal::{NalHeader, NalUnitType};
use crate::params::ParameterSetCache;
use crate::pps::Pps;
use crate::quant::QuantTables;
use crate::sample::{Sample, SampleMap};
use crate::sei::{parse_sei_rbsp, SeiMessage};
use crate::slice::SliceHeader;
use crate::sps::Sps;
use crate::Error;

/// Consecutive recoverable errors tolerated before the run is abandoned.
pub const MAX_DECODE_ERRORS: u32 = 64;

/// Per-run accounting. `error_count` tracks consecutive recoverable
/// errors and resets on every successfully decoded IDR.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunCounters {
    pub idr_count: u32,
    pub frame_count: u32,
    pub error_count: u32,
}

/// Pixel layout of a decoded picture buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Planar Y, then quarter-resolution Cb and Cr (4:2:0).
    Yuv420Planar,
    /// Interleaved 8-bit RGB.
    Rgb24,
    /// Single 8-bit luma plane.
    Luma8,
}

/// A reconstructed picture as handed to the picture sink.
#[derive(Debug, Clone)]
pub struct DecodedPicture {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

/// Everything the external slice decoder needs for one IDR handoff:
/// the validated parameter sets, the parsed slice header, the slice
/// RBSP, and the context's quantization tables.
pub struct SliceContext<'a> {
    pub sps: &'a Sps,
    pub pps: &'a Pps,
    pub header: &'a SliceHeader,
    pub rbsp: &'a [u8],
    pub quant: &'a QuantTables,
    pub sei: &'a [SeiMessage],
}

/// External collaborator that reconstructs pixels from an IDR slice.
pub trait SliceDecoder {
    fn decode_idr(&mut self, ctx: &SliceContext<'_>) -> Result<DecodedPicture, Error>;
}

/// Timing attached to a picture when it leaves the core.
#[derive(Debug, Clone, Copy)]
pub struct PictureMeta {
    /// 0-based output picture index.
    pub index: usize,
    pub pts: i64,
    pub dts: i64,
    pub timescale: u32,
}

/// External collaborator that persists decoded pictures.
pub trait PictureSink {
    fn write_picture(&mut self, picture: &DecodedPicture, meta: &PictureMeta) -> Result<(), Error>;
}

/// Header-only collaborator for verification runs: exercises the whole
/// dispatch and validation path, then yields a neutral gray frame sized
/// from the active SPS instead of reconstructing pixels.
pub struct ProbeDecoder;

impl SliceDecoder for ProbeDecoder {
    fn decode_idr(&mut self, ctx: &SliceContext<'_>) -> Result<DecodedPicture, Error> {
        let (w, h) = (ctx.sps.width, ctx.sps.height);
        Ok(DecodedPicture {
            width: w,
            height: h,
            format: PixelFormat::Luma8,
            data: vec![0x80; (w * h) as usize],
        })
    }
}

/// Sink that keeps only the picture metadata; pairs with
/// [`ProbeDecoder`] when no files should be produced.
#[derive(Default)]
pub struct DiscardSink {
    pub pictures: Vec<PictureMeta>,
}

impl PictureSink for DiscardSink {
    fn write_picture(&mut self, _picture: &DecodedPicture, meta: &PictureMeta) -> Result<(), Error> {
        self.pictures.push(*meta);
        Ok(())
    }
}

/// Per-file decoding state: the sample feeder, the parameter-set cache,
/// the retained SEI, quantization tables and run counters. Created per
/// run and torn down when it goes out of scope.
pub struct DecodingContext<R: Read + Seek> {
    feeder: SampleFeeder<R>,
    cache: ParameterSetCache,
    active_sei: Vec<SeiMessage>,
    quant: QuantTables,
    counters: RunCounters,
    picture_number: usize,
    running: bool,
    idr_pic_flag: bool,
}

impl<R: Read + Seek> DecodingContext<R> {
    /// `picture_number` is the post-filter request; the run succeeds
    /// once that many IDR pictures have been decoded.
    pub fn new(reader: R, map: SampleMap, picture_number: usize) -> Self {
        Self {
            feeder: SampleFeeder::new(reader, map),
            cache: ParameterSetCache::new(),
            active_sei: Vec::new(),
            quant: QuantTables::new(),
            counters: RunCounters::default(),
            picture_number,
            running: false,
            idr_pic_flag: false,
        }
    }

    pub fn counters(&self) -> RunCounters {
        self.counters
    }

    pub fn cache(&self) -> &ParameterSetCache {
        &self.cache
    }

    pub fn map(&self) -> &SampleMap {
        self.feeder.map()
    }

    /// True while an IDR handoff is in flight.
    pub fn idr_in_progress(&self) -> bool {
        self.idr_pic_flag
    }

    /// Drive the dispatch loop to completion.
    ///
    /// Returns the final counters on success. The loop stops once
    /// `picture_number` IDR pictures have been produced or the map is
    /// exhausted; an exhausted map still counts as success when at
    /// least one picture (or a zero request) came out. It stops with an
    /// error when a fatal condition occurs or more than
    /// [`MAX_DECODE_ERRORS`] consecutive recoverable errors accumulate.
    pub fn run(
        &mut self,
        decoder: &mut dyn SliceDecoder,
        sink: &mut dyn PictureSink,
    ) -> Result<RunCounters, Error> {
        self.running = true;

        while self.running && (self.counters.idr_count as usize) < self.picture_number {
            let fed = match self.feeder.feed_next_sample() {
                Ok(Some(index)) => index,
                Ok(None) => break,
                Err(e) if e.is_fatal() => {
                    self.running = false;
                    return Err(e);
                }
                Err(e) => {
                    self.note_recoverable(&e)?;
                    continue;
                }
            };

            let sample = self.feeder.current_sample().clone();
            let nals: Vec<Vec<u8>> = self
                .feeder
                .current_nal_units()
                .into_iter()
                .map(<[u8]>::to_vec)
                .collect();
            self.feeder.reset_buffer();

            if nals.is_empty() {
                self.note_recoverable(&Error::Bitstream(format!(
                    "sample {fed} contains no nal units"
                )))?;
                continue;
            }

            for nal in &nals {
                match self.handle_nal(nal, &sample, decoder, sink) {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => {
                        self.running = false;
                        return Err(e);
                    }
                    Err(e) => self.note_recoverable(&e)?,
                }
                if self.counters.idr_count as usize == self.picture_number {
                    break;
                }
            }
        }

        self.running = false;

        if self.picture_number > 0 && self.counters.idr_count == 0 {
            return Err(Error::NoPicturesProduced {
                requested: self.picture_number,
            });
        }
        if (self.counters.idr_count as usize) < self.picture_number {
            // Some slices were skipped but at least one picture came
            // out; the run still counts as a success.
            warn!(
                target: "keysnap::decode",
                produced = self.counters.idr_count,
                requested = self.picture_number,
                "stream exhausted before full request"
            );
        }

        debug!(
            target: "keysnap::decode",
            idr = self.counters.idr_count,
            frames = self.counters.frame_count,
            "dispatch loop finished"
        );
        Ok(self.counters)
    }

    fn note_recoverable(&mut self, e: &Error) -> Result<(), Error> {
        warn!(target: "keysnap::decode", error = %e, "recoverable decode error");
        self.counters.error_count += 1;
        if self.counters.error_count > MAX_DECODE_ERRORS {
            self.running = false;
            return Err(Error::ErrorBudgetExhausted {
                errors: self.counters.error_count,
            });
        }
        Ok(())
    }

    fn handle_nal(
        &mut self,
        nal: &[u8],
        sample: &Sample,
        decoder: &mut dyn SliceDecoder,
        sink: &mut dyn PictureSink,
    ) -> Result<(), Error> {
        let header = NalHeader::parse(nal)?;

        match header.unit_type {
            NalUnitType::Sps => {
                let rbsp = strip_emulation_prevention(&nal[1..]);
                let id = self.cache.put_sps(Sps::parse(&rbsp)?);
                debug!(target: "keysnap::decode", id, "sps cached");
                Ok(())
            }
            NalUnitType::Pps => {
                let rbsp = strip_emulation_prevention(&nal[1..]);
                let id = self.cache.put_pps(Pps::parse(&rbsp)?);
                debug!(target: "keysnap::decode", id, "pps cached");
                Ok(())
            }
            NalUnitType::Sei => {
                let rbsp = strip_emulation_prevention(&nal[1..]);
                self.active_sei = parse_sei_rbsp(&rbsp);
                Ok(())
            }
            NalUnitType::IdrSlice => self.decode_idr(header, nal, sample, decoder, sink),
            NalUnitType::NonIdrSlice => {
                Err(Error::Unsupported("non-idr slice skipped".into()))
            }
            other => Err(Error::Unsupported(format!("nal unit type {other:?}"))),
        }
    }

    fn decode_idr(
        &mut self,
        header: NalHeader,
        nal: &[u8],
        sample: &Sample,
        decoder: &mut dyn SliceDecoder,
        sink: &mut dyn PictureSink,
    ) -> Result<(), Error> {
        self.idr_pic_flag = true;
        let result = self.decode_idr_inner(header, nal, sample, decoder, sink);
        self.idr_pic_flag = false;
        result?;

        self.counters.idr_count += 1;
        self.counters.frame_count += 1;
        self.counters.error_count = 0;
        Ok(())
    }

    fn decode_idr_inner(
        &mut self,
        header: NalHeader,
        nal: &[u8],
        sample: &Sample,
        decoder: &mut dyn SliceDecoder,
        sink: &mut dyn PictureSink,
    ) -> Result<(), Error> {
        let rbsp = strip_emulation_prevention(&nal[1..]);

        // Referential integrity gate: the slice's PPS and that PPS's SPS
        // must both be cached before any pixel work starts.
        let pps_id = SliceHeader::peek_pps_id(&rbsp)?;
        let (sps, pps) = self.cache.resolve(pps_id)?;
        let slice_header = SliceHeader::parse(&rbsp, header, sps, pps)?;

        let ctx = SliceContext {
            sps,
            pps,
            header: &slice_header,
            rbsp: &rbsp,
            quant: &self.quant,
            sei: &self.active_sei,
        };
        let picture = decoder.decode_idr(&ctx)?;

        let meta = PictureMeta {
            index: self.counters.idr_count as usize,
            pts: sample.pts,
            dts: sample.dts,
            timescale: self.feeder.map().timescale,
        };
        sink.write_picture(&picture, &meta)
    }
}
