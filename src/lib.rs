//! `keysnap` extracts keyframe thumbnails from MP4 files.
//!
//! The crate demuxes an ISO-BMFF container into per-track sample maps,
//! selects a spread of IDR keyframes, and drives an H.264 NAL dispatcher
//! over them: parameter sets are parsed and cached, their references
//! validated, and each IDR slice handed to a pluggable slice decoder.
//! Decoded pictures leave through a pluggable picture sink; a file
//! writer backed by the `image` crate ships in [`writer`].
//!
//! ## Quick start (sync)
//! - Run the whole pipeline with [`extract_from_path`], supplying a
//!   [`SliceDecoder`] and a [`PictureSink`].
//! - Or inspect the selected keyframes without decoding via
//!   [`scanner_from_path`] and iterate the returned [`KeyframeScanner`].
//!
//! ## Quick start (async)
//! - Use [`keyframes_from_path`] to get a Tokio `Stream` of keyframe
//!   events.
//!
//! ## Features
//! - `async` (default): enables Tokio stream helpers.

pub mod error;

mod bitstream;
mod filter;
mod mp4;
mod nal;
mod params;
mod pps;
mod quant;
mod sample;
mod sei;
mod slice;
mod sps;

pub mod decode;
pub mod extract;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_extract;

pub use bitstream::{BitReader, NalFraming, SampleFeeder};
pub use decode::{
    DecodedPicture, DecodingContext, DiscardSink, PictureMeta, PictureSink, PixelFormat,
    ProbeDecoder, RunCounters, SliceContext, SliceDecoder, MAX_DECODE_ERRORS,
};
pub use error::Error;
pub use extract::{
    extract_from_path, extract_from_reader, for_each_keyframe, scanner_from_path,
    scanner_from_reader, ExtractionConfig, ExtractionSummary, KeyframeInfo, KeyframeScanner,
};
pub use filter::{filter_idr, ExtractionMode};
pub use mp4::{parse_mp4, Mp4, ParameterSetBlob, SampleTables, StscEntry, Track, TrackCodec};
pub use nal::{NalHeader, NalUnitType};
pub use params::{ParameterSetCache, MAX_PPS, MAX_SPS};
pub use pps::Pps;
pub use quant::QuantTables;
pub use sample::{Sample, SampleKind, SampleMap};
pub use sei::{parse_sei_rbsp, SeiMessage};
pub use slice::{SliceHeader, SliceType};
pub use sps::Sps;
pub use writer::{ImageFileWriter, OutputFormat};

#[cfg(feature = "async")]
pub use async_extract::{keyframes_from_path, keyframes_from_reader};
