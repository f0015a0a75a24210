use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Passthrough for IO errors (open/read/seek).
    #[error(transparent)]
    Io(#[from] io::Error),

    /// No AVC video track with usable sample tables was found in the MP4.
    #[error("no decodable video tracks found")]
    NoVideoTrack,

    /// MP4 structure is malformed or violates expected ISO-BMFF invariants.
    #[error("mp4 parse error in {context}: box {box_type} at offset {offset}: {message}")]
    InvalidBox {
        context: String,
        box_type: String,
        offset: u64,
        message: String,
    },

    /// A mandatory box is absent from its container.
    #[error("mp4 missing required box {box_type} in {context}")]
    MissingBox {
        context: &'static str,
        box_type: &'static str,
    },

    /// Required sample tables for extraction are missing from stbl.
    #[error("mp4 missing required sample tables: {missing}")]
    MissingSampleTables { missing: String },

    /// MP4 sample tables are internally inconsistent.
    #[error(
        "mp4 inconsistent sample tables: sample_sizes={sample_sizes} derived_offsets={sample_offsets} chunk_offsets={chunk_offsets}"
    )]
    InconsistentSampleTables {
        sample_sizes: usize,
        sample_offsets: usize,
        chunk_offsets: usize,
    },

    /// NAL header or RBSP syntax violation (bad Exp-Golomb code, truncation).
    #[error("malformed bitstream: {0}")]
    Bitstream(String),

    /// SPS syntax or range violation.
    #[error("malformed sps: {0}")]
    Sps(String),

    /// PPS syntax or range violation.
    #[error("malformed pps: {0}")]
    Pps(String),

    /// Slice header syntax or range violation.
    #[error("malformed slice header: {0}")]
    Slice(String),

    /// Slice references a PPS slot that was never populated.
    #[error("slice references missing pps {0}")]
    MissingPps(u8),

    /// PPS references an SPS slot that was never populated.
    #[error("pps references missing sps {0}")]
    MissingSps(u8),

    /// Stream uses a feature outside the supported subset.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Consecutive-error budget exhausted; the run is abandoned.
    #[error("decode error budget exhausted after {errors} consecutive errors")]
    ErrorBudgetExhausted { errors: u32 },

    /// The stream ran dry before a single requested picture came out.
    #[error("stream exhausted without producing any of the {requested} requested pictures")]
    NoPicturesProduced { requested: usize },
}

impl Error {
    /// Whether this error aborts the whole run, as opposed to being
    /// charged against the dispatcher's consecutive-error budget.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Io(_)
            | Error::NoVideoTrack
            | Error::InvalidBox { .. }
            | Error::MissingBox { .. }
            | Error::MissingSampleTables { .. }
            | Error::InconsistentSampleTables { .. }
            | Error::ErrorBudgetExhausted { .. }
            | Error::NoPicturesProduced { .. } => true,
            Error::Bitstream(_)
            | Error::Sps(_)
            | Error::Pps(_)
            | Error::Slice(_)
            | Error::MissingPps(_)
            | Error::MissingSps(_)
            | Error::Unsupported(_) => false,
        }
    }
}
