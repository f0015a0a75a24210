use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use tracing::{debug, info};

use crate::bitstream::SampleFeeder;
use crate::decode::{DecodingContext, PictureSink, RunCounters, SliceDecoder};
use crate::filter::{filter_idr, ExtractionMode};
use crate::mp4::{parse_mp4, Track, TrackCodec};
use crate::nal::{NalHeader, NalUnitType};
use crate::sample::{SampleKind, SampleMap};
use crate::Error;

/// Run parameters for one extraction.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionConfig {
    /// How many keyframes to decode (clamped to what the stream offers).
    pub picture_number: usize,
    pub mode: ExtractionMode,
}

/// What an extraction run produced.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionSummary {
    /// The post-filter request actually attempted.
    pub requested: usize,
    pub counters: RunCounters,
    pub track_id: u32,
    pub timescale: u32,
}

/// One selected keyframe as seen by the report scanner.
#[derive(Debug, Clone)]
pub struct KeyframeInfo {
    /// 0-based output order among the selected keyframes.
    pub index: usize,
    pub file_offset: u64,
    pub size: u32,
    pub pts: i64,
    pub dts: i64,
    /// Whether the sample's first VCL NAL parses as an IDR slice.
    pub idr_nal: bool,
}

/// Pick the AVC video track with the most samples.
///
/// Files sometimes carry several video tracks (previews, thumbnails);
/// the densest one is the main programme.
fn select_video_track(tracks: &[Track]) -> Result<&Track, Error> {
    tracks
        .iter()
        .filter(|t| t.is_video() && matches!(t.codec, TrackCodec::Avc { .. }))
        .max_by_key(|t| t.sample_count())
        .ok_or(Error::NoVideoTrack)
}

/// Demux `reader`, select keyframes per `config`, and drive the NAL
/// dispatcher with the supplied collaborators.
pub fn extract_from_reader<R: Read + Seek>(
    mut reader: R,
    config: ExtractionConfig,
    decoder: &mut dyn SliceDecoder,
    sink: &mut dyn PictureSink,
) -> Result<ExtractionSummary, Error> {
    let mp4 = parse_mp4(&mut reader)?;
    let track = select_video_track(&mp4.tracks)?;
    let map = SampleMap::from_track(track)?;

    debug!(
        target: "keysnap::extract",
        track_id = track.track_id,
        samples = map.sample_count(),
        idr = map.idr_count(),
        "track selected"
    );

    let (map, requested) = filter_idr(map, config.picture_number, config.mode);
    let track_id = map.track_id;
    let timescale = map.timescale;

    let mut ctx = DecodingContext::new(reader, map, requested);
    let counters = ctx.run(decoder, sink)?;

    info!(
        target: "keysnap::extract",
        requested,
        produced = counters.idr_count,
        "extraction finished"
    );

    Ok(ExtractionSummary {
        requested,
        counters,
        track_id,
        timescale,
    })
}

/// Convenience wrapper over [`extract_from_reader`] for a file on disk.
pub fn extract_from_path(
    path: impl AsRef<Path>,
    config: ExtractionConfig,
    decoder: &mut dyn SliceDecoder,
    sink: &mut dyn PictureSink,
) -> Result<ExtractionSummary, Error> {
    let file = File::open(path)?;
    extract_from_reader(file, config, decoder, sink)
}

/// Streaming inspector over the selected keyframes.
///
/// Yields one [`KeyframeInfo`] per selected IDR sample without running
/// the slice decoder; useful for reports and scrub-style UIs. Implements
/// `Iterator<Item = Result<KeyframeInfo, Error>>`.
pub struct KeyframeScanner<R: Read + Seek> {
    feeder: SampleFeeder<R>,
    selected: usize,
    yielded: usize,
}

/// Create a scanner from an on-disk MP4 path.
pub fn scanner_from_path(
    path: impl AsRef<Path>,
    config: ExtractionConfig,
) -> Result<KeyframeScanner<File>, Error> {
    let file = File::open(path)?;
    scanner_from_reader(file, config)
}

/// Create a scanner from any seekable reader.
pub fn scanner_from_reader<R: Read + Seek>(
    mut reader: R,
    config: ExtractionConfig,
) -> Result<KeyframeScanner<R>, Error> {
    let mp4 = parse_mp4(&mut reader)?;
    let track = select_video_track(&mp4.tracks)?;
    let map = SampleMap::from_track(track)?;
    let (map, selected) = filter_idr(map, config.picture_number, config.mode);

    Ok(KeyframeScanner {
        feeder: SampleFeeder::new(reader, map),
        selected,
        yielded: 0,
    })
}

impl<R: Read + Seek> KeyframeScanner<R> {
    /// Number of keyframes the filter retained.
    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn map(&self) -> &SampleMap {
        self.feeder.map()
    }
}

impl<R: Read + Seek> Iterator for KeyframeScanner<R> {
    type Item = Result<KeyframeInfo, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.feeder.feed_next_sample() {
                Ok(Some(_)) => {}
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            }

            let sample = self.feeder.current_sample().clone();
            if sample.kind != SampleKind::Idr {
                self.feeder.reset_buffer();
                continue;
            }

            let idr_nal = self
                .feeder
                .current_nal_units()
                .into_iter()
                .filter_map(|n| NalHeader::parse(n).ok())
                .find(|h| h.is_vcl())
                .is_some_and(|h| h.unit_type == NalUnitType::IdrSlice);
            self.feeder.reset_buffer();

            let info = KeyframeInfo {
                index: self.yielded,
                file_offset: sample.offset,
                size: sample.size,
                pts: sample.pts,
                dts: sample.dts,
                idr_nal,
            };
            self.yielded += 1;
            return Some(Ok(info));
        }
    }
}

/// Convenience helper that scans all selected keyframes and invokes a
/// callback per entry.
pub fn for_each_keyframe<R: Read + Seek>(
    reader: R,
    config: ExtractionConfig,
    mut f: impl FnMut(KeyframeInfo) -> Result<(), Error>,
) -> Result<(), Error> {
    let mut scanner = scanner_from_reader(reader, config)?;
    for info in &mut scanner {
        f(info?)?;
    }
    Ok(())
}
