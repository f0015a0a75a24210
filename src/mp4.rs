use std::io::{self, Read, Seek, SeekFrom};

use tracing::{debug, trace, warn};

use crate::Error;

// -----------------------------
// MP4 parsing (minimal ISO-BMFF)
// -----------------------------

/// Sanity cap on table entry counts so a corrupt length field cannot
/// drive a giant allocation.
const MAX_ENTRY_COUNT: u32 = 10_000_000;

/// Raw stbl tables for one track, as read from the file. Resolution
/// into per-sample offsets/timestamps happens in `sample`.
#[derive(Debug, Clone, Default)]
pub struct SampleTables {
    /// stsz/stz2 per-sample sizes (already expanded if uniform).
    pub sample_sizes: Vec<u32>,
    /// stco/co64 chunk byte offsets.
    pub chunk_offsets: Vec<u64>,
    /// stsc chunk-grouping runs.
    pub stsc: Vec<StscEntry>,
    /// stts (sample_count, sample_delta) runs.
    pub stts: Vec<(u32, u32)>,
    /// ctts (sample_count, composition_offset) runs, when present.
    pub ctts: Vec<(u32, i32)>,
    /// stss 1-based sync sample numbers; `None` means every sample is a
    /// sync point.
    pub stss: Option<Vec<u32>>,
}

#[derive(Debug, Clone)]
pub struct StscEntry {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

/// An in-band parameter set from avcC: its bytes plus the absolute file
/// region they came from, so the sample feeder can re-read them like any
/// other sample.
#[derive(Debug, Clone)]
pub struct ParameterSetBlob {
    pub offset: u64,
    pub size: u32,
    pub data: Vec<u8>,
}

/// Decoder configuration for the track's sample entry.
#[derive(Debug, Clone)]
pub enum TrackCodec {
    Avc {
        /// NAL length-prefix size in bytes (avcC lengthSizeMinusOne + 1).
        length_size: usize,
        profile_idc: u8,
        level_idc: u8,
        sps: Vec<ParameterSetBlob>,
        pps: Vec<ParameterSetBlob>,
    },
    Other([u8; 4]),
}

impl TrackCodec {
    pub fn fourcc(&self) -> String {
        match self {
            TrackCodec::Avc { .. } => "avc1".to_string(),
            TrackCodec::Other(t) => fourcc_to_string(*t),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Track {
    pub track_id: u32,
    pub handler: [u8; 4],
    /// Media timescale in units per second (mdhd).
    pub timescale: u32,
    /// Media duration in timescale units (mdhd).
    pub duration: u64,
    /// Presentation size from tkhd, integer part of the 16.16 fields.
    pub width: u32,
    pub height: u32,
    pub codec: TrackCodec,
    pub tables: SampleTables,
}

impl Track {
    pub fn is_video(&self) -> bool {
        self.handler == *b"vide"
    }

    pub fn sample_count(&self) -> usize {
        self.tables.sample_sizes.len()
    }

    /// Mean bitrate over the media duration, in bits per second.
    pub fn bitrate(&self) -> u64 {
        if self.duration == 0 || self.timescale == 0 {
            return 0;
        }
        let bytes: u64 = self.tables.sample_sizes.iter().map(|&s| s as u64).sum();
        bytes * 8 * self.timescale as u64 / self.duration
    }
}

#[derive(Debug)]
pub struct Mp4 {
    /// Major brand from ftyp.
    pub brand: [u8; 4],
    pub tracks: Vec<Track>,
    /// (start, end) byte spans of every mdat payload.
    pub mdat_spans: Vec<(u64, u64)>,
}

impl Mp4 {
    pub fn video_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.is_video())
    }
}

fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

fn read_be_u16<R: Read>(r: &mut R) -> io::Result<u16> {
    let mut b = [0u8; 2];
    r.read_exact(&mut b)?;
    Ok(u16::from_be_bytes(b))
}

fn read_be_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_be_bytes(b))
}

fn read_be_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_be_bytes(b))
}

fn fourcc(s: &str) -> [u8; 4] {
    let b = s.as_bytes();
    [b[0], b[1], b[2], b[3]]
}

pub(crate) fn fourcc_to_string(t: [u8; 4]) -> String {
    // Best-effort display for diagnostics.
    t.iter()
        .map(|&c| if c.is_ascii_graphic() { c as char } else { '.' })
        .collect()
}

#[derive(Debug, Clone)]
struct BoxHeader {
    typ: [u8; 4],
    size: u64,
    header_len: u64,
}

fn read_box_header<R: Read>(r: &mut R) -> io::Result<BoxHeader> {
    let size32 = read_be_u32(r)? as u64;
    let mut typ = [0u8; 4];
    r.read_exact(&mut typ)?;
    let (size, mut header_len) = if size32 == 1 {
        (read_be_u64(r)?, 16)
    } else {
        (size32, 8)
    };
    if typ == *b"uuid" {
        // 16-byte extended type; nothing we recognize uses it, but the
        // payload boundary must account for it.
        let mut ext = [0u8; 16];
        r.read_exact(&mut ext)?;
        header_len += 16;
    }
    Ok(BoxHeader {
        typ,
        size,
        header_len,
    })
}

fn safe_box_end(ctx: &str, start: u64, hdr: &BoxHeader, limit: u64) -> Result<u64, Error> {
    // ISO-BMFF: size==0 means "extends to end of file" (or end of the
    // containing box).
    let mut size = hdr.size;
    if size == 0 {
        size = limit.saturating_sub(start);
    }
    if size < hdr.header_len {
        return Err(Error::InvalidBox {
            context: ctx.to_string(),
            box_type: fourcc_to_string(hdr.typ),
            offset: start,
            message: format!("size {size} < header_len {}", hdr.header_len),
        });
    }

    let end = start.saturating_add(size);
    if end > limit {
        return Err(Error::InvalidBox {
            context: ctx.to_string(),
            box_type: fourcc_to_string(hdr.typ),
            offset: start,
            message: format!("end {end} overruns container limit {limit}"),
        });
    }
    if end <= start {
        return Err(Error::InvalidBox {
            context: ctx.to_string(),
            box_type: fourcc_to_string(hdr.typ),
            offset: start,
            message: format!("non-advancing end {end}"),
        });
    }
    Ok(end)
}

fn checked_entry_count(ctx: &str, count: u32) -> Result<u32, Error> {
    if count > MAX_ENTRY_COUNT {
        return Err(Error::InvalidBox {
            context: ctx.to_string(),
            box_type: ctx.to_string(),
            offset: 0,
            message: format!("entry count {count} exceeds sanity cap"),
        });
    }
    Ok(count)
}

/// Parse the top-level box hierarchy of an MP4 file.
///
/// `ftyp` must precede `moov`; `moov` itself is mandatory. Unknown boxes
/// are skipped and never fail the parse.
pub fn parse_mp4<R: Read + Seek>(f: &mut R) -> Result<Mp4, Error> {
    let file_len = f.seek(SeekFrom::End(0))?;
    let mut pos = 0u64;

    let mut brand: Option<[u8; 4]> = None;
    let mut tracks: Vec<Track> = Vec::new();
    let mut mdat_spans: Vec<(u64, u64)> = Vec::new();
    let mut saw_moov = false;

    while pos + 8 <= file_len {
        f.seek(SeekFrom::Start(pos))?;
        let hdr = read_box_header(f)?;
        let start = pos;
        let end = safe_box_end("top", start, &hdr, file_len)?;
        let payload_start = start + hdr.header_len;
        trace!(
            target: "keysnap::mp4",
            box_type = %fourcc_to_string(hdr.typ),
            start,
            end,
            "top-level box"
        );

        match hdr.typ {
            t if t == fourcc("ftyp") => {
                f.seek(SeekFrom::Start(payload_start))?;
                let mut b = [0u8; 4];
                f.read_exact(&mut b)?;
                brand = Some(b);
            }
            t if t == fourcc("moov") => {
                if brand.is_none() {
                    return Err(Error::InvalidBox {
                        context: "top".to_string(),
                        box_type: "moov".to_string(),
                        offset: start,
                        message: "moov before ftyp".to_string(),
                    });
                }
                saw_moov = true;
                parse_moov(f, payload_start, end, &mut tracks)?;
            }
            t if t == fourcc("mdat") => {
                mdat_spans.push((payload_start, end));
            }
            _ => {}
        }

        pos = end;
    }

    if !saw_moov {
        return Err(Error::MissingBox {
            context: "top",
            box_type: "moov",
        });
    }

    debug!(
        target: "keysnap::mp4",
        tracks = tracks.len(),
        mdat_spans = mdat_spans.len(),
        "container parsed"
    );

    Ok(Mp4 {
        brand: brand.unwrap_or(*b"????"),
        tracks,
        mdat_spans,
    })
}

fn parse_moov<R: Read + Seek>(
    f: &mut R,
    mut pos: u64,
    end: u64,
    tracks: &mut Vec<Track>,
) -> Result<(), Error> {
    while pos + 8 <= end {
        f.seek(SeekFrom::Start(pos))?;
        let hdr = read_box_header(f)?;
        let start = pos;
        let box_end = safe_box_end("moov", start, &hdr, end)?;
        let payload_start = start + hdr.header_len;

        match hdr.typ {
            t if t == fourcc("trak") => match parse_trak(f, payload_start, box_end) {
                Ok(t) => tracks.push(t),
                Err(
                    e @ (Error::MissingBox { .. } | Error::MissingSampleTables { .. }),
                ) => {
                    // A track without its mandatory boxes is unusable,
                    // but does not invalidate its siblings.
                    warn!(target: "keysnap::mp4", error = %e, "skipping unusable track");
                }
                Err(e) => return Err(e),
            },
            t if t == fourcc("udta") || t == fourcc("meco") => {
                walk_container(f, "moov", payload_start, box_end)?;
            }
            _ => {}
        }

        pos = box_end;
    }
    Ok(())
}

/// Recurse a container whose children we keep nothing from, so that
/// malformed child sizes still abort the enclosing parse.
fn walk_container<R: Read + Seek>(
    f: &mut R,
    ctx: &'static str,
    mut pos: u64,
    end: u64,
) -> Result<(), Error> {
    while pos + 8 <= end {
        f.seek(SeekFrom::Start(pos))?;
        let hdr = read_box_header(f)?;
        trace!(
            target: "keysnap::mp4",
            context = ctx,
            box_type = %fourcc_to_string(hdr.typ),
            pos,
            "container child"
        );
        pos = safe_box_end(ctx, pos, &hdr, end)?;
    }
    Ok(())
}

fn parse_trak<R: Read + Seek>(f: &mut R, mut pos: u64, end: u64) -> Result<Track, Error> {
    let mut header: Option<(u32, u32, u32)> = None;
    let mut mdia: Option<(u32, u64, [u8; 4], TrackCodec, SampleTables)> = None;

    while pos + 8 <= end {
        f.seek(SeekFrom::Start(pos))?;
        let hdr = read_box_header(f)?;
        let start = pos;
        let box_end = safe_box_end("trak", start, &hdr, end)?;
        let payload_start = start + hdr.header_len;

        match hdr.typ {
            t if t == fourcc("tkhd") => {
                header = Some(parse_tkhd(f, payload_start)?);
            }
            t if t == fourcc("mdia") => {
                mdia = Some(parse_mdia(f, payload_start, box_end)?);
            }
            t if t == fourcc("edts") || t == fourcc("udta") => {
                walk_container(f, "trak", payload_start, box_end)?;
            }
            _ => {}
        }

        pos = box_end;
    }

    let (track_id, width, height) = header.ok_or(Error::MissingBox {
        context: "trak",
        box_type: "tkhd",
    })?;
    let (timescale, duration, handler, codec, tables) = mdia.ok_or(Error::MissingBox {
        context: "trak",
        box_type: "mdia",
    })?;

    Ok(Track {
        track_id,
        handler,
        timescale,
        duration,
        width,
        height,
        codec,
        tables,
    })
}

fn parse_tkhd<R: Read + Seek>(f: &mut R, payload_start: u64) -> Result<(u32, u32, u32), Error> {
    f.seek(SeekFrom::Start(payload_start))?;
    let version_flags = read_be_u32(f)?;
    let version = (version_flags >> 24) as u8;
    // creation + modification times precede the track id.
    let time_len = if version == 1 { 16 } else { 8 };
    f.seek(SeekFrom::Current(time_len))?;
    let track_id = read_be_u32(f)?;

    // reserved(4) + duration + reserved(8) + layer/alternate_group/
    // volume/reserved(8) + matrix(36), then the 16.16 dimensions.
    let duration_len = if version == 1 { 8 } else { 4 };
    f.seek(SeekFrom::Current(4 + duration_len + 8 + 8 + 36))?;
    let width = read_be_u32(f)? >> 16;
    let height = read_be_u32(f)? >> 16;

    Ok((track_id, width, height))
}

type MdiaParts = (u32, u64, [u8; 4], TrackCodec, SampleTables);

fn parse_mdia<R: Read + Seek>(f: &mut R, mut pos: u64, end: u64) -> Result<MdiaParts, Error> {
    let mut timing: Option<(u32, u64)> = None;
    let mut handler: Option<[u8; 4]> = None;
    let mut stbl: Option<(TrackCodec, SampleTables)> = None;

    while pos + 8 <= end {
        f.seek(SeekFrom::Start(pos))?;
        let hdr = read_box_header(f)?;
        let start = pos;
        let box_end = safe_box_end("mdia", start, &hdr, end)?;
        let payload_start = start + hdr.header_len;

        match hdr.typ {
            t if t == fourcc("mdhd") => {
                timing = Some(parse_mdhd(f, payload_start)?);
            }
            t if t == fourcc("hdlr") => {
                // hdlr: version/flags (4) + pre_defined (4) + handler_type (4)
                f.seek(SeekFrom::Start(payload_start + 8))?;
                let mut ht = [0u8; 4];
                f.read_exact(&mut ht)?;
                handler = Some(ht);
            }
            t if t == fourcc("minf") => {
                stbl = parse_minf(f, payload_start, box_end)?;
            }
            _ => {}
        }

        pos = box_end;
    }

    let (timescale, duration) = timing.ok_or(Error::MissingBox {
        context: "mdia",
        box_type: "mdhd",
    })?;
    let handler = handler.ok_or(Error::MissingBox {
        context: "mdia",
        box_type: "hdlr",
    })?;
    let (codec, tables) = stbl.ok_or(Error::MissingBox {
        context: "mdia",
        box_type: "stbl",
    })?;

    Ok((timescale, duration, handler, codec, tables))
}

fn parse_mdhd<R: Read + Seek>(f: &mut R, payload_start: u64) -> Result<(u32, u64), Error> {
    f.seek(SeekFrom::Start(payload_start))?;
    let version_flags = read_be_u32(f)?;
    let version = (version_flags >> 24) as u8;
    if version == 1 {
        f.seek(SeekFrom::Current(16))?;
        let timescale = read_be_u32(f)?;
        let duration = read_be_u64(f)?;
        Ok((timescale, duration))
    } else {
        f.seek(SeekFrom::Current(8))?;
        let timescale = read_be_u32(f)?;
        let duration = read_be_u32(f)? as u64;
        Ok((timescale, duration))
    }
}

fn parse_minf<R: Read + Seek>(
    f: &mut R,
    mut pos: u64,
    end: u64,
) -> Result<Option<(TrackCodec, SampleTables)>, Error> {
    let mut stbl = None;

    while pos + 8 <= end {
        f.seek(SeekFrom::Start(pos))?;
        let hdr = read_box_header(f)?;
        let start = pos;
        let box_end = safe_box_end("minf", start, &hdr, end)?;
        let payload_start = start + hdr.header_len;

        match hdr.typ {
            t if t == fourcc("stbl") => {
                stbl = Some(parse_stbl(f, payload_start, box_end)?);
            }
            t if t == fourcc("dinf") => {
                walk_container(f, "minf", payload_start, box_end)?;
            }
            _ => {}
        }

        pos = box_end;
    }
    Ok(stbl)
}

fn parse_stbl<R: Read + Seek>(
    f: &mut R,
    mut pos: u64,
    end: u64,
) -> Result<(TrackCodec, SampleTables), Error> {
    let mut codec: Option<TrackCodec> = None;
    let mut sample_sizes: Option<Vec<u32>> = None;
    let mut chunk_offsets: Option<Vec<u64>> = None;
    let mut stsc: Option<Vec<StscEntry>> = None;
    let mut stts: Option<Vec<(u32, u32)>> = None;
    let mut ctts: Vec<(u32, i32)> = Vec::new();
    let mut stss: Option<Vec<u32>> = None;

    while pos + 8 <= end {
        f.seek(SeekFrom::Start(pos))?;
        let hdr = read_box_header(f)?;
        let start = pos;
        let box_end = safe_box_end("stbl", start, &hdr, end)?;
        let payload_start = start + hdr.header_len;

        match hdr.typ {
            t if t == fourcc("stsd") => {
                codec = Some(parse_stsd(f, payload_start, box_end)?);
            }
            t if t == fourcc("stsz") => {
                sample_sizes = Some(parse_stsz(f, payload_start)?);
            }
            t if t == fourcc("stz2") => {
                sample_sizes = Some(parse_stz2(f, payload_start)?);
            }
            t if t == fourcc("stco") => {
                chunk_offsets = Some(parse_stco(f, payload_start)?);
            }
            t if t == fourcc("co64") => {
                chunk_offsets = Some(parse_co64(f, payload_start)?);
            }
            t if t == fourcc("stsc") => {
                stsc = Some(parse_stsc(f, payload_start)?);
            }
            t if t == fourcc("stts") => {
                stts = Some(parse_stts(f, payload_start)?);
            }
            t if t == fourcc("ctts") => {
                ctts = parse_ctts(f, payload_start)?;
            }
            t if t == fourcc("stss") => {
                stss = Some(parse_stss(f, payload_start)?);
            }
            _ => {}
        }

        pos = box_end;
    }

    let mut missing: Vec<&'static str> = Vec::new();
    if codec.is_none() {
        missing.push("stsd");
    }
    if sample_sizes.is_none() {
        missing.push("stsz/stz2");
    }
    if chunk_offsets.is_none() {
        missing.push("stco/co64");
    }
    if stsc.is_none() {
        missing.push("stsc");
    }
    if stts.is_none() {
        missing.push("stts");
    }
    if !missing.is_empty() {
        return Err(Error::MissingSampleTables {
            missing: missing.join(", "),
        });
    }

    Ok((
        codec.unwrap(),
        SampleTables {
            sample_sizes: sample_sizes.unwrap(),
            chunk_offsets: chunk_offsets.unwrap(),
            stsc: stsc.unwrap(),
            stts: stts.unwrap(),
            ctts,
            stss,
        },
    ))
}

fn parse_stsz<R: Read + Seek>(f: &mut R, payload_start: u64) -> Result<Vec<u32>, Error> {
    f.seek(SeekFrom::Start(payload_start))?;
    let _version_flags = read_be_u32(f)?;
    let sample_size = read_be_u32(f)?;
    let sample_count = checked_entry_count("stsz", read_be_u32(f)?)?;
    let mut sizes = Vec::with_capacity(sample_count as usize);

    if sample_size != 0 {
        sizes.resize(sample_count as usize, sample_size);
        return Ok(sizes);
    }

    for _ in 0..sample_count {
        sizes.push(read_be_u32(f)?);
    }
    Ok(sizes)
}

fn parse_stz2<R: Read + Seek>(f: &mut R, payload_start: u64) -> Result<Vec<u32>, Error> {
    f.seek(SeekFrom::Start(payload_start))?;
    let _version_flags = read_be_u32(f)?;
    let field_size = read_be_u32(f)? & 0xFF;
    let sample_count = checked_entry_count("stz2", read_be_u32(f)?)?;
    let mut sizes = Vec::with_capacity(sample_count as usize);

    match field_size {
        4 => {
            let mut i = 0;
            while i < sample_count {
                let b = read_u8(f)?;
                sizes.push((b >> 4) as u32);
                i += 1;
                if i < sample_count {
                    sizes.push((b & 0x0F) as u32);
                    i += 1;
                }
            }
        }
        8 => {
            for _ in 0..sample_count {
                sizes.push(read_u8(f)? as u32);
            }
        }
        16 => {
            for _ in 0..sample_count {
                sizes.push(read_be_u16(f)? as u32);
            }
        }
        other => {
            return Err(Error::InvalidBox {
                context: "stbl".to_string(),
                box_type: "stz2".to_string(),
                offset: payload_start,
                message: format!("field size {other} not in {{4, 8, 16}}"),
            });
        }
    }
    Ok(sizes)
}

fn parse_stco<R: Read + Seek>(f: &mut R, payload_start: u64) -> Result<Vec<u64>, Error> {
    f.seek(SeekFrom::Start(payload_start))?;
    let _version_flags = read_be_u32(f)?;
    let count = checked_entry_count("stco", read_be_u32(f)?)?;
    let mut v = Vec::with_capacity(count as usize);
    for _ in 0..count {
        v.push(read_be_u32(f)? as u64);
    }
    Ok(v)
}

fn parse_co64<R: Read + Seek>(f: &mut R, payload_start: u64) -> Result<Vec<u64>, Error> {
    f.seek(SeekFrom::Start(payload_start))?;
    let _version_flags = read_be_u32(f)?;
    let count = checked_entry_count("co64", read_be_u32(f)?)?;
    let mut v = Vec::with_capacity(count as usize);
    for _ in 0..count {
        v.push(read_be_u64(f)?);
    }
    Ok(v)
}

fn parse_stsc<R: Read + Seek>(f: &mut R, payload_start: u64) -> Result<Vec<StscEntry>, Error> {
    f.seek(SeekFrom::Start(payload_start))?;
    let _version_flags = read_be_u32(f)?;
    let count = checked_entry_count("stsc", read_be_u32(f)?)?;
    let mut v = Vec::with_capacity(count as usize);
    for _ in 0..count {
        v.push(StscEntry {
            first_chunk: read_be_u32(f)?,
            samples_per_chunk: read_be_u32(f)?,
            sample_description_index: read_be_u32(f)?,
        });
    }
    Ok(v)
}

fn parse_stts<R: Read + Seek>(f: &mut R, payload_start: u64) -> Result<Vec<(u32, u32)>, Error> {
    f.seek(SeekFrom::Start(payload_start))?;
    let _version_flags = read_be_u32(f)?;
    let count = checked_entry_count("stts", read_be_u32(f)?)?;
    let mut v = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let sample_count = read_be_u32(f)?;
        let delta = read_be_u32(f)?;
        v.push((sample_count, delta));
    }
    Ok(v)
}

fn parse_ctts<R: Read + Seek>(f: &mut R, payload_start: u64) -> Result<Vec<(u32, i32)>, Error> {
    f.seek(SeekFrom::Start(payload_start))?;
    let _version_flags = read_be_u32(f)?;
    let count = checked_entry_count("ctts", read_be_u32(f)?)?;
    let mut v = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let sample_count = read_be_u32(f)?;
        // Version 0 offsets are unsigned, version 1 signed; both occupy
        // the same 32-bit field.
        let offset = read_be_u32(f)? as i32;
        v.push((sample_count, offset));
    }
    Ok(v)
}

fn parse_stss<R: Read + Seek>(f: &mut R, payload_start: u64) -> Result<Vec<u32>, Error> {
    f.seek(SeekFrom::Start(payload_start))?;
    let _version_flags = read_be_u32(f)?;
    let count = checked_entry_count("stss", read_be_u32(f)?)?;
    let mut v = Vec::with_capacity(count as usize);
    for _ in 0..count {
        v.push(read_be_u32(f)?);
    }
    Ok(v)
}

fn parse_stsd<R: Read + Seek>(
    f: &mut R,
    payload_start: u64,
    stsd_end: u64,
) -> Result<TrackCodec, Error> {
    // stsd: version/flags (4) + entry_count (4) + sample entries.
    f.seek(SeekFrom::Start(payload_start))?;
    let _version_flags = read_be_u32(f)?;
    let entry_count = read_be_u32(f)?;
    if entry_count == 0 {
        return Ok(TrackCodec::Other(*b"none"));
    }

    // A sample entry is itself a box: size + type, then a fixed
    // VisualSampleEntry header of 78 bytes for video, then child boxes.
    let entry_pos = payload_start + 8;
    f.seek(SeekFrom::Start(entry_pos))?;
    let entry_size = read_be_u32(f)? as u64;
    let mut entry_type = [0u8; 4];
    f.read_exact(&mut entry_type)?;

    let entry_end = if entry_size == 0 {
        stsd_end
    } else {
        (entry_pos + entry_size).min(stsd_end)
    };

    if entry_type != fourcc("avc1") {
        return Ok(TrackCodec::Other(entry_type));
    }

    let visual_sample_entry_len: u64 = 78;
    let mut p = entry_pos + 8 + visual_sample_entry_len;
    while p + 8 <= entry_end {
        f.seek(SeekFrom::Start(p))?;
        let hdr = read_box_header(f)?;
        let child_end = safe_box_end("stsd", p, &hdr, entry_end)?;
        let payload = p + hdr.header_len;

        if hdr.typ == fourcc("avcC") {
            return parse_avcc(f, payload);
        }

        p = child_end;
    }

    // avc1 without avcC: assume 4-byte NAL lengths and no in-band sets.
    warn!(target: "keysnap::mp4", "avc1 sample entry without avcC");
    Ok(TrackCodec::Avc {
        length_size: 4,
        profile_idc: 0,
        level_idc: 0,
        sps: Vec::new(),
        pps: Vec::new(),
    })
}

fn parse_avcc<R: Read + Seek>(f: &mut R, payload_start: u64) -> Result<TrackCodec, Error> {
    // avcC: configurationVersion(1) AVCProfileIndication(1)
    // profile_compatibility(1) AVCLevelIndication(1)
    // lengthSizeMinusOne(low 2 bits) numOfSequenceParameterSets(low 5 bits)
    // then each set as a 16-bit length + payload.
    f.seek(SeekFrom::Start(payload_start))?;
    let _configuration_version = read_u8(f)?;
    let profile_idc = read_u8(f)?;
    let _profile_compatibility = read_u8(f)?;
    let level_idc = read_u8(f)?;
    let length_size = ((read_u8(f)? & 0b11) + 1) as usize;

    let sps_count = (read_u8(f)? & 0b1_1111) as usize;
    let mut sps = Vec::with_capacity(sps_count);
    let mut pos = payload_start + 6;
    for _ in 0..sps_count {
        let blob = read_parameter_set_blob(f, &mut pos)?;
        sps.push(blob);
    }

    f.seek(SeekFrom::Start(pos))?;
    let pps_count = read_u8(f)? as usize;
    pos += 1;
    let mut pps = Vec::with_capacity(pps_count);
    for _ in 0..pps_count {
        let blob = read_parameter_set_blob(f, &mut pos)?;
        pps.push(blob);
    }

    debug!(
        target: "keysnap::mp4",
        profile_idc,
        level_idc,
        length_size,
        sps = sps.len(),
        pps = pps.len(),
        "avcC parsed"
    );

    Ok(TrackCodec::Avc {
        length_size,
        profile_idc,
        level_idc,
        sps,
        pps,
    })
}

fn read_parameter_set_blob<R: Read + Seek>(
    f: &mut R,
    pos: &mut u64,
) -> Result<ParameterSetBlob, Error> {
    f.seek(SeekFrom::Start(*pos))?;
    let size = read_be_u16(f)? as u32;
    let offset = *pos + 2;
    let mut data = vec![0u8; size as usize];
    f.read_exact(&mut data)?;
    *pos = offset + size as u64;
    Ok(ParameterSetBlob { offset, size, data })
}
