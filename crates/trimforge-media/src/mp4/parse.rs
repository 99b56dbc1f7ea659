//! Box parsing.
//!
//! Top-level boxes are located by seeking over their headers, so `mdat` is
//! never read. The `moov` payload is loaded once and every box below it is
//! decoded from memory with bounds-checked reads.

use super::{HandlerType, Mp4File, SampleSizes, SampleTables, TrackInfo};
use crate::{Error, Result};
use std::io::{Read, Seek, SeekFrom};

/// Largest `moov` payload accepted.
pub const MAX_MOOV_SIZE: u64 = 64 * 1024 * 1024;

/// A top-level box located in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub kind: [u8; 4],
    /// File offset of the size field.
    pub offset: u64,
    /// 8, or 16 with a 64-bit size.
    pub header_len: u64,
    /// Total size including the header, clamped to the file.
    pub size: u64,
}

impl BoxHeader {
    pub fn payload_offset(&self) -> u64 {
        self.offset + self.header_len
    }

    pub fn payload_len(&self) -> u64 {
        self.size - self.header_len
    }
}

/// Parse the movie structure of an ISO-BMFF file.
pub fn read_movie<R: Read + Seek>(reader: &mut R) -> Result<Mp4File> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    let boxes = scan_top_level(reader, file_len)?;

    let moov = boxes.iter().find(|b| &b.kind == b"moov");
    if moov.is_none() && boxes.first().map(|b| &b.kind) != Some(b"ftyp") {
        return Err(Error::invalid_mp4("not an ISO base media file"));
    }
    let moov = moov.ok_or(Error::MissingAtom("moov"))?;
    if moov.payload_len() > MAX_MOOV_SIZE {
        return Err(Error::invalid_mp4(format!(
            "moov payload of {} bytes exceeds the {} byte limit",
            moov.payload_len(),
            MAX_MOOV_SIZE
        )));
    }

    reader.seek(SeekFrom::Start(moov.payload_offset()))?;
    let mut payload = vec![0u8; moov.payload_len() as usize];
    reader.read_exact(&mut payload)?;

    let mut file = parse_moov(&payload, file_len);
    file.moov_before_mdat = boxes
        .iter()
        .find(|b| &b.kind == b"mdat")
        .map_or(true, |mdat| moov.offset < mdat.offset);
    Ok(file)
}

/// Headers of the boxes at the top of the file.
///
/// A header that cannot describe a box ends the scan; a box running past
/// the end of the file is clamped.
pub fn scan_top_level<R: Read + Seek>(reader: &mut R, file_len: u64) -> Result<Vec<BoxHeader>> {
    let mut boxes = Vec::new();
    let mut offset = 0u64;

    while offset + 8 <= file_len {
        reader.seek(SeekFrom::Start(offset))?;
        let mut head = [0u8; 8];
        reader.read_exact(&mut head)?;
        let declared = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
        let kind = [head[4], head[5], head[6], head[7]];

        let (size, header_len) = match declared {
            0 => (file_len - offset, 8),
            1 => {
                if offset + 16 > file_len {
                    break;
                }
                let mut large = [0u8; 8];
                reader.read_exact(&mut large)?;
                (u64::from_be_bytes(large), 16)
            }
            n => (u64::from(n), 8),
        };
        if size < header_len {
            tracing::debug!(offset, size, "Stopping at malformed box header");
            break;
        }

        let size = size.min(file_len - offset);
        boxes.push(BoxHeader {
            kind,
            offset,
            header_len,
            size,
        });
        offset += size;
    }

    Ok(boxes)
}

/// `file_len` bounds the sample bytes a track may declare.
fn parse_moov(moov: &[u8], file_len: u64) -> Mp4File {
    let mut file = Mp4File {
        movie_timescale: 1000,
        movie_duration: 0,
        tracks: Vec::new(),
        moov_before_mdat: true,
    };

    for (kind, payload) in children(moov) {
        match &kind {
            b"mvhd" => {
                if let Some((timescale, duration, _)) =
                    timing_fields(payload).filter(|&(timescale, _, _)| timescale > 0)
                {
                    file.movie_timescale = timescale;
                    file.movie_duration = duration;
                }
            }
            b"trak" => match parse_trak(payload, file_len) {
                Ok(track) => file.tracks.push(track),
                Err(e) => tracing::warn!(error = %e, "Skipping unparseable track"),
            },
            _ => {}
        }
    }

    file
}

fn parse_trak(trak: &[u8], file_len: u64) -> Result<TrackInfo> {
    let mut track = TrackInfo::new(0);

    if let Some(tkhd) = child(trak, b"tkhd") {
        read_tkhd(tkhd, &mut track);
    }
    if let Some(elst) = child(trak, b"edts").and_then(|edts| child(edts, b"elst")) {
        read_elst(elst, &mut track);
    }
    if let Some(mdia) = child(trak, b"mdia") {
        parse_mdia(mdia, &mut track, file_len)?;
    }

    Ok(track)
}

fn read_tkhd(tkhd: &[u8], track: &mut TrackInfo) {
    let (id_at, width_at) = if tkhd.first() == Some(&1) { (20, 88) } else { (12, 76) };
    if let Some(id) = be_u32(tkhd, id_at) {
        track.track_id = id;
    }
    // 16.16 fixed point
    if let (Some(w), Some(h)) = (be_u32(tkhd, width_at), be_u32(tkhd, width_at + 4)) {
        if w >> 16 > 0 && h >> 16 > 0 {
            track.width = Some(w >> 16);
            track.height = Some(h >> 16);
        }
    }
}

/// Leading empty edits (media time -1) accumulate as presentation delay;
/// the first real edit sets the media start.
fn read_elst(elst: &[u8], track: &mut TrackInfo) {
    let wide = elst.first() == Some(&1);
    let width = if wide { 20 } else { 12 };
    let edits = table(elst, width, |e| {
        if wide {
            Some((be_u64(e, 0)?, be_u64(e, 8)? as i64))
        } else {
            Some((u64::from(be_u32(e, 0)?), i64::from(be_u32(e, 4)? as i32)))
        }
    });

    for (segment_duration, media_time) in edits {
        if media_time >= 0 {
            track.edit_media_time = media_time;
            break;
        }
        track.empty_edit_duration += segment_duration;
    }
}

fn parse_mdia(mdia: &[u8], track: &mut TrackInfo, file_len: u64) -> Result<()> {
    // The handler decides how stsd is read.
    if let Some(code) = child(mdia, b"hdlr").and_then(|hdlr| fourcc(hdlr, 8)) {
        track.handler_type = HandlerType::from_bytes(code);
    }

    if let Some(mdhd) = child(mdia, b"mdhd") {
        let (timescale, duration, language_at) =
            timing_fields(mdhd).ok_or_else(|| Error::invalid_mp4("mdhd too short"))?;
        if timescale == 0 {
            return Err(Error::invalid_mp4("mdhd timescale is zero"));
        }
        track.timescale = timescale;
        track.duration = duration;
        if let Some(language) = be_u16(mdhd, language_at) {
            track.language = language;
        }
    }

    if let Some(stbl) = child(mdia, b"minf").and_then(|minf| child(minf, b"stbl")) {
        parse_stbl(stbl, track, file_len)?;
    }
    Ok(())
}

fn parse_stbl(stbl: &[u8], track: &mut TrackInfo, file_len: u64) -> Result<()> {
    let mut tables = SampleTables::default();

    for (kind, data) in children(stbl) {
        match &kind {
            b"stsd" => read_stsd(data, track)?,
            b"stts" => {
                tables.time_to_sample = table(data, 8, |e| Some((be_u32(e, 0)?, be_u32(e, 4)?)))
            }
            // Negative offsets in version 0 boxes are common, so both
            // versions are read as signed.
            b"ctts" => {
                tables.composition_offsets =
                    table(data, 8, |e| Some((be_u32(e, 0)?, be_u32(e, 4)? as i32)))
            }
            b"stss" => tables.sync_samples = Some(table(data, 4, |e| be_u32(e, 0))),
            b"stsc" => {
                tables.sample_to_chunk = table(data, 12, |e| Some((be_u32(e, 0)?, be_u32(e, 4)?)))
            }
            b"stsz" => tables.sizes = read_stsz(data),
            b"stco" => tables.chunk_offsets = table(data, 4, |e| be_u32(e, 0).map(u64::from)),
            b"co64" => tables.chunk_offsets = table(data, 8, |e| be_u64(e, 0)),
            _ => {}
        }
    }

    if let SampleSizes::Uniform { size, count } = tables.sizes {
        if u64::from(size) * u64::from(count) > file_len {
            return Err(Error::invalid_mp4(format!(
                "stsz declares {count} samples of {size} bytes in a {file_len} byte file"
            )));
        }
    }

    track.sample_table = tables.resolve();
    Ok(())
}

fn read_stsz(stsz: &[u8]) -> SampleSizes {
    let (Some(size), Some(count)) = (be_u32(stsz, 4), be_u32(stsz, 8)) else {
        return SampleSizes::default();
    };
    if size > 0 {
        return SampleSizes::Uniform { size, count };
    }
    SampleSizes::PerSample(
        stsz[12..]
            .chunks_exact(4)
            .take(count as usize)
            .filter_map(|e| be_u32(e, 0))
            .collect(),
    )
}

/// Keep the payload verbatim and pull out the display fields of the first
/// sample entry.
fn read_stsd(stsd: &[u8], track: &mut TrackInfo) -> Result<()> {
    let entry_type = fourcc(stsd, 12).ok_or_else(|| Error::invalid_mp4("stsd too short"))?;
    track.sample_entry_type = Some(entry_type);

    // Entry fields start after the 8-byte stsd header, the 8-byte entry
    // header and 8 bytes of reserved + data_reference_index.
    if track.handler_type.is_audio() {
        if let (Some(channels), Some(rate)) = (be_u16(stsd, 32), be_u32(stsd, 40)) {
            track.channels = Some(channels);
            track.sample_rate = Some(rate >> 16);
        }
    } else if track.handler_type.is_video() {
        if let (Some(w), Some(h)) = (be_u16(stsd, 40), be_u16(stsd, 42)) {
            if w > 0 && h > 0 {
                track.width = Some(u32::from(w));
                track.height = Some(u32::from(h));
            }
        }
    }

    track.sample_description = stsd.to_vec();
    Ok(())
}

/// `(timescale, duration, offset past duration)` of an `mvhd` or `mdhd`,
/// which share their leading layout.
fn timing_fields(data: &[u8]) -> Option<(u32, u64, usize)> {
    if data.first() == Some(&1) {
        Some((be_u32(data, 20)?, be_u64(data, 24)?, 32))
    } else {
        Some((be_u32(data, 12)?, u64::from(be_u32(data, 16)?), 20))
    }
}

/// Records of a full-box table: version and flags, a u32 count, then
/// fixed-width entries. A count past the end of the data is clamped.
fn table<T>(data: &[u8], width: usize, read: impl Fn(&[u8]) -> Option<T>) -> Vec<T> {
    let Some(count) = be_u32(data, 4) else {
        return Vec::new();
    };
    data[8..]
        .chunks_exact(width)
        .take(count as usize)
        .filter_map(read)
        .collect()
}

/// Child boxes of an in-memory payload, as `(kind, payload)`.
///
/// Iteration ends at the first header that does not fit.
struct Children<'a> {
    rest: &'a [u8],
}

fn children(data: &[u8]) -> Children<'_> {
    Children { rest: data }
}

fn child<'a>(data: &'a [u8], kind: &[u8; 4]) -> Option<&'a [u8]> {
    children(data).find(|(k, _)| k == kind).map(|(_, payload)| payload)
}

impl<'a> Iterator for Children<'a> {
    type Item = ([u8; 4], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let data = self.rest;
        let kind = fourcc(data, 4)?;
        let (size, header_len) = match be_u32(data, 0)? {
            0 => (data.len(), 8),
            1 => (usize::try_from(be_u64(data, 8)?).ok()?, 16),
            n => (n as usize, 8),
        };
        if size < header_len || size > data.len() {
            self.rest = &[];
            return None;
        }
        self.rest = &data[size..];
        Some((kind, &data[header_len..size]))
    }
}

fn be_u16(data: &[u8], at: usize) -> Option<u16> {
    let bytes = data.get(at..at.checked_add(2)?)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    fourcc(data, at).map(u32::from_be_bytes)
}

fn be_u64(data: &[u8], at: usize) -> Option<u64> {
    let bytes = data.get(at..at.checked_add(8)?)?;
    bytes.try_into().ok().map(u64::from_be_bytes)
}

fn fourcc(data: &[u8], at: usize) -> Option<[u8; 4]> {
    data.get(at..at.checked_add(4)?)?.try_into().ok()
}
