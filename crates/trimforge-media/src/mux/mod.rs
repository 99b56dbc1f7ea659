//! Progressive MP4 multiplexing.
//!
//! [`Mp4Muxer`] writes `ftyp` and an `mdat` header on [`start`](Mp4Muxer::start),
//! appends sample payloads as they arrive, and on [`finish`](Mp4Muxer::finish)
//! patches the `mdat` size and appends a `moov` built from the recorded
//! sample tables.

mod boxes;

use crate::format::{BufferFlags, SampleInfo, TrackFormat};
use crate::time::{rescale, us_to_ticks};
use crate::{Error, Result};
use boxes::{BoxWriter, MDAT_HEADER_SIZE, MDAT_LARGESIZE_OFFSET};
use bytes::Bytes;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

/// Movie timescale used for `mvhd`, `tkhd` and edit lists.
const MOVIE_TIMESCALE: u32 = 1000;

/// Lifecycle of a [`Mp4Muxer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxerState {
    /// Tracks may be added.
    Initialized,
    /// Header written; samples may be written.
    Started,
    /// Trailer written; the file is complete.
    Finished,
}

#[derive(Debug, Clone, Copy)]
struct WrittenSample {
    size: u32,
    dts: i64,
    pts: i64,
    is_keyframe: bool,
}

#[derive(Debug, Default)]
struct PendingSample {
    info: Option<SampleInfo>,
    data: Vec<u8>,
}

#[derive(Debug)]
struct MuxTrack {
    format: TrackFormat,
    samples: Vec<WrittenSample>,
    /// (file offset, sample count) per chunk.
    chunks: Vec<(u64, u32)>,
    pending: PendingSample,
    ended: bool,
}

/// Writer producing a progressive (non-fragmented) MP4 file.
pub struct Mp4Muxer<W: Write + Seek = BufWriter<File>> {
    writer: W,
    state: MuxerState,
    tracks: Vec<MuxTrack>,
    mdat_offset: u64,
    position: u64,
    last_track: Option<usize>,
}

impl Mp4Muxer {
    /// Create (or truncate) the file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Seek> Mp4Muxer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            state: MuxerState::Initialized,
            tracks: Vec::new(),
            mdat_offset: 0,
            position: 0,
            last_track: None,
        }
    }

    pub fn state(&self) -> MuxerState {
        self.state
    }

    /// This muxer reassembles samples delivered in several partial pieces.
    pub fn supports_partial_frames(&self) -> bool {
        true
    }

    /// Declare a track and return its index. Only allowed before `start`.
    pub fn add_track(&mut self, format: &TrackFormat) -> Result<usize> {
        if self.state != MuxerState::Initialized {
            return Err(Error::TracksLocked);
        }
        if format.sample_description.len() < 16 {
            return Err(Error::unsupported(format!(
                "{} has no usable sample description",
                format.mime
            )));
        }
        if format.timescale == 0 {
            return Err(Error::unsupported(format!("{} has a zero timescale", format.mime)));
        }

        self.tracks.push(MuxTrack {
            format: format.clone(),
            samples: Vec::new(),
            chunks: Vec::new(),
            pending: PendingSample::default(),
            ended: false,
        });
        tracing::debug!(track = self.tracks.len() - 1, mime = %format.mime, "Added track");
        Ok(self.tracks.len() - 1)
    }

    /// Write the file header and switch to sample writing.
    pub fn start(&mut self) -> Result<()> {
        if self.state != MuxerState::Initialized {
            return Err(Error::invalid_state("muxer already started"));
        }
        if self.tracks.is_empty() {
            return Err(Error::invalid_state("no tracks added"));
        }

        let mut header = BoxWriter::new();
        boxes::ftyp(&mut header);
        let ftyp = header.into_bytes();
        self.writer.write_all(&ftyp)?;
        self.mdat_offset = ftyp.len() as u64;
        self.writer.write_all(&boxes::mdat_header(0))?;
        self.position = self.mdat_offset + MDAT_HEADER_SIZE;
        self.state = MuxerState::Started;
        Ok(())
    }

    /// Append one sample (or one piece of a partial sample) to `track`.
    ///
    /// Pieces flagged [`BufferFlags::PARTIAL_FRAME`] are buffered until the
    /// next unflagged piece completes the sample; the timing of the first
    /// piece is kept. [`BufferFlags::END_OF_STREAM`] closes the track.
    pub fn write_sample(&mut self, track: usize, data: &[u8], info: &SampleInfo) -> Result<()> {
        if self.state != MuxerState::Started {
            return Err(Error::invalid_state("muxer is not started"));
        }
        let count = self.tracks.len();
        let entry = self
            .tracks
            .get_mut(track)
            .ok_or(Error::TrackNotFound { index: track, count })?;
        if entry.ended {
            return Err(Error::invalid_state(format!(
                "track {track} already received end of stream"
            )));
        }

        if info.flags.contains(BufferFlags::END_OF_STREAM) {
            entry.ended = true;
            if data.is_empty() && entry.pending.info.is_none() {
                return Ok(());
            }
            return self.complete(track, data, info);
        }

        if info.flags.contains(BufferFlags::PARTIAL_FRAME) {
            entry.pending.info.get_or_insert(*info);
            entry.pending.data.extend_from_slice(data);
            return Ok(());
        }

        self.complete(track, data, info)
    }

    /// Flush any buffered pieces, patch the `mdat` size and write `moov`.
    pub fn finish(&mut self) -> Result<()> {
        if self.state != MuxerState::Started {
            return Err(Error::invalid_state("muxer is not started"));
        }

        for track in 0..self.tracks.len() {
            if self.tracks[track].pending.info.is_some() {
                tracing::warn!(track, "Flushing incomplete partial sample at finish");
                let info = SampleInfo {
                    flags: BufferFlags::NONE,
                    ..SampleInfo::end_of_stream()
                };
                self.complete(track, &[], &info)?;
            }
        }

        let mdat_size = self.position - self.mdat_offset;
        self.writer
            .seek(SeekFrom::Start(self.mdat_offset + MDAT_LARGESIZE_OFFSET))?;
        self.writer.write_all(&mdat_size.to_be_bytes())?;
        self.writer.seek(SeekFrom::Start(self.position))?;

        let moov = self.build_moov();
        self.writer.write_all(&moov)?;
        self.writer.flush()?;
        self.state = MuxerState::Finished;

        tracing::debug!(
            tracks = self.tracks.len(),
            mdat_bytes = mdat_size,
            moov_bytes = moov.len(),
            "Finished MP4"
        );
        Ok(())
    }

    /// Number of complete samples written to `track` so far.
    pub fn sample_count(&self, track: usize) -> usize {
        self.tracks.get(track).map_or(0, |t| t.samples.len())
    }

    /// Write a complete sample: buffered pieces (if any) followed by `data`.
    fn complete(&mut self, track: usize, data: &[u8], info: &SampleInfo) -> Result<()> {
        let entry = &mut self.tracks[track];
        let pending = std::mem::take(&mut entry.pending);
        let info = pending.info.unwrap_or(*info);
        let timescale = entry.format.timescale;

        let dts = us_to_ticks(info.decode_time_us, timescale);
        let pts = us_to_ticks(info.presentation_time_us, timescale);
        if let Some(last) = entry.samples.last() {
            if dts < last.dts {
                return Err(Error::invalid_state(format!(
                    "track {track}: decode time {} us goes backwards",
                    info.decode_time_us
                )));
            }
        }

        let size = pending.data.len() + data.len();
        let size = u32::try_from(size)
            .map_err(|_| Error::unsupported(format!("sample of {size} bytes is too large")))?;

        self.writer.write_all(&pending.data)?;
        self.writer.write_all(data)?;

        let entry = &mut self.tracks[track];
        match entry.chunks.last_mut() {
            Some((_, count)) if self.last_track == Some(track) => *count += 1,
            _ => entry.chunks.push((self.position, 1)),
        }
        entry.samples.push(WrittenSample {
            size,
            dts,
            pts,
            is_keyframe: info.flags.contains(BufferFlags::KEY_FRAME),
        });

        self.position += size as u64;
        self.last_track = Some(track);
        Ok(())
    }

    fn build_moov(&self) -> Bytes {
        let duration = self
            .tracks
            .iter()
            .map(track_movie_duration)
            .max()
            .unwrap_or(0);

        let mut w = BoxWriter::new();
        w.open(b"moov");
        boxes::mvhd(&mut w, MOVIE_TIMESCALE, duration, self.tracks.len() as u32 + 1);
        for (i, track) in self.tracks.iter().enumerate() {
            write_trak(&mut w, i as u32 + 1, track);
        }
        w.close();
        w.into_bytes()
    }
}

/// Per-sample durations from consecutive decode times; the last sample
/// repeats the previous delta.
fn sample_durations(samples: &[WrittenSample]) -> Vec<u32> {
    let mut durations: Vec<u32> = samples
        .windows(2)
        .map(|w| (w[1].dts - w[0].dts).clamp(0, u32::MAX as i64) as u32)
        .collect();
    if !samples.is_empty() {
        durations.push(durations.last().copied().unwrap_or(0));
    }
    durations
}

fn media_duration(track: &MuxTrack) -> u64 {
    sample_durations(&track.samples).iter().map(|d| *d as u64).sum()
}

/// Earliest presentation time in track ticks.
fn min_pts(track: &MuxTrack) -> i64 {
    track.samples.iter().map(|s| s.pts).min().unwrap_or(0)
}

fn track_movie_duration(track: &MuxTrack) -> u64 {
    let delay = min_pts(track).max(0) as u64;
    rescale(media_duration(track) + delay, track.format.timescale, MOVIE_TIMESCALE)
}

/// Edit list mapping the first presented sample to its presentation time.
/// `None` when media and presentation timelines already coincide.
fn edit_list(track: &MuxTrack) -> Option<Vec<(u64, i64)>> {
    let first_dts = track.samples.first()?.dts;
    let min_pts = min_pts(track);
    let media_time = (min_pts - first_dts).max(0);
    let delay = min_pts.max(0) as u64;

    if media_time == 0 && delay == 0 {
        return None;
    }

    let timescale = track.format.timescale;
    let mut entries = Vec::with_capacity(2);
    if delay > 0 {
        entries.push((rescale(delay, timescale, MOVIE_TIMESCALE), -1));
    }
    let presented = media_duration(track).saturating_sub(media_time as u64);
    entries.push((rescale(presented, timescale, MOVIE_TIMESCALE), media_time));
    Some(entries)
}

fn write_stbl(w: &mut BoxWriter, track: &MuxTrack) {
    let samples = &track.samples;
    w.open(b"stbl");
    w.open(b"stsd").bytes(&track.format.sample_description).close();
    boxes::stts(w, &sample_durations(samples));

    let cts_offsets: Vec<i32> = samples
        .iter()
        .map(|s| (s.pts - s.dts).clamp(i32::MIN as i64, i32::MAX as i64) as i32)
        .collect();
    if cts_offsets.iter().any(|&o| o != 0) {
        boxes::ctts(w, &cts_offsets);
    }

    // No stss means every sample is sync.
    if !samples.iter().all(|s| s.is_keyframe) {
        let sync: Vec<u32> = samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_keyframe)
            .map(|(i, _)| i as u32 + 1)
            .collect();
        boxes::stss(w, &sync);
    }

    let (offsets, per_chunk): (Vec<u64>, Vec<u32>) = track.chunks.iter().copied().unzip();
    let sizes: Vec<u32> = samples.iter().map(|s| s.size).collect();
    boxes::stsc(w, &per_chunk);
    boxes::stsz(w, &sizes);
    boxes::chunk_offsets(w, &offsets);
    w.close();
}

fn write_trak(w: &mut BoxWriter, track_id: u32, track: &MuxTrack) {
    let format = &track.format;
    let handler = format.handler;

    w.open(b"trak");
    boxes::tkhd(
        w,
        track_id,
        track_movie_duration(track),
        handler,
        (format.width.unwrap_or(0), format.height.unwrap_or(0)),
    );
    if let Some(edits) = edit_list(track) {
        boxes::edts(w, &edits);
    }

    w.open(b"mdia");
    boxes::mdhd(w, format.timescale, media_duration(track), format.language);
    boxes::hdlr(w, handler);
    w.open(b"minf");
    boxes::media_header(w, handler);
    boxes::dinf(w);
    write_stbl(w, track);
    w.close().close().close();
}
