//! Sample-level reading from MP4 files.
//!
//! [`Mp4Demuxer`] exposes the tracks of a parsed [`Mp4File`] and walks the
//! selected ones in decode order, reading payloads straight from the source
//! with the offsets resolved by the sample tables.

use crate::format::{SampleFlags, TrackFormat};
use crate::mp4::{Mp4File, SampleEntry, TrackInfo};
use crate::time::{first_tick_at_or_after, last_tick_at_or_before, ticks_to_us};
use crate::{Error, Result};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Default upper bound on the bytes returned by one read.
pub const DEFAULT_MAX_READ_SIZE: usize = 1024 * 1024;

/// Where [`Mp4Demuxer::seek_to`] lands relative to the requested time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Last sync sample presented at or before the time.
    PreviousSync,
    /// First sync sample presented at or after the time.
    NextSync,
    /// Whichever of the two is nearer; ties go to the earlier one.
    ClosestSync,
}

#[derive(Debug, Clone, Copy)]
struct TrackCursor {
    track: usize,
    sample: usize,
    /// Bytes of the current sample already handed out.
    consumed: u32,
    /// Length of the piece the next read returns.
    piece: u32,
}

/// Demultiplexer over an MP4 file.
pub struct Mp4Demuxer<R = BufReader<File>> {
    reader: R,
    file: Mp4File,
    cursors: Vec<TrackCursor>,
    max_read_size: usize,
}

impl Mp4Demuxer {
    /// Open and parse the MP4 file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }
}

impl<R: Read + Seek> Mp4Demuxer<R> {
    /// Parse the container from an arbitrary reader.
    pub fn from_reader(mut reader: R) -> Result<Self> {
        let file = Mp4File::parse(&mut reader)?;
        tracing::debug!(
            tracks = file.tracks.len(),
            moov_before_mdat = file.moov_before_mdat,
            "Parsed MP4 container"
        );
        Ok(Self {
            reader,
            file,
            cursors: Vec::new(),
            max_read_size: DEFAULT_MAX_READ_SIZE,
        })
    }

    /// Cap the number of bytes a single read returns. Larger samples are
    /// delivered as several partial pieces.
    pub fn with_max_read_size(mut self, max_read_size: usize) -> Self {
        self.set_max_read_size(max_read_size);
        self
    }

    pub fn set_max_read_size(&mut self, max_read_size: usize) {
        self.max_read_size = max_read_size.max(1);
        for i in 0..self.cursors.len() {
            if self.cursors[i].consumed == 0 {
                let piece = self.full_piece(&self.cursors[i]);
                self.cursors[i].piece = piece;
            }
        }
    }

    /// The parsed container.
    pub fn file(&self) -> &Mp4File {
        &self.file
    }

    pub fn track_count(&self) -> usize {
        self.file.tracks.len()
    }

    /// Format metadata for track `index`.
    pub fn track_format(&self, index: usize) -> Result<TrackFormat> {
        let track = self.track(index)?;
        if track.sample_description.is_empty() {
            return Err(Error::unsupported(format!(
                "track {} has no sample description",
                track.track_id
            )));
        }
        TrackFormat::from_track(track)
    }

    /// Add track `index` to the set of tracks being read. Selecting an
    /// already selected track is a no-op.
    pub fn select_track(&mut self, index: usize) -> Result<()> {
        self.track(index)?;
        if self.cursors.iter().any(|c| c.track == index) {
            return Ok(());
        }
        let mut cursor = TrackCursor {
            track: index,
            sample: 0,
            consumed: 0,
            piece: 0,
        };
        cursor.piece = self.full_piece(&cursor);
        self.cursors.push(cursor);
        tracing::trace!(track = index, "Selected track");
        Ok(())
    }

    pub fn unselect_track(&mut self, index: usize) -> Result<()> {
        self.track(index)?;
        self.cursors.retain(|c| c.track != index);
        Ok(())
    }

    /// Indices of the selected tracks, in selection order.
    pub fn selected_tracks(&self) -> Vec<usize> {
        self.cursors.iter().map(|c| c.track).collect()
    }

    /// Reposition every selected track on a sync sample near `time_us`.
    pub fn seek_to(&mut self, time_us: i64, mode: SeekMode) {
        for i in 0..self.cursors.len() {
            let track_index = self.cursors[i].track;
            let mut cursor = self.cursors[i];
            cursor.sample = self.seek_target(&self.file.tracks[track_index], time_us, mode);
            cursor.consumed = 0;
            cursor.piece = self.full_piece(&cursor);
            self.cursors[i] = cursor;
        }
    }

    /// Track index of the current sample, or `None` at end of stream.
    pub fn sample_track_index(&self) -> Option<usize> {
        self.current().map(|c| c.track)
    }

    /// Presentation time of the current sample in microseconds.
    pub fn sample_time(&self) -> Option<i64> {
        let cursor = self.current()?;
        let track = &self.file.tracks[cursor.track];
        Some(self.presentation_us(track, &track.sample_table.samples[cursor.sample]))
    }

    /// Decode time of the current sample in microseconds.
    pub fn sample_decode_time(&self) -> Option<i64> {
        let cursor = self.current()?;
        let track = &self.file.tracks[cursor.track];
        Some(self.decode_us(track, &track.sample_table.samples[cursor.sample]))
    }

    /// Flags of the current piece.
    pub fn sample_flags(&self) -> SampleFlags {
        let Some(cursor) = self.current() else {
            return SampleFlags::NONE;
        };
        let entry = &self.file.tracks[cursor.track].sample_table.samples[cursor.sample];
        let mut flags = SampleFlags::NONE;
        if entry.is_keyframe {
            flags |= SampleFlags::SYNC;
        }
        if cursor.consumed + cursor.piece < entry.size {
            flags |= SampleFlags::PARTIAL_FRAME;
        }
        flags
    }

    /// Read the current piece into `buf`, returning its length, or `None` at
    /// end of stream. The cursor does not move; call [`advance`](Self::advance).
    ///
    /// A buffer shorter than the pending piece shrinks the piece to fit.
    pub fn read_sample_data(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        let Some(pos) = self.current_position() else {
            return Ok(None);
        };
        let cursor = self.cursors[pos];
        let entry = self.file.tracks[cursor.track].sample_table.samples[cursor.sample];

        let mut piece = cursor.piece as usize;
        if piece > buf.len() {
            if buf.is_empty() {
                return Err(Error::invalid_state("read buffer has zero capacity"));
            }
            piece = buf.len();
            self.cursors[pos].piece = piece as u32;
        }

        self.reader
            .seek(SeekFrom::Start(entry.offset + cursor.consumed as u64))?;
        self.reader.read_exact(&mut buf[..piece])?;
        Ok(Some(piece))
    }

    /// Move to the next piece or sample. Returns `false` once every selected
    /// track is exhausted.
    pub fn advance(&mut self) -> bool {
        let Some(pos) = self.current_position() else {
            return false;
        };
        let mut cursor = self.cursors[pos];
        let size = self.file.tracks[cursor.track].sample_table.samples[cursor.sample].size;

        cursor.consumed += cursor.piece;
        if cursor.consumed >= size {
            cursor.sample += 1;
            cursor.consumed = 0;
        }
        cursor.piece = self.full_piece(&cursor);
        self.cursors[pos] = cursor;

        self.current().is_some()
    }

    fn track(&self, index: usize) -> Result<&TrackInfo> {
        self.file.tracks.get(index).ok_or(Error::TrackNotFound {
            index,
            count: self.file.tracks.len(),
        })
    }

    fn full_piece(&self, cursor: &TrackCursor) -> u32 {
        let samples = &self.file.tracks[cursor.track].sample_table.samples;
        match samples.get(cursor.sample) {
            Some(entry) => {
                let remaining = entry.size.saturating_sub(cursor.consumed) as usize;
                remaining.min(self.max_read_size) as u32
            }
            None => 0,
        }
    }

    fn current(&self) -> Option<TrackCursor> {
        self.current_position().map(|pos| self.cursors[pos])
    }

    /// Selected track whose pending sample decodes first; ties go to the
    /// lower track index.
    fn current_position(&self) -> Option<usize> {
        self.cursors
            .iter()
            .enumerate()
            .filter_map(|(pos, c)| {
                let track = &self.file.tracks[c.track];
                let entry = track.sample_table.samples.get(c.sample)?;
                Some((self.decode_us(track, entry), c.track, pos))
            })
            .min()
            .map(|(_, _, pos)| pos)
    }

    fn delay_us(&self, track: &TrackInfo) -> i64 {
        ticks_to_us(track.empty_edit_duration as i64, self.file.movie_timescale)
    }

    fn presentation_us(&self, track: &TrackInfo, entry: &SampleEntry) -> i64 {
        let ticks = entry.dts as i64 + entry.cts_offset as i64 - track.edit_media_time;
        ticks_to_us(ticks, track.timescale) + self.delay_us(track)
    }

    fn decode_us(&self, track: &TrackInfo, entry: &SampleEntry) -> i64 {
        let ticks = entry.dts as i64 - track.edit_media_time;
        ticks_to_us(ticks, track.timescale) + self.delay_us(track)
    }

    fn seek_target(&self, track: &TrackInfo, time_us: i64, mode: SeekMode) -> usize {
        let table = &track.sample_table;
        let media_us = time_us - self.delay_us(track);
        let shift = track.edit_media_time;

        let before = table.last_sync_at_or_before(
            last_tick_at_or_before(media_us, track.timescale),
            shift,
        );
        let after = table.first_sync_at_or_after(
            first_tick_at_or_after(media_us, track.timescale),
            shift,
        );

        let chosen = match mode {
            SeekMode::PreviousSync => before.or(after),
            SeekMode::NextSync => {
                return after.unwrap_or(table.len());
            }
            SeekMode::ClosestSync => match (before, after) {
                (Some(b), Some(a)) => {
                    let distance =
                        |i: usize| (self.presentation_us(track, &table.samples[i]) - time_us).abs();
                    if distance(a) < distance(b) {
                        Some(a)
                    } else {
                        Some(b)
                    }
                }
                (b, a) => b.or(a),
            },
        };

        // No sync samples at all: start from the beginning
        chosen.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{BufferFlags, SampleInfo};
    use crate::mux::Mp4Muxer;
    use crate::mp4::HandlerType;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn stsd(fourcc: &[u8; 4]) -> Bytes {
        let mut data = vec![0, 0, 0, 0, 0, 0, 0, 1];
        data.extend_from_slice(&16u32.to_be_bytes());
        data.extend_from_slice(fourcc);
        data.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 1]);
        Bytes::from(data)
    }

    fn format(handler: HandlerType, fourcc: &[u8; 4], timescale: u32) -> TrackFormat {
        TrackFormat {
            mime: crate::format::mime_for(handler, *fourcc),
            handler,
            track_id: 0,
            timescale,
            duration_us: None,
            language: 0x55C4,
            width: None,
            height: None,
            sample_rate: None,
            channels: None,
            sample_description: stsd(fourcc),
        }
    }

    /// 10 video frames at 10 fps with a keyframe every 4 frames, plus audio
    /// frames every 50 ms. Each payload starts with its track and sample
    /// number.
    fn build_fixture(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("fixture.mp4");
        let mut muxer = Mp4Muxer::create(&path).unwrap();
        let video = muxer
            .add_track(&format(HandlerType::Video, b"avc1", 90000))
            .unwrap();
        let audio = muxer
            .add_track(&format(HandlerType::Audio, b"mp4a", 48000))
            .unwrap();
        muxer.start().unwrap();

        for i in 0..10i64 {
            let flags = if i % 4 == 0 {
                BufferFlags::KEY_FRAME
            } else {
                BufferFlags::NONE
            };
            let info = SampleInfo {
                presentation_time_us: i * 100_000,
                decode_time_us: i * 100_000,
                flags,
            };
            let mut payload = vec![b'v', i as u8];
            payload.resize(64 + i as usize, 0xAA);
            muxer.write_sample(video, &payload, &info).unwrap();
        }
        for i in 0..20i64 {
            let info = SampleInfo {
                presentation_time_us: i * 50_000,
                decode_time_us: i * 50_000,
                flags: BufferFlags::KEY_FRAME,
            };
            muxer.write_sample(audio, &[b'a', i as u8, 0, 0], &info).unwrap();
        }
        muxer.finish().unwrap();
        path
    }

    #[test]
    fn test_track_formats() {
        let dir = TempDir::new().unwrap();
        let demuxer = Mp4Demuxer::open(build_fixture(&dir)).unwrap();

        assert_eq!(demuxer.track_count(), 2);
        assert_eq!(demuxer.track_format(0).unwrap().mime, "video/avc");
        assert_eq!(demuxer.track_format(1).unwrap().mime, "audio/mp4a-latm");
        assert!(matches!(
            demuxer.track_format(2),
            Err(Error::TrackNotFound { index: 2, count: 2 })
        ));
    }

    #[test]
    fn test_single_track_read_loop() {
        let dir = TempDir::new().unwrap();
        let mut demuxer = Mp4Demuxer::open(build_fixture(&dir)).unwrap();
        demuxer.select_track(0).unwrap();

        let mut buf = vec![0u8; 1024];
        let mut times = Vec::new();
        let mut keys = Vec::new();
        while let Some(n) = demuxer.read_sample_data(&mut buf).unwrap() {
            assert_eq!(buf[0], b'v');
            assert_eq!(n, 64 + buf[1] as usize);
            times.push(demuxer.sample_time().unwrap());
            keys.push(demuxer.sample_flags().contains(SampleFlags::SYNC));
            demuxer.advance();
        }

        assert_eq!(times, (0..10).map(|i| i * 100_000).collect::<Vec<_>>());
        assert_eq!(keys.iter().filter(|k| **k).count(), 3);
        assert!(demuxer.sample_time().is_none());
        assert!(!demuxer.advance());
    }

    #[test]
    fn test_interleaves_by_decode_time() {
        let dir = TempDir::new().unwrap();
        let mut demuxer = Mp4Demuxer::open(build_fixture(&dir)).unwrap();
        demuxer.select_track(0).unwrap();
        demuxer.select_track(1).unwrap();

        let mut last = i64::MIN;
        let mut count = 0;
        loop {
            let Some(t) = demuxer.sample_decode_time() else {
                break;
            };
            assert!(t >= last);
            last = t;
            count += 1;
            demuxer.advance();
        }
        assert_eq!(count, 30);
    }

    #[test]
    fn test_seek_modes() {
        let dir = TempDir::new().unwrap();
        let mut demuxer = Mp4Demuxer::open(build_fixture(&dir)).unwrap();
        demuxer.select_track(0).unwrap();

        // keyframes at 0, 400_000, 800_000
        demuxer.seek_to(550_000, SeekMode::PreviousSync);
        assert_eq!(demuxer.sample_time(), Some(400_000));

        demuxer.seek_to(550_000, SeekMode::NextSync);
        assert_eq!(demuxer.sample_time(), Some(800_000));

        demuxer.seek_to(650_000, SeekMode::ClosestSync);
        assert_eq!(demuxer.sample_time(), Some(800_000));

        demuxer.seek_to(400_000, SeekMode::PreviousSync);
        assert_eq!(demuxer.sample_time(), Some(400_000));

        demuxer.seek_to(900_000, SeekMode::NextSync);
        assert_eq!(demuxer.sample_time(), None);

        demuxer.seek_to(0, SeekMode::PreviousSync);
        assert_eq!(demuxer.sample_time(), Some(0));
    }

    #[test]
    fn test_large_samples_are_split() {
        let dir = TempDir::new().unwrap();
        let mut demuxer = Mp4Demuxer::open(build_fixture(&dir))
            .unwrap()
            .with_max_read_size(30);
        demuxer.select_track(0).unwrap();

        // first sample is 64 bytes: 30 + 30 + 4
        let mut buf = vec![0u8; 1024];
        let mut pieces = Vec::new();
        for _ in 0..3 {
            let n = demuxer.read_sample_data(&mut buf).unwrap().unwrap();
            let flags = demuxer.sample_flags();
            assert!(flags.contains(SampleFlags::SYNC));
            assert_eq!(demuxer.sample_time(), Some(0));
            pieces.push((n, flags.contains(SampleFlags::PARTIAL_FRAME)));
            demuxer.advance();
        }
        assert_eq!(pieces, vec![(30, true), (30, true), (4, false)]);
        assert_eq!(demuxer.sample_time(), Some(100_000));
    }

    #[test]
    fn test_short_buffer_shrinks_piece() {
        let dir = TempDir::new().unwrap();
        let mut demuxer = Mp4Demuxer::open(build_fixture(&dir)).unwrap();
        demuxer.select_track(1).unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(demuxer.read_sample_data(&mut buf).unwrap(), Some(3));
        assert!(demuxer.sample_flags().contains(SampleFlags::PARTIAL_FRAME));
        demuxer.advance();

        let mut buf = [0u8; 16];
        assert_eq!(demuxer.read_sample_data(&mut buf).unwrap(), Some(1));
        assert!(!demuxer.sample_flags().contains(SampleFlags::PARTIAL_FRAME));
        assert!(demuxer.read_sample_data(&mut [0u8; 0]).is_err());
    }

    #[test]
    fn test_unselect_resets_cursor() {
        let dir = TempDir::new().unwrap();
        let mut demuxer = Mp4Demuxer::open(build_fixture(&dir)).unwrap();
        demuxer.select_track(1).unwrap();
        demuxer.advance();
        demuxer.unselect_track(1).unwrap();
        assert!(demuxer.selected_tracks().is_empty());
        assert_eq!(demuxer.sample_time(), None);

        demuxer.select_track(1).unwrap();
        assert_eq!(demuxer.sample_time(), Some(0));
        assert!(demuxer.unselect_track(7).is_err());
    }
}
