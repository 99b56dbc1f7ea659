//! Seams between the trim engine and the container library.
//!
//! The pipeline only talks to [`ContainerHandle`] and [`OutputSink`]; the MP4
//! implementations below forward to `trimforge-media`.

use std::io::{Read, Seek, Write};
use trimforge_media::{
    Mp4Demuxer, Mp4Muxer, Result, SampleFlags, SampleInfo, SeekMode, TrackFormat,
};

/// Read-only access to the tracks and samples of a source container.
pub trait ContainerHandle {
    fn track_count(&self) -> usize;

    /// Format metadata for track `index`.
    fn track_format(&self, index: usize) -> Result<TrackFormat>;

    fn select_track(&mut self, index: usize) -> Result<()>;

    fn unselect_track(&mut self, index: usize) -> Result<()>;

    /// Move every selected track to a sync sample near `time_us`.
    fn seek_to(&mut self, time_us: i64, mode: SeekMode);

    /// Read the current sample (or piece of it) into `buf`. `None` means the
    /// selected tracks are exhausted.
    fn read_sample(&mut self, buf: &mut [u8]) -> Result<Option<usize>>;

    /// Presentation time of the current sample in microseconds.
    fn sample_time(&self) -> Option<i64>;

    /// Decode time of the current sample in microseconds.
    fn sample_decode_time(&self) -> Option<i64>;

    fn sample_flags(&self) -> SampleFlags;

    /// Step to the next sample; `false` when nothing is left.
    fn advance(&mut self) -> bool;
}

/// Destination container accepting declared tracks and their samples.
pub trait OutputSink {
    /// Declare a track; returns the index used for its samples.
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize>;

    /// Switch from track declaration to sample writing.
    fn start(&mut self) -> Result<()>;

    fn write_sample(&mut self, track: usize, data: &[u8], info: &SampleInfo) -> Result<()>;

    /// Write the trailer; the output is complete afterwards.
    fn finish(&mut self) -> Result<()>;

    /// Whether samples may arrive in several partial pieces.
    fn supports_partial_frames(&self) -> bool {
        false
    }
}

impl<R: Read + Seek> ContainerHandle for Mp4Demuxer<R> {
    fn track_count(&self) -> usize {
        Mp4Demuxer::track_count(self)
    }

    fn track_format(&self, index: usize) -> Result<TrackFormat> {
        Mp4Demuxer::track_format(self, index)
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        Mp4Demuxer::select_track(self, index)
    }

    fn unselect_track(&mut self, index: usize) -> Result<()> {
        Mp4Demuxer::unselect_track(self, index)
    }

    fn seek_to(&mut self, time_us: i64, mode: SeekMode) {
        Mp4Demuxer::seek_to(self, time_us, mode)
    }

    fn read_sample(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        self.read_sample_data(buf)
    }

    fn sample_time(&self) -> Option<i64> {
        Mp4Demuxer::sample_time(self)
    }

    fn sample_decode_time(&self) -> Option<i64> {
        Mp4Demuxer::sample_decode_time(self)
    }

    fn sample_flags(&self) -> SampleFlags {
        Mp4Demuxer::sample_flags(self)
    }

    fn advance(&mut self) -> bool {
        Mp4Demuxer::advance(self)
    }
}

impl<W: Write + Seek> OutputSink for Mp4Muxer<W> {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize> {
        Mp4Muxer::add_track(self, format)
    }

    fn start(&mut self) -> Result<()> {
        Mp4Muxer::start(self)
    }

    fn write_sample(&mut self, track: usize, data: &[u8], info: &SampleInfo) -> Result<()> {
        Mp4Muxer::write_sample(self, track, data, info)
    }

    fn finish(&mut self) -> Result<()> {
        Mp4Muxer::finish(self)
    }

    fn supports_partial_frames(&self) -> bool {
        Mp4Muxer::supports_partial_frames(self)
    }
}
