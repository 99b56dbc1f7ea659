//! Shared fixtures for integration tests.
//!
//! [`Fixture`] synthesizes MP4 files with the crate's own muxer: fake codec
//! payloads, real container structure. [`FlakySource`] and [`FlakySink`]
//! wrap the MP4 demuxer and muxer and inject failures for one track.

#![allow(dead_code)]

use bytes::Bytes;
use std::cell::RefCell;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use trimforge::{ContainerHandle, OutputSink, TrimFailure, TrimObserver, TrimOutcome};
use trimforge_media::{
    format::mime_for, BufferFlags, Error, HandlerType, Mp4Demuxer, Mp4Muxer, SampleFlags,
    SampleInfo, SeekMode, TrackFormat,
};

pub const VIDEO_TIMESCALE: u32 = 90_000;
pub const AUDIO_RATE: u32 = 44_100;
pub const AUDIO_FRAME: i64 = 1024;

/// Minimal `stsd` payload holding one 16-byte sample entry.
pub fn stsd(fourcc: &[u8; 4]) -> Bytes {
    let mut data = vec![0, 0, 0, 0, 0, 0, 0, 1];
    data.extend_from_slice(&16u32.to_be_bytes());
    data.extend_from_slice(fourcc);
    data.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 1]);
    Bytes::from(data)
}

pub fn track_format(handler: HandlerType, fourcc: &[u8; 4], timescale: u32) -> TrackFormat {
    TrackFormat {
        mime: mime_for(handler, *fourcc),
        handler,
        track_id: 0,
        timescale,
        duration_us: None,
        language: 0x55C4,
        width: handler.is_video().then_some(1280),
        height: handler.is_video().then_some(720),
        sample_rate: None,
        channels: None,
        sample_description: stsd(fourcc),
    }
}

/// Microsecond timestamp of video frame `i`.
pub fn video_ts(i: i64, fps: i64) -> i64 {
    i * 1_000_000 / fps
}

/// Microsecond timestamp of audio frame `i`.
pub fn audio_ts(i: i64) -> i64 {
    i * AUDIO_FRAME * 1_000_000 / AUDIO_RATE as i64
}

/// Payload of sample `i`: a tag byte, the index, then padding.
pub fn payload(tag: u8, i: i64, len: usize) -> Vec<u8> {
    let mut data = vec![tag, (i >> 8) as u8, i as u8];
    data.resize(len.max(3), tag ^ 0x5A);
    data
}

/// Description of a synthetic source file.
#[derive(Debug, Clone)]
pub struct Fixture {
    /// Video frames at `fps`; 0 for an audio-only file.
    pub video_frames: i64,
    pub fps: i64,
    /// Sync sample every `keyframe_interval` frames.
    pub keyframe_interval: i64,
    /// Audio frames of 1024 samples at 44.1 kHz; 0 for no audio.
    pub audio_frames: i64,
    /// Payload size of video keyframes.
    pub keyframe_bytes: usize,
    pub frame_bytes: usize,
    /// Reorder each group of three frames as I/P, B, B: decode order
    /// `3k, 3k+1, 3k+2` presents as `3k, 3k+2, 3k+1`, with decoding one
    /// frame ahead of presentation.
    pub b_frames: bool,
}

impl Fixture {
    /// 10 s of 30 fps video with one keyframe per second, plus 10 s of audio.
    pub fn ten_seconds() -> Self {
        Self {
            video_frames: 300,
            fps: 30,
            keyframe_interval: 30,
            audio_frames: 430,
            keyframe_bytes: 600,
            frame_bytes: 120,
            b_frames: false,
        }
    }

    pub fn b_frames(mut self) -> Self {
        self.b_frames = true;
        self
    }

    pub fn video_frames(mut self, frames: i64) -> Self {
        self.video_frames = frames;
        self
    }

    pub fn audio_frames(mut self, frames: i64) -> Self {
        self.audio_frames = frames;
        self
    }

    pub fn keyframe_bytes(mut self, bytes: usize) -> Self {
        self.keyframe_bytes = bytes;
        self
    }

    pub fn write(&self, path: &Path) -> PathBuf {
        let mut muxer = Mp4Muxer::create(path).unwrap();
        let video = (self.video_frames > 0).then(|| {
            muxer
                .add_track(&track_format(HandlerType::Video, b"avc1", VIDEO_TIMESCALE))
                .unwrap()
        });
        let audio = (self.audio_frames > 0).then(|| {
            muxer
                .add_track(&track_format(HandlerType::Audio, b"mp4a", AUDIO_RATE))
                .unwrap()
        });
        muxer.start().unwrap();

        // Interleave roughly by time the way a camera recorder would.
        let (mut v, mut a) = (0i64, 0i64);
        while v < self.video_frames || a < self.audio_frames {
            let next_video = (v < self.video_frames).then(|| video_ts(v, self.fps));
            let next_audio = (a < self.audio_frames).then(|| audio_ts(a));
            let video_first = match (next_video, next_audio) {
                (Some(vt), Some(at)) => vt <= at,
                (Some(_), None) => true,
                _ => false,
            };

            if video_first {
                let key = v % self.keyframe_interval == 0;
                let len = if key {
                    self.keyframe_bytes
                } else {
                    self.frame_bytes
                };
                let (pts, dts) = if self.b_frames {
                    let shown = match v % 3 {
                        1 => v + 1,
                        2 => v - 1,
                        _ => v,
                    };
                    (video_ts(shown, self.fps), video_ts(v - 1, self.fps))
                } else {
                    (video_ts(v, self.fps), video_ts(v, self.fps))
                };
                let info = SampleInfo {
                    presentation_time_us: pts,
                    decode_time_us: dts,
                    flags: if key {
                        BufferFlags::KEY_FRAME
                    } else {
                        BufferFlags::NONE
                    },
                };
                muxer
                    .write_sample(video.unwrap(), &payload(b'v', v, len), &info)
                    .unwrap();
                v += 1;
            } else {
                let ts = audio_ts(a);
                let info = SampleInfo {
                    presentation_time_us: ts,
                    decode_time_us: ts,
                    flags: BufferFlags::KEY_FRAME,
                };
                muxer
                    .write_sample(audio.unwrap(), &payload(b'a', a, 32), &info)
                    .unwrap();
                a += 1;
            }
        }

        muxer.finish().unwrap();
        path.to_path_buf()
    }
}

/// One sample read back from a file.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadSample {
    pub pts: i64,
    pub dts: i64,
    pub sync: bool,
    pub data: Vec<u8>,
}

/// Every sample of the first track whose mime starts with `kind`.
pub fn read_track(path: &Path, kind: &str) -> Vec<ReadSample> {
    let mut demuxer = Mp4Demuxer::open(path).unwrap().with_max_read_size(1 << 24);
    let Some(track) = (0..demuxer.track_count()).find(|&i| {
        demuxer
            .track_format(i)
            .map(|f| f.mime.starts_with(kind))
            .unwrap_or(false)
    }) else {
        return Vec::new();
    };
    demuxer.select_track(track).unwrap();

    let mut buf = vec![0u8; 1 << 24];
    let mut samples = Vec::new();
    while let Some(len) = demuxer.read_sample_data(&mut buf).unwrap() {
        samples.push(ReadSample {
            pts: demuxer.sample_time().unwrap(),
            dts: demuxer.sample_decode_time().unwrap(),
            sync: demuxer.sample_flags().contains(SampleFlags::SYNC),
            data: buf[..len].to_vec(),
        });
        if !demuxer.advance() {
            break;
        }
    }
    samples
}

pub fn track_count(path: &Path) -> usize {
    Mp4Demuxer::open(path).unwrap().track_count()
}

/// Collects every session notification.
#[derive(Debug, Default)]
pub struct Recorder {
    pub progress: Vec<f32>,
    pub successes: Vec<TrimOutcome>,
    pub errors: Vec<TrimFailure>,
}

impl Recorder {
    pub fn terminal_count(&self) -> usize {
        self.successes.len() + self.errors.len()
    }

    pub fn outcome(&self) -> &TrimOutcome {
        assert_eq!(self.terminal_count(), 1);
        self.successes
            .first()
            .unwrap_or_else(|| panic!("trim failed: {:?}", self.errors))
    }

    pub fn failure(&self) -> &TrimFailure {
        assert_eq!(self.terminal_count(), 1);
        self.errors.first().expect("trim unexpectedly succeeded")
    }
}

impl TrimObserver for Recorder {
    fn on_progress(&mut self, ratio: f32) {
        self.progress.push(ratio);
    }

    fn on_success(&mut self, outcome: TrimOutcome) {
        self.successes.push(outcome);
    }

    fn on_error(&mut self, failure: TrimFailure) {
        self.errors.push(failure);
    }
}

/// MP4 source that fails on demand for one track.
pub struct FlakySource {
    inner: Mp4Demuxer<BufReader<File>>,
    pub unreadable_format: Option<usize>,
    pub failing_reads: Option<usize>,
    pub hide_duration: bool,
    /// Reads of the failing track that succeed before the failure.
    pub reads_before_failure: usize,
    reads: usize,
}

impl FlakySource {
    pub fn open(path: &Path) -> trimforge_media::Result<Self> {
        Ok(Self {
            inner: Mp4Demuxer::open(path)?,
            unreadable_format: None,
            failing_reads: None,
            hide_duration: false,
            reads_before_failure: 0,
            reads: 0,
        })
    }

    pub fn max_read_size(mut self, bytes: usize) -> Self {
        self.inner.set_max_read_size(bytes);
        self
    }
}

impl ContainerHandle for FlakySource {
    fn track_count(&self) -> usize {
        self.inner.track_count()
    }

    fn track_format(&self, index: usize) -> trimforge_media::Result<TrackFormat> {
        if self.unreadable_format == Some(index) {
            return Err(Error::unsupported("injected format failure"));
        }
        let mut format = self.inner.track_format(index)?;
        if self.hide_duration {
            format.duration_us = None;
        }
        Ok(format)
    }

    fn select_track(&mut self, index: usize) -> trimforge_media::Result<()> {
        self.inner.select_track(index)
    }

    fn unselect_track(&mut self, index: usize) -> trimforge_media::Result<()> {
        self.inner.unselect_track(index)
    }

    fn seek_to(&mut self, time_us: i64, mode: SeekMode) {
        self.inner.seek_to(time_us, mode)
    }

    fn read_sample(&mut self, buf: &mut [u8]) -> trimforge_media::Result<Option<usize>> {
        if self.failing_reads.is_some() && self.inner.sample_track_index() == self.failing_reads {
            if self.reads >= self.reads_before_failure {
                return Err(Error::invalid_state("injected read failure"));
            }
            self.reads += 1;
        }
        self.inner.read_sample_data(buf)
    }

    fn sample_time(&self) -> Option<i64> {
        self.inner.sample_time()
    }

    fn sample_decode_time(&self) -> Option<i64> {
        self.inner.sample_decode_time()
    }

    fn sample_flags(&self) -> SampleFlags {
        self.inner.sample_flags()
    }

    fn advance(&mut self) -> bool {
        self.inner.advance()
    }
}

/// MP4 sink that refuses tracks of one handler type and records which
/// tracks received an end-of-stream marker.
pub struct FlakySink {
    inner: Mp4Muxer,
    pub reject: Option<HandlerType>,
    end_markers: Rc<RefCell<Vec<usize>>>,
}

impl FlakySink {
    pub fn create(path: &Path, reject: Option<HandlerType>) -> trimforge_media::Result<Self> {
        Ok(Self {
            inner: Mp4Muxer::create(path)?,
            reject,
            end_markers: Rc::default(),
        })
    }

    /// Share the end-of-stream record with the caller.
    pub fn recording_end_markers(mut self, markers: Rc<RefCell<Vec<usize>>>) -> Self {
        self.end_markers = markers;
        self
    }
}

impl OutputSink for FlakySink {
    fn add_track(&mut self, format: &TrackFormat) -> trimforge_media::Result<usize> {
        if self.reject == Some(format.handler) {
            return Err(Error::unsupported("injected track rejection"));
        }
        self.inner.add_track(format)
    }

    fn start(&mut self) -> trimforge_media::Result<()> {
        self.inner.start()
    }

    fn write_sample(
        &mut self,
        track: usize,
        data: &[u8],
        info: &SampleInfo,
    ) -> trimforge_media::Result<()> {
        if info.flags.contains(BufferFlags::END_OF_STREAM) {
            self.end_markers.borrow_mut().push(track);
        }
        self.inner.write_sample(track, data, info)
    }

    fn finish(&mut self) -> trimforge_media::Result<()> {
        self.inner.finish()
    }

    fn supports_partial_frames(&self) -> bool {
        self.inner.supports_partial_frames()
    }
}
