//! The remux pipeline: one pass from source container to trimmed output.
//!
//! Steps run strictly in order:
//!
//! 1. Open the source and resolve its tracks
//! 2. Validate the range against the resolved duration
//! 3. Open the output (creating its directory) and declare tracks
//! 4. Copy the video track, then the audio track
//! 5. Finalize the output and check it is non-empty
//!
//! Both tracks are rebased to the earliest video presentation time written,
//! so the output's first video frame is presented at zero.
//!
//! A video failure aborts the run before finalization. An audio failure is
//! logged and the output is finalized without audio.

use crate::container::{ContainerHandle, OutputSink};
use crate::cursor::{SampleCursor, TrackBuffer};
use crate::error::{Result, TrimError};
use crate::flags::{translate, SinkCapabilities};
use crate::resolver::{self, DurationSource, TrackKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use trimforge_media::{Mp4Demuxer, Mp4Muxer, SampleInfo};

/// Tunables for a trim run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimOptions {
    /// Size of the per-track read buffer; larger samples arrive in pieces.
    pub read_buffer_bytes: usize,
    /// Minimum source-time distance between progress reports.
    pub progress_interval_micros: i64,
}

impl Default for TrimOptions {
    fn default() -> Self {
        Self {
            read_buffer_bytes: 1024 * 1024,
            progress_interval_micros: 100_000,
        }
    }
}

/// Requested window in source microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimRange {
    pub start_micros: i64,
    pub end_micros: i64,
}

impl TrimRange {
    pub fn new(start_micros: i64, end_micros: i64) -> Self {
        Self {
            start_micros,
            end_micros,
        }
    }

    pub fn duration_micros(&self) -> i64 {
        self.end_micros - self.start_micros
    }
}

/// What happened to the audio track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AudioOutcome {
    /// The source has no audio track.
    Absent,
    /// Audio was copied.
    Copied { samples: u64 },
    /// Audio could not be copied; the output is video-only.
    Dropped { reason: String },
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrimOutcome {
    pub output_path: PathBuf,
    pub output_bytes: u64,
    /// Complete video samples written.
    pub video_samples: u64,
    pub audio: AudioOutcome,
    /// Advisory source duration used for validation.
    pub source_duration_micros: Option<i64>,
}

/// Pipeline stages visible to a [`PipelineListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Source opened; tracks and duration are being resolved.
    Resolving,
    /// Output declared; samples are being copied.
    Muxing,
    /// Samples copied; the trailer is being written and checked.
    Finalizing,
}

/// Receives stage changes and progress from a running pipeline.
pub trait PipelineListener {
    fn on_stage(&mut self, _stage: Stage) {}

    fn on_progress(&mut self, ratio: f32);
}

impl<F: FnMut(f32)> PipelineListener for F {
    fn on_progress(&mut self, ratio: f32) {
        self(ratio)
    }
}

/// Trim `input` into a new MP4 at `output`.
pub fn remux_file(
    input: &Path,
    output: &Path,
    range: TrimRange,
    options: &TrimOptions,
    listener: &mut dyn PipelineListener,
) -> Result<TrimOutcome> {
    remux(
        || Mp4Demuxer::open(input).map(|d| d.with_max_read_size(options.read_buffer_bytes)),
        |path| Mp4Muxer::create(path),
        output,
        range,
        options,
        listener,
    )
}

/// Run the pipeline over any container and sink implementation.
pub fn remux<H, S>(
    open_source: impl FnOnce() -> trimforge_media::Result<H>,
    open_sink: impl FnOnce(&Path) -> trimforge_media::Result<S>,
    output: &Path,
    range: TrimRange,
    options: &TrimOptions,
    listener: &mut dyn PipelineListener,
) -> Result<TrimOutcome>
where
    H: ContainerHandle,
    S: OutputSink,
{
    let mut handle = open_source().map_err(TrimError::extractor_init)?;

    listener.on_stage(Stage::Resolving);
    let tracks = resolver::resolve(&mut handle)?;
    validate_range(range, tracks.duration_us, tracks.duration_source)?;
    let origin = presentation_origin(&mut handle, tracks.video.index, range)
        .map_err(|e| TrimError::track_processing(TrackKind::Video, e))?;
    tracing::debug!(origin_micros = origin, "Resolved output time origin");

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(TrimError::muxer_init)?;
    }
    let mut sink = open_sink(output).map_err(TrimError::muxer_init)?;

    let video_out = sink
        .add_track(&tracks.video.format)
        .map_err(TrimError::muxer_init)?;

    let mut audio_outcome = AudioOutcome::Absent;
    let audio = match &tracks.audio {
        Some(audio) => match sink.add_track(&audio.format) {
            Ok(out) => Some((audio.index, out)),
            Err(e) => {
                tracing::warn!("Dropping audio track {}: {}", audio.index, e);
                audio_outcome = AudioOutcome::Dropped {
                    reason: e.to_string(),
                };
                None
            }
        },
        None => None,
    };

    sink.start().map_err(TrimError::muxer_init)?;
    listener.on_stage(Stage::Muxing);

    let mut progress = ProgressThrottle::new(range, options.progress_interval_micros, listener);
    let video_samples = copy_track(
        &mut handle,
        &mut sink,
        (tracks.video.index, video_out),
        range,
        origin,
        options,
        Some(&mut progress),
    )
    .map_err(|e| TrimError::track_processing(TrackKind::Video, e))?;
    progress.finish();
    tracing::debug!(samples = video_samples, "Copied video track");

    if let Some((source, out)) = audio {
        match copy_track(&mut handle, &mut sink, (source, out), range, origin, options, None) {
            Ok(samples) => {
                tracing::debug!(samples, "Copied audio track");
                audio_outcome = AudioOutcome::Copied { samples };
            }
            Err(e) => {
                tracing::warn!("Audio track failed, continuing video-only: {}", e);
                audio_outcome = AudioOutcome::Dropped {
                    reason: e.to_string(),
                };
            }
        }
    }

    listener.on_stage(Stage::Finalizing);
    sink.finish().map_err(TrimError::from_media)?;
    drop(sink);
    drop(handle);

    let output_bytes = verify_output(output)?;
    tracing::info!(
        output = %output.display(),
        bytes = output_bytes,
        video_samples,
        "Trim complete"
    );

    Ok(TrimOutcome {
        output_path: output.to_path_buf(),
        output_bytes,
        video_samples,
        audio: audio_outcome,
        source_duration_micros: tracks.duration_us,
    })
}

/// Reject an end beyond a known duration.
fn validate_range(range: TrimRange, duration_us: Option<i64>, source: DurationSource) -> Result<()> {
    match duration_us {
        Some(duration) if range.end_micros > duration => Err(TrimError::RangeExceedsDuration {
            end_micros: range.end_micros,
            duration_micros: duration,
        }),
        Some(_) => Ok(()),
        None => {
            tracing::debug!(?source, "Source duration unknown; clipping to available samples");
            Ok(())
        }
    }
}

/// Earliest presentation time the video pass writes.
///
/// Mirrors the copy loop on timestamps alone: from the sync point before the
/// start until the first sample past the end. Falls back to the range start
/// when no video sample lies inside the window.
fn presentation_origin<H: ContainerHandle>(
    handle: &mut H,
    video: usize,
    range: TrimRange,
) -> trimforge_media::Result<i64> {
    let mut cursor = SampleCursor::select(handle, video)?;
    cursor.seek_near(range.start_micros);

    let mut origin = None::<i64>;
    while let Some(time) = cursor.sample_time() {
        if time > range.end_micros {
            break;
        }
        if time >= range.start_micros {
            origin = Some(origin.map_or(time, |o| o.min(time)));
        }
        if !cursor.advance() {
            break;
        }
    }
    Ok(origin.unwrap_or(range.start_micros))
}

/// Copy the samples of one track presented in `origin..=range.end`, rebased
/// so `origin` becomes zero. Returns the number of complete samples written.
fn copy_track<H: ContainerHandle, S: OutputSink>(
    handle: &mut H,
    sink: &mut S,
    (source, out): (usize, usize),
    range: TrimRange,
    origin: i64,
    options: &TrimOptions,
    mut progress: Option<&mut ProgressThrottle<'_>>,
) -> trimforge_media::Result<u64> {
    let caps = SinkCapabilities {
        partial_frames: sink.supports_partial_frames(),
    };
    let mut buffer = TrackBuffer::new(options.read_buffer_bytes);
    let mut cursor = SampleCursor::select(handle, source)?;
    cursor.seek_near(range.start_micros);

    let mut written = 0u64;
    loop {
        let Some(sample) = cursor.read_next(&mut buffer)? else {
            sink.write_sample(out, &[], &SampleInfo::end_of_stream())?;
            break;
        };

        if sample.timestamp_micros > range.end_micros {
            if written == 0 {
                sink.write_sample(out, &[], &SampleInfo::end_of_stream())?;
            }
            break;
        }

        if sample.timestamp_micros >= origin {
            let info = SampleInfo {
                presentation_time_us: sample.timestamp_micros - origin,
                decode_time_us: sample.decode_micros - origin,
                flags: translate(sample.flags, caps),
            };
            sink.write_sample(out, sample.payload, &info)?;
            if !sample.is_partial_frame() {
                written += 1;
            }
            if let Some(progress) = progress.as_deref_mut() {
                progress.observe(sample.timestamp_micros);
            }
        }

        if !cursor.advance() {
            sink.write_sample(out, &[], &SampleInfo::end_of_stream())?;
            break;
        }
    }

    Ok(written)
}

fn verify_output(output: &Path) -> Result<u64> {
    match std::fs::metadata(output) {
        Ok(meta) if meta.len() > 0 => Ok(meta.len()),
        Ok(_) => Err(TrimError::OutputVerification(format!(
            "{} is empty",
            output.display()
        ))),
        Err(e) => Err(TrimError::OutputVerification(format!(
            "{} is missing: {}",
            output.display(),
            e
        ))),
    }
}

/// Rate-limits progress by source time and keeps it non-decreasing.
pub struct ProgressThrottle<'a> {
    range: TrimRange,
    interval: i64,
    last_reported_at: i64,
    last_value: Option<f32>,
    last_written: Option<i64>,
    listener: &'a mut dyn PipelineListener,
}

impl<'a> ProgressThrottle<'a> {
    pub fn new(range: TrimRange, interval: i64, listener: &'a mut dyn PipelineListener) -> Self {
        Self {
            range,
            interval,
            last_reported_at: 0,
            last_value: None,
            last_written: None,
            listener,
        }
    }

    /// Ratio of `timestamp` within the range, clamped to `[0, 1]`.
    pub fn ratio(&self, timestamp: i64) -> f32 {
        let span = self.range.duration_micros();
        if span <= 0 {
            return 1.0;
        }
        let ratio = (timestamp - self.range.start_micros) as f64 / span as f64;
        ratio.clamp(0.0, 1.0) as f32
    }

    /// Record a written sample's source timestamp.
    pub fn observe(&mut self, timestamp: i64) {
        self.last_written = Some(timestamp);
        if timestamp - self.last_reported_at > self.interval {
            self.last_reported_at = timestamp;
            self.report(self.ratio(timestamp));
        }
    }

    /// Report the last written sample if that value was not reported yet.
    pub fn finish(&mut self) {
        if let Some(timestamp) = self.last_written {
            self.report(self.ratio(timestamp));
        }
    }

    fn report(&mut self, ratio: f32) {
        let ratio = self.last_value.map_or(ratio, |last| ratio.max(last));
        if self.last_value == Some(ratio) {
            return;
        }
        self.last_value = Some(ratio);
        self.listener.on_progress(ratio);
    }
}
