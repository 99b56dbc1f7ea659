//! Track classification and selection.
//!
//! Tracks are classified by the leading token of their mime type. The first
//! video and the first audio track are selected; everything else is ignored.

use crate::container::ContainerHandle;
use crate::error::{Result, TrimError};
use serde::Serialize;
use std::fmt;
use trimforge_media::{SeekMode, TrackFormat};

/// Media kind of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
    Other,
}

impl TrackKind {
    /// Classify by the part of the mime string before the first `/`.
    pub fn from_mime(mime: &str) -> Self {
        match mime.split('/').next().map(str::trim) {
            Some(t) if t.eq_ignore_ascii_case("video") => TrackKind::Video,
            Some(t) if t.eq_ignore_ascii_case("audio") => TrackKind::Audio,
            _ => TrackKind::Other,
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => f.write_str("video"),
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Other => f.write_str("other"),
        }
    }
}

/// One classified source track.
#[derive(Debug, Clone)]
pub struct TrackDescriptor {
    /// Index of the track in the source container.
    pub index: usize,
    pub kind: TrackKind,
    /// `None` when the track's format could not be read.
    pub format: Option<TrackFormat>,
    pub declared_duration_micros: Option<i64>,
}

/// Where the resolved duration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationSource {
    /// Declared in the video track's format.
    Declared,
    /// Maximum video sample timestamp found by a full scan.
    Scanned,
    /// Neither source produced a positive duration.
    Unknown,
}

/// A track chosen for remuxing.
#[derive(Debug, Clone)]
pub struct SelectedTrack {
    pub index: usize,
    pub format: TrackFormat,
}

/// Result of track resolution.
#[derive(Debug, Clone)]
pub struct ResolvedTracks {
    pub video: SelectedTrack,
    pub audio: Option<SelectedTrack>,
    /// Advisory source duration in microseconds.
    pub duration_us: Option<i64>,
    pub duration_source: DurationSource,
    /// Every track, classified.
    pub tracks: Vec<TrackDescriptor>,
}

/// Classify every track of `handle`. Unreadable formats are logged and
/// treated as [`TrackKind::Other`].
pub fn classify<H: ContainerHandle + ?Sized>(handle: &H) -> Vec<TrackDescriptor> {
    (0..handle.track_count())
        .map(|index| match handle.track_format(index) {
            Ok(format) => TrackDescriptor {
                index,
                kind: TrackKind::from_mime(&format.mime),
                declared_duration_micros: format.duration_us,
                format: Some(format),
            },
            Err(e) => {
                tracing::warn!(track = index, "Ignoring track with unreadable format: {}", e);
                TrackDescriptor {
                    index,
                    kind: TrackKind::Other,
                    format: None,
                    declared_duration_micros: None,
                }
            }
        })
        .collect()
}

/// Select the first video and audio tracks and resolve the source duration.
///
/// When the video format declares no duration, the video track is scanned
/// to the end and the handle is rewound and left with no track selected.
pub fn resolve<H: ContainerHandle + ?Sized>(handle: &mut H) -> Result<ResolvedTracks> {
    let tracks = classify(handle);

    let first = |kind: TrackKind| {
        tracks.iter().find(|t| t.kind == kind).and_then(|t| {
            t.format.clone().map(|format| SelectedTrack {
                index: t.index,
                format,
            })
        })
    };

    let video = first(TrackKind::Video).ok_or(TrimError::NoVideoTrack)?;
    let audio = first(TrackKind::Audio);

    let (duration_us, duration_source) = match video.format.duration_us.filter(|d| *d > 0) {
        Some(d) => (Some(d), DurationSource::Declared),
        None => match scan_duration(handle, video.index)? {
            Some(d) => (Some(d), DurationSource::Scanned),
            None => (None, DurationSource::Unknown),
        },
    };

    tracing::debug!(
        video = video.index,
        audio = ?audio.as_ref().map(|a| a.index),
        duration_us = ?duration_us,
        source = ?duration_source,
        "Resolved tracks"
    );

    Ok(ResolvedTracks {
        video,
        audio,
        duration_us,
        duration_source,
        tracks,
    })
}

/// Largest presentation time of `track`, or `None` if it has no samples or
/// never gets past zero.
fn scan_duration<H: ContainerHandle + ?Sized>(handle: &mut H, track: usize) -> Result<Option<i64>> {
    handle
        .select_track(track)
        .map_err(TrimError::extractor_init)?;

    let mut max_time = None::<i64>;
    while let Some(time) = handle.sample_time() {
        max_time = Some(max_time.map_or(time, |m| m.max(time)));
        if !handle.advance() {
            break;
        }
    }

    handle.seek_to(0, SeekMode::PreviousSync);
    handle
        .unselect_track(track)
        .map_err(TrimError::extractor_init)?;

    tracing::debug!(track, max_time = ?max_time, "Scanned video duration");
    Ok(max_time.filter(|m| *m > 0))
}
