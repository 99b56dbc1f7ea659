//! Track inspection for the `probe` command.

use crate::error::{Result, TrimError};
use crate::resolver::{self, DurationSource, TrackKind};
use serde::Serialize;
use std::path::{Path, PathBuf};
use trimforge_media::Mp4Demuxer;

/// One track as listed by `probe`.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeTrack {
    pub index: usize,
    pub kind: TrackKind,
    pub mime: Option<String>,
    pub timescale: u32,
    pub duration_us: Option<i64>,
    pub sample_count: usize,
    pub sync_samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
}

/// Tracks of a file and what a trim would select from them.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub file: PathBuf,
    pub faststart: bool,
    pub tracks: Vec<ProbeTrack>,
    pub video_track: Option<usize>,
    pub audio_track: Option<usize>,
    pub duration_us: Option<i64>,
    pub duration_source: DurationSource,
}

/// Parse `path` and report on its tracks.
///
/// A file without video is still reported; it just selects nothing.
pub fn probe_file(path: &Path) -> Result<ProbeReport> {
    let mut demuxer = Mp4Demuxer::open(path).map_err(TrimError::extractor_init)?;

    let descriptors = resolver::classify(&demuxer);
    let tracks = descriptors
        .iter()
        .map(|d| {
            let info = &demuxer.file().tracks[d.index];
            let format = d.format.as_ref();
            ProbeTrack {
                index: d.index,
                kind: d.kind,
                mime: format.map(|f| f.mime.clone()),
                timescale: info.timescale,
                duration_us: format.and_then(|f| f.duration_us),
                sample_count: info.sample_table.len(),
                sync_samples: info.sample_table.sync_count(),
                width: format.and_then(|f| f.width),
                height: format.and_then(|f| f.height),
                sample_rate: format.and_then(|f| f.sample_rate),
                channels: format.and_then(|f| f.channels),
            }
        })
        .collect();

    let faststart = demuxer.file().moov_before_mdat;
    let (video_track, audio_track, duration_us, duration_source) =
        match resolver::resolve(&mut demuxer) {
            Ok(resolved) => (
                Some(resolved.video.index),
                resolved.audio.map(|a| a.index),
                resolved.duration_us,
                resolved.duration_source,
            ),
            Err(TrimError::NoVideoTrack) => (
                None,
                descriptors
                    .iter()
                    .find(|d| d.kind == TrackKind::Audio && d.format.is_some())
                    .map(|d| d.index),
                None,
                DurationSource::Unknown,
            ),
            Err(e) => return Err(e),
        };

    tracing::debug!(
        file = %path.display(),
        tracks = demuxer.track_count(),
        "Probed file"
    );

    Ok(ProbeReport {
        file: path.to_path_buf(),
        faststart,
        tracks,
        video_track,
        audio_track,
        duration_us,
        duration_source,
    })
}
