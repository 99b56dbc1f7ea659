//! Error type for trim sessions.
//!
//! Every failure inside a session is funneled into [`TrimError`], whose
//! [`kind`](TrimError::kind) is what callers see at the session boundary.

use crate::resolver::TrackKind;
use serde::Serialize;
use std::fmt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification of a trim failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Blank paths, unreadable source, or an inverted/negative range.
    InvalidInput,
    /// The source has no track classified as video.
    NoVideoTrack,
    /// The requested end lies beyond a known source duration.
    RangeExceedsDuration,
    /// The output container could not be created or configured.
    MuxerInit,
    /// The source container could not be opened or parsed.
    ExtractorInit,
    /// Copying the samples of a track failed.
    TrackProcessing,
    /// The run finished but left no usable output file.
    OutputVerification,
    /// Unclassified I/O failure.
    Io,
    /// Illegal session transition or a panicked worker.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidInput => "invalid input",
            Self::NoVideoTrack => "no video track",
            Self::RangeExceedsDuration => "range exceeds duration",
            Self::MuxerInit => "muxer initialization",
            Self::ExtractorInit => "extractor initialization",
            Self::TrackProcessing => "track processing",
            Self::OutputVerification => "output verification",
            Self::Io => "I/O",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Failure of a trim session.
#[derive(Debug, thiserror::Error)]
pub enum TrimError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No video track found in source")]
    NoVideoTrack,

    #[error("Requested end {end_micros}us exceeds source duration {duration_micros}us")]
    RangeExceedsDuration {
        end_micros: i64,
        duration_micros: i64,
    },

    #[error("Failed to initialize output: {source}")]
    MuxerInit { source: BoxError },

    #[error("Failed to open source: {source}")]
    ExtractorInit { source: BoxError },

    #[error("Failed to process {track} track: {source}")]
    TrackProcessing { track: TrackKind, source: BoxError },

    #[error("Output verification failed: {0}")]
    OutputVerification(String),

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrimError {
    /// The kind reported to callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrimError::InvalidInput(_) => ErrorKind::InvalidInput,
            TrimError::NoVideoTrack => ErrorKind::NoVideoTrack,
            TrimError::RangeExceedsDuration { .. } => ErrorKind::RangeExceedsDuration,
            TrimError::MuxerInit { .. } => ErrorKind::MuxerInit,
            TrimError::ExtractorInit { .. } => ErrorKind::ExtractorInit,
            TrimError::TrackProcessing { .. } => ErrorKind::TrackProcessing,
            TrimError::OutputVerification(_) => ErrorKind::OutputVerification,
            TrimError::Io { .. } => ErrorKind::Io,
            TrimError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        TrimError::InvalidInput(msg.into())
    }

    pub fn muxer_init(source: impl Into<BoxError>) -> Self {
        TrimError::MuxerInit {
            source: source.into(),
        }
    }

    pub fn extractor_init(source: impl Into<BoxError>) -> Self {
        TrimError::ExtractorInit {
            source: source.into(),
        }
    }

    pub fn track_processing(track: TrackKind, source: impl Into<BoxError>) -> Self {
        TrimError::TrackProcessing {
            track,
            source: source.into(),
        }
    }

    /// Map a container error that is not tied to a specific step: I/O
    /// failures keep their kind, anything else is internal.
    pub fn from_media(err: trimforge_media::Error) -> Self {
        match err {
            trimforge_media::Error::Io(source) => TrimError::Io { source },
            other => TrimError::Internal(other.to_string()),
        }
    }
}

/// Result alias using [`TrimError`].
pub type Result<T> = std::result::Result<T, TrimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_display() {
        let err = TrimError::invalid_input("end must be after start");
        assert_eq!(err.to_string(), "Invalid input: end must be after start");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn range_display() {
        let err = TrimError::RangeExceedsDuration {
            end_micros: 50_000_000,
            duration_micros: 5_000_000,
        };
        assert_eq!(
            err.to_string(),
            "Requested end 50000000us exceeds source duration 5000000us"
        );
        assert_eq!(err.kind(), ErrorKind::RangeExceedsDuration);
    }

    #[test]
    fn track_processing_names_track() {
        let err = TrimError::track_processing(
            TrackKind::Video,
            trimforge_media::Error::invalid_state("boom"),
        );
        assert_eq!(
            err.to_string(),
            "Failed to process video track: Invalid state: boom"
        );
        assert_eq!(err.kind(), ErrorKind::TrackProcessing);
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = TrimError::from(io_err);
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn media_errors_keep_io_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert_eq!(
            TrimError::from_media(trimforge_media::Error::Io(io)).kind(),
            ErrorKind::Io
        );
        assert_eq!(
            TrimError::from_media(trimforge_media::Error::TracksLocked).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn kind_display() {
        assert_eq!(ErrorKind::NoVideoTrack.to_string(), "no video track");
        assert_eq!(ErrorKind::Io.to_string(), "I/O");
    }
}
