use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the container layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The bytes do not form a usable ISO-BMFF structure.
    #[error("Invalid MP4: {0}")]
    InvalidMp4(String),

    /// A box the operation depends on is absent.
    #[error("Missing required atom: {0}")]
    MissingAtom(&'static str),

    /// Well-formed input this crate does not handle.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Invalid track index: {index} (track count: {count})")]
    TrackNotFound { index: usize, count: usize },

    /// A demuxer or muxer call made out of order.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Tracks can no longer be added once the muxer has started")]
    TracksLocked,
}

impl Error {
    pub fn invalid_mp4(msg: impl Into<String>) -> Self {
        Self::InvalidMp4(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_index_message_names_count() {
        let err = Error::TrackNotFound { index: 3, count: 2 };
        assert_eq!(err.to_string(), "Invalid track index: 3 (track count: 2)");
    }

    #[test]
    fn io_errors_convert() {
        let err: Error = io::Error::new(io::ErrorKind::UnexpectedEof, "short read").into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("short read"));
    }
}
