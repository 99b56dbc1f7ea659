//! Trimforge - lossless MP4 trimming
//!
//! Copies the samples of a source MP4 that fall inside a time range into a new
//! MP4 without decoding. Each track is read from the sync point at or before
//! the start, samples before the start are skipped, and every timestamp is
//! rebased so the output starts at zero.
//!
//! The entry point is [`TrimSession`] (blocking, observer callbacks) or
//! [`spawn_trim`] (async, event channel). Container access goes through the
//! [`ContainerHandle`] and [`OutputSink`] traits, implemented for the
//! `trimforge-media` demuxer and muxer.

pub mod config;
pub mod container;
pub mod cursor;
pub mod error;
pub mod flags;
pub mod pipeline;
pub mod probe;
pub mod resolver;
pub mod session;
pub mod timecode;

pub use container::{ContainerHandle, OutputSink};
pub use error::{ErrorKind, Result, TrimError};
pub use pipeline::{AudioOutcome, TrimOptions, TrimOutcome, TrimRange};
pub use session::{
    spawn_trim, SessionState, TrimEvent, TrimFailure, TrimHandle, TrimObserver, TrimRequest,
    TrimSession,
};
