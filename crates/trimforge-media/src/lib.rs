//! Trimforge-Media: MP4 demultiplexing and progressive MP4 multiplexing
//!
//! This crate provides the container primitives the trim engine is built on.
//! Samples are copied byte for byte; nothing is decoded or re-encoded.
//!
//! # Modules
//!
//! - `mp4` - MP4 container parsing (moov, edit lists, sample tables)
//! - `demux` - Sample-level reading with sync-point seeking
//! - `mux` - Progressive MP4 writing (ftyp, mdat, moov trailer)
//! - `format` - Track formats and per-sample flag vocabularies
//! - `time` - Timescale tick / microsecond conversions
//!
//! # Architecture
//!
//! Reading parses the `moov` atom once and resolves every sample's offset,
//! size, decode time and composition offset. The demuxer then walks the
//! selected tracks in decode order and reads payloads on demand.
//!
//! Writing appends payloads to a single `mdat` whose 64-bit size is patched
//! at finish, followed by a `moov` rebuilt from the recorded samples. The
//! source `stsd` payload is carried through verbatim, so codec configuration
//! survives the round trip untouched.

pub mod demux;
pub mod error;
pub mod format;
pub mod mp4;
pub mod mux;
pub mod time;

pub use demux::{Mp4Demuxer, SeekMode};
pub use error::{Error, Result};
pub use format::{BufferFlags, SampleFlags, SampleInfo, TrackFormat};
pub use mp4::{HandlerType, Mp4File};
pub use mux::{Mp4Muxer, MuxerState};
