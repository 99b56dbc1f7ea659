//! Translation from extractor sample flags to muxer buffer flags.

use trimforge_media::{BufferFlags, SampleFlags};

/// What the output sink can represent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkCapabilities {
    /// The sink reassembles samples delivered as partial pieces.
    pub partial_frames: bool,
}

/// Map extractor flags onto the muxer's vocabulary.
///
/// Sync samples become key frames. The partial-frame marker survives only if
/// the sink supports it. Every other bit is dropped.
pub fn translate(flags: SampleFlags, caps: SinkCapabilities) -> BufferFlags {
    let mut out = BufferFlags::NONE;
    if flags.contains(SampleFlags::SYNC) {
        out |= BufferFlags::KEY_FRAME;
    }
    if caps.partial_frames && flags.contains(SampleFlags::PARTIAL_FRAME) {
        out |= BufferFlags::PARTIAL_FRAME;
    }
    out
}
