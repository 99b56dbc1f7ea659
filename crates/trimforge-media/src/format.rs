//! Track formats and per-sample flag vocabularies shared by the demuxer and
//! the muxer.

use crate::mp4::{HandlerType, TrackInfo};
use crate::time::ticks_to_us;
use bytes::Bytes;
use std::fmt;

/// Format metadata for one track, as exposed by the demuxer and accepted by
/// the muxer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFormat {
    /// Mime-like codec identifier, e.g. `video/avc` or `audio/mp4a-latm`.
    pub mime: String,
    /// Handler type of the source track.
    pub handler: HandlerType,
    /// Track ID in the source file.
    pub track_id: u32,
    /// Media timescale (ticks per second).
    pub timescale: u32,
    /// Declared media duration, when the container carries one.
    pub duration_us: Option<i64>,
    /// Packed ISO-639-2 language code.
    pub language: u16,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    /// Raw `stsd` payload, copied verbatim into the output.
    pub sample_description: Bytes,
}

impl TrackFormat {
    /// Build a format from a parsed track.
    pub fn from_track(track: &TrackInfo) -> crate::Result<Self> {
        let fourcc = track
            .sample_entry_type
            .ok_or(crate::Error::MissingAtom("stsd"))?;

        let duration_us = match track.duration {
            0 | u64::MAX => None,
            // 32-bit "unknown" sentinel from version 0 mdhd
            d if d == u32::MAX as u64 => None,
            d => Some(ticks_to_us(d as i64, track.timescale)),
        };

        Ok(Self {
            mime: mime_for(track.handler_type, fourcc),
            handler: track.handler_type,
            track_id: track.track_id,
            timescale: track.timescale,
            duration_us,
            language: track.language,
            width: track.width,
            height: track.height,
            sample_rate: track.sample_rate,
            channels: track.channels,
            sample_description: Bytes::copy_from_slice(&track.sample_description),
        })
    }

    /// Fourcc of the first sample entry in the sample description.
    pub fn sample_entry_type(&self) -> Option<[u8; 4]> {
        let d = &self.sample_description;
        (d.len() >= 16).then(|| [d[12], d[13], d[14], d[15]])
    }
}

/// Map a sample-entry fourcc (and the handler as fallback) to a mime string.
pub fn mime_for(handler: HandlerType, fourcc: [u8; 4]) -> String {
    let known = match &fourcc {
        b"avc1" | b"avc3" => Some("video/avc"),
        b"hvc1" | b"hev1" => Some("video/hevc"),
        b"av01" => Some("video/av01"),
        b"vp09" => Some("video/x-vnd.on2.vp9"),
        b"vp08" => Some("video/x-vnd.on2.vp8"),
        b"mp4v" => Some("video/mp4v-es"),
        b"s263" => Some("video/3gpp"),
        b"mp4a" => Some("audio/mp4a-latm"),
        b"Opus" => Some("audio/opus"),
        b"ac-3" => Some("audio/ac3"),
        b"ec-3" => Some("audio/eac3"),
        b"fLaC" => Some("audio/flac"),
        b"samr" => Some("audio/3gpp"),
        b"tx3g" => Some("text/3gpp"),
        b"wvtt" => Some("text/vtt"),
        _ => None,
    };

    if let Some(mime) = known {
        return mime.to_string();
    }

    let code = String::from_utf8_lossy(&fourcc).trim().to_lowercase();
    match handler {
        HandlerType::Video => format!("video/x-{code}"),
        HandlerType::Audio => format!("audio/x-{code}"),
        HandlerType::Text | HandlerType::Subtitle => format!("text/x-{code}"),
        _ => format!("application/x-{code}"),
    }
}

/// Per-sample flags reported by the demuxer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SampleFlags(pub u32);

impl SampleFlags {
    pub const NONE: Self = Self(0);
    /// Sample is decodable without reference to earlier samples.
    pub const SYNC: Self = Self(1);
    /// Sample payload is encrypted.
    pub const ENCRYPTED: Self = Self(2);
    /// Read returned only part of a sample; more pieces follow.
    pub const PARTIAL_FRAME: Self = Self(4);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for SampleFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for SampleFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Per-sample flags accepted by the muxer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BufferFlags(pub u32);

impl BufferFlags {
    pub const NONE: Self = Self(0);
    pub const KEY_FRAME: Self = Self(1);
    pub const CODEC_CONFIG: Self = Self(2);
    pub const END_OF_STREAM: Self = Self(4);
    pub const PARTIAL_FRAME: Self = Self(8);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for BufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for BufferFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::KEY_FRAME, "KEY"),
            (Self::CODEC_CONFIG, "CONFIG"),
            (Self::END_OF_STREAM, "EOS"),
            (Self::PARTIAL_FRAME, "PARTIAL"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", set.join("|"))
        }
    }
}

/// Timing and flags for one sample handed to the muxer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    /// Presentation time in microseconds.
    pub presentation_time_us: i64,
    /// Decode time in microseconds.
    pub decode_time_us: i64,
    pub flags: BufferFlags,
}

impl SampleInfo {
    /// Marker that closes a track: no payload, end-of-stream flag.
    pub fn end_of_stream() -> Self {
        Self {
            presentation_time_us: 0,
            decode_time_us: 0,
            flags: BufferFlags::END_OF_STREAM,
        }
    }
}
