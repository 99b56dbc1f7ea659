//! Per-track metadata gathered from a `trak` box.

use super::SampleTable;

/// Media handler declared in `hdlr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerType {
    Video,
    Audio,
    Hint,
    Meta,
    Text,
    Subtitle,
    Unknown([u8; 4]),
}

impl HandlerType {
    pub fn from_bytes(code: [u8; 4]) -> Self {
        match &code {
            b"vide" => Self::Video,
            b"soun" => Self::Audio,
            b"hint" => Self::Hint,
            b"meta" => Self::Meta,
            b"text" => Self::Text,
            b"sbtl" | b"subt" => Self::Subtitle,
            _ => Self::Unknown(code),
        }
    }

    /// Code written back into an `hdlr` box.
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            Self::Video => *b"vide",
            Self::Audio => *b"soun",
            Self::Hint => *b"hint",
            Self::Meta => *b"meta",
            Self::Text => *b"text",
            Self::Subtitle => *b"sbtl",
            Self::Unknown(code) => *code,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video)
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio)
    }
}

/// One track of a parsed movie.
///
/// Times are in the track's media timescale unless noted otherwise.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub track_id: u32,
    pub handler_type: HandlerType,
    /// `mdhd` duration; 0 when the muxer left it unset.
    pub duration: u64,
    pub timescale: u32,
    /// Packed ISO-639-2 code.
    pub language: u16,
    /// Media time where presentation begins.
    pub edit_media_time: i64,
    /// Sum of leading empty edits, in movie timescale.
    pub empty_edit_duration: u64,
    pub sample_table: SampleTable,
    /// Type of the first `stsd` entry.
    pub sample_entry_type: Option<[u8; 4]>,
    /// `stsd` payload as stored, copied verbatim on remux.
    pub sample_description: Vec<u8>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

impl TrackInfo {
    pub fn new(track_id: u32) -> Self {
        Self {
            track_id,
            handler_type: HandlerType::Unknown([0; 4]),
            duration: 0,
            timescale: 1,
            // "und"
            language: 0x55C4,
            edit_media_time: 0,
            empty_edit_duration: 0,
            sample_table: SampleTable::default(),
            sample_entry_type: None,
            sample_description: Vec::new(),
            width: None,
            height: None,
            sample_rate: None,
            channels: None,
        }
    }
}
