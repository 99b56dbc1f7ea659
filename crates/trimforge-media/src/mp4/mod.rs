//! ISO base media file parsing.
//!
//! Only the movie structure is read: the `moov` box is decoded into one
//! [`TrackInfo`] per `trak`, each with a flattened [`SampleTable`]. Payloads
//! stay on disk until the demuxer asks for them.

mod parse;
mod sample_table;
mod track;

pub use parse::{read_movie, scan_top_level, BoxHeader, MAX_MOOV_SIZE};
pub use sample_table::{SampleEntry, SampleSizes, SampleTable, SampleTables};
pub use track::{HandlerType, TrackInfo};

use crate::time::ticks_to_us;
use crate::Result;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

/// Movie structure of one file.
#[derive(Debug)]
pub struct Mp4File {
    /// `mvhd` timescale, used by edit list durations.
    pub movie_timescale: u32,
    /// `mvhd` duration; 0 when unset.
    pub movie_duration: u64,
    /// Every parseable track, in file order.
    pub tracks: Vec<TrackInfo>,
    /// `moov` precedes `mdat`, or there is no `mdat`.
    pub moov_before_mdat: bool,
}

impl Mp4File {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::parse(&mut reader)
    }

    pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        read_movie(reader)
    }

    /// Declared movie duration in microseconds, if any.
    pub fn duration_us(&self) -> Option<i64> {
        (self.movie_duration > 0 && self.movie_timescale > 0)
            .then(|| ticks_to_us(self.movie_duration as i64, self.movie_timescale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie(timescale: u32, duration: u64) -> Mp4File {
        Mp4File {
            movie_timescale: timescale,
            movie_duration: duration,
            tracks: Vec::new(),
            moov_before_mdat: true,
        }
    }

    #[test]
    fn test_declared_duration() {
        assert_eq!(movie(1000, 120_000).duration_us(), Some(120_000_000));
        assert_eq!(movie(600, 1).duration_us(), Some(1666));
    }

    #[test]
    fn test_unset_duration() {
        assert_eq!(movie(1000, 0).duration_us(), None);
        assert_eq!(movie(0, 5).duration_us(), None);
    }
}
