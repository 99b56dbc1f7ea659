//! Per-track sample reading.

use crate::container::ContainerHandle;
use trimforge_media::{Error, Result, SampleFlags, SeekMode};

/// Owned read buffer for one track's processing loop.
#[derive(Debug)]
pub struct TrackBuffer {
    data: Vec<u8>,
}

impl TrackBuffer {
    /// Allocate a buffer of `capacity` bytes (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity.max(1)],
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}

/// One sample (or piece of a sample) read from the source.
#[derive(Debug, Clone, Copy)]
pub struct Sample<'b> {
    pub payload: &'b [u8],
    /// Presentation time in microseconds.
    pub timestamp_micros: i64,
    /// Decode time in microseconds.
    pub decode_micros: i64,
    pub flags: SampleFlags,
}

impl Sample<'_> {
    pub fn is_sync_point(&self) -> bool {
        self.flags.contains(SampleFlags::SYNC)
    }

    pub fn is_partial_frame(&self) -> bool {
        self.flags.contains(SampleFlags::PARTIAL_FRAME)
    }
}

/// Read cursor over exactly one selected track of a container.
pub struct SampleCursor<'h, H: ContainerHandle + ?Sized> {
    handle: &'h mut H,
    track: usize,
}

impl<'h, H: ContainerHandle + ?Sized> SampleCursor<'h, H> {
    /// Select `track` and unselect every other track.
    pub fn select(handle: &'h mut H, track: usize) -> Result<Self> {
        for index in 0..handle.track_count() {
            if index != track {
                handle.unselect_track(index)?;
            }
        }
        handle.select_track(track)?;
        Ok(Self { handle, track })
    }

    /// Presentation time of the current sample without reading it.
    pub fn sample_time(&self) -> Option<i64> {
        self.handle.sample_time()
    }

    /// Move to the nearest sync point at or before `timestamp_micros`.
    pub fn seek_near(&mut self, timestamp_micros: i64) {
        self.handle.seek_to(timestamp_micros, SeekMode::PreviousSync);
    }

    /// Read the current sample into `buffer`. `None` at end of track.
    pub fn read_next<'b>(&mut self, buffer: &'b mut TrackBuffer) -> Result<Option<Sample<'b>>> {
        let Some(len) = self.handle.read_sample(&mut buffer.data)? else {
            return Ok(None);
        };
        let (Some(timestamp_micros), Some(decode_micros)) =
            (self.handle.sample_time(), self.handle.sample_decode_time())
        else {
            return Err(Error::invalid_state("sample read without timing"));
        };

        Ok(Some(Sample {
            payload: &buffer.data[..len],
            timestamp_micros,
            decode_micros,
            flags: self.handle.sample_flags(),
        }))
    }

    /// Step to the next sample; `false` at end of track.
    pub fn advance(&mut self) -> bool {
        self.handle.advance()
    }
}

impl<H: ContainerHandle + ?Sized> Drop for SampleCursor<'_, H> {
    fn drop(&mut self) {
        if let Err(e) = self.handle.unselect_track(self.track) {
            tracing::debug!(track = self.track, "Failed to unselect track: {}", e);
        }
    }
}
