//! Box serialization for the `moov` trailer.
//!
//! [`BoxWriter`] appends boxes into one buffer. A box is opened, filled and
//! closed; closing back-patches its 32-bit size, so nested structures are
//! written in a single pass.

use crate::mp4::HandlerType;
use bytes::{BufMut, Bytes, BytesMut};

/// Offset of the 64-bit size inside [`mdat_header`].
pub(crate) const MDAT_LARGESIZE_OFFSET: u64 = 8;
pub(crate) const MDAT_HEADER_SIZE: u64 = 16;

/// 1.0 in 16.16 fixed point.
const FIXED_ONE: u32 = 0x0001_0000;
const UNITY_MATRIX: [u32; 9] = [FIXED_ONE, 0, 0, 0, FIXED_ONE, 0, 0, 0, 0x4000_0000];

#[derive(Debug, Default)]
pub(crate) struct BoxWriter {
    buf: BytesMut,
    /// Start offsets of boxes not yet closed.
    open: Vec<usize>,
}

impl BoxWriter {
    pub(crate) fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            open: Vec::new(),
        }
    }

    pub(crate) fn open(&mut self, kind: &[u8; 4]) -> &mut Self {
        self.open.push(self.buf.len());
        self.buf.put_u32(0); // placeholder size
        self.buf.put_slice(kind);
        self
    }

    /// Open a box that starts with a version byte and 24 bits of flags.
    pub(crate) fn open_full(&mut self, kind: &[u8; 4], version: u8, flags: u32) -> &mut Self {
        self.open(kind);
        self.buf.put_u8(version);
        self.buf.put_uint(u64::from(flags & 0x00FF_FFFF), 3);
        self
    }

    pub(crate) fn close(&mut self) -> &mut Self {
        if let Some(start) = self.open.pop() {
            let size = (self.buf.len() - start) as u32;
            self.buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
        }
        self
    }

    pub(crate) fn u16(&mut self, value: u16) -> &mut Self {
        self.buf.put_u16(value);
        self
    }

    pub(crate) fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    pub(crate) fn u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64(value);
        self
    }

    pub(crate) fn zeros(&mut self, count: usize) -> &mut Self {
        self.buf.put_bytes(0, count);
        self
    }

    pub(crate) fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_slice(data);
        self
    }

    fn matrix(&mut self) -> &mut Self {
        for value in UNITY_MATRIX {
            self.buf.put_u32(value);
        }
        self
    }

    /// The written bytes. Boxes left open keep a zero size.
    pub(crate) fn into_bytes(self) -> Bytes {
        debug_assert!(self.open.is_empty(), "unclosed boxes");
        self.buf.freeze()
    }
}

pub(crate) fn ftyp(w: &mut BoxWriter) {
    w.open(b"ftyp").bytes(b"isom").u32(0x200);
    for brand in [b"isom", b"iso2", b"avc1", b"mp41"] {
        w.bytes(brand);
    }
    w.close();
}

/// `mdat` header with a 64-bit size, patched once the payload is written.
pub(crate) fn mdat_header(size: u64) -> Bytes {
    let mut header = BytesMut::with_capacity(MDAT_HEADER_SIZE as usize);
    header.put_u32(1);
    header.put_slice(b"mdat");
    header.put_u64(size);
    header.freeze()
}

pub(crate) fn mvhd(w: &mut BoxWriter, timescale: u32, duration: u64, next_track_id: u32) {
    w.open_full(b"mvhd", 1, 0)
        // creation and modification times
        .zeros(16)
        .u32(timescale)
        .u64(duration)
        .u32(FIXED_ONE)
        // volume 1.0 in 8.8, then reserved
        .u16(0x0100)
        .zeros(10)
        .matrix()
        .zeros(24)
        .u32(next_track_id)
        .close();
}

pub(crate) fn tkhd(
    w: &mut BoxWriter,
    track_id: u32,
    duration: u64,
    handler: HandlerType,
    (width, height): (u32, u32),
) {
    let volume: u16 = if handler.is_audio() { 0x0100 } else { 0 };
    // enabled | in_movie | in_preview
    w.open_full(b"tkhd", 1, 7)
        .zeros(16)
        .u32(track_id)
        .zeros(4)
        .u64(duration)
        // reserved, layer, alternate group
        .zeros(12)
        .u16(volume)
        .zeros(2)
        .matrix()
        .u32(width << 16)
        .u32(height << 16)
        .close();
}

/// `edts` holding one `elst` of `(duration in movie ticks, media time)`;
/// a media time of -1 is an empty edit.
pub(crate) fn edts(w: &mut BoxWriter, edits: &[(u64, i64)]) {
    w.open(b"edts");
    table(w, b"elst", 1, edits, |w, &(duration, media_time)| {
        w.u64(duration).u64(media_time as u64).u32(FIXED_ONE);
    });
    w.close();
}

pub(crate) fn mdhd(w: &mut BoxWriter, timescale: u32, duration: u64, language: u16) {
    w.open_full(b"mdhd", 1, 0)
        .zeros(16)
        .u32(timescale)
        .u64(duration)
        .u16(language)
        .zeros(2)
        .close();
}

pub(crate) fn hdlr(w: &mut BoxWriter, handler: HandlerType) {
    let name: &[u8] = match handler {
        HandlerType::Video => b"VideoHandler\0",
        HandlerType::Audio => b"SoundHandler\0",
        _ => b"DataHandler\0",
    };
    w.open_full(b"hdlr", 0, 0)
        .zeros(4)
        .bytes(&handler.fourcc())
        .zeros(12)
        .bytes(name)
        .close();
}

/// `vmhd`, `smhd` or `nmhd` depending on the handler.
pub(crate) fn media_header(w: &mut BoxWriter, handler: HandlerType) {
    match handler {
        HandlerType::Video => w.open_full(b"vmhd", 0, 1).zeros(8),
        HandlerType::Audio => w.open_full(b"smhd", 0, 0).zeros(4),
        _ => w.open_full(b"nmhd", 0, 0),
    }
    .close();
}

/// Data reference pointing at this file.
pub(crate) fn dinf(w: &mut BoxWriter) {
    w.open(b"dinf").open_full(b"dref", 0, 0).u32(1);
    w.open_full(b"url ", 0, 1).close();
    w.close().close();
}

/// Full box of a u32 entry count followed by the entries.
fn table<T>(
    w: &mut BoxWriter,
    kind: &[u8; 4],
    version: u8,
    entries: &[T],
    mut put: impl FnMut(&mut BoxWriter, &T),
) {
    w.open_full(kind, version, 0).u32(entries.len() as u32);
    for entry in entries {
        put(w, entry);
    }
    w.close();
}

/// Consecutive equal values as `(count, value)`.
pub(crate) fn run_lengths<T: Copy + PartialEq>(
    values: impl IntoIterator<Item = T>,
) -> Vec<(u32, T)> {
    let mut runs: Vec<(u32, T)> = Vec::new();
    for value in values {
        match runs.last_mut() {
            Some((count, last)) if *last == value => *count += 1,
            _ => runs.push((1, value)),
        }
    }
    runs
}

pub(crate) fn stts(w: &mut BoxWriter, durations: &[u32]) {
    let runs = run_lengths(durations.iter().copied());
    table(w, b"stts", 0, &runs, |w, &(count, delta)| {
        w.u32(count).u32(delta);
    });
}

/// Version 1, so offsets are signed.
pub(crate) fn ctts(w: &mut BoxWriter, offsets: &[i32]) {
    let runs = run_lengths(offsets.iter().copied());
    table(w, b"ctts", 1, &runs, |w, &(count, offset)| {
        w.u32(count).u32(offset as u32);
    });
}

/// 1-based sample numbers.
pub(crate) fn stss(w: &mut BoxWriter, sync_samples: &[u32]) {
    table(w, b"stss", 0, sync_samples, |w, &number| {
        w.u32(number);
    });
}

/// One run per change in samples-per-chunk; every chunk uses description 1.
pub(crate) fn stsc(w: &mut BoxWriter, samples_per_chunk: &[u32]) {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for (chunk, &count) in samples_per_chunk.iter().enumerate() {
        if runs.last().map(|&(_, c)| c) != Some(count) {
            runs.push((chunk as u32 + 1, count));
        }
    }
    table(w, b"stsc", 0, &runs, |w, &(first_chunk, count)| {
        w.u32(first_chunk).u32(count).u32(1);
    });
}

pub(crate) fn stsz(w: &mut BoxWriter, sizes: &[u32]) {
    let uniform = match sizes.split_first() {
        Some((&first, rest)) if first > 0 && rest.iter().all(|&s| s == first) => first,
        _ => 0,
    };
    w.open_full(b"stsz", 0, 0)
        .u32(uniform)
        .u32(sizes.len() as u32);
    if uniform == 0 {
        for &size in sizes {
            w.u32(size);
        }
    }
    w.close();
}

/// `stco`, or `co64` once any offset passes 4 GiB.
pub(crate) fn chunk_offsets(w: &mut BoxWriter, offsets: &[u64]) {
    if offsets.iter().any(|&o| o > u64::from(u32::MAX)) {
        table(w, b"co64", 0, offsets, |w, &offset| {
            w.u64(offset);
        });
    } else {
        table(w, b"stco", 0, offsets, |w, &offset| {
            w.u32(offset as u32);
        });
    }
}
