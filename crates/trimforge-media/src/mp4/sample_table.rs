//! Flattening of the run-length `stbl` tables into one entry per sample.

/// Location, timing and sync status of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleEntry {
    /// Absolute file offset of the payload.
    pub offset: u64,
    pub size: u32,
    /// Decode time in media ticks.
    pub dts: u64,
    pub duration: u32,
    /// `ctts` offset added to `dts` for presentation.
    pub cts_offset: i32,
    pub is_keyframe: bool,
}

impl SampleEntry {
    /// Presentation time in media ticks, before any edit list shift.
    pub fn pts(&self) -> i64 {
        self.dts as i64 + self.cts_offset as i64
    }
}

/// Sample sizes as stored in `stsz`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleSizes {
    /// Every sample has `size` bytes.
    Uniform { size: u32, count: u32 },
    PerSample(Vec<u32>),
}

impl Default for SampleSizes {
    fn default() -> Self {
        Self::PerSample(Vec::new())
    }
}

impl SampleSizes {
    pub fn count(&self) -> usize {
        match self {
            Self::Uniform { count, .. } => *count as usize,
            Self::PerSample(sizes) => sizes.len(),
        }
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        match self {
            Self::Uniform { size, count } => (index < *count as usize).then_some(*size),
            Self::PerSample(sizes) => sizes.get(index).copied(),
        }
    }
}

/// Raw tables of one `stbl` box.
#[derive(Debug, Clone, Default)]
pub struct SampleTables {
    /// `stts` runs of `(sample_count, delta)`.
    pub time_to_sample: Vec<(u32, u32)>,
    /// `ctts` runs of `(sample_count, offset)`.
    pub composition_offsets: Vec<(u32, i32)>,
    /// `stss` 1-based sample numbers. `None` marks every sample as sync.
    pub sync_samples: Option<Vec<u32>>,
    /// `stsc` runs of `(first_chunk, samples_per_chunk)`, chunks 1-based.
    pub sample_to_chunk: Vec<(u32, u32)>,
    pub sizes: SampleSizes,
    pub chunk_offsets: Vec<u64>,
}

impl SampleTables {
    /// Walk the chunks in order and lay out each sample.
    ///
    /// The sample count comes from `stsz`. Samples the chunk tables cannot
    /// place are dropped, and storage is sized by what the chunks can hold.
    pub fn resolve(&self) -> SampleTable {
        let declared = self.sizes.count();
        let count = declared.min(self.chunk_capacity());
        let mut sync = vec![self.sync_samples.is_none(); count];
        for &number in self.sync_samples.iter().flatten() {
            if let Some(slot) = (number as usize).checked_sub(1).and_then(|i| sync.get_mut(i)) {
                *slot = true;
            }
        }

        let mut deltas = expand_runs(&self.time_to_sample);
        let mut composition = expand_runs(&self.composition_offsets);
        let mut samples = Vec::with_capacity(count);
        let mut dts = 0u64;
        let mut last_delta = 0u32;

        'chunks: for (chunk, &chunk_offset) in self.chunk_offsets.iter().enumerate() {
            let mut offset = chunk_offset;
            for _ in 0..self.samples_in_chunk(chunk as u32 + 1) {
                let index = samples.len();
                if index == count {
                    break 'chunks;
                }
                let size = self.sizes.get(index).unwrap_or(0);
                let duration = deltas.next().unwrap_or(last_delta);
                last_delta = duration;

                samples.push(SampleEntry {
                    offset,
                    size,
                    dts,
                    duration,
                    cts_offset: composition.next().unwrap_or(0),
                    is_keyframe: sync[index],
                });
                offset += size as u64;
                dts += duration as u64;
            }
        }

        if samples.len() < declared {
            tracing::warn!(
                declared,
                placed = samples.len(),
                "Chunk tables do not cover every sample"
            );
        }
        SampleTable { samples }
    }

    /// Samples the chunk tables can place, saturating.
    fn chunk_capacity(&self) -> usize {
        (0..self.chunk_offsets.len() as u32)
            .map(|chunk| self.samples_in_chunk(chunk + 1) as usize)
            .fold(0usize, usize::saturating_add)
    }

    fn samples_in_chunk(&self, chunk_number: u32) -> u32 {
        let run = self
            .sample_to_chunk
            .partition_point(|&(first, _)| first <= chunk_number);
        run.checked_sub(1)
            .map_or(0, |i| self.sample_to_chunk[i].1)
    }
}

fn expand_runs<T: Copy>(runs: &[(u32, T)]) -> impl Iterator<Item = T> + '_ {
    runs.iter()
        .flat_map(|&(count, value)| std::iter::repeat(value).take(count as usize))
}

/// Every sample of a track in decode order.
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    pub samples: Vec<SampleEntry>,
}

impl SampleTable {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SampleEntry> {
        self.samples.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SampleEntry> {
        self.samples.iter()
    }

    pub fn sync_count(&self) -> usize {
        self.samples.iter().filter(|s| s.is_keyframe).count()
    }

    /// Sync sample with the latest presentation time not after `time`,
    /// comparing `pts - pts_shift`.
    pub fn last_sync_at_or_before(&self, time: i64, pts_shift: i64) -> Option<usize> {
        self.sync_positions()
            .filter(|&(_, pts)| pts - pts_shift <= time)
            .max_by_key(|&(_, pts)| pts)
            .map(|(index, _)| index)
    }

    /// Sync sample with the earliest presentation time not before `time`.
    pub fn first_sync_at_or_after(&self, time: i64, pts_shift: i64) -> Option<usize> {
        self.sync_positions()
            .filter(|&(_, pts)| pts - pts_shift >= time)
            .min_by_key(|&(_, pts)| pts)
            .map(|(index, _)| index)
    }

    fn sync_positions(&self) -> impl Iterator<Item = (usize, i64)> + '_ {
        self.samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_keyframe)
            .map(|(index, s)| (index, s.pts()))
    }
}
