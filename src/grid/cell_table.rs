// per-cell [start, end) ranges into the sorted entry array
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

use crate::grid::indexer::CellEntry;

/// Lookup table from cell key to its run in the sorted entry array.
///
/// Stored as two parallel arrays (`starts`, `ends`) like the GPU buffers
/// they replace. Each slot is written by at most one index during a build,
/// so relaxed atomics are enough; the rayon join at the end of each pass
/// publishes the writes.
pub struct CellIndexTable {
    starts: Vec<AtomicU32>,
    ends: Vec<AtomicU32>,
}

impl CellIndexTable {
    pub fn new(key_space: usize) -> Self {
        Self {
            starts: (0..key_space).map(|_| AtomicU32::new(0)).collect(),
            ends: (0..key_space).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// Resets the cells `sorted` occupies to the empty range.
    pub fn clear_runs(&self, sorted: &[CellEntry]) {
        sorted.par_iter().for_each(|e| {
            let key = e.key as usize;
            self.starts[key].store(0, Ordering::Relaxed);
            self.ends[key].store(0, Ordering::Relaxed);
        });
    }

    /// Records the run boundaries of `sorted`, which must be ordered by key.
    /// Cells `sorted` does not touch keep whatever they held, so a reused
    /// table has to go through [`clear_runs`](Self::clear_runs) with the
    /// previous entries first.
    pub fn build(&self, sorted: &[CellEntry]) {
        let n = sorted.len();
        (0..n).into_par_iter().for_each(|i| {
            let key = sorted[i].key as usize;
            if i == 0 || sorted[i - 1].key != sorted[i].key {
                self.starts[key].store(i as u32, Ordering::Relaxed);
            }
            if i == n - 1 || sorted[i + 1].key != sorted[i].key {
                self.ends[key].store(i as u32 + 1, Ordering::Relaxed);
            }
        });
    }

    /// Sorted-array slots of the particles in cell `key`; empty for
    /// unoccupied or unknown keys.
    #[inline]
    pub fn range(&self, key: u32) -> Range<usize> {
        let key = key as usize;
        if key >= self.starts.len() {
            return 0..0;
        }
        let start = self.starts[key].load(Ordering::Relaxed) as usize;
        let end = self.ends[key].load(Ordering::Relaxed) as usize;
        start..end
    }
}
