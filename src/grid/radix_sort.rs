//! LSD radix sort of `(cell key, particle id)` pairs.
//!
//! Each digit pass runs as four barrier-separated phases:
//! histogram → two-level exclusive scan → scatter → copy back.
//! The scan turns the digit-major histogram `[digit][block]` into the first
//! output slot of every (digit, block) bucket, so every element gets a
//! unique destination without locks.

use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;

use crate::config::SimConfig;
use crate::grid::indexer::CellEntry;
use crate::grid::prefix_sum::exclusive_scan_u32;

const MAX_RADIX: usize = 1 << 8;

pub struct RadixSorter {
    block_size: usize,
    digit_bits: u32,
    // block-major counts, [block][digit]
    block_counts: Vec<u32>,
    // digit-major offsets, [digit][block]
    offsets: Vec<u32>,
    scratch: Vec<AtomicU64>,
}

impl RadixSorter {
    /// `digit_bits` is clamped to `1..=8`, `block_size` to at least 1.
    pub fn new(block_size: usize, digit_bits: u32) -> Self {
        Self {
            block_size: block_size.max(1),
            digit_bits: digit_bits.clamp(1, 8),
            block_counts: Vec::new(),
            offsets: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub fn from_config(config: &SimConfig) -> Self {
        Self::new(config.sort_block_size, config.radix_digit_bits)
    }

    /// Digit passes needed for keys of `significant_bits` bits.
    pub fn passes(&self, significant_bits: u32) -> u32 {
        significant_bits.clamp(1, 32).div_ceil(self.digit_bits)
    }

    /// Sorts `entries` by the low `significant_bits` of their key. Ties keep
    /// their input order.
    pub fn sort(&mut self, entries: &mut Vec<CellEntry>, significant_bits: u32) {
        let n = entries.len();
        if n <= 1 {
            return;
        }

        let block = self.block_size;
        let padded = n.div_ceil(block) * block;
        entries.resize(padded, CellEntry::SENTINEL);

        let num_blocks = padded / block;
        let radix = 1usize << self.digit_bits;
        let mask = (radix - 1) as u32;

        if self.scratch.len() < padded {
            self.scratch.resize_with(padded, || AtomicU64::new(0));
        }

        for pass in 0..self.passes(significant_bits) {
            let shift = pass * self.digit_bits;
            let digit = |key: u32| ((key >> shift) & mask) as usize;

            // histogram
            self.block_counts.clear();
            self.block_counts.resize(num_blocks * radix, 0);
            self.block_counts
                .par_chunks_mut(radix)
                .zip(entries.par_chunks(block))
                .for_each(|(counts, chunk)| {
                    for e in chunk {
                        counts[digit(e.key)] += 1;
                    }
                });

            self.offsets.clear();
            self.offsets.resize(num_blocks * radix, 0);
            let block_counts = &self.block_counts;
            self.offsets
                .par_chunks_mut(num_blocks)
                .enumerate()
                .for_each(|(d, row)| {
                    for (b, slot) in row.iter_mut().enumerate() {
                        *slot = block_counts[b * radix + d];
                    }
                });

            // scan
            let total = exclusive_scan_u32(&mut self.offsets, block);
            debug_assert_eq!(total as usize, padded);

            // scatter
            let offsets = &self.offsets;
            let scratch = &self.scratch;
            entries
                .par_chunks(block)
                .enumerate()
                .for_each(|(b, chunk)| {
                    let mut cursor = [0u32; MAX_RADIX];
                    for (d, c) in cursor.iter_mut().enumerate().take(radix) {
                        *c = offsets[d * num_blocks + b];
                    }
                    for e in chunk {
                        let d = digit(e.key);
                        scratch[cursor[d] as usize].store(e.pack(), Ordering::Relaxed);
                        cursor[d] += 1;
                    }
                });

            entries
                .par_iter_mut()
                .zip(self.scratch.par_iter())
                .for_each(|(e, slot)| *e = CellEntry::unpack(slot.load(Ordering::Relaxed)));
        }

        entries.truncate(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xorshift(state: &mut u32) -> u32 {
        let mut x = *state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        *state = x;
        x
    }

    fn entries(keys: &[u32]) -> Vec<CellEntry> {
        keys.iter()
            .enumerate()
            .map(|(id, &key)| CellEntry { key, id: id as u32 })
            .collect()
    }

    #[test]
    fn empty_and_single_are_untouched() {
        let mut sorter = RadixSorter::new(4, 4);
        let mut none: Vec<CellEntry> = Vec::new();
        sorter.sort(&mut none, 8);
        assert!(none.is_empty());

        let mut one = entries(&[42]);
        sorter.sort(&mut one, 8);
        assert_eq!(one, entries(&[42]));
    }

    #[test]
    fn matches_stable_std_sort() {
        let mut seed = 0x1234_5678;
        for &(n, block, bits) in &[
            (10usize, 4usize, 4u32),
            (255, 256, 4),
            (257, 256, 8),
            (1000, 64, 3),
            (3333, 128, 1),
        ] {
            let keys: Vec<u32> = (0..n).map(|_| xorshift(&mut seed) % 97).collect();
            let mut expected = entries(&keys);
            expected.sort_by_key(|e| e.key);

            let mut got = entries(&keys);
            RadixSorter::new(block, bits).sort(&mut got, 7);
            assert_eq!(got, expected, "n {n} block {block} bits {bits}");
        }
    }

    #[test]
    fn padding_sorts_after_all_ones_keys() {
        // 5 significant bits: 31 is the largest real key and matches the
        // sentinel on every examined bit
        let keys = [31, 0, 31, 7, 31];
        let mut got = entries(&keys);
        RadixSorter::new(4, 2).sort(&mut got, 5);
        let ids: Vec<u32> = got.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 3, 0, 2, 4]);
        assert!(got.iter().all(|e| e.id != u32::MAX));
    }

    #[test]
    fn pass_count_rounds_up() {
        let sorter = RadixSorter::new(256, 4);
        assert_eq!(sorter.passes(1), 1);
        assert_eq!(sorter.passes(12), 3);
        assert_eq!(sorter.passes(13), 4);
    }
}
