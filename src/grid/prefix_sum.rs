//! Parallel exclusive scan.
//!
//! Two-level work-efficient layout, the same one a GPU uses with workgroup
//! shared memory: every block is scanned independently, the per-block
//! totals are scanned (recursively once they no longer fit in one block),
//! and each block's base offset is then broadcast back over its elements.
//! Every level is a separate rayon call, so a level only starts once the
//! previous one has fully written its output.

use rayon::prelude::*;

/// Replaces `data[i]` with `combine(data[0], .., data[i - 1])` (and
/// `identity` for `i == 0`) and returns the combination of all elements.
///
/// `combine` must be associative and `identity` its neutral element;
/// commutativity is not required, operands are always combined left to
/// right. Block sizes below 2 are raised to 2.
pub fn exclusive_scan<T, F>(data: &mut [T], identity: T, combine: F, block_size: usize) -> T
where
    T: Copy + Send + Sync,
    F: Fn(T, T) -> T + Sync,
{
    scan_levels(data, identity, &combine, block_size.max(2))
}

/// `exclusive_scan` over `u32` counts with addition.
pub fn exclusive_scan_u32(data: &mut [u32], block_size: usize) -> u32 {
    exclusive_scan(data, 0, |a, b| a + b, block_size)
}

fn scan_levels<T, F>(data: &mut [T], identity: T, combine: &F, block_size: usize) -> T
where
    T: Copy + Send + Sync,
    F: Fn(T, T) -> T + Sync,
{
    if data.is_empty() {
        return identity;
    }

    // block-local scan
    let mut block_sums: Vec<T> = data
        .par_chunks_mut(block_size)
        .map(|block| scan_block(block, identity, combine))
        .collect();

    if block_sums.len() == 1 {
        return block_sums[0];
    }

    // block-sum scan
    let total = if block_sums.len() <= block_size {
        scan_block(&mut block_sums, identity, combine)
    } else {
        scan_levels(&mut block_sums, identity, combine, block_size)
    };

    // offset broadcast
    data.par_chunks_mut(block_size)
        .zip(block_sums.par_iter())
        .for_each(|(block, &offset)| {
            for x in block.iter_mut() {
                *x = combine(offset, *x);
            }
        });

    total
}

fn scan_block<T, F>(block: &mut [T], identity: T, combine: &F) -> T
where
    T: Copy,
    F: Fn(T, T) -> T,
{
    let mut running = identity;
    for x in block.iter_mut() {
        let value = *x;
        *x = running;
        running = combine(running, value);
    }
    running
}
