//! Spatial index and 3x3 stencil queries.
//!
//! [`SpatialIndex::rebuild`] runs the whole neighbour-search pipeline for
//! one set of positions: cell keys, radix sort, cell range table. Queries
//! then walk the nine cells around the query position and hand out *sorted
//! slots*, so callers that keep their per-particle data in sorted order read
//! contiguous memory.

use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

use bevy::log::{debug, info_span};
use glam::{IVec2, UVec2, Vec2};
use rayon::prelude::*;

use crate::config::SimConfig;
use crate::error::ConfigError;
use crate::grid::cell_table::CellIndexTable;
use crate::grid::indexer::{CellEntry, Grid, compute_cell_entries};
use crate::grid::radix_sort::RadixSorter;

/// Visiting order of the neighbour cells, top row first.
pub const STENCIL_OFFSETS: [IVec2; 9] = [
    IVec2::new(-1, 1),
    IVec2::new(0, 1),
    IVec2::new(1, 1),
    IVec2::new(-1, 0),
    IVec2::new(0, 0),
    IVec2::new(1, 0),
    IVec2::new(-1, -1),
    IVec2::new(0, -1),
    IVec2::new(1, -1),
];

/// What the last rebuild saw. Nothing here is an error, these are the
/// degraded-but-tolerated cases.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Particles outside the domain, binned into border cells.
    pub escaped: usize,
    pub occupied_cells: usize,
    /// Cells holding more than `max_particles_per_cell`; the excess is
    /// invisible to neighbour queries.
    pub overflowing_cells: usize,
}

pub struct SpatialIndex {
    grid: Grid,
    sorter: RadixSorter,
    entries: Vec<CellEntry>,
    table: CellIndexTable,
    // inverse permutation, particle id -> sorted slot
    slot_of: Vec<AtomicU32>,
    max_per_cell: usize,
    stats: IndexStats,
}

impl SpatialIndex {
    pub fn new(config: &SimConfig) -> Result<Self, ConfigError> {
        let grid = Grid::from_config(config)?;
        let table = CellIndexTable::new(grid.key_space());
        Ok(Self {
            grid,
            sorter: RadixSorter::from_config(config),
            entries: Vec::new(),
            table,
            slot_of: Vec::new(),
            max_per_cell: config.max_particles_per_cell as usize,
            stats: IndexStats::default(),
        })
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    pub fn cell_table(&self) -> &CellIndexTable {
        &self.table
    }

    /// `(key, id)` pairs in cell order.
    pub fn sorted_entries(&self) -> &[CellEntry] {
        &self.entries
    }

    /// Particle id stored at sorted slot `slot`.
    #[inline]
    pub fn id_at(&self, slot: usize) -> usize {
        self.entries[slot].id as usize
    }

    /// Sorted slot currently holding particle `id`.
    #[inline]
    pub fn slot_of(&self, id: usize) -> usize {
        self.slot_of[id].load(Ordering::Relaxed) as usize
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn rebuild(&mut self, positions: &[Vec2]) -> IndexStats {
        let _span = info_span!("spatial_index_rebuild", n = positions.len()).entered();

        // only the cells of the previous frame can hold stale ranges
        self.table.clear_runs(&self.entries);
        let escaped = compute_cell_entries(&self.grid, positions, &mut self.entries);
        self.sorter
            .sort(&mut self.entries, self.grid.significant_bits());
        self.table.build(&self.entries);

        if self.slot_of.len() != self.entries.len() {
            self.slot_of = (0..self.entries.len()).map(|_| AtomicU32::new(0)).collect();
        }
        let slot_of = &self.slot_of;
        self.entries
            .par_iter()
            .enumerate()
            .for_each(|(slot, e)| slot_of[e.id as usize].store(slot as u32, Ordering::Relaxed));

        // one visit per occupied cell, at the first slot of its run
        let cap = self.max_per_cell;
        let table = &self.table;
        let entries = &self.entries;
        let (occupied_cells, overflowing_cells) = (0..entries.len())
            .into_par_iter()
            .filter(|&i| i == 0 || entries[i - 1].key != entries[i].key)
            .map(|i| (1, usize::from(table.range(entries[i].key).len() > cap)))
            .reduce(|| (0, 0), |a, b| (a.0 + b.0, a.1 + b.1));

        self.stats = IndexStats {
            escaped,
            occupied_cells,
            overflowing_cells,
        };
        if escaped > 0 || overflowing_cells > 0 {
            debug!(
                "spatial index: {} particles outside domain, {} cells over the {}-particle cap",
                escaped, overflowing_cells, cap
            );
        }
        self.stats
    }

    /// Sorted slots of `cell`, truncated to the per-cell cap.
    #[inline]
    pub fn cell_slots(&self, cell: UVec2) -> Range<usize> {
        let range = self.table.range(self.grid.cell_key(cell));
        let end = range.end.min(range.start + self.max_per_cell);
        range.start..end
    }

    /// Calls `visit` with the sorted slot of every particle in the 3x3
    /// block of cells around `pos`. Distances are not checked.
    #[inline]
    pub fn for_each_candidate<F: FnMut(usize)>(&self, pos: Vec2, mut visit: F) {
        let cell = self.grid.cell_coord(pos);
        for offset in STENCIL_OFFSETS {
            let Some(neighbor) = self.grid.offset_cell(cell, offset) else {
                continue;
            };
            for slot in self.cell_slots(neighbor) {
                visit(slot);
            }
        }
    }

    /// Ids of the particles within `radius` of particle `i`, excluding `i`.
    /// `positions` must be the array the index was last rebuilt from.
    pub fn neighbors_within(&self, i: usize, positions: &[Vec2], radius: f32, out: &mut Vec<u32>) {
        out.clear();
        let pos = positions[i];
        let r2 = radius * radius;
        self.for_each_candidate(pos, |slot| {
            let j = self.id_at(slot);
            if j != i && (positions[j] - pos).length_squared() < r2 {
                out.push(j as u32);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyEncoding;

    fn config(encoding: KeyEncoding) -> SimConfig {
        SimConfig {
            kernel_radius: 0.1,
            cell_size: 0.1,
            domain_min: Vec2::ZERO,
            domain_max: Vec2::ONE,
            key_encoding: encoding,
            sort_block_size: 16,
            ..SimConfig::default()
        }
    }

    fn scattered(n: usize) -> Vec<Vec2> {
        let mut seed = 0x9e37_79b9u32;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            (seed % 10_000) as f32 / 10_000.0
        };
        (0..n).map(|_| Vec2::new(next(), next())).collect()
    }

    #[test]
    fn stencil_order_is_fixed() {
        assert_eq!(STENCIL_OFFSETS[0], IVec2::new(-1, 1));
        assert_eq!(STENCIL_OFFSETS[4], IVec2::ZERO);
        assert_eq!(STENCIL_OFFSETS[8], IVec2::new(1, -1));
    }

    #[test]
    fn finds_every_pair_within_radius() {
        for encoding in [KeyEncoding::Morton, KeyEncoding::RowMajor] {
            let cfg = config(encoding);
            let positions = scattered(600);
            let mut index = SpatialIndex::new(&cfg).unwrap();
            index.rebuild(&positions);

            let mut found = Vec::new();
            for i in 0..positions.len() {
                index.neighbors_within(i, &positions, cfg.kernel_radius, &mut found);
                found.sort_unstable();
                let expected: Vec<u32> = (0..positions.len())
                    .filter(|&j| {
                        j != i
                            && (positions[j] - positions[i]).length_squared()
                                < cfg.kernel_radius * cfg.kernel_radius
                    })
                    .map(|j| j as u32)
                    .collect();
                assert_eq!(found, expected, "particle {i} with {encoding:?}");
            }
        }
    }

    #[test]
    fn crowded_cell_is_capped() {
        let cfg = SimConfig {
            max_particles_per_cell: 3,
            ..config(KeyEncoding::Morton)
        };
        let positions = vec![Vec2::splat(0.55); 5];
        let mut index = SpatialIndex::new(&cfg).unwrap();
        let stats = index.rebuild(&positions);
        assert_eq!(stats.overflowing_cells, 1);
        assert_eq!(stats.occupied_cells, 1);

        let mut visited = 0;
        index.for_each_candidate(Vec2::splat(0.55), |_| visited += 1);
        assert_eq!(visited, 3);
    }

    #[test]
    fn escaped_particles_are_still_indexed() {
        let cfg = config(KeyEncoding::RowMajor);
        let positions = vec![Vec2::new(-0.3, 0.05), Vec2::new(0.02, 0.05)];
        let mut index = SpatialIndex::new(&cfg).unwrap();
        let stats = index.rebuild(&positions);
        assert_eq!(stats.escaped, 1);

        let mut found = Vec::new();
        index.neighbors_within(1, &positions, 0.5, &mut found);
        assert_eq!(found, vec![0]);
    }

    #[test]
    fn moved_particles_leave_no_stale_cells() {
        let cfg = SimConfig {
            max_particles_per_cell: 2,
            ..config(KeyEncoding::Morton)
        };
        let mut index = SpatialIndex::new(&cfg).unwrap();
        let stats = index.rebuild(&[Vec2::new(0.35, 0.75); 3]);
        assert_eq!(stats.occupied_cells, 1);
        assert_eq!(stats.overflowing_cells, 1);

        let moved = [Vec2::new(0.05, 0.05), Vec2::new(0.55, 0.55), Vec2::new(0.95, 0.15)];
        let stats = index.rebuild(&moved);
        assert_eq!(stats.occupied_cells, 3);
        assert_eq!(stats.overflowing_cells, 0);

        let table = index.cell_table();
        let total: usize = (0..table.len() as u32).map(|key| table.range(key).len()).sum();
        assert_eq!(total, 3);
        let mut visited = 0;
        index.for_each_candidate(Vec2::new(0.35, 0.75), |_| visited += 1);
        assert_eq!(visited, 0);
    }
}
