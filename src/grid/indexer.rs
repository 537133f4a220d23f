// maps particle positions onto the uniform grid and produces sort keys
use glam::{IVec2, UVec2, Vec2};
use rayon::prelude::*;

use crate::config::{KeyEncoding, SimConfig};
use crate::error::ConfigError;

/// `(cell key, particle id)` pair, the element type of the key sorter.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CellEntry {
    pub key: u32,
    pub id: u32,
}

impl CellEntry {
    /// Padding element; sorts after every real entry.
    pub const SENTINEL: CellEntry = CellEntry {
        key: u32::MAX,
        id: u32::MAX,
    };

    #[inline]
    pub fn pack(self) -> u64 {
        ((self.key as u64) << 32) | self.id as u64
    }

    #[inline]
    pub fn unpack(bits: u64) -> Self {
        Self {
            key: (bits >> 32) as u32,
            id: bits as u32,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    pub origin: Vec2,
    pub cell_size: f32,
    pub inv_cell_size: f32,
    pub resolution: UVec2,
    pub encoding: KeyEncoding,
}

impl Grid {
    pub fn from_config(config: &SimConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            origin: config.domain_min,
            cell_size: config.cell_size,
            inv_cell_size: 1.0 / config.cell_size,
            resolution: config.grid_resolution(),
            encoding: config.key_encoding,
        })
    }

    /// Cell containing `pos`, clamped onto the grid so escaped particles
    /// land in the nearest border cell.
    #[inline]
    pub fn cell_coord(&self, pos: Vec2) -> UVec2 {
        let cell = ((pos - self.origin) * self.inv_cell_size).floor().as_ivec2();
        let max = self.resolution.as_ivec2() - IVec2::ONE;
        cell.clamp(IVec2::ZERO, max).as_uvec2()
    }

    #[inline]
    pub fn contains(&self, pos: Vec2) -> bool {
        let cell = ((pos - self.origin) * self.inv_cell_size).floor();
        cell.x >= 0.0
            && cell.y >= 0.0
            && cell.x < self.resolution.x as f32
            && cell.y < self.resolution.y as f32
    }

    #[inline]
    pub fn cell_key(&self, cell: UVec2) -> u32 {
        match self.encoding {
            KeyEncoding::Morton => morton_encode(cell.x, cell.y),
            KeyEncoding::RowMajor => cell.y * self.resolution.x + cell.x,
        }
    }

    #[inline]
    pub fn key_of(&self, pos: Vec2) -> u32 {
        self.cell_key(self.cell_coord(pos))
    }

    /// `cell + offset`, or `None` when that falls off the grid.
    #[inline]
    pub fn offset_cell(&self, cell: UVec2, offset: IVec2) -> Option<UVec2> {
        let c = cell.as_ivec2() + offset;
        if c.x < 0 || c.y < 0 || c.x >= self.resolution.x as i32 || c.y >= self.resolution.y as i32 {
            return None;
        }
        Some(c.as_uvec2())
    }

    /// Number of distinct keys, i.e. the cell index table length.
    pub fn key_space(&self) -> usize {
        match self.encoding {
            KeyEncoding::RowMajor => (self.resolution.x * self.resolution.y) as usize,
            KeyEncoding::Morton => {
                let side = self.resolution.max_element().next_power_of_two() as usize;
                side * side
            }
        }
    }

    /// Low key bits the sorter has to look at.
    pub fn significant_bits(&self) -> u32 {
        let largest = (self.key_space() - 1) as u32;
        (u32::BITS - largest.leading_zeros()).max(1)
    }
}

// spreads the low 16 bits of v to the even bit positions
#[inline]
fn part1by1(v: u32) -> u32 {
    let mut x = v & 0x0000_ffff;
    x = (x | (x << 8)) & 0x00ff_00ff;
    x = (x | (x << 4)) & 0x0f0f_0f0f;
    x = (x | (x << 2)) & 0x3333_3333;
    x = (x | (x << 1)) & 0x5555_5555;
    x
}

#[inline]
fn compact1by1(v: u32) -> u32 {
    let mut x = v & 0x5555_5555;
    x = (x | (x >> 1)) & 0x3333_3333;
    x = (x | (x >> 2)) & 0x0f0f_0f0f;
    x = (x | (x >> 4)) & 0x00ff_00ff;
    x = (x | (x >> 8)) & 0x0000_ffff;
    x
}

/// Interleaves `x` (even bits) and `y` (odd bits).
#[inline]
pub fn morton_encode(x: u32, y: u32) -> u32 {
    part1by1(x) | (part1by1(y) << 1)
}

#[inline]
pub fn morton_decode(code: u32) -> UVec2 {
    UVec2::new(compact1by1(code), compact1by1(code >> 1))
}

/// Fills `entries` with one `(key, id)` pair per particle and returns how
/// many particles sat outside the declared domain.
pub fn compute_cell_entries(grid: &Grid, positions: &[Vec2], entries: &mut Vec<CellEntry>) -> usize {
    entries.resize(positions.len(), CellEntry::default());
    entries
        .par_iter_mut()
        .zip(positions.par_iter())
        .enumerate()
        .map(|(i, (entry, &pos))| {
            *entry = CellEntry {
                key: grid.key_of(pos),
                id: i as u32,
            };
            usize::from(!grid.contains(pos))
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_grid(encoding: KeyEncoding) -> Grid {
        let cfg = SimConfig {
            kernel_radius: 0.25,
            cell_size: 0.25,
            domain_min: Vec2::ZERO,
            domain_max: Vec2::new(1.5, 1.0),
            key_encoding: encoding,
            ..SimConfig::default()
        };
        Grid::from_config(&cfg).unwrap()
    }

    #[test]
    fn resolution_covers_domain() {
        let grid = unit_grid(KeyEncoding::RowMajor);
        assert_eq!(grid.resolution, UVec2::new(6, 4));
        assert_eq!(grid.key_space(), 24);
        assert_eq!(grid.significant_bits(), 5);
    }

    #[test]
    fn cell_coord_clamps_escaped_particles() {
        let grid = unit_grid(KeyEncoding::RowMajor);
        assert_eq!(grid.cell_coord(Vec2::new(0.3, 0.6)), UVec2::new(1, 2));
        assert_eq!(grid.cell_coord(Vec2::new(-4.0, 0.1)), UVec2::new(0, 0));
        assert_eq!(grid.cell_coord(Vec2::new(9.0, 9.0)), UVec2::new(5, 3));
        assert!(!grid.contains(Vec2::new(9.0, 9.0)));
        assert!(grid.contains(Vec2::new(1.49, 0.99)));
    }

    #[test]
    fn row_major_keys_follow_rows() {
        let grid = unit_grid(KeyEncoding::RowMajor);
        assert_eq!(grid.cell_key(UVec2::new(0, 0)), 0);
        assert_eq!(grid.cell_key(UVec2::new(5, 0)), 5);
        assert_eq!(grid.cell_key(UVec2::new(0, 1)), 6);
        assert_eq!(grid.cell_key(UVec2::new(5, 3)), 23);
    }

    #[test]
    fn morton_interleaves_and_decodes() {
        assert_eq!(morton_encode(0, 0), 0);
        assert_eq!(morton_encode(1, 0), 1);
        assert_eq!(morton_encode(0, 1), 2);
        assert_eq!(morton_encode(3, 3), 15);
        assert_eq!(morton_encode(4, 0), 16);
        for (x, y) in [(7, 9), (4095, 17), (1234, 4000)] {
            assert_eq!(morton_decode(morton_encode(x, y)), UVec2::new(x, y));
        }

        let grid = unit_grid(KeyEncoding::Morton);
        // 6x4 grid rounds up to an 8x8 Morton square
        assert_eq!(grid.key_space(), 64);
        assert_eq!(grid.significant_bits(), 6);
    }

    #[test]
    fn offset_cell_rejects_out_of_grid() {
        let grid = unit_grid(KeyEncoding::Morton);
        assert_eq!(grid.offset_cell(UVec2::ZERO, IVec2::new(-1, 0)), None);
        assert_eq!(grid.offset_cell(UVec2::new(5, 3), IVec2::new(1, 1)), None);
        assert_eq!(
            grid.offset_cell(UVec2::new(2, 2), IVec2::new(-1, 1)),
            Some(UVec2::new(1, 3))
        );
    }

    #[test]
    fn entries_count_escapees() {
        let grid = unit_grid(KeyEncoding::RowMajor);
        let positions = [Vec2::new(0.1, 0.1), Vec2::new(-1.0, 0.5), Vec2::new(1.4, 0.9)];
        let mut entries = Vec::new();
        let escaped = compute_cell_entries(&grid, &positions, &mut entries);
        assert_eq!(escaped, 1);
        assert_eq!(entries[0], CellEntry { key: 0, id: 0 });
        assert_eq!(entries[1], CellEntry { key: 12, id: 1 });
        assert_eq!(entries[2], CellEntry { key: 23, id: 2 });
    }
}
