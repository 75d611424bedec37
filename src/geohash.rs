//! Fixed-width integer geohash over an arbitrary region.
//!
//! A key interleaves one x bit and one y bit per level, x above y, so the two
//! bits of a level form the quadrant code `x_bit << 1 | y_bit` that matches
//! [`Region::split`] order. A cell at prefix length `length` (always even)
//! covers the keys `value..value + (1 << (sum_bits - length))`.

use crate::error::{Result, SlbrinError};
use geo::Point;
use serde::{Deserialize, Serialize};
use slbrin_types::region::{RELATION_INSIDE, Region};

/// Relative slack added around a cell before relating it to a window, so that
/// points quantized right at a cell boundary are never mis-classified.
const CELL_SLACK: f64 = 1e-6;

/// Geohash codec configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geohash {
    region: Region,
    bits_per_dim: u32,
    sum_bits: u32,
}

impl Geohash {
    /// Create a codec fine enough to separate coordinates carrying
    /// `precision` decimal digits inside `region`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when the region is degenerate or the resulting bit
    /// width falls outside `1..=31` per dimension.
    pub fn new(region: Region, precision: u32) -> Result<Self> {
        if !region.is_valid() {
            return Err(SlbrinError::InvalidConfig(
                "geohash region must be finite and non-empty".to_string(),
            ));
        }
        let extent = region.width().max(region.height());
        let cells = extent * 10f64.powi(precision as i32 + 1);
        let bits = cells.log2().ceil();
        if !(bits >= 1.0 && bits <= 31.0) {
            return Err(SlbrinError::InvalidConfig(format!(
                "data precision {precision} needs {bits} bits per dimension, expected 1..=31"
            )));
        }
        let bits_per_dim = bits as u32;
        Ok(Self {
            region,
            bits_per_dim,
            sum_bits: bits_per_dim * 2,
        })
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn bits_per_dim(&self) -> u32 {
        self.bits_per_dim
    }

    /// Total key width in bits.
    pub fn sum_bits(&self) -> u32 {
        self.sum_bits
    }

    /// One past the largest key.
    pub fn key_space(&self) -> u64 {
        1u64 << self.sum_bits
    }

    /// Exclusive end of the cell starting at `value` with prefix `length`.
    pub fn cell_end(&self, value: u64, length: u32) -> u64 {
        value + (1u64 << (self.sum_bits - length))
    }

    fn cells_per_dim(&self) -> f64 {
        (1u64 << self.bits_per_dim) as f64
    }

    fn quantize(&self, v: f64, min: f64, extent: f64) -> u64 {
        let max_index = (1u64 << self.bits_per_dim) - 1;
        let scaled = ((v - min) / extent * self.cells_per_dim()).floor();
        if scaled.is_nan() || scaled <= 0.0 {
            0
        } else if scaled >= max_index as f64 {
            max_index
        } else {
            scaled as u64
        }
    }

    /// Encode a point. Coordinates outside the region are clamped to it.
    pub fn encode(&self, point: &Point<f64>) -> u64 {
        let ix = self.quantize(point.x(), self.region.min_x(), self.region.width());
        let iy = self.quantize(point.y(), self.region.min_y(), self.region.height());
        interleave(ix, iy, self.bits_per_dim)
    }

    /// Decode a key to the centre of its unit cell.
    pub fn decode(&self, key: u64) -> Point<f64> {
        let (ix, iy) = deinterleave(key, self.bits_per_dim);
        let unit_x = self.region.width() / self.cells_per_dim();
        let unit_y = self.region.height() / self.cells_per_dim();
        Point::new(
            self.region.min_x() + (ix as f64 + 0.5) * unit_x,
            self.region.min_y() + (iy as f64 + 0.5) * unit_y,
        )
    }

    /// Geometry of the prefix cell starting at `value` with prefix `length`.
    pub fn cell_region(&self, value: u64, length: u32) -> Region {
        let level = length / 2;
        let (ix, iy) = deinterleave(value, self.bits_per_dim);
        let shift = self.bits_per_dim - level;
        let (px, py) = (ix >> shift, iy >> shift);
        let cells = (1u64 << level) as f64;
        let w = self.region.width() / cells;
        let h = self.region.height() / cells;
        let min_x = self.region.min_x() + px as f64 * w;
        let min_y = self.region.min_y() + py as f64 * h;
        Region::new(min_x, min_y, min_x + w, min_y + h)
    }

    fn slack(&self) -> f64 {
        let unit = self.region.width().max(self.region.height()) / self.cells_per_dim();
        unit * CELL_SLACK
    }

    /// Decompose the keys in `[key1, key2]` into prefix cells related to the
    /// window spanned by the two keys' unit cells.
    pub fn ranges_by_int(&self, key1: u64, key2: u64, max_length: u32) -> CellRanges {
        let (lo, hi) = if key1 <= key2 { (key1, key2) } else { (key2, key1) };
        let a = self.cell_region(lo, self.sum_bits);
        let b = self.cell_region(hi, self.sum_bits);
        let window = Region::new(
            a.min_x().min(b.min_x()),
            a.min_y().min(b.min_y()),
            a.max_x().max(b.max_x()),
            a.max_y().max(b.max_y()),
        );
        self.ranges_by_window(lo, hi, window, max_length)
    }

    /// Decompose the keys in `[low, high]` into prefix cells intersecting
    /// `window`, each tagged with the window edges it extends past.
    ///
    /// Cells are yielded ascending by `value`. Descent stops at cells fully
    /// inside the window or at `max_length` (rounded down to even).
    pub fn ranges_by_window(
        &self,
        low: u64,
        high: u64,
        window: Region,
        max_length: u32,
    ) -> CellRanges {
        CellRanges {
            geohash: *self,
            window,
            low,
            high,
            max_length: max_length.min(self.sum_bits) & !1,
            slack: self.slack(),
            stack: vec![(0, 0)],
        }
    }
}

fn interleave(ix: u64, iy: u64, bits: u32) -> u64 {
    let mut key = 0u64;
    for level in (0..bits).rev() {
        let xb = (ix >> level) & 1;
        let yb = (iy >> level) & 1;
        key = (key << 2) | (xb << 1) | yb;
    }
    key
}

fn deinterleave(key: u64, bits: u32) -> (u64, u64) {
    let (mut ix, mut iy) = (0u64, 0u64);
    for level in 0..bits {
        ix |= ((key >> (2 * level + 1)) & 1) << level;
        iy |= ((key >> (2 * level)) & 1) << level;
    }
    (ix, iy)
}

/// A geohash prefix cell and its relation to a query window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    /// First key of the cell
    pub value: u64,
    /// Prefix length in bits
    pub length: u32,
    /// Window edges the cell extends past
    pub relation: u8,
}

impl CellRange {
    pub fn is_inside(&self) -> bool {
        self.relation == RELATION_INSIDE
    }
}

/// Lazy depth-first decomposition of a key interval into prefix cells.
///
/// Cloning restarts nothing: the clone continues from the same position.
#[derive(Debug, Clone)]
pub struct CellRanges {
    geohash: Geohash,
    window: Region,
    low: u64,
    high: u64,
    max_length: u32,
    slack: f64,
    stack: Vec<(u64, u32)>,
}

impl Iterator for CellRanges {
    type Item = CellRange;

    fn next(&mut self) -> Option<CellRange> {
        while let Some((value, length)) = self.stack.pop() {
            let end = self.geohash.cell_end(value, length);
            if end <= self.low || value > self.high {
                continue;
            }
            let cell = self
                .geohash
                .cell_region(value, length)
                .inflate(self.slack);
            let Some(relation) = cell.intersect(&self.window) else {
                continue;
            };
            if relation == RELATION_INSIDE || length >= self.max_length {
                return Some(CellRange {
                    value,
                    length,
                    relation,
                });
            }
            let child_len = length + 2;
            let shift = self.geohash.sum_bits - child_len;
            for quadrant in (0..4u64).rev() {
                self.stack.push((value + (quadrant << shift), child_len));
            }
        }
        None
    }
}
