//! Well-grid geometry.
//!
//! Pure, deterministic module: no I/O, no device access. Four manually-taught
//! corner positions plus the plate's row/column counts become an ordered list
//! of per-well coordinates via bilinear interpolation, traversed in a
//! boustrophedon ("snake") order that reverses column direction on alternate
//! rows to minimize stage travel.
//!
//! Two numbering schemes coexist and are easy to confuse:
//! - the **cycle** (sequence index): 1-based position in traversal order,
//!   used for stage movement and progress reporting;
//! - the **logical well number**: the plate-relative identity, always
//!   counting left-to-right within a row, used for display and filenames.
//!
//! [`well_number`] maps the former to the latter.

use crate::error::{RigError, RigResult};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul};

/// A corner position in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Vec3;

    fn mul(self, factor: f64) -> Vec3 {
        Vec3::new(self.x * factor, self.y * factor, self.z * factor)
    }
}

/// One well's stage coordinates, tagged with its traversal cycle (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WellPosition {
    pub cycle: u32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// A solved plate grid: `rows * cols` positions in snake traversal order.
#[derive(Debug, Clone)]
pub struct PlateGrid {
    rows: u32,
    cols: u32,
    positions: Vec<WellPosition>,
}

impl PlateGrid {
    /// Bilinearly interpolate the four taught corners into a full grid.
    ///
    /// For row `r`, `v = r/(rows-1)`; for column `c`, `u = c/(cols-1)`;
    /// `point = (1-v)*((1-u)*tl + u*tr) + v*((1-u)*bl + u*br)`. Every well is
    /// recomputed from the corners — never from the previous well — so
    /// rounding cannot accumulate across rows. Columns run ascending on even
    /// rows and descending on odd rows.
    pub fn solve(
        rows: u32,
        cols: u32,
        tl: Vec3,
        tr: Vec3,
        bl: Vec3,
        br: Vec3,
    ) -> RigResult<Self> {
        if rows < 2 || cols < 2 {
            return Err(RigError::InvalidGrid(format!(
                "plate must be at least 2x2, got {rows}x{cols}"
            )));
        }

        let mut positions = Vec::with_capacity((rows * cols) as usize);
        let mut cycle = 1u32;

        for r in 0..rows {
            let v = f64::from(r) / f64::from(rows - 1);
            let columns: Vec<u32> = if r % 2 == 0 {
                (0..cols).collect()
            } else {
                (0..cols).rev().collect()
            };

            for c in columns {
                let u = f64::from(c) / f64::from(cols - 1);
                let top = tl * (1.0 - u) + tr * u;
                let bottom = bl * (1.0 - u) + br * u;
                let point = top * (1.0 - v) + bottom * v;

                positions.push(WellPosition {
                    cycle,
                    x: round3(point.x),
                    y: round3(point.y),
                    z: round3(point.z),
                });
                cycle += 1;
            }
        }

        Ok(Self {
            rows,
            cols,
            positions,
        })
    }

    /// Wrap a pre-authored well list (e.g. loaded from CSV) as a grid,
    /// checking it against the plate dimensions.
    pub fn from_positions(
        rows: u32,
        cols: u32,
        positions: Vec<WellPosition>,
    ) -> RigResult<Self> {
        if rows < 2 || cols < 2 {
            return Err(RigError::InvalidGrid(format!(
                "plate must be at least 2x2, got {rows}x{cols}"
            )));
        }
        if positions.len() != (rows * cols) as usize {
            return Err(RigError::InvalidGrid(format!(
                "well list has {} entries, expected {} for a {rows}x{cols} plate",
                positions.len(),
                rows * cols
            )));
        }
        Ok(Self {
            rows,
            cols,
            positions,
        })
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn well_count(&self) -> u32 {
        self.rows * self.cols
    }

    pub fn positions(&self) -> &[WellPosition] {
        &self.positions
    }

    pub fn into_positions(self) -> Vec<WellPosition> {
        self.positions
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Logical plate-relative well number for a traversal cycle.
///
/// Even rows (0-indexed) are traversed left-to-right, so the cycle already is
/// the well number. Odd rows are traversed right-to-left; the column order is
/// mirrored back so numbering stays left-to-right within the row.
pub fn well_number(cycle: u32, cols: u32) -> u32 {
    let row = (cycle - 1) / cols;
    if row % 2 == 0 {
        cycle
    } else {
        row * cols + (cols - ((cycle - 1) % cols))
    }
}

/// Focus-bracketing plan: `2*half_range + 1` Z planes centered on the
/// solved focus height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZStackPlan {
    pub enabled: bool,
    pub half_range: u32,
}

impl ZStackPlan {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            half_range: 0,
        }
    }

    pub fn stack(half_range: u32) -> Self {
        Self {
            enabled: true,
            half_range,
        }
    }

    /// Z offsets in ascending order, always including 0.
    pub fn offsets(&self, step_mm: f64) -> Vec<f64> {
        if !self.enabled {
            return vec![0.0];
        }
        let n = i64::from(self.half_range);
        (-n..=n).map(|i| i as f64 * step_mm).collect()
    }
}

/// Expand a well list across a Z-stack plan: offset-major, well-minor, so
/// each Z plane gets a full plate pass in unmodified traversal order.
pub fn expand_z_stack(
    wells: &[WellPosition],
    plan: &ZStackPlan,
    step_mm: f64,
) -> Vec<(usize, WellPosition)> {
    plan.offsets(step_mm)
        .into_iter()
        .enumerate()
        .flat_map(|(offset_index, offset)| {
            wells.iter().map(move |well| {
                (
                    offset_index,
                    WellPosition {
                        z: well.z + offset,
                        ..*well
                    },
                )
            })
        })
        .collect()
}
