// features.rs - Per-cell motion statistics and their containers
use crate::error::ExtractError;
use bytemuck::{Pod, Zeroable};
use optical_flow::MotionVector;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Accumulators of one grid cell. Layout is shared with the kernels.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize)]
pub struct MotionFeatures {
    pub pixels: u32,
    pub count: u32,
    pub x0_to_x1_magnitude: f32,
    pub x1_to_x0_magnitude: f32,
    pub y0_to_y1_magnitude: f32,
    pub y1_to_y0_magnitude: f32,
}

impl MotionFeatures {
    pub const ZERO: MotionFeatures = MotionFeatures {
        pixels: 0,
        count: 0,
        x0_to_x1_magnitude: 0.0,
        x1_to_x0_magnitude: 0.0,
        y0_to_y1_magnitude: 0.0,
        y1_to_y0_magnitude: 0.0,
    };

    /// Number of statistics a cell carries.
    pub const FEATURE_COUNT: usize = 6;

    /// Elementwise sum, in field order.
    pub fn accumulate(&mut self, other: &MotionFeatures) {
        self.pixels += other.pixels;
        self.count += other.count;
        self.x0_to_x1_magnitude += other.x0_to_x1_magnitude;
        self.x1_to_x0_magnitude += other.x1_to_x0_magnitude;
        self.y0_to_y1_magnitude += other.y0_to_y1_magnitude;
        self.y1_to_y0_magnitude += other.y1_to_y0_magnitude;
    }
}

/// Squared-magnitude thresholds for one extraction run.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MotionThresholds {
    pub motion_threshold_squared: f32,
    pub magnitude_quadrant_threshold_squared: f32,
}

impl Default for MotionThresholds {
    fn default() -> Self {
        Self {
            motion_threshold_squared: 4.0,
            magnitude_quadrant_threshold_squared: 2.25,
        }
    }
}

impl MotionThresholds {
    /// Contribution of a single pixel whose flow vector is `v`.
    ///
    /// Both comparisons are strict. A component at or below the magnitude
    /// threshold adds nothing to its direction accumulators.
    pub fn classify(&self, v: MotionVector) -> MotionFeatures {
        let mut out = MotionFeatures {
            pixels: 1,
            ..MotionFeatures::ZERO
        };
        let dx2 = v.dx * v.dx;
        let dy2 = v.dy * v.dy;

        if dx2 > self.magnitude_quadrant_threshold_squared {
            if v.dx >= 0.0 {
                out.x0_to_x1_magnitude = v.dx.abs();
            } else {
                out.x1_to_x0_magnitude = v.dx.abs();
            }
        }
        if dy2 > self.magnitude_quadrant_threshold_squared {
            if v.dy >= 0.0 {
                out.y0_to_y1_magnitude = v.dy.abs();
            } else {
                out.y1_to_y0_magnitude = v.dy.abs();
            }
        }
        if dx2 + dy2 > self.motion_threshold_squared {
            out.count = 1;
        }
        out
    }
}

fn store_f32(slot: &AtomicU32, value: f32, name: &'static str) {
    if value.is_finite() && value >= 0.0 {
        slot.store(value.to_bits(), Ordering::Relaxed);
    } else {
        tracing::warn!(accumulator = name, value, "ignoring invalid accumulator value");
    }
}

/// One cell of a [`FeatureGrid`], handed out as `Arc<FeatureCell>`.
#[derive(Debug, Default)]
pub struct FeatureCell {
    pixels: AtomicU32,
    count: AtomicU32,
    x0_to_x1: AtomicU32,
    x1_to_x0: AtomicU32,
    y0_to_y1: AtomicU32,
    y1_to_y0: AtomicU32,
}

impl FeatureCell {
    pub fn new(values: &MotionFeatures) -> Self {
        let cell = Self::default();
        cell.store(values);
        cell
    }

    pub fn pixels(&self) -> u32 {
        self.pixels.load(Ordering::Relaxed)
    }

    pub fn set_pixels(&self, value: u32) {
        self.pixels.store(value, Ordering::Relaxed);
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn set_count(&self, value: u32) {
        self.count.store(value, Ordering::Relaxed);
    }

    pub fn x0_to_x1_magnitude(&self) -> f32 {
        f32::from_bits(self.x0_to_x1.load(Ordering::Relaxed))
    }

    pub fn set_x0_to_x1_magnitude(&self, value: f32) {
        store_f32(&self.x0_to_x1, value, "x0-to-x1-magnitude");
    }

    pub fn x1_to_x0_magnitude(&self) -> f32 {
        f32::from_bits(self.x1_to_x0.load(Ordering::Relaxed))
    }

    pub fn set_x1_to_x0_magnitude(&self, value: f32) {
        store_f32(&self.x1_to_x0, value, "x1-to-x0-magnitude");
    }

    pub fn y0_to_y1_magnitude(&self) -> f32 {
        f32::from_bits(self.y0_to_y1.load(Ordering::Relaxed))
    }

    pub fn set_y0_to_y1_magnitude(&self, value: f32) {
        store_f32(&self.y0_to_y1, value, "y0-to-y1-magnitude");
    }

    pub fn y1_to_y0_magnitude(&self) -> f32 {
        f32::from_bits(self.y1_to_y0.load(Ordering::Relaxed))
    }

    pub fn set_y1_to_y0_magnitude(&self, value: f32) {
        store_f32(&self.y1_to_y0, value, "y1-to-y0-magnitude");
    }

    pub fn snapshot(&self) -> MotionFeatures {
        MotionFeatures {
            pixels: self.pixels(),
            count: self.count(),
            x0_to_x1_magnitude: self.x0_to_x1_magnitude(),
            x1_to_x0_magnitude: self.x1_to_x0_magnitude(),
            y0_to_y1_magnitude: self.y0_to_y1_magnitude(),
            y1_to_y0_magnitude: self.y1_to_y0_magnitude(),
        }
    }

    pub fn store(&self, values: &MotionFeatures) {
        self.set_pixels(values.pixels);
        self.set_count(values.count);
        self.set_x0_to_x1_magnitude(values.x0_to_x1_magnitude);
        self.set_x1_to_x0_magnitude(values.x1_to_x0_magnitude);
        self.set_y0_to_y1_magnitude(values.y0_to_y1_magnitude);
        self.set_y1_to_y0_magnitude(values.y1_to_y0_magnitude);
    }
}

/// Fixed `rows × cols` matrix of cells, addressed by `(col, row)`.
#[derive(Debug)]
pub struct FeatureGrid {
    rows: u32,
    cols: u32,
    cells: Vec<Arc<FeatureCell>>,
}

impl FeatureGrid {
    pub const DEFAULT_ROWS: u32 = 20;
    pub const DEFAULT_COLS: u32 = 20;

    pub fn new(rows: u32, cols: u32) -> Self {
        let cells = (0..rows as usize * cols as usize)
            .map(|_| Arc::new(FeatureCell::default()))
            .collect();
        Self { rows, cols, cells }
    }

    /// Build from row-major records as read back from the device.
    pub fn from_records(
        rows: u32,
        cols: u32,
        records: &[MotionFeatures],
    ) -> Result<Self, ExtractError> {
        let expected = rows as usize * cols as usize;
        if records.len() != expected {
            return Err(ExtractError::Copy(format!(
                "{rows}x{cols} grid needs {expected} cells, read back {}",
                records.len()
            )));
        }
        let cells = records
            .iter()
            .map(|r| Arc::new(FeatureCell::new(r)))
            .collect();
        Ok(Self { rows, cols, cells })
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// A new handle on the cell at `(col, row)`, or `None` outside the grid.
    pub fn at(&self, col: u32, row: u32) -> Option<Arc<FeatureCell>> {
        if col >= self.cols || row >= self.rows {
            return None;
        }
        self.cells
            .get(row as usize * self.cols as usize + col as usize)
            .cloned()
    }

    pub fn cells(&self) -> impl Iterator<Item = &Arc<FeatureCell>> {
        self.cells.iter()
    }

    /// Row-major copy of every cell's accumulators.
    pub fn snapshot(&self) -> Vec<MotionFeatures> {
        self.cells.iter().map(|c| c.snapshot()).collect()
    }

    pub fn total_pixels(&self) -> u64 {
        self.cells.iter().map(|c| u64::from(c.pixels())).sum()
    }

    /// Row-major view sharing this grid's cells.
    pub fn to_array(&self) -> FeatureArray {
        FeatureArray {
            cells: self.cells.clone(),
        }
    }
}

impl Default for FeatureGrid {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ROWS, Self::DEFAULT_COLS)
    }
}

/// Fixed-length list of cells.
#[derive(Debug)]
pub struct FeatureArray {
    cells: Vec<Arc<FeatureCell>>,
}

impl FeatureArray {
    pub const DEFAULT_LENGTH: usize = 40;

    pub fn new(length: usize) -> Self {
        Self {
            cells: (0..length).map(|_| Arc::new(FeatureCell::default())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn at(&self, index: usize) -> Option<Arc<FeatureCell>> {
        self.cells.get(index).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<FeatureCell>> {
        self.cells.iter()
    }
}

impl Default for FeatureArray {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LENGTH)
    }
}
