//! Majority-vote spatial correction of label grids.
//!
//! The window around pixel `(r, c)` spans rows `[r - radius + 1, r + radius)`
//! and the same range of columns, clipped to the grid (no padding). A radius of
//! 3 therefore covers up to 5x5 pixels.
//!
//! Window frequencies come from per-label summed-area tables, so each window
//! query is O(1) regardless of the radius.

use crate::error::{check_radius, Result};
use crate::label::{Label, LabelMap};
use bumpalo::Bump;
use rayon::prelude::*;

/// Radius used when none is configured (5x5 window).
pub const DEFAULT_RADIUS: usize = 3;

/// Half-open row and column ranges of a clipped window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    /// First row (inclusive).
    pub row_start: usize,
    /// Last row (exclusive).
    pub row_end: usize,
    /// First column (inclusive).
    pub col_start: usize,
    /// Last column (exclusive).
    pub col_end: usize,
}

impl Window {
    /// Window of `radius` around `(row, col)` clipped to a `height x width` grid.
    #[inline]
    #[must_use]
    pub fn around(row: usize, col: usize, radius: usize, height: usize, width: usize) -> Self {
        let reach = radius.saturating_sub(1);
        Self {
            row_start: row.saturating_sub(reach),
            row_end: (row + radius).min(height),
            col_start: col.saturating_sub(reach),
            col_end: (col + radius).min(width),
        }
    }

    /// Number of pixels covered.
    #[inline]
    #[must_use]
    pub fn area(&self) -> usize {
        (self.row_end - self.row_start) * (self.col_end - self.col_start)
    }
}

/// Label frequencies inside one window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowCounts(pub [u32; Label::COUNT]);

impl WindowCounts {
    /// Occurrences of `label`.
    #[inline]
    #[must_use]
    pub fn get(&self, label: Label) -> u32 {
        self.0[label.index()]
    }

    /// Number of labels that occur at least once.
    #[inline]
    #[must_use]
    pub fn distinct(&self) -> usize {
        self.0.iter().filter(|&&c| c > 0).count()
    }

    /// Whether exactly one label occurs.
    #[inline]
    #[must_use]
    pub fn is_unanimous(&self) -> bool {
        self.distinct() == 1
    }

    /// The label strictly more frequent than every other one.
    ///
    /// Returns `None` on a tie for the top frequency, however many labels share it.
    #[must_use]
    pub fn majority(&self) -> Option<Label> {
        let mut best = Label::Unchanged;
        let mut best_count = 0u32;
        let mut tied = false;
        for label in Label::ALL {
            let c = self.get(label);
            if c > best_count {
                best = label;
                best_count = c;
                tied = false;
            } else if c == best_count && c > 0 {
                tied = true;
            }
        }
        if best_count == 0 || tied {
            None
        } else {
            Some(best)
        }
    }
}

/// Per-label summed-area tables of a label grid.
pub struct WindowCounter<'a> {
    table: &'a [[u32; Label::COUNT]],
    height: usize,
    width: usize,
}

impl<'a> WindowCounter<'a> {
    /// Build the tables for `map`, allocating from `arena`.
    pub fn new_in(arena: &'a Bump, map: &LabelMap) -> Self {
        let (height, width) = map.shape();
        let stride = width + 1;
        let table = arena.alloc_slice_fill_copy(stride * (height + 1), [0u32; Label::COUNT]);

        for row in 0..height {
            let mut row_acc = [0u32; Label::COUNT];
            let src = map.get_row(row);
            let (prev, curr) = table.split_at_mut((row + 1) * stride);
            let prev = &prev[row * stride..];
            for col in 0..width {
                row_acc[src[col].index()] += 1;
                let above = prev[col + 1];
                let cell = &mut curr[col + 1];
                for k in 0..Label::COUNT {
                    cell[k] = above[k] + row_acc[k];
                }
            }
        }

        Self {
            table,
            height,
            width,
        }
    }

    /// Grid height.
    #[inline]
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Grid width.
    #[inline]
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Label frequencies inside `window`.
    #[inline]
    #[must_use]
    pub fn counts(&self, window: Window) -> WindowCounts {
        let stride = self.width + 1;
        let a = self.table[window.row_start * stride + window.col_start];
        let b = self.table[window.row_start * stride + window.col_end];
        let c = self.table[window.row_end * stride + window.col_start];
        let d = self.table[window.row_end * stride + window.col_end];
        let mut out = [0u32; Label::COUNT];
        for k in 0..Label::COUNT {
            out[k] = d[k] + a[k] - b[k] - c[k];
        }
        WindowCounts(out)
    }

    /// Label frequencies in the window of `radius` around `(row, col)`.
    #[inline]
    #[must_use]
    pub fn counts_around(&self, row: usize, col: usize, radius: usize) -> WindowCounts {
        self.counts(Window::around(row, col, radius, self.height, self.width))
    }
}

/// Majority-vote correction of `map` with windows of the given radius.
///
/// Each pixel takes the most frequent label of its window; on a tie for the
/// top frequency it keeps its original label. The input is not modified.
pub fn spatial_correction(map: &LabelMap, radius: usize) -> Result<LabelMap> {
    let arena = Bump::new();
    spatial_correction_in(&arena, map, radius)
}

/// [`spatial_correction`] with scratch tables allocated from `arena`.
pub fn spatial_correction_in(arena: &Bump, map: &LabelMap, radius: usize) -> Result<LabelMap> {
    check_radius(radius)?;
    let (height, width) = map.shape();
    if map.is_empty() {
        return LabelMap::new(Vec::new(), height, width);
    }

    let counter = WindowCounter::new_in(arena, map);
    let mut corrected = map.as_slice().to_vec();

    corrected
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(row, dst_row)| {
            for (col, dst) in dst_row.iter_mut().enumerate() {
                if let Some(label) = counter.counts_around(row, col, radius).majority() {
                    *dst = label;
                }
            }
        });

    LabelMap::new(corrected, height, width)
}
