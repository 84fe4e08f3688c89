//! Categorical pixel labels and row-major label grids.

use crate::error::{RefineError, Result};

/// Class of a single pixel pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Label {
    /// No change between the two acquisitions.
    Unchanged = 0,
    /// The pixel changed between the two acquisitions.
    Changed = 1,
    /// No ground truth available for this pixel.
    Unknown = 2,
}

impl Label {
    /// Number of distinct labels, used to size frequency tables.
    pub const COUNT: usize = 3;

    /// All labels in index order.
    pub const ALL: [Label; Label::COUNT] = [Label::Unchanged, Label::Changed, Label::Unknown];

    /// Dense index of the label (0..`COUNT`).
    #[inline(always)]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Whether the label carries supervision (is not `Unknown`).
    #[inline]
    #[must_use]
    pub const fn is_known(self) -> bool {
        !matches!(self, Label::Unknown)
    }
}

impl TryFrom<u8> for Label {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Label::Unchanged),
            1 => Ok(Label::Changed),
            2 => Ok(Label::Unknown),
            other => Err(other),
        }
    }
}

/// Owned `height x width` grid of labels, flattened row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LabelMap {
    data: Vec<Label>,
    height: usize,
    width: usize,
}

impl LabelMap {
    /// Wrap a flat label buffer after checking it against the shape.
    pub fn new(data: Vec<Label>, height: usize, width: usize) -> Result<Self> {
        crate::error::check_shape(data.len(), (height, width))?;
        Ok(Self {
            data,
            height,
            width,
        })
    }

    /// Grid filled with a single label.
    #[must_use]
    pub fn filled(label: Label, height: usize, width: usize) -> Self {
        Self {
            data: vec![label; height * width],
            height,
            width,
        }
    }

    /// Grid whose label at `(row, col)` is `f(row, col)`.
    pub fn from_fn(height: usize, width: usize, f: impl Fn(usize, usize) -> Label) -> Self {
        let mut data = Vec::with_capacity(height * width);
        for row in 0..height {
            for col in 0..width {
                data.push(f(row, col));
            }
        }
        Self {
            data,
            height,
            width,
        }
    }

    /// Number of rows.
    #[inline]
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of columns.
    #[inline]
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// `(height, width)`.
    #[inline]
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Total number of pixels.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the grid has no pixels.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flat row-major view.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[Label] {
        &self.data
    }

    /// Consume the map, returning the flat buffer.
    #[must_use]
    pub fn into_vec(self) -> Vec<Label> {
        self.data
    }

    /// Row accessor.
    #[inline(always)]
    #[must_use]
    pub fn get_row(&self, row: usize) -> &[Label] {
        assert!(row < self.height, "Row index {} out of bounds", row);
        let start = row * self.width;
        &self.data[start..start + self.width]
    }

    /// Pixel accessor.
    #[inline(always)]
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Label {
        assert!(col < self.width, "Column index {} out of bounds", col);
        self.get_row(row)[col]
    }

    /// Number of pixels carrying `label`.
    #[must_use]
    pub fn count(&self, label: Label) -> usize {
        self.data.iter().filter(|&&l| l == label).count()
    }

    /// Copy of this map with `Unknown` wherever `ground_truth` is `Unknown`.
    ///
    /// This is the part of a prediction that can be compared against ground truth.
    pub fn masked_by(&self, ground_truth: &[Label]) -> Result<Self> {
        crate::error::check_len("ground truth", self.len(), ground_truth.len())?;
        let data = self
            .data
            .iter()
            .zip(ground_truth)
            .map(|(&p, &g)| if g == Label::Unknown { Label::Unknown } else { p })
            .collect();
        Ok(Self {
            data,
            height: self.height,
            width: self.width,
        })
    }
}
