#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]

use crate::error::Result;
use crate::label::{Label, LabelMap};
use crate::record::PseudoRecord;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// An axis-aligned block of pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Top row.
    pub row: usize,
    /// Left column.
    pub col: usize,
    /// Number of rows.
    pub height: usize,
    /// Number of columns.
    pub width: usize,
}

impl Region {
    /// Block of `height x width` pixels with its top-left corner at `(row, col)`.
    pub fn new(row: usize, col: usize, height: usize, width: usize) -> Self {
        Self {
            row,
            col,
            height,
            width,
        }
    }

    fn contains(&self, row: usize, col: usize) -> bool {
        row >= self.row && row < self.row + self.height && col >= self.col && col < self.col + self.width
    }
}

/// A builder for synthetic change scenes.
///
/// The scene is unchanged except inside the changed regions. Unknown regions
/// hide the reference label but keep the underlying class when rendering
/// distances, as unlabelled pixels do in real scenes.
pub struct ChangeSceneBuilder {
    height: usize,
    width: usize,
    changed: Vec<Region>,
    unknown: Vec<Region>,
    unchanged_mean: f64,
    changed_mean: f64,
    noise_sigma: f64,
}

impl ChangeSceneBuilder {
    /// Create a new scene builder with given dimensions.
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            changed: Vec::new(),
            unknown: Vec::new(),
            unchanged_mean: 0.2,
            changed_mean: 1.0,
            noise_sigma: 0.0,
        }
    }

    /// Mark a block as changed.
    pub fn with_changed(mut self, region: Region) -> Self {
        self.changed.push(region);
        self
    }

    /// Mark a block as unlabelled.
    pub fn with_unknown(mut self, region: Region) -> Self {
        self.unknown.push(region);
        self
    }

    /// Set the mean distance of each class.
    pub fn with_means(mut self, unchanged: f64, changed: f64) -> Self {
        self.unchanged_mean = unchanged;
        self.changed_mean = changed;
        self
    }

    /// Set the noise standard deviation.
    pub fn with_noise(mut self, sigma: f64) -> Self {
        self.noise_sigma = sigma.max(0.0);
        self
    }

    /// `(height, width)` of the scene.
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// True class of every pixel, ignoring unknown regions.
    pub fn true_labels(&self) -> LabelMap {
        self.render(|row, col| {
            if self.changed.iter().any(|r| r.contains(row, col)) {
                Label::Changed
            } else {
                Label::Unchanged
            }
        })
    }

    /// Reference labels with unknown regions applied.
    pub fn ground_truth(&self) -> LabelMap {
        self.render(|row, col| {
            if self.unknown.iter().any(|r| r.contains(row, col)) {
                Label::Unknown
            } else if self.changed.iter().any(|r| r.contains(row, col)) {
                Label::Changed
            } else {
                Label::Unchanged
            }
        })
    }

    /// Noisy non-negative distances drawn around each pixel's class mean.
    pub fn distances<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        let truth = self.true_labels();
        let noise = Normal::new(0.0, self.noise_sigma).ok().filter(|_| self.noise_sigma > 0.0);
        truth
            .as_slice()
            .iter()
            .map(|&label| {
                let mean = if label == Label::Changed {
                    self.changed_mean
                } else {
                    self.unchanged_mean
                };
                let jitter = noise.as_ref().map_or(0.0, |n| n.sample(rng));
                (mean + jitter).max(0.0)
            })
            .collect()
    }

    /// Pseudo record of freshly drawn distances, thresholded with Otsu.
    pub fn record<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<PseudoRecord> {
        PseudoRecord::from_distances(self.distances(rng), self.shape())
    }

    fn render(&self, label_at: impl Fn(usize, usize) -> Label) -> LabelMap {
        LabelMap::from_fn(self.height, self.width, label_at)
    }
}
