//! Persisted pseudo-labeling state of one image pair.

use crate::distance::{compute_distances, DistanceFunction};
use crate::error::{check_shape, Result};
use crate::label::{Label, LabelMap};
use crate::threshold::{build_label_map, build_labels, otsu_threshold};
use rayon::prelude::*;

/// Distances, threshold and shape of one image pair.
///
/// The threshold is computed once when the record is created and reused by
/// every downstream selector, so pseudo-labels stay consistent across runs.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PseudoRecord {
    distances: Vec<f64>,
    threshold: f64,
    shape: (usize, usize),
}

impl PseudoRecord {
    /// Wrap an existing `(distances, threshold, shape)` triple.
    pub fn new(distances: Vec<f64>, threshold: f64, shape: (usize, usize)) -> Result<Self> {
        let record = Self {
            distances,
            threshold,
            shape,
        };
        record.validate()?;
        Ok(record)
    }

    /// Build a record, deriving the threshold with Otsu's method.
    pub fn from_distances(distances: Vec<f64>, shape: (usize, usize)) -> Result<Self> {
        check_shape(distances.len(), shape)?;
        let threshold = otsu_threshold(&distances)?;
        Ok(Self {
            distances,
            threshold,
            shape,
        })
    }

    /// Check that the distance count matches the declared shape.
    pub fn validate(&self) -> Result<()> {
        check_shape(self.distances.len(), self.shape)
    }

    /// Flat row-major distances.
    #[inline]
    #[must_use]
    pub fn distances(&self) -> &[f64] {
        &self.distances
    }

    /// Stored decision threshold.
    #[inline]
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// `(height, width)` of the image pair.
    #[inline]
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    /// Number of pixel pairs.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.distances.len()
    }

    /// Whether the record holds no pixels.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }

    /// Flat pseudo-labels from the stored threshold.
    #[must_use]
    pub fn labels(&self) -> Vec<Label> {
        build_labels(&self.distances, self.threshold)
    }

    /// Pseudo-labels reshaped to the stored shape.
    pub fn label_map(&self) -> Result<LabelMap> {
        build_label_map(&self.distances, self.threshold, self.shape)
    }
}

#[cfg(feature = "serde")]
impl PseudoRecord {
    /// Write the record as a binary bundle.
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        crate::persist::save(self, path)
    }

    /// Read and re-validate a record written by [`PseudoRecord::save`].
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let record: Self = crate::persist::load(path)?;
        record.validate()?;
        Ok(record)
    }
}

/// Distances and Otsu threshold for one image pair in a single call.
pub fn pseudo_labels(
    first: &[f32],
    second: &[f32],
    bands: usize,
    shape: (usize, usize),
    function: DistanceFunction,
) -> Result<PseudoRecord> {
    let distances = compute_distances(first, second, bands, function)?;
    PseudoRecord::from_distances(distances, shape)
}

/// Borrowed co-registered acquisitions of one scene.
#[derive(Clone, Copy, Debug)]
pub struct ImagePair<'a> {
    /// Band-interleaved pixels of the first acquisition.
    pub first: &'a [f32],
    /// Band-interleaved pixels of the second acquisition.
    pub second: &'a [f32],
    /// Bands per pixel.
    pub bands: usize,
    /// `(height, width)` of both acquisitions.
    pub shape: (usize, usize),
}

/// Pseudo records for many image pairs, one rayon task per pair.
pub fn generate_records(
    pairs: &[ImagePair<'_>],
    function: DistanceFunction,
) -> Result<Vec<PseudoRecord>> {
    let _span = tracing::info_span!("generate_records", images = pairs.len()).entered();
    pairs
        .par_iter()
        .map(|p| pseudo_labels(p.first, p.second, p.bands, p.shape, function))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RefineError;

    #[test]
    fn test_record_labels() {
        let record = PseudoRecord::new(vec![0.1, 0.2, 0.8, 0.9], 0.5, (2, 2)).unwrap();
        assert_eq!(
            record.labels(),
            vec![Label::Unchanged, Label::Unchanged, Label::Changed, Label::Changed]
        );
        let map = record.label_map().unwrap();
        assert_eq!(map.get(1, 0), Label::Changed);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let result = PseudoRecord::new(vec![0.1, 0.2, 0.3], 0.5, (2, 2));
        assert!(matches!(
            result,
            Err(RefineError::ShapeMismatch {
                expected: 4,
                actual: 3,
                ..
            })
        ));
        assert!(PseudoRecord::from_distances(vec![0.1; 5], (2, 2)).is_err());
    }

    #[test]
    fn test_overflowing_shape_rejected() {
        let shape = (usize::MAX / 2 + 1, 2);
        assert!(matches!(
            PseudoRecord::new(vec![], 0.5, shape),
            Err(RefineError::ShapeOverflow(s)) if s == shape
        ));
        assert!(PseudoRecord::from_distances(vec![], shape).is_err());
    }

    #[test]
    fn test_pseudo_labels_from_images() {
        // 2x2 image, one band: two pixels changed strongly
        let first = [0.0, 0.0, 0.0, 0.0];
        let second = [0.0, 0.0, 5.0, 5.2];
        let record =
            pseudo_labels(&first, &second, 1, (2, 2), DistanceFunction::Euclidean).unwrap();
        assert_eq!(record.len(), 4);
        let changed = record.labels().iter().filter(|&&l| l == Label::Changed).count();
        assert_eq!(changed, 2);
    }

    #[test]
    fn test_generate_records_keeps_order() {
        let zeros = [0.0f32; 4];
        let second = [0.0, 0.0, 5.0, 5.2];
        let pairs = [
            ImagePair {
                first: &zeros,
                second: &second,
                bands: 1,
                shape: (2, 2),
            },
            ImagePair {
                first: &zeros[..2],
                second: &second[..2],
                bands: 2,
                shape: (1, 1),
            },
        ];
        let records = generate_records(&pairs, DistanceFunction::Euclidean).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].shape(), (2, 2));
        assert_eq!(records[1].shape(), (1, 1));

        let bad = [ImagePair {
            shape: (3, 3),
            ..pairs[0]
        }];
        assert!(generate_records(&bad, DistanceFunction::Euclidean).is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_save_load_exact() {
        let dir = std::env::temp_dir().join(format!("siamcd-record-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pair.bin");

        let distances = vec![0.1, 1.0 / 3.0, std::f64::consts::PI, 1e-300];
        let record = PseudoRecord::new(distances, 0.123_456_789, (2, 2)).unwrap();
        record.save(&path).unwrap();
        let loaded = PseudoRecord::load(&path).unwrap();
        assert_eq!(loaded, record);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
