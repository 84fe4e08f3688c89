//! Pseudo-label selection by confidence and by neighborhood consensus,
//! plus the hybrid variants that fill the remaining pixels with ground truth.
//!
//! Every selector returns flat row-major pixel indices paired with labels.
//! Results are ordered deterministically and are never shuffled here; use
//! [`SelectionResult::shuffle`] before training when order matters.

use crate::correction::{spatial_correction_in, WindowCounter};
use crate::error::{check_len, check_percentage, check_radius, Result};
use crate::label::Label;
use crate::record::PseudoRecord;
use bumpalo::Bump;
use rand::seq::SliceRandom;
use rand::Rng;

/// Selected pixel indices and their training labels, index-aligned.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SelectionResult {
    /// Flat row-major pixel indices.
    pub indices: Vec<usize>,
    /// Label of each selected pixel.
    pub labels: Vec<Label>,
}

impl SelectionResult {
    /// Empty selection with room for `capacity` pixels.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            indices: Vec::with_capacity(capacity),
            labels: Vec::with_capacity(capacity),
        }
    }

    /// Append one pixel.
    #[inline]
    pub fn push(&mut self, index: usize, label: Label) {
        self.indices.push(index);
        self.labels.push(label);
    }

    /// Number of selected pixels.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether nothing was selected.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Iterate `(index, label)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, Label)> + '_ {
        self.indices.iter().copied().zip(self.labels.iter().copied())
    }

    /// Number of selected pixels carrying `label`.
    #[must_use]
    pub fn count(&self, label: Label) -> usize {
        self.labels.iter().filter(|&&l| l == label).count()
    }

    /// Permute indices and labels jointly.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mut pairs: Vec<(usize, Label)> = self.iter().collect();
        pairs.shuffle(rng);
        for (i, (index, label)) in pairs.into_iter().enumerate() {
            self.indices[i] = index;
            self.labels[i] = label;
        }
    }

    /// Copy without the pixels labelled `Unknown`.
    #[must_use]
    pub fn without_unknown(&self) -> Self {
        let mut out = Self::with_capacity(self.len());
        for (index, label) in self.iter().filter(|(_, l)| l.is_known()) {
            out.push(index, label);
        }
        out
    }

    /// Every index in `0..total` that this selection does not contain, ascending.
    #[must_use]
    pub fn complement(&self, total: usize) -> Vec<usize> {
        let mut taken = vec![false; total];
        for &i in &self.indices {
            if i < total {
                taken[i] = true;
            }
        }
        (0..total).filter(|&i| !taken[i]).collect()
    }
}

/// Number of items kept from a class of `size` (truncating).
#[inline]
pub(crate) fn take_count(percentage: f64, size: usize) -> usize {
    ((percentage * size as f64) as usize).min(size)
}

/// Most confident `percentage` of each pseudo-class.
///
/// Unchanged pixels (`distance <= threshold`) are ranked by ascending distance,
/// changed pixels by descending distance; equal distances keep index order.
/// The result lists the selected unchanged pixels first, then the changed ones.
pub fn select_by_percentage(record: &PseudoRecord, percentage: f64) -> Result<SelectionResult> {
    check_percentage(percentage)?;
    record.validate()?;

    let distances = record.distances();
    let threshold = record.threshold();

    let mut unchanged: Vec<usize> = Vec::new();
    let mut changed: Vec<usize> = Vec::new();
    for (i, &d) in distances.iter().enumerate() {
        if d > threshold {
            changed.push(i);
        } else {
            unchanged.push(i);
        }
    }

    unchanged.sort_by(|&a, &b| distances[a].total_cmp(&distances[b]));
    changed.sort_by(|&a, &b| distances[b].total_cmp(&distances[a]));

    let n_unchanged = take_count(percentage, unchanged.len());
    let n_changed = take_count(percentage, changed.len());
    tracing::debug!(
        n_unchanged,
        n_changed,
        percentage,
        "selected most confident pseudo-labels"
    );

    let mut result = SelectionResult::with_capacity(n_unchanged + n_changed);
    for &i in &unchanged[..n_unchanged] {
        result.push(i, Label::Unchanged);
    }
    for &i in &changed[..n_changed] {
        result.push(i, Label::Changed);
    }
    Ok(result)
}

/// Pixels whose neighborhood agrees unanimously on their pseudo-label.
///
/// The pseudo-label grid is corrected with [`spatial_correction_in`] using
/// `radius`. A pixel is kept when the window of the same radius around it in
/// the thresholded grid contains a single label; it is labelled with its
/// corrected value. Indices come out in row-major scan order.
pub fn select_by_neighborhood(record: &PseudoRecord, radius: usize) -> Result<SelectionResult> {
    let arena = Bump::new();
    select_by_neighborhood_in(&arena, record, radius)
}

/// [`select_by_neighborhood`] with scratch tables allocated from `arena`.
pub fn select_by_neighborhood_in(
    arena: &Bump,
    record: &PseudoRecord,
    radius: usize,
) -> Result<SelectionResult> {
    check_radius(radius)?;
    let pseudo = record.label_map()?;
    let corrected = spatial_correction_in(arena, &pseudo, radius)?;
    let counter = WindowCounter::new_in(arena, &pseudo);

    let (height, width) = pseudo.shape();
    let mut result = SelectionResult::default();
    for row in 0..height {
        for col in 0..width {
            if counter.counts_around(row, col, radius).is_unanimous() {
                result.push(row * width + col, corrected.get(row, col));
            }
        }
    }
    tracing::debug!(
        selected = result.len(),
        total = pseudo.len(),
        radius,
        "selected pseudo-labels by neighborhood"
    );
    Ok(result)
}

/// Ground-truth labels for every pixel the primary selection left out, ascending.
fn real_complement(
    primary: &SelectionResult,
    ground_truth: &[Label],
) -> SelectionResult {
    let rest = primary.complement(ground_truth.len());
    let mut out = SelectionResult::with_capacity(rest.len());
    for i in rest {
        out.push(i, ground_truth[i]);
    }
    out
}

fn plus_real(primary: SelectionResult, ground_truth: &[Label]) -> SelectionResult {
    let real = real_complement(&primary, ground_truth);
    let mut out = primary;
    out.indices.extend(real.indices);
    out.labels.extend(real.labels);
    out
}

/// Confident pseudo-labels plus ground truth for every other pixel.
pub fn pseudo_plus_real_by_percentage(
    record: &PseudoRecord,
    percentage: f64,
    ground_truth: &[Label],
) -> Result<SelectionResult> {
    check_len("ground truth", record.len(), ground_truth.len())?;
    let primary = select_by_percentage(record, percentage)?;
    Ok(plus_real(primary, ground_truth))
}

/// Ground truth for the pixels discarded by [`select_by_percentage`].
pub fn real_only_by_percentage(
    record: &PseudoRecord,
    percentage: f64,
    ground_truth: &[Label],
) -> Result<SelectionResult> {
    check_len("ground truth", record.len(), ground_truth.len())?;
    let primary = select_by_percentage(record, percentage)?;
    Ok(real_complement(&primary, ground_truth))
}

/// Unanimous-neighborhood pseudo-labels plus ground truth for every other pixel.
pub fn pseudo_plus_real_by_neighborhood(
    record: &PseudoRecord,
    radius: usize,
    ground_truth: &[Label],
) -> Result<SelectionResult> {
    check_len("ground truth", record.len(), ground_truth.len())?;
    let primary = select_by_neighborhood(record, radius)?;
    Ok(plus_real(primary, ground_truth))
}

/// Ground truth for the pixels discarded by [`select_by_neighborhood`].
pub fn real_only_by_neighborhood(
    record: &PseudoRecord,
    radius: usize,
    ground_truth: &[Label],
) -> Result<SelectionResult> {
    check_len("ground truth", record.len(), ground_truth.len())?;
    let primary = select_by_neighborhood(record, radius)?;
    Ok(real_complement(&primary, ground_truth))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RefineError;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const U: Label = Label::Unchanged;
    const C: Label = Label::Changed;

    fn record(distances: Vec<f64>, threshold: f64, shape: (usize, usize)) -> PseudoRecord {
        PseudoRecord::new(distances, threshold, shape).unwrap()
    }

    #[test]
    fn test_percentage_end_to_end() {
        let rec = record(vec![0.1, 0.2, 0.8, 0.9], 0.5, (2, 2));
        let sel = select_by_percentage(&rec, 0.5).unwrap();
        // one of each class: closest unchanged, farthest changed
        assert_eq!(sel.indices, vec![0, 3]);
        assert_eq!(sel.labels, vec![U, C]);
    }

    #[test]
    fn test_percentage_confidence_order() {
        let rec = record(vec![0.4, 0.1, 0.9, 0.3, 0.6, 0.7], 0.5, (2, 3));
        let sel = select_by_percentage(&rec, 1.0).unwrap();
        assert_eq!(sel.indices, vec![1, 3, 0, 2, 5, 4]);
        assert_eq!(sel.labels, vec![U, U, U, C, C, C]);
    }

    #[test]
    fn test_percentage_threshold_is_unchanged() {
        let rec = record(vec![0.5, 0.6], 0.5, (1, 2));
        let sel = select_by_percentage(&rec, 1.0).unwrap();
        assert_eq!(sel.labels, vec![U, C]);
    }

    #[test]
    fn test_percentage_ties_keep_index_order() {
        let rec = record(vec![0.9, 0.1, 0.9, 0.1], 0.5, (2, 2));
        let sel = select_by_percentage(&rec, 1.0).unwrap();
        assert_eq!(sel.indices, vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_percentage_validation() {
        let rec = record(vec![0.1, 0.9], 0.5, (1, 2));
        for bad in [0.0, -0.2, 1.01, f64::NAN] {
            assert!(matches!(
                select_by_percentage(&rec, bad),
                Err(RefineError::InvalidPercentage(_))
            ));
        }
    }

    #[test]
    fn test_neighborhood_rejects_zero_radius() {
        let rec = record(vec![0.1; 4], 0.5, (2, 2));
        assert!(matches!(
            select_by_neighborhood(&rec, 0),
            Err(RefineError::InvalidRadius(0))
        ));
    }

    #[test]
    fn test_neighborhood_radius_one_selects_everything() {
        let rec = record(vec![0.1, 0.9, 0.9, 0.1], 0.5, (2, 2));
        let sel = select_by_neighborhood(&rec, 1).unwrap();
        assert_eq!(sel.indices, vec![0, 1, 2, 3]);
        assert_eq!(sel.labels, vec![U, C, C, U]);
    }

    #[test]
    fn test_neighborhood_isolated_change() {
        let mut distances = vec![0.1; 25];
        distances[12] = 0.9;
        let rec = record(distances, 0.5, (5, 5));
        let sel = select_by_neighborhood(&rec, 2).unwrap();

        // the center and its 8 neighbors see the changed pixel
        for excluded in [6, 7, 8, 11, 12, 13, 16, 17, 18] {
            assert!(!sel.indices.contains(&excluded), "pixel {excluded} selected");
        }
        for included in [0, 4, 20, 24] {
            assert!(sel.indices.contains(&included), "pixel {included} missing");
        }
        assert_eq!(sel.len(), 16);
        assert!(sel.labels.iter().all(|&l| l == U));
        // row-major order
        assert!(sel.indices.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_hybrid_percentage() {
        let rec = record(vec![0.1, 0.2, 0.8, 0.9], 0.5, (2, 2));
        let truth = [U, C, C, Label::Unknown];

        let plus = pseudo_plus_real_by_percentage(&rec, 0.5, &truth).unwrap();
        assert_eq!(plus.indices, vec![0, 3, 1, 2]);
        assert_eq!(plus.labels, vec![U, C, C, C]);

        let only = real_only_by_percentage(&rec, 0.5, &truth).unwrap();
        assert_eq!(only.indices, vec![1, 2]);
        assert_eq!(only.labels, vec![C, C]);
    }

    #[test]
    fn test_hybrid_ground_truth_length_checked() {
        let rec = record(vec![0.1, 0.2, 0.8, 0.9], 0.5, (2, 2));
        assert!(matches!(
            real_only_by_neighborhood(&rec, 2, &[U, U]),
            Err(RefineError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_shuffle_keeps_pairs() {
        let rec = record((0..40).map(|i| f64::from(i) / 40.0).collect(), 0.5, (5, 8));
        let sel = select_by_percentage(&rec, 1.0).unwrap();
        let mut shuffled = sel.clone();
        shuffled.shuffle(&mut ChaCha8Rng::seed_from_u64(43));
        assert_ne!(shuffled.indices, sel.indices);
        let original: std::collections::HashMap<usize, Label> = sel.iter().collect();
        for (i, l) in shuffled.iter() {
            assert_eq!(original[&i], l);
        }
    }

    #[test]
    fn test_without_unknown() {
        let sel = SelectionResult {
            indices: vec![3, 1, 2],
            labels: vec![U, Label::Unknown, C],
        };
        let known = sel.without_unknown();
        assert_eq!(known.indices, vec![3, 2]);
        assert_eq!(known.labels, vec![U, C]);
    }

    proptest! {
        #[test]
        fn prop_percentage_sizes(
            distances in prop::collection::vec(0.0..1.0f64, 1..200),
            percentage in 0.01..=1.0f64,
        ) {
            let n = distances.len();
            let rec = record(distances.clone(), 0.5, (1, n));
            let sel = select_by_percentage(&rec, percentage).unwrap();
            let n_unchanged = distances.iter().filter(|&&d| d <= 0.5).count();
            let n_changed = n - n_unchanged;
            prop_assert_eq!(sel.count(U), (percentage * n_unchanged as f64) as usize);
            prop_assert_eq!(sel.count(C), (percentage * n_changed as f64) as usize);
            let mut unique = sel.indices.clone();
            unique.sort_unstable();
            unique.dedup();
            prop_assert_eq!(unique.len(), sel.len());
        }

        #[test]
        fn prop_only_variant_is_complement(
            distances in prop::collection::vec(0.0..1.0f64, 36),
            radius in 1..4usize,
            percentage in 0.05..=1.0f64,
        ) {
            let rec = record(distances, 0.5, (6, 6));
            let truth = rec.labels();

            let primary = select_by_neighborhood(&rec, radius).unwrap();
            let only = real_only_by_neighborhood(&rec, radius, &truth).unwrap();
            prop_assert_eq!(only.len(), 36 - primary.len());
            prop_assert!(only.indices.iter().all(|i| !primary.indices.contains(i)));

            let primary = select_by_percentage(&rec, percentage).unwrap();
            let plus = pseudo_plus_real_by_percentage(&rec, percentage, &truth).unwrap();
            prop_assert_eq!(plus.len(), 36);
            let mut all = plus.indices.clone();
            all.sort_unstable();
            prop_assert_eq!(all, (0..36).collect::<Vec<_>>());
            prop_assert_eq!(&plus.indices[..primary.len()], &primary.indices[..]);
        }
    }
}
