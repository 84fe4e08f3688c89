//! Active-learning selection: ground-truth pixels chosen where the current
//! model is least certain, or sampled evenly across precomputed clusters.

use crate::clustering::ClusterAssignments;
use crate::error::{check_len, check_percentage, Result};
use crate::label::Label;
use crate::model::SimilarityModel;
use crate::selection::{take_count, SelectionResult};
use crate::threshold::otsu_threshold;
use rand::seq::SliceRandom;
use rand::Rng;

/// Model distances for `pairs` and their Otsu decision boundary.
fn predict_with_boundary<M>(model: &M, pairs: &[M::Pair], len: usize) -> Result<(Vec<f64>, f64)>
where
    M: SimilarityModel + ?Sized,
{
    check_len("pairs", len, pairs.len())?;
    let predictions = model.predict(pairs);
    check_len("predictions", len, predictions.len())?;
    let boundary = otsu_threshold(&predictions)?;
    Ok((predictions, boundary))
}

/// Sort `candidates` by margin to `boundary`, smallest first; ties keep their order.
fn rank_by_margin(candidates: &mut [usize], predictions: &[f64], boundary: f64) {
    candidates.sort_by(|&a, &b| {
        (predictions[a] - boundary)
            .abs()
            .total_cmp(&(predictions[b] - boundary).abs())
    });
}

/// The `percentage` of pixels closest to the model's decision boundary.
///
/// The boundary is the Otsu threshold of the model's predictions over the
/// whole image. Labels come from `ground_truth`.
pub fn select_by_uncertainty<M>(
    model: &M,
    pairs: &[M::Pair],
    ground_truth: &[Label],
    percentage: f64,
) -> Result<SelectionResult>
where
    M: SimilarityModel + ?Sized,
{
    check_percentage(percentage)?;
    let (predictions, boundary) = predict_with_boundary(model, pairs, ground_truth.len())?;

    let mut ranked: Vec<usize> = (0..ground_truth.len()).collect();
    rank_by_margin(&mut ranked, &predictions, boundary);
    let n = take_count(percentage, ranked.len());
    tracing::debug!(n, boundary, "selected most uncertain pixels");

    let mut result = SelectionResult::with_capacity(n);
    for &i in &ranked[..n] {
        result.push(i, ground_truth[i]);
    }
    Ok(result)
}

/// Random `percentage` of every cluster, clusters visited in ascending id order.
pub fn select_by_cluster_random<R>(
    ground_truth: &[Label],
    percentage: f64,
    clusters: &ClusterAssignments,
    rng: &mut R,
) -> Result<SelectionResult>
where
    R: Rng + ?Sized,
{
    check_percentage(percentage)?;
    clusters.validate(ground_truth.len())?;

    let mut result = SelectionResult::default();
    for (id, members) in clusters.iter() {
        if members.is_empty() {
            tracing::warn!(cluster = id, "empty cluster skipped");
            continue;
        }
        let n = take_count(percentage, members.len());
        for &i in members.choose_multiple(rng, n) {
            result.push(i, ground_truth[i]);
        }
    }
    tracing::debug!(
        selected = result.len(),
        clusters = clusters.len(),
        "sampled clusters at random"
    );
    Ok(result)
}

/// Most uncertain `percentage` of every cluster.
///
/// Uses the same whole-image boundary as [`select_by_uncertainty`].
pub fn select_by_cluster_uncertainty<M>(
    ground_truth: &[Label],
    percentage: f64,
    clusters: &ClusterAssignments,
    model: &M,
    pairs: &[M::Pair],
) -> Result<SelectionResult>
where
    M: SimilarityModel + ?Sized,
{
    check_percentage(percentage)?;
    clusters.validate(ground_truth.len())?;
    let (predictions, boundary) = predict_with_boundary(model, pairs, ground_truth.len())?;

    let mut result = SelectionResult::default();
    let mut ranked = Vec::new();
    for (id, members) in clusters.iter() {
        if members.is_empty() {
            tracing::warn!(cluster = id, "empty cluster skipped");
            continue;
        }
        ranked.clear();
        ranked.extend_from_slice(members);
        rank_by_margin(&mut ranked, &predictions, boundary);
        let n = take_count(percentage, ranked.len());
        for &i in &ranked[..n] {
            result.push(i, ground_truth[i]);
        }
    }
    tracing::debug!(
        selected = result.len(),
        clusters = clusters.len(),
        boundary,
        "sampled most uncertain pixels per cluster"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RefineError;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::BTreeMap;

    const U: Label = Label::Unchanged;
    const C: Label = Label::Changed;

    /// Pairs are already distances.
    struct Identity;

    impl SimilarityModel for Identity {
        type Pair = f64;

        fn predict(&self, pairs: &[f64]) -> Vec<f64> {
            pairs.to_vec()
        }
    }

    fn bimodal() -> (Vec<f64>, Vec<Label>) {
        // boundary falls between 0.2 and 0.8
        let pairs = vec![0.0, 0.1, 0.2, 0.45, 0.55, 0.8, 0.9, 1.0];
        let truth = vec![U, U, U, C, U, C, C, C];
        (pairs, truth)
    }

    #[test]
    fn test_uncertainty_picks_boundary_pixels() {
        let (pairs, truth) = bimodal();
        let sel = select_by_uncertainty(&Identity, &pairs, &truth, 0.25).unwrap();
        let mut indices = sel.indices.clone();
        indices.sort_unstable();
        assert_eq!(indices, vec![3, 4]);
        for (i, l) in sel.iter() {
            assert_eq!(l, truth[i]);
        }
    }

    #[test]
    fn test_uncertainty_validates_lengths() {
        let (pairs, truth) = bimodal();
        assert!(matches!(
            select_by_uncertainty(&Identity, &pairs[..4], &truth, 0.5),
            Err(RefineError::LengthMismatch { what: "pairs", .. })
        ));
        assert!(matches!(
            select_by_uncertainty(&Identity, &pairs, &truth, 0.0),
            Err(RefineError::InvalidPercentage(_))
        ));
    }

    fn two_clusters() -> ClusterAssignments {
        let mut map = BTreeMap::new();
        map.insert(1, vec![4, 5, 6, 7]);
        map.insert(0, vec![0, 1, 2, 3]);
        ClusterAssignments::new(map)
    }

    #[test]
    fn test_cluster_random_samples_each_cluster() {
        let (_, truth) = bimodal();
        let clusters = two_clusters();
        let mut rng = ChaCha8Rng::seed_from_u64(43);
        let sel = select_by_cluster_random(&truth, 0.5, &clusters, &mut rng).unwrap();
        assert_eq!(sel.len(), 4);
        // cluster 0 first
        assert!(sel.indices[..2].iter().all(|&i| i < 4));
        assert!(sel.indices[2..].iter().all(|&i| i >= 4));

        let mut again = ChaCha8Rng::seed_from_u64(43);
        let repeat = select_by_cluster_random(&truth, 0.5, &clusters, &mut again).unwrap();
        assert_eq!(repeat, sel);
    }

    #[test]
    fn test_cluster_random_rejects_out_of_range_members() {
        let (_, truth) = bimodal();
        let mut map = BTreeMap::new();
        map.insert(0, vec![0, 8]);
        let clusters = ClusterAssignments::new(map);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(matches!(
            select_by_cluster_random(&truth, 0.5, &clusters, &mut rng),
            Err(RefineError::IndexOutOfBounds { index: 8, len: 8 })
        ));
    }

    #[test]
    fn test_overlapping_clusters_rejected() {
        let (pairs, truth) = bimodal();
        let mut map = BTreeMap::new();
        map.insert(0, vec![0, 1]);
        map.insert(1, vec![0, 1]);
        let clusters = ClusterAssignments::new(map);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(matches!(
            select_by_cluster_random(&truth, 1.0, &clusters, &mut rng),
            Err(RefineError::DuplicateMember { index: 0 })
        ));
        assert!(matches!(
            select_by_cluster_uncertainty(&truth, 1.0, &clusters, &Identity, &pairs),
            Err(RefineError::DuplicateMember { index: 0 })
        ));

        let mut map = BTreeMap::new();
        map.insert(0, vec![2, 2]);
        assert!(matches!(
            ClusterAssignments::new(map).validate(8),
            Err(RefineError::DuplicateMember { index: 2 })
        ));
    }

    #[test]
    fn test_cluster_uncertainty_per_cluster() {
        let (pairs, truth) = bimodal();
        let sel =
            select_by_cluster_uncertainty(&truth, 0.25, &two_clusters(), &Identity, &pairs)
                .unwrap();
        // one per cluster, each nearest to the shared boundary
        assert_eq!(sel.indices, vec![3, 4]);
        assert_eq!(sel.labels, vec![C, U]);
    }
}
