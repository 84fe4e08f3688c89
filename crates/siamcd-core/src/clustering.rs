//! Offline k-means clustering of pixel features for cluster-stratified sampling.
//!
//! Features are expected to be already reduced (e.g. by PCA) and laid out as
//! `samples * dims` row-major values. The cluster count is chosen with the
//! elbow of the SSE curve over a range of candidate k.

use crate::config::ClusteringConfig;
use crate::error::{RefineError, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Pixel membership of each cluster of one image.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClusterAssignments {
    clusters: BTreeMap<u32, Vec<usize>>,
}

impl ClusterAssignments {
    /// Wrap an explicit cluster id to member mapping. Members are sorted.
    #[must_use]
    pub fn new(mut clusters: BTreeMap<u32, Vec<usize>>) -> Self {
        for members in clusters.values_mut() {
            members.sort_unstable();
        }
        Self { clusters }
    }

    /// Group pixels by their per-pixel cluster id.
    #[must_use]
    pub fn from_labels(labels: &[u32]) -> Self {
        let mut clusters: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (i, &c) in labels.iter().enumerate() {
            clusters.entry(c).or_default().push(i);
        }
        Self { clusters }
    }

    /// Clusters in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[usize])> + '_ {
        self.clusters.iter().map(|(&id, m)| (id, m.as_slice()))
    }

    /// Number of clusters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// Whether there are no clusters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Total number of member pixels over all clusters.
    #[must_use]
    pub fn total_members(&self) -> usize {
        self.clusters.values().map(Vec::len).sum()
    }

    /// Check that every member lies in an image of `len` pixels and that no
    /// pixel is listed twice.
    pub fn validate(&self, len: usize) -> Result<()> {
        let mut seen = vec![false; len];
        for &index in self.clusters.values().flatten() {
            let slot = seen
                .get_mut(index)
                .ok_or(RefineError::IndexOutOfBounds { index, len })?;
            if std::mem::replace(slot, true) {
                return Err(RefineError::DuplicateMember { index });
            }
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
impl ClusterAssignments {
    /// Write the assignments as a binary bundle.
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        crate::persist::save(self, path)
    }

    /// Read assignments written by [`ClusterAssignments::save`].
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        crate::persist::load(path)
    }
}

/// One fitted k-means model.
#[derive(Clone, Debug)]
pub struct KMeansFit {
    /// Cluster index of each sample.
    pub assignments: Vec<u32>,
    /// `k * dims` centroid coordinates.
    pub centroids: Vec<f64>,
    /// Sum of squared distances of samples to their centroid.
    pub inertia: f64,
}

#[inline]
fn squared_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest(point: &[f64], centroids: &[f64], dims: usize) -> (u32, f64) {
    let mut best = 0u32;
    let mut best_d = f64::INFINITY;
    for (c, centroid) in centroids.chunks_exact(dims).enumerate() {
        let d = squared_dist(point, centroid);
        if d < best_d {
            best_d = d;
            best = c as u32;
        }
    }
    (best, best_d)
}

/// Lloyd's k-means with k-means++ seeding.
pub fn kmeans(
    features: &[f64],
    dims: usize,
    k: usize,
    config: &ClusteringConfig,
) -> Result<KMeansFit> {
    let samples = check_features(features, dims)?;
    if k == 0 || k > samples {
        return Err(RefineError::InvalidClusterRange {
            k_min: k,
            k_max: k,
            samples,
        });
    }
    let points: Vec<&[f64]> = features.chunks_exact(dims).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

    // k-means++: spread the initial picks proportionally to squared distance
    let mut centroids: Vec<f64> = Vec::with_capacity(k * dims);
    centroids.extend_from_slice(points[rng.gen_range(0..samples)]);
    let mut min_d: Vec<f64> = points
        .iter()
        .map(|p| squared_dist(p, &centroids[..dims]))
        .collect();
    for _ in 1..k {
        let total: f64 = min_d.iter().sum();
        let chosen = if total <= f64::EPSILON {
            rng.gen_range(0..samples)
        } else {
            let target = rng.gen_range(0.0..total);
            let mut cumulative = 0.0;
            min_d
                .iter()
                .position(|&d| {
                    cumulative += d;
                    cumulative >= target
                })
                .unwrap_or(samples - 1)
        };
        centroids.extend_from_slice(points[chosen]);
        let new_c = &centroids[centroids.len() - dims..];
        for (d, p) in min_d.iter_mut().zip(&points) {
            *d = d.min(squared_dist(p, new_c));
        }
    }

    let mut assignments = vec![0u32; samples];
    for iter in 0..config.max_iter {
        let mut changed = false;
        for (a, p) in assignments.iter_mut().zip(&points) {
            let (c, _) = nearest(p, &centroids, dims);
            if *a != c {
                changed = true;
                *a = c;
            }
        }

        let mut sums = vec![0.0f64; k * dims];
        let mut counts = vec![0usize; k];
        for (&a, p) in assignments.iter().zip(&points) {
            let a = a as usize;
            counts[a] += 1;
            for (s, &v) in sums[a * dims..(a + 1) * dims].iter_mut().zip(p.iter()) {
                *s += v;
            }
        }

        let mut shift = 0.0f64;
        for c in 0..k {
            if counts[c] == 0 {
                // empty cluster keeps its centroid
                continue;
            }
            let centroid = &mut centroids[c * dims..(c + 1) * dims];
            let mut moved = 0.0;
            for (x, &s) in centroid.iter_mut().zip(&sums[c * dims..(c + 1) * dims]) {
                let updated = s / counts[c] as f64;
                moved += (updated - *x) * (updated - *x);
                *x = updated;
            }
            shift = shift.max(moved);
        }

        if (!changed && iter > 0) || shift <= config.tolerance * config.tolerance {
            break;
        }
    }

    let mut inertia = 0.0;
    for (a, p) in assignments.iter_mut().zip(&points) {
        let (c, d) = nearest(p, &centroids, dims);
        *a = c;
        inertia += d;
    }

    Ok(KMeansFit {
        assignments,
        centroids,
        inertia,
    })
}

/// Elbow of a convex, decreasing curve (Kneedle).
///
/// Both axes are scaled to `[0, 1]`; the elbow is the point lying farthest
/// below the chord joining the first and last points. Returns the position
/// in `values`, or 0 for a flat curve.
#[must_use]
pub fn elbow_index(values: &[f64]) -> usize {
    if values.len() < 3 {
        return 0;
    }
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if hi - lo <= f64::EPSILON {
        return 0;
    }
    let last = (values.len() - 1) as f64;
    let mut best = 0;
    let mut best_gap = f64::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        let x = i as f64 / last;
        let y = (v - lo) / (hi - lo);
        let gap = (1.0 - x) - y;
        if gap > best_gap {
            best_gap = gap;
            best = i;
        }
    }
    best
}

/// Cluster pixels, choosing k by the elbow of the SSE curve over
/// `[config.k_min, config.k_max]`.
pub fn cluster_pixels(
    features: &[f64],
    dims: usize,
    config: &ClusteringConfig,
) -> Result<ClusterAssignments> {
    let samples = check_features(features, dims)?;
    if config.k_min == 0 || config.k_min > config.k_max || config.k_max > samples {
        return Err(RefineError::InvalidClusterRange {
            k_min: config.k_min,
            k_max: config.k_max,
            samples,
        });
    }

    let _span = tracing::info_span!("clustering").entered();
    let candidates: Vec<usize> = (config.k_min..=config.k_max).collect();
    let sse = candidates
        .par_iter()
        .map(|&k| kmeans(features, dims, k, config).map(|fit| fit.inertia))
        .collect::<Result<Vec<f64>>>()?;

    let k = candidates[elbow_index(&sse)];
    tracing::debug!(k, "chose cluster count from elbow");

    let fit = kmeans(features, dims, k, config)?;
    Ok(ClusterAssignments::from_labels(&fit.assignments))
}

fn check_features(features: &[f64], dims: usize) -> Result<usize> {
    if dims == 0 {
        return Err(RefineError::EmptyInput("feature dimensions"));
    }
    if features.is_empty() {
        return Err(RefineError::EmptyInput("features"));
    }
    if features.len() % dims != 0 {
        return Err(RefineError::LengthMismatch {
            what: "features",
            expected: features.len() / dims * dims,
            actual: features.len(),
        });
    }
    Ok(features.len() / dims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> Vec<f64> {
        // three well-separated 2-D blobs of 10 points
        let mut f = Vec::new();
        for (cx, cy) in [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)] {
            for i in 0..10 {
                let o = f64::from(i) * 0.01;
                f.extend_from_slice(&[cx + o, cy - o]);
            }
        }
        f
    }

    #[test]
    fn test_kmeans_separates_blobs() {
        let config = ClusteringConfig::default();
        let fit = kmeans(&blobs(), 2, 3, &config).unwrap();
        for blob in fit.assignments.chunks(10) {
            assert!(blob.iter().all(|&c| c == blob[0]));
        }
        assert_ne!(fit.assignments[0], fit.assignments[10]);
        assert_ne!(fit.assignments[10], fit.assignments[20]);
        assert_ne!(fit.assignments[0], fit.assignments[20]);
        assert!(fit.inertia < 1.0);
    }

    #[test]
    fn test_kmeans_is_reproducible() {
        let config = ClusteringConfig::default();
        let a = kmeans(&blobs(), 2, 4, &config).unwrap();
        let b = kmeans(&blobs(), 2, 4, &config).unwrap();
        assert_eq!(a.assignments, b.assignments);
    }

    #[test]
    fn test_elbow_on_convex_curve() {
        let sse = [100.0, 30.0, 12.0, 10.0, 9.0, 8.5];
        assert_eq!(elbow_index(&sse), 2);
        assert_eq!(elbow_index(&[5.0, 5.0, 5.0]), 0);
    }

    #[test]
    fn test_cluster_pixels_finds_three() {
        let config = ClusteringConfig::builder().k_range(2, 8).build();
        let clusters = cluster_pixels(&blobs(), 2, &config).unwrap();
        assert_eq!(clusters.len(), 3);
        assert_eq!(clusters.total_members(), 30);
        clusters.validate(30).unwrap();
    }

    #[test]
    fn test_invalid_range() {
        let config = ClusteringConfig::builder().k_range(50, 75).build();
        assert!(matches!(
            cluster_pixels(&blobs(), 2, &config),
            Err(RefineError::InvalidClusterRange { samples: 30, .. })
        ));
        assert!(cluster_pixels(&[1.0, 2.0, 3.0], 2, &config).is_err());
    }

    #[test]
    fn test_assignments_validate_bounds() {
        let clusters = ClusterAssignments::from_labels(&[0, 1, 0, 2]);
        assert_eq!(clusters.len(), 3);
        assert!(clusters.validate(4).is_ok());
        assert!(matches!(
            clusters.validate(3),
            Err(RefineError::IndexOutOfBounds { index: 3, len: 3 })
        ));
    }
}
