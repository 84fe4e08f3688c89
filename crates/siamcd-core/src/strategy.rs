//! Pluggable selection policies for fine-tuning.
//!
//! Each [`SelectionPolicy`] variant carries its own parameters and dispatches
//! to one selector:
//! - **Pseudo-label policies**: confidence or neighborhood filtering of the
//!   Otsu pseudo-labels, optionally completed with ground truth.
//! - **Active-learning policies**: ground truth where the model is uncertain,
//!   or sampled per k-means cluster.

use crate::active::{select_by_cluster_random, select_by_cluster_uncertainty, select_by_uncertainty};
use crate::clustering::ClusterAssignments;
use crate::error::{check_len, check_percentage, check_radius, RefineError, Result};
use crate::label::Label;
use crate::model::SimilarityModel;
use crate::record::PseudoRecord;
use crate::selection::{
    pseudo_plus_real_by_neighborhood, pseudo_plus_real_by_percentage, real_only_by_neighborhood,
    real_only_by_percentage, select_by_neighborhood_in, select_by_percentage, SelectionResult,
};
use bumpalo::Bump;
use rand::Rng;
use std::fmt;

/// Which pixels to train on, and with which labels.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SelectionPolicy {
    /// Every pixel with its spatially corrected pseudo-label.
    AllPseudo,
    /// Most confident pseudo-labels of each class.
    Percentage {
        /// Fraction kept per class, in `(0, 1]`.
        percentage: f64,
    },
    /// Pseudo-labels with a unanimous neighborhood.
    Neighborhood {
        /// Window radius, at least 1.
        radius: usize,
    },
    /// Confident pseudo-labels plus ground truth elsewhere.
    PseudoPlusRealByPercentage {
        /// Fraction of pseudo-labels kept per class.
        percentage: f64,
    },
    /// Ground truth for the pixels confidence filtering discards.
    RealOnlyByPercentage {
        /// Fraction of pseudo-labels kept per class.
        percentage: f64,
    },
    /// Unanimous-neighborhood pseudo-labels plus ground truth elsewhere.
    PseudoPlusRealByNeighborhood {
        /// Window radius, at least 1.
        radius: usize,
    },
    /// Ground truth for the pixels neighborhood filtering discards.
    RealOnlyByNeighborhood {
        /// Window radius, at least 1.
        radius: usize,
    },
    /// Ground truth nearest the model's decision boundary.
    Uncertainty {
        /// Fraction of the image selected.
        percentage: f64,
    },
    /// Ground truth sampled at random inside every cluster.
    ClusterRandom {
        /// Fraction of each cluster selected.
        percentage: f64,
    },
    /// Ground truth nearest the decision boundary inside every cluster.
    ClusterUncertainty {
        /// Fraction of each cluster selected.
        percentage: f64,
    },
}

/// Inputs of one selection over a single image.
#[derive(Clone, Copy, Debug)]
pub struct SelectionContext<'a, P> {
    /// Distances and threshold of the image pair.
    pub record: &'a PseudoRecord,
    /// Spatially corrected pseudo-labels, flat.
    pub pseudo_truth: &'a [Label],
    /// Reference labels, flat.
    pub ground_truth: &'a [Label],
    /// Pixel pairs in model input form, flat.
    pub pairs: &'a [P],
    /// Precomputed clusters, required by the cluster policies.
    pub clusters: Option<&'a ClusterAssignments>,
}

/// Percentage rendered for run tags, at most one decimal.
fn percent(fraction: f64) -> f64 {
    (fraction * 1000.0).round() / 10.0
}

impl SelectionPolicy {
    /// Map a legacy integer fine-tuning code.
    ///
    /// Codes 0 to 9 select a policy using `percentage` or `radius` as their
    /// parameter; negative codes disable fine-tuning.
    pub fn from_code(code: i64, percentage: f64, radius: usize) -> Result<Option<Self>> {
        let policy = match code {
            c if c < 0 => return Ok(None),
            0 => Self::AllPseudo,
            1 => Self::Percentage { percentage },
            2 => Self::Neighborhood { radius },
            3 => Self::PseudoPlusRealByPercentage { percentage },
            4 => Self::RealOnlyByPercentage { percentage },
            5 => Self::PseudoPlusRealByNeighborhood { radius },
            6 => Self::RealOnlyByNeighborhood { radius },
            7 => Self::Uncertainty { percentage },
            8 => Self::ClusterRandom { percentage },
            9 => Self::ClusterUncertainty { percentage },
            other => return Err(RefineError::UnimplementedPolicy(other.to_string())),
        };
        policy.validate()?;
        Ok(Some(policy))
    }

    /// Legacy integer code of the policy.
    #[must_use]
    pub const fn code(&self) -> i64 {
        match self {
            Self::AllPseudo => 0,
            Self::Percentage { .. } => 1,
            Self::Neighborhood { .. } => 2,
            Self::PseudoPlusRealByPercentage { .. } => 3,
            Self::RealOnlyByPercentage { .. } => 4,
            Self::PseudoPlusRealByNeighborhood { .. } => 5,
            Self::RealOnlyByNeighborhood { .. } => 6,
            Self::Uncertainty { .. } => 7,
            Self::ClusterRandom { .. } => 8,
            Self::ClusterUncertainty { .. } => 9,
        }
    }

    /// Check the variant's parameters.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::AllPseudo => Ok(()),
            Self::Neighborhood { radius }
            | Self::PseudoPlusRealByNeighborhood { radius }
            | Self::RealOnlyByNeighborhood { radius } => check_radius(radius),
            Self::Percentage { percentage }
            | Self::PseudoPlusRealByPercentage { percentage }
            | Self::RealOnlyByPercentage { percentage }
            | Self::Uncertainty { percentage }
            | Self::ClusterRandom { percentage }
            | Self::ClusterUncertainty { percentage } => check_percentage(percentage),
        }
    }

    /// Whether the policy reads precomputed cluster assignments.
    #[must_use]
    pub const fn needs_clusters(&self) -> bool {
        matches!(self, Self::ClusterRandom { .. } | Self::ClusterUncertainty { .. })
    }

    /// Short run tag such as `50%_pseudo` or `r=3_pseudo_real`.
    #[must_use]
    pub fn tag(&self) -> String {
        match *self {
            Self::AllPseudo => "all_pseudo".to_owned(),
            Self::Percentage { percentage } => format!("{}%_pseudo", percent(percentage)),
            Self::Neighborhood { radius } => format!("r={radius}_pseudo"),
            Self::PseudoPlusRealByPercentage { percentage } => format!(
                "{}%_pseudo_{}%_real",
                percent(percentage),
                percent(1.0 - percentage)
            ),
            Self::RealOnlyByPercentage { percentage } => {
                format!("{}%_real", percent(1.0 - percentage))
            }
            Self::PseudoPlusRealByNeighborhood { radius } => format!("r={radius}_pseudo_real"),
            Self::RealOnlyByNeighborhood { radius } => format!("r={radius}_real"),
            Self::Uncertainty { percentage } => format!("{}%_uncertainty", percent(percentage)),
            Self::ClusterRandom { percentage } => {
                format!("{}%_kmeans_random", percent(percentage))
            }
            Self::ClusterUncertainty { percentage } => {
                format!("{}%_kmeans_uncertainty", percent(percentage))
            }
        }
    }

    /// Run the policy on one image.
    pub fn select<M, R>(
        &self,
        ctx: &SelectionContext<'_, M::Pair>,
        model: &M,
        rng: &mut R,
    ) -> Result<SelectionResult>
    where
        M: SimilarityModel + ?Sized,
        R: Rng + ?Sized,
    {
        let arena = Bump::new();
        self.select_in(&arena, ctx, model, rng)
    }

    /// [`SelectionPolicy::select`] with scratch tables allocated from `arena`.
    pub fn select_in<M, R>(
        &self,
        arena: &Bump,
        ctx: &SelectionContext<'_, M::Pair>,
        model: &M,
        rng: &mut R,
    ) -> Result<SelectionResult>
    where
        M: SimilarityModel + ?Sized,
        R: Rng + ?Sized,
    {
        self.validate()?;
        let n = ctx.record.len();
        check_len("ground truth", n, ctx.ground_truth.len())?;
        check_len("pseudo truth", n, ctx.pseudo_truth.len())?;

        match *self {
            Self::AllPseudo => {
                let mut result = SelectionResult::with_capacity(n);
                for (i, &label) in ctx.pseudo_truth.iter().enumerate() {
                    result.push(i, label);
                }
                Ok(result)
            }
            Self::Percentage { percentage } => select_by_percentage(ctx.record, percentage),
            Self::Neighborhood { radius } => select_by_neighborhood_in(arena, ctx.record, radius),
            Self::PseudoPlusRealByPercentage { percentage } => {
                pseudo_plus_real_by_percentage(ctx.record, percentage, ctx.ground_truth)
            }
            Self::RealOnlyByPercentage { percentage } => {
                real_only_by_percentage(ctx.record, percentage, ctx.ground_truth)
            }
            Self::PseudoPlusRealByNeighborhood { radius } => {
                pseudo_plus_real_by_neighborhood(ctx.record, radius, ctx.ground_truth)
            }
            Self::RealOnlyByNeighborhood { radius } => {
                real_only_by_neighborhood(ctx.record, radius, ctx.ground_truth)
            }
            Self::Uncertainty { percentage } => {
                select_by_uncertainty(model, ctx.pairs, ctx.ground_truth, percentage)
            }
            Self::ClusterRandom { percentage } => {
                let clusters = ctx.clusters.ok_or(RefineError::MissingClusters(self.code()))?;
                select_by_cluster_random(ctx.ground_truth, percentage, clusters, rng)
            }
            Self::ClusterUncertainty { percentage } => {
                let clusters = ctx.clusters.ok_or(RefineError::MissingClusters(self.code()))?;
                select_by_cluster_uncertainty(
                    ctx.ground_truth,
                    percentage,
                    clusters,
                    model,
                    ctx.pairs,
                )
            }
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const U: Label = Label::Unchanged;
    const C: Label = Label::Changed;

    struct Identity;

    impl SimilarityModel for Identity {
        type Pair = f64;

        fn predict(&self, pairs: &[f64]) -> Vec<f64> {
            pairs.to_vec()
        }
    }

    #[test]
    fn test_from_code_covers_all_policies() {
        for code in 0..10 {
            let policy = SelectionPolicy::from_code(code, 0.5, 3).unwrap().unwrap();
            assert_eq!(policy.code(), code);
        }
        assert_eq!(SelectionPolicy::from_code(-1, 0.5, 3).unwrap(), None);
    }

    #[test]
    fn test_from_code_rejects_unknown() {
        let err = SelectionPolicy::from_code(12, 0.5, 3).unwrap_err();
        assert!(matches!(err, RefineError::UnimplementedPolicy(ref c) if c == "12"));
        assert!(SelectionPolicy::from_code(1, 0.0, 3).is_err());
        assert!(SelectionPolicy::from_code(2, 0.5, 0).is_err());
    }

    #[test]
    fn test_tags() {
        assert_eq!(SelectionPolicy::Percentage { percentage: 0.5 }.tag(), "50%_pseudo");
        assert_eq!(
            SelectionPolicy::PseudoPlusRealByNeighborhood { radius: 3 }.tag(),
            "r=3_pseudo_real"
        );
        assert_eq!(
            SelectionPolicy::PseudoPlusRealByPercentage { percentage: 0.7 }.tag(),
            "70%_pseudo_30%_real"
        );
        assert_eq!(
            SelectionPolicy::ClusterUncertainty { percentage: 0.1 }.to_string(),
            "10%_kmeans_uncertainty"
        );
        assert_eq!(SelectionPolicy::Uncertainty { percentage: 0.125 }.tag(), "12.5%_uncertainty");
    }

    #[test]
    fn test_dispatch() {
        let record = PseudoRecord::new(vec![0.1, 0.2, 0.8, 0.9], 0.5, (2, 2)).unwrap();
        let pseudo = record.labels();
        let truth = [U, C, C, C];
        let pairs = [0.1, 0.2, 0.8, 0.9];
        let ctx = SelectionContext {
            record: &record,
            pseudo_truth: &pseudo,
            ground_truth: &truth,
            pairs: &pairs,
            clusters: None,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(43);

        let all = SelectionPolicy::AllPseudo.select(&ctx, &Identity, &mut rng).unwrap();
        assert_eq!(all.indices, vec![0, 1, 2, 3]);
        assert_eq!(all.labels, pseudo);

        let pct = SelectionPolicy::Percentage { percentage: 0.5 }
            .select(&ctx, &Identity, &mut rng)
            .unwrap();
        assert_eq!(pct.indices, vec![0, 3]);

        let only = SelectionPolicy::RealOnlyByPercentage { percentage: 0.5 }
            .select(&ctx, &Identity, &mut rng)
            .unwrap();
        assert_eq!(only.labels, vec![C, C]);
    }

    #[test]
    fn test_cluster_policy_requires_clusters() {
        let record = PseudoRecord::new(vec![0.1, 0.9], 0.5, (1, 2)).unwrap();
        let labels = record.labels();
        let ctx = SelectionContext {
            record: &record,
            pseudo_truth: &labels,
            ground_truth: &labels,
            pairs: &[0.1, 0.9],
            clusters: None,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(43);
        assert!(matches!(
            SelectionPolicy::ClusterRandom { percentage: 0.5 }.select(&ctx, &Identity, &mut rng),
            Err(RefineError::MissingClusters(8))
        ));
    }
}
