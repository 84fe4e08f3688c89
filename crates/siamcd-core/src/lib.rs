//! Pseudo-label refinement for siamese change detection.
//!
//! A siamese network trained on one scene scores every pixel pair of a new
//! scene with a distance. This crate turns those distances into training
//! signal for fine-tuning the network on the new scene, and evaluates the
//! result.
//!
//! # Architecture Overview
//!
//! 1. **Pseudo-labeling**:
//!    - Per-pixel Euclidean or spectral-angle distances between acquisitions.
//!    - Otsu threshold computed once and persisted in a [`PseudoRecord`].
//!
//! 2. **Spatial correction**:
//!    - Majority vote over a clipped square window; ties keep the original label.
//!    - Per-label summed-area tables in a reusable arena for O(1) window counts.
//!
//! 3. **Selection**:
//!    - Confidence and neighborhood filtering of pseudo-labels.
//!    - Hybrid pseudo/ground-truth variants.
//!    - Active learning by model uncertainty and by k-means cluster.
//!
//! 4. **Evaluation**:
//!    - Otsu thresholding of the model's predictions, before and after correction.
//!    - Confusion-matrix metrics against ground truth and pseudo-truth.
//!
//! # Configuration
//!
//! - [`config::RefinerConfig`]: policy, correction radius, batch size, shuffle seed
//! - [`config::ClusteringConfig`]: offline k-means sweep
//!
//! # Example
//!
//! ```
//! use siamcd_core::{PseudoRecord, selection::select_by_percentage};
//!
//! let record = PseudoRecord::new(vec![0.1, 0.2, 0.8, 0.9], 0.5, (2, 2)).unwrap();
//! let selection = select_by_percentage(&record, 0.5).unwrap();
//! assert_eq!(selection.indices, vec![0, 3]);
//! ```

/// Active-learning selectors driven by the model or by clusters.
pub mod active;
/// Offline k-means clustering with elbow selection.
pub mod clustering;
/// Configuration types for the refinement pipeline.
pub mod config;
/// Majority-vote spatial correction.
pub mod correction;
/// Per-pixel spectral distances.
pub mod distance;
/// Crate error type.
pub mod error;
/// Label enum and label grids.
pub mod label;
/// Confusion matrix and summary metrics.
pub mod metrics;
/// External similarity model interfaces.
pub mod model;
#[cfg(feature = "serde")]
mod persist;
/// Pseudo-label records and their persistence.
pub mod record;
/// Confidence, neighborhood and hybrid selectors.
pub mod selection;
/// Selection policies for fine-tuning.
pub mod strategy;
/// Utilities for testing and synthetic data generation.
pub mod test_utils;
/// Otsu thresholding and pseudo-label construction.
pub mod threshold;

pub use crate::clustering::ClusterAssignments;
pub use crate::config::{ClusteringConfig, RefinerConfig};
pub use crate::error::{RefineError, Result};
pub use crate::label::{Label, LabelMap};
pub use crate::metrics::{ConfusionMatrix, Metrics};
pub use crate::model::{FineTune, FineTuneReport, SimilarityModel};
pub use crate::record::PseudoRecord;
pub use crate::selection::SelectionResult;
pub use crate::strategy::{SelectionContext, SelectionPolicy};

use crate::correction::spatial_correction_in;
use crate::error::check_len;
use crate::threshold::{build_label_map, otsu_threshold};
use bumpalo::Bump;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::time::Instant;

/// Everything known about one image of the test scene.
#[derive(Clone, Copy, Debug)]
pub struct ImageInputs<'a, P> {
    /// Pixel pairs in model input form, row-major.
    pub pairs: &'a [P],
    /// Reference labels; `Unknown` marks unlabelled pixels.
    pub ground_truth: &'a LabelMap,
    /// Pseudo-labeling state, required when a policy is configured.
    pub record: Option<&'a PseudoRecord>,
    /// Cluster assignments, required by the cluster policies.
    pub clusters: Option<&'a ClusterAssignments>,
}

/// Timings of the refinement stages.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RefinementStats {
    /// Time spent selecting training pixels in milliseconds.
    pub extraction_ms: f64,
    /// Time spent in the fine-tuning routine in milliseconds.
    pub fine_tune_ms: f64,
    /// Time spent predicting and thresholding in milliseconds.
    pub prediction_ms: f64,
    /// Time spent correcting the prediction map in milliseconds.
    pub correction_ms: f64,
    /// Total time in milliseconds.
    pub total_ms: f64,
    /// Number of pixels in the image.
    pub num_pixels: usize,
    /// Number of pixels handed to fine-tuning.
    pub num_selected: usize,
}

/// Outcome of the fine-tuning stage.
#[derive(Clone, Debug)]
pub struct FineTuneOutcome {
    /// Policy that produced the selection.
    pub policy: SelectionPolicy,
    /// Shuffled training selection, `Unknown` labels removed.
    pub selection: SelectionResult,
    /// Spatially corrected pseudo-labels of the image.
    pub pseudo_truth: LabelMap,
    /// What the fine-tuning routine reported.
    pub report: FineTuneReport,
}

/// Quality of the model's prediction on one image.
#[derive(Clone, Debug)]
pub struct EvaluationReport {
    /// Otsu threshold of the predicted distances.
    pub threshold: f64,
    /// Thresholded prediction.
    pub prediction: LabelMap,
    /// Prediction after spatial correction.
    pub corrected: LabelMap,
    /// Metrics of the raw prediction against ground truth.
    pub metrics: Metrics,
    /// Metrics of the corrected prediction against ground truth.
    pub corrected_metrics: Metrics,
    /// Overall accuracy of the raw prediction against pseudo-truth.
    pub pseudo_accuracy: Option<f64>,
    /// Overall accuracy of the corrected prediction against pseudo-truth.
    pub pseudo_accuracy_corrected: Option<f64>,
}

/// Full result of refining and evaluating one image.
#[derive(Clone, Debug)]
pub struct RefinementResult {
    /// Run tag of the policy, `no_ft` without fine-tuning.
    pub tag: String,
    /// Fine-tuning outcome, if a policy is configured.
    pub fine_tune: Option<FineTuneOutcome>,
    /// Evaluation of the (possibly fine-tuned) model.
    pub evaluation: EvaluationReport,
    /// Stage timings.
    pub stats: RefinementStats,
}

/// The main entry point for refining a model on one image at a time.
///
/// The refiner holds reusable state (arena allocator) and is configured at
/// construction time via [`RefinerConfig`].
pub struct Refiner {
    arena: Bump,
    config: RefinerConfig,
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

impl Refiner {
    /// Create a refiner with default configuration (no fine-tuning).
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RefinerConfig::default())
    }

    /// Create a refiner with custom configuration.
    #[must_use]
    pub fn with_config(config: RefinerConfig) -> Self {
        Self {
            arena: Bump::new(),
            config,
        }
    }

    /// Get the current configuration.
    #[must_use]
    pub fn config(&self) -> RefinerConfig {
        self.config
    }

    /// Spatially corrected pseudo-labels of `record`.
    pub fn pseudo_truth(&mut self, record: &PseudoRecord) -> Result<LabelMap> {
        self.arena.reset();
        let _span = tracing::info_span!("pseudo_truth").entered();
        let pseudo = record.label_map()?;
        spatial_correction_in(&self.arena, &pseudo, self.config.correction_radius)
    }

    /// Select training pixels with the configured policy and fine-tune `model`.
    ///
    /// Returns `None` when no policy is configured.
    pub fn refine<M>(
        &mut self,
        inputs: &ImageInputs<'_, M::Pair>,
        model: &mut M,
        stats: &mut RefinementStats,
    ) -> Result<Option<FineTuneOutcome>>
    where
        M: FineTune + ?Sized,
        M::Pair: Clone,
    {
        self.config.validate()?;
        let Some(policy) = self.config.policy else {
            return Ok(None);
        };
        let record = inputs.record.ok_or(RefineError::EmptyInput("pseudo record"))?;
        check_inputs(inputs)?;
        if record.shape() != inputs.ground_truth.shape() {
            return Err(RefineError::ShapeDisagreement {
                expected: inputs.ground_truth.shape(),
                actual: record.shape(),
            });
        }

        let pseudo_truth = self.pseudo_truth(record)?;

        let start = Instant::now();
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.shuffle_seed);
        let mut selection = {
            let _span = tracing::info_span!("selection", policy = %policy).entered();
            let ctx = SelectionContext {
                record,
                pseudo_truth: pseudo_truth.as_slice(),
                ground_truth: inputs.ground_truth.as_slice(),
                pairs: inputs.pairs,
                clusters: inputs.clusters,
            };
            policy.select_in(&self.arena, &ctx, &*model, &mut rng)?
        };
        selection.shuffle(&mut rng);
        stats.extraction_ms = elapsed_ms(start);

        let before = selection.len();
        let selection = selection.without_unknown();
        if selection.len() < before {
            tracing::debug!(dropped = before - selection.len(), "dropped unlabelled pixels");
        }
        if selection.is_empty() {
            tracing::warn!(policy = %policy, "empty selection handed to fine-tuning");
        }
        stats.num_selected = selection.len();

        let start = Instant::now();
        let report = {
            let _span = tracing::info_span!("fine_tuning", selected = selection.len()).entered();
            let pairs: Vec<M::Pair> = selection
                .indices
                .iter()
                .map(|&i| inputs.pairs[i].clone())
                .collect();
            model.fine_tune(self.config.batch_size, &pairs, &selection.labels)?
        };
        stats.fine_tune_ms = elapsed_ms(start);

        Ok(Some(FineTuneOutcome {
            policy,
            selection,
            pseudo_truth,
            report,
        }))
    }

    /// Predict, threshold and correct one image, and score the result.
    pub fn evaluate<M>(
        &mut self,
        inputs: &ImageInputs<'_, M::Pair>,
        model: &M,
        pseudo_truth: Option<&LabelMap>,
        stats: &mut RefinementStats,
    ) -> Result<EvaluationReport>
    where
        M: SimilarityModel + ?Sized,
    {
        self.config.validate()?;
        let n = check_inputs(inputs)?;
        let (height, width) = inputs.ground_truth.shape();

        let start = Instant::now();
        let (threshold, prediction) = {
            let _span = tracing::info_span!("prediction", pixels = n).entered();
            let distances = model.predict(inputs.pairs);
            check_len("predictions", n, distances.len())?;
            let threshold = otsu_threshold(&distances)?;
            (threshold, build_label_map(&distances, threshold, (height, width))?)
        };
        stats.prediction_ms = elapsed_ms(start);

        self.arena.reset();
        let start = Instant::now();
        let corrected = {
            let _span = tracing::info_span!("spatial_correction").entered();
            spatial_correction_in(&self.arena, &prediction, self.config.correction_radius)?
        };
        stats.correction_ms = elapsed_ms(start);

        let truth = inputs.ground_truth.as_slice();
        let metrics = ConfusionMatrix::from_labels(truth, prediction.as_slice())?.metrics();
        let corrected_metrics =
            ConfusionMatrix::from_labels(truth, corrected.as_slice())?.metrics();

        let (pseudo_accuracy, pseudo_accuracy_corrected) = match pseudo_truth {
            Some(pseudo) => {
                let raw = ConfusionMatrix::from_labels(pseudo.as_slice(), prediction.as_slice())?;
                let cor = ConfusionMatrix::from_labels(pseudo.as_slice(), corrected.as_slice())?;
                (
                    Some(raw.metrics().overall_accuracy),
                    Some(cor.metrics().overall_accuracy),
                )
            }
            None => (None, None),
        };

        tracing::debug!(
            threshold,
            accuracy = metrics.overall_accuracy,
            corrected_accuracy = corrected_metrics.overall_accuracy,
            "evaluated prediction"
        );

        Ok(EvaluationReport {
            threshold,
            prediction,
            corrected,
            metrics,
            corrected_metrics,
            pseudo_accuracy,
            pseudo_accuracy_corrected,
        })
    }

    /// Fine-tune on one image if a policy is configured, then evaluate.
    pub fn run<M>(
        &mut self,
        inputs: &ImageInputs<'_, M::Pair>,
        model: &mut M,
    ) -> Result<RefinementResult>
    where
        M: FineTune + ?Sized,
        M::Pair: Clone,
    {
        let start = Instant::now();
        let mut stats = RefinementStats {
            num_pixels: inputs.pairs.len(),
            ..RefinementStats::default()
        };

        let fine_tune = self.refine(inputs, model, &mut stats)?;
        let pseudo = fine_tune.as_ref().map(|o| &o.pseudo_truth);
        let evaluation = self.evaluate(inputs, &*model, pseudo, &mut stats)?;
        stats.total_ms = elapsed_ms(start);

        let tag = self
            .config
            .policy
            .map_or_else(|| "no_ft".to_owned(), |p| p.tag());
        Ok(RefinementResult {
            tag,
            fine_tune,
            evaluation,
            stats,
        })
    }
}

impl Default for Refiner {
    fn default() -> Self {
        Self::new()
    }
}

/// Check pairs against ground truth; returns the pixel count.
fn check_inputs<P>(inputs: &ImageInputs<'_, P>) -> Result<usize> {
    let n = inputs.ground_truth.len();
    check_len("pairs", n, inputs.pairs.len())?;
    if n == 0 {
        return Err(RefineError::EmptyInput("image"));
    }
    Ok(n)
}
