//! Synthetic scenes and a toy model for tests and benchmarks.

mod scene;

pub use scene::{ChangeSceneBuilder, Region};

use crate::error::{check_len, Result};
use crate::label::Label;
use crate::model::{FineTune, FineTuneReport, SimilarityModel};
use std::time::Instant;

/// Pixel index pairs `0..n`, the input form of [`LearningModel`].
#[must_use]
pub fn index_pairs(n: usize) -> Vec<usize> {
    (0..n).collect()
}

/// A model that predicts a stored score per pixel and memorizes its training labels.
///
/// Pairs are flat pixel indices. Fine-tuning snaps the score of every labelled
/// pixel to the class score, so accuracy on trained pixels becomes perfect.
#[derive(Clone, Debug)]
pub struct LearningModel {
    scores: Vec<f64>,
    unchanged_score: f64,
    changed_score: f64,
    /// Batch sizes of every fine-tuning call so far.
    pub batch_sizes: Vec<usize>,
    /// Number of labelled pairs seen by the last fine-tuning call.
    pub last_trained: usize,
}

impl LearningModel {
    /// Model predicting `scores`, learning towards the given class scores.
    #[must_use]
    pub fn new(scores: Vec<f64>, unchanged_score: f64, changed_score: f64) -> Self {
        Self {
            scores,
            unchanged_score,
            changed_score,
            batch_sizes: Vec::new(),
            last_trained: 0,
        }
    }

    /// Current per-pixel scores.
    #[must_use]
    pub fn scores(&self) -> &[f64] {
        &self.scores
    }
}

impl SimilarityModel for LearningModel {
    type Pair = usize;

    fn predict(&self, pairs: &[usize]) -> Vec<f64> {
        pairs
            .iter()
            .map(|&i| self.scores.get(i).copied().unwrap_or(0.0))
            .collect()
    }
}

impl FineTune for LearningModel {
    fn fine_tune(
        &mut self,
        batch_size: usize,
        pairs: &[usize],
        labels: &[Label],
    ) -> Result<FineTuneReport> {
        check_len("training labels", pairs.len(), labels.len())?;
        let start = Instant::now();
        let mut loss = 0.0;
        let mut trained = 0usize;
        for (&i, &label) in pairs.iter().zip(labels) {
            let target = match label {
                Label::Changed => self.changed_score,
                Label::Unchanged => self.unchanged_score,
                Label::Unknown => continue,
            };
            if let Some(score) = self.scores.get_mut(i) {
                loss += (*score - target).powi(2);
                *score = target;
                trained += 1;
            }
        }
        self.batch_sizes.push(batch_size);
        self.last_trained = trained;
        Ok(FineTuneReport {
            train_loss: if trained == 0 { 0.0 } else { loss / trained as f64 },
            val_loss: 0.0,
            val_accuracy: 1.0,
            epochs: 1,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }
}
