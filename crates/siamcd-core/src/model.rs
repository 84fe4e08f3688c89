//! Interfaces of the external similarity model.
//!
//! The network itself lives outside this crate. Selectors only need batch
//! distance predictions, and the orchestrator additionally needs a way to
//! fine-tune the model on the selected pixels.

use crate::error::Result;
use crate::label::Label;

/// A trained siamese model scoring pixel pairs.
pub trait SimilarityModel {
    /// One pixel pair as the model consumes it.
    type Pair;

    /// Distance of each pair; larger means more likely changed.
    fn predict(&self, pairs: &[Self::Pair]) -> Vec<f64>;
}

/// Outcome of one fine-tuning run.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FineTuneReport {
    /// Final training loss.
    pub train_loss: f64,
    /// Final validation loss.
    pub val_loss: f64,
    /// Final validation accuracy.
    pub val_accuracy: f64,
    /// Number of epochs actually run.
    pub epochs: usize,
    /// Wall-clock training time in milliseconds.
    pub elapsed_ms: f64,
}

/// A model that can be updated in place on labelled pairs.
pub trait FineTune: SimilarityModel {
    /// Train on `pairs` with the index-aligned `labels`.
    fn fine_tune(
        &mut self,
        batch_size: usize,
        pairs: &[Self::Pair],
        labels: &[Label],
    ) -> Result<FineTuneReport>;
}
