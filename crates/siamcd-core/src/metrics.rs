//! Binary change-detection metrics with `Changed` as the positive class.

use crate::error::{check_len, Result};
use crate::label::Label;

/// Two-class confusion counts.
///
/// Positions where either label is `Unknown` are not counted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConfusionMatrix {
    /// Changed pixels predicted changed.
    pub true_positives: u64,
    /// Changed pixels predicted unchanged.
    pub false_negatives: u64,
    /// Unchanged pixels predicted changed.
    pub false_positives: u64,
    /// Unchanged pixels predicted unchanged.
    pub true_negatives: u64,
}

impl ConfusionMatrix {
    /// Count agreements between index-aligned `truth` and `predicted`.
    pub fn from_labels(truth: &[Label], predicted: &[Label]) -> Result<Self> {
        check_len("predicted labels", truth.len(), predicted.len())?;
        let mut cm = Self::default();
        for (&t, &p) in truth.iter().zip(predicted) {
            match (t, p) {
                (Label::Changed, Label::Changed) => cm.true_positives += 1,
                (Label::Changed, Label::Unchanged) => cm.false_negatives += 1,
                (Label::Unchanged, Label::Changed) => cm.false_positives += 1,
                (Label::Unchanged, Label::Unchanged) => cm.true_negatives += 1,
                _ => {}
            }
        }
        Ok(cm)
    }

    /// Number of counted positions.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.true_positives + self.false_negatives + self.false_positives + self.true_negatives
    }

    /// Derived summary metrics.
    #[must_use]
    pub fn metrics(&self) -> Metrics {
        Metrics::from(*self)
    }
}

#[inline]
fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Summary metrics of one prediction; ratios with an empty denominator are 0.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Metrics {
    /// Fraction of counted pixels classified correctly.
    pub overall_accuracy: f64,
    /// TP / (TP + FP).
    pub precision: f64,
    /// TP / (TP + FN).
    pub recall: f64,
    /// Harmonic mean of precision and recall.
    pub f1_score: f64,
    /// FP / (FP + TN).
    pub false_alarm_rate: f64,
    /// FN / (TP + FN).
    pub missed_alarm_rate: f64,
    /// Cohen's kappa.
    pub kappa: f64,
}

impl From<ConfusionMatrix> for Metrics {
    fn from(cm: ConfusionMatrix) -> Self {
        let tp = cm.true_positives as f64;
        let fn_ = cm.false_negatives as f64;
        let fp = cm.false_positives as f64;
        let tn = cm.true_negatives as f64;
        let n = tp + fn_ + fp + tn;

        let overall_accuracy = ratio(tp + tn, n);
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1_score = ratio(2.0 * precision * recall, precision + recall);

        // chance agreement from the marginals
        let expected = ratio((tp + fp) * (tp + fn_) + (fn_ + tn) * (fp + tn), n * n);
        let kappa = ratio(overall_accuracy - expected, 1.0 - expected);

        Self {
            overall_accuracy,
            precision,
            recall,
            f1_score,
            false_alarm_rate: ratio(fp, fp + tn),
            missed_alarm_rate: ratio(fn_, tp + fn_),
            kappa,
        }
    }
}
