//! Global thresholding of distance maps.
//!
//! - [`OtsuThreshold`] picks the split point of a bimodal distance distribution.
//! - [`build_labels`] turns distances into `Changed`/`Unchanged` pseudo-labels.

use crate::error::{RefineError, Result};
use crate::label::{Label, LabelMap};
use multiversion::multiversion;

/// Histogram-based Otsu thresholding engine.
pub struct OtsuThreshold {
    /// Number of equal-width histogram bins spanning `[min, max]`.
    pub nbins: usize,
}

impl Default for OtsuThreshold {
    fn default() -> Self {
        Self::new()
    }
}

impl OtsuThreshold {
    /// Engine with the standard 256 bins.
    #[must_use]
    pub fn new() -> Self {
        Self { nbins: 256 }
    }

    /// Histogram of `values` over `[min, max]` and the centre of each bin.
    ///
    /// Bin assignment matches the usual half-open convention, with the
    /// maximum value falling into the last bin.
    #[must_use]
    pub fn histogram(&self, values: &[f64], min: f64, max: f64) -> (Vec<u64>, Vec<f64>) {
        let n = self.nbins;
        let step = (max - min) / n as f64;
        let edges: Vec<f64> = (0..=n)
            .map(|i| if i == n { max } else { min + i as f64 * step })
            .collect();
        let centers: Vec<f64> = edges.windows(2).map(|e| (e[0] + e[1]) / 2.0).collect();

        let mut counts = vec![0u64; n];
        let norm = n as f64 / (max - min);
        for &v in values {
            let mut idx = (((v - min) * norm) as usize).min(n - 1);
            // correct for rounding at the edges
            if idx > 0 && v < edges[idx] {
                idx -= 1;
            } else if idx + 1 < n && v >= edges[idx + 1] {
                idx += 1;
            }
            counts[idx] += 1;
        }
        (counts, centers)
    }

    /// Threshold maximizing the between-class variance of `values`.
    ///
    /// A constant input returns that constant.
    pub fn compute(&self, values: &[f64]) -> Result<f64> {
        let (&first, _) = values
            .split_first()
            .ok_or(RefineError::EmptyInput("distances"))?;
        let (min, max) = min_max(values);
        if values.iter().all(|&v| v == first) || min == max {
            tracing::warn!("constant distance map, threshold collapses to {first}");
            return Ok(first);
        }

        let (counts, centers) = self.histogram(values, min, max);
        let n = counts.len();

        // class weights and cumulative moments from the left and from the right
        let mut weight1 = vec![0.0f64; n];
        let mut moment1 = vec![0.0f64; n];
        let mut acc_w = 0.0;
        let mut acc_m = 0.0;
        for i in 0..n {
            acc_w += counts[i] as f64;
            acc_m += counts[i] as f64 * centers[i];
            weight1[i] = acc_w;
            moment1[i] = acc_m;
        }
        let mut weight2 = vec![0.0f64; n];
        let mut moment2 = vec![0.0f64; n];
        acc_w = 0.0;
        acc_m = 0.0;
        for i in (0..n).rev() {
            acc_w += counts[i] as f64;
            acc_m += counts[i] as f64 * centers[i];
            weight2[i] = acc_w;
            moment2[i] = acc_m;
        }

        let mut best_idx = 0;
        let mut best_var = f64::NEG_INFINITY;
        for t in 0..n - 1 {
            let mean1 = moment1[t] / weight1[t];
            let mean2 = moment2[t + 1] / weight2[t + 1];
            let var = weight1[t] * weight2[t + 1] * (mean1 - mean2).powi(2);
            if var > best_var {
                best_var = var;
                best_idx = t;
            }
        }
        Ok(centers[best_idx])
    }
}

/// Otsu threshold with the default engine.
pub fn otsu_threshold(values: &[f64]) -> Result<f64> {
    OtsuThreshold::new().compute(values)
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

/// Elementwise pseudo-labels: `Changed` if `distance > threshold`, else `Unchanged`.
#[must_use]
pub fn build_labels(distances: &[f64], threshold: f64) -> Vec<Label> {
    let mut out = vec![Label::Unchanged; distances.len()];
    threshold_into(distances, threshold, &mut out);
    out
}

/// [`build_labels`] reshaped to a `(height, width)` grid.
pub fn build_label_map(distances: &[f64], threshold: f64, shape: (usize, usize)) -> Result<LabelMap> {
    LabelMap::new(build_labels(distances, threshold), shape.0, shape.1)
}

#[multiversion(targets(
    "x86_64+avx2+bmi1+bmi2+popcnt+lzcnt",
    "x86_64+avx512f+avx512bw+avx512dq+avx512vl",
    "aarch64+neon"
))]
fn threshold_into(distances: &[f64], threshold: f64, out: &mut [Label]) {
    for (dst, &d) in out.iter_mut().zip(distances) {
        *dst = if d > threshold {
            Label::Changed
        } else {
            Label::Unchanged
        };
    }
}
