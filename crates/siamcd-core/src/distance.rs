//! Per-pixel distances between two co-registered multispectral images.
//!
//! Images are flat, band-interleaved buffers of `pixels * bands` values.

use crate::error::{check_len, RefineError, Result};
use multiversion::multiversion;
use rayon::prelude::*;
use std::str::FromStr;

/// Distance used to compare the two spectra of a pixel pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DistanceFunction {
    /// Euclidean distance between the spectra (`"ED"`).
    Euclidean,
    /// Spectral Angle Mapper, the angle between the spectra in radians (`"SAM"`).
    SpectralAngle,
}

impl DistanceFunction {
    /// Short name used in settings and run tags.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            DistanceFunction::Euclidean => "ED",
            DistanceFunction::SpectralAngle => "SAM",
        }
    }

    /// Distance between two spectra of equal length.
    #[inline]
    #[must_use]
    pub fn between(self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            DistanceFunction::Euclidean => euclidean(a, b),
            DistanceFunction::SpectralAngle => spectral_angle(a, b),
        }
    }
}

impl FromStr for DistanceFunction {
    type Err = RefineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ED" => Ok(DistanceFunction::Euclidean),
            "SAM" => Ok(DistanceFunction::SpectralAngle),
            other => Err(RefineError::UnimplementedDistance(other.to_string())),
        }
    }
}

/// Distance of every pixel pair, in row-major pixel order.
pub fn compute_distances(
    first: &[f32],
    second: &[f32],
    bands: usize,
    function: DistanceFunction,
) -> Result<Vec<f64>> {
    if bands == 0 {
        return Err(RefineError::EmptyInput("bands"));
    }
    check_len("second image", first.len(), second.len())?;
    if first.len() % bands != 0 {
        return Err(RefineError::LengthMismatch {
            what: "image buffer",
            expected: first.len() / bands * bands,
            actual: first.len(),
        });
    }

    Ok(first
        .par_chunks_exact(bands)
        .zip(second.par_chunks_exact(bands))
        .map(|(a, b)| function.between(a, b))
        .collect())
}

#[multiversion(targets = "simd")]
fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    let mut acc = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let d = f64::from(x) - f64::from(y);
        acc += d * d;
    }
    acc.sqrt()
}

#[multiversion(targets = "simd")]
fn spectral_angle(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        // angle is undefined against a null spectrum
        return if na == nb { 0.0 } else { std::f64::consts::FRAC_PI_2 };
    }
    (dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0).acos()
}
