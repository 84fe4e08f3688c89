//! Error type shared by every fallible operation in the crate.

/// Errors raised while validating inputs or running a refinement stage.
///
/// All of these are data or programming errors: the computations are
/// deterministic, so nothing here is worth retrying.
#[derive(Debug, thiserror::Error)]
pub enum RefineError {
    /// A selection percentage outside `(0, 1]`.
    #[error("percentage must be a float in ]0, 1], got {0}")]
    InvalidPercentage(f64),

    /// A window radius below 1.
    #[error("radius must be an integer >= 1, got {0}")]
    InvalidRadius(usize),

    /// The number of pixels does not match the `(height, width)` shape.
    #[error("shape mismatch: shape {shape:?} expects {expected} pixels, got {actual}")]
    ShapeMismatch {
        /// Declared `(height, width)`.
        shape: (usize, usize),
        /// `height * width`.
        expected: usize,
        /// Length of the provided buffer.
        actual: usize,
    },

    /// `height * width` does not fit in `usize`.
    #[error("shape {0:?} overflows the pixel count")]
    ShapeOverflow((usize, usize)),

    /// Two grids describing the same image have different shapes.
    #[error("shape {actual:?} does not match {expected:?}")]
    ShapeDisagreement {
        /// Shape of the reference grid.
        expected: (usize, usize),
        /// Shape of the offending grid.
        actual: (usize, usize),
    },

    /// Two per-pixel buffers that must be aligned have different lengths.
    #[error("{what} has length {actual}, expected {expected}")]
    LengthMismatch {
        /// Name of the offending buffer.
        what: &'static str,
        /// Required length.
        expected: usize,
        /// Provided length.
        actual: usize,
    },

    /// A flat pixel index points outside the image.
    #[error("pixel index {index} out of bounds for {len} pixels")]
    IndexOutOfBounds {
        /// Offending index.
        index: usize,
        /// Number of pixels in the image.
        len: usize,
    },

    /// A pixel listed more than once across cluster assignments.
    #[error("pixel index {index} belongs to more than one cluster")]
    DuplicateMember {
        /// Offending index.
        index: usize,
    },

    /// An unknown selection policy code or name.
    #[error("fine tuning choice {0} not implemented")]
    UnimplementedPolicy(String),

    /// A cluster policy ran without cluster assignments.
    #[error("fine tuning choice {0} requires cluster assignments")]
    MissingClusters(i64),

    /// An unknown distance function name.
    #[error("distance function {0} not implemented")]
    UnimplementedDistance(String),

    /// The candidate cluster counts do not form a usable range.
    #[error("invalid cluster range [{k_min}, {k_max}] for {samples} samples")]
    InvalidClusterRange {
        /// Smallest candidate k.
        k_min: usize,
        /// Largest candidate k (inclusive).
        k_max: usize,
        /// Number of samples to cluster.
        samples: usize,
    },

    /// An input that must contain at least one element was empty.
    #[error("{0} must not be empty")]
    EmptyInput(&'static str),

    /// Filesystem failure while reading or writing a bundle.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary bundle (de)serialization failure.
    #[cfg(feature = "serde")]
    #[error("failed to (de)serialize bundle: {0}")]
    Codec(#[from] bincode::Error),

    /// Configuration (de)serialization failure.
    #[cfg(feature = "serde")]
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RefineError>;

/// Fail fast on a percentage outside `(0, 1]` (NaN included).
pub(crate) fn check_percentage(percentage: f64) -> Result<()> {
    if percentage > 0.0 && percentage <= 1.0 {
        Ok(())
    } else {
        Err(RefineError::InvalidPercentage(percentage))
    }
}

/// Fail fast on a window radius of zero.
pub(crate) fn check_radius(radius: usize) -> Result<()> {
    if radius >= 1 {
        Ok(())
    } else {
        Err(RefineError::InvalidRadius(radius))
    }
}

/// Fail fast when a flat buffer of `len` pixels does not fill `shape`.
pub(crate) fn check_shape(len: usize, shape: (usize, usize)) -> Result<()> {
    let expected = shape
        .0
        .checked_mul(shape.1)
        .ok_or(RefineError::ShapeOverflow(shape))?;
    if len == expected {
        Ok(())
    } else {
        Err(RefineError::ShapeMismatch {
            shape,
            expected,
            actual: len,
        })
    }
}

/// Fail fast when a per-pixel buffer is not aligned with the image.
pub(crate) fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(RefineError::LengthMismatch {
            what,
            expected,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_bounds() {
        assert!(check_percentage(1.0).is_ok());
        assert!(check_percentage(0.01).is_ok());
        assert!(matches!(
            check_percentage(0.0),
            Err(RefineError::InvalidPercentage(p)) if p == 0.0
        ));
        assert!(check_percentage(1.5).is_err());
        assert!(check_percentage(f64::NAN).is_err());
    }

    #[test]
    fn test_shape_overflow_is_an_error() {
        let shape = (usize::MAX / 2 + 1, 2);
        assert!(matches!(
            check_shape(0, shape),
            Err(RefineError::ShapeOverflow(s)) if s == shape
        ));
        assert!(check_shape(6, (2, 3)).is_ok());
        assert!(matches!(
            check_shape(5, (2, 3)),
            Err(RefineError::ShapeMismatch { expected: 6, actual: 5, .. })
        ));
    }

    #[test]
    fn test_error_messages_name_the_parameter() {
        let msg = RefineError::InvalidRadius(0).to_string();
        assert!(msg.contains("radius"));
        let msg = RefineError::UnimplementedPolicy("12".into()).to_string();
        assert!(msg.contains("12"));
    }
}
