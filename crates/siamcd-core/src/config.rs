//! Configuration types for the refinement pipeline.
//!
//! This module provides two configuration types:
//! - [`RefinerConfig`]: per-run settings of the [`crate::Refiner`] (policy, radius, seeds)
//! - [`ClusteringConfig`]: settings of the offline k-means step

use crate::correction::DEFAULT_RADIUS;
use crate::error::{check_radius, Result};
use crate::strategy::SelectionPolicy;

// ============================================================================
// RefinerConfig: Pipeline-level configuration
// ============================================================================

/// Pipeline-level configuration for the refiner.
///
/// # Example
/// ```
/// use siamcd_core::config::RefinerConfig;
/// use siamcd_core::strategy::SelectionPolicy;
///
/// let config = RefinerConfig::builder()
///     .policy(SelectionPolicy::Percentage { percentage: 0.5 })
///     .batch_size(64)
///     .build();
/// assert_eq!(config.correction_radius, 3);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RefinerConfig {
    /// Selection policy used for fine-tuning. `None` evaluates the model as is.
    pub policy: Option<SelectionPolicy>,
    /// Radius of the majority filter applied to pseudo-truth and predictions (default: 3).
    pub correction_radius: usize,
    /// Batch size handed to the fine-tuning routine (default: 32).
    pub batch_size: usize,
    /// Seed of the shuffle applied to every selection before training (default: 43).
    pub shuffle_seed: u64,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            policy: None,
            correction_radius: DEFAULT_RADIUS,
            batch_size: 32,
            shuffle_seed: 43,
        }
    }
}

impl RefinerConfig {
    /// Create a new builder for `RefinerConfig`.
    #[must_use]
    pub fn builder() -> RefinerConfigBuilder {
        RefinerConfigBuilder::default()
    }

    /// Check radius and policy parameters.
    pub fn validate(&self) -> Result<()> {
        check_radius(self.correction_radius)?;
        if let Some(policy) = &self.policy {
            policy.validate()?;
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
impl RefinerConfig {
    /// Parse and validate a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Builder for [`RefinerConfig`].
#[derive(Default)]
pub struct RefinerConfigBuilder {
    policy: Option<SelectionPolicy>,
    correction_radius: Option<usize>,
    batch_size: Option<usize>,
    shuffle_seed: Option<u64>,
}

impl RefinerConfigBuilder {
    /// Set the fine-tuning selection policy.
    #[must_use]
    pub fn policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Set the spatial correction radius.
    #[must_use]
    pub fn correction_radius(mut self, radius: usize) -> Self {
        self.correction_radius = Some(radius);
        self
    }

    /// Set the fine-tuning batch size.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Set the selection shuffle seed.
    #[must_use]
    pub fn shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> RefinerConfig {
        let d = RefinerConfig::default();
        RefinerConfig {
            policy: self.policy.or(d.policy),
            correction_radius: self.correction_radius.unwrap_or(d.correction_radius),
            batch_size: self.batch_size.unwrap_or(d.batch_size),
            shuffle_seed: self.shuffle_seed.unwrap_or(d.shuffle_seed),
        }
    }
}

// ============================================================================
// ClusteringConfig: Offline k-means configuration
// ============================================================================

/// Settings of the k-means sweep used to build cluster assignments.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClusteringConfig {
    /// Smallest candidate cluster count (default: 50).
    pub k_min: usize,
    /// Largest candidate cluster count, inclusive (default: 75).
    pub k_max: usize,
    /// Lloyd iteration cap per fit (default: 300).
    pub max_iter: usize,
    /// Seed of the k-means++ initialisation (default: 43).
    pub seed: u64,
    /// Stop once no centroid moves farther than this (default: 1e-4).
    pub tolerance: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            k_min: 50,
            k_max: 75,
            max_iter: 300,
            seed: 43,
            tolerance: 1e-4,
        }
    }
}

impl ClusteringConfig {
    /// Create a new builder for `ClusteringConfig`.
    #[must_use]
    pub fn builder() -> ClusteringConfigBuilder {
        ClusteringConfigBuilder::default()
    }
}

/// Builder for [`ClusteringConfig`].
#[derive(Default)]
pub struct ClusteringConfigBuilder {
    k_range: Option<(usize, usize)>,
    max_iter: Option<usize>,
    seed: Option<u64>,
    tolerance: Option<f64>,
}

impl ClusteringConfigBuilder {
    /// Set the inclusive range of candidate cluster counts.
    #[must_use]
    pub fn k_range(mut self, k_min: usize, k_max: usize) -> Self {
        self.k_range = Some((k_min, k_max));
        self
    }

    /// Set the iteration cap.
    #[must_use]
    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = Some(max_iter);
        self
    }

    /// Set the initialisation seed.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the convergence tolerance.
    #[must_use]
    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> ClusteringConfig {
        let d = ClusteringConfig::default();
        let (k_min, k_max) = self.k_range.unwrap_or((d.k_min, d.k_max));
        ClusteringConfig {
            k_min,
            k_max,
            max_iter: self.max_iter.unwrap_or(d.max_iter),
            seed: self.seed.unwrap_or(d.seed),
            tolerance: self.tolerance.unwrap_or(d.tolerance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RefineError;

    #[test]
    fn test_refiner_config_defaults() {
        let config = RefinerConfig::default();
        assert_eq!(config.policy, None);
        assert_eq!(config.correction_radius, 3);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.shuffle_seed, 43);
    }

    #[test]
    fn test_refiner_config_builder() {
        let config = RefinerConfig::builder()
            .policy(SelectionPolicy::Neighborhood { radius: 2 })
            .correction_radius(4)
            .build();
        assert_eq!(config.policy, Some(SelectionPolicy::Neighborhood { radius: 2 }));
        assert_eq!(config.correction_radius, 4);
        // untouched fields keep defaults
        assert_eq!(config.batch_size, 32);
    }

    #[test]
    fn test_refiner_config_validation() {
        let config = RefinerConfig::builder().correction_radius(0).build();
        assert!(matches!(config.validate(), Err(RefineError::InvalidRadius(0))));
        let config = RefinerConfig::builder()
            .policy(SelectionPolicy::Uncertainty { percentage: 1.5 })
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_clustering_config_builder() {
        let config = ClusteringConfig::builder().k_range(2, 10).seed(7).build();
        assert_eq!((config.k_min, config.k_max), (2, 10));
        assert_eq!(config.seed, 7);
        assert_eq!(config.max_iter, 300);
        assert_eq!(ClusteringConfig::default().k_min, 50);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_json_round_trip() {
        let config = RefinerConfig::builder()
            .policy(SelectionPolicy::ClusterUncertainty { percentage: 0.1 })
            .shuffle_seed(7)
            .build();
        let json = config.to_json_string().unwrap();
        assert_eq!(RefinerConfig::from_json_str(&json).unwrap(), config);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_json_partial_and_invalid() {
        let config = RefinerConfig::from_json_str(r#"{ "batch_size": 8 }"#).unwrap();
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.correction_radius, 3);

        assert!(matches!(
            RefinerConfig::from_json_str(r#"{ "correction_radius": 0 }"#),
            Err(RefineError::InvalidRadius(0))
        ));
        assert!(matches!(
            RefinerConfig::from_json_str("not json"),
            Err(RefineError::Config(_))
        ));
    }
}
