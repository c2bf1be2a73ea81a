//! Pluggable distance / similarity functions.
//!
//! [`Metric`] wraps one of four families and carries the objective direction
//! that every consumer must query instead of assuming. Family-specific
//! formulas elsewhere in the crate dispatch on [`Metric::kind`].

mod dot;
mod euclidean;
mod kl;
mod mahalanobis;

pub use dot::WeightedDotProduct;
pub use euclidean::WeightedEuclidean;
pub use kl::KlDivergence;
pub use mahalanobis::WeightedMahalanobis;

use crate::dataset::{Dataset, FeatureVector};
use crate::error::ClusterError;
use crate::regularizer::Regularizer;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Smallest value a learned diagonal weight may take
pub const MIN_WEIGHT: f64 = 1e-5;

/// Whether the clustering objective maximizes similarity or minimizes distance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    IncreasingSimilarity,
    DecreasingDistance,
}

/// Conversion from a distance to a similarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SimilarityConversion {
    /// `1 / (1 + d)`
    #[default]
    Laplacian,
    /// `2 (1 - d)`
    Unit,
    /// `exp(-d)`
    Exponential,
}

impl SimilarityConversion {
    pub fn convert(&self, distance: f64) -> f64 {
        match self {
            SimilarityConversion::Laplacian => 1.0 / (1.0 + distance),
            SimilarityConversion::Unit => 2.0 * (1.0 - distance),
            SimilarityConversion::Exponential => (-distance).exp(),
        }
    }
}

/// Metric family tag used for formula dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    DotProduct,
    Euclidean,
    Mahalanobis,
    Kl,
}

/// Which metric to build, with its sub-options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricConfig {
    DotProduct { normalize: bool },
    Euclidean { conversion: SimilarityConversion },
    Mahalanobis,
    Kl { smoothing: f64, use_i_divergence: bool },
}

impl Default for MetricConfig {
    fn default() -> Self {
        MetricConfig::Euclidean {
            conversion: SimilarityConversion::Laplacian,
        }
    }
}

impl MetricConfig {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricConfig::DotProduct { .. } => MetricKind::DotProduct,
            MetricConfig::Euclidean { .. } => MetricKind::Euclidean,
            MetricConfig::Mahalanobis => MetricKind::Mahalanobis,
            MetricConfig::Kl { .. } => MetricKind::Kl,
        }
    }

    /// Weighted cosine similarity
    pub fn cosine() -> Self {
        MetricConfig::DotProduct { normalize: true }
    }

    /// I-divergence with light centroid smoothing
    pub fn kl() -> Self {
        MetricConfig::Kl {
            smoothing: 0.001,
            use_i_divergence: true,
        }
    }
}

#[derive(Debug, Clone)]
enum Family {
    DotProduct(WeightedDotProduct),
    Euclidean(WeightedEuclidean),
    Mahalanobis(WeightedMahalanobis),
    Kl(KlDivergence),
}

/// A metric instance with its active objective direction
#[derive(Debug, Clone)]
pub struct Metric {
    config: MetricConfig,
    family: Family,
    direction: ObjectiveDirection,
    built: bool,
}

/// `a - b` as a dense vector of length `dim`
fn dense_difference(
    dim: usize,
    a: &FeatureVector,
    b: &FeatureVector,
) -> Result<Array1<f64>, ClusterError> {
    a.check_dim(dim)?;
    let mut diff = Array1::zeros(dim);
    a.zip_with(b, |i, x, y| diff[i] = x - y)?;
    Ok(diff)
}

impl Metric {
    /// Create a metric over `dim` features, ready to use
    pub fn new(config: &MetricConfig, dim: usize) -> Self {
        let family = match *config {
            MetricConfig::DotProduct { normalize } => {
                Family::DotProduct(WeightedDotProduct::new(dim, normalize))
            }
            MetricConfig::Euclidean { conversion } => {
                Family::Euclidean(WeightedEuclidean::new(dim, conversion))
            }
            MetricConfig::Mahalanobis => Family::Mahalanobis(WeightedMahalanobis::new(dim)),
            MetricConfig::Kl {
                smoothing,
                use_i_divergence,
            } => Family::Kl(KlDivergence::new(dim, smoothing, use_i_divergence)),
        };
        Self {
            config: config.clone(),
            family,
            direction: Self::natural_direction(config.kind()),
            built: true,
        }
    }

    /// Create a metric that must be built against a dataset before use
    pub fn unbuilt(config: &MetricConfig) -> Self {
        let mut metric = Self::new(config, 0);
        metric.built = false;
        metric
    }

    /// The direction a family uses unless overridden
    pub fn natural_direction(kind: MetricKind) -> ObjectiveDirection {
        match kind {
            MetricKind::DotProduct => ObjectiveDirection::IncreasingSimilarity,
            MetricKind::Euclidean | MetricKind::Mahalanobis | MetricKind::Kl => {
                ObjectiveDirection::DecreasingDistance
            }
        }
    }

    /// Fix the feature space to the dataset's and reset all weights
    pub fn build(&mut self, data: &dyn Dataset) -> Result<(), ClusterError> {
        let direction = self.direction;
        *self = Self::new(&self.config, data.dimension());
        self.direction = direction;

        if self.kind() == MetricKind::Kl {
            let has_negative = (0..data.num_instances()).any(|i| {
                let mut negative = false;
                data.features(i).for_each_value(|_, v| negative |= v < 0.0);
                negative
            });
            if has_negative {
                warn!("KL metric built on data with negative features");
            }
        }
        Ok(())
    }

    /// Restore unit weights / identity matrix, keeping the feature space
    pub fn reset(&mut self) {
        let direction = self.direction;
        let built = self.built;
        *self = Self::new(&self.config, self.dimension());
        self.direction = direction;
        self.built = built;
    }

    pub fn kind(&self) -> MetricKind {
        self.config.kind()
    }

    pub fn config(&self) -> &MetricConfig {
        &self.config
    }

    pub fn direction(&self) -> ObjectiveDirection {
        self.direction
    }

    pub fn set_direction(&mut self, direction: ObjectiveDirection) {
        self.direction = direction;
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn dimension(&self) -> usize {
        match &self.family {
            Family::DotProduct(m) => m.weights.len(),
            Family::Euclidean(m) => m.weights.len(),
            Family::Mahalanobis(m) => m.dim(),
            Family::Kl(m) => m.weights.len(),
        }
    }

    fn ensure_built(&self) -> Result<(), ClusterError> {
        if self.built {
            Ok(())
        } else {
            Err(ClusterError::MetricNotBuilt)
        }
    }

    pub fn distance(&self, a: &FeatureVector, b: &FeatureVector) -> Result<f64, ClusterError> {
        self.ensure_built()?;
        match &self.family {
            Family::DotProduct(m) => m.distance(a, b),
            Family::Euclidean(m) => m.distance(a, b),
            Family::Mahalanobis(m) => m.distance(a, b),
            Family::Kl(m) => m.distance(a, b),
        }
    }

    pub fn similarity(&self, a: &FeatureVector, b: &FeatureVector) -> Result<f64, ClusterError> {
        self.ensure_built()?;
        match &self.family {
            Family::DotProduct(m) => m.similarity(a, b),
            Family::Euclidean(m) => m.similarity(a, b),
            Family::Mahalanobis(m) => m.similarity(a, b),
            Family::Kl(m) => m.similarity(a, b),
        }
    }

    /// Similarity or distance, whichever the active direction optimizes
    pub fn score(&self, a: &FeatureVector, b: &FeatureVector) -> Result<f64, ClusterError> {
        match self.direction {
            ObjectiveDirection::IncreasingSimilarity => self.similarity(a, b),
            ObjectiveDirection::DecreasingDistance => self.distance(a, b),
        }
    }

    /// True when `candidate` is strictly better than `best` under the active direction
    pub fn is_better(&self, candidate: f64, best: f64) -> bool {
        match self.direction {
            ObjectiveDirection::IncreasingSimilarity => candidate > best,
            ObjectiveDirection::DecreasingDistance => candidate < best,
        }
    }

    /// Cost of placing `x` in the cluster centered at `centroid`
    pub fn penalty(&self, x: &FeatureVector, centroid: &FeatureVector) -> Result<f64, ClusterError> {
        match self.kind() {
            MetricKind::Euclidean | MetricKind::Mahalanobis => {
                let d = self.distance(x, centroid)?;
                Ok(d * d)
            }
            MetricKind::Kl => self.distance(x, centroid),
            MetricKind::DotProduct => Ok(1.0 - self.similarity(x, centroid)?),
        }
    }

    /// Symmetric cost between two instances, used for constraint violations
    pub fn penalty_symmetric(
        &self,
        a: &FeatureVector,
        b: &FeatureVector,
    ) -> Result<f64, ClusterError> {
        self.ensure_built()?;
        match &self.family {
            Family::Kl(m) => m.jensen_shannon(a, b),
            _ => self.penalty(a, b),
        }
    }

    /// Per-feature terms of [`Metric::penalty`], unweighted
    pub fn diff_components(
        &self,
        a: &FeatureVector,
        b: &FeatureVector,
    ) -> Result<Array1<f64>, ClusterError> {
        self.ensure_built()?;
        match &self.family {
            Family::DotProduct(m) => m.diff_components(a, b),
            Family::Euclidean(m) => m.diff_components(a, b),
            Family::Mahalanobis(m) => m.diff_components(a, b),
            Family::Kl(m) => m.diff_components(a, b),
        }
    }

    /// Per-feature terms of [`Metric::penalty_symmetric`], unweighted
    pub fn symmetric_components(
        &self,
        a: &FeatureVector,
        b: &FeatureVector,
    ) -> Result<Array1<f64>, ClusterError> {
        self.ensure_built()?;
        match &self.family {
            Family::Kl(m) => m.js_components(a, b),
            _ => self.diff_components(a, b),
        }
    }

    /// Dense difference vector, used by full-matrix learning
    pub fn difference(
        &self,
        a: &FeatureVector,
        b: &FeatureVector,
    ) -> Result<Array1<f64>, ClusterError> {
        match &self.family {
            Family::Mahalanobis(m) => m.difference(a, b),
            _ => dense_difference(self.dimension(), a, b),
        }
    }

    /// Diagonal weights, `None` for the full-matrix Mahalanobis metric
    pub fn weights(&self) -> Option<&Array1<f64>> {
        match &self.family {
            Family::DotProduct(m) => Some(&m.weights),
            Family::Euclidean(m) => Some(&m.weights),
            Family::Kl(m) => Some(&m.weights),
            Family::Mahalanobis(_) => None,
        }
    }

    pub fn set_weights(&mut self, weights: Array1<f64>) -> Result<(), ClusterError> {
        if weights.len() != self.dimension() {
            return Err(ClusterError::DimensionMismatch {
                expected: self.dimension(),
                found: weights.len(),
            });
        }
        match &mut self.family {
            Family::DotProduct(m) => m.weights = weights,
            Family::Euclidean(m) => m.weights = weights,
            Family::Kl(m) => m.weights = weights,
            Family::Mahalanobis(_) => {
                return Err(ClusterError::invalid_parameter(
                    "weights",
                    "the Mahalanobis metric is parameterized by a matrix",
                ))
            }
        }
        Ok(())
    }

    /// Move one diagonal weight by `-delta`, clamped at [`MIN_WEIGHT`]
    pub fn step_weight(&mut self, index: usize, delta: f64) -> Result<(), ClusterError> {
        if index >= self.dimension() {
            return Err(ClusterError::DimensionMismatch {
                expected: self.dimension(),
                found: index + 1,
            });
        }
        let kind = self.kind();
        match &mut self.family {
            Family::Euclidean(m) => m.step_weight(index, delta),
            Family::Kl(m) => m.step_weight(index, delta),
            Family::DotProduct(_) | Family::Mahalanobis(_) => {
                return Err(ClusterError::invalid_parameter(
                    "metric",
                    format!("{:?} weights are not trained by gradient steps", kind),
                ))
            }
        }
        Ok(())
    }

    pub fn matrix(&self) -> Option<&Array2<f64>> {
        match &self.family {
            Family::Mahalanobis(m) => Some(&m.matrix),
            _ => None,
        }
    }

    /// Replace the Mahalanobis matrix together with its log-determinant
    pub fn set_matrix(&mut self, matrix: Array2<f64>, log_det: f64) -> Result<(), ClusterError> {
        let kind = self.kind();
        match &mut self.family {
            Family::Mahalanobis(m) => m.set_matrix(matrix, log_det),
            _ => Err(ClusterError::invalid_parameter(
                "matrix",
                format!("{:?} metric has no matrix", kind),
            )),
        }
    }

    /// Whether the engine may train this metric's parameters
    pub fn is_learnable(&self) -> bool {
        self.kind() != MetricKind::DotProduct
    }

    /// Log-normalizer of the metric's density: `Σ ln w` or `ln det A`
    pub fn normalizer(&self) -> f64 {
        match &self.family {
            Family::Mahalanobis(m) => m.log_det,
            _ => self
                .weights()
                .map_or(0.0, |w| w.iter().map(|&v| v.ln()).sum()),
        }
    }

    /// Regularizer value over the diagonal weights, 0 for full matrices
    pub fn regularizer_value(&self, regularizer: &Regularizer) -> f64 {
        self.weights().map_or(0.0, |w| regularizer.compute(w))
    }

    /// Adjust a freshly averaged centroid for this metric family
    pub fn prepare_centroid(&self, centroid: &mut FeatureVector) {
        match &self.family {
            Family::Kl(m) => m.smooth(centroid),
            _ => {
                if self.direction == ObjectiveDirection::IncreasingSimilarity {
                    centroid.normalize();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Instances;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn all_configs() -> Vec<MetricConfig> {
        vec![
            MetricConfig::cosine(),
            MetricConfig::default(),
            MetricConfig::Mahalanobis,
            MetricConfig::kl(),
        ]
    }

    #[test]
    fn test_self_distance_is_zero() {
        let a = FeatureVector::dense(vec![0.2, 0.5, 0.3]);
        for config in all_configs() {
            let metric = Metric::new(&config, 3);
            assert_relative_eq!(metric.distance(&a, &a).unwrap(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_similarity_maximized_at_self() {
        let a = FeatureVector::dense(vec![0.2, 0.5, 0.3]);
        let b = FeatureVector::dense(vec![0.6, 0.1, 0.3]);
        for config in all_configs() {
            let metric = Metric::new(&config, 3);
            let own = metric.similarity(&a, &a).unwrap();
            let other = metric.similarity(&a, &b).unwrap();
            assert!(own > other, "{:?}: {} <= {}", config, own, other);
        }
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let metric = Metric::new(&MetricConfig::default(), 3);
        let a = FeatureVector::dense(vec![1.0, 2.0]);
        let b = FeatureVector::dense(vec![1.0, 2.0]);
        assert!(matches!(
            metric.distance(&a, &b),
            Err(ClusterError::DimensionMismatch {
                expected: 3,
                found: 2
            })
        ));
    }

    #[test]
    fn test_unbuilt_metric_errors() {
        let metric = Metric::unbuilt(&MetricConfig::default());
        let a = FeatureVector::dense(vec![1.0]);
        assert!(matches!(
            metric.distance(&a, &a),
            Err(ClusterError::MetricNotBuilt)
        ));
    }

    #[test]
    fn test_build_fixes_dimension_and_keeps_direction() {
        let mut metric = Metric::unbuilt(&MetricConfig::default());
        metric.set_direction(ObjectiveDirection::IncreasingSimilarity);
        let data = Instances::from_array(&array![[1.0, 2.0], [3.0, 4.0]].view());
        metric.build(&data).unwrap();
        assert!(metric.is_built());
        assert_eq!(metric.dimension(), 2);
        assert_eq!(metric.direction(), ObjectiveDirection::IncreasingSimilarity);
    }

    #[test]
    fn test_penalty_squares_metric_output() {
        let metric = Metric::new(&MetricConfig::default(), 2);
        let a = FeatureVector::dense(vec![0.0, 0.0]);
        let b = FeatureVector::dense(vec![3.0, 4.0]);
        assert_relative_eq!(metric.penalty(&a, &b).unwrap(), 25.0);
        assert_relative_eq!(metric.penalty_symmetric(&a, &b).unwrap(), 25.0);
    }

    #[test]
    fn test_direction_comparison() {
        let mut metric = Metric::new(&MetricConfig::default(), 1);
        assert!(metric.is_better(1.0, 2.0));
        metric.set_direction(ObjectiveDirection::IncreasingSimilarity);
        assert!(metric.is_better(2.0, 1.0));
    }

    #[test]
    fn test_normalizer_and_reset() {
        let mut metric = Metric::new(&MetricConfig::default(), 2);
        metric.set_weights(array![std::f64::consts::E, 1.0]).unwrap();
        assert_relative_eq!(metric.normalizer(), 1.0);
        metric.reset();
        assert_eq!(metric.weights().unwrap(), &array![1.0, 1.0]);
    }

    #[test]
    fn test_step_weight_rejected_for_dot_product() {
        let mut metric = Metric::new(&MetricConfig::cosine(), 2);
        assert!(metric.step_weight(0, 0.1).is_err());
        assert!(!metric.is_learnable());
    }

    #[test]
    fn test_difference_same_for_every_family() {
        let a = FeatureVector::sparse(4, vec![(0, 1.5), (3, -2.0)]).unwrap();
        let b = FeatureVector::dense(vec![0.5, 1.0, 0.0, 1.0]);
        for config in all_configs() {
            let metric = Metric::new(&config, 4);
            let diff = metric.difference(&a, &b).unwrap();
            assert_eq!(diff, array![1.0, -1.0, 0.0, -3.0], "{:?}", config);
        }

        let short = FeatureVector::dense(vec![1.0, 2.0]);
        let metric = Metric::new(&MetricConfig::Mahalanobis, 4);
        assert!(matches!(
            metric.difference(&short, &short),
            Err(ClusterError::DimensionMismatch { .. })
        ));
    }
}
