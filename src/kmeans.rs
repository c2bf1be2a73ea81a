use crate::algorithm::{run_mpckmeans, ClusteringResult, Termination};
use crate::assign::{nearest_centroid, AssignmentDiagnostics};
use crate::config::MpcKMeansConfig;
use crate::constraints::ConstraintStore;
use crate::dataset::{Dataset, FeatureVector};
use crate::error::ClusterError;
use crate::metric::Metric;
use rayon::prelude::*;

/// Constrained k-means with pluggable metrics and assignment strategies.
///
/// Must-link and cannot-link constraints are registered before fitting. The
/// API mirrors scikit-learn: `fit()`, `predict()`, `fit_predict()`.
///
/// # Example
///
/// ```
/// use mpckmeans_rs::{AssignerKind, Instances, LinkType, MpcKMeans, MpcKMeansConfig};
/// use ndarray::array;
///
/// let data = Instances::from_array(
///     &array![[0.0, 0.0], [0.1, 0.2], [5.0, 5.0], [5.1, 4.9]].view(),
/// );
///
/// let config = MpcKMeansConfig::new(2).with_assigner(AssignerKind::Probabilistic);
/// let mut model = MpcKMeans::with_config(config);
/// model.constraints_mut().add(0, 1, LinkType::MustLink).unwrap();
///
/// let labels = model.fit_predict(&data).unwrap();
/// assert_eq!(labels[0], labels[1]);
/// ```
pub struct MpcKMeans {
    /// Model configuration
    config: MpcKMeansConfig,

    /// Pairwise supervision used by every fit
    constraints: ConstraintStore,

    /// Number of features seen at fit time
    d: usize,

    /// Fitted state (None if not yet fitted)
    result: Option<ClusteringResult>,
}

impl MpcKMeans {
    /// Create a model with `k` clusters and default configuration
    pub fn new(k: usize) -> Self {
        Self::with_config(MpcKMeansConfig::new(k))
    }

    /// Create a model with a custom configuration.
    ///
    /// The configuration is validated when fitting.
    pub fn with_config(config: MpcKMeansConfig) -> Self {
        Self {
            config,
            constraints: ConstraintStore::new(),
            d: 0,
            result: None,
        }
    }

    /// Replace the constraint set
    pub fn with_constraints(mut self, constraints: ConstraintStore) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn constraints(&self) -> &ConstraintStore {
        &self.constraints
    }

    pub fn constraints_mut(&mut self) -> &mut ConstraintStore {
        &mut self.constraints
    }

    /// Cluster `data` under the registered constraints.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid or k exceeds the number of instances
    /// - A constraint refers to an instance outside the dataset
    /// - Feature vectors disagree on their dimension
    pub fn fit(&mut self, data: &dyn Dataset) -> Result<&mut Self, ClusterError> {
        let result = run_mpckmeans(data, &self.constraints, &self.config)?;
        self.d = data.dimension();
        self.result = Some(result);
        Ok(self)
    }

    /// Nearest centroid of each instance under the learned metrics.
    ///
    /// Constraints play no part: the instances may be unseen.
    pub fn predict(&self, data: &dyn Dataset) -> Result<Vec<usize>, ClusterError> {
        let result = self.result.as_ref().ok_or(ClusterError::NotFitted)?;
        if data.dimension() != self.d {
            return Err(ClusterError::DimensionMismatch {
                expected: self.d,
                found: data.dimension(),
            });
        }

        (0..data.num_instances())
            .into_par_iter()
            .map(|i| nearest_centroid(data.features(i), &result.centroids, &result.metrics))
            .collect()
    }

    /// Fit and return the constrained assignment of the training instances
    pub fn fit_predict(&mut self, data: &dyn Dataset) -> Result<Vec<usize>, ClusterError> {
        self.fit(data)?;
        self.assignments()
            .map(<[usize]>::to_vec)
            .ok_or(ClusterError::NotFitted)
    }

    /// Centroids of the fitted model
    pub fn centroids(&self) -> Option<&[FeatureVector]> {
        self.result.as_ref().map(|r| r.centroids.as_slice())
    }

    /// Cluster of every training instance
    pub fn assignments(&self) -> Option<&[usize]> {
        self.result.as_ref().map(|r| r.assignments.as_slice())
    }

    /// Learned metrics: one shared, or one per cluster
    pub fn metrics(&self) -> Option<&[Metric]> {
        self.result.as_ref().map(|r| r.metrics.as_slice())
    }

    /// Objective after every iteration of the last fit
    pub fn objective_history(&self) -> Option<&[f64]> {
        self.result.as_ref().map(|r| r.objective_history.as_slice())
    }

    pub fn n_iterations(&self) -> Option<usize> {
        self.result.as_ref().map(|r| r.n_iterations)
    }

    pub fn termination(&self) -> Option<Termination> {
        self.result.as_ref().map(|r| r.termination)
    }

    /// Greedy-agreement statistics, when collected
    pub fn last_diagnostics(&self) -> Option<&AssignmentDiagnostics> {
        self.result.as_ref().and_then(|r| r.last_diagnostics.as_ref())
    }

    /// Iterations whose probabilistic result was replaced by the greedy one
    pub fn fallbacks(&self) -> Option<usize> {
        self.result.as_ref().map(|r| r.fallbacks)
    }

    /// Get the number of clusters.
    pub fn k(&self) -> usize {
        self.config.k
    }

    /// Get the number of features (dimensions).
    pub fn d(&self) -> usize {
        self.d
    }

    /// Get the configuration.
    pub fn config(&self) -> &MpcKMeansConfig {
        &self.config
    }
}
