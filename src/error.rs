use crate::constraints::LinkType;
use thiserror::Error;

/// Error types for the constrained k-means library
#[derive(Error, Debug)]
pub enum ClusterError {
    /// The number of clusters k is invalid (must be > 0 and <= number of instances)
    #[error("Invalid k value: {0}")]
    InvalidK(String),

    /// Not enough data to run the algorithm
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// A vector, weight vector or matrix does not match the metric's feature space
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// A constraint refers to the same instance twice or to an unknown instance
    #[error("Invalid constraint: {0}")]
    InvalidConstraint(String),

    /// A pair already carries the other link type
    #[error("Conflicting constraint on ({first}, {second}): already {existing:?}, got {requested:?}")]
    ConflictingConstraint {
        first: usize,
        second: usize,
        existing: LinkType,
        requested: LinkType,
    },

    /// A configuration value is out of range
    #[error("Invalid parameter '{name}': {message}")]
    InvalidParameter { name: String, message: String },

    /// Model has not been fitted yet
    #[error("Model has not been fitted. Call fit() first.")]
    NotFitted,

    /// A metric was used before being built against a dataset
    #[error("Metric has not been built. Call build() with the training data first.")]
    MetricNotBuilt,
}

impl ClusterError {
    pub(crate) fn invalid_parameter(name: &str, message: impl Into<String>) -> Self {
        ClusterError::InvalidParameter {
            name: name.to_string(),
            message: message.into(),
        }
    }
}
