//! # mpckmeans-rs
//!
//! Semi-supervised k-means clustering under pairwise constraints, with
//! metrics that adapt to the supervision.
//!
//! ## Features
//!
//! - **Pairwise supervision**: must-link and cannot-link constraints, each
//!   with its own violation cost
//! - **Pluggable metrics**: weighted Euclidean, weighted Mahalanobis,
//!   weighted dot product and KL divergence
//! - **Metric learning**: closed-form or gradient updates, one metric shared
//!   by all clusters or one per cluster
//! - **Assignment strategies**: greedy nearest centroid, iterated
//!   conditional modes in shuffled or sorted order, and joint MPE inference
//!   over a relational Markov network built from the constraints
//! - **Parallel computation**: uses rayon for per-instance work
//!
//! ## Example
//!
//! ```rust
//! use mpckmeans_rs::{Instances, LinkType, MpcKMeans};
//! use ndarray::array;
//!
//! let data = Instances::from_array(
//!     &array![[0.0, 0.0], [0.2, 0.1], [4.0, 4.0], [4.1, 3.9], [8.0, 0.0], [8.2, 0.1]].view(),
//! );
//!
//! let mut model = MpcKMeans::new(3);
//! model.constraints_mut().add(0, 1, LinkType::MustLink).unwrap();
//! model.constraints_mut().add(2, 4, LinkType::CannotLink).unwrap();
//!
//! let labels = model.fit_predict(&data).unwrap();
//! assert_eq!(labels.len(), 6);
//! assert_eq!(labels[0], labels[1]);
//! ```
//!
//! ## Custom Configuration
//!
//! ```rust
//! use mpckmeans_rs::{
//!     AssignerKind, InferenceMode, Instances, LinkType, MetricConfig, MetricLearning, MpcKMeans,
//!     MpcKMeansConfig,
//! };
//! use ndarray::Array2;
//! use ndarray_rand::rand_distr::Uniform;
//! use ndarray_rand::RandomExt;
//!
//! let data = Instances::from_array(&Array2::random((300, 4), Uniform::new(-1.0, 1.0)).view());
//!
//! let config = MpcKMeansConfig::new(5)
//!     .with_metric(MetricConfig::default())
//!     .with_assigner(AssignerKind::Probabilistic)
//!     .with_inference_mode(InferenceMode::Approximate)
//!     .with_metric_learning(MetricLearning::ClosedForm)
//!     .with_multiple_metrics(true)
//!     .with_seed(42);
//!
//! let mut model = MpcKMeans::with_config(config);
//! model.constraints_mut().add(0, 1, LinkType::MustLink).unwrap();
//! model.fit(&data).unwrap();
//! assert_eq!(model.metrics().unwrap().len(), 5);
//! ```
//!
//! ## Logging
//!
//! Progress is reported through `tracing`. Install any subscriber to see it,
//! for example `tracing_subscriber::fmt().with_env_filter("mpckmeans_rs=debug")`.

mod algorithm;
pub mod assign;
mod config;
mod constraints;
mod dataset;
mod error;
pub mod inference;
mod init;
mod kmeans;
mod learner;
pub mod metric;
mod objective;
mod regularizer;

pub use algorithm::{run_mpckmeans, ClusteringResult, ConvergenceReason, Termination};
pub use assign::{AssignContext, AssignOutcome, Assigner, AssignmentDiagnostics};
pub use config::{AssignerKind, InferenceMode, InitKind, MetricLearning, MpcKMeansConfig};
pub use constraints::{Constraint, ConstraintStore, LinkType};
pub use dataset::{Dataset, FeatureVector, Instance, Instances};
pub use error::ClusterError;
pub use init::{initialize, Initialization};
pub use kmeans::MpcKMeans;
pub use learner::{LearningInput, MetricLearner};
pub use metric::{Metric, MetricConfig, MetricKind, ObjectiveDirection, SimilarityConversion};
pub use objective::{max_cl_penalties, objective, penalty_for_instance, ObjectiveTerms};
pub use regularizer::Regularizer;
