use crate::error::ClusterError;
use crate::metric::{MetricConfig, ObjectiveDirection};
use crate::regularizer::Regularizer;
use serde::{Deserialize, Serialize};

/// Strategy used to (re)assign instances to clusters each iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignerKind {
    /// Independent nearest-centroid assignment, constraints ignored
    Greedy,
    /// Sequential penalty minimization including constraint violations
    Constrained,
    /// Like `Constrained`, visiting instances by ascending best penalty
    Sorted,
    /// Collective most-probable-explanation over a pairwise Markov network
    Probabilistic,
}

/// Inference used by the probabilistic assigner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InferenceMode {
    /// Max-product message passing for a fixed number of passes
    Approximate,
    /// Max-sum variable elimination
    Exact,
}

/// How initial centroids are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitKind {
    /// Seed from must-link neighborhoods, farthest-first
    NeighborhoodFarthestFirst,
    /// k distinct random instances
    Random,
    /// Random first centroid, then the instance farthest from those chosen
    FarthestFirst,
}

/// Initial gradient-descent step size
pub const DEFAULT_ETA: f64 = 0.001;

/// Per-update decay of the gradient-descent step size
pub const DEFAULT_ETA_DECAY: f64 = 0.9;

/// Metric weight learning between iterations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MetricLearning {
    None,
    ClosedForm,
    GradientDescent { eta: f64, eta_decay: f64 },
}

impl MetricLearning {
    /// Gradient descent with the usual step size and decay
    pub fn gradient_descent() -> Self {
        MetricLearning::GradientDescent {
            eta: DEFAULT_ETA,
            eta_decay: DEFAULT_ETA_DECAY,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, MetricLearning::None)
    }
}

/// Configuration for the constrained k-means engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MpcKMeansConfig {
    /// Number of clusters
    pub k: usize,

    /// Maximum number of iterations
    pub max_iters: usize,

    /// Convergence tolerance on the change of the objective between
    /// iterations. Set to a negative value to disable.
    pub tol: f64,

    /// Random seed for initialization and assignment order
    pub seed: u64,

    /// Metric family and its options
    pub metric: MetricConfig,

    /// Learn one metric per cluster instead of a shared one
    pub use_multiple_metrics: bool,

    /// Override of the metric's natural objective direction
    pub objective_direction: Option<ObjectiveDirection>,

    /// Global cost of violating a must-link
    pub must_link_weight: f64,

    /// Global cost of violating a cannot-link
    pub cannot_link_weight: f64,

    pub assigner: AssignerKind,

    /// Inference for the probabilistic assigner
    pub inference_mode: InferenceMode,

    /// Message-passing rounds for approximate inference (1 = single pass)
    pub inference_passes: usize,

    /// Sharpness of pairwise potentials in the probabilistic assigner
    pub constraint_weight: f64,

    /// Largest factor table exact inference may build for one component
    pub max_exact_table: usize,

    /// Compare probabilistic assignments against the greedy baseline
    pub collect_diagnostics: bool,

    /// Repeat constrained or sorted sweeps until no instance moves
    pub repeat_until_stable: bool,

    pub initializer: InitKind,

    pub metric_learning: MetricLearning,

    pub regularizer: Regularizer,

    /// Include the regularizer in learning and in the objective
    pub regularize: bool,

    /// Weight of the metric log-normalizer in the objective
    pub log_term_weight: f64,

    /// Weight of the regularizer in the objective
    pub regularizer_term_weight: f64,

    /// Add the must-link closure of the constraints before running
    pub transitive_closure: bool,
}

impl Default for MpcKMeansConfig {
    fn default() -> Self {
        Self {
            k: 2,
            max_iters: 100,
            tol: 1e-5,
            seed: 42,
            metric: MetricConfig::default(),
            use_multiple_metrics: false,
            objective_direction: None,
            must_link_weight: 1.0,
            cannot_link_weight: 1.0,
            assigner: AssignerKind::Constrained,
            inference_mode: InferenceMode::Approximate,
            inference_passes: 1,
            constraint_weight: 1000.0,
            max_exact_table: 1 << 20,
            collect_diagnostics: false,
            repeat_until_stable: false,
            initializer: InitKind::NeighborhoodFarthestFirst,
            metric_learning: MetricLearning::None,
            regularizer: Regularizer::default(),
            regularize: false,
            log_term_weight: 0.01,
            regularizer_term_weight: 0.001,
            transitive_closure: false,
        }
    }
}

impl MpcKMeansConfig {
    /// Create a new configuration with the specified number of clusters
    pub fn new(k: usize) -> Self {
        Self {
            k,
            ..Default::default()
        }
    }

    /// Set the maximum number of iterations
    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    /// Set the convergence tolerance
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set the random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_metric(mut self, metric: MetricConfig) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_multiple_metrics(mut self, enabled: bool) -> Self {
        self.use_multiple_metrics = enabled;
        self
    }

    pub fn with_objective_direction(mut self, direction: ObjectiveDirection) -> Self {
        self.objective_direction = Some(direction);
        self
    }

    /// Set the global must-link and cannot-link costs
    pub fn with_link_weights(mut self, must_link: f64, cannot_link: f64) -> Self {
        self.must_link_weight = must_link;
        self.cannot_link_weight = cannot_link;
        self
    }

    pub fn with_assigner(mut self, assigner: AssignerKind) -> Self {
        self.assigner = assigner;
        self
    }

    pub fn with_inference_mode(mut self, mode: InferenceMode) -> Self {
        self.inference_mode = mode;
        self
    }

    pub fn with_inference_passes(mut self, passes: usize) -> Self {
        self.inference_passes = passes;
        self
    }

    pub fn with_constraint_weight(mut self, weight: f64) -> Self {
        self.constraint_weight = weight;
        self
    }

    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.collect_diagnostics = enabled;
        self
    }

    pub fn with_repeat_until_stable(mut self, enabled: bool) -> Self {
        self.repeat_until_stable = enabled;
        self
    }

    pub fn with_initializer(mut self, initializer: InitKind) -> Self {
        self.initializer = initializer;
        self
    }

    pub fn with_metric_learning(mut self, learning: MetricLearning) -> Self {
        self.metric_learning = learning;
        self
    }

    /// Set the regularizer and turn regularization on
    pub fn with_regularizer(mut self, regularizer: Regularizer) -> Self {
        self.regularizer = regularizer;
        self.regularize = true;
        self
    }

    pub fn with_transitive_closure(mut self, enabled: bool) -> Self {
        self.transitive_closure = enabled;
        self
    }

    /// Check every numeric option
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.k == 0 {
            return Err(ClusterError::InvalidK(
                "k must be greater than 0".to_string(),
            ));
        }
        if self.max_iters == 0 {
            return Err(ClusterError::invalid_parameter(
                "max_iters",
                "at least one iteration is required",
            ));
        }
        if self.inference_passes == 0 {
            return Err(ClusterError::invalid_parameter(
                "inference_passes",
                "at least one pass is required",
            ));
        }
        if self.max_exact_table == 0 {
            return Err(ClusterError::invalid_parameter(
                "max_exact_table",
                "must be positive",
            ));
        }
        for (name, value) in [
            ("must_link_weight", self.must_link_weight),
            ("cannot_link_weight", self.cannot_link_weight),
            ("constraint_weight", self.constraint_weight),
            ("log_term_weight", self.log_term_weight),
            ("regularizer_term_weight", self.regularizer_term_weight),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ClusterError::invalid_parameter(
                    name,
                    format!("must be finite and non-negative, got {}", value),
                ));
            }
        }
        if let MetricLearning::GradientDescent { eta, eta_decay } = self.metric_learning {
            if !eta.is_finite() || eta <= 0.0 {
                return Err(ClusterError::invalid_parameter(
                    "eta",
                    format!("must be positive, got {}", eta),
                ));
            }
            if !(0.0..=1.0).contains(&eta_decay) {
                return Err(ClusterError::invalid_parameter(
                    "eta_decay",
                    format!("must lie in [0, 1], got {}", eta_decay),
                ));
            }
        }
        if let MetricConfig::Kl { smoothing, .. } = self.metric {
            if !smoothing.is_finite() || smoothing < 0.0 {
                return Err(ClusterError::invalid_parameter(
                    "smoothing",
                    format!("must be finite and non-negative, got {}", smoothing),
                ));
            }
        }
        if let Regularizer::Rayleigh { scale } = self.regularizer {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(ClusterError::invalid_parameter(
                    "scale",
                    format!("Rayleigh scale must be positive, got {}", scale),
                ));
            }
        }
        Ok(())
    }
}
