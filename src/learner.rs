//! Re-estimation of metric parameters between iterations.
//!
//! Diagonal metrics are trained either in closed form or by regularized
//! gradient descent on the constrained objective; the Mahalanobis matrix is
//! always re-estimated in closed form as an inverse scatter matrix.

use crate::config::{MetricLearning, DEFAULT_ETA, DEFAULT_ETA_DECAY};
use crate::constraints::{ConstraintStore, LinkType};
use crate::dataset::{bounding_box, Dataset, FeatureVector};
use crate::error::ClusterError;
use crate::metric::{Metric, MetricKind, MIN_WEIGHT};
use crate::regularizer::Regularizer;
use faer::prelude::*;
use faer::Mat;
use ndarray::{Array1, Array2};
use tracing::{debug, warn};

/// Determinant below which the scatter matrix counts as singular
const MIN_DETERMINANT: f64 = 1e-5;

/// Share of the trace added to the diagonal per conditioning attempt
const RIDGE_FRACTION: f64 = 0.01;

const MAX_RIDGE_ATTEMPTS: usize = 1000;

/// Everything a learner reads about the current clustering
#[derive(Clone, Copy)]
pub struct LearningInput<'a> {
    pub data: &'a dyn Dataset,
    pub centroids: &'a [FeatureVector],
    pub assignments: &'a [Option<usize>],
    pub constraints: &'a ConstraintStore,
    /// Only instances of this cluster contribute, for per-cluster metrics
    pub cluster: Option<usize>,
    pub log_term_weight: f64,
    /// Prior and its weight when regularization is on
    pub regularizer: Option<(Regularizer, f64)>,
}

impl<'a> LearningInput<'a> {
    /// Cluster of instance `i` if it takes part in this update
    fn scope(&self, i: usize) -> Option<usize> {
        let c = self.assignments[i]?;
        match self.cluster {
            Some(only) if only != c => None,
            _ => Some(c),
        }
    }
}

/// Trains one metric. Holds the decaying step size of gradient descent.
#[derive(Debug, Clone)]
pub struct MetricLearner {
    method: MetricLearning,
    eta: f64,
    eta_decay: f64,
    current_eta: f64,
}

impl MetricLearner {
    pub fn new(method: MetricLearning) -> Self {
        let (eta, eta_decay) = match method {
            MetricLearning::GradientDescent { eta, eta_decay } => (eta, eta_decay),
            _ => (DEFAULT_ETA, DEFAULT_ETA_DECAY),
        };
        Self {
            method,
            eta,
            eta_decay,
            current_eta: eta,
        }
    }

    /// Restore the initial step size
    pub fn reset(&mut self) {
        self.current_eta = self.eta;
    }

    pub fn current_eta(&self) -> f64 {
        self.current_eta
    }

    /// Update `metric` from the current clustering.
    ///
    /// Returns `false` when nothing was trained: learning is off, the metric
    /// is not learnable, or no instance falls in scope.
    pub fn train(
        &mut self,
        metric: &mut Metric,
        input: &LearningInput<'_>,
    ) -> Result<bool, ClusterError> {
        if !self.method.is_enabled() || !metric.is_learnable() {
            return Ok(false);
        }
        let count = (0..input.assignments.len())
            .filter(|&i| input.scope(i).is_some())
            .count();
        if count == 0 {
            return Ok(false);
        }

        match (metric.kind(), self.method) {
            (MetricKind::Mahalanobis, _) => learn_mahalanobis(metric, input, count)?,
            (MetricKind::Euclidean, MetricLearning::ClosedForm) => {
                learn_diagonal_closed_form(metric, input, count)?
            }
            _ => self.gradient_step(metric, input, count)?,
        }
        debug!(
            kind = ?metric.kind(),
            cluster = ?input.cluster,
            instances = count,
            normalizer = metric.normalizer(),
            "Metric updated"
        );
        Ok(true)
    }

    fn gradient_step(
        &mut self,
        metric: &mut Metric,
        input: &LearningInput<'_>,
        count: usize,
    ) -> Result<(), ClusterError> {
        let weights = metric
            .weights()
            .cloned()
            .ok_or_else(|| ClusterError::invalid_parameter("metric", "no diagonal weights"))?;
        let is_kl = metric.kind() == MetricKind::Kl;

        let mut grad = accumulate_diagonal(metric, input, is_kl)?;
        for (g, &w) in grad.iter_mut().zip(weights.iter()) {
            *g -= count as f64 * input.log_term_weight / w;
        }

        for (a, (&g, &w)) in grad.iter().zip(weights.iter()).enumerate() {
            let direction = match input.regularizer {
                Some((prior, weight)) => g - weight * prior.gradient(w),
                None => g,
            };
            metric.step_weight(a, self.current_eta * direction)?;
        }
        self.current_eta *= self.eta_decay;
        Ok(())
    }
}

/// Per-feature sum of the diagonal objective terms.
///
/// Violated cannot-links add their distance to the maximum for Euclidean,
/// and subtract their Jensen-Shannon terms for KL.
fn accumulate_diagonal(
    metric: &Metric,
    input: &LearningInput<'_>,
    is_kl: bool,
) -> Result<Array1<f64>, ClusterError> {
    let mut acc = Array1::zeros(metric.dimension());
    let mut max_components: Option<Array1<f64>> = None;

    for i in 0..input.assignments.len() {
        let Some(ci) = input.scope(i) else {
            continue;
        };
        let x = input.data.features(i);
        acc += &metric.diff_components(x, &input.centroids[ci])?;

        for constraint in input.constraints.neighbors_of(i) {
            let j = constraint.other(i);
            let Some(cj) = input.assignments[j] else {
                continue;
            };
            let cost = input.constraints.cost_of(constraint);
            let y = input.data.features(j);
            match constraint.link {
                LinkType::MustLink if ci != cj => {
                    acc.scaled_add(0.5 * cost, &metric.symmetric_components(x, y)?);
                }
                LinkType::CannotLink if ci == cj => {
                    let components = metric.symmetric_components(x, y)?;
                    if is_kl {
                        acc.scaled_add(-0.5 * cost, &components);
                    } else {
                        if max_components.is_none() {
                            let (low, high) = bounding_box(input.data);
                            max_components = Some(metric.symmetric_components(&low, &high)?);
                        }
                        if let Some(max) = &max_components {
                            acc.scaled_add(0.5 * cost, &(max - &components));
                        }
                    }
                }
                _ => {}
            }
        }
    }
    Ok(acc)
}

/// Closed-form diagonal weights: `n·λ / Σ_a`, or the positive root of the
/// regularized stationarity condition.
///
/// `n` is the number of instances in scope for the plain update. The
/// regularized root is always taken with the size of the whole dataset.
fn learn_diagonal_closed_form(
    metric: &mut Metric,
    input: &LearningInput<'_>,
    count: usize,
) -> Result<(), ClusterError> {
    let acc = accumulate_diagonal(metric, input, false)?;
    let mut weights = metric
        .weights()
        .cloned()
        .ok_or_else(|| ClusterError::invalid_parameter("metric", "no diagonal weights"))?;
    let n = count as f64;
    let total = input.data.num_instances() as f64;

    for (w, &sum) in weights.iter_mut().zip(acc.iter()) {
        if sum <= 0.0 {
            continue;
        }
        let updated = match input.regularizer {
            Some((_, reg_weight)) => {
                let r = input.log_term_weight * total / (2.0 * sum);
                r + (r * r + reg_weight * total / sum).sqrt()
            }
            None => input.log_term_weight * n / sum,
        };
        *w = updated.max(MIN_WEIGHT);
    }
    metric.set_weights(weights)
}

fn add_outer(sum: &mut Array2<f64>, v: &Array1<f64>, factor: f64) {
    let d = v.len();
    for r in 0..d {
        for c in 0..d {
            sum[[r, c]] += factor * v[r] * v[c];
        }
    }
}

/// Difference vector of the stored cannot-link pair farthest apart under `metric`
fn farthest_cannot_link(
    metric: &Metric,
    input: &LearningInput<'_>,
) -> Result<Option<Array1<f64>>, ClusterError> {
    let mut best: Option<(f64, usize, usize)> = None;
    for c in input
        .constraints
        .iter()
        .filter(|c| c.link == LinkType::CannotLink)
    {
        let p = metric.penalty_symmetric(input.data.features(c.first), input.data.features(c.second))?;
        if best.map_or(true, |(b, _, _)| p > b) {
            best = Some((p, c.first, c.second));
        }
    }
    best.map(|(_, i, j)| metric.difference(input.data.features(i), input.data.features(j)))
        .transpose()
}

/// Inverse of the constraint-adjusted scatter matrix.
///
/// A near-singular scatter matrix is conditioned by adding a fraction of its
/// trace to the diagonal; if that never helps the metric resets to identity.
fn learn_mahalanobis(
    metric: &mut Metric,
    input: &LearningInput<'_>,
    count: usize,
) -> Result<(), ClusterError> {
    let d = metric.dimension();
    let mut scatter = Array2::<f64>::zeros((d, d));
    let mut max_diff: Option<Option<Array1<f64>>> = None;

    for i in 0..input.assignments.len() {
        let Some(ci) = input.scope(i) else {
            continue;
        };
        let x = input.data.features(i);
        add_outer(&mut scatter, &metric.difference(x, &input.centroids[ci])?, 1.0);

        for constraint in input.constraints.neighbors_of(i) {
            let j = constraint.other(i);
            let Some(cj) = input.assignments[j] else {
                continue;
            };
            let cost = input.constraints.cost_of(constraint);
            let diff = metric.difference(x, input.data.features(j))?;
            match constraint.link {
                LinkType::MustLink if ci != cj => add_outer(&mut scatter, &diff, 0.5 * cost),
                LinkType::CannotLink if ci == cj => {
                    if max_diff.is_none() {
                        max_diff = Some(farthest_cannot_link(metric, input)?);
                    }
                    if let Some(Some(max)) = &max_diff {
                        add_outer(&mut scatter, max, 0.5 * cost);
                        add_outer(&mut scatter, &diff, -0.5 * cost);
                    }
                }
                _ => {}
            }
        }
    }
    scatter.mapv_inplace(|v| v / count as f64);

    let mut cov = Mat::<f64>::from_fn(d, d, |r, c| scatter[[r, c]]);
    let trace: f64 = (0..d).map(|r| cov[(r, r)]).sum();
    let mut det = cov.determinant();
    let mut attempts = 0;
    while !(det > MIN_DETERMINANT) && trace > 0.0 && attempts < MAX_RIDGE_ATTEMPTS {
        for r in 0..d {
            cov[(r, r)] += RIDGE_FRACTION * trace;
        }
        det = cov.determinant();
        attempts += 1;
    }

    if !(det > MIN_DETERMINANT) || !det.is_finite() {
        warn!(
            determinant = det,
            attempts, "Scatter matrix is singular, resetting metric to identity"
        );
        return metric.set_matrix(Array2::eye(d), 0.0);
    }
    if attempts > 0 {
        debug!(attempts, determinant = det, "Conditioned scatter matrix");
    }

    let inverse = cov.full_piv_lu().solve(&Mat::<f64>::identity(d, d));
    let matrix = Array2::from_shape_fn((d, d), |(r, c)| inverse[(r, c)]);
    metric.set_matrix(matrix, -det.ln())
}
