//! Strategies that (re)assign every instance to a cluster.
//!
//! An assigner never holds on to engine state. Each call receives an
//! [`AssignContext`] snapshot of the data, centroids, metrics and
//! constraints, and mutates only the assignment slice it is lent.

mod constrained;
mod greedy;
mod rmn;

pub use constrained::ConstrainedAssigner;
pub use greedy::{nearest_centroid, nearest_centroids, GreedyAssigner};
pub use rmn::{pairwise_table, unary_weights, RmnAssigner};

use crate::config::{AssignerKind, MpcKMeansConfig};
use crate::constraints::{ConstraintStore, LinkType};
use crate::dataset::{Dataset, FeatureVector};
use crate::error::ClusterError;
use crate::metric::Metric;
use rayon::prelude::*;
use serde::Serialize;

/// Read-only view of everything an assigner needs for one call
#[derive(Clone, Copy)]
pub struct AssignContext<'a> {
    pub data: &'a dyn Dataset,
    pub centroids: &'a [FeatureVector],
    /// One shared metric, or one per cluster
    pub metrics: &'a [Metric],
    pub constraints: &'a ConstraintStore,
    /// Largest cannot-link penalty, indexed like `metrics`
    pub max_cl_penalties: &'a [f64],
    /// Subtract the metric log-normalizer from instance penalties
    pub use_log_term: bool,
    pub log_term_weight: f64,
}

impl<'a> AssignContext<'a> {
    /// Number of clusters
    pub fn k(&self) -> usize {
        self.centroids.len()
    }

    pub fn multiple_metrics(&self) -> bool {
        self.metrics.len() > 1
    }

    /// Metric governing cluster `c`
    pub fn metric_for(&self, c: usize) -> &'a Metric {
        if self.multiple_metrics() {
            &self.metrics[c]
        } else {
            &self.metrics[0]
        }
    }

    /// Largest cannot-link penalty under the metric of cluster `c`
    pub fn max_cl_penalty(&self, c: usize) -> f64 {
        let idx = if self.multiple_metrics() { c } else { 0 };
        self.max_cl_penalties.get(idx).copied().unwrap_or(0.0)
    }

    /// Symmetric penalty between two instances sitting in clusters `a` and
    /// `b`, split evenly across both metrics when they differ
    pub fn pair_penalty(
        &self,
        x: &FeatureVector,
        y: &FeatureVector,
        a: usize,
        b: usize,
    ) -> Result<f64, ClusterError> {
        if self.multiple_metrics() && a != b {
            let left = self.metric_for(a).penalty_symmetric(x, y)?;
            let right = self.metric_for(b).penalty_symmetric(x, y)?;
            Ok(0.5 * left + 0.5 * right)
        } else {
            self.metric_for(a).penalty_symmetric(x, y)
        }
    }
}

/// Agreement between a probabilistic assignment and the greedy baseline
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AssignmentDiagnostics {
    /// Instances on which both strategies agree
    pub same: usize,
    /// Instances on which they disagree
    pub different: usize,
    /// Mean share of violated constraints among the disagreeing instances
    pub mean_violation_ratio: f64,
}

impl AssignmentDiagnostics {
    /// Compare `chosen` against `baseline`, counting violations under `chosen`
    pub fn compare(constraints: &ConstraintStore, chosen: &[usize], baseline: &[usize]) -> Self {
        let per_instance: Vec<Option<f64>> = chosen
            .par_iter()
            .zip(baseline.par_iter())
            .enumerate()
            .map(|(i, (&a, &b))| {
                if a == b {
                    return None;
                }
                let total = constraints.degree(i);
                if total == 0 {
                    return Some(0.0);
                }
                let violated = constraints
                    .neighbors_of(i)
                    .filter(|c| {
                        let same = chosen[c.other(i)] == a;
                        match c.link {
                            LinkType::MustLink => !same,
                            LinkType::CannotLink => same,
                        }
                    })
                    .count();
                Some(violated as f64 / total as f64)
            })
            .collect();

        let different = per_instance.iter().filter(|r| r.is_some()).count();
        let ratio_sum: f64 = per_instance.iter().flatten().sum();
        Self {
            same: chosen.len() - different,
            different,
            mean_violation_ratio: if different > 0 {
                ratio_sum / different as f64
            } else {
                0.0
            },
        }
    }
}

/// What one assignment call did
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AssignOutcome {
    /// Instances whose cluster changed during the call
    pub moved: usize,
    /// The probabilistic result was discarded in favor of the greedy one
    pub fell_back: bool,
    pub diagnostics: Option<AssignmentDiagnostics>,
}

/// A cluster assignment strategy
pub trait Assigner: Send {
    fn name(&self) -> &'static str;

    /// Reassign every instance, writing into `assignments`.
    ///
    /// On success every slot holds `Some(c)` with `c < ctx.k()`.
    fn assign(
        &mut self,
        ctx: &AssignContext<'_>,
        assignments: &mut [Option<usize>],
    ) -> Result<AssignOutcome, ClusterError>;
}

/// Instantiate the assigner selected by `config`
pub fn create_assigner(config: &MpcKMeansConfig) -> Box<dyn Assigner> {
    match config.assigner {
        AssignerKind::Greedy => Box::new(GreedyAssigner),
        AssignerKind::Constrained => Box::new(ConstrainedAssigner::new(
            config.seed,
            config.repeat_until_stable,
        )),
        AssignerKind::Sorted => Box::new(ConstrainedAssigner::sorted(config.repeat_until_stable)),
        AssignerKind::Probabilistic => Box::new(RmnAssigner::from_config(config)),
    }
}

/// Write `target` into `assignments` and count the changed slots
pub(crate) fn apply(assignments: &mut [Option<usize>], target: &[usize]) -> usize {
    let mut moved = 0;
    for (slot, &c) in assignments.iter_mut().zip(target.iter()) {
        if *slot != Some(c) {
            *slot = Some(c);
            moved += 1;
        }
    }
    moved
}
