//! Collective assignment by most-probable-explanation inference over a
//! pairwise Markov network.
//!
//! One variable per instance with a unary potential from its fit to each
//! centroid, and one `k × k` potential per constrained pair. The potentials
//! are normalized by an adaptive `scale`, the largest similarity or distance
//! magnitude seen in this call, which is returned by [`unary_weights`] and
//! threaded into [`pairwise_table`].

use super::greedy::nearest_centroids;
use super::{apply, AssignContext, AssignOutcome, AssignmentDiagnostics, Assigner};
use crate::config::{InferenceMode, MpcKMeansConfig};
use crate::constraints::{Constraint, LinkType};
use crate::dataset::FeatureVector;
use crate::error::ClusterError;
use crate::inference::{infer, FactorGraph, POTENTIAL_FLOOR};
use crate::metric::{Metric, MetricKind, ObjectiveDirection};
use ndarray::{Array2, Axis};
use rayon::prelude::*;
use tracing::{debug, warn};

/// Value compared against centroid `c` for the unary potential
fn unary_value(
    metric: &Metric,
    x: &FeatureVector,
    centroid: &FeatureVector,
) -> Result<f64, ClusterError> {
    match metric.direction() {
        ObjectiveDirection::IncreasingSimilarity => metric.similarity(x, centroid),
        ObjectiveDirection::DecreasingDistance => {
            let d = metric.distance(x, centroid)?;
            match metric.kind() {
                MetricKind::Euclidean | MetricKind::Mahalanobis => Ok(d * d),
                MetricKind::DotProduct | MetricKind::Kl => Ok(d),
            }
        }
    }
}

/// Unary potentials for every instance, rows indexed by instance, and the
/// adaptive scale used to compute them.
///
/// Each entry is `exp(±v / scale)` floored at [`POTENTIAL_FLOOR`], with the
/// sign following the metric's direction. A scale that is not a positive
/// finite number is replaced by 1.
pub fn unary_weights(ctx: &AssignContext<'_>) -> Result<(Array2<f64>, f64), ClusterError> {
    let n = ctx.data.num_instances();
    let k = ctx.k();

    let rows: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let x = ctx.data.features(i);
            (0..k)
                .map(|c| unary_value(ctx.metric_for(c), x, &ctx.centroids[c]))
                .collect::<Result<Vec<f64>, ClusterError>>()
        })
        .collect::<Result<_, _>>()?;

    let scale = rows
        .iter()
        .flatten()
        .map(|v| v.abs())
        .filter(|v| v.is_finite() && *v < f64::MAX)
        .fold(0.0_f64, f64::max);
    let scale = if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        1.0
    };

    let mut unary = Array2::zeros((n, k));
    for (i, row) in rows.iter().enumerate() {
        for (c, &v) in row.iter().enumerate() {
            let signed = match ctx.metric_for(c).direction() {
                ObjectiveDirection::IncreasingSimilarity => v / scale,
                ObjectiveDirection::DecreasingDistance => -v / scale,
            };
            unary[[i, c]] = signed.exp().max(POTENTIAL_FLOOR);
        }
    }
    Ok((unary, scale))
}

/// Pairwise potential for one constraint, rows indexed by the states of
/// `constraint.first`.
///
/// Must-links keep 1 on the diagonal and penalize every off-diagonal cell.
/// Cannot-links keep 1 off the diagonal and penalize each diagonal cell under
/// that cluster's metric. Entries are floored at [`POTENTIAL_FLOOR`].
pub fn pairwise_table(
    ctx: &AssignContext<'_>,
    constraint: &Constraint,
    scale: f64,
    constraint_weight: f64,
) -> Result<Array2<f64>, ClusterError> {
    let k = ctx.k();
    let x = ctx.data.features(constraint.first);
    let y = ctx.data.features(constraint.second);
    let cost = ctx.constraints.cost_of(constraint);
    let kind = ctx.metric_for(0).kind();

    // Dot-product tables multiply by the scale where every other family divides
    let potential = |weight: f64| -> f64 {
        let exponent = match kind {
            MetricKind::DotProduct => constraint_weight * scale * weight,
            MetricKind::Euclidean | MetricKind::Mahalanobis | MetricKind::Kl => {
                -constraint_weight * weight / scale
            }
        };
        exponent.exp().max(POTENTIAL_FLOOR)
    };

    let mut table = Array2::from_elem((k, k), 1.0);
    match constraint.link {
        LinkType::MustLink => {
            for a in 0..k {
                for b in 0..k {
                    if a == b {
                        continue;
                    }
                    let penalty = ctx.pair_penalty(x, y, a, b)?;
                    let weight = match kind {
                        MetricKind::DotProduct => -cost * penalty,
                        MetricKind::Euclidean | MetricKind::Mahalanobis | MetricKind::Kl => {
                            cost * penalty
                        }
                    };
                    table[[a, b]] = potential(weight);
                }
            }
        }
        LinkType::CannotLink => {
            for c in 0..k {
                let metric = ctx.metric_for(c);
                let weight = match kind {
                    MetricKind::DotProduct => -cost * metric.similarity(x, y)?,
                    MetricKind::Kl => cost * (2.0 - metric.penalty_symmetric(x, y)?),
                    MetricKind::Euclidean | MetricKind::Mahalanobis => {
                        cost * (ctx.max_cl_penalty(c) - metric.penalty_symmetric(x, y)?)
                    }
                };
                table[[c, c]] = potential(weight);
            }
        }
    }
    table.mapv_inplace(|v| if v.is_nan() { POTENTIAL_FLOOR } else { v });
    Ok(table)
}

/// Probabilistic assigner with an all-or-nothing greedy fallback
#[derive(Debug, Clone)]
pub struct RmnAssigner {
    pub mode: InferenceMode,
    pub passes: usize,
    pub max_exact_table: usize,
    pub constraint_weight: f64,
    pub collect_diagnostics: bool,
}

impl RmnAssigner {
    pub fn from_config(config: &MpcKMeansConfig) -> Self {
        Self {
            mode: config.inference_mode,
            passes: config.inference_passes,
            max_exact_table: config.max_exact_table,
            constraint_weight: config.constraint_weight,
            collect_diagnostics: config.collect_diagnostics,
        }
    }

    /// Build the Markov network for the current snapshot
    pub fn build_graph(&self, ctx: &AssignContext<'_>) -> Result<(FactorGraph, f64), ClusterError> {
        let (unary, scale) = unary_weights(ctx)?;
        let mut graph = FactorGraph::new(ctx.k());
        for row in unary.axis_iter(Axis(0)) {
            graph.add_variable(row.to_owned())?;
        }
        for constraint in ctx.constraints.iter() {
            let table = pairwise_table(ctx, constraint, scale, self.constraint_weight)?;
            graph.add_pairwise(constraint.first, constraint.second, table)?;
        }
        Ok((graph, scale))
    }
}

impl Assigner for RmnAssigner {
    fn name(&self) -> &'static str {
        "probabilistic"
    }

    fn assign(
        &mut self,
        ctx: &AssignContext<'_>,
        assignments: &mut [Option<usize>],
    ) -> Result<AssignOutcome, ClusterError> {
        let (graph, scale) = self.build_graph(ctx)?;
        let inferred = infer(&graph, self.mode, self.passes, self.max_exact_table);

        let decoded: Option<Vec<usize>> = inferred.iter().copied().collect();
        let Some(decoded) = decoded else {
            let undecoded = inferred.iter().filter(|s| s.is_none()).count();
            warn!(
                undecoded,
                scale, "Probabilistic assignment is degenerate, falling back to greedy"
            );
            let greedy = nearest_centroids(ctx)?;
            let moved = apply(assignments, &greedy);
            return Ok(AssignOutcome {
                moved,
                fell_back: true,
                diagnostics: None,
            });
        };

        let diagnostics = if self.collect_diagnostics {
            let greedy = nearest_centroids(ctx)?;
            Some(AssignmentDiagnostics::compare(ctx.constraints, &decoded, &greedy))
        } else {
            None
        };

        let moved = apply(assignments, &decoded);
        debug!(
            assigner = self.name(),
            moved,
            scale,
            pairwise = graph.num_pairwise(),
            diagnostics = ?diagnostics,
            "Assignment finished"
        );
        Ok(AssignOutcome {
            moved,
            fell_back: false,
            diagnostics,
        })
    }
}
