//! The constrained clustering objective and its per-instance terms.

use crate::assign::AssignContext;
use crate::constraints::{ConstraintStore, LinkType};
use crate::dataset::{bounding_box, Dataset};
use crate::error::ClusterError;
use crate::metric::{Metric, MetricKind};
use crate::regularizer::Regularizer;

/// Largest cannot-link penalty under each metric.
///
/// Diagonal metrics use the penalty between the corners of the dataset's
/// bounding box. Mahalanobis uses the farthest stored cannot-link pair.
pub fn max_cl_penalties(
    data: &dyn Dataset,
    metrics: &[Metric],
    constraints: &ConstraintStore,
) -> Result<Vec<f64>, ClusterError> {
    if constraints.is_empty() {
        return Ok(vec![0.0; metrics.len()]);
    }
    let (min_corner, max_corner) = bounding_box(data);

    metrics
        .iter()
        .map(|metric| match metric.kind() {
            MetricKind::Mahalanobis => {
                let mut max = 0.0_f64;
                for c in constraints
                    .iter()
                    .filter(|c| c.link == LinkType::CannotLink)
                {
                    let p = metric.penalty_symmetric(data.features(c.first), data.features(c.second))?;
                    max = max.max(p);
                }
                Ok(max)
            }
            _ => metric.penalty_symmetric(&min_corner, &max_corner),
        })
        .collect()
}

/// Cost of putting instance `i` in cluster `c`, given where the other
/// instances currently sit.
///
/// Partners that are still unassigned contribute nothing.
pub fn penalty_for_instance(
    ctx: &AssignContext<'_>,
    assignments: &[Option<usize>],
    i: usize,
    c: usize,
) -> Result<f64, ClusterError> {
    let metric = ctx.metric_for(c);
    let x = ctx.data.features(i);
    let mut penalty = metric.penalty(x, &ctx.centroids[c])?;
    if ctx.use_log_term {
        penalty -= ctx.log_term_weight * metric.normalizer();
    }

    for constraint in ctx.constraints.neighbors_of(i) {
        let j = constraint.other(i);
        let Some(cj) = assignments[j] else {
            continue;
        };
        let cost = ctx.constraints.cost_of(constraint);
        let y = ctx.data.features(j);
        match constraint.link {
            LinkType::MustLink if cj != c => {
                penalty += cost * ctx.pair_penalty(x, y, c, cj)?;
            }
            LinkType::CannotLink if cj == c => {
                penalty += cost * (ctx.max_cl_penalty(c) - metric.penalty_symmetric(x, y)?);
            }
            _ => {}
        }
    }
    Ok(penalty)
}

/// The objective split into its parts
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ObjectiveTerms {
    /// Sum of instance-to-centroid penalties
    pub variance: f64,
    pub must_link: f64,
    pub cannot_link: f64,
    /// Weighted metric log-normalizers, subtracted from the total
    pub normalizer: f64,
    /// Weighted regularizer value, subtracted from the total
    pub regularizer: f64,
}

impl ObjectiveTerms {
    pub fn total(&self) -> f64 {
        self.variance + self.must_link + self.cannot_link - self.normalizer - self.regularizer
    }
}

/// Evaluate the objective for the current assignment.
///
/// Each violated pair is counted once. `regularizer` carries the prior and
/// its weight when regularization is on.
pub fn objective(
    ctx: &AssignContext<'_>,
    assignments: &[Option<usize>],
    regularizer: Option<(Regularizer, f64)>,
) -> Result<ObjectiveTerms, ClusterError> {
    let mut terms = ObjectiveTerms::default();

    for (i, slot) in assignments.iter().enumerate() {
        let Some(c) = *slot else {
            continue;
        };
        let metric = ctx.metric_for(c);
        terms.variance += metric.penalty(ctx.data.features(i), &ctx.centroids[c])?;
        if ctx.use_log_term {
            terms.normalizer += ctx.log_term_weight * metric.normalizer();
        }
    }

    for constraint in ctx.constraints.iter() {
        let (Some(ci), Some(cj)) = (assignments[constraint.first], assignments[constraint.second])
        else {
            continue;
        };
        let x = ctx.data.features(constraint.first);
        let y = ctx.data.features(constraint.second);
        let cost = ctx.constraints.cost_of(constraint);
        match constraint.link {
            LinkType::MustLink if ci != cj => {
                terms.must_link += cost * ctx.pair_penalty(x, y, ci, cj)?;
            }
            LinkType::CannotLink if ci == cj => {
                let p = ctx.metric_for(ci).penalty_symmetric(x, y)?;
                terms.cannot_link += cost * (ctx.max_cl_penalty(ci) - p);
            }
            _ => {}
        }
    }

    if let Some((prior, weight)) = regularizer {
        terms.regularizer = ctx
            .metrics
            .iter()
            .map(|m| weight * m.regularizer_value(&prior))
            .sum();
    }
    Ok(terms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{FeatureVector, Instances};
    use crate::metric::MetricConfig;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn fixture() -> (Instances, Vec<FeatureVector>, Vec<Metric>, ConstraintStore) {
        let data = Instances::from_array(&array![[0.0, 0.0], [1.0, 0.0], [4.0, 0.0]].view());
        let centroids = vec![
            FeatureVector::dense(vec![0.5, 0.0]),
            FeatureVector::dense(vec![4.0, 0.0]),
        ];
        let metrics = vec![Metric::new(&MetricConfig::default(), 2)];
        let mut constraints = ConstraintStore::new();
        constraints.add(1, 2, LinkType::MustLink).unwrap();
        constraints.add(0, 1, LinkType::CannotLink).unwrap();
        (data, centroids, metrics, constraints)
    }

    #[test]
    fn test_max_cl_penalty_spans_bounding_box() {
        let (data, _, metrics, constraints) = fixture();
        let max = max_cl_penalties(&data, &metrics, &constraints).unwrap();
        assert_eq!(max.len(), 1);
        assert_relative_eq!(max[0], 16.0);

        let empty = ConstraintStore::new();
        assert_eq!(max_cl_penalties(&data, &metrics, &empty).unwrap(), vec![0.0]);
    }

    #[test]
    fn test_instance_penalty_adds_violations() {
        let (data, centroids, metrics, constraints) = fixture();
        let max = max_cl_penalties(&data, &metrics, &constraints).unwrap();
        let ctx = AssignContext {
            data: &data,
            centroids: &centroids,
            metrics: &metrics,
            constraints: &constraints,
            max_cl_penalties: &max,
            use_log_term: false,
            log_term_weight: 0.0,
        };
        let assignments = [Some(0), None, Some(1)];

        // Cluster 0: 0.25 variance, must-link partner 2 elsewhere (9), cannot-link partner 0 here (16 - 1)
        assert_relative_eq!(
            penalty_for_instance(&ctx, &assignments, 1, 0).unwrap(),
            0.25 + 9.0 + 15.0
        );
        // Cluster 1: 9 variance, nothing violated
        assert_relative_eq!(penalty_for_instance(&ctx, &assignments, 1, 1).unwrap(), 9.0);
    }

    #[test]
    fn test_objective_counts_pairs_once() {
        let (data, centroids, metrics, constraints) = fixture();
        let max = max_cl_penalties(&data, &metrics, &constraints).unwrap();
        let ctx = AssignContext {
            data: &data,
            centroids: &centroids,
            metrics: &metrics,
            constraints: &constraints,
            max_cl_penalties: &max,
            use_log_term: false,
            log_term_weight: 0.0,
        };
        let terms = objective(&ctx, &[Some(0), Some(0), Some(1)], None).unwrap();
        assert_relative_eq!(terms.variance, 0.5);
        assert_relative_eq!(terms.must_link, 9.0);
        assert_relative_eq!(terms.cannot_link, 15.0);
        assert_relative_eq!(terms.total(), 24.5);
    }

    #[test]
    fn test_objective_subtracts_regularizer() {
        let (data, centroids, metrics, _) = fixture();
        let constraints = ConstraintStore::new();
        let ctx = AssignContext {
            data: &data,
            centroids: &centroids,
            metrics: &metrics,
            constraints: &constraints,
            max_cl_penalties: &[0.0],
            use_log_term: true,
            log_term_weight: 0.01,
        };
        let prior = Regularizer::Rayleigh { scale: 1.0 };
        let terms = objective(&ctx, &[Some(0), Some(0), Some(1)], Some((prior, 0.5))).unwrap();
        // Unit weights: ln 1 = 0 normalizer, Rayleigh(1, 1) = -1
        assert_relative_eq!(terms.normalizer, 0.0);
        assert_relative_eq!(terms.regularizer, -0.5);
        assert_relative_eq!(terms.total(), 0.5 + 0.5);
    }
}
