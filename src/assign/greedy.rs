use super::{apply, AssignContext, AssignOutcome, Assigner};
use crate::dataset::FeatureVector;
use crate::error::ClusterError;
use crate::metric::Metric;
use rayon::prelude::*;
use tracing::debug;

/// Best centroid for `x` under the direction of each cluster's metric.
///
/// Ties go to the lowest cluster index.
pub fn nearest_centroid(
    x: &FeatureVector,
    centroids: &[FeatureVector],
    metrics: &[Metric],
) -> Result<usize, ClusterError> {
    let metric_for = |c: usize| {
        if metrics.len() > 1 {
            &metrics[c]
        } else {
            &metrics[0]
        }
    };

    let mut best: Option<(usize, f64)> = None;
    for (c, centroid) in centroids.iter().enumerate() {
        let metric = metric_for(c);
        let score = metric.score(x, centroid)?;
        match best {
            None if !score.is_nan() => best = Some((c, score)),
            Some((_, b)) if metric.is_better(score, b) => best = Some((c, score)),
            _ => {}
        }
    }
    Ok(best.map_or(0, |(c, _)| c))
}

/// Nearest centroid of every instance, computed in parallel
pub fn nearest_centroids(ctx: &AssignContext<'_>) -> Result<Vec<usize>, ClusterError> {
    (0..ctx.data.num_instances())
        .into_par_iter()
        .map(|i| nearest_centroid(ctx.data.features(i), ctx.centroids, ctx.metrics))
        .collect()
}

/// Independent nearest-centroid assignment; constraints are ignored
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyAssigner;

impl Assigner for GreedyAssigner {
    fn name(&self) -> &'static str {
        "greedy"
    }

    fn assign(
        &mut self,
        ctx: &AssignContext<'_>,
        assignments: &mut [Option<usize>],
    ) -> Result<AssignOutcome, ClusterError> {
        let nearest = nearest_centroids(ctx)?;
        let moved = apply(assignments, &nearest);
        debug!(assigner = self.name(), moved, "Assignment finished");
        Ok(AssignOutcome {
            moved,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::ConstraintStore;
    use crate::dataset::Instances;
    use crate::metric::{MetricConfig, ObjectiveDirection};
    use ndarray::array;

    #[test]
    fn test_ties_go_to_lowest_cluster() {
        let metric = Metric::new(&MetricConfig::default(), 1);
        let centroids = vec![
            FeatureVector::dense(vec![-1.0]),
            FeatureVector::dense(vec![1.0]),
        ];
        let x = FeatureVector::dense(vec![0.0]);
        assert_eq!(nearest_centroid(&x, &centroids, &[metric]).unwrap(), 0);
    }

    #[test]
    fn test_similarity_direction_picks_largest() {
        let mut metric = Metric::new(&MetricConfig::cosine(), 2);
        metric.set_direction(ObjectiveDirection::IncreasingSimilarity);
        let centroids = vec![
            FeatureVector::dense(vec![1.0, 0.0]),
            FeatureVector::dense(vec![0.0, 1.0]),
        ];
        let x = FeatureVector::dense(vec![0.1, 0.9]);
        assert_eq!(nearest_centroid(&x, &centroids, &[metric]).unwrap(), 1);
    }

    #[test]
    fn test_greedy_is_deterministic() {
        let data = Instances::from_array(
            &array![[0.0, 0.0], [0.2, 0.1], [5.0, 5.0], [5.1, 4.9], [2.4, 2.6]].view(),
        );
        let centroids = vec![
            FeatureVector::dense(vec![0.1, 0.0]),
            FeatureVector::dense(vec![5.0, 5.0]),
        ];
        let metrics = vec![Metric::new(&MetricConfig::default(), 2)];
        let constraints = ConstraintStore::new();
        let ctx = AssignContext {
            data: &data,
            centroids: &centroids,
            metrics: &metrics,
            constraints: &constraints,
            max_cl_penalties: &[0.0],
            use_log_term: false,
            log_term_weight: 0.0,
        };

        let mut first = vec![None; 5];
        let outcome = GreedyAssigner.assign(&ctx, &mut first).unwrap();
        assert_eq!(outcome.moved, 5);
        let mut second = vec![None; 5];
        GreedyAssigner.assign(&ctx, &mut second).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec![Some(0), Some(0), Some(1), Some(1), Some(0)]);

        // A second pass over its own output moves nothing
        assert_eq!(GreedyAssigner.assign(&ctx, &mut first).unwrap().moved, 0);
    }
}
