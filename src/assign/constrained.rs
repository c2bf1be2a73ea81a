use super::{AssignContext, AssignOutcome, Assigner};
use crate::error::ClusterError;
use crate::objective::penalty_for_instance;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

/// Upper bound on sweeps when repeating until stable
const MAX_SWEEPS: usize = 100;

/// Order in which a sweep visits the instances
enum VisitOrder {
    /// Fresh seeded shuffle before every sweep
    Shuffled(ChaCha8Rng),
    /// Ascending by each instance's lowest penalty at the start of the call,
    /// ties by index. Every sweep of the call reuses it.
    ByBestPenalty,
}

/// Iterated conditional modes over the instances.
///
/// Each instance moves to the cluster with the lowest penalty given the
/// current position of its constraint partners, so earlier moves in a sweep
/// influence later ones.
pub struct ConstrainedAssigner {
    order: VisitOrder,
    repeat_until_stable: bool,
}

impl ConstrainedAssigner {
    /// Visit instances in a seeded random order
    pub fn new(seed: u64, repeat_until_stable: bool) -> Self {
        Self {
            order: VisitOrder::Shuffled(ChaCha8Rng::seed_from_u64(seed)),
            repeat_until_stable,
        }
    }

    /// Visit the most confidently placed instances first
    pub fn sorted(repeat_until_stable: bool) -> Self {
        Self {
            order: VisitOrder::ByBestPenalty,
            repeat_until_stable,
        }
    }

    fn best_cluster(
        ctx: &AssignContext<'_>,
        assignments: &[Option<usize>],
        i: usize,
    ) -> Result<(usize, f64), ClusterError> {
        let mut best: Option<(usize, f64)> = None;
        for c in 0..ctx.k() {
            let penalty = penalty_for_instance(ctx, assignments, i, c)?;
            match best {
                None if !penalty.is_nan() => best = Some((c, penalty)),
                Some((_, b)) if penalty < b => best = Some((c, penalty)),
                _ => {}
            }
        }
        Ok(best.unwrap_or((0, f64::NAN)))
    }

    /// Instances sorted by their lowest penalty under `assignments`
    fn sorted_order(
        ctx: &AssignContext<'_>,
        assignments: &[Option<usize>],
    ) -> Result<Vec<usize>, ClusterError> {
        let keys = (0..assignments.len())
            .map(|i| Self::best_cluster(ctx, assignments, i).map(|(_, p)| p))
            .collect::<Result<Vec<f64>, ClusterError>>()?;
        let mut order: Vec<usize> = (0..assignments.len()).collect();
        order.sort_by(|&a, &b| keys[a].total_cmp(&keys[b]));
        Ok(order)
    }
}

impl Assigner for ConstrainedAssigner {
    fn name(&self) -> &'static str {
        match self.order {
            VisitOrder::Shuffled(_) => "constrained",
            VisitOrder::ByBestPenalty => "sorted",
        }
    }

    fn assign(
        &mut self,
        ctx: &AssignContext<'_>,
        assignments: &mut [Option<usize>],
    ) -> Result<AssignOutcome, ClusterError> {
        let before = assignments.to_vec();
        let mut order: Vec<usize> = match self.order {
            VisitOrder::Shuffled(_) => (0..assignments.len()).collect(),
            VisitOrder::ByBestPenalty => Self::sorted_order(ctx, assignments)?,
        };

        let mut sweeps = 0;
        loop {
            sweeps += 1;
            if let VisitOrder::Shuffled(rng) = &mut self.order {
                order.shuffle(rng);
            }
            let mut sweep_moves = 0;
            for &i in &order {
                let (c, _) = Self::best_cluster(ctx, assignments, i)?;
                if assignments[i] != Some(c) {
                    assignments[i] = Some(c);
                    sweep_moves += 1;
                }
            }
            if !self.repeat_until_stable || sweep_moves == 0 || sweeps >= MAX_SWEEPS {
                break;
            }
        }

        let moved = before
            .iter()
            .zip(assignments.iter())
            .filter(|(a, b)| a != b)
            .count();
        debug!(assigner = self.name(), moved, sweeps, "Assignment finished");
        Ok(AssignOutcome {
            moved,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::{ConstraintStore, LinkType};
    use crate::dataset::{FeatureVector, Instances};
    use crate::metric::{Metric, MetricConfig};
    use crate::objective::max_cl_penalties;
    use ndarray::array;

    #[test]
    fn test_strong_must_link_pulls_pair_together() {
        let data = Instances::from_array(
            &array![[0.0, 0.0], [0.1, 0.0], [0.0, 0.1], [5.0, 5.0], [5.1, 5.0], [5.0, 5.1]].view(),
        );
        let centroids = vec![
            FeatureVector::dense(vec![0.03, 0.03]),
            FeatureVector::dense(vec![5.03, 5.03]),
        ];
        let metrics = vec![Metric::new(&MetricConfig::default(), 2)];
        let mut constraints = ConstraintStore::new();
        constraints.add(0, 3, LinkType::MustLink).unwrap();
        constraints.set_weights(1000.0, 1.0).unwrap();
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

        let mut assignments = vec![Some(0), Some(0), Some(0), Some(1), Some(1), Some(1)];
        let mut assigner = ConstrainedAssigner::new(42, true);
        assigner.assign(&ctx, &mut assignments).unwrap();
        assert_eq!(assignments[0], assignments[3]);
        assert_eq!(assignments[1], Some(0));
        assert_eq!(assignments[4], Some(1));
    }

    #[test]
    fn test_unconstrained_matches_nearest_centroid() {
        let data = Instances::from_array(&array![[0.0], [0.4], [2.0], [2.2]].view());
        let centroids = vec![FeatureVector::dense(vec![0.2]), FeatureVector::dense(vec![2.1])];
        let metrics = vec![Metric::new(&MetricConfig::default(), 1)];
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
        let mut assignments = vec![None; 4];
        let outcome = ConstrainedAssigner::new(1, false)
            .assign(&ctx, &mut assignments)
            .unwrap();
        assert_eq!(outcome.moved, 4);
        assert_eq!(assignments, vec![Some(0), Some(0), Some(1), Some(1)]);
    }

    #[test]
    fn test_sorted_visits_confident_instances_first() {
        // 0 sits on the first centroid, 2 on the second, 1 is undecided
        let data = Instances::from_array(&array![[0.1], [4.0], [9.0]].view());
        let centroids = vec![FeatureVector::dense(vec![0.0]), FeatureVector::dense(vec![10.0])];
        let metrics = vec![Metric::new(&MetricConfig::default(), 1)];
        let mut constraints = ConstraintStore::new();
        constraints.add(0, 1, LinkType::CannotLink).unwrap();
        constraints.set_weights(1.0, 1000.0).unwrap();
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

        let mut assignments = vec![None; 3];
        let mut assigner = ConstrainedAssigner::sorted(false);
        assert_eq!(assigner.name(), "sorted");
        let outcome = assigner.assign(&ctx, &mut assignments).unwrap();
        assert_eq!(outcome.moved, 3);
        // 1 is visited last and yields to its cannot-link partner
        assert_eq!(assignments, vec![Some(0), Some(1), Some(1)]);

        let outcome = ConstrainedAssigner::sorted(true)
            .assign(&ctx, &mut assignments)
            .unwrap();
        assert_eq!(outcome.moved, 0);
    }
}
