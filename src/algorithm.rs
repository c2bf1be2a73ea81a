use crate::assign::{create_assigner, AssignContext, AssignmentDiagnostics};
use crate::config::MpcKMeansConfig;
use crate::constraints::ConstraintStore;
use crate::dataset::{weighted_mean, Dataset, FeatureVector};
use crate::error::ClusterError;
use crate::init::initialize;
use crate::learner::{LearningInput, MetricLearner};
use crate::metric::Metric;
use crate::objective::{max_cl_penalties, objective};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};

/// Why a converged run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConvergenceReason {
    /// An assignment pass moved no instance
    NoMoves,
    /// The objective changed by less than the tolerance
    ObjectiveDelta,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Termination {
    Converged(ConvergenceReason),
    MaxIterations,
}

/// Result of the constrained k-means algorithm
#[derive(Debug, Clone)]
pub struct ClusteringResult {
    pub centroids: Vec<FeatureVector>,
    pub assignments: Vec<usize>,
    pub metrics: Vec<Metric>,
    /// Objective after every iteration
    pub objective_history: Vec<f64>,
    pub n_iterations: usize,
    pub termination: Termination,
    /// Agreement statistics from the last assignment that reported them
    pub last_diagnostics: Option<AssignmentDiagnostics>,
    /// Iterations whose probabilistic assignment fell back to greedy
    pub fallbacks: usize,
}

/// Constraint store used by a run: optionally closed, with the configured
/// link weights applied
fn prepare_constraints(
    constraints: &ConstraintStore,
    config: &MpcKMeansConfig,
) -> Result<ConstraintStore, ClusterError> {
    let mut store = if config.transitive_closure {
        let closed = constraints.transitive_closure();
        debug!(
            before = constraints.len(),
            after = closed.len(),
            "Applied transitive closure"
        );
        closed
    } else {
        constraints.clone()
    };
    store.set_weights(config.must_link_weight, config.cannot_link_weight)?;
    Ok(store)
}

/// One metric, or one per cluster, built against `data`
fn build_metrics(data: &dyn Dataset, config: &MpcKMeansConfig) -> Result<Vec<Metric>, ClusterError> {
    let mut metric = Metric::unbuilt(&config.metric);
    if let Some(direction) = config.objective_direction {
        metric.set_direction(direction);
    }
    metric.build(data)?;
    let count = if config.use_multiple_metrics {
        config.k
    } else {
        1
    };
    Ok(vec![metric; count])
}

/// Recompute every centroid as the weighted mean of its members.
///
/// Clusters left empty keep their previous centroid. Returns the number of
/// empty clusters.
fn update_centroids(
    data: &dyn Dataset,
    assignments: &[Option<usize>],
    metrics: &[Metric],
    centroids: &mut [FeatureVector],
) -> Result<usize, ClusterError> {
    let k = centroids.len();
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); k];
    for (i, slot) in assignments.iter().enumerate() {
        if let Some(c) = *slot {
            members[c].push(i);
        }
    }

    let mut empty = 0;
    for (c, group) in members.iter().enumerate() {
        let mean = weighted_mean(group.iter().map(|&i| data.instance(i)), data.dimension())?;
        match mean {
            Some(mut mean) => {
                let metric = if metrics.len() > 1 { &metrics[c] } else { &metrics[0] };
                metric.prepare_centroid(&mut mean);
                centroids[c] = mean;
            }
            None => empty += 1,
        }
    }
    Ok(empty)
}

/// Run constrained k-means with metric learning.
///
/// Each iteration assigns every instance, recomputes the centroids, trains
/// the metrics when learning is on and evaluates the objective. The run
/// stops when an assignment moves nothing, when the objective changes by
/// less than `config.tol`, or after `config.max_iters` iterations.
pub fn run_mpckmeans(
    data: &dyn Dataset,
    constraints: &ConstraintStore,
    config: &MpcKMeansConfig,
) -> Result<ClusteringResult, ClusterError> {
    config.validate()?;
    let n_samples = data.num_instances();
    let k = config.k;

    if n_samples == 0 {
        return Err(ClusterError::InsufficientData(
            "dataset has no instances".to_string(),
        ));
    }
    if n_samples < k {
        return Err(ClusterError::InvalidK(format!(
            "k ({}) is greater than the number of instances ({})",
            k, n_samples
        )));
    }
    constraints.validate(n_samples)?;
    let constraints = prepare_constraints(constraints, config)?;

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut metrics = build_metrics(data, config)?;
    let mut learners = vec![MetricLearner::new(config.metric_learning); metrics.len()];
    for learner in learners.iter_mut() {
        learner.reset();
    }

    info!(
        instances = n_samples,
        features = data.dimension(),
        clusters = k,
        constraints = constraints.len(),
        metric = ?metrics[0].kind(),
        assigner = ?config.assigner,
        "Starting constrained k-means"
    );

    let init = initialize(
        config.initializer,
        data,
        k,
        &metrics[0],
        &constraints,
        &mut rng,
    )?;
    let mut centroids = init.centroids;
    let mut assignments = init.assignments;

    let mut assigner = create_assigner(config);
    let mut max_cl = max_cl_penalties(data, &metrics, &constraints)?;
    let use_log_term = config.metric_learning.is_enabled();
    let regularizer = config
        .regularize
        .then_some((config.regularizer, config.regularizer_term_weight));

    let mut objective_history = Vec::new();
    let mut last_diagnostics = None;
    let mut fallbacks = 0;
    let mut n_iterations = 0;
    let mut termination = Termination::MaxIterations;

    for iteration in 0..config.max_iters {
        let iter_start = Instant::now();
        n_iterations = iteration + 1;

        let outcome = {
            let ctx = AssignContext {
                data,
                centroids: &centroids,
                metrics: &metrics,
                constraints: &constraints,
                max_cl_penalties: &max_cl,
                use_log_term,
                log_term_weight: config.log_term_weight,
            };
            assigner.assign(&ctx, &mut assignments)?
        };
        if outcome.fell_back {
            fallbacks += 1;
        }
        if outcome.diagnostics.is_some() {
            last_diagnostics = outcome.diagnostics;
        }

        let moved = outcome.moved;
        if moved > 0 {
            let empty = update_centroids(data, &assignments, &metrics, &mut centroids)?;
            if empty > 0 {
                debug!(iteration, empty, "Empty clusters keep their previous centroid");
            }

            if use_log_term {
                for (m, (metric, learner)) in metrics.iter_mut().zip(learners.iter_mut()).enumerate() {
                    let input = LearningInput {
                        data,
                        centroids: &centroids,
                        assignments: &assignments,
                        constraints: &constraints,
                        cluster: config.use_multiple_metrics.then_some(m),
                        log_term_weight: config.log_term_weight,
                        regularizer,
                    };
                    learner.train(metric, &input)?;
                }
                max_cl = max_cl_penalties(data, &metrics, &constraints)?;
            }
        }

        let value = {
            let ctx = AssignContext {
                data,
                centroids: &centroids,
                metrics: &metrics,
                constraints: &constraints,
                max_cl_penalties: &max_cl,
                use_log_term,
                log_term_weight: config.log_term_weight,
            };
            objective(&ctx, &assignments, regularizer)?.total()
        };
        let previous = objective_history.last().copied();
        objective_history.push(value);

        debug!(
            iteration = iteration + 1,
            max_iters = config.max_iters,
            moved,
            objective = value,
            fallback = outcome.fell_back,
            elapsed_ms = iter_start.elapsed().as_secs_f64() * 1e3,
            "Iteration finished"
        );

        if moved == 0 {
            termination = Termination::Converged(ConvergenceReason::NoMoves);
            break;
        }
        if let Some(previous) = previous {
            if config.tol >= 0.0 && (previous - value).abs() < config.tol {
                termination = Termination::Converged(ConvergenceReason::ObjectiveDelta);
                break;
            }
        }
    }

    let assignments: Vec<usize> = assignments
        .into_iter()
        .collect::<Option<_>>()
        .ok_or_else(|| {
            ClusterError::InsufficientData("some instances were never assigned".to_string())
        })?;

    info!(
        iterations = n_iterations,
        termination = ?termination,
        objective = objective_history.last().copied().unwrap_or(f64::NAN),
        fallbacks,
        "Finished constrained k-means"
    );

    Ok(ClusteringResult {
        centroids,
        assignments,
        metrics,
        objective_history,
        n_iterations,
        termination,
        last_diagnostics,
        fallbacks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AssignerKind, InitKind, MetricLearning};
    use crate::constraints::LinkType;
    use crate::dataset::Instances;
    use ndarray::array;

    fn two_blobs() -> Instances {
        Instances::from_array(
            &array![[0.0, 0.0], [0.2, 0.1], [0.1, 0.3], [5.0, 5.0], [5.2, 4.9], [4.9, 5.1]].view(),
        )
    }

    #[test]
    fn test_kmeans_basic() {
        let data = two_blobs();
        let config = MpcKMeansConfig::new(2).with_initializer(InitKind::Random);
        let result = run_mpckmeans(&data, &ConstraintStore::new(), &config).unwrap();

        assert_eq!(result.centroids.len(), 2);
        assert_eq!(result.assignments.len(), 6);
        assert!(result.assignments.iter().all(|&c| c < 2));
        assert_eq!(result.assignments[0], result.assignments[1]);
        assert_ne!(result.assignments[0], result.assignments[3]);
        assert_eq!(result.objective_history.len(), result.n_iterations);
    }

    #[test]
    fn test_rejects_k_above_instances() {
        let data = two_blobs();
        let config = MpcKMeansConfig::new(7);
        assert!(matches!(
            run_mpckmeans(&data, &ConstraintStore::new(), &config),
            Err(ClusterError::InvalidK(_))
        ));
    }

    #[test]
    fn test_rejects_empty_dataset() {
        let data = Instances::default();
        assert!(matches!(
            run_mpckmeans(&data, &ConstraintStore::new(), &MpcKMeansConfig::new(1)),
            Err(ClusterError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_rejects_out_of_range_constraint() {
        let data = two_blobs();
        let mut constraints = ConstraintStore::new();
        constraints.add(0, 9, LinkType::MustLink).unwrap();
        assert!(matches!(
            run_mpckmeans(&data, &constraints, &MpcKMeansConfig::new(2)),
            Err(ClusterError::InvalidConstraint(_))
        ));
    }

    #[test]
    fn test_stops_at_max_iters() {
        let data = two_blobs();
        let config = MpcKMeansConfig::new(2)
            .with_max_iters(1)
            .with_tol(-1.0)
            .with_assigner(AssignerKind::Greedy);
        let result = run_mpckmeans(&data, &ConstraintStore::new(), &config).unwrap();
        assert_eq!(result.n_iterations, 1);
        assert_eq!(result.termination, Termination::MaxIterations);
    }

    #[test]
    fn test_empty_cluster_keeps_centroid() {
        let data = Instances::from_array(&array![[0.0], [0.1]].view());
        let assignments = vec![Some(0), Some(0)];
        let metrics = vec![Metric::new(&crate::metric::MetricConfig::default(), 1)];
        let mut centroids = vec![FeatureVector::dense(vec![3.0]), FeatureVector::dense(vec![9.0])];
        let empty = update_centroids(&data, &assignments, &metrics, &mut centroids).unwrap();
        assert_eq!(empty, 1);
        assert!((centroids[0].get(0) - 0.05).abs() < 1e-12);
        assert_eq!(centroids[1].get(0), 9.0);
    }

    #[test]
    fn test_learning_run_completes() {
        let data = two_blobs();
        let mut constraints = ConstraintStore::new();
        constraints.add(0, 1, LinkType::MustLink).unwrap();
        constraints.add(0, 3, LinkType::CannotLink).unwrap();
        for learning in [MetricLearning::ClosedForm, MetricLearning::gradient_descent()] {
            let config = MpcKMeansConfig::new(2)
                .with_metric_learning(learning)
                .with_multiple_metrics(true);
            let result = run_mpckmeans(&data, &constraints, &config).unwrap();
            assert_eq!(result.metrics.len(), 2);
            assert!(result
                .metrics
                .iter()
                .all(|m| m.weights().unwrap().iter().all(|&w| w > 0.0)));
            assert_eq!(result.assignments[0], result.assignments[1]);
        }
    }
}
