//! Initial centroids and assignments.

use crate::config::InitKind;
use crate::constraints::ConstraintStore;
use crate::dataset::{global_mean, weighted_mean, Dataset, FeatureVector};
use crate::error::ClusterError;
use crate::metric::Metric;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

/// Relative amplitude of the perturbation applied to the global mean
const PERTURBATION: f64 = 0.7;

/// Starting point of a run
#[derive(Debug, Clone)]
pub struct Initialization {
    pub centroids: Vec<FeatureVector>,
    /// Instances seeded into a cluster; everything else starts unassigned
    pub assignments: Vec<Option<usize>>,
}

/// Choose `k` centroids with the selected strategy
pub fn initialize(
    kind: InitKind,
    data: &dyn Dataset,
    k: usize,
    metric: &Metric,
    constraints: &ConstraintStore,
    rng: &mut ChaCha8Rng,
) -> Result<Initialization, ClusterError> {
    let mut init = match kind {
        InitKind::NeighborhoodFarthestFirst => {
            neighborhood_farthest_first(data, k, metric, constraints, rng)?
        }
        InitKind::Random => random(data, k, rng),
        InitKind::FarthestFirst => farthest_first(data, k, metric, rng)?,
    };
    for centroid in init.centroids.iter_mut() {
        metric.prepare_centroid(centroid);
    }
    Ok(init)
}

/// `k` distinct instances picked uniformly at random
fn random(data: &dyn Dataset, k: usize, rng: &mut ChaCha8Rng) -> Initialization {
    let n = data.num_instances();
    let indices: Vec<usize> = (0..n).collect();
    let centroids = indices
        .choose_multiple(rng, k)
        .map(|&i| data.features(i).clone())
        .collect();
    Initialization {
        centroids,
        assignments: vec![None; n],
    }
}

/// Farthest-first traversal over single instances, constraints ignored.
///
/// The first centroid is a random instance. Each next one is the instance
/// whose distance to its nearest chosen centroid is largest, ties to the
/// lowest index.
fn farthest_first(
    data: &dyn Dataset,
    k: usize,
    metric: &Metric,
    rng: &mut ChaCha8Rng,
) -> Result<Initialization, ClusterError> {
    let n = data.num_instances();
    let mut centroids = Vec::with_capacity(k);
    if n == 0 {
        return Ok(Initialization {
            centroids,
            assignments: Vec::new(),
        });
    }

    let mut selected = vec![false; n];
    let mut nearest = vec![f64::INFINITY; n];
    let mut next = rng.gen_range(0..n);
    while centroids.len() < k {
        selected[next] = true;
        let centroid = data.features(next);
        for i in (0..n).filter(|&i| !selected[i]) {
            nearest[i] = nearest[i].min(metric.distance(data.features(i), centroid)?);
        }
        centroids.push(centroid.clone());

        let mut best: Option<(usize, f64)> = None;
        for i in (0..n).filter(|&i| !selected[i]) {
            if best.map_or(true, |(_, b)| nearest[i] > b) {
                best = Some((i, nearest[i]));
            }
        }
        match best {
            Some((i, _)) => next = i,
            None => break,
        }
    }
    debug!(chosen = centroids.len(), "Initialized centroids farthest-first");

    Ok(Initialization {
        centroids,
        assignments: vec![None; n],
    })
}

/// Seed centroids from must-link neighborhoods.
///
/// With at least `k` neighborhoods, the largest is taken first and each next
/// one maximizes its size times its distance to the nearest chosen centroid.
/// With fewer, every neighborhood becomes a centroid and the rest are random
/// perturbations of the global mean.
fn neighborhood_farthest_first(
    data: &dyn Dataset,
    k: usize,
    metric: &Metric,
    constraints: &ConstraintStore,
    rng: &mut ChaCha8Rng,
) -> Result<Initialization, ClusterError> {
    let n = data.num_instances();
    let dim = data.dimension();
    let neighborhoods = constraints.must_link_neighborhoods();

    let mut means = Vec::with_capacity(neighborhoods.len());
    for members in &neighborhoods {
        let mean = weighted_mean(members.iter().map(|&i| data.instance(i)), dim)?;
        means.push(mean.unwrap_or_else(|| data.features(members[0]).clone()));
    }

    let chosen: Vec<usize> = if neighborhoods.len() >= k {
        let mut chosen = Vec::with_capacity(k);
        let mut largest = 0;
        for (g, members) in neighborhoods.iter().enumerate() {
            if members.len() > neighborhoods[largest].len() {
                largest = g;
            }
        }
        chosen.push(largest);

        while chosen.len() < k {
            let mut best: Option<(usize, f64)> = None;
            for g in (0..neighborhoods.len()).filter(|g| !chosen.contains(g)) {
                let mut nearest = f64::INFINITY;
                for &c in &chosen {
                    nearest = nearest.min(metric.distance(&means[g], &means[c])?);
                }
                let score = neighborhoods[g].len() as f64 * nearest;
                if best.map_or(true, |(_, b)| score > b) {
                    best = Some((g, score));
                }
            }
            match best {
                Some((g, _)) => chosen.push(g),
                None => break,
            }
        }
        chosen
    } else {
        (0..neighborhoods.len()).collect()
    };

    let mut centroids = Vec::with_capacity(k);
    let mut assignments = vec![None; n];
    for (cluster, &g) in chosen.iter().enumerate() {
        centroids.push(means[g].clone());
        for &member in &neighborhoods[g] {
            assignments[member] = Some(cluster);
        }
    }

    let seeded = centroids.len();
    if seeded < k {
        let mean = global_mean(data);
        while centroids.len() < k {
            let perturbed = mean.mapv(|v| v * (1.0 + PERTURBATION * (rng.gen::<f64>() - 0.5)));
            centroids.push(FeatureVector::Dense(perturbed));
        }
    }
    debug!(
        neighborhoods = neighborhoods.len(),
        seeded,
        random = k - seeded,
        "Initialized centroids"
    );

    Ok(Initialization {
        centroids,
        assignments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::LinkType;
    use crate::dataset::Instances;
    use crate::metric::MetricConfig;
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::SeedableRng;

    fn line() -> Instances {
        Instances::from_array(&array![[0.0], [1.0], [5.0], [6.0], [10.0], [11.0], [20.0]].view())
    }

    #[test]
    fn test_random_picks_distinct_instances() {
        let data = line();
        let metric = Metric::new(&MetricConfig::default(), 1);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let init = initialize(InitKind::Random, &data, 4, &metric, &ConstraintStore::new(), &mut rng)
            .unwrap();
        assert_eq!(init.centroids.len(), 4);
        let mut values: Vec<f64> = init.centroids.iter().map(|c| c.get(0)).collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup();
        assert_eq!(values.len(), 4);
        assert!(init.assignments.iter().all(Option::is_none));
    }

    #[test]
    fn test_farthest_first_prefers_large_distant_neighborhoods() {
        let data = line();
        let metric = Metric::new(&MetricConfig::default(), 1);
        let mut constraints = ConstraintStore::new();
        constraints.add(0, 1, LinkType::MustLink).unwrap();
        constraints.add(2, 3, LinkType::MustLink).unwrap();
        constraints.add(4, 5, LinkType::MustLink).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let init = initialize(
            InitKind::NeighborhoodFarthestFirst,
            &data,
            2,
            &metric,
            &constraints,
            &mut rng,
        )
        .unwrap();

        // All neighborhoods have size 2; the first wins the tie, the farthest follows
        assert_relative_eq!(init.centroids[0].get(0), 0.5);
        assert_relative_eq!(init.centroids[1].get(0), 10.5);
        assert_eq!(init.assignments[0], Some(0));
        assert_eq!(init.assignments[5], Some(1));
        assert_eq!(init.assignments[2], None);
    }

    #[test]
    fn test_few_neighborhoods_fill_with_perturbed_mean() {
        let data = line();
        let metric = Metric::new(&MetricConfig::default(), 1);
        let mut constraints = ConstraintStore::new();
        constraints.add(0, 1, LinkType::MustLink).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let init = initialize(
            InitKind::NeighborhoodFarthestFirst,
            &data,
            3,
            &metric,
            &constraints,
            &mut rng,
        )
        .unwrap();

        assert_eq!(init.centroids.len(), 3);
        assert_relative_eq!(init.centroids[0].get(0), 0.5);
        let mean = 53.0 / 7.0;
        for centroid in &init.centroids[1..] {
            let v = centroid.get(0);
            assert!(v >= mean * 0.65 && v <= mean * 1.35, "{}", v);
        }
    }

    #[test]
    fn test_plain_farthest_first_covers_separated_groups() {
        let data = Instances::from_array(
            &array![[0.0], [0.1], [50.0], [50.1], [100.0], [100.1]].view(),
        );
        let metric = Metric::new(&MetricConfig::default(), 1);
        let mut constraints = ConstraintStore::new();
        constraints.add(0, 1, LinkType::MustLink).unwrap();

        for seed in 0..10 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let init =
                initialize(InitKind::FarthestFirst, &data, 3, &metric, &constraints, &mut rng)
                    .unwrap();
            let mut groups: Vec<i64> = init
                .centroids
                .iter()
                .map(|c| (c.get(0) / 50.0).round() as i64)
                .collect();
            groups.sort_unstable();
            assert_eq!(groups, vec![0, 1, 2], "seed {}", seed);
            assert!(init.assignments.iter().all(Option::is_none));
        }
    }

    #[test]
    fn test_plain_farthest_first_takes_extremes_second() {
        let data = line();
        let metric = Metric::new(&MetricConfig::default(), 1);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let init = initialize(
            InitKind::FarthestFirst,
            &data,
            2,
            &metric,
            &ConstraintStore::new(),
            &mut rng,
        )
        .unwrap();
        let first = init.centroids[0].get(0);
        let expected = if first >= 10.0 { 0.0 } else { 20.0 };
        assert_relative_eq!(init.centroids[1].get(0), expected);
    }
}
