use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mpckmeans_rs::{
    AssignerKind, ConstraintStore, InferenceMode, Instances, LinkType, MetricLearning, MpcKMeans,
    MpcKMeansConfig,
};
use ndarray::Array2;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

fn random_instances(n_samples: usize, n_features: usize, seed: u64) -> Instances {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let data = Array2::random_using((n_samples, n_features), Uniform::new(-1.0, 1.0), &mut rng);
    Instances::from_array(&data.view())
}

/// Random constraints over `n_samples` instances; duplicates are skipped
fn random_constraints(n_samples: usize, n_constraints: usize, seed: u64) -> ConstraintStore {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut store = ConstraintStore::new();
    while store.len() < n_constraints {
        let i = rng.gen_range(0..n_samples);
        let j = rng.gen_range(0..n_samples);
        let link = if rng.gen_bool(0.5) {
            LinkType::MustLink
        } else {
            LinkType::CannotLink
        };
        let _ = store.add(i, j, link);
    }
    store
}

fn benchmark_assigners(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpckmeans_assigners");
    group.sample_size(10);
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_secs(2));

    let n_samples = 2_000;
    let data = random_instances(n_samples, 16, 1);
    let constraints = random_constraints(n_samples, 200, 2);
    let assigners = [
        ("greedy", AssignerKind::Greedy),
        ("constrained", AssignerKind::Constrained),
        ("sorted", AssignerKind::Sorted),
        ("probabilistic", AssignerKind::Probabilistic),
    ];

    for (name, kind) in assigners.iter() {
        group.throughput(Throughput::Elements(n_samples as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), kind, |b, &kind| {
            let config = MpcKMeansConfig::new(10)
                .with_assigner(kind)
                .with_max_iters(5)
                .with_tol(-1.0);

            b.iter(|| {
                let mut model =
                    MpcKMeans::with_config(config.clone()).with_constraints(constraints.clone());
                model.fit(black_box(&data)).unwrap();
                model.n_iterations()
            });
        });
    }
    group.finish();
}

fn benchmark_constraint_counts(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpckmeans_constraints");
    group.sample_size(10);
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_secs(2));

    let n_samples = 2_000;
    let data = random_instances(n_samples, 16, 3);
    let constraint_counts = [50, 200, 800];

    for n_constraints in constraint_counts.iter() {
        group.throughput(Throughput::Elements(*n_constraints as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(n_constraints),
            n_constraints,
            |b, &n_constraints| {
                let constraints = random_constraints(n_samples, n_constraints, 4);
                let config = MpcKMeansConfig::new(10)
                    .with_assigner(AssignerKind::Probabilistic)
                    .with_inference_mode(InferenceMode::Approximate)
                    .with_max_iters(5)
                    .with_tol(-1.0);

                b.iter(|| {
                    let mut model = MpcKMeans::with_config(config.clone())
                        .with_constraints(constraints.clone());
                    model.fit(black_box(&data)).unwrap();
                    model.n_iterations()
                });
            },
        );
    }
    group.finish();
}

fn benchmark_metric_learning(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpckmeans_learning");
    group.sample_size(10);
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_secs(2));

    let n_samples = 1_000;
    let data = random_instances(n_samples, 8, 5);
    let constraints = random_constraints(n_samples, 100, 6);
    let modes = [
        ("closed_form", MetricLearning::ClosedForm),
        ("gradient", MetricLearning::gradient_descent()),
    ];

    for (name, learning) in modes.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(name), learning, |b, &learning| {
            let config = MpcKMeansConfig::new(8)
                .with_metric_learning(learning)
                .with_multiple_metrics(true)
                .with_max_iters(5)
                .with_tol(-1.0);

            b.iter(|| {
                let mut model =
                    MpcKMeans::with_config(config.clone()).with_constraints(constraints.clone());
                model.fit(black_box(&data)).unwrap();
                model.n_iterations()
            });
        });
    }
    group.finish();
}

fn benchmark_predict(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpckmeans_predict");
    group.sample_size(10);
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_secs(2));

    let n_train = 2_000;
    let n_features = 16;
    let predict_sizes = [1_000, 5_000];

    // Pre-train the model
    let train = random_instances(n_train, n_features, 7);
    let mut model = MpcKMeans::with_config(MpcKMeansConfig::new(20).with_max_iters(10))
        .with_constraints(random_constraints(n_train, 100, 8));
    model.fit(&train).unwrap();

    for n_predict in predict_sizes.iter() {
        group.throughput(Throughput::Elements(*n_predict as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(n_predict),
            n_predict,
            |b, &n_predict| {
                let test = random_instances(n_predict, n_features, 9);
                b.iter(|| model.predict(black_box(&test)).unwrap());
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_assigners,
    benchmark_constraint_counts,
    benchmark_metric_learning,
    benchmark_predict,
);
criterion_main!(benches);
