//! Cluster a dense `.npy` matrix under pairwise constraints.
//!
//! Constraints are read from a text file with one `i j ML|CL [cost]` entry
//! per line; blank lines and lines starting with `#` are skipped. The
//! optional configuration is a JSON object whose fields override
//! [`MpcKMeansConfig::default`].
//!
//! Usage: `mpckmeans-cluster <data.npy> <constraints.txt> <output.npy> [config.json]`
//!
//! Set `RUST_LOG=mpckmeans_rs=debug` to follow the iterations.

use mpckmeans_rs::{ConstraintStore, Instances, LinkType, MpcKMeans, MpcKMeansConfig};
use ndarray::{Array1, Array2};
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use std::env;
use std::fs::{self, File};
use std::io::BufReader;
use tracing_subscriber::EnvFilter;

fn parse_constraints(text: &str) -> Result<ConstraintStore, Box<dyn std::error::Error>> {
    let mut store = ConstraintStore::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields.len() > 4 {
            return Err(format!("line {}: expected `i j ML|CL [cost]`", line_no + 1).into());
        }
        let i: usize = fields[0].parse()?;
        let j: usize = fields[1].parse()?;
        let link = match fields[2].to_ascii_uppercase().as_str() {
            "ML" => LinkType::MustLink,
            "CL" => LinkType::CannotLink,
            other => return Err(format!("line {}: unknown link type {}", line_no + 1, other).into()),
        };
        let cost: f64 = match fields.get(3) {
            Some(field) => field.parse()?,
            None => 1.0,
        };
        store.add_with_cost(i, j, link, cost)?;
    }
    Ok(store)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() != 4 && args.len() != 5 {
        eprintln!(
            "Usage: {} <data.npy> <constraints.txt> <output.npy> [config.json]",
            args[0]
        );
        std::process::exit(1);
    }

    let data_path = &args[1];
    let constraints_path = &args[2];
    let output_path = &args[3];

    let config: MpcKMeansConfig = match args.get(4) {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => MpcKMeansConfig::default(),
    };

    let reader = BufReader::new(File::open(data_path)?);
    let data: Array2<f64> = Array2::read_npy(reader)?;
    let constraints = parse_constraints(&fs::read_to_string(constraints_path)?)?;

    eprintln!(
        "Loaded data: {} samples x {} features, {} constraints",
        data.nrows(),
        data.ncols(),
        constraints.len()
    );
    eprintln!(
        "Running with k={}, assigner={:?}, metric={:?}",
        config.k, config.assigner, config.metric
    );

    let instances = Instances::from_array(&data.view());
    let mut model = MpcKMeans::with_config(config).with_constraints(constraints);
    let labels = model.fit_predict(&instances)?;

    if let (Some(iterations), Some(termination)) = (model.n_iterations(), model.termination()) {
        eprintln!("Finished after {} iterations: {:?}", iterations, termination);
    }

    let labels: Array1<i64> = labels.iter().map(|&l| l as i64).collect();
    let writer = File::create(output_path)?;
    labels.write_npy(writer)?;

    eprintln!("Saved assignments to {}", output_path);

    Ok(())
}
