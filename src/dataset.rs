//! Read-only view of the instances being clustered.
//!
//! The clustering core only ever needs per-row feature vectors, a per-row
//! weight and an optional class label, so that is all the [`Dataset`] trait
//! exposes. [`Instances`] is the owned implementation used by the engine and
//! the binary.

use crate::error::ClusterError;
use ndarray::{Array1, ArrayView2};
use std::collections::BTreeMap;

/// A numeric feature vector, stored densely or as sorted `(index, value)` pairs.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureVector {
    Dense(Array1<f64>),
    Sparse {
        dim: usize,
        indices: Vec<usize>,
        values: Vec<f64>,
    },
}

impl FeatureVector {
    /// Create a dense vector from raw values
    pub fn dense(values: Vec<f64>) -> Self {
        FeatureVector::Dense(Array1::from(values))
    }

    /// Create a sparse vector of length `dim` from `(index, value)` entries.
    ///
    /// Entries may come in any order. Zero values are dropped. Duplicate or
    /// out-of-range indices are rejected.
    pub fn sparse(dim: usize, mut entries: Vec<(usize, f64)>) -> Result<Self, ClusterError> {
        entries.sort_by_key(|&(idx, _)| idx);
        let mut indices = Vec::with_capacity(entries.len());
        let mut values = Vec::with_capacity(entries.len());
        for (idx, value) in entries {
            if idx >= dim {
                return Err(ClusterError::DimensionMismatch {
                    expected: dim,
                    found: idx + 1,
                });
            }
            if indices.last() == Some(&idx) {
                return Err(ClusterError::invalid_parameter(
                    "entries",
                    format!("duplicate sparse index {}", idx),
                ));
            }
            if value != 0.0 {
                indices.push(idx);
                values.push(value);
            }
        }
        Ok(FeatureVector::Sparse {
            dim,
            indices,
            values,
        })
    }

    /// Length of the feature space this vector lives in
    pub fn dim(&self) -> usize {
        match self {
            FeatureVector::Dense(values) => values.len(),
            FeatureVector::Sparse { dim, .. } => *dim,
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, FeatureVector::Sparse { .. })
    }

    /// Value at position `i` (zero for absent sparse entries)
    pub fn get(&self, i: usize) -> f64 {
        match self {
            FeatureVector::Dense(values) => values.get(i).copied().unwrap_or(0.0),
            FeatureVector::Sparse {
                indices, values, ..
            } => match indices.binary_search(&i) {
                Ok(pos) => values[pos],
                Err(_) => 0.0,
            },
        }
    }

    pub fn to_dense(&self) -> Array1<f64> {
        match self {
            FeatureVector::Dense(values) => values.clone(),
            FeatureVector::Sparse {
                dim,
                indices,
                values,
            } => {
                let mut dense = Array1::zeros(*dim);
                for (&idx, &value) in indices.iter().zip(values.iter()) {
                    dense[idx] = value;
                }
                dense
            }
        }
    }

    /// Visit every stored value. Dense vectors visit all positions.
    pub fn for_each_value(&self, mut f: impl FnMut(usize, f64)) {
        match self {
            FeatureVector::Dense(values) => {
                for (i, &value) in values.iter().enumerate() {
                    f(i, value);
                }
            }
            FeatureVector::Sparse {
                indices, values, ..
            } => {
                for (&idx, &value) in indices.iter().zip(values.iter()) {
                    f(idx, value);
                }
            }
        }
    }

    /// Fail unless this vector has `expected` features
    pub fn check_dim(&self, expected: usize) -> Result<(), ClusterError> {
        if self.dim() != expected {
            return Err(ClusterError::DimensionMismatch {
                expected,
                found: self.dim(),
            });
        }
        Ok(())
    }

    /// Visit `(index, self[index], other[index])` for every index where at
    /// least one side may be non-zero. Positions absent from both sparse
    /// vectors are skipped.
    pub fn zip_with(
        &self,
        other: &FeatureVector,
        mut f: impl FnMut(usize, f64, f64),
    ) -> Result<(), ClusterError> {
        other.check_dim(self.dim())?;
        match (self, other) {
            (FeatureVector::Dense(a), FeatureVector::Dense(b)) => {
                for (i, (&x, &y)) in a.iter().zip(b.iter()).enumerate() {
                    f(i, x, y);
                }
            }
            (
                FeatureVector::Dense(a),
                FeatureVector::Sparse {
                    indices, values, ..
                },
            ) => {
                let mut cursor = 0;
                for (i, &x) in a.iter().enumerate() {
                    let y = if cursor < indices.len() && indices[cursor] == i {
                        cursor += 1;
                        values[cursor - 1]
                    } else {
                        0.0
                    };
                    f(i, x, y);
                }
            }
            (
                FeatureVector::Sparse {
                    indices, values, ..
                },
                FeatureVector::Dense(b),
            ) => {
                let mut cursor = 0;
                for (i, &y) in b.iter().enumerate() {
                    let x = if cursor < indices.len() && indices[cursor] == i {
                        cursor += 1;
                        values[cursor - 1]
                    } else {
                        0.0
                    };
                    f(i, x, y);
                }
            }
            (
                FeatureVector::Sparse {
                    indices: ia,
                    values: va,
                    ..
                },
                FeatureVector::Sparse {
                    indices: ib,
                    values: vb,
                    ..
                },
            ) => {
                let (mut p, mut q) = (0, 0);
                while p < ia.len() || q < ib.len() {
                    let next_a = ia.get(p).copied().unwrap_or(usize::MAX);
                    let next_b = ib.get(q).copied().unwrap_or(usize::MAX);
                    if next_a == next_b {
                        f(next_a, va[p], vb[q]);
                        p += 1;
                        q += 1;
                    } else if next_a < next_b {
                        f(next_a, va[p], 0.0);
                        p += 1;
                    } else {
                        f(next_b, 0.0, vb[q]);
                        q += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Euclidean length of the vector
    pub fn norm(&self) -> f64 {
        let mut sum = 0.0;
        self.for_each_value(|_, v| sum += v * v);
        sum.sqrt()
    }

    /// Scale in place to unit length. Zero vectors are left untouched.
    pub fn normalize(&mut self) {
        let norm = self.norm();
        if norm > 0.0 {
            self.map_inplace(|v| v / norm);
        }
    }

    /// Apply `f` to every stored value
    pub fn map_inplace(&mut self, f: impl Fn(f64) -> f64) {
        match self {
            FeatureVector::Dense(values) => values.mapv_inplace(f),
            FeatureVector::Sparse { values, .. } => {
                for v in values.iter_mut() {
                    *v = f(*v);
                }
            }
        }
    }
}

impl From<Array1<f64>> for FeatureVector {
    fn from(values: Array1<f64>) -> Self {
        FeatureVector::Dense(values)
    }
}

/// One row of the dataset
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub features: FeatureVector,
    pub weight: f64,
    pub label: Option<usize>,
}

impl Instance {
    /// An unlabeled instance with unit weight
    pub fn new(features: FeatureVector) -> Self {
        Self {
            features,
            weight: 1.0,
            label: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_label(mut self, label: usize) -> Self {
        self.label = Some(label);
        self
    }
}

/// Read-only access to the rows being clustered
pub trait Dataset: Send + Sync {
    fn num_instances(&self) -> usize;

    /// Number of features shared by every row
    fn dimension(&self) -> usize;

    fn instance(&self, index: usize) -> &Instance;

    fn features(&self, index: usize) -> &FeatureVector {
        &self.instance(index).features
    }

    fn is_empty(&self) -> bool {
        self.num_instances() == 0
    }
}

/// Owned, validated collection of instances
#[derive(Debug, Clone, Default)]
pub struct Instances {
    rows: Vec<Instance>,
    dim: usize,
}

impl Instances {
    /// Build unit-weight dense instances from the rows of a matrix
    pub fn from_array(data: &ArrayView2<f64>) -> Self {
        let rows = data
            .outer_iter()
            .map(|row| Instance::new(FeatureVector::Dense(row.to_owned())))
            .collect();
        Self {
            rows,
            dim: data.ncols(),
        }
    }

    /// Validate and wrap a list of instances.
    ///
    /// All rows must share one dimension and carry a finite, non-negative weight.
    pub fn from_instances(rows: Vec<Instance>) -> Result<Self, ClusterError> {
        let dim = rows.first().map(|row| row.features.dim()).unwrap_or(0);
        for (i, row) in rows.iter().enumerate() {
            row.features.check_dim(dim)?;
            if !row.weight.is_finite() || row.weight < 0.0 {
                return Err(ClusterError::invalid_parameter(
                    "weight",
                    format!("instance {} has weight {}", i, row.weight),
                ));
            }
        }
        Ok(Self { rows, dim })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.rows.iter()
    }
}

impl Dataset for Instances {
    fn num_instances(&self) -> usize {
        self.rows.len()
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn instance(&self, index: usize) -> &Instance {
        &self.rows[index]
    }
}

/// Weighted mean of a group of instances.
///
/// Returns `None` for an empty group or one whose weights sum to zero. The
/// mean stays sparse when every member is sparse, accumulating only the
/// indices that actually occur.
pub fn weighted_mean<'a>(
    members: impl IntoIterator<Item = &'a Instance>,
    dim: usize,
) -> Result<Option<FeatureVector>, ClusterError> {
    let mut dense_sum: Option<Array1<f64>> = None;
    let mut sparse_sum: BTreeMap<usize, f64> = BTreeMap::new();
    let mut total_weight = 0.0;

    for member in members {
        member.features.check_dim(dim)?;
        let w = member.weight;
        total_weight += w;
        match &member.features {
            FeatureVector::Dense(values) => {
                let sum = dense_sum.get_or_insert_with(|| Array1::zeros(dim));
                sum.scaled_add(w, values);
            }
            FeatureVector::Sparse {
                indices, values, ..
            } => {
                for (&idx, &value) in indices.iter().zip(values.iter()) {
                    *sparse_sum.entry(idx).or_insert(0.0) += w * value;
                }
            }
        }
    }

    if total_weight <= 0.0 {
        return Ok(None);
    }

    let mean = match dense_sum {
        Some(mut sum) => {
            for (idx, value) in sparse_sum {
                sum[idx] += value;
            }
            sum.mapv_inplace(|v| v / total_weight);
            FeatureVector::Dense(sum)
        }
        None => {
            let (indices, values): (Vec<usize>, Vec<f64>) = sparse_sum
                .into_iter()
                .filter(|&(_, v)| v != 0.0)
                .map(|(idx, v)| (idx, v / total_weight))
                .unzip();
            FeatureVector::Sparse {
                dim,
                indices,
                values,
            }
        }
    };
    Ok(Some(mean))
}

/// Unweighted mean over every instance of the dataset, always dense
pub fn global_mean(data: &dyn Dataset) -> Array1<f64> {
    let mut sum = Array1::zeros(data.dimension());
    let n = data.num_instances();
    for i in 0..n {
        data.features(i).for_each_value(|idx, v| sum[idx] += v);
    }
    if n > 0 {
        sum.mapv_inplace(|v| v / n as f64);
    }
    sum
}

/// Per-feature minimum and maximum over the dataset, as dense corner vectors.
///
/// Sparse rows contribute an implicit zero for every missing index.
pub fn bounding_box(data: &dyn Dataset) -> (FeatureVector, FeatureVector) {
    let dim = data.dimension();
    let n = data.num_instances();
    let mut min = Array1::from_elem(dim, f64::INFINITY);
    let mut max = Array1::from_elem(dim, f64::NEG_INFINITY);
    let mut stored = vec![0usize; dim];

    for i in 0..n {
        data.features(i).for_each_value(|idx, v| {
            stored[idx] += 1;
            min[idx] = min[idx].min(v);
            max[idx] = max[idx].max(v);
        });
    }
    for idx in 0..dim {
        if stored[idx] < n {
            min[idx] = min[idx].min(0.0);
            max[idx] = max[idx].max(0.0);
        }
        if stored[idx] == 0 {
            min[idx] = 0.0;
            max[idx] = 0.0;
        }
    }
    (FeatureVector::Dense(min), FeatureVector::Dense(max))
}
