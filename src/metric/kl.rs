use super::{SimilarityConversion, MIN_WEIGHT};
use crate::dataset::FeatureVector;
use crate::error::ClusterError;
use ndarray::Array1;
use std::f64::consts::LN_2;

/// Weighted KL divergence (I-divergence by default) over non-negative features
#[derive(Debug, Clone)]
pub struct KlDivergence {
    pub(crate) weights: Array1<f64>,
    pub(crate) smoothing: f64,
    pub(crate) use_i_divergence: bool,
}

/// `x ln x` with the usual `0 ln 0 = 0` convention
fn x_ln_x(x: f64) -> f64 {
    if x > 0.0 {
        x * x.ln()
    } else {
        0.0
    }
}

impl KlDivergence {
    pub fn new(dim: usize, smoothing: f64, use_i_divergence: bool) -> Self {
        Self {
            weights: Array1::ones(dim),
            smoothing,
            use_i_divergence,
        }
    }

    /// Divergence term for one feature, `None` when `y` cannot support `x`
    fn term(&self, x: f64, y: f64) -> Option<f64> {
        if x > 0.0 && y <= 0.0 {
            return None;
        }
        let log_term = if x > 0.0 { x * (x / y).ln() } else { 0.0 };
        if self.use_i_divergence {
            Some(log_term - (x - y))
        } else {
            Some(log_term)
        }
    }

    /// Divergence of `a` from `b`; `f64::MAX` when `b` has zero mass where `a` does not
    pub fn distance(&self, a: &FeatureVector, b: &FeatureVector) -> Result<f64, ClusterError> {
        a.check_dim(self.weights.len())?;
        let mut sum = 0.0;
        let mut unsupported = false;
        a.zip_with(b, |i, x, y| match self.term(x, y) {
            Some(term) => sum += self.weights[i] * term,
            None => unsupported = true,
        })?;
        if unsupported {
            return Ok(f64::MAX);
        }
        Ok(sum.max(0.0))
    }

    pub fn similarity(&self, a: &FeatureVector, b: &FeatureVector) -> Result<f64, ClusterError> {
        Ok(SimilarityConversion::Laplacian.convert(self.distance(a, b)?))
    }

    /// Weighted Jensen-Shannon divergence in bits
    pub fn jensen_shannon(
        &self,
        a: &FeatureVector,
        b: &FeatureVector,
    ) -> Result<f64, ClusterError> {
        Ok(self.js_components(a, b)?.dot(&self.weights))
    }

    /// Unweighted divergence term per feature. Unsupported features contribute 0.
    pub fn diff_components(
        &self,
        a: &FeatureVector,
        b: &FeatureVector,
    ) -> Result<Array1<f64>, ClusterError> {
        a.check_dim(self.weights.len())?;
        let mut components = Array1::zeros(self.weights.len());
        a.zip_with(b, |i, x, y| components[i] = self.term(x, y).unwrap_or(0.0))?;
        Ok(components)
    }

    /// Unweighted Jensen-Shannon term per feature
    pub fn js_components(
        &self,
        a: &FeatureVector,
        b: &FeatureVector,
    ) -> Result<Array1<f64>, ClusterError> {
        a.check_dim(self.weights.len())?;
        let mut components = Array1::zeros(self.weights.len());
        a.zip_with(b, |i, x, y| {
            let mean = 0.5 * (x + y);
            let term = x_ln_x(x) + x_ln_x(y) - 2.0 * x_ln_x(mean);
            components[i] = (term / (2.0 * LN_2)).max(0.0);
        })?;
        Ok(components)
    }

    /// Mix a centroid with the uniform distribution so no feature has zero mass
    pub fn smooth(&self, centroid: &mut FeatureVector) {
        if self.smoothing <= 0.0 {
            return;
        }
        let dim = centroid.dim();
        let alpha = self.smoothing;
        let mut dense = centroid.to_dense();
        dense.mapv_inplace(|v| (v + alpha / dim as f64) / (1.0 + alpha));
        *centroid = FeatureVector::Dense(dense);
    }

    pub fn step_weight(&mut self, index: usize, delta: f64) {
        self.weights[index] = (self.weights[index] - delta).max(MIN_WEIGHT);
    }
}
