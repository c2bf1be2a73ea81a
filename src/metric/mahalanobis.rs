use super::SimilarityConversion;
use crate::dataset::FeatureVector;
use crate::error::ClusterError;
use ndarray::{Array1, Array2};

/// Mahalanobis distance `sqrt(dᵀ A d)` under a learned positive-definite matrix
#[derive(Debug, Clone)]
pub struct WeightedMahalanobis {
    pub(crate) matrix: Array2<f64>,
    pub(crate) log_det: f64,
}

impl WeightedMahalanobis {
    /// Identity matrix, which reduces to plain Euclidean distance
    pub fn new(dim: usize) -> Self {
        Self {
            matrix: Array2::eye(dim),
            log_det: 0.0,
        }
    }

    pub fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    /// Dense difference vector `a - b`
    pub fn difference(
        &self,
        a: &FeatureVector,
        b: &FeatureVector,
    ) -> Result<Array1<f64>, ClusterError> {
        super::dense_difference(self.dim(), a, b)
    }

    pub fn distance(&self, a: &FeatureVector, b: &FeatureVector) -> Result<f64, ClusterError> {
        let diff = self.difference(a, b)?;
        let quad = diff.dot(&self.matrix.dot(&diff));
        Ok(quad.max(0.0).sqrt())
    }

    pub fn similarity(&self, a: &FeatureVector, b: &FeatureVector) -> Result<f64, ClusterError> {
        Ok(SimilarityConversion::Laplacian.convert(self.distance(a, b)?))
    }

    /// Squared difference per feature
    pub fn diff_components(
        &self,
        a: &FeatureVector,
        b: &FeatureVector,
    ) -> Result<Array1<f64>, ClusterError> {
        Ok(self.difference(a, b)?.mapv(|d| d * d))
    }

    /// Replace the matrix. The caller supplies `ln det` of the new matrix.
    pub fn set_matrix(&mut self, matrix: Array2<f64>, log_det: f64) -> Result<(), ClusterError> {
        if matrix.nrows() != self.dim() || matrix.ncols() != self.dim() {
            return Err(ClusterError::DimensionMismatch {
                expected: self.dim(),
                found: matrix.nrows().max(matrix.ncols()),
            });
        }
        self.matrix = matrix;
        self.log_det = log_det;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_identity_is_euclidean() {
        let metric = WeightedMahalanobis::new(2);
        let a = FeatureVector::dense(vec![0.0, 0.0]);
        let b = FeatureVector::dense(vec![3.0, 4.0]);
        assert_relative_eq!(metric.distance(&a, &b).unwrap(), 5.0);
    }

    #[test]
    fn test_scaled_matrix() {
        let mut metric = WeightedMahalanobis::new(2);
        metric
            .set_matrix(array![[4.0, 0.0], [0.0, 1.0]], 4.0f64.ln())
            .unwrap();
        let a = FeatureVector::dense(vec![1.0, 0.0]);
        let b = FeatureVector::dense(vec![0.0, 0.0]);
        assert_relative_eq!(metric.distance(&a, &b).unwrap(), 2.0);
    }

    #[test]
    fn test_set_matrix_rejects_wrong_shape() {
        let mut metric = WeightedMahalanobis::new(2);
        assert!(metric.set_matrix(Array2::eye(3), 0.0).is_err());
    }
}
