use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Prior over learnable metric weights.
///
/// `compute` returns a log-penalty term where more negative is worse. A weight
/// vector the prior cannot score (non-positive weights) yields
/// [`Regularizer::INVALID`] instead of an error so that a learner can simply
/// reject that configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Regularizer {
    /// Inverse-magnitude penalty `-Σ 1/|w|`
    L1,
    /// Rayleigh prior with scale `s`
    Rayleigh { scale: f64 },
}

impl Default for Regularizer {
    fn default() -> Self {
        Regularizer::Rayleigh { scale: 1.0 }
    }
}

impl Regularizer {
    /// Sentinel for weight vectors the prior cannot score
    pub const INVALID: f64 = f64::MIN;

    /// Log-penalty of a whole weight vector
    pub fn compute(&self, weights: &Array1<f64>) -> f64 {
        match *self {
            Regularizer::L1 => {
                let mut sum = 0.0;
                for &w in weights.iter() {
                    if w == 0.0 {
                        return Self::INVALID;
                    }
                    sum -= 1.0 / w.abs();
                }
                sum
            }
            Regularizer::Rayleigh { scale } => {
                let two_s_squared = 2.0 * scale * scale;
                let mut sum = 0.0;
                for &w in weights.iter() {
                    if w <= 0.0 {
                        return Self::INVALID;
                    }
                    sum += w.ln() - w * w / two_s_squared;
                }
                sum - weights.len() as f64 * 2.0 * scale.ln()
            }
        }
    }

    /// Derivative of the log-penalty with respect to a single weight.
    ///
    /// Zero weights have no defined gradient and return 0.
    pub fn gradient(&self, weight: f64) -> f64 {
        if weight == 0.0 {
            return 0.0;
        }
        match *self {
            Regularizer::L1 => -1.0 / (weight * weight),
            Regularizer::Rayleigh { scale } => 1.0 / weight - weight / (scale * scale),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_rayleigh_value() {
        let reg = Regularizer::Rayleigh { scale: 1.0 };
        let value = reg.compute(&array![1.0, 1.0]);
        assert_relative_eq!(value, -1.0);
    }

    #[test]
    fn test_rayleigh_rejects_non_positive() {
        let reg = Regularizer::Rayleigh { scale: 2.0 };
        assert_eq!(reg.compute(&array![1.0, 0.0]), Regularizer::INVALID);
        assert_eq!(reg.compute(&array![-1.0, 1.0]), Regularizer::INVALID);
    }

    #[test]
    fn test_rayleigh_gradient_zero_at_mode() {
        let reg = Regularizer::Rayleigh { scale: 2.0 };
        assert_relative_eq!(reg.gradient(2.0), 0.0);
        assert!(reg.gradient(1.0) > 0.0);
        assert!(reg.gradient(3.0) < 0.0);
    }

    #[test]
    fn test_l1_value_and_gradient() {
        let reg = Regularizer::L1;
        assert_relative_eq!(reg.compute(&array![1.0, -2.0]), -1.5);
        assert_eq!(reg.compute(&array![0.0, 1.0]), Regularizer::INVALID);
        assert_relative_eq!(reg.gradient(2.0), -0.25);
        assert_eq!(reg.gradient(0.0), 0.0);
    }

    #[test]
    fn test_variants_share_interface() {
        let weights = array![0.5, 1.5];
        for reg in [Regularizer::L1, Regularizer::Rayleigh { scale: 1.0 }] {
            let value = reg.compute(&weights);
            assert!(value.is_finite());
            assert!(value > Regularizer::INVALID);
        }
    }
}
