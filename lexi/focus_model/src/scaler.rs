use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::{
    error::TrainingError,
    features::{FeatureVector, FEATURE_COUNT},
};

/// Per-feature standardisation statistics fit on the training split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl StandardScaler {
    /// Fits column means and population standard deviations.
    ///
    /// A zero (or non-finite) standard deviation is stored as `1.0`, so that
    /// column is only shifted by its mean.
    pub fn fit(x: &Array2<f64>) -> Result<Self, TrainingError> {
        if x.nrows() == 0 {
            return Err(TrainingError::DimensionMismatch(
                "cannot fit a scaler on zero rows".into(),
            ));
        }
        let means = x
            .mean_axis(Axis(0))
            .ok_or_else(|| TrainingError::DimensionMismatch("empty matrix".into()))?;
        let stds = x.std_axis(Axis(0), 0.0);
        Ok(Self {
            means: means.to_vec(),
            stds: stds
                .iter()
                .map(|&std| if std.is_finite() && std > 0.0 { std } else { 1.0 })
                .collect(),
        })
    }

    /// Number of columns the scaler was fit on.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.means.len()
    }

    /// Column means.
    #[must_use]
    pub fn means(&self) -> &[f64] {
        &self.means
    }

    /// Column standard deviations (zeros already replaced by one).
    #[must_use]
    pub fn stds(&self) -> &[f64] {
        &self.stds
    }

    /// Applies `(x - mean) / std` column-wise.
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>, TrainingError> {
        if x.ncols() != self.n_features() {
            return Err(TrainingError::DimensionMismatch(format!(
                "scaler fit on {} features, got {}",
                self.n_features(),
                x.ncols()
            )));
        }
        let mut scaled = x.clone();
        for mut row in scaled.rows_mut() {
            for ((value, mean), std) in row.iter_mut().zip(&self.means).zip(&self.stds) {
                *value = (*value - mean) / std;
            }
        }
        Ok(scaled)
    }

    /// Scales a single request vector. Requires a ten-feature scaler.
    pub fn transform_vector(
        &self,
        vector: &FeatureVector,
    ) -> Result<[f64; FEATURE_COUNT], TrainingError> {
        if self.n_features() != FEATURE_COUNT {
            return Err(TrainingError::DimensionMismatch(format!(
                "scaler fit on {} features, requests carry {FEATURE_COUNT}",
                self.n_features()
            )));
        }
        let mut values = vector.as_array();
        for ((value, mean), std) in values.iter_mut().zip(&self.means).zip(&self.stds) {
            *value = (*value - mean) / std;
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn standardises_columns() {
        let x = array![[1.0, 10.0], [3.0, 30.0]];
        let scaler = StandardScaler::fit(&x).unwrap();
        assert_eq!(scaler.means(), [2.0, 20.0]);
        assert_eq!(scaler.stds(), [1.0, 10.0]);
        let scaled = scaler.transform(&x).unwrap();
        assert_eq!(scaled, array![[-1.0, -1.0], [1.0, 1.0]]);
    }

    #[test]
    fn zero_variance_column_is_only_shifted() {
        let x = array![[5.0, 1.0], [5.0, 3.0], [5.0, 5.0]];
        let scaler = StandardScaler::fit(&x).unwrap();
        assert_eq!(scaler.stds()[0], 1.0);
        let scaled = scaler.transform(&array![[7.0, 3.0]]).unwrap();
        assert_eq!(scaled[[0, 0]], 2.0);
        assert!(scaled.iter().all(|value| value.is_finite()));
    }

    #[test]
    fn transforming_twice_is_identical() {
        let rows: Vec<f64> = (0..40).map(|i| f64::from(i) * 1.5 + 3.0).collect();
        let x = Array2::from_shape_vec((4, FEATURE_COUNT), rows).unwrap();
        let scaler = StandardScaler::fit(&x).unwrap();
        let vector =
            FeatureVector::from_array([9.0, 55.0, 60.0, 58.0, 70.0, 72.0, 68.0, 40.0, 35.0, 45.0]);
        let first = scaler.transform_vector(&vector).unwrap();
        let second = scaler.transform_vector(&vector).unwrap();
        assert_eq!(first.map(f64::to_bits), second.map(f64::to_bits));
    }

    #[test]
    fn test_statistics_do_not_leak_into_fit() {
        let train = array![[0.0], [2.0]];
        let test = array![[100.0]];
        let scaler = StandardScaler::fit(&train).unwrap();
        assert_eq!(scaler.transform(&test).unwrap()[[0, 0]], 99.0);
        assert_eq!(scaler.means(), [1.0]);
    }

    #[test]
    fn rejects_width_mismatch() {
        let scaler = StandardScaler::fit(&array![[1.0, 2.0]]).unwrap();
        assert!(scaler.transform(&array![[1.0]]).is_err());
        assert!(scaler
            .transform_vector(&FeatureVector::from_array([0.0; FEATURE_COUNT]))
            .is_err());
    }
}
