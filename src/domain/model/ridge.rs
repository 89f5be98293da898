//! Ridge regression with an unpenalised intercept.

use super::{check_shape, Prediction, SignalModel};
use crate::domain::error::QuantwalkError;

#[derive(Debug, Clone)]
pub struct RidgeRegressor {
    l2: f64,
    intercept: f64,
    coefficients: Option<Vec<f64>>,
}

impl RidgeRegressor {
    pub fn new(l2: f64) -> Self {
        Self {
            l2,
            intercept: 0.0,
            coefficients: None,
        }
    }
}

/// Solve `a · x = b` by Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, QuantwalkError> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-12 {
            return Err(QuantwalkError::Model {
                reason: "singular normal equations; increase l2".into(),
            });
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}

impl SignalModel for RidgeRegressor {
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<(), QuantwalkError> {
        let width = check_shape(x, Some(y))?;
        let n = x.len() as f64;
        let x_mean: Vec<f64> = (0..width)
            .map(|j| x.iter().map(|r| r[j]).sum::<f64>() / n)
            .collect();
        let y_mean = y.iter().sum::<f64>() / n;

        let mut xtx = vec![vec![0.0; width]; width];
        let mut xty = vec![0.0; width];
        for (row, target) in x.iter().zip(y) {
            let centred: Vec<f64> = row.iter().zip(&x_mean).map(|(v, m)| v - m).collect();
            let yc = target - y_mean;
            for i in 0..width {
                xty[i] += centred[i] * yc;
                for j in 0..width {
                    xtx[i][j] += centred[i] * centred[j];
                }
            }
        }
        for (i, row) in xtx.iter_mut().enumerate() {
            row[i] += self.l2;
        }

        let coefficients = if width == 0 { Vec::new() } else { solve(xtx, xty)? };
        self.intercept = y_mean
            - coefficients
                .iter()
                .zip(&x_mean)
                .map(|(c, m)| c * m)
                .sum::<f64>();
        self.coefficients = Some(coefficients);
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Result<Prediction, QuantwalkError> {
        let coefficients = self.coefficients.as_ref().ok_or_else(|| QuantwalkError::Model {
            reason: "ridge regressor used before fit".into(),
        })?;
        check_shape(x, None)?;
        Ok(Prediction::Regression(
            x.iter()
                .map(|row| {
                    self.intercept + row.iter().zip(coefficients).map(|(v, c)| v * c).sum::<f64>()
                })
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn recovers_linear_relationship() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64, (i * i) as f64 % 7.0]).collect();
        let y: Vec<f64> = x.iter().map(|r| 2.0 + 3.0 * r[0] - 1.5 * r[1]).collect();
        let mut model = RidgeRegressor::new(0.0);
        model.fit(&x, &y).unwrap();
        match model.predict(&[vec![20.0, 1.0]]).unwrap() {
            Prediction::Regression(v) => assert_abs_diff_eq!(v[0], 2.0 + 60.0 - 1.5, epsilon = 1e-6),
            other => panic!("expected regression, got {other:?}"),
        }
    }

    #[test]
    fn penalty_shrinks_slope() {
        let x: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..5).map(|i| i as f64).collect();
        let mut loose = RidgeRegressor::new(0.0);
        let mut tight = RidgeRegressor::new(100.0);
        loose.fit(&x, &y).unwrap();
        tight.fit(&x, &y).unwrap();
        let slope = |m: &RidgeRegressor| m.coefficients.as_ref().unwrap()[0];
        assert!(slope(&tight) < slope(&loose));
    }

    #[test]
    fn constant_feature_without_penalty_is_singular() {
        let mut model = RidgeRegressor::new(0.0);
        let err = model.fit(&[vec![1.0], vec![1.0]], &[0.0, 1.0]).unwrap_err();
        assert!(matches!(err, QuantwalkError::Model { .. }));
    }
}
